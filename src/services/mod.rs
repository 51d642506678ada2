//! Application services. Each public operation is one store transaction.

mod cart;
mod checkout;
mod lifecycle;
mod orders;

pub use cart::CartStore;
pub use checkout::{CheckoutDetails, CheckoutEngine};
pub use lifecycle::OrderLifecycle;
pub use orders::OrderQueries;
