//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::{Availability, Product, ProductError};
pub use order::{restores_stock, Order, OrderError, OrderItem, OrderStatus};
pub use cart::{Cart, CartError, CartItem, CartStatus};
