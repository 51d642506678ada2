//! Storefront checkout engine
//!
//! Turns a shopper's cart into an immutable order and governs what happens to
//! that order afterwards.
//!
//! ## Components
//! - [`services::CartStore`] - per-owner carts and their lines
//! - [`services::CheckoutEngine`] - atomic cart-to-order conversion with stock decrement
//! - [`services::OrderLifecycle`] - order status machine, restocking on cancellation
//! - [`store`] - transactional persistence (Postgres, or in-memory for tests)
//! - [`api`] - JSON endpoints over the above

pub mod api;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod notifier;
pub mod services;
pub mod store;

pub use domain::aggregates::{Availability, Cart, CartItem, CartStatus, Order, OrderItem, OrderStatus, Product};
pub use domain::value_objects::{AdminId, CartId, CartItemId, Money, OrderId, OwnerId, PaymentMethod, ProductId, Quantity};

use domain::aggregates::{CartError, OrderError};
use domain::value_objects::QuantityError;
use store::StoreError;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: ProductId, requested: u32, available: u32 },

    #[error("Product {0} is no longer available")]
    ProductUnavailable(ProductId),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[from] StoreError),

    #[error("Stock invariant violated: {0}")]
    InvariantViolation(String),
}

impl CommerceError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Infrastructure failures the caller may retry as-is.
    pub fn is_retryable(&self) -> bool { matches!(self, Self::TransactionAborted(_)) }

    /// Stable machine-readable code for the outer layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::ValidationFailed(_) => "validation_failed",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::EmptyCart => "empty_cart",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::TransactionAborted(_) => "transaction_aborted",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }
}

impl From<CartError> for CommerceError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::ItemNotFound(id) => Self::not_found("cart item", id),
            CartError::NotActive(id) => Self::not_found("active cart", id),
            CartError::Empty => Self::EmptyCart,
            CartError::InsufficientStock { product_id, requested, available } =>
                Self::InsufficientStock { product_id, requested, available },
        }
    }
}

impl From<OrderError> for CommerceError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoItems => Self::EmptyCart,
            OrderError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
        }
    }
}

impl From<QuantityError> for CommerceError {
    fn from(e: QuantityError) -> Self { Self::ValidationFailed(e.to_string()) }
}

impl From<validator::ValidationErrors> for CommerceError {
    fn from(e: validator::ValidationErrors) -> Self { Self::ValidationFailed(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
