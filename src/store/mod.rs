//! Transactional persistence for carts, orders and product stock.
//!
//! Every service operation runs inside one [`StoreTx`]. Nothing is visible to
//! other transactions until [`StoreTx::commit`]; dropping a transaction
//! without committing discards all of its writes.
//!
//! Rows fetched with [`RowLock::ForUpdate`] stay locked until the
//! transaction ends, which is what serialises concurrent stock checks and
//! decrements against the same product.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::aggregates::{Cart, CartItem, Order, OrderStatus, Product};
use crate::domain::value_objects::{CartId, CartItemId, OrderId, OwnerId, ProductId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    DataCorruption(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowLock { None, ForUpdate }

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    // Catalog
    async fn find_product(&mut self, id: ProductId, lock: RowLock) -> StoreResult<Option<Product>>;
    async fn update_product_stock(&mut self, product: &Product) -> StoreResult<()>;

    // Carts; returned carts carry their items.
    /// The owner's active cart, inserting an empty one if there is none.
    async fn get_or_create_active_cart(&mut self, owner: OwnerId) -> StoreResult<Cart>;
    async fn find_active_cart(&mut self, owner: OwnerId, lock: RowLock) -> StoreResult<Option<Cart>>;
    async fn find_cart(&mut self, id: CartId, lock: RowLock) -> StoreResult<Option<Cart>>;
    async fn find_cart_by_item(&mut self, item: CartItemId, lock: RowLock) -> StoreResult<Option<Cart>>;
    /// Insert or update by item id.
    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()>;
    async fn delete_cart_item(&mut self, id: CartItemId) -> StoreResult<()>;
    /// Persists a converted cart and deletes all of its items.
    async fn retire_cart(&mut self, cart: &Cart) -> StoreResult<()>;

    // Orders; returned orders carry their items.
    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;
    async fn find_order(&mut self, id: OrderId, lock: RowLock) -> StoreResult<Option<Order>>;
    async fn orders_for_owner(&mut self, owner: OwnerId) -> StoreResult<Vec<Order>>;
    /// Every order, newest first, optionally only those in `status`.
    async fn list_orders(&mut self, status: Option<OrderStatus>) -> StoreResult<Vec<Order>>;
    async fn update_order_status(&mut self, order: &Order) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
