//! In-process store.
//!
//! A transaction holds the single store-wide lock from `begin` until it is
//! committed or dropped, so transactions run one at a time. Writes go to a
//! private copy of the tables that replaces the shared copy on commit.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{RowLock, Store, StoreError, StoreResult, StoreTx};
use crate::domain::aggregates::{Cart, CartItem, CartStatus, Order, OrderStatus, Product};
use crate::domain::value_objects::{CartId, CartItemId, OrderId, OwnerId, ProductId};

#[derive(Clone, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    carts: HashMap<CartId, Cart>,
    orders: HashMap<OrderId, Order>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Seeds or replaces a catalog row.
    pub async fn insert_product(&self, product: Product) {
        let mut product = product;
        product.events.clear();
        self.tables.lock().await.products.insert(product.id, product);
    }

    /// Committed state of a product.
    pub async fn product(&self, id: ProductId) -> Option<Product> {
        self.tables.lock().await.products.get(&id).cloned()
    }

    /// Deletes a catalog row, leaving any cart or order lines that refer to it.
    pub async fn remove_product(&self, id: ProductId) -> Option<Product> {
        self.tables.lock().await.products.remove(&id)
    }

    /// Makes the next commit fail as if the backing store went away.
    pub fn fail_next_commit(&self) { self.fail_next_commit.store(true, Ordering::SeqCst); }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let committed = Arc::clone(&self.tables).lock_owned().await;
        let work = committed.clone();
        Ok(Box::new(MemoryTx { committed, work, fail_commit: Arc::clone(&self.fail_next_commit) }))
    }
}

struct MemoryTx {
    committed: OwnedMutexGuard<Tables>,
    work: Tables,
    fail_commit: Arc<AtomicBool>,
}

impl MemoryTx {
    fn active_cart_id(&self, owner: OwnerId) -> Option<CartId> {
        self.work.carts.values().find(|c| c.owner_id == owner && c.status == CartStatus::Active).map(|c| c.id)
    }

    fn newest_first(&self, keep: impl Fn(&Order) -> bool) -> Vec<Order> {
        let mut orders: Vec<Order> = self.work.orders.values().filter(|o| keep(o)).cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_product(&mut self, id: ProductId, _lock: RowLock) -> StoreResult<Option<Product>> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn update_product_stock(&mut self, product: &Product) -> StoreResult<()> {
        let row = self.work.products.get_mut(&product.id)
            .ok_or_else(|| StoreError::DataCorruption(format!("product {} vanished mid-transaction", product.id)))?;
        row.stock = product.stock;
        row.availability = product.availability;
        row.updated_at = product.updated_at;
        Ok(())
    }

    async fn get_or_create_active_cart(&mut self, owner: OwnerId) -> StoreResult<Cart> {
        if let Some(id) = self.active_cart_id(owner) {
            return Ok(self.work.carts[&id].clone());
        }
        let cart = Cart::open(owner);
        self.work.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn find_active_cart(&mut self, owner: OwnerId, _lock: RowLock) -> StoreResult<Option<Cart>> {
        Ok(self.active_cart_id(owner).map(|id| self.work.carts[&id].clone()))
    }

    async fn find_cart(&mut self, id: CartId, _lock: RowLock) -> StoreResult<Option<Cart>> {
        Ok(self.work.carts.get(&id).cloned())
    }

    async fn find_cart_by_item(&mut self, item: CartItemId, _lock: RowLock) -> StoreResult<Option<Cart>> {
        Ok(self.work.carts.values().find(|c| c.items.iter().any(|i| i.id == item)).cloned())
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        let cart = self.work.carts.get_mut(&item.cart_id)
            .ok_or_else(|| StoreError::DataCorruption(format!("cart {} does not exist", item.cart_id)))?;
        if cart.items.iter().any(|i| i.product_id == item.product_id && i.id != item.id) {
            return Err(StoreError::DataCorruption(format!("duplicate line for product {} in cart {}", item.product_id, item.cart_id)));
        }
        match cart.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => cart.items.push(item.clone()),
        }
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: CartItemId) -> StoreResult<()> {
        for cart in self.work.carts.values_mut() {
            cart.items.retain(|i| i.id != id);
        }
        Ok(())
    }

    async fn retire_cart(&mut self, cart: &Cart) -> StoreResult<()> {
        let row = self.work.carts.get_mut(&cart.id)
            .ok_or_else(|| StoreError::DataCorruption(format!("cart {} does not exist", cart.id)))?;
        row.status = cart.status;
        row.updated_at = cart.updated_at;
        row.items.clear();
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        let mut order = order.clone();
        order.events.clear();
        self.work.orders.insert(order.id, order);
        Ok(())
    }

    async fn find_order(&mut self, id: OrderId, _lock: RowLock) -> StoreResult<Option<Order>> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn orders_for_owner(&mut self, owner: OwnerId) -> StoreResult<Vec<Order>> {
        Ok(self.newest_first(|o| o.owner_id == owner))
    }

    async fn list_orders(&mut self, status: Option<OrderStatus>) -> StoreResult<Vec<Order>> {
        Ok(self.newest_first(|o| status.map_or(true, |s| o.status == s)))
    }

    async fn update_order_status(&mut self, order: &Order) -> StoreResult<()> {
        let row = self.work.orders.get_mut(&order.id)
            .ok_or_else(|| StoreError::DataCorruption(format!("order {} does not exist", order.id)))?;
        row.status = order.status;
        row.last_changed_by = order.last_changed_by;
        row.status_changed_at = order.status_changed_at;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("commit failed".into()));
        }
        let MemoryTx { mut committed, work, .. } = *self;
        *committed = work;
        Ok(())
    }
}
