//! Read side of the order book, for receipts and order history.

use std::sync::Arc;

use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::value_objects::{OrderId, OwnerId};
use crate::store::{RowLock, Store};
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct OrderQueries {
    store: Arc<dyn Store>,
}

impl OrderQueries {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let order = tx.find_order(id, RowLock::None).await?;
        order.ok_or_else(|| CommerceError::not_found("order", id))
    }

    /// Newest first.
    pub async fn orders_for_owner(&self, owner: OwnerId) -> Result<Vec<Order>> {
        let mut tx = self.store.begin().await?;
        let orders = tx.orders_for_owner(owner).await?;
        Ok(orders)
    }

    /// Admin view over every order, newest first.
    pub async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let mut tx = self.store.begin().await?;
        let orders = tx.list_orders(status).await?;
        tracing::debug!(?status, count = orders.len(), "orders listed");
        Ok(orders)
    }
}
