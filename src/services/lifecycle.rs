//! Admin-driven order status changes.

use std::sync::Arc;

use chrono::Utc;

use crate::catalog::ProductCatalog;
use crate::domain::aggregates::{restores_stock, Order, OrderStatus};
use crate::domain::value_objects::{AdminId, OrderId};
use crate::notifier::Notifier;
use crate::store::{RowLock, Store};
use crate::{CommerceError, Result};

pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl OrderLifecycle {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self { Self { store, notifier } }

    /// Moves an order to `new_status` on behalf of `admin`.
    ///
    /// Cancelling an order that hasn't shipped puts every purchased unit back
    /// into stock in the same transaction as the status write.
    #[tracing::instrument(skip(self))]
    pub async fn change_status(&self, order_id: OrderId, new_status: OrderStatus, admin: AdminId) -> Result<Order> {
        let mut tx = self.store.begin().await?;
        let mut order = tx.find_order(order_id, RowLock::ForUpdate).await?
            .ok_or_else(|| CommerceError::not_found("order", order_id))?;
        let previous = order.transition(new_status, admin, Utc::now())?;
        let mut events = order.take_events();

        if restores_stock(previous, new_status) {
            let mut lines: Vec<_> = order.items().iter().map(|i| (i.product_id, i.quantity)).collect();
            lines.sort_unstable_by_key(|(product_id, _)| *product_id);
            let mut catalog = ProductCatalog::new(tx.as_mut());
            for (product_id, quantity) in lines {
                match catalog.adjust_stock(product_id, i64::from(quantity.value())).await {
                    Ok(mut product) => events.extend(product.take_events()),
                    Err(CommerceError::NotFound { .. }) => {
                        tracing::warn!(%product_id, %quantity, "product gone from catalog, skipping restock");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tx.update_order_status(&order).await?;
        tx.commit().await?;

        tracing::info!(from = %previous, to = %new_status, "order status changed");
        self.notifier.notify(events);
        Ok(order)
    }
}
