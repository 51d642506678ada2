//! Domain events, handed to the notifier once the producing transaction commits.
use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::{AdminId, Money, OrderId, OwnerId, ProductId};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProductEvent {
    SoldOut { product_id: ProductId },
    StockRestored { product_id: ProductId, quantity: u32, stock: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: OrderId, owner_id: OwnerId, total: Money },
    StatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus, admin_id: AdminId },
}

impl DomainEvent {
    /// Subject suffix used when publishing, e.g. `order.placed`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::SoldOut { .. }) => "product.sold_out",
            Self::Product(ProductEvent::StockRestored { .. }) => "product.stock_restored",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
        }
    }
}
