//! Order Aggregate
//!
//! An order is written once at checkout. Afterwards only its status (and who
//! changed it, and when) may move, along the table in [`OrderStatus::can_transition_to`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::domain::aggregates::CartItem;
use crate::domain::value_objects::{AdminId, Money, OrderId, OwnerId, PaymentMethod, ProductId, Quantity, UnknownVariant};
use crate::domain::events::{DomainEvent, OrderEvent};

#[derive(Clone, Debug, Serialize)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) owner_id: OwnerId,
    pub(crate) total: Money,
    pub(crate) status: OrderStatus,
    pub(crate) shipping_address: String,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) last_changed_by: Option<AdminId>,
    pub(crate) status_changed_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) items: Vec<OrderItem>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

/// What was bought, at the price charged. Never re-derived from the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub line_subtotal: Money,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Paid, Shipped, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Paid => "paid", Self::Shipped => "shipped", Self::Cancelled => "cancelled" }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Shipped | Self::Cancelled) }

    /// `pending → paid | cancelled`, `paid → shipped | cancelled`. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid) | (Self::Pending, Self::Cancelled) | (Self::Paid, Self::Shipped) | (Self::Paid, Self::Cancelled)
        )
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "shipped" => Ok(Self::Shipped),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl Order {
    /// Builds a pending order from cart lines, freezing each line's unit price.
    pub fn place(owner_id: OwnerId, lines: &[CartItem], shipping_address: impl Into<String>, payment_method: PaymentMethod) -> Result<Self, OrderError> {
        if lines.is_empty() { return Err(OrderError::NoItems); }
        let id = OrderId::generate();
        let items: Vec<OrderItem> = lines.iter().map(|line| OrderItem {
            order_id: id, product_id: line.product_id, quantity: line.quantity,
            unit_price: line.unit_price, line_subtotal: line.line_total(),
        }).collect();
        let total = items.iter().map(|i| i.line_subtotal).sum();
        let mut order = Self {
            id, owner_id, total, status: OrderStatus::Pending, shipping_address: shipping_address.into(),
            payment_method, last_changed_by: None, status_changed_at: None, created_at: Utc::now(), items, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: id, owner_id, total }));
        Ok(order)
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn owner_id(&self) -> OwnerId { self.owner_id }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn total(&self) -> Money { self.total }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn shipping_address(&self) -> &str { &self.shipping_address }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn last_changed_by(&self) -> Option<AdminId> { self.last_changed_by }
    pub fn status_changed_at(&self) -> Option<DateTime<Utc>> { self.status_changed_at }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    /// Moves to `next` on behalf of `admin`, returning the status it left.
    pub fn transition(&mut self, next: OrderStatus, admin: AdminId, at: DateTime<Utc>) -> Result<OrderStatus, OrderError> {
        let from = self.status;
        if !from.can_transition_to(next) { return Err(OrderError::InvalidTransition { from, to: next }); }
        self.status = next;
        self.last_changed_by = Some(admin);
        self.status_changed_at = Some(at);
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id, from, to: next, admin_id: admin }));
        Ok(from)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

/// Whether leaving `from` for `to` hands the order's stock back to the catalog.
pub fn restores_stock(from: OrderStatus, to: OrderStatus) -> bool {
    to == OrderStatus::Cancelled && !from.is_terminal()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError { NoItems, InvalidTransition { from: OrderStatus, to: OrderStatus } }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::InvalidTransition { from, to } => write!(f, "cannot move order from {from} to {to}"),
        }
    }
}
