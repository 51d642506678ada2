//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use crate::domain::aggregates::Product;
use crate::domain::value_objects::{CartId, CartItemId, Money, OwnerId, ProductId, Quantity, UnknownVariant};

#[derive(Clone, Debug, Serialize)]
pub struct Cart {
    pub(crate) id: CartId,
    pub(crate) owner_id: OwnerId,
    pub(crate) status: CartStatus,
    pub(crate) items: Vec<CartItem>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus { #[default] Active, Converted }

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Active => "active", Self::Converted => "converted" }
    }
}

impl FromStr for CartStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "active" => Ok(Self::Active), "converted" => Ok(Self::Converted), other => Err(UnknownVariant(other.to_string())) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    /// Price the shopper last saw; refreshed on every add of the product.
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

impl Cart {
    pub fn open(owner_id: OwnerId) -> Self {
        let now = Utc::now();
        Self { id: CartId::generate(), owner_id, status: CartStatus::Active, items: vec![], created_at: now, updated_at: now }
    }

    pub fn id(&self) -> CartId { self.id }
    pub fn owner_id(&self) -> OwnerId { self.owner_id }
    pub fn status(&self) -> CartStatus { self.status }
    pub fn is_active(&self) -> bool { self.status == CartStatus::Active }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item(&self, id: CartItemId) -> Option<&CartItem> { self.items.iter().find(|i| i.id == id) }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn total(&self) -> Money { self.items.iter().map(CartItem::line_total).sum() }

    /// Adds `qty` of `product`, merging into an existing line for the same product.
    ///
    /// The merged quantity has to fit in current stock. The line's unit price is
    /// reset to the product's current price either way.
    pub fn add_item(&mut self, product: &Product, qty: Quantity) -> Result<&CartItem, CartError> {
        self.ensure_active()?;
        let idx = match self.items.iter().position(|i| i.product_id == product.id()) {
            Some(idx) => {
                let merged = self.items[idx].quantity.checked_add(qty)
                    .ok_or(CartError::InsufficientStock { product_id: product.id(), requested: u32::MAX, available: product.stock() })?;
                check_stock(product, merged)?;
                let line = &mut self.items[idx];
                line.quantity = merged;
                line.unit_price = product.price();
                idx
            }
            None => {
                check_stock(product, qty)?;
                self.items.push(CartItem {
                    id: CartItemId::generate(), cart_id: self.id, product_id: product.id(),
                    quantity: qty, unit_price: product.price(),
                });
                self.items.len() - 1
            }
        };
        self.touch();
        Ok(&self.items[idx])
    }

    /// Sets a line's quantity outright. The unit price is left as it was.
    pub fn set_quantity(&mut self, item_id: CartItemId, qty: Quantity, product: &Product) -> Result<&CartItem, CartError> {
        self.ensure_active()?;
        let idx = self.items.iter().position(|i| i.id == item_id).ok_or(CartError::ItemNotFound(item_id))?;
        check_stock(product, qty)?;
        self.items[idx].quantity = qty;
        self.touch();
        Ok(&self.items[idx])
    }

    pub fn remove_item(&mut self, item_id: CartItemId) -> Result<CartItem, CartError> {
        self.ensure_active()?;
        let idx = self.items.iter().position(|i| i.id == item_id).ok_or(CartError::ItemNotFound(item_id))?;
        let removed = self.items.remove(idx);
        self.touch();
        Ok(removed)
    }

    /// Retires the cart after checkout. Its lines are handed back and the cart is left empty.
    pub fn convert(&mut self) -> Result<Vec<CartItem>, CartError> {
        self.ensure_active()?;
        if self.items.is_empty() { return Err(CartError::Empty); }
        self.status = CartStatus::Converted;
        self.touch();
        Ok(std::mem::take(&mut self.items))
    }

    fn ensure_active(&self) -> Result<(), CartError> {
        if self.is_active() { Ok(()) } else { Err(CartError::NotActive(self.id)) }
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

fn check_stock(product: &Product, wanted: Quantity) -> Result<(), CartError> {
    if wanted.value() > product.stock() {
        return Err(CartError::InsufficientStock { product_id: product.id(), requested: wanted.value(), available: product.stock() });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    ItemNotFound(CartItemId),
    NotActive(CartId),
    Empty,
    InsufficientStock { product_id: ProductId, requested: u32, available: u32 },
}
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound(id) => write!(f, "cart item {id} not found"),
            Self::NotActive(id) => write!(f, "cart {id} has already been checked out"),
            Self::Empty => write!(f, "cart is empty"),
            Self::InsufficientStock { product_id, requested, available } =>
                write!(f, "product {product_id}: requested {requested}, only {available} in stock"),
        }
    }
}
