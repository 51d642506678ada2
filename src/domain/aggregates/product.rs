//! Product Aggregate
//!
//! Only the slice of the catalog that checkout touches: price, stock and
//! availability. Catalog editing lives elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use crate::domain::value_objects::{Money, ProductId, Quantity, UnknownVariant};
use crate::domain::events::{DomainEvent, ProductEvent};

#[derive(Clone, Debug, Serialize)]
pub struct Product {
    pub(crate) id: ProductId,
    pub(crate) name: String,
    pub(crate) price: Money,
    pub(crate) stock: u32,
    pub(crate) availability: Availability,
    pub(crate) updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability { #[default] Unpublished, Published, Unavailable }

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Published => "published", Self::Unpublished => "unpublished", Self::Unavailable => "unavailable" }
    }
}

impl FromStr for Availability {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(Self::Published),
            "unpublished" => Ok(Self::Unpublished),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl Product {
    /// A published product. Zero stock starts out unavailable.
    pub fn create(name: impl Into<String>, price: Money, stock: u32) -> Self {
        let mut product = Self {
            id: ProductId::generate(), name: name.into(), price, stock,
            availability: Availability::Unpublished, updated_at: Utc::now(), events: vec![],
        };
        product.publish();
        product
    }

    pub fn id(&self) -> ProductId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn price(&self) -> Money { self.price }
    pub fn stock(&self) -> u32 { self.stock }
    pub fn availability(&self) -> Availability { self.availability }
    pub fn is_published(&self) -> bool { self.availability == Availability::Published }

    pub fn publish(&mut self) {
        self.availability = if self.stock == 0 { Availability::Unavailable } else { Availability::Published };
        self.touch();
    }

    pub fn unpublish(&mut self) { self.availability = Availability::Unpublished; self.touch(); }

    pub fn update_price(&mut self, new_price: Money) { self.price = new_price; self.touch(); }

    /// Takes `qty` units out of stock. Running out flips a published product to unavailable.
    ///
    /// Going below zero is an invariant breach; the stock is left untouched.
    pub fn remove_stock(&mut self, qty: Quantity) -> Result<(), ProductError> {
        self.stock = self.stock.checked_sub(qty.value()).ok_or(ProductError::NegativeStock {
            product_id: self.id, stock: self.stock, requested: qty.value(),
        })?;
        if self.stock == 0 && self.availability == Availability::Published {
            self.availability = Availability::Unavailable;
            self.raise_event(DomainEvent::Product(ProductEvent::SoldOut { product_id: self.id }));
        }
        self.touch();
        Ok(())
    }

    /// Puts `qty` units back. An unavailable product with stock again is re-published.
    pub fn add_stock(&mut self, qty: Quantity) -> Result<(), ProductError> {
        self.stock = self.stock.checked_add(qty.value()).ok_or(ProductError::StockOverflow { product_id: self.id })?;
        if self.stock > 0 && self.availability == Availability::Unavailable {
            self.availability = Availability::Published;
        }
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::StockRestored {
            product_id: self.id, quantity: qty.value(), stock: self.stock,
        }));
        Ok(())
    }

    /// Signed stock adjustment; zero is a no-op.
    pub fn adjust_stock(&mut self, delta: i64) -> Result<(), ProductError> {
        let magnitude = u32::try_from(delta.unsigned_abs()).map_err(|_| ProductError::StockOverflow { product_id: self.id })?;
        let Ok(qty) = Quantity::new(magnitude) else { return Ok(()) };
        if delta < 0 { self.remove_stock(qty) } else { self.add_stock(qty) }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductError {
    NegativeStock { product_id: ProductId, stock: u32, requested: u32 },
    StockOverflow { product_id: ProductId },
}
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NegativeStock { product_id, stock, requested } =>
                write!(f, "removing {requested} from product {product_id} would take stock {stock} below zero"),
            Self::StockOverflow { product_id } => write!(f, "stock overflow on product {product_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: u32) -> Quantity { Quantity::new(n).unwrap() }

    #[test]
    fn test_create_publishes_only_with_stock() {
        assert_eq!(Product::create("Widget", Money::from_cents(1000), 3).availability(), Availability::Published);
        assert_eq!(Product::create("Widget", Money::from_cents(1000), 0).availability(), Availability::Unavailable);
    }

    #[test]
    fn test_selling_out_marks_unavailable() {
        let mut p = Product::create("Widget", Money::from_cents(500), 1);
        p.remove_stock(qty(1)).unwrap();
        assert_eq!(p.stock(), 0);
        assert_eq!(p.availability(), Availability::Unavailable);
        assert_eq!(p.take_events(), vec![DomainEvent::Product(ProductEvent::SoldOut { product_id: p.id() })]);
    }

    #[test]
    fn test_negative_stock_is_an_error_not_a_clamp() {
        let mut p = Product::create("Widget", Money::from_cents(500), 2);
        let err = p.remove_stock(qty(3)).unwrap_err();
        assert!(matches!(err, ProductError::NegativeStock { stock: 2, requested: 3, .. }));
        assert_eq!(p.stock(), 2);
        assert!(p.is_published());
    }

    #[test]
    fn test_restoring_stock_republishes() {
        let mut p = Product::create("Widget", Money::from_cents(500), 1);
        p.remove_stock(qty(1)).unwrap();
        p.add_stock(qty(1)).unwrap();
        assert_eq!(p.stock(), 1);
        assert_eq!(p.availability(), Availability::Published);
    }

    #[test]
    fn test_restoring_stock_leaves_unpublished_alone() {
        let mut p = Product::create("Widget", Money::from_cents(500), 0);
        p.unpublish();
        p.adjust_stock(4).unwrap();
        assert_eq!(p.stock(), 4);
        assert_eq!(p.availability(), Availability::Unpublished);
    }

    #[test]
    fn test_adjust_stock_signed() {
        let mut p = Product::create("Widget", Money::from_cents(500), 5);
        p.adjust_stock(-2).unwrap();
        p.adjust_stock(0).unwrap();
        assert_eq!(p.stock(), 3);
        assert!(p.adjust_stock(-4).is_err());
    }
}
