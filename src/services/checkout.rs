//! Cart-to-order conversion.

use std::sync::Arc;

use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::catalog::ProductCatalog;
use crate::domain::aggregates::{Availability, Order, Product};
use crate::domain::value_objects::{OwnerId, PaymentMethod};
use crate::notifier::Notifier;
use crate::store::{RowLock, Store};
use crate::{CommerceError, Result};

/// What the shopper submits at checkout.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutDetails {
    #[validate(length(min = 10, max = 500, message = "shipping address must be between 10 and 500 characters"))]
    pub shipping_address: String,
    #[validate(custom = "known_payment_method")]
    pub payment_method: String,
}

fn known_payment_method(value: &str) -> std::result::Result<(), ValidationError> {
    value.parse::<PaymentMethod>().map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("payment_method");
        err.message = Some(format!("unsupported payment method '{value}'").into());
        err
    })
}

impl CheckoutDetails {
    pub fn new(shipping_address: impl Into<String>, payment_method: impl Into<String>) -> Self {
        Self { shipping_address: shipping_address.into(), payment_method: payment_method.into() }
    }

    /// Trims, validates and parses into the address and payment method stored on the order.
    fn into_parts(self) -> Result<(String, PaymentMethod)> {
        let details = Self::new(self.shipping_address.trim(), self.payment_method.trim());
        details.validate()?;
        let method = details.payment_method.parse::<PaymentMethod>().map_err(|e| CommerceError::ValidationFailed(e.to_string()))?;
        Ok((details.shipping_address, method))
    }
}

pub struct CheckoutEngine {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
}

impl CheckoutEngine {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self { Self { store, notifier } }

    /// Converts the owner's active cart into a pending order.
    ///
    /// Runs as one transaction: every product row in the cart is locked,
    /// each line is checked against current stock, the order is written,
    /// stock is decremented and the cart retired. Any failure leaves the
    /// catalog, the order book and the cart exactly as they were.
    ///
    /// The order total is computed from the prices stored on the cart lines,
    /// not from the catalog's current prices.
    #[tracing::instrument(skip(self, details), fields(order_id))]
    pub async fn checkout(&self, owner: OwnerId, details: CheckoutDetails) -> Result<Order> {
        let (shipping_address, payment_method) = details.into_parts()?;

        let mut tx = self.store.begin().await?;
        let mut cart = tx.find_active_cart(owner, RowLock::ForUpdate).await?.ok_or(CommerceError::EmptyCart)?;
        if cart.is_empty() {
            return Err(CommerceError::EmptyCart);
        }

        let mut catalog = ProductCatalog::new(tx.as_mut());
        let snapshot = catalog.lock_all(cart.items().iter().map(|i| i.product_id)).await?;
        for line in cart.items() {
            let product = snapshot.get(&line.product_id).filter(|p| is_sellable(p))
                .ok_or(CommerceError::ProductUnavailable(line.product_id))?;
            if line.quantity.value() > product.stock() {
                tracing::debug!(product_id = %line.product_id, requested = %line.quantity, available = product.stock(), "checkout rejected");
                return Err(CommerceError::InsufficientStock {
                    product_id: line.product_id, requested: line.quantity.value(), available: product.stock(),
                });
            }
        }

        let mut order = Order::place(owner, cart.items(), shipping_address, payment_method)?;
        let mut events = order.take_events();
        for line in cart.items() {
            let mut product = catalog.adjust_stock(line.product_id, -i64::from(line.quantity.value())).await?;
            events.extend(product.take_events());
        }

        cart.convert()?;
        tx.insert_order(&order).await?;
        tx.retire_cart(&cart).await?;
        tx.commit().await?;

        tracing::Span::current().record("order_id", tracing::field::display(order.id()));
        tracing::info!(total = %order.total(), lines = order.items().len(), "order placed");
        self.notifier.notify(events);
        Ok(order)
    }
}

/// A product can still be sold if it exists in the catalog and wasn't pulled by an admin.
/// Sold-out products fall through to the stock check instead.
fn is_sellable(product: &Product) -> bool {
    product.availability() != Availability::Unpublished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{DomainEvent, OrderEvent, ProductEvent};
    use crate::services::testing::RecordingNotifier;
    use crate::services::{CartStore, OrderQueries};
    use crate::store::MemoryStore;
    use crate::{CartStatus, Money, OrderStatus};

    struct Fixture {
        store: MemoryStore,
        carts: CartStore,
        engine: CheckoutEngine,
        orders: OrderQueries,
        notifier: Arc<RecordingNotifier>,
        owner: OwnerId,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        Fixture {
            carts: CartStore::new(Arc::clone(&shared)),
            engine: CheckoutEngine::new(Arc::clone(&shared), notifier.clone()),
            orders: OrderQueries::new(shared),
            store, notifier, owner: OwnerId::generate(),
        }
    }

    async fn seed(store: &MemoryStore, cents: i64, stock: u32) -> Product {
        let product = Product::create("Item", Money::from_cents(cents), stock);
        store.insert_product(product.clone()).await;
        product
    }

    fn details() -> CheckoutDetails { CheckoutDetails::new("12 Harbour Road, Lagos", "card") }

    #[tokio::test]
    async fn test_checkout_scenario() {
        let f = fixture();
        let a = seed(&f.store, 1000, 5).await;
        let b = seed(&f.store, 500, 1).await;
        let cart = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), a.id(), 2).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), b.id(), 1).await.unwrap();

        let order = f.engine.checkout(f.owner, details()).await.unwrap();

        assert_eq!(order.total(), Money::from_cents(2500));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.payment_method(), PaymentMethod::Card);
        assert_eq!(f.store.product(a.id()).await.unwrap().stock(), 3);
        let b_after = f.store.product(b.id()).await.unwrap();
        assert_eq!(b_after.stock(), 0);
        assert_eq!(b_after.availability(), Availability::Unavailable);

        let next = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        assert_ne!(next.id(), cart.id());
        assert!(next.is_empty());
        assert_eq!(f.orders.get_order(order.id()).await.unwrap().total(), Money::from_cents(2500));

        let events = f.notifier.events();
        assert!(events.contains(&DomainEvent::Order(OrderEvent::Placed { order_id: order.id(), owner_id: f.owner, total: order.total() })));
        assert!(events.contains(&DomainEvent::Product(ProductEvent::SoldOut { product_id: b.id() })));
    }

    #[tokio::test]
    async fn test_charges_cart_price_not_current_price() {
        let f = fixture();
        let mut a = seed(&f.store, 1000, 5).await;
        let cart = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), a.id(), 1).await.unwrap();
        a.update_price(Money::from_cents(9999));
        f.store.insert_product(a.clone()).await;

        let order = f.engine.checkout(f.owner, details()).await.unwrap();
        assert_eq!(order.total(), Money::from_cents(1000));
        assert_eq!(order.items()[0].unit_price, Money::from_cents(1000));
    }

    #[tokio::test]
    async fn test_insufficient_stock_aborts_everything() {
        let f = fixture();
        let a = seed(&f.store, 1000, 5).await;
        let b = seed(&f.store, 500, 3).await;
        let cart = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), a.id(), 2).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), b.id(), 3).await.unwrap();
        // stock of B drops after it was carted
        let mut shrunk = b.clone();
        shrunk.adjust_stock(-2).unwrap();
        f.store.insert_product(shrunk).await;

        let err = f.engine.checkout(f.owner, details()).await.unwrap_err();
        assert!(matches!(err, CommerceError::InsufficientStock { requested: 3, available: 1, .. }));

        assert_eq!(f.store.product(a.id()).await.unwrap().stock(), 5);
        assert_eq!(f.store.product(b.id()).await.unwrap().stock(), 1);
        assert!(f.orders.orders_for_owner(f.owner).await.unwrap().is_empty());
        let still = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        assert_eq!(still.id(), cart.id());
        assert_eq!(still.status(), CartStatus::Active);
        assert_eq!(still.items().len(), 2);
        assert!(f.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_unpublished_product_is_unavailable() {
        let f = fixture();
        let mut a = seed(&f.store, 1000, 5).await;
        let cart = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), a.id(), 1).await.unwrap();
        a.unpublish();
        f.store.insert_product(a.clone()).await;

        let err = f.engine.checkout(f.owner, details()).await.unwrap_err();
        assert!(matches!(err, CommerceError::ProductUnavailable(id) if id == a.id()));
    }

    #[tokio::test]
    async fn test_deleted_product_is_unavailable_and_nothing_moves() {
        let f = fixture();
        let a = seed(&f.store, 1000, 5).await;
        let b = seed(&f.store, 500, 2).await;
        let cart = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), a.id(), 2).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), b.id(), 1).await.unwrap();
        f.store.remove_product(b.id()).await.unwrap();

        let err = f.engine.checkout(f.owner, details()).await.unwrap_err();
        assert!(matches!(err, CommerceError::ProductUnavailable(id) if id == b.id()));

        assert_eq!(f.store.product(a.id()).await.unwrap().stock(), 5);
        assert!(f.orders.orders_for_owner(f.owner).await.unwrap().is_empty());
        let still = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        assert_eq!(still.id(), cart.id());
        assert_eq!(still.status(), CartStatus::Active);
        assert_eq!(still.items().len(), 2);
        assert!(f.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_empty_or_missing_cart() {
        let f = fixture();
        assert!(matches!(f.engine.checkout(f.owner, details()).await, Err(CommerceError::EmptyCart)));
        f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        assert!(matches!(f.engine.checkout(f.owner, details()).await, Err(CommerceError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_details_validation() {
        let f = fixture();
        let a = seed(&f.store, 1000, 5).await;
        let cart = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), a.id(), 1).await.unwrap();

        for bad in [
            CheckoutDetails::new("short", "card"),
            CheckoutDetails::new("          ", "card"),
            CheckoutDetails::new("12 Harbour Road, Lagos", "bitcoin"),
        ] {
            assert!(matches!(f.engine.checkout(f.owner, bad).await, Err(CommerceError::ValidationFailed(_))));
        }
        let padded = CheckoutDetails::new("   12 Harbour Road, Lagos  ", " bank_transfer ");
        let order = f.engine.checkout(f.owner, padded).await.unwrap();
        assert_eq!(order.shipping_address(), "12 Harbour Road, Lagos");
        assert_eq!(order.payment_method(), PaymentMethod::BankTransfer);
    }

    #[tokio::test]
    async fn test_commit_failure_is_transaction_aborted() {
        let f = fixture();
        let a = seed(&f.store, 1000, 5).await;
        let cart = f.carts.get_or_create_active_cart(f.owner).await.unwrap();
        f.carts.add_item(f.owner, cart.id(), a.id(), 2).await.unwrap();

        f.store.fail_next_commit();
        let err = f.engine.checkout(f.owner, details()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.store.product(a.id()).await.unwrap().stock(), 5);
        assert_eq!(f.carts.get_or_create_active_cart(f.owner).await.unwrap().id(), cart.id());

        f.engine.checkout(f.owner, details()).await.unwrap();
        assert_eq!(f.store.product(a.id()).await.unwrap().stock(), 3);
    }
}
