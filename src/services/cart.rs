//! Shopper carts.

use std::sync::Arc;

use crate::catalog::ProductCatalog;
use crate::domain::aggregates::{Cart, CartItem};
use crate::domain::value_objects::{CartId, CartItemId, Money, OwnerId, ProductId, Quantity};
use crate::store::{RowLock, Store};
use crate::{CommerceError, Result};

#[derive(Clone)]
pub struct CartStore {
    store: Arc<dyn Store>,
}

impl CartStore {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    /// The owner's active cart, created on first use.
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create_active_cart(&self, owner: OwnerId) -> Result<Cart> {
        let mut tx = self.store.begin().await?;
        let cart = tx.get_or_create_active_cart(owner).await?;
        tx.commit().await?;
        Ok(cart)
    }

    /// Adds a published product to the cart, merging with an existing line
    /// and refreshing that line's price to the current one.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, owner: OwnerId, cart_id: CartId, product_id: ProductId, quantity: u32) -> Result<CartItem> {
        let quantity = Quantity::new(quantity)?;
        let mut tx = self.store.begin().await?;
        let mut cart = owned_cart(tx.find_cart(cart_id, RowLock::ForUpdate).await?, owner, || cart_id.to_string())?;
        let product = ProductCatalog::new(tx.as_mut()).find_by_id(product_id).await?;
        if !product.is_published() {
            return Err(CommerceError::not_found("product", product_id));
        }
        let item = cart.add_item(&product, quantity)?.clone();
        tx.save_cart_item(&item).await?;
        tx.commit().await?;
        tracing::debug!(item_id = %item.id, quantity = %item.quantity, "cart line saved");
        Ok(item)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_item_quantity(&self, owner: OwnerId, item_id: CartItemId, quantity: u32) -> Result<CartItem> {
        let quantity = Quantity::new(quantity)?;
        let mut tx = self.store.begin().await?;
        let mut cart = owned_cart(tx.find_cart_by_item(item_id, RowLock::ForUpdate).await?, owner, || item_id.to_string())?;
        let product_id = cart.item(item_id).map(|i| i.product_id).ok_or_else(|| CommerceError::not_found("cart item", item_id))?;
        let product = ProductCatalog::new(tx.as_mut()).find_by_id(product_id).await?;
        let item = cart.set_quantity(item_id, quantity, &product)?.clone();
        tx.save_cart_item(&item).await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Removing a line that is already gone reports `NotFound` and changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, owner: OwnerId, item_id: CartItemId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let mut cart = owned_cart(tx.find_cart_by_item(item_id, RowLock::ForUpdate).await?, owner, || item_id.to_string())?;
        cart.remove_item(item_id)?;
        tx.delete_cart_item(item_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Sum of `quantity × unit_price` over the cart's lines. Read-only.
    pub async fn compute_total(&self, cart_id: CartId) -> Result<Money> {
        let mut tx = self.store.begin().await?;
        let cart = tx.find_cart(cart_id, RowLock::None).await?.ok_or_else(|| CommerceError::not_found("cart", cart_id))?;
        Ok(cart.total())
    }
}

/// Resolves a looked-up cart, checking it belongs to `owner`.
fn owned_cart(cart: Option<Cart>, owner: OwnerId, missing: impl FnOnce() -> String) -> Result<Cart> {
    let cart = cart.ok_or_else(|| CommerceError::NotFound { entity: "cart", id: missing() })?;
    if cart.owner_id() != owner {
        tracing::info!(cart_id = %cart.id(), %owner, "cart access by non-owner refused");
        return Err(CommerceError::Forbidden(format!("cart {} belongs to another shopper", cart.id())));
    }
    Ok(cart)
}
