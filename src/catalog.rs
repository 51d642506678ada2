//! Product catalog, as seen from inside a checkout or lifecycle transaction.
//!
//! Every stock mutation goes through [`ProductCatalog::adjust_stock`], which
//! locks the row first and keeps availability in step with stock.

use std::collections::BTreeMap;

use crate::domain::aggregates::Product;
use crate::domain::value_objects::ProductId;
use crate::store::{RowLock, StoreTx};
use crate::{CommerceError, Result};

pub struct ProductCatalog<'t> {
    tx: &'t mut dyn StoreTx,
}

impl<'t> ProductCatalog<'t> {
    pub fn new(tx: &'t mut dyn StoreTx) -> Self { Self { tx } }

    pub async fn find_by_id(&mut self, id: ProductId) -> Result<Product> {
        self.tx.find_product(id, RowLock::None).await?.ok_or_else(|| CommerceError::not_found("product", id))
    }

    /// Locks each product row until the transaction ends. Ids are locked in
    /// ascending order; missing products are simply absent from the result.
    pub async fn lock_all(&mut self, ids: impl IntoIterator<Item = ProductId>) -> Result<BTreeMap<ProductId, Product>> {
        let mut ids: Vec<ProductId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        let mut locked = BTreeMap::new();
        for id in ids {
            if let Some(product) = self.tx.find_product(id, RowLock::ForUpdate).await? {
                locked.insert(id, product);
            }
        }
        Ok(locked)
    }

    /// Applies a signed stock change and persists it, returning the updated
    /// product with any events it raised.
    pub async fn adjust_stock(&mut self, id: ProductId, delta: i64) -> Result<Product> {
        let mut product = self.tx.find_product(id, RowLock::ForUpdate).await?
            .ok_or_else(|| CommerceError::not_found("product", id))?;
        if let Err(e) = product.adjust_stock(delta) {
            tracing::error!(product_id = %id, delta, stock = product.stock(), error = %e, "stock invariant violated");
            return Err(CommerceError::InvariantViolation(e.to_string()));
        }
        self.tx.update_product_stock(&product).await?;
        Ok(product)
    }
}
