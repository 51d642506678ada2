//! Postgres store.
//!
//! Runs at the pool's default isolation (read committed). Stock and order
//! rows that are about to be checked and written are fetched `FOR UPDATE`,
//! so a second transaction touching the same row waits for the first to end
//! and then sees its committed stock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{RowLock, Store, StoreError, StoreResult, StoreTx};
use crate::domain::aggregates::{Cart, CartItem, Order, OrderItem, OrderStatus, Product};
use crate::domain::value_objects::{AdminId, CartId, CartItemId, Money, OrderId, OwnerId, ProductId, Quantity};

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx { tx: Transaction<'static, Postgres> }

fn lock_clause(lock: RowLock) -> &'static str {
    match lock { RowLock::None => "", RowLock::ForUpdate => " FOR UPDATE" }
}

fn corrupt(what: impl std::fmt::Display) -> StoreError { StoreError::DataCorruption(what.to_string()) }

fn quantity_from_row(v: i32) -> StoreResult<Quantity> {
    u32::try_from(v).ok().and_then(|v| Quantity::new(v).ok()).ok_or_else(|| corrupt(format!("bad quantity {v}")))
}

fn quantity_to_row(q: Quantity) -> StoreResult<i32> {
    i32::try_from(q.value()).map_err(|_| corrupt(format!("quantity {q} does not fit a column")))
}

#[derive(sqlx::FromRow)]
struct ProductRow { id: ProductId, name: String, price: Decimal, stock: i32, availability: String, updated_at: DateTime<Utc> }

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;
    fn try_from(r: ProductRow) -> StoreResult<Self> {
        Ok(Product {
            id: r.id, name: r.name, price: Money::new(r.price),
            stock: u32::try_from(r.stock).map_err(|_| corrupt(format!("negative stock on product {}", r.id)))?,
            availability: r.availability.parse().map_err(corrupt)?,
            updated_at: r.updated_at, events: vec![],
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow { id: CartId, owner_id: OwnerId, status: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct CartItemRow { id: CartItemId, cart_id: CartId, product_id: ProductId, quantity: i32, unit_price: Decimal }

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId, owner_id: OwnerId, total: Decimal, status: String, shipping_address: String, payment_method: String,
    last_changed_by: Option<AdminId>, status_changed_at: Option<DateTime<Utc>>, created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow { order_id: OrderId, product_id: ProductId, quantity: i32, unit_price: Decimal, line_subtotal: Decimal }

impl TryFrom<CartItemRow> for CartItem {
    type Error = StoreError;
    fn try_from(r: CartItemRow) -> StoreResult<Self> {
        Ok(CartItem { id: r.id, cart_id: r.cart_id, product_id: r.product_id, quantity: quantity_from_row(r.quantity)?, unit_price: Money::new(r.unit_price) })
    }
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;
    fn try_from(r: OrderItemRow) -> StoreResult<Self> {
        Ok(OrderItem {
            order_id: r.order_id, product_id: r.product_id, quantity: quantity_from_row(r.quantity)?,
            unit_price: Money::new(r.unit_price), line_subtotal: Money::new(r.line_subtotal),
        })
    }
}

const CART_COLUMNS: &str = "id, owner_id, status, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, owner_id, total, status, shipping_address, payment_method, last_changed_by, status_changed_at, created_at";
const ORDER_ITEM_COLUMNS: &str = "order_id, product_id, quantity, unit_price, line_subtotal";

impl PgTx {
    async fn hydrate_cart(&mut self, row: Option<CartRow>) -> StoreResult<Option<Cart>> {
        let Some(row) = row else { return Ok(None) };
        let items = sqlx::query_as::<_, CartItemRow>("SELECT id, cart_id, product_id, quantity, unit_price FROM cart_items WHERE cart_id = $1 ORDER BY id")
            .bind(row.id).fetch_all(&mut *self.tx).await?
            .into_iter().map(CartItem::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok(Some(Cart {
            id: row.id, owner_id: row.owner_id, status: row.status.parse().map_err(corrupt)?,
            items, created_at: row.created_at, updated_at: row.updated_at,
        }))
    }

    /// Loads the lines of every order in `rows` with one query, keeping row order.
    async fn with_items(&mut self, rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id.as_uuid()).collect();
        let mut items = sqlx::query_as::<_, OrderItemRow>(&format!("SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position"))
            .bind(ids).fetch_all(&mut *self.tx).await?;
        rows.into_iter().map(|row| {
            let (mine, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut items).into_iter().partition(|i| i.order_id == row.id);
            items = rest;
            let mine = mine.into_iter().map(OrderItem::try_from).collect::<StoreResult<Vec<_>>>()?;
            Self::order_from_row(row, mine)
        }).collect()
    }

    fn order_from_row(row: OrderRow, items: Vec<OrderItem>) -> StoreResult<Order> {
        Ok(Order {
            id: row.id, owner_id: row.owner_id, total: Money::new(row.total), status: row.status.parse().map_err(corrupt)?,
            shipping_address: row.shipping_address, payment_method: row.payment_method.parse().map_err(corrupt)?,
            last_changed_by: row.last_changed_by, status_changed_at: row.status_changed_at, created_at: row.created_at,
            items, events: vec![],
        })
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_product(&mut self, id: ProductId, lock: RowLock) -> StoreResult<Option<Product>> {
        let sql = format!("SELECT id, name, price, stock, availability, updated_at FROM products WHERE id = $1{}", lock_clause(lock));
        sqlx::query_as::<_, ProductRow>(&sql).bind(id).fetch_optional(&mut *self.tx).await?
            .map(Product::try_from).transpose()
    }

    async fn update_product_stock(&mut self, product: &Product) -> StoreResult<()> {
        let stock = i32::try_from(product.stock).map_err(|_| corrupt(format!("stock overflow on product {}", product.id)))?;
        let done = sqlx::query("UPDATE products SET stock = $2, availability = $3, updated_at = $4 WHERE id = $1")
            .bind(product.id).bind(stock).bind(product.availability.as_str()).bind(product.updated_at)
            .execute(&mut *self.tx).await?;
        if done.rows_affected() != 1 { return Err(corrupt(format!("product {} vanished mid-transaction", product.id))); }
        Ok(())
    }

    async fn get_or_create_active_cart(&mut self, owner: OwnerId) -> StoreResult<Cart> {
        let fresh = Cart::open(owner);
        sqlx::query("INSERT INTO carts (id, owner_id, status, created_at, updated_at) VALUES ($1, $2, 'active', $3, $3) ON CONFLICT (owner_id) WHERE status = 'active' DO NOTHING")
            .bind(fresh.id).bind(owner).bind(fresh.created_at)
            .execute(&mut *self.tx).await?;
        self.find_active_cart(owner, RowLock::None).await?
            .ok_or_else(|| corrupt(format!("active cart for {owner} missing after upsert")))
    }

    async fn find_active_cart(&mut self, owner: OwnerId, lock: RowLock) -> StoreResult<Option<Cart>> {
        let sql = format!("SELECT {CART_COLUMNS} FROM carts WHERE owner_id = $1 AND status = 'active'{}", lock_clause(lock));
        let row = sqlx::query_as::<_, CartRow>(&sql).bind(owner).fetch_optional(&mut *self.tx).await?;
        self.hydrate_cart(row).await
    }

    async fn find_cart(&mut self, id: CartId, lock: RowLock) -> StoreResult<Option<Cart>> {
        let sql = format!("SELECT {CART_COLUMNS} FROM carts WHERE id = $1{}", lock_clause(lock));
        let row = sqlx::query_as::<_, CartRow>(&sql).bind(id).fetch_optional(&mut *self.tx).await?;
        self.hydrate_cart(row).await
    }

    async fn find_cart_by_item(&mut self, item: CartItemId, lock: RowLock) -> StoreResult<Option<Cart>> {
        let sql = format!("SELECT {CART_COLUMNS} FROM carts WHERE id = (SELECT cart_id FROM cart_items WHERE id = $1){}", lock_clause(lock));
        let row = sqlx::query_as::<_, CartRow>(&sql).bind(item).fetch_optional(&mut *self.tx).await?;
        self.hydrate_cart(row).await
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        sqlx::query("INSERT INTO cart_items (id, cart_id, product_id, quantity, unit_price) VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO UPDATE SET quantity = EXCLUDED.quantity, unit_price = EXCLUDED.unit_price")
            .bind(item.id).bind(item.cart_id).bind(item.product_id).bind(quantity_to_row(item.quantity)?).bind(item.unit_price.amount())
            .execute(&mut *self.tx).await?;
        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1").bind(item.cart_id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: CartItemId) -> StoreResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1").bind(id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn retire_cart(&mut self, cart: &Cart) -> StoreResult<()> {
        sqlx::query("UPDATE carts SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(cart.id).bind(cart.status.as_str()).bind(cart.updated_at)
            .execute(&mut *self.tx).await?;
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart.id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query("INSERT INTO orders (id, owner_id, total, status, shipping_address, payment_method, last_changed_by, status_changed_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
            .bind(order.id).bind(order.owner_id).bind(order.total.amount()).bind(order.status.as_str())
            .bind(&order.shipping_address).bind(order.payment_method.as_str())
            .bind(order.last_changed_by).bind(order.status_changed_at).bind(order.created_at)
            .execute(&mut *self.tx).await?;
        for (position, item) in order.items.iter().enumerate() {
            let position = i32::try_from(position).map_err(|_| corrupt("too many order lines"))?;
            sqlx::query("INSERT INTO order_items (order_id, position, product_id, quantity, unit_price, line_subtotal) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(order.id).bind(position).bind(item.product_id).bind(quantity_to_row(item.quantity)?)
                .bind(item.unit_price.amount()).bind(item.line_subtotal.amount())
                .execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn find_order(&mut self, id: OrderId, lock: RowLock) -> StoreResult<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1{}", lock_clause(lock));
        let Some(row) = sqlx::query_as::<_, OrderRow>(&sql).bind(id).fetch_optional(&mut *self.tx).await? else { return Ok(None) };
        let items = sqlx::query_as::<_, OrderItemRow>(&format!("SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY position"))
            .bind(id).fetch_all(&mut *self.tx).await?
            .into_iter().map(OrderItem::try_from).collect::<StoreResult<Vec<_>>>()?;
        Self::order_from_row(row, items).map(Some)
    }

    async fn orders_for_owner(&mut self, owner: OwnerId) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE owner_id = $1 ORDER BY created_at DESC, id DESC"))
            .bind(owner).fetch_all(&mut *self.tx).await?;
        self.with_items(rows).await
    }

    async fn list_orders(&mut self, status: Option<OrderStatus>) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC, id DESC"))
            .bind(status.map(|s| s.as_str())).fetch_all(&mut *self.tx).await?;
        self.with_items(rows).await
    }

    async fn update_order_status(&mut self, order: &Order) -> StoreResult<()> {
        let done = sqlx::query("UPDATE orders SET status = $2, last_changed_by = $3, status_changed_at = $4 WHERE id = $1")
            .bind(order.id).bind(order.status.as_str()).bind(order.last_changed_by).bind(order.status_changed_at)
            .execute(&mut *self.tx).await?;
        if done.rows_affected() != 1 { return Err(corrupt(format!("order {} vanished mid-transaction", order.id))); }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
