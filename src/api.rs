//! JSON endpoints over the cart, checkout and order services.
//!
//! Identity is resolved upstream; requests arrive with the caller's opaque id
//! in `x-owner-id` (shoppers) or `x-admin-id` (administrators).

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{Cart, CartItem, Order, OrderItem, OrderStatus};
use crate::domain::value_objects::{AdminId, CartItemId, Money, OrderId, OwnerId, PaymentMethod, ProductId, UnknownVariant};
use crate::notifier::Notifier;
use crate::services::{CartStore, CheckoutDetails, CheckoutEngine, OrderLifecycle, OrderQueries};
use crate::store::Store;
use crate::CommerceError;

pub const OWNER_HEADER: &str = "x-owner-id";
pub const ADMIN_HEADER: &str = "x-admin-id";

#[derive(Clone)]
pub struct AppState {
    pub carts: CartStore,
    pub checkout: Arc<CheckoutEngine>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub orders: OrderQueries,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            carts: CartStore::new(Arc::clone(&store)),
            checkout: Arc::new(CheckoutEngine::new(Arc::clone(&store), Arc::clone(&notifier))),
            lifecycle: Arc::new(OrderLifecycle::new(Arc::clone(&store), notifier)),
            orders: OrderQueries::new(store),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-checkout"})) }))
        .route("/api/v1/cart", get(get_cart))
        .route("/api/v1/cart/items", post(add_cart_item))
        .route("/api/v1/cart/items/:item_id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/admin/orders", get(list_all_orders))
        .route("/api/v1/admin/orders/:id/status", put(change_order_status))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

/// A `CommerceError` on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub CommerceError);

impl From<CommerceError> for ApiError {
    fn from(e: CommerceError) -> Self { Self(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CommerceError::ValidationFailed(_) | CommerceError::EmptyCart => StatusCode::BAD_REQUEST,
            CommerceError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CommerceError::Forbidden(_) => StatusCode::FORBIDDEN,
            CommerceError::NotFound { .. } => StatusCode::NOT_FOUND,
            CommerceError::InsufficientStock { .. } | CommerceError::ProductUnavailable(_) | CommerceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CommerceError::TransactionAborted(_) => StatusCode::SERVICE_UNAVAILABLE,
            CommerceError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Don't expose store details to clients
        let message = match &self.0 {
            CommerceError::TransactionAborted(e) => {
                tracing::error!(error = %e, "request aborted by store failure");
                "Temporarily unavailable, please retry".to_string()
            }
            CommerceError::InvariantViolation(e) => {
                tracing::error!(error = %e, "request hit a stock invariant violation");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(serde_json::json!({"error": self.0.code(), "message": message}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Caller identity
// =============================================================================

fn header_id<T: FromStr>(parts: &Parts, name: &str) -> ApiResult<Option<T>> {
    let Some(raw) = parts.headers.get(name) else { return Ok(None) };
    raw.to_str().ok().and_then(|s| s.parse().ok()).map(Some).ok_or(ApiError(CommerceError::Unauthenticated))
}

/// An authenticated shopper.
pub struct Shopper(pub OwnerId);

/// An authenticated administrator.
pub struct Admin(pub AdminId);

/// Either kind of caller. Admin wins when both headers are present.
pub enum Caller { Shopper(OwnerId), Admin(AdminId) }

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Shopper {
    type Rejection = ApiError;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        header_id(parts, OWNER_HEADER)?.map(Shopper).ok_or(ApiError(CommerceError::Unauthenticated))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Admin {
    type Rejection = ApiError;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        header_id(parts, ADMIN_HEADER)?.map(Admin).ok_or(ApiError(CommerceError::Unauthenticated))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> ApiResult<Self> {
        if let Some(admin) = header_id(parts, ADMIN_HEADER)? {
            return Ok(Caller::Admin(admin));
        }
        header_id(parts, OWNER_HEADER)?.map(Caller::Shopper).ok_or(ApiError(CommerceError::Unauthenticated))
    }
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub total: Money,
}

#[derive(Debug, Deserialize)] pub struct AddItemRequest { pub product_id: ProductId, pub quantity: i64 }
#[derive(Debug, Deserialize)] pub struct QuantityRequest { pub quantity: i64 }
#[derive(Debug, Deserialize)] pub struct StatusRequest { pub status: String }
#[derive(Debug, Deserialize)] pub struct OrderFilter { pub status: Option<String> }

/// Receipt returned by checkout.
#[derive(Debug, Serialize)]
pub struct OrderConfirmation {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub shipping_address: String,
    pub items: Vec<OrderItem>,
}

impl From<Order> for OrderConfirmation {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id(), status: order.status(), total: order.total(), payment_method: order.payment_method(),
            shipping_address: order.shipping_address().to_owned(), items: order.items().to_vec(),
        }
    }
}

fn parse_status(raw: &str) -> ApiResult<OrderStatus> {
    raw.parse().map_err(|e: UnknownVariant| ApiError(CommerceError::ValidationFailed(format!("status: {e}"))))
}

fn requested_quantity(q: i64) -> ApiResult<u32> {
    u32::try_from(q).map_err(|_| ApiError(CommerceError::ValidationFailed(format!("quantity {q} is out of range"))))
}

// =============================================================================
// Handlers
// =============================================================================

async fn get_cart(State(s): State<AppState>, Shopper(owner): Shopper) -> ApiResult<Json<CartView>> {
    let cart = s.carts.get_or_create_active_cart(owner).await?;
    let total = s.carts.compute_total(cart.id()).await?;
    Ok(Json(CartView { cart, total }))
}

async fn add_cart_item(State(s): State<AppState>, Shopper(owner): Shopper, Json(r): Json<AddItemRequest>) -> ApiResult<(StatusCode, Json<CartItem>)> {
    let quantity = requested_quantity(r.quantity)?;
    let cart = s.carts.get_or_create_active_cart(owner).await?;
    let merged = cart.items().iter().any(|i| i.product_id == r.product_id);
    let item = s.carts.add_item(owner, cart.id(), r.product_id, quantity).await?;
    let status = if merged { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(item)))
}

async fn update_cart_item(State(s): State<AppState>, Shopper(owner): Shopper, Path(item_id): Path<CartItemId>, Json(r): Json<QuantityRequest>) -> ApiResult<Json<CartItem>> {
    let item = s.carts.update_item_quantity(owner, item_id, requested_quantity(r.quantity)?).await?;
    Ok(Json(item))
}

async fn remove_cart_item(State(s): State<AppState>, Shopper(owner): Shopper, Path(item_id): Path<CartItemId>) -> ApiResult<StatusCode> {
    s.carts.remove_item(owner, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn checkout(State(s): State<AppState>, Shopper(owner): Shopper, Json(details): Json<CheckoutDetails>) -> ApiResult<(StatusCode, Json<OrderConfirmation>)> {
    let order = s.checkout.checkout(owner, details).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

async fn list_orders(State(s): State<AppState>, Shopper(owner): Shopper) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.orders.orders_for_owner(owner).await?))
}

async fn get_order(State(s): State<AppState>, caller: Caller, Path(id): Path<OrderId>) -> ApiResult<Json<Order>> {
    let order = s.orders.get_order(id).await?;
    if let Caller::Shopper(owner) = caller {
        if order.owner_id() != owner {
            return Err(ApiError(CommerceError::Forbidden(format!("order {id} belongs to another shopper"))));
        }
    }
    Ok(Json(order))
}

async fn list_all_orders(State(s): State<AppState>, Admin(_): Admin, Query(f): Query<OrderFilter>) -> ApiResult<Json<Vec<Order>>> {
    let status = f.status.as_deref().map(parse_status).transpose()?;
    Ok(Json(s.orders.list_orders(status).await?))
}

async fn change_order_status(State(s): State<AppState>, Admin(admin): Admin, Path(id): Path<OrderId>, Json(r): Json<StatusRequest>) -> ApiResult<Json<Order>> {
    let status = parse_status(&r.status)?;
    Ok(Json(s.lifecycle.change_status(id, status, admin).await?))
}
