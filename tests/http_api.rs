use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use storefront_checkout::api::{router, AppState, ADMIN_HEADER, OWNER_HEADER};
use storefront_checkout::notifier::NoopNotifier;
use storefront_checkout::store::MemoryStore;
use storefront_checkout::{AdminId, Availability, Money, OwnerId, Product, ProductId};
use tower::ServiceExt;

enum As { Nobody, Owner(OwnerId), Admin(AdminId) }

async fn call(app: &Router, method: Method, uri: &str, who: As, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    req = match who {
        As::Nobody => req,
        As::Owner(id) => req.header(OWNER_HEADER, id.to_string()),
        As::Admin(id) => req.header(ADMIN_HEADER, id.to_string()),
    };
    let req = match body {
        Some(b) => req.header("content-type", "application/json").body(Body::from(b.to_string())).unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn shop_with(products: &[(&str, i64, u32)]) -> (Router, MemoryStore, Vec<ProductId>) {
    let store = MemoryStore::new();
    let mut ids = Vec::new();
    for &(name, cents, stock) in products {
        let product = Product::create(name, Money::from_cents(cents), stock);
        ids.push(product.id());
        store.insert_product(product).await;
    }
    let app = router(AppState::new(Arc::new(store.clone()), Arc::new(NoopNotifier)));
    (app, store, ids)
}

fn checkout_body() -> Value { json!({"shipping_address": "7 Marina Street, Lagos Island", "payment_method": "bank_transfer"}) }

#[tokio::test]
async fn health_check() {
    let (app, _, _) = shop_with(&[]).await;
    let (status, body) = call(&app, Method::GET, "/health", As::Nobody, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn cart_requires_owner_header() {
    let (app, _, _) = shop_with(&[]).await;
    let (status, body) = call(&app, Method::GET, "/api/v1/cart", As::Nobody, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn shopper_checks_out_and_admin_cancels() {
    let (app, store, ids) = shop_with(&[("Kettle", 1000, 5), ("Teapot", 500, 1)]).await;
    let owner = OwnerId::generate();

    let (status, _) = call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[0], "quantity": 2}))).await;
    assert_eq!(status, StatusCode::CREATED);
    call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[1], "quantity": 1}))).await;

    let (status, cart) = call(&app, Method::GET, "/api/v1/cart", As::Owner(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["total"], "25.00");
    assert_eq!(cart["items"].as_array().unwrap().len(), 2);

    let (status, receipt) = call(&app, Method::POST, "/api/v1/checkout", As::Owner(owner), Some(checkout_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["total"], "25.00");
    assert_eq!(receipt["status"], "pending");
    assert_eq!(receipt["payment_method"], "bank_transfer");
    assert_eq!(store.product(ids[1]).await.unwrap().availability(), Availability::Unavailable);

    let order_id = receipt["order_id"].as_str().unwrap().to_owned();
    let (status, orders) = call(&app, Method::GET, "/api/v1/orders", As::Owner(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders[0]["id"], order_id.as_str());

    let uri = format!("/api/v1/admin/orders/{order_id}/status");
    let (status, order) = call(&app, Method::PUT, &uri, As::Admin(AdminId::generate()), Some(json!({"status": "cancelled"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "cancelled");
    assert_eq!(store.product(ids[0]).await.unwrap().stock(), 5);
    assert_eq!(store.product(ids[1]).await.unwrap().stock(), 1);
}

#[tokio::test]
async fn error_responses_map_to_status_codes() {
    let (app, _, ids) = shop_with(&[("Kettle", 1000, 1)]).await;
    let owner = OwnerId::generate();

    let (status, body) = call(&app, Method::POST, "/api/v1/checkout", As::Owner(owner), Some(checkout_body())).await;
    assert_eq!((status, body["error"].as_str()), (StatusCode::BAD_REQUEST, Some("empty_cart")));

    let (status, body) = call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[0], "quantity": 0}))).await;
    assert_eq!((status, body["error"].as_str()), (StatusCode::BAD_REQUEST, Some("validation_failed")));

    let (status, body) = call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[0], "quantity": 3}))).await;
    assert_eq!((status, body["error"].as_str()), (StatusCode::CONFLICT, Some("insufficient_stock")));

    let (status, body) = call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ProductId::generate(), "quantity": 1}))).await;
    assert_eq!((status, body["error"].as_str()), (StatusCode::NOT_FOUND, Some("not_found")));

    call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[0], "quantity": 1}))).await;
    let bad_payment = json!({"shipping_address": "7 Marina Street, Lagos Island", "payment_method": "barter"});
    let (status, body) = call(&app, Method::POST, "/api/v1/checkout", As::Owner(owner), Some(bad_payment)).await;
    assert_eq!((status, body["error"].as_str()), (StatusCode::BAD_REQUEST, Some("validation_failed")));

    let (_, receipt) = call(&app, Method::POST, "/api/v1/checkout", As::Owner(owner), Some(checkout_body())).await;
    let order_uri = format!("/api/v1/orders/{}", receipt["order_id"].as_str().unwrap());

    let (status, _) = call(&app, Method::GET, &order_uri, As::Owner(OwnerId::generate()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, Method::GET, &order_uri, As::Admin(AdminId::generate()), None).await;
    assert_eq!(status, StatusCode::OK);

    let status_uri = format!("{order_uri}/status").replace("/api/v1/orders", "/api/v1/admin/orders");
    let (status, body) = call(&app, Method::PUT, &status_uri, As::Admin(AdminId::generate()), Some(json!({"status": "shipped"}))).await;
    assert_eq!((status, body["error"].as_str()), (StatusCode::CONFLICT, Some("invalid_transition")));

    let (status, _) = call(&app, Method::PUT, &status_uri, As::Owner(owner), Some(json!({"status": "paid"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_lists_orders_by_status() {
    let (app, _, ids) = shop_with(&[("Kettle", 1000, 10)]).await;
    let mut placed = Vec::new();
    for _ in 0..3 {
        let owner = OwnerId::generate();
        call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[0], "quantity": 1}))).await;
        let (_, receipt) = call(&app, Method::POST, "/api/v1/checkout", As::Owner(owner), Some(checkout_body())).await;
        placed.push(receipt["order_id"].as_str().unwrap().to_owned());
    }
    let admin = AdminId::generate();
    let cancel_uri = format!("/api/v1/admin/orders/{}/status", placed[1]);
    call(&app, Method::PUT, &cancel_uri, As::Admin(admin), Some(json!({"status": "cancelled"}))).await;

    let (status, all) = call(&app, Method::GET, "/api/v1/admin/orders", As::Admin(admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<&str> = all.as_array().unwrap().iter().map(|o| o["id"].as_str().unwrap()).collect();
    assert_eq!(listed, [placed[2].as_str(), placed[1].as_str(), placed[0].as_str()]);

    let (_, cancelled) = call(&app, Method::GET, "/api/v1/admin/orders?status=cancelled", As::Admin(admin), None).await;
    assert_eq!(cancelled.as_array().unwrap().len(), 1);
    assert_eq!(cancelled[0]["id"], placed[1].as_str());

    let (_, pending) = call(&app, Method::GET, "/api/v1/admin/orders?status=pending", As::Admin(admin), None).await;
    assert_eq!(pending.as_array().unwrap().len(), 2);

    let (status, body) = call(&app, Method::GET, "/api/v1/admin/orders?status=lost", As::Admin(admin), None).await;
    assert_eq!((status, body["error"].as_str()), (StatusCode::BAD_REQUEST, Some("validation_failed")));

    let (status, _) = call(&app, Method::GET, "/api/v1/admin/orders", As::Owner(OwnerId::generate()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn adding_the_same_product_again_merges_with_ok() {
    let (app, _, ids) = shop_with(&[("Kettle", 1000, 10)]).await;
    let owner = OwnerId::generate();

    let (status, first) = call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[0], "quantity": 1}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, merged) = call(&app, Method::POST, "/api/v1/cart/items", As::Owner(owner), Some(json!({"product_id": ids[0], "quantity": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(merged["id"], first["id"]);
    assert_eq!(merged["quantity"], 3);
}
