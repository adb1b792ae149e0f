mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::Market;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;
use vaultmart_core::domain::PaymentMethod;
use vaultmart_core::{create_app, AppState};

type HmacSha256 = Hmac<Sha256>;

const WEBHOOK_SECRET: &str = "whsec_test";

fn app(market: &Market, webhook_secret: Option<&str>) -> Router {
    create_app(AppState::new(
        market.services.clone(),
        Arc::new(market.store.clone()),
        webhook_secret.map(str::to_owned),
    ))
}

fn sign(body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, user: Option<Uuid>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_health_reports_store() {
    let market = Market::new();
    let response = app(&market, None)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = read_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["store"]["status"], "healthy");
}

#[tokio::test]
async fn test_create_order_over_http() {
    let market = Market::new();
    let listing = market.listing(40_000, 2).await;
    let buyer = Uuid::new_v4();
    market.fund(buyer, 50_000).await;

    let body = json!({
        "items": [{ "product_id": listing.product.id, "quantity": 1 }],
        "payment_method": "wallet",
        "idempotency_key": "web-checkout-1"
    });
    let response = app(&market, None)
        .oneshot(json_request("POST", "/orders", Some(buyer), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = read_json(response).await;
    assert_eq!(created["order"]["status"], "paid");
    assert_eq!(created["order"]["total_amount"], 40_000);
    assert_eq!(created["items"].as_array().unwrap().len(), 1);

    // Same key replays with 200
    let response = app(&market, None)
        .oneshot(json_request("POST", "/orders", Some(buyer), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let replayed = read_json(response).await;
    assert_eq!(replayed["order"]["id"], created["order"]["id"]);
}

#[tokio::test]
async fn test_order_errors_map_to_status_codes() {
    let market = Market::new();
    let listing = market.listing(40_000, 1).await;
    let buyer = Uuid::new_v4();
    let body = json!({
        "items": [{ "product_id": listing.product.id, "quantity": 1 }],
        "payment_method": "wallet"
    });

    let response = app(&market, None)
        .oneshot(json_request("POST", "/orders", None, &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app(&market, None)
        .oneshot(json_request("POST", "/orders", Some(buyer), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let empty = json!({ "items": [], "payment_method": "wallet" });
    let response = app(&market, None)
        .oneshot(json_request("POST", "/orders", Some(buyer), &empty))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wallet_endpoint() {
    let market = Market::new();
    let user = Uuid::new_v4();
    market.fund(user, 25_000).await;

    let response = app(&market, None)
        .oneshot(
            Request::get("/wallet")
                .header("x-user-id", user.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wallet = read_json(response).await;
    assert_eq!(wallet["balance"], 25_000);
    assert_eq!(wallet["hold_balance"], 0);
}

#[tokio::test]
async fn test_payment_callback_requires_signature() {
    let market = Market::new();
    let body = json!({
        "type": "wallet_topup",
        "user_id": Uuid::new_v4(),
        "provider": "momo",
        "external_txn_id": "MOMO-1",
        "amount": 10_000
    })
    .to_string();

    let response = app(&market, None)
        .oneshot(
            Request::post("/payments/callback")
                .header("x-signature", sign(body.as_bytes()))
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app(&market, Some(WEBHOOK_SECRET))
        .oneshot(
            Request::post("/payments/callback")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(&market, Some(WEBHOOK_SECRET))
        .oneshot(
            Request::post("/payments/callback")
                .header("x-signature", "00".repeat(32))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_callback_settles_gateway_order() {
    let market = Market::new();
    let listing = market.listing(40_000, 1).await;
    let buyer = Uuid::new_v4();
    let created = market
        .buy(buyer, &[(listing.product.id, 1)], PaymentMethod::Vnpay)
        .await
        .unwrap();

    let body = json!({
        "type": "order_payment",
        "order_code": created.order.code,
        "provider": "vnpay",
        "external_txn_id": "VNP-20260501-77",
        "amount": 40_000
    })
    .to_string();
    let signature = sign(body.as_bytes());

    let response = app(&market, Some(WEBHOOK_SECRET))
        .oneshot(
            Request::post("/payments/callback")
                .header("x-signature", signature.clone())
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = read_json(response).await;
    assert_eq!(outcome["type"], "order_payment");
    assert_eq!(outcome["order"]["status"], "paid");
    assert_eq!(outcome["duplicate"], false);
    assert_eq!(outcome["credited_to_wallet"], false);

    // Gateway retry
    let response = app(&market, Some(WEBHOOK_SECRET))
        .oneshot(
            Request::post("/payments/callback")
                .header("x-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["duplicate"], true);

    let wallet = market.wallet(buyer).await.unwrap();
    assert_eq!(wallet.balance, 0);
    assert_eq!(wallet.hold_balance, 40_000);
}
