pub mod adapters;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod validation;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::health::{DependencyChecker, StoreChecker};
use crate::ports::Store;
use crate::services::Services;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub health_checkers: Arc<Vec<Arc<dyn DependencyChecker>>>,
    pub webhook_secret: Option<String>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(services: Services, store: Arc<dyn Store>, webhook_secret: Option<String>) -> Self {
        let checkers: Vec<Arc<dyn DependencyChecker>> = vec![Arc::new(StoreChecker::new(store))];
        Self {
            services,
            health_checkers: Arc::new(checkers),
            webhook_secret,
            started_at: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id/cancel/buyer", post(handlers::orders::cancel_by_buyer))
        .route("/orders/:id/cancel/seller", post(handlers::orders::cancel_by_seller))
        .route("/orders/:id/escrow", get(handlers::orders::escrow_status))
        .route("/orders/:id/secrets", get(handlers::orders::reveal_secrets))
        .route("/order-items/:id/confirm", post(handlers::orders::confirm_delivery))
        .route("/order-items/:id/dispute", post(handlers::orders::open_dispute))
        .route("/wallet", get(handlers::wallet::get_wallet))
        .route("/wallet/transactions", get(handlers::wallet::list_transactions))
        .route("/inventory", post(handlers::inventory::add_inventory))
        .route("/inventory/:id", delete(handlers::inventory::remove_inventory))
        .route("/shops/:id/inventory", get(handlers::inventory::list_shop_inventory))
        .route("/products/:id/stock", get(handlers::inventory::product_stock))
        .route("/payments/callback", post(handlers::payments::callback))
        .layer(axum::middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
