use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::identity::CallerId;
use crate::domain::PaymentMethod;
use crate::error::AppError;
use crate::services::{CartLine, CreateOrderRequest};
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub items: Vec<CartLine>,
    pub payment_method: PaymentMethod,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: String,
}

pub async fn create_order(
    State(state): State<AppState>,
    CallerId(buyer_id): CallerId,
    headers: HeaderMap,
    Json(body): Json<CreateOrderBody>,
) -> Result<impl IntoResponse, AppError> {
    let idempotency_key = body.idempotency_key.or_else(|| {
        headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    });

    let created = state
        .services
        .orders
        .create_order(CreateOrderRequest {
            buyer_id,
            items: body.items,
            payment_method: body.payment_method,
            idempotency_key,
        })
        .await?;

    let status = if created.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(created)))
}

pub async fn cancel_by_buyer(
    State(state): State<AppState>,
    CallerId(buyer_id): CallerId,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .services
        .orders
        .cancel_order_by_buyer(order_id, buyer_id, &body.reason)
        .await?;
    Ok(Json(outcome))
}

pub async fn cancel_by_seller(
    State(state): State<AppState>,
    CallerId(seller_id): CallerId,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .services
        .orders
        .cancel_order_by_seller(order_id, seller_id, &body.reason)
        .await?;
    Ok(Json(outcome))
}

pub async fn escrow_status(
    State(state): State<AppState>,
    CallerId(caller_id): CallerId,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = state
        .services
        .escrow
        .get_escrow_status(order_id, caller_id)
        .await?;
    Ok(Json(status))
}

pub async fn reveal_secrets(
    State(state): State<AppState>,
    CallerId(buyer_id): CallerId,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let secrets = state
        .services
        .escrow
        .reveal_secrets(order_id, buyer_id)
        .await?;
    Ok(Json(secrets))
}

pub async fn confirm_delivery(
    State(state): State<AppState>,
    CallerId(buyer_id): CallerId,
    Path(order_item_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let item = state
        .services
        .escrow
        .confirm_delivery(order_item_id, buyer_id)
        .await?;
    Ok(Json(item))
}

pub async fn open_dispute(
    State(state): State<AppState>,
    CallerId(buyer_id): CallerId,
    Path(order_item_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let item = state
        .services
        .escrow
        .open_dispute(order_item_id, buyer_id)
        .await?;
    Ok(Json(item))
}
