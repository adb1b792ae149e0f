use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::CallerId;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AddInventoryBody {
    pub product_id: Uuid,
    pub secret_value: String,
}

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub product_id: Uuid,
    pub available: i64,
}

pub async fn add_inventory(
    State(state): State<AppState>,
    CallerId(seller_id): CallerId,
    Json(body): Json<AddInventoryBody>,
) -> Result<impl IntoResponse, AppError> {
    let item = state
        .services
        .inventory
        .add(seller_id, body.product_id, &body.secret_value)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn remove_inventory(
    State(state): State<AppState>,
    CallerId(seller_id): CallerId,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.services.inventory.remove(seller_id, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_shop_inventory(
    State(state): State<AppState>,
    CallerId(seller_id): CallerId,
    Path(shop_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let secrets = state
        .services
        .inventory
        .list_for_seller(seller_id, shop_id)
        .await?;
    Ok(Json(secrets))
}

pub async fn product_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let available = state.services.inventory.available_count(product_id).await?;
    Ok(Json(StockResponse {
        product_id,
        available,
    }))
}
