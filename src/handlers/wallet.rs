use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::identity::CallerId;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_wallet(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> Result<impl IntoResponse, AppError> {
    let wallet = state.services.ledger.get_or_create_wallet(user_id).await?;
    Ok(Json(wallet))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, AppError> {
    let wallet = state.services.ledger.get_or_create_wallet(user_id).await?;
    let txs = state
        .services
        .ledger
        .history(wallet.id, params.limit, params.offset)
        .await?;
    Ok(Json(txs))
}
