use axum::{
    async_trait,
    body::{Bytes, HttpBody},
    extract::{FromRequest, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    BoxError, Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;
use crate::services::PaymentCallback;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Gateway callback body whose `X-Signature` header carries a valid
/// hex HMAC-SHA256 of the raw bytes.
pub struct VerifiedCallback {
    pub body: Bytes,
}

impl VerifiedCallback {
    pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> Result<(), AuthError> {
        let expected_signature = hex::decode(signature_header.trim())
            .map_err(|_| AuthError::InvalidSignatureFormat)?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AuthError::InvalidSecret)?;
        mac.update(body);

        mac.verify_slice(&expected_signature)
            .map_err(|_| AuthError::SignatureMismatch)
    }
}

#[async_trait]
impl<B> FromRequest<AppState, B> for VerifiedCallback
where
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Rejection = AuthError;

    async fn from_request(req: Request<B>, state: &AppState) -> Result<Self, Self::Rejection> {
        let secret = state
            .webhook_secret
            .clone()
            .ok_or(AuthError::NotConfigured)?;
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or(AuthError::MissingSignature)?;

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| AuthError::BodyReadError)?;

        Self::verify_signature(&secret, &body, &signature)?;

        Ok(VerifiedCallback { body })
    }
}

#[derive(Debug)]
pub enum AuthError {
    NotConfigured,
    MissingSignature,
    InvalidSignatureFormat,
    InvalidSecret,
    SignatureMismatch,
    BodyReadError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::NotConfigured => {
                (StatusCode::SERVICE_UNAVAILABLE, "Payment callbacks are not configured")
            }
            AuthError::MissingSignature => (StatusCode::UNAUTHORIZED, "Missing X-Signature header"),
            AuthError::InvalidSignatureFormat => {
                (StatusCode::UNAUTHORIZED, "Invalid signature format")
            }
            AuthError::InvalidSecret => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid webhook secret configuration")
            }
            AuthError::SignatureMismatch => {
                (StatusCode::UNAUTHORIZED, "Signature verification failed")
            }
            AuthError::BodyReadError => (StatusCode::BAD_REQUEST, "Failed to read request body"),
        };

        tracing::warn!("Payment callback authentication failed: {:?}", self);
        (status, message).into_response()
    }
}

pub async fn callback(
    State(state): State<AppState>,
    verified: VerifiedCallback,
) -> Result<impl IntoResponse, AppError> {
    let callback: PaymentCallback = serde_json::from_slice(&verified.body)
        .map_err(|e| AppError::InvalidInput(format!("malformed payment callback: {}", e)))?;
    let outcome = state.services.payments.handle_callback(callback).await?;
    Ok(Json(outcome))
}
