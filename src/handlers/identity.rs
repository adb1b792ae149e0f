use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::AppError;

/// Header set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, as asserted by the auth layer in front of us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Forbidden("missing caller identity".to_string()))?;
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::InvalidInput(format!("{} must be a UUID", USER_ID_HEADER)))?;
        Ok(CallerId(id))
    }
}
