//! Cashier context extracted from gateway headers.
//!
//! The gateway authenticates the user and forwards identity and workstation
//! as headers. Handlers pass the resulting `CashierContext` into every engine
//! operation.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const WORKSTATION_HEADER: &str = "X-Workstation";
pub const CASH_SESSION_HEADER: &str = "X-Cash-Session-ID";

/// Acting cashier and where the request comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashierContext {
    pub user_id: Uuid,
    pub workstation: Option<String>,
    /// Session already attached to the caller, if the client sent one.
    pub session_id: Option<Uuid>,
    pub client_ip: Option<String>,
}

impl CashierContext {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user_id = header_str(headers, USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header")))?;
        let user_id = Uuid::parse_str(user_id).map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("X-User-ID must be a UUID"))
        })?;

        let session_id = header_str(headers, CASH_SESSION_HEADER)
            .map(|raw| {
                Uuid::parse_str(raw).map_err(|_| {
                    AppError::BadRequest(anyhow::anyhow!("X-Cash-Session-ID must be a UUID"))
                })
            })
            .transpose()?;

        Ok(Self {
            user_id,
            workstation: header_str(headers, WORKSTATION_HEADER).map(str::to_string),
            session_id,
            client_ip: client_ip(headers),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "X-Forwarded-For")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| header_str(headers, "X-Real-IP"))
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for CashierContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = CashierContext::from_headers(&parts.headers)?;

        let span = tracing::Span::current();
        span.record("user_id", tracing::field::display(context.user_id));

        Ok(context)
    }
}
