//! Payment handler.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::CreatePaymentRequest,
    middleware::CashierContext,
    services::billing::{PaymentInput, PaymentReply},
    AppState,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "idempotent-replayed";

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Idempotency-Key must be visible ASCII")))?
        .trim();
    if key.is_empty() || key.len() > 255 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Idempotency-Key must be between 1 and 255 characters"
        )));
    }
    Ok(Some(key.to_string()))
}

/// The body is sent as stored so replays are byte-identical.
fn into_response(reply: PaymentReply) -> Result<Response, AppError> {
    let status = StatusCode::from_u16(reply.status)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Invalid stored status: {}", e)))?;

    let mut response = (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        reply.body,
    )
        .into_response();

    if reply.replayed {
        response
            .headers_mut()
            .insert(IDEMPOTENT_REPLAYED_HEADER, HeaderValue::from_static("true"));
    }

    Ok(response)
}

pub async fn create_payment(
    State(state): State<AppState>,
    ctx: CashierContext,
    Path(invoice_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Response, AppError> {
    let payload = payload.trimmed();
    payload.validate()?;
    let idempotency_key = idempotency_key(&headers)?;

    tracing::info!(
        invoice_id = %invoice_id,
        user_id = %ctx.user_id,
        amount = %payload.amount,
        mode = %payload.mode,
        idempotent = idempotency_key.is_some(),
        "Creating payment"
    );

    let input = PaymentInput {
        amount: payload.amount,
        mode: payload.mode,
        reference: payload.reference,
        service_id: payload.service_id,
        idempotency_key,
    };

    let reply = state.engine.create_payment(invoice_id, input, &ctx).await?;

    into_response(reply)
}
