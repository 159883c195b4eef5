//! Cash session handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{AuditEventsResponse, CashSessionResponse, CloseSessionRequest, OpenSessionRequest},
    middleware::CashierContext,
    services::billing::SessionInput,
    AppState,
};

/// Open a session. The workstation comes from the body or the
/// `X-Workstation` header.
pub async fn open_session(
    State(state): State<AppState>,
    ctx: CashierContext,
    payload: Option<Json<OpenSessionRequest>>,
) -> Result<(StatusCode, Json<CashSessionResponse>), AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    payload.validate()?;

    tracing::info!(
        user_id = %ctx.user_id,
        workstation = ?payload.workstation.as_ref().or(ctx.workstation.as_ref()),
        "Opening cash session"
    );

    let session = state
        .engine
        .open_session(
            SessionInput {
                workstation: payload.workstation,
                service_id: payload.service_id,
                currency: payload.currency,
            },
            &ctx,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CashSessionResponse::from(session))))
}

pub async fn close_session(
    State(state): State<AppState>,
    ctx: CashierContext,
    Path(session_id): Path<Uuid>,
    payload: Option<Json<CloseSessionRequest>>,
) -> Result<Json<CashSessionResponse>, AppError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    payload.validate()?;

    tracing::info!(session_id = %session_id, user_id = %ctx.user_id, "Closing cash session");

    let session = state
        .engine
        .close_session(session_id, payload.note, &ctx)
        .await?;

    Ok(Json(CashSessionResponse::from(session)))
}

/// The open session payments from this caller would be booked on.
pub async fn current_session(
    State(state): State<AppState>,
    ctx: CashierContext,
) -> Result<Json<CashSessionResponse>, AppError> {
    let session = state.engine.current_session(&ctx).await?;
    Ok(Json(CashSessionResponse::from(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    _ctx: CashierContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CashSessionResponse>, AppError> {
    let session = state.engine.get_session(session_id).await?;
    Ok(Json(CashSessionResponse::from(session)))
}

pub async fn list_audit_events(
    State(state): State<AppState>,
    _ctx: CashierContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<AuditEventsResponse>, AppError> {
    let events = state.engine.list_session_audit_events(session_id).await?;
    Ok(Json(AuditEventsResponse { session_id, events }))
}
