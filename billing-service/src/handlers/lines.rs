//! Invoice line handlers. Every change recalculates the owning invoice.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateLineRequest, UpdateLineRequest},
    middleware::CashierContext,
    models::{InvoiceLine, UpdateLine},
    services::billing::LineInput,
    AppState,
};

pub async fn add_line(
    State(state): State<AppState>,
    ctx: CashierContext,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<CreateLineRequest>,
) -> Result<(StatusCode, Json<InvoiceLine>), AppError> {
    payload.validate()?;

    tracing::info!(
        invoice_id = %invoice_id,
        user_id = %ctx.user_id,
        tariff_id = ?payload.tariff_id,
        "Adding invoice line"
    );

    let line = state
        .engine
        .add_line(
            invoice_id,
            LineInput {
                designation: payload.designation,
                quantity: payload.quantity,
                unit_price: payload.unit_price,
                tariff_id: payload.tariff_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(line)))
}

pub async fn update_line(
    State(state): State<AppState>,
    ctx: CashierContext,
    Path(line_id): Path<Uuid>,
    Json(payload): Json<UpdateLineRequest>,
) -> Result<Json<InvoiceLine>, AppError> {
    payload.validate()?;

    tracing::info!(line_id = %line_id, user_id = %ctx.user_id, "Updating invoice line");

    let line = state
        .engine
        .update_line(
            line_id,
            UpdateLine {
                designation: payload.designation,
                quantity: payload.quantity,
                unit_price: payload.unit_price,
            },
        )
        .await?;

    Ok(Json(line))
}

pub async fn delete_line(
    State(state): State<AppState>,
    ctx: CashierContext,
    Path(line_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    tracing::info!(line_id = %line_id, user_id = %ctx.user_id, "Deleting invoice line");

    state.engine.delete_line(line_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
