//! Invoice handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::InvoiceResponse, middleware::CashierContext, services::billing::CreateInvoiceOutcome,
    AppState,
};

/// Raise the invoice for a visit. A visit that is already invoiced answers
/// 409 with the existing invoice.
pub async fn create_invoice_from_visit(
    State(state): State<AppState>,
    ctx: CashierContext,
    Path(visit_id): Path<Uuid>,
) -> Result<(StatusCode, Json<InvoiceResponse>), AppError> {
    tracing::info!(visit_id = %visit_id, user_id = %ctx.user_id, "Creating invoice from visit");

    match state.engine.create_invoice_from_visit(visit_id, &ctx).await? {
        CreateInvoiceOutcome::Created(aggregate) => {
            Ok((StatusCode::CREATED, Json(InvoiceResponse::from(aggregate))))
        }
        CreateInvoiceOutcome::AlreadyInvoiced(aggregate) => {
            Ok((StatusCode::CONFLICT, Json(InvoiceResponse::from(aggregate))))
        }
    }
}

pub async fn get_invoice(
    State(state): State<AppState>,
    _ctx: CashierContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    let aggregate = state.engine.get_invoice(invoice_id).await?;
    Ok(Json(InvoiceResponse::from(aggregate)))
}

pub async fn cancel_invoice(
    State(state): State<AppState>,
    ctx: CashierContext,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    tracing::info!(invoice_id = %invoice_id, user_id = %ctx.user_id, "Cancelling invoice");

    let aggregate = state.engine.cancel_invoice(invoice_id, &ctx).await?;
    Ok(Json(InvoiceResponse::from(aggregate)))
}
