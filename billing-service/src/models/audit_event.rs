//! Audit event model - cash session and payment forensics.

use super::{CashSession, Invoice, Payment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use uuid::Uuid;

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    SessionOpened,
    PaymentCreated,
    SessionClosed,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::SessionOpened => "SESSION_OPENED",
            AuditEventKind::PaymentCreated => "PAYMENT_CREATED",
            AuditEventKind::SessionClosed => "SESSION_CLOSED",
        }
    }
}

/// Stored audit event. Append-only.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_kind: String,
    pub session_id: Uuid,
    pub actor_user_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

/// Audit event about to be appended.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub event_id: Uuid,
    pub kind: AuditEventKind,
    pub session_id: Uuid,
    pub actor_user_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

impl NewAuditEvent {
    pub fn session_opened(session: &CashSession, client_ip: Option<&str>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: AuditEventKind::SessionOpened,
            session_id: session.session_id,
            actor_user_id: session.user_id,
            invoice_id: None,
            payment_id: None,
            payload: json!({
                "workstation": session.workstation,
                "service_id": session.service_id,
                "currency": session.currency,
                "ip": client_ip,
            }),
        }
    }

    pub fn payment_created(invoice: &Invoice, payment: &Payment, client_ip: Option<&str>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: AuditEventKind::PaymentCreated,
            session_id: payment.session_id,
            actor_user_id: payment.cashier_id,
            invoice_id: Some(invoice.invoice_id),
            payment_id: Some(payment.payment_id),
            payload: json!({
                "amount": payment.amount,
                "mode": payment.mode,
                "currency": payment.currency,
                "reference": payment.reference,
                "invoice_number": invoice.invoice_number,
                "invoice_id": invoice.invoice_id,
                "payment_id": payment.payment_id,
                "service_id": payment.service_id,
                "workstation": payment.workstation,
                "ip": client_ip,
            }),
        }
    }

    /// `session` is the closed row, so the payload carries the final aggregates.
    pub fn session_closed(session: &CashSession, actor_user_id: Uuid, client_ip: Option<&str>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind: AuditEventKind::SessionClosed,
            session_id: session.session_id,
            actor_user_id,
            invoice_id: None,
            payment_id: None,
            payload: json!({
                "workstation": session.workstation,
                "payments_count": session.payments_count,
                "total_amount": session.total_amount,
                "currency": session.currency,
                "note": session.closing_note,
                "ip": client_ip,
            }),
        }
    }
}
