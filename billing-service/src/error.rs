//! Business-rule failures raised by the billing engine.

use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq)]
pub enum BillingError {
    #[error("{0}")]
    Validation(String),

    #[error("Invoice {0} not found")]
    InvoiceNotFound(Uuid),

    #[error("Invoice line {0} not found")]
    LineNotFound(Uuid),

    #[error("Cash session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Visit {0} not found")]
    VisitNotFound(Uuid),

    #[error("Invoice is already settled")]
    AlreadySettled,

    #[error("Payment amount {amount} exceeds outstanding balance {outstanding}")]
    AmountExceedsOutstanding {
        amount: Decimal,
        outstanding: Decimal,
    },

    #[error("Cashier has no service assigned")]
    NoServiceAssigned,

    #[error("Cashier is not authorized to bill this service")]
    ServiceNotAuthorized,

    #[error("No open cash session for this cashier")]
    NoOpenSession,

    #[error("Invoice is cancelled")]
    InvoiceCancelled,

    #[error("Invoice has payments and cannot be cancelled")]
    InvoiceHasPayments,

    #[error("A cash session is already open on workstation '{0}'")]
    SessionAlreadyOpen(String),

    #[error("Cash session is already closed")]
    SessionClosed,

    #[error("Cash session belongs to another cashier")]
    SessionNotOwned,

    #[error("A payment with this idempotency key is already in progress")]
    IdempotencyKeyInFlight,
}

impl BillingError {
    /// Stable code clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation(_) => "VALIDATION",
            BillingError::InvoiceNotFound(_) => "INVOICE_NOT_FOUND",
            BillingError::LineNotFound(_) => "LINE_NOT_FOUND",
            BillingError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            BillingError::VisitNotFound(_) => "VISIT_NOT_FOUND",
            BillingError::AlreadySettled => "ALREADY_SETTLED",
            BillingError::AmountExceedsOutstanding { .. } => "AMOUNT_EXCEEDS_OUTSTANDING",
            BillingError::NoServiceAssigned => "NO_SERVICE_ASSIGNED",
            BillingError::ServiceNotAuthorized => "SERVICE_NOT_AUTHORIZED",
            BillingError::NoOpenSession => "NO_OPEN_SESSION",
            BillingError::InvoiceCancelled => "INVOICE_CANCELLED",
            BillingError::InvoiceHasPayments => "INVOICE_HAS_PAYMENTS",
            BillingError::SessionAlreadyOpen(_) => "SESSION_ALREADY_OPEN",
            BillingError::SessionClosed => "SESSION_CLOSED",
            BillingError::SessionNotOwned => "SESSION_NOT_OWNED",
            BillingError::IdempotencyKeyInFlight => "IDEMPOTENCY_KEY_IN_FLIGHT",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvoiceNotFound(_)
            | BillingError::LineNotFound(_)
            | BillingError::SessionNotFound(_)
            | BillingError::VisitNotFound(_) => AppError::NotFound(anyhow::anyhow!(err)),
            BillingError::SessionAlreadyOpen(_) | BillingError::IdempotencyKeyInFlight => {
                AppError::Conflict(anyhow::anyhow!(err))
            }
            BillingError::SessionNotOwned => AppError::Forbidden(anyhow::anyhow!(err)),
            other => AppError::BusinessRule(other.code(), other.to_string()),
        }
    }
}
