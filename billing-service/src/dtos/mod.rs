//! Request and response bodies for the billing HTTP API.

use crate::models::{
    fits_scale, AuditEvent, CashSession, Invoice, InvoiceAggregate, InvoiceLine, InvoiceStatus,
    Payment, Visit, MONEY_SCALE, QUANTITY_SCALE,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn within_scale(value: &Decimal, scale: u32) -> Result<(), ValidationError> {
    if fits_scale(*value, scale) {
        Ok(())
    } else {
        Err(ValidationError::new("too_many_decimal_places"))
    }
}

fn positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must_be_positive"));
    }
    within_scale(value, MONEY_SCALE)
}

fn positive_quantity(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must_be_positive"));
    }
    within_scale(value, QUANTITY_SCALE)
}

fn non_negative_price(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    within_scale(value, MONEY_SCALE)
}

// ---- Requests ----

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLineRequest {
    #[validate(length(min = 1, max = 500))]
    pub designation: Option<String>,
    #[validate(custom(function = "positive_quantity"))]
    pub quantity: Decimal,
    #[validate(custom(function = "non_negative_price"))]
    pub unit_price: Option<Decimal>,
    pub tariff_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLineRequest {
    #[validate(length(min = 1, max = 500))]
    pub designation: Option<String>,
    #[validate(custom(function = "positive_quantity"))]
    pub quantity: Option<Decimal>,
    #[validate(custom(function = "non_negative_price"))]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    #[validate(length(min = 1, max = 32))]
    pub mode: String,
    #[validate(length(max = 255))]
    pub reference: Option<String>,
    pub service_id: Option<Uuid>,
}

impl CreatePaymentRequest {
    /// Trim free-text fields so blank values fail validation.
    pub fn trimmed(mut self) -> Self {
        self.mode = self.mode.trim().to_string();
        self.reference = self
            .reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        self
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct OpenSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub workstation: Option<String>,
    pub service_id: Option<Uuid>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CloseSessionRequest {
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

// ---- Responses ----

#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub pdf: String,
}

impl InvoiceLinks {
    pub fn for_invoice(invoice_id: Uuid) -> Self {
        Self {
            self_link: format!("/invoices/{}", invoice_id),
            pdf: format!("/invoices/{}/pdf", invoice_id),
        }
    }
}

/// Full invoice view with everything it owns.
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
    pub payments: Vec<Payment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit: Option<Visit>,
    pub links: InvoiceLinks,
}

impl From<InvoiceAggregate> for InvoiceResponse {
    fn from(aggregate: InvoiceAggregate) -> Self {
        let links = InvoiceLinks::for_invoice(aggregate.invoice.invoice_id);
        Self {
            invoice: aggregate.invoice,
            lines: aggregate.lines,
            payments: aggregate.payments,
            visit: aggregate.visit,
            links,
        }
    }
}

/// Invoice totals as seen right after a payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: Uuid,
    pub number: String,
    pub total: Decimal,
    pub paid: Decimal,
    pub outstanding: Decimal,
    pub status: InvoiceStatus,
    pub currency: String,
}

impl From<&Invoice> for InvoiceSummary {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.invoice_id,
            number: invoice.invoice_number.clone(),
            total: invoice.total_amount,
            paid: invoice.paid_amount,
            outstanding: invoice.outstanding_amount,
            status: invoice.status(),
            currency: invoice.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub invoice: InvoiceSummary,
    pub payment: Payment,
}

#[derive(Debug, Serialize)]
pub struct CashSessionResponse {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub workstation: String,
    pub service_id: Option<Uuid>,
    pub currency: String,
    pub status: &'static str,
    pub opened_utc: DateTime<Utc>,
    pub closed_utc: Option<DateTime<Utc>>,
    pub closing_note: Option<String>,
    pub payments_count: i64,
    pub total_amount: Decimal,
}

impl From<CashSession> for CashSessionResponse {
    fn from(session: CashSession) -> Self {
        Self {
            status: if session.is_open() { "open" } else { "closed" },
            session_id: session.session_id,
            user_id: session.user_id,
            workstation: session.workstation,
            service_id: session.service_id,
            currency: session.currency,
            opened_utc: session.opened_utc,
            closed_utc: session.closed_utc,
            closing_note: session.closing_note,
            payments_count: session.payments_count,
            total_amount: session.total_amount,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditEventsResponse {
    pub session_id: Uuid,
    pub events: Vec<AuditEvent>,
}
