//! Invoice model for billing-service.

use super::{InvoiceLine, Payment, Visit};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Unpaid,
    Partial,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "UNPAID",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PARTIAL" => InvoiceStatus::Partial,
            "PAID" => InvoiceStatus::Paid,
            "CANCELLED" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Unpaid,
        }
    }

    /// Status implied by the amounts alone. Never yields `Cancelled`.
    pub fn derive(total: Decimal, paid: Decimal) -> Self {
        if total <= Decimal::ZERO || paid <= Decimal::ZERO {
            InvoiceStatus::Unpaid
        } else if paid >= total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::Partial
        }
    }
}

/// Invoice row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub visit_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub outstanding_amount: Decimal,
    pub currency: String,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub cancelled_utc: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status() == InvoiceStatus::Cancelled
    }
}

/// Totals recomputed from the lines and payments of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub total: Decimal,
    pub paid: Decimal,
    pub outstanding: Decimal,
    pub status: InvoiceStatus,
}

impl InvoiceTotals {
    pub fn compute(total: Decimal, paid: Decimal) -> Self {
        let outstanding = (total - paid).max(Decimal::ZERO);
        Self {
            total,
            paid,
            outstanding,
            status: InvoiceStatus::derive(total, paid),
        }
    }

    #[cfg(test)]
    fn from_amounts<'a, L, P>(line_amounts: L, payment_amounts: P) -> Self
    where
        L: IntoIterator<Item = &'a Decimal>,
        P: IntoIterator<Item = &'a Decimal>,
    {
        let total = line_amounts.into_iter().copied().sum();
        let paid = payment_amounts.into_iter().copied().sum();
        Self::compute(total, paid)
    }

    /// Status to persist: a cancelled invoice stays cancelled whatever its amounts.
    pub fn status_given(&self, current: InvoiceStatus) -> InvoiceStatus {
        if current == InvoiceStatus::Cancelled {
            InvoiceStatus::Cancelled
        } else {
            self.status
        }
    }
}

/// Invoice number for the `sequence`-th invoice of `year`: `FAC-2026-000042`.
pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("FAC-{}-{:06}", year, sequence)
}

/// Input for creating an invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub invoice_number: String,
    pub visit_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub currency: String,
    pub created_by: Option<Uuid>,
}

/// Invoice loaded with everything it owns.
#[derive(Debug, Clone)]
pub struct InvoiceAggregate {
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
    pub payments: Vec<Payment>,
    pub visit: Option<Visit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn status_is_unpaid_without_payments_or_total() {
        assert_eq!(InvoiceStatus::derive(d(5000), d(0)), InvoiceStatus::Unpaid);
        assert_eq!(InvoiceStatus::derive(d(0), d(0)), InvoiceStatus::Unpaid);
        // Money received against an empty invoice does not make it paid.
        assert_eq!(InvoiceStatus::derive(d(0), d(100)), InvoiceStatus::Unpaid);
    }

    #[test]
    fn status_tracks_partial_and_full_payment() {
        assert_eq!(InvoiceStatus::derive(d(5000), d(2000)), InvoiceStatus::Partial);
        assert_eq!(InvoiceStatus::derive(d(5000), d(5000)), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::derive(d(5000), d(6000)), InvoiceStatus::Paid);
    }

    #[test]
    fn totals_sum_lines_and_payments() {
        let lines = [d(3000), d(1500), Decimal::new(5050, 2)];
        let payments = [d(1000)];
        let totals = InvoiceTotals::from_amounts(&lines, &payments);

        assert_eq!(totals.total, Decimal::new(455050, 2));
        assert_eq!(totals.paid, d(1000));
        assert_eq!(totals.outstanding, Decimal::new(355050, 2));
        assert_eq!(totals.status, InvoiceStatus::Partial);
    }

    #[test]
    fn outstanding_never_goes_negative_when_lines_shrink() {
        // Paid in full, then a line is reduced below what was collected.
        let before = InvoiceTotals::compute(d(5000), d(5000));
        assert_eq!(before.status, InvoiceStatus::Paid);

        let after = InvoiceTotals::compute(d(4000), d(5000));
        assert_eq!(after.outstanding, Decimal::ZERO);
        assert_eq!(after.status, InvoiceStatus::Paid);

        // A line added after payment moves a paid invoice back to partial.
        let grown = InvoiceTotals::compute(d(6000), d(5000));
        assert_eq!(grown.outstanding, d(1000));
        assert_eq!(grown.status, InvoiceStatus::Partial);
    }

    #[test]
    fn cancelled_status_is_sticky() {
        let totals = InvoiceTotals::compute(d(100), d(0));
        assert_eq!(
            totals.status_given(InvoiceStatus::Cancelled),
            InvoiceStatus::Cancelled
        );
        assert_eq!(totals.status_given(InvoiceStatus::Paid), InvoiceStatus::Unpaid);
    }

    #[test]
    fn invoice_numbers_are_zero_padded_per_year() {
        assert_eq!(format_invoice_number(2026, 1), "FAC-2026-000001");
        assert_eq!(format_invoice_number(2026, 123456), "FAC-2026-123456");
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            InvoiceStatus::Unpaid,
            InvoiceStatus::Partial,
            InvoiceStatus::Paid,
            InvoiceStatus::Cancelled,
        ] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
    }
}
