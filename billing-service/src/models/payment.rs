//! Payment model for billing-service.

use super::precision::{fits_scale, MONEY_SCALE};
use crate::error::BillingError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Settlement posted against an invoice. Rows are never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub mode: String,
    pub reference: Option<String>,
    pub currency: String,
    pub cashier_id: Uuid,
    pub session_id: Uuid,
    pub workstation: String,
    pub service_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a payment.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub mode: String,
    pub reference: Option<String>,
    pub currency: String,
    pub cashier_id: Uuid,
    pub session_id: Uuid,
    pub workstation: String,
    pub service_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

/// Reject a payment of `amount` against an invoice with `outstanding` left.
pub fn check_payable(outstanding: Decimal, amount: Decimal) -> Result<(), BillingError> {
    if amount <= Decimal::ZERO {
        return Err(BillingError::Validation(
            "amount must be greater than zero".to_string(),
        ));
    }
    if !fits_scale(amount, MONEY_SCALE) {
        return Err(BillingError::Validation(format!(
            "amount must have at most {} decimal places",
            MONEY_SCALE
        )));
    }
    if outstanding <= Decimal::ZERO {
        return Err(BillingError::AlreadySettled);
    }
    if amount > outstanding {
        return Err(BillingError::AmountExceedsOutstanding {
            amount,
            outstanding,
        });
    }
    Ok(())
}
