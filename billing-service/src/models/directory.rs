//! Read models for records owned by other hospital modules.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Visit status set once an invoice has been raised for it.
pub const VISIT_AWAITING_PAYMENT: &str = "awaiting_payment";

/// Clinical visit an invoice is raised from.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visit {
    pub visit_id: Uuid,
    pub patient_id: Uuid,
    pub service_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub planned_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub label: Option<String>,
    pub status: String,
}

impl Visit {
    /// Planned amount worth billing as the initial line, if any.
    pub fn billable_amount(&self) -> Option<Decimal> {
        self.planned_amount.filter(|amount| *amount > Decimal::ZERO)
    }
}

/// Tariff catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tariff {
    pub tariff_id: Uuid,
    pub code: String,
    pub label: String,
    pub price: Decimal,
    pub currency: String,
    pub service_id: Option<Uuid>,
    pub active: bool,
}

/// Roles and service memberships of a cashier.
#[derive(Debug, Clone, Default)]
pub struct CashierProfile {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    pub allowed_service_ids: Vec<Uuid>,
}
