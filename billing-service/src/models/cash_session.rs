//! Cash session model for billing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One cashier's drawer on one workstation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CashSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub workstation: String,
    pub service_id: Option<Uuid>,
    pub currency: String,
    pub opened_utc: DateTime<Utc>,
    pub closed_utc: Option<DateTime<Utc>>,
    pub closing_note: Option<String>,
    pub payments_count: i64,
    pub total_amount: Decimal,
}

impl CashSession {
    pub fn is_open(&self) -> bool {
        self.closed_utc.is_none()
    }
}

/// Input for opening a session.
#[derive(Debug, Clone)]
pub struct OpenCashSession {
    pub user_id: Uuid,
    pub workstation: String,
    pub service_id: Option<Uuid>,
    pub currency: String,
}
