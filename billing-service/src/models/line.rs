//! Invoice line model for billing-service.

use super::precision::{fits_scale, MONEY_SCALE, QUANTITY_SCALE};
use super::Tariff;
use crate::error::BillingError;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Charge row on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLine {
    pub line_id: Uuid,
    pub invoice_id: Uuid,
    pub designation: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub tariff_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for creating a line. Amount is derived, never supplied.
#[derive(Debug, Clone)]
pub struct CreateLine {
    pub invoice_id: Uuid,
    pub designation: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tariff_id: Option<Uuid>,
}

impl CreateLine {
    pub fn amount(&self) -> Decimal {
        line_amount(self.quantity, self.unit_price)
    }
}

/// Partial update of a line.
#[derive(Debug, Clone, Default)]
pub struct UpdateLine {
    pub designation: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
}

impl UpdateLine {
    /// Apply the changes to `line`, recomputing its amount.
    pub fn apply_to(&self, line: &mut InvoiceLine) -> Result<(), BillingError> {
        if let Some(designation) = &self.designation {
            let designation = designation.trim();
            if designation.is_empty() {
                return Err(BillingError::Validation(
                    "designation must not be empty".to_string(),
                ));
            }
            line.designation = designation.to_string();
        }
        if let Some(quantity) = self.quantity {
            check_quantity(quantity)?;
            line.quantity = quantity;
        }
        if let Some(unit_price) = self.unit_price {
            check_unit_price(unit_price)?;
            line.unit_price = unit_price;
        }
        line.amount = line_amount(line.quantity, line.unit_price);
        Ok(())
    }
}

/// `quantity * unit_price`, rounded to cents.
pub fn line_amount(quantity: Decimal, unit_price: Decimal) -> Decimal {
    (quantity * unit_price).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn check_quantity(quantity: Decimal) -> Result<(), BillingError> {
    if quantity <= Decimal::ZERO {
        return Err(BillingError::Validation(
            "quantity must be greater than zero".to_string(),
        ));
    }
    if !fits_scale(quantity, QUANTITY_SCALE) {
        return Err(BillingError::Validation(format!(
            "quantity must have at most {} decimal places",
            QUANTITY_SCALE
        )));
    }
    Ok(())
}

pub fn check_unit_price(unit_price: Decimal) -> Result<(), BillingError> {
    if unit_price < Decimal::ZERO {
        return Err(BillingError::Validation(
            "unit_price must not be negative".to_string(),
        ));
    }
    if !fits_scale(unit_price, MONEY_SCALE) {
        return Err(BillingError::Validation(format!(
            "unit_price must have at most {} decimal places",
            MONEY_SCALE
        )));
    }
    Ok(())
}

/// Build a line from caller input, filling designation and price from the
/// tariff when the caller left them out. A missing tariff is not an error
/// unless it leaves the line without a price or a designation.
pub fn resolve_line(
    invoice_id: Uuid,
    designation: Option<String>,
    quantity: Decimal,
    unit_price: Option<Decimal>,
    tariff_id: Option<Uuid>,
    tariff: Option<&Tariff>,
) -> Result<CreateLine, BillingError> {
    check_quantity(quantity)?;

    let designation = designation
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .or_else(|| tariff.map(|t| t.label.clone()))
        .ok_or_else(|| BillingError::Validation("designation is required".to_string()))?;

    let unit_price = unit_price
        .or_else(|| tariff.map(|t| t.price))
        .ok_or_else(|| {
            BillingError::Validation("unit_price is required when no tariff price applies".to_string())
        })?;
    check_unit_price(unit_price)?;

    Ok(CreateLine {
        invoice_id,
        designation,
        quantity,
        unit_price,
        tariff_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tariff() -> Tariff {
        Tariff {
            tariff_id: Uuid::new_v4(),
            code: "CONS-GEN".to_string(),
            label: "General consultation".to_string(),
            price: Decimal::from(5000),
            currency: "XAF".to_string(),
            service_id: None,
            active: true,
        }
    }

    #[test]
    fn amount_is_rounded_half_away_from_zero() {
        assert_eq!(line_amount(Decimal::from(3), Decimal::from(1500)), Decimal::from(4500));
        // 1.5 * 0.35 = 0.525
        assert_eq!(
            line_amount(Decimal::new(15, 1), Decimal::new(35, 2)),
            Decimal::new(53, 2)
        );
    }

    #[test]
    fn tariff_fills_missing_designation_and_price() {
        let t = tariff();
        let line = resolve_line(
            Uuid::nil(),
            None,
            Decimal::from(2),
            None,
            Some(t.tariff_id),
            Some(&t),
        )
        .unwrap();

        assert_eq!(line.designation, "General consultation");
        assert_eq!(line.unit_price, Decimal::from(5000));
        assert_eq!(line.amount(), Decimal::from(10000));
        assert_eq!(line.tariff_id, Some(t.tariff_id));
    }

    #[test]
    fn caller_values_win_over_tariff() {
        let t = tariff();
        let line = resolve_line(
            Uuid::nil(),
            Some("Follow-up".to_string()),
            Decimal::ONE,
            Some(Decimal::from(2500)),
            Some(t.tariff_id),
            Some(&t),
        )
        .unwrap();

        assert_eq!(line.designation, "Follow-up");
        assert_eq!(line.unit_price, Decimal::from(2500));
    }

    #[test]
    fn unknown_tariff_without_price_is_rejected() {
        let err = resolve_line(
            Uuid::nil(),
            Some("Dressing".to_string()),
            Decimal::ONE,
            None,
            Some(Uuid::new_v4()),
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn unknown_tariff_with_manual_price_is_accepted() {
        let line = resolve_line(
            Uuid::nil(),
            Some("Dressing".to_string()),
            Decimal::ONE,
            Some(Decimal::from(800)),
            Some(Uuid::new_v4()),
            None,
        )
        .unwrap();
        assert_eq!(line.amount(), Decimal::from(800));
    }

    #[test]
    fn non_positive_quantity_and_negative_price_are_rejected() {
        assert!(resolve_line(Uuid::nil(), Some("X".into()), Decimal::ZERO, Some(Decimal::ONE), None, None).is_err());
        assert!(resolve_line(Uuid::nil(), Some("X".into()), Decimal::ONE, Some(Decimal::NEGATIVE_ONE), None, None).is_err());
        // Free items are allowed.
        assert!(resolve_line(Uuid::nil(), Some("X".into()), Decimal::ONE, Some(Decimal::ZERO), None, None).is_ok());
    }

    #[test]
    fn values_finer_than_the_columns_are_rejected() {
        let err = check_quantity(Decimal::new(1, 4)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert!(check_quantity(Decimal::new(10005, 4)).is_err());
        assert!(check_quantity(Decimal::new(1005, 3)).is_ok());

        assert!(check_unit_price(Decimal::new(1, 3)).is_err());
        assert!(check_unit_price(Decimal::new(33333, 2)).is_ok());
        // 1000.500 is 1000.50
        assert!(check_unit_price(Decimal::new(1000500, 3)).is_ok());
    }

    #[test]
    fn update_rejects_quantity_the_column_would_round() {
        let now = Utc::now();
        let mut line = InvoiceLine {
            line_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            designation: "Saline".to_string(),
            quantity: Decimal::ONE,
            unit_price: Decimal::from(1000),
            amount: Decimal::from(1000),
            tariff_id: None,
            created_utc: now,
            updated_utc: now,
        };

        let err = UpdateLine {
            quantity: Some(Decimal::new(10005, 4)),
            ..Default::default()
        }
        .apply_to(&mut line)
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert_eq!(line.quantity, Decimal::ONE);
        assert_eq!(line.amount, Decimal::from(1000));
    }

    #[test]
    fn update_recomputes_amount() {
        let now = Utc::now();
        let mut line = InvoiceLine {
            line_id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            designation: "X-ray".to_string(),
            quantity: Decimal::ONE,
            unit_price: Decimal::from(12000),
            amount: Decimal::from(12000),
            tariff_id: None,
            created_utc: now,
            updated_utc: now,
        };

        UpdateLine {
            quantity: Some(Decimal::from(2)),
            ..Default::default()
        }
        .apply_to(&mut line)
        .unwrap();
        assert_eq!(line.amount, Decimal::from(24000));

        let err = UpdateLine {
            unit_price: Some(Decimal::NEGATIVE_ONE),
            ..Default::default()
        }
        .apply_to(&mut line)
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}
