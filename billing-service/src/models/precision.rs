//! Decimal places the ledger columns can hold.

use rust_decimal::Decimal;

/// Money columns are `NUMERIC(18, 2)`.
pub const MONEY_SCALE: u32 = 2;

/// Quantities are `NUMERIC(18, 3)`.
pub const QUANTITY_SCALE: u32 = 3;

/// True when `value` needs no more than `scale` decimal places.
/// Trailing zeros do not count: `1.500` fits a scale of 1.
pub fn fits_scale(value: Decimal, scale: u32) -> bool {
    value.normalize().scale() <= scale
}
