//! Value-added tax (IVA) on depreciated value plus relieved ISV.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::out_of_range;
use crate::error::EstimationError;

/// Standard rate for a corporate importer, in percent.
pub fn default_rate() -> Decimal {
    dec!(23.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iva {
    pub rate: Decimal,
    pub base: Decimal,
    pub amount: Decimal,
}

pub fn compute(
    depreciated_value: Decimal,
    isv_final: Decimal,
    rate: Decimal,
) -> Result<Iva, EstimationError> {
    let base = depreciated_value
        .checked_add(isv_final)
        .ok_or_else(|| out_of_range("IVA base"))?;
    let amount = base
        .checked_mul(rate)
        .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
        .ok_or_else(|| out_of_range("IVA amount"))?;

    Ok(Iva { rate, base, amount })
}
