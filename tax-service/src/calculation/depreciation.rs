//! Age-based reduction, applied both to ISV relief and to residual vehicle value.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::out_of_range;
use crate::error::EstimationError;

/// Percentage points of reduction per month of age.
pub fn monthly_reduction() -> Decimal {
    dec!(1.0)
}

/// Cap on the reduction percentage.
pub fn max_reduction() -> Decimal {
    dec!(50.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Depreciation {
    pub reduction_percentage: Decimal,
    pub isv_final: Decimal,
    pub depreciated_value: Decimal,
}

pub fn reduction_percentage(age_months: u32) -> Decimal {
    (Decimal::from(age_months) * monthly_reduction()).min(max_reduction())
}

pub fn compute(
    age_months: u32,
    vehicle_value: Decimal,
    isv_total: Decimal,
) -> Result<Depreciation, EstimationError> {
    let reduction_percentage = reduction_percentage(age_months);
    let retained = Decimal::ONE - reduction_percentage / Decimal::ONE_HUNDRED;

    Ok(Depreciation {
        reduction_percentage,
        isv_final: isv_total
            .checked_mul(retained)
            .ok_or_else(|| out_of_range("ISV after reduction"))?,
        depreciated_value: vehicle_value
            .checked_mul(retained)
            .ok_or_else(|| out_of_range("depreciated value"))?,
    })
}
