//! Tax arithmetic. Everything here is pure and carries unrounded decimals;
//! rounding is applied only by [`aggregate::round_money`] when shaping payloads.

pub mod aggregate;
pub mod bracket;
pub mod depreciation;
pub mod isv;
pub mod iuc;
pub mod iva;

pub use aggregate::{estimate, round_money, CalculationDetails, ResolvedTables, RoundedTotals};
pub use bracket::{resolve_bracket, resolve_rate};
pub use depreciation::Depreciation;
pub use isv::IsvBreakdown;
pub use iuc::IucSource;
pub use iva::Iva;

use crate::error::EstimationError;

/// Arithmetic past the `Decimal` range is an input the service cannot price.
pub(crate) fn out_of_range(quantity: &str) -> EstimationError {
    EstimationError::Validation(format!("{} is too large to compute", quantity))
}
