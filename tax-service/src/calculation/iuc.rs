//! Annual circulation tax (IUC) estimate.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::bracket::resolve_rate;
use crate::models::Bracket;

/// Where the circulation fee comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IucSource {
    /// Built-in step function over CO2 emissions.
    #[default]
    Fixed,
    /// A `CIRCULATION_FEE` tax table whose bracket rates are flat fees.
    Table,
}

impl IucSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IucSource::Fixed => "fixed",
            IucSource::Table => "table",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(IucSource::Fixed),
            "table" => Some(IucSource::Table),
            _ => None,
        }
    }
}

/// Step function with inclusive upper bounds (g/km).
pub fn fixed_fee(co2_emissions: i32) -> Decimal {
    match co2_emissions {
        i32::MIN..=120 => dec!(20.78),
        121..=180 => dec!(69.72),
        181..=250 => dec!(181.01),
        _ => dec!(450.00),
    }
}

/// Flat fee of the matching band; a miss contributes zero.
pub fn table_fee(co2_emissions: i32, brackets: &[Bracket]) -> Decimal {
    resolve_rate(brackets, Decimal::from(co2_emissions)).unwrap_or(Decimal::ZERO)
}
