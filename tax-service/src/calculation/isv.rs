//! Vehicle registration tax (ISV).

use rust_decimal::Decimal;

use super::bracket::resolve_rate;
use super::out_of_range;
use crate::error::EstimationError;
use crate::models::{Bracket, FuelType};

/// ISV components before the age reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsvBreakdown {
    pub cylinder: Decimal,
    pub co2: Decimal,
    pub total: Decimal,
    /// Rate matched in the cylinder table, `None` on a bracket miss.
    pub cylinder_rate: Option<Decimal>,
    /// Rate matched in the CO2 table, `None` on a miss or an exemption.
    pub co2_rate: Option<Decimal>,
    pub co2_exempt: bool,
}

pub fn compute(
    engine_capacity: i32,
    co2_emissions: i32,
    fuel_type: FuelType,
    cylinder_table: &[Bracket],
    co2_table: &[Bracket],
) -> Result<IsvBreakdown, EstimationError> {
    let capacity = Decimal::from(engine_capacity);
    let cylinder_rate = resolve_rate(cylinder_table, capacity);
    let cylinder = component(capacity, cylinder_rate)
        .ok_or_else(|| out_of_range("ISV cylinder component"))?;

    let co2_exempt = fuel_type.is_co2_exempt();
    let (co2, co2_rate) = if co2_exempt {
        (Decimal::ZERO, None)
    } else {
        let emissions = Decimal::from(co2_emissions);
        let rate = resolve_rate(co2_table, emissions);
        let co2 = component(emissions, rate).ok_or_else(|| out_of_range("ISV CO2 component"))?;
        (co2, rate)
    };

    let total = cylinder
        .checked_add(co2)
        .ok_or_else(|| out_of_range("ISV total"))?;

    Ok(IsvBreakdown {
        cylinder,
        co2,
        total,
        cylinder_rate,
        co2_rate,
        co2_exempt,
    })
}

/// `quantity * rate`, zero on a bracket miss, `None` on overflow.
fn component(quantity: Decimal, rate: Option<Decimal>) -> Option<Decimal> {
    match rate {
        Some(rate) => quantity.checked_mul(rate),
        None => Some(Decimal::ZERO),
    }
}
