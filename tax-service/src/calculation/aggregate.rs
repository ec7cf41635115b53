//! Combines ISV, depreciation, IVA and IUC into one estimation.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{depreciation, isv, iuc, iva, out_of_range, IucSource};
use crate::error::EstimationError;
use crate::models::{ComputedFields, EstimationInputs, TaxTable, TaxTableKind};

/// Tables effective for one calculation.
#[derive(Debug, Clone)]
pub struct ResolvedTables {
    pub cylinder: TaxTable,
    pub co2: TaxTable,
    /// Present only when the circulation fee is sourced from a table.
    pub circulation: Option<TaxTable>,
}

/// Which table row fed a component, and the rate it matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub tax_table_id: Uuid,
    pub version: String,
    pub effective_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub matched_rate: Option<Decimal>,
}

impl TableReference {
    fn new(table: &TaxTable, matched_rate: Option<Decimal>) -> Self {
        Self {
            tax_table_id: table.tax_table_id,
            version: table.version.clone(),
            effective_date: table.effective_date,
            matched_rate,
        }
    }
}

/// Stored alongside the record in `calculation_details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationDetails {
    pub as_of_date: NaiveDate,
    pub engine_capacity: i32,
    pub co2_emissions: i32,
    pub fuel_type: String,
    pub cylinder: TableReference,
    pub co2: TableReference,
    pub co2_exempt: bool,
    pub iuc_source: IucSource,
    pub circulation: Option<TableReference>,
}

#[derive(Debug, Clone)]
pub struct Calculation {
    pub computed: ComputedFields,
    pub details: CalculationDetails,
}

impl Calculation {
    /// Components whose input fell outside every bracket of their table.
    pub fn bracket_misses(&self) -> Vec<TaxTableKind> {
        let mut misses = Vec::new();
        if self.details.cylinder.matched_rate.is_none() {
            misses.push(TaxTableKind::CylinderCapacity);
        }
        if !self.details.co2_exempt && self.details.co2.matched_rate.is_none() {
            misses.push(TaxTableKind::Co2Emissions);
        }
        if let Some(circulation) = &self.details.circulation {
            if circulation.matched_rate.is_none() {
                misses.push(TaxTableKind::CirculationFee);
            }
        }
        misses
    }
}

/// Round to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn validate_inputs(inputs: &EstimationInputs) -> Result<(), EstimationError> {
    if inputs.vehicle_value <= Decimal::ZERO {
        return Err(EstimationError::Validation(format!(
            "vehicle value must be positive, got {}",
            inputs.vehicle_value
        )));
    }
    if inputs.engine_capacity <= 0 {
        return Err(EstimationError::Validation(format!(
            "engine capacity must be positive, got {}",
            inputs.engine_capacity
        )));
    }
    if inputs.co2_emissions < 0 {
        return Err(EstimationError::Validation(format!(
            "CO2 emissions must not be negative, got {}",
            inputs.co2_emissions
        )));
    }
    if inputs.vehicle_age_months < 0 {
        return Err(EstimationError::Validation(format!(
            "vehicle age must not be negative, got {} months",
            inputs.vehicle_age_months
        )));
    }
    Ok(())
}

/// Runs the whole pipeline on unrounded values. Inputs must have passed
/// [`validate_inputs`].
pub fn estimate(
    inputs: &EstimationInputs,
    tables: &ResolvedTables,
    iva_rate: Decimal,
    iuc_source: IucSource,
    as_of: NaiveDate,
) -> Result<Calculation, EstimationError> {
    let age_months = u32::try_from(inputs.vehicle_age_months).map_err(|_| {
        EstimationError::Validation(format!(
            "vehicle age must not be negative, got {} months",
            inputs.vehicle_age_months
        ))
    })?;

    let isv = isv::compute(
        inputs.engine_capacity,
        inputs.co2_emissions,
        inputs.fuel(),
        tables.cylinder.brackets(),
        tables.co2.brackets(),
    )?;

    let depreciation = depreciation::compute(age_months, inputs.vehicle_value, isv.total)?;

    let iva = iva::compute(depreciation.depreciated_value, depreciation.isv_final, iva_rate)?;

    let (iuc_estimated, circulation) = match (iuc_source, &tables.circulation) {
        (IucSource::Fixed, _) => (iuc::fixed_fee(inputs.co2_emissions), None),
        (IucSource::Table, Some(table)) => {
            let fee = super::resolve_rate(table.brackets(), Decimal::from(inputs.co2_emissions));
            (
                iuc::table_fee(inputs.co2_emissions, table.brackets()),
                Some(TableReference::new(table, fee)),
            )
        }
        (IucSource::Table, None) => {
            return Err(EstimationError::TableNotFound {
                kind: TaxTableKind::CirculationFee,
                as_of,
            })
        }
    };

    let total_estimated_cost = depreciation
        .depreciated_value
        .checked_add(depreciation.isv_final)
        .and_then(|sum| sum.checked_add(iva.amount))
        .and_then(|sum| sum.checked_add(iuc_estimated))
        .ok_or_else(|| out_of_range("total estimated cost"))?;

    let computed = ComputedFields {
        depreciation_rate: depreciation.reduction_percentage,
        depreciated_value: depreciation.depreciated_value,
        isv_cylinder: isv.cylinder,
        isv_co2: isv.co2,
        isv_total: isv.total,
        isv_reduction_percentage: depreciation.reduction_percentage,
        isv_final: depreciation.isv_final,
        iva_rate: iva.rate,
        iva_base: iva.base,
        iva_amount: iva.amount,
        iuc_estimated,
        total_estimated_cost,
    };

    let details = CalculationDetails {
        as_of_date: as_of,
        engine_capacity: inputs.engine_capacity,
        co2_emissions: inputs.co2_emissions,
        fuel_type: inputs.fuel_type.clone(),
        cylinder: TableReference::new(&tables.cylinder, isv.cylinder_rate),
        co2: TableReference::new(&tables.co2, isv.co2_rate),
        co2_exempt: isv.co2_exempt,
        iuc_source,
        circulation,
    };

    Ok(Calculation { computed, details })
}

/// Display values: each field rounded independently from its unrounded
/// source, so the rounded total may differ from the sum of rounded parts by
/// a cent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundedTotals {
    pub isv_cylinder: Decimal,
    pub isv_co2: Decimal,
    pub isv_total: Decimal,
    pub reduction_percentage: Decimal,
    pub isv_final: Decimal,
    pub iva_amount: Decimal,
    pub iuc_estimated: Decimal,
    pub total_estimated_cost: Decimal,
}

impl From<&ComputedFields> for RoundedTotals {
    fn from(computed: &ComputedFields) -> Self {
        Self {
            isv_cylinder: round_money(computed.isv_cylinder),
            isv_co2: round_money(computed.isv_co2),
            isv_total: round_money(computed.isv_total),
            reduction_percentage: computed.isv_reduction_percentage,
            isv_final: round_money(computed.isv_final),
            iva_amount: round_money(computed.iva_amount),
            iuc_estimated: round_money(computed.iuc_estimated),
            total_estimated_cost: round_money(computed.total_estimated_cost),
        }
    }
}
