//! Tax estimation model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fuel types known to the case-management vehicle records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuelType {
    Gasoline,
    Diesel,
    Electric,
    Hybrid,
    PluginHybrid,
    Lpg,
    Cng,
    Hydrogen,
    Other,
}

impl FuelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Gasoline => "GASOLINE",
            FuelType::Diesel => "DIESEL",
            FuelType::Electric => "ELECTRIC",
            FuelType::Hybrid => "HYBRID",
            FuelType::PluginHybrid => "PLUGIN_HYBRID",
            FuelType::Lpg => "LPG",
            FuelType::Cng => "CNG",
            FuelType::Hydrogen => "HYDROGEN",
            FuelType::Other => "OTHER",
        }
    }

    /// Labels match exactly; anything else, including other casings, maps to
    /// `Other`. The raw label is kept on the record.
    pub fn from_string(s: &str) -> Self {
        match s {
            "GASOLINE" => FuelType::Gasoline,
            "DIESEL" => FuelType::Diesel,
            "ELECTRIC" => FuelType::Electric,
            "HYBRID" => FuelType::Hybrid,
            "PLUGIN_HYBRID" => FuelType::PluginHybrid,
            "LPG" => FuelType::Lpg,
            "CNG" => FuelType::Cng,
            "HYDROGEN" => FuelType::Hydrogen,
            _ => FuelType::Other,
        }
    }

    /// Exempt from the environmental (CO2) component of ISV.
    pub fn is_co2_exempt(&self) -> bool {
        matches!(self, FuelType::Electric)
    }
}

/// Estimation lifecycle: `Draft -> Final`, one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationStatus {
    Draft,
    Final,
}

/// Inputs captured verbatim from the calculation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EstimationInputs {
    pub vehicle_value: Decimal,
    pub vehicle_age_months: i32,
    pub engine_capacity: i32,
    pub co2_emissions: i32,
    pub fuel_type: String,
}

impl EstimationInputs {
    pub fn fuel(&self) -> FuelType {
        FuelType::from_string(&self.fuel_type)
    }
}

/// Unrounded derived values. These are authoritative; rounding happens only
/// when a payload is shaped for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ComputedFields {
    pub depreciation_rate: Decimal,
    pub depreciated_value: Decimal,
    pub isv_cylinder: Decimal,
    pub isv_co2: Decimal,
    pub isv_total: Decimal,
    pub isv_reduction_percentage: Decimal,
    pub isv_final: Decimal,
    pub iva_rate: Decimal,
    pub iva_base: Decimal,
    pub iva_amount: Decimal,
    pub iuc_estimated: Decimal,
    pub total_estimated_cost: Decimal,
}

/// One calculation attempt for one import case.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaxEstimation {
    pub estimation_id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub calculation_version: i32,
    pub calculated_at: DateTime<Utc>,
    pub calculated_by: Option<Uuid>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub inputs: EstimationInputs,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub computed: ComputedFields,
    pub isv_table_version: Option<String>,
    pub calculation_details: serde_json::Value,
    pub is_final: bool,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl TaxEstimation {
    pub fn status(&self) -> EstimationStatus {
        if self.is_final {
            EstimationStatus::Final
        } else {
            EstimationStatus::Draft
        }
    }
}

/// Input for persisting a new estimation. The store assigns the id and the
/// calculation version.
#[derive(Debug, Clone)]
pub struct CreateEstimation {
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub calculated_by: Option<Uuid>,
    pub inputs: EstimationInputs,
    pub computed: ComputedFields,
    pub isv_table_version: Option<String>,
    pub calculation_details: serde_json::Value,
}

/// Replacement derived values for a draft estimation.
#[derive(Debug, Clone)]
pub struct EstimationRevision {
    pub computed: ComputedFields,
    pub isv_table_version: Option<String>,
    pub calculation_details: serde_json::Value,
}
