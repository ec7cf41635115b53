//! Request and response payloads for the HTTP API.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::calculation::{round_money, RoundedTotals};
use crate::models::{EstimationInputs, EstimationStatus, TaxEstimation};

/// Envelope shared by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

fn validate_positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        let mut err = ValidationError::new("positive");
        err.message = Some("Vehicle value must be greater than zero".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRequest {
    pub case_id: Uuid,

    #[validate(range(min = 1, message = "Engine capacity must be a positive number of cc"))]
    pub engine_capacity: i32,

    #[validate(range(min = 0, message = "CO2 emissions must not be negative"))]
    pub co2_emissions: i32,

    #[validate(range(min = 0, message = "Vehicle age must not be negative"))]
    pub vehicle_age_months: i32,

    #[validate(custom(function = "validate_positive_amount"))]
    pub vehicle_value: Decimal,

    #[validate(length(min = 1, message = "Fuel type is required"))]
    pub fuel_type: String,

    /// Tables are resolved as of this date; defaults to today (UTC).
    #[serde(default)]
    pub as_of_date: Option<NaiveDate>,

    #[serde(default)]
    pub calculated_by: Option<Uuid>,
}

impl CalculateRequest {
    pub fn inputs(&self) -> EstimationInputs {
        EstimationInputs {
            vehicle_value: self.vehicle_value,
            vehicle_age_months: self.vehicle_age_months,
            engine_capacity: self.engine_capacity,
            co2_emissions: self.co2_emissions,
            fuel_type: self.fuel_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub approved_by: Uuid,
}

/// Success payload of a calculation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSummary {
    pub estimation_id: Uuid,
    pub calculation_version: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_cilindrada: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_co2: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub reduction_percentage: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_final: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub iva_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub iuc_estimated: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_estimated_cost: Decimal,
}

impl From<&TaxEstimation> for CalculationSummary {
    fn from(estimation: &TaxEstimation) -> Self {
        let rounded = RoundedTotals::from(&estimation.computed);
        Self {
            estimation_id: estimation.estimation_id,
            calculation_version: estimation.calculation_version,
            isv_cilindrada: rounded.isv_cylinder,
            isv_co2: rounded.isv_co2,
            isv_total: rounded.isv_total,
            reduction_percentage: rounded.reduction_percentage,
            isv_final: rounded.isv_final,
            iva_amount: rounded.iva_amount,
            iuc_estimated: rounded.iuc_estimated,
            total_estimated_cost: rounded.total_estimated_cost,
        }
    }
}

/// Display view of a stored estimation, money rounded to cents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimationView {
    pub estimation_id: Uuid,
    pub tenant_id: Uuid,
    pub case_id: Uuid,
    pub calculation_version: i32,
    pub calculated_at: DateTime<Utc>,
    pub calculated_by: Option<Uuid>,
    pub status: EstimationStatus,
    pub is_final: bool,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,

    #[serde(with = "rust_decimal::serde::float")]
    pub vehicle_value: Decimal,
    pub vehicle_age_months: i32,
    pub engine_capacity: i32,
    pub co2_emissions: i32,
    pub fuel_type: String,

    #[serde(with = "rust_decimal::serde::float")]
    pub depreciation_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub depreciated_value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_cilindrada: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_co2: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_total: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub reduction_percentage: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub isv_final: Decimal,
    pub isv_table_version: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub iva_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub iva_base: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub iva_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub iuc_estimated: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_estimated_cost: Decimal,
    pub calculation_details: serde_json::Value,
}

impl From<&TaxEstimation> for EstimationView {
    fn from(estimation: &TaxEstimation) -> Self {
        let rounded = RoundedTotals::from(&estimation.computed);
        let computed = &estimation.computed;
        let inputs = &estimation.inputs;
        Self {
            estimation_id: estimation.estimation_id,
            tenant_id: estimation.tenant_id,
            case_id: estimation.case_id,
            calculation_version: estimation.calculation_version,
            calculated_at: estimation.calculated_at,
            calculated_by: estimation.calculated_by,
            status: estimation.status(),
            is_final: estimation.is_final,
            approved_by: estimation.approved_by,
            approved_at: estimation.approved_at,
            vehicle_value: inputs.vehicle_value,
            vehicle_age_months: inputs.vehicle_age_months,
            engine_capacity: inputs.engine_capacity,
            co2_emissions: inputs.co2_emissions,
            fuel_type: inputs.fuel_type.clone(),
            depreciation_rate: computed.depreciation_rate,
            depreciated_value: round_money(computed.depreciated_value),
            isv_cilindrada: rounded.isv_cylinder,
            isv_co2: rounded.isv_co2,
            isv_total: rounded.isv_total,
            reduction_percentage: rounded.reduction_percentage,
            isv_final: rounded.isv_final,
            isv_table_version: estimation.isv_table_version.clone(),
            iva_rate: computed.iva_rate,
            iva_base: round_money(computed.iva_base),
            iva_amount: rounded.iva_amount,
            iuc_estimated: rounded.iuc_estimated,
            total_estimated_cost: rounded.total_estimated_cost,
            calculation_details: estimation.calculation_details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CalculateRequest {
        serde_json::from_value(serde_json::json!({
            "caseId": "3f1c2b8e-5a4d-4f0e-9c7b-1d2e3f4a5b6c",
            "engineCapacity": 1600,
            "co2Emissions": 125,
            "vehicleAgeMonths": 24,
            "vehicleValue": 20000.5,
            "fuelType": "GASOLINE"
        }))
        .unwrap()
    }

    #[test]
    fn test_request_accepts_camel_case_numbers() {
        let req = request();
        assert_eq!(req.vehicle_value, dec!(20000.5));
        assert_eq!(req.as_of_date, None);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_request_rejects_out_of_range_values() {
        let mut req = request();
        req.vehicle_value = dec!(0);
        assert!(req.validate().is_err());

        let mut req = request();
        req.engine_capacity = 0;
        assert!(req.validate().is_err());

        let mut req = request();
        req.co2_emissions = -1;
        assert!(req.validate().is_err());

        let mut req = request();
        req.vehicle_age_months = -3;
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("vehicle_age_months"));
    }

    #[test]
    fn test_failure_envelope_omits_data() {
        let body = serde_json::to_value(ApiResponse::<()>::failure("boom")).unwrap();
        assert_eq!(body, serde_json::json!({ "success": false, "error": "boom" }));
    }
}
