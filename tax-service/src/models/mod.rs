//! Domain models for tax-service.

mod audit;
mod estimation;
mod tax_table;

pub use audit::{AuditAction, AuditEntry, ENTITY_TAX_ESTIMATION};
pub use estimation::{
    ComputedFields, CreateEstimation, EstimationInputs, EstimationRevision, EstimationStatus,
    FuelType, TaxEstimation,
};
pub use tax_table::{
    coverage_gaps, select_effective, validate_brackets, Bracket, CoverageGap, CreateTaxTable,
    TaxTable, TaxTableData, TaxTableKind,
};
