//! Collaborator interfaces consumed by the estimation engine.

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;
use uuid::Uuid;

use crate::error::EstimationError;
use crate::models::{
    AuditEntry, CreateEstimation, CreateTaxTable, EstimationRevision, TaxEstimation, TaxTable,
    TaxTableKind,
};

/// Read and administrative access to effective-dated tax tables.
#[async_trait]
pub trait TaxTableRepository: Send + Sync {
    /// The table of `kind` effective on `as_of`, or `TableNotFound`.
    async fn resolve(&self, kind: TaxTableKind, as_of: NaiveDate)
        -> Result<TaxTable, EstimationError>;

    /// Validates and stores a new table version.
    async fn insert(&self, table: CreateTaxTable) -> Result<TaxTable, EstimationError>;
}

/// Case lookup owned by case management.
#[async_trait]
pub trait CaseDirectory: Send + Sync {
    async fn tenant_for_case(&self, case_id: Uuid) -> Result<Uuid, EstimationError>;
}

#[async_trait]
pub trait EstimationStore: Send + Sync {
    /// Persists a draft under the next calculation version of its case.
    /// Versions for one case are dense and never reused.
    async fn create(&self, input: CreateEstimation) -> Result<TaxEstimation, EstimationError>;

    /// Rewrites the derived fields of a draft. Final estimations yield
    /// `Finalized`.
    async fn revise(
        &self,
        estimation_id: Uuid,
        revision: EstimationRevision,
    ) -> Result<TaxEstimation, EstimationError>;

    /// One-way `Draft -> Final` transition.
    async fn finalize(
        &self,
        estimation_id: Uuid,
        approved_by: Uuid,
    ) -> Result<TaxEstimation, EstimationError>;

    async fn get(&self, estimation_id: Uuid) -> Result<Option<TaxEstimation>, EstimationError>;

    /// All versions for a case, ascending.
    async fn list_for_case(&self, case_id: Uuid) -> Result<Vec<TaxEstimation>, EstimationError>;

    async fn health_check(&self) -> Result<(), EstimationError>;
}

/// Append-only audit log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), EstimationError>;
}

/// Warn about integral inputs the table leaves uncovered. Values in a gap
/// contribute zero tax.
pub(crate) fn warn_coverage_gaps(table: &TaxTable) {
    let gaps = table.coverage_gaps();
    if gaps.is_empty() {
        return;
    }
    let ranges: Vec<String> = gaps.iter().map(ToString::to_string).collect();
    warn!(
        tax_table_id = %table.tax_table_id,
        kind = %table.kind,
        version = %table.version,
        gaps = %ranges.join(", "),
        "Tax table does not cover every input"
    );
}
