//! In-process backend implementing every collaborator interface.
//!
//! All state sits behind one async lock, so version allocation for a case is
//! atomic in the same way the PostgreSQL counter row makes it.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::repository::{
    warn_coverage_gaps, AuditSink, CaseDirectory, EstimationStore, TaxTableRepository,
};
use crate::error::EstimationError;
use crate::models::{
    select_effective, AuditEntry, CreateEstimation, CreateTaxTable, EstimationRevision,
    TaxEstimation, TaxTable, TaxTableData, TaxTableKind,
};

#[derive(Default)]
struct State {
    /// Insertion order is the tie-breaker for equal effective dates.
    tables: Vec<TaxTable>,
    cases: HashMap<Uuid, Uuid>,
    estimations: HashMap<Uuid, TaxEstimation>,
    audit: Vec<AuditEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a case known to the case directory.
    pub async fn register_case(&self, case_id: Uuid, tenant_id: Uuid) {
        self.state.write().await.cases.insert(case_id, tenant_id);
    }

    /// Deactivate a stored table; it stops being selectable.
    pub async fn deactivate_table(&self, tax_table_id: Uuid) -> bool {
        let mut state = self.state.write().await;
        match state
            .tables
            .iter_mut()
            .find(|t| t.tax_table_id == tax_table_id)
        {
            Some(table) => {
                table.is_active = false;
                true
            }
            None => false,
        }
    }

    /// Snapshot of recorded audit entries, oldest first.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.clone()
    }
}

#[async_trait]
impl TaxTableRepository for InMemoryBackend {
    #[instrument(skip(self), fields(kind = %kind, as_of = %as_of))]
    async fn resolve(
        &self,
        kind: TaxTableKind,
        as_of: NaiveDate,
    ) -> Result<TaxTable, EstimationError> {
        let state = self.state.read().await;
        let table = select_effective(&state.tables, kind, as_of)
            .cloned()
            .ok_or(EstimationError::TableNotFound { kind, as_of })?;
        drop(state);

        warn_coverage_gaps(&table);
        debug!(tax_table_id = %table.tax_table_id, version = %table.version, "Tax table resolved");
        Ok(table)
    }

    #[instrument(skip(self, input), fields(kind = %input.kind, version = %input.version))]
    async fn insert(&self, input: CreateTaxTable) -> Result<TaxTable, EstimationError> {
        input.validate()?;

        let table = TaxTable {
            tax_table_id: Uuid::new_v4(),
            kind: input.kind,
            version: input.version,
            effective_date: input.effective_date,
            end_date: input.end_date,
            data: Json(TaxTableData {
                brackets: input.brackets,
            }),
            is_active: true,
            notes: input.notes,
            created_utc: Utc::now(),
        };
        warn_coverage_gaps(&table);

        self.state.write().await.tables.push(table.clone());
        info!(tax_table_id = %table.tax_table_id, "Tax table stored");
        Ok(table)
    }
}

#[async_trait]
impl CaseDirectory for InMemoryBackend {
    async fn tenant_for_case(&self, case_id: Uuid) -> Result<Uuid, EstimationError> {
        self.state
            .read()
            .await
            .cases
            .get(&case_id)
            .copied()
            .ok_or(EstimationError::CaseNotFound(case_id))
    }
}

#[async_trait]
impl EstimationStore for InMemoryBackend {
    #[instrument(skip(self, input), fields(case_id = %input.case_id, tenant_id = %input.tenant_id))]
    async fn create(&self, input: CreateEstimation) -> Result<TaxEstimation, EstimationError> {
        let mut state = self.state.write().await;

        let calculation_version = state
            .estimations
            .values()
            .filter(|e| e.case_id == input.case_id)
            .map(|e| e.calculation_version)
            .max()
            .unwrap_or(0)
            + 1;

        let now = Utc::now();
        let estimation = TaxEstimation {
            estimation_id: Uuid::new_v4(),
            tenant_id: input.tenant_id,
            case_id: input.case_id,
            calculation_version,
            calculated_at: now,
            calculated_by: input.calculated_by,
            inputs: input.inputs,
            computed: input.computed,
            isv_table_version: input.isv_table_version,
            calculation_details: input.calculation_details,
            is_final: false,
            approved_by: None,
            approved_at: None,
            created_utc: now,
            updated_utc: now,
        };
        state
            .estimations
            .insert(estimation.estimation_id, estimation.clone());

        info!(
            estimation_id = %estimation.estimation_id,
            calculation_version,
            "Tax estimation created"
        );
        Ok(estimation)
    }

    #[instrument(skip(self, revision), fields(estimation_id = %estimation_id))]
    async fn revise(
        &self,
        estimation_id: Uuid,
        revision: EstimationRevision,
    ) -> Result<TaxEstimation, EstimationError> {
        let mut state = self.state.write().await;
        let estimation = state
            .estimations
            .get_mut(&estimation_id)
            .ok_or(EstimationError::EstimationNotFound(estimation_id))?;

        if estimation.is_final {
            return Err(EstimationError::Finalized(estimation_id));
        }

        let now = Utc::now();
        estimation.computed = revision.computed;
        estimation.isv_table_version = revision.isv_table_version;
        estimation.calculation_details = revision.calculation_details;
        estimation.calculated_at = now;
        estimation.updated_utc = now;

        Ok(estimation.clone())
    }

    #[instrument(skip(self), fields(estimation_id = %estimation_id))]
    async fn finalize(
        &self,
        estimation_id: Uuid,
        approved_by: Uuid,
    ) -> Result<TaxEstimation, EstimationError> {
        let mut state = self.state.write().await;
        let estimation = state
            .estimations
            .get_mut(&estimation_id)
            .ok_or(EstimationError::EstimationNotFound(estimation_id))?;

        if estimation.is_final {
            return Err(EstimationError::AlreadyFinal(estimation_id));
        }

        let now = Utc::now();
        estimation.is_final = true;
        estimation.approved_by = Some(approved_by);
        estimation.approved_at = Some(now);
        estimation.updated_utc = now;

        Ok(estimation.clone())
    }

    async fn get(&self, estimation_id: Uuid) -> Result<Option<TaxEstimation>, EstimationError> {
        Ok(self.state.read().await.estimations.get(&estimation_id).cloned())
    }

    async fn list_for_case(&self, case_id: Uuid) -> Result<Vec<TaxEstimation>, EstimationError> {
        let state = self.state.read().await;
        let mut estimations: Vec<TaxEstimation> = state
            .estimations
            .values()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect();
        estimations.sort_by_key(|e| e.calculation_version);
        Ok(estimations)
    }

    async fn health_check(&self) -> Result<(), EstimationError> {
        Ok(())
    }
}

#[async_trait]
impl AuditSink for InMemoryBackend {
    async fn record(&self, entry: AuditEntry) -> Result<(), EstimationError> {
        self.state.write().await.audit.push(entry);
        Ok(())
    }
}
