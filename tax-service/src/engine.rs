//! Estimation engine: resolves tables, runs the calculation pipeline and
//! persists the result through the injected collaborators.

use chrono::{NaiveDate, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::calculation::aggregate::{self, Calculation};
use crate::calculation::{IucSource, ResolvedTables};
use crate::config::EngineConfig;
use crate::dtos::CalculateRequest;
use crate::error::EstimationError;
use crate::models::{
    AuditAction, AuditEntry, CreateEstimation, EstimationInputs, EstimationRevision,
    TaxEstimation, TaxTableKind,
};
use crate::services::metrics::{
    AUDIT_FAILURES_TOTAL, BRACKET_MISSES_TOTAL, CALCULATIONS_TOTAL, ERRORS_TOTAL,
    FINALIZATIONS_TOTAL,
};
use crate::services::Backends;

#[derive(Clone)]
pub struct EstimationEngine {
    backends: Backends,
    config: EngineConfig,
}

impl EstimationEngine {
    pub fn new(backends: Backends, config: EngineConfig) -> Self {
        Self { backends, config }
    }

    /// Bound one persistence round trip.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, EstimationError>
    where
        F: Future<Output = Result<T, EstimationError>>,
    {
        bounded(self.config.persistence_timeout, fut).await
    }

    /// Computes and stores a new draft estimation for the request's case.
    #[instrument(skip(self, request), fields(case_id = %request.case_id))]
    pub async fn calculate(
        &self,
        request: &CalculateRequest,
    ) -> Result<TaxEstimation, EstimationError> {
        let result = self.run_calculation(request).await;
        record_outcome(&CALCULATIONS_TOTAL, &result);
        result
    }

    async fn run_calculation(
        &self,
        request: &CalculateRequest,
    ) -> Result<TaxEstimation, EstimationError> {
        let inputs = request.inputs();
        aggregate::validate_inputs(&inputs)?;

        let as_of = request
            .as_of_date
            .unwrap_or_else(|| Utc::now().date_naive());

        let tables = self.resolve_tables(as_of).await?;
        let tenant_id = self.backends.cases.tenant_for_case(request.case_id).await?;

        let calculation = self.compute(&inputs, &tables, as_of)?;

        let create = CreateEstimation {
            tenant_id,
            case_id: request.case_id,
            calculated_by: request.calculated_by,
            inputs,
            isv_table_version: Some(tables.cylinder.version.clone()),
            calculation_details: encode_details(&calculation)?,
            computed: calculation.computed,
        };

        let estimation = self.bounded(self.backends.store.create(create)).await?;

        info!(
            estimation_id = %estimation.estimation_id,
            tenant_id = %estimation.tenant_id,
            calculation_version = estimation.calculation_version,
            total_estimated_cost = %estimation.computed.total_estimated_cost,
            "Tax estimation calculated"
        );

        self.emit_audit(AuditAction::Calculate, &estimation, request.calculated_by)
            .await;

        Ok(estimation)
    }

    /// Re-runs a draft's captured inputs against the tables effective today.
    #[instrument(skip(self), fields(estimation_id = %estimation_id))]
    pub async fn recalculate(
        &self,
        estimation_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<TaxEstimation, EstimationError> {
        let result = self.run_recalculation(estimation_id, requested_by).await;
        record_outcome(&CALCULATIONS_TOTAL, &result);
        result
    }

    async fn run_recalculation(
        &self,
        estimation_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<TaxEstimation, EstimationError> {
        let existing = self.get(estimation_id).await?;
        if existing.is_final {
            return Err(EstimationError::Finalized(estimation_id));
        }

        let as_of = Utc::now().date_naive();
        let tables = self.resolve_tables(as_of).await?;
        let calculation = self.compute(&existing.inputs, &tables, as_of)?;

        let revision = EstimationRevision {
            isv_table_version: Some(tables.cylinder.version.clone()),
            calculation_details: encode_details(&calculation)?,
            computed: calculation.computed,
        };

        let estimation = self
            .bounded(self.backends.store.revise(estimation_id, revision))
            .await?;

        info!(
            calculation_version = estimation.calculation_version,
            total_estimated_cost = %estimation.computed.total_estimated_cost,
            "Tax estimation recalculated"
        );

        self.emit_audit(AuditAction::Recalculate, &estimation, requested_by)
            .await;

        Ok(estimation)
    }

    /// Approves a draft. A second approval fails with `AlreadyFinal`.
    #[instrument(skip(self), fields(estimation_id = %estimation_id, approved_by = %approved_by))]
    pub async fn finalize(
        &self,
        estimation_id: Uuid,
        approved_by: Uuid,
    ) -> Result<TaxEstimation, EstimationError> {
        let result = self
            .bounded(self.backends.store.finalize(estimation_id, approved_by))
            .await;
        record_outcome(&FINALIZATIONS_TOTAL, &result);

        let estimation = result?;
        info!(case_id = %estimation.case_id, "Tax estimation finalized");

        self.emit_audit(AuditAction::Approve, &estimation, Some(approved_by))
            .await;

        Ok(estimation)
    }

    pub async fn get(&self, estimation_id: Uuid) -> Result<TaxEstimation, EstimationError> {
        self.bounded(self.backends.store.get(estimation_id))
            .await?
            .ok_or(EstimationError::EstimationNotFound(estimation_id))
    }

    /// Every version for a known case, ascending.
    pub async fn list_for_case(&self, case_id: Uuid) -> Result<Vec<TaxEstimation>, EstimationError> {
        self.backends.cases.tenant_for_case(case_id).await?;
        self.bounded(self.backends.store.list_for_case(case_id))
            .await
    }

    pub async fn latest_for_case(
        &self,
        case_id: Uuid,
    ) -> Result<Option<TaxEstimation>, EstimationError> {
        Ok(self.list_for_case(case_id).await?.pop())
    }

    pub async fn health_check(&self) -> Result<(), EstimationError> {
        self.bounded(self.backends.store.health_check()).await
    }

    async fn resolve_tables(&self, as_of: NaiveDate) -> Result<ResolvedTables, EstimationError> {
        let tables = &self.backends.tables;

        let cylinder = tables.resolve(TaxTableKind::CylinderCapacity, as_of).await?;
        let co2 = tables.resolve(TaxTableKind::Co2Emissions, as_of).await?;
        let circulation = match self.config.iuc_source {
            IucSource::Fixed => None,
            IucSource::Table => Some(tables.resolve(TaxTableKind::CirculationFee, as_of).await?),
        };

        Ok(ResolvedTables {
            cylinder,
            co2,
            circulation,
        })
    }

    fn compute(
        &self,
        inputs: &EstimationInputs,
        tables: &ResolvedTables,
        as_of: NaiveDate,
    ) -> Result<Calculation, EstimationError> {
        let calculation = aggregate::estimate(
            inputs,
            tables,
            self.config.iva_rate,
            self.config.iuc_source,
            as_of,
        )?;

        for kind in calculation.bracket_misses() {
            BRACKET_MISSES_TOTAL
                .with_label_values(&[kind.as_str()])
                .inc();
            warn!(
                kind = %kind,
                engine_capacity = inputs.engine_capacity,
                co2_emissions = inputs.co2_emissions,
                "Input matched no bracket, component contributes zero"
            );
        }

        Ok(calculation)
    }

    /// Audit failures are logged and counted; the estimation stands.
    async fn emit_audit(
        &self,
        action: AuditAction,
        estimation: &TaxEstimation,
        user_id: Option<Uuid>,
    ) {
        let entry = AuditEntry::for_estimation(action, estimation, user_id);
        if let Err(e) = self.bounded(self.backends.audit.record(entry)).await {
            AUDIT_FAILURES_TOTAL.inc();
            warn!(
                action = action.as_str(),
                estimation_id = %estimation.estimation_id,
                error = %e,
                "Failed to record audit entry"
            );
        }
    }
}

async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, EstimationError>
where
    F: Future<Output = Result<T, EstimationError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| EstimationError::Timeout)?
}

fn encode_details(calculation: &Calculation) -> Result<serde_json::Value, EstimationError> {
    serde_json::to_value(&calculation.details).map_err(|e| {
        EstimationError::Persistence(format!("Failed to encode calculation details: {}", e))
    })
}

fn record_outcome<T>(counter: &prometheus::CounterVec, result: &Result<T, EstimationError>) {
    match result {
        Ok(_) => counter.with_label_values(&["success"]).inc(),
        Err(e) => {
            counter.with_label_values(&["failure"]).inc();
            ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bracket, CreateTaxTable};
    use crate::services::{AuditSink, CaseDirectory, InMemoryBackend, TaxTableRepository};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn seeded() -> (InMemoryBackend, Uuid) {
        let backend = InMemoryBackend::new();
        for (kind, brackets) in [
            (
                TaxTableKind::CylinderCapacity,
                vec![
                    Bracket::new(dec!(0), dec!(1250), dec!(1.12)),
                    Bracket::new(dec!(1251), dec!(99999), dec!(5.61)),
                ],
            ),
            (
                TaxTableKind::Co2Emissions,
                vec![
                    Bracket::new(dec!(0), dec!(115), dec!(4.62)),
                    Bracket::new(dec!(116), dec!(9999), dec!(52.16)),
                ],
            ),
        ] {
            backend
                .insert(CreateTaxTable {
                    kind,
                    version: "2024".to_string(),
                    effective_date: "2024-01-01".parse().unwrap(),
                    end_date: None,
                    brackets,
                    notes: None,
                })
                .await
                .unwrap();
        }
        let case_id = Uuid::new_v4();
        backend.register_case(case_id, Uuid::new_v4()).await;
        (backend, case_id)
    }

    fn request(case_id: Uuid) -> CalculateRequest {
        CalculateRequest {
            case_id,
            engine_capacity: 1600,
            co2_emissions: 125,
            vehicle_age_months: 24,
            vehicle_value: dec!(20000),
            fuel_type: "GASOLINE".to_string(),
            as_of_date: Some("2024-06-01".parse().unwrap()),
            calculated_by: None,
        }
    }

    #[tokio::test]
    async fn test_calculate_persists_unrounded_fields_and_audits() {
        let (backend, case_id) = seeded().await;
        let engine =
            EstimationEngine::new(Backends::in_memory(backend.clone()), EngineConfig::default());

        let estimation = engine.calculate(&request(case_id)).await.unwrap();
        assert_eq!(estimation.calculation_version, 1);
        assert_eq!(estimation.computed.total_estimated_cost, dec!(33251.3808));
        assert_eq!(estimation.isv_table_version.as_deref(), Some("2024"));
        assert!(!estimation.is_final);

        let audit = backend.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::Calculate);
        assert_eq!(audit[0].entity_id, estimation.estimation_id);
    }

    #[tokio::test]
    async fn test_missing_table_persists_nothing() {
        let backend = InMemoryBackend::new();
        let case_id = Uuid::new_v4();
        backend.register_case(case_id, Uuid::new_v4()).await;
        let engine =
            EstimationEngine::new(Backends::in_memory(backend.clone()), EngineConfig::default());

        let result = engine.calculate(&request(case_id)).await;
        assert!(matches!(
            result,
            Err(EstimationError::TableNotFound {
                kind: TaxTableKind::CylinderCapacity,
                ..
            })
        ));
        assert!(engine.list_for_case(case_id).await.unwrap().is_empty());
        assert!(backend.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_case_is_rejected() {
        let (backend, _) = seeded().await;
        let engine = EstimationEngine::new(Backends::in_memory(backend), EngineConfig::default());

        let result = engine.calculate(&request(Uuid::new_v4())).await;
        assert!(matches!(result, Err(EstimationError::CaseNotFound(_))));
    }

    #[tokio::test]
    async fn test_recalculate_keeps_version_and_rejects_final() {
        let (backend, case_id) = seeded().await;
        let engine =
            EstimationEngine::new(Backends::in_memory(backend.clone()), EngineConfig::default());

        let created = engine.calculate(&request(case_id)).await.unwrap();
        let revised = engine
            .recalculate(created.estimation_id, None)
            .await
            .unwrap();
        assert_eq!(revised.calculation_version, created.calculation_version);
        assert_eq!(revised.computed, created.computed);

        engine
            .finalize(created.estimation_id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(matches!(
            engine.recalculate(created.estimation_id, None).await,
            Err(EstimationError::Finalized(_))
        ));

        let actions: Vec<AuditAction> = backend
            .audit_entries()
            .await
            .iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Calculate,
                AuditAction::Recalculate,
                AuditAction::Approve
            ]
        );
    }

    #[tokio::test]
    async fn test_custom_iva_rate() {
        let (backend, case_id) = seeded().await;
        let config = EngineConfig {
            iva_rate: dec!(6),
            ..EngineConfig::default()
        };
        let engine = EstimationEngine::new(Backends::in_memory(backend), config);

        let estimation = engine.calculate(&request(case_id)).await.unwrap();
        assert_eq!(estimation.computed.iva_rate, dec!(6));
        assert_eq!(
            estimation.computed.iva_amount,
            estimation.computed.iva_base * dec!(6) / dec!(100)
        );
    }

    #[tokio::test]
    async fn test_latest_for_case() {
        let (backend, case_id) = seeded().await;
        let engine = EstimationEngine::new(Backends::in_memory(backend), EngineConfig::default());

        assert!(engine.latest_for_case(case_id).await.unwrap().is_none());
        engine.calculate(&request(case_id)).await.unwrap();
        let second = engine.calculate(&request(case_id)).await.unwrap();

        let latest = engine.latest_for_case(case_id).await.unwrap().unwrap();
        assert_eq!(latest.estimation_id, second.estimation_id);
        assert_eq!(latest.calculation_version, 2);
    }

    struct FailingAudit;

    #[async_trait::async_trait]
    impl AuditSink for FailingAudit {
        async fn record(&self, _entry: AuditEntry) -> Result<(), EstimationError> {
            Err(EstimationError::Persistence("audit log unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_calculation() {
        let (backend, case_id) = seeded().await;
        let mut backends = Backends::in_memory(backend.clone());
        backends.audit = Arc::new(FailingAudit);
        let engine = EstimationEngine::new(backends, EngineConfig::default());

        let estimation = engine.calculate(&request(case_id)).await.unwrap();
        let stored = engine.get(estimation.estimation_id).await.unwrap();
        assert_eq!(stored.calculation_version, 1);
    }

    struct SlowCases {
        inner: InMemoryBackend,
    }

    #[async_trait::async_trait]
    impl CaseDirectory for SlowCases {
        async fn tenant_for_case(&self, case_id: Uuid) -> Result<Uuid, EstimationError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.tenant_for_case(case_id).await
        }
    }

    #[tokio::test]
    async fn test_timeout_bounds_store_writes_not_lookups() {
        let (backend, case_id) = seeded().await;
        let mut backends = Backends::in_memory(backend.clone());
        backends.cases = Arc::new(SlowCases { inner: backend });
        let config = EngineConfig {
            persistence_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let engine = EstimationEngine::new(backends, config);

        let estimation = engine.calculate(&request(case_id)).await.unwrap();
        assert_eq!(estimation.calculation_version, 1);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), EstimationError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(EstimationError::Timeout)));
    }
}
