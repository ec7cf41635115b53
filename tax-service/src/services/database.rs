//! Database service for tax-service.

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::NaiveDate;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::metrics::DB_QUERY_DURATION;
use super::repository::{
    warn_coverage_gaps, AuditSink, CaseDirectory, EstimationStore, TaxTableRepository,
};
use crate::error::EstimationError;
use crate::models::{
    AuditEntry, CreateEstimation, CreateTaxTable, EstimationRevision, TaxEstimation, TaxTable,
    TaxTableData, TaxTableKind,
};

const TAX_TABLE_COLUMNS: &str =
    "tax_table_id, kind, version, effective_date, end_date, data, is_active, notes, created_utc";

const ESTIMATION_COLUMNS: &str = r#"
    estimation_id, tenant_id, case_id, calculation_version, calculated_at, calculated_by,
    vehicle_value, vehicle_age_months, engine_capacity, co2_emissions, fuel_type,
    depreciation_rate, depreciated_value, isv_cylinder, isv_co2, isv_total,
    isv_reduction_percentage, isv_final, isv_table_version, iva_rate, iva_base, iva_amount,
    iuc_estimated, total_estimated_cost, calculation_details,
    is_final, approved_by, approved_at, created_utc, updated_utc
"#;

/// Seeds the counter from existing rows the first time a case is seen. The
/// row lock taken here is held until commit, serialising writers per case.
const NEXT_VERSION: &str = r#"
    INSERT INTO estimation_version_counters (case_id, last_version)
    VALUES (
        $1,
        (SELECT COALESCE(MAX(calculation_version), 0) + 1 FROM tax_estimations WHERE case_id = $1)
    )
    ON CONFLICT (case_id)
    DO UPDATE SET last_version = estimation_version_counters.last_version + 1
    RETURNING last_version
"#;

/// Unique violation, serialization failure, deadlock.
fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("23505" | "40001" | "40P01"))
        }
        _ => false,
    }
}

fn persistence_error(operation: &str, err: sqlx::Error) -> EstimationError {
    error!(operation, error = %err, "Database operation failed");
    EstimationError::Persistence(format!("{} failed: {}", operation, err))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    version_allocation_retries: u32,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "tax-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            version_allocation_retries: 3,
        }
    }

    pub fn with_version_allocation_retries(mut self, retries: u32) -> Self {
        self.version_allocation_retries = retries;
        self
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Mirror a case-management record locally.
    #[instrument(skip(self))]
    pub async fn register_case(&self, case_id: Uuid, tenant_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO import_cases (case_id, tenant_id)
            VALUES ($1, $2)
            ON CONFLICT (case_id) DO UPDATE SET tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(case_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to register case: {}", e)))?;
        Ok(())
    }

    /// One allocation attempt: counter upsert and insert commit together or
    /// not at all.
    async fn insert_next_version(
        &self,
        input: &CreateEstimation,
    ) -> Result<TaxEstimation, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let calculation_version: i32 = sqlx::query_scalar(NEXT_VERSION)
            .bind(input.case_id)
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO tax_estimations (
                estimation_id, tenant_id, case_id, calculation_version, calculated_by,
                vehicle_value, vehicle_age_months, engine_capacity, co2_emissions, fuel_type,
                depreciation_rate, depreciated_value, isv_cylinder, isv_co2, isv_total,
                isv_reduction_percentage, isv_final, isv_table_version, iva_rate, iva_base,
                iva_amount, iuc_estimated, total_estimated_cost, calculation_details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24)
            RETURNING {}
            "#,
            ESTIMATION_COLUMNS
        );

        let computed = &input.computed;
        let estimation = sqlx::query_as::<_, TaxEstimation>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.tenant_id)
            .bind(input.case_id)
            .bind(calculation_version)
            .bind(input.calculated_by)
            .bind(input.inputs.vehicle_value)
            .bind(input.inputs.vehicle_age_months)
            .bind(input.inputs.engine_capacity)
            .bind(input.inputs.co2_emissions)
            .bind(&input.inputs.fuel_type)
            .bind(computed.depreciation_rate)
            .bind(computed.depreciated_value)
            .bind(computed.isv_cylinder)
            .bind(computed.isv_co2)
            .bind(computed.isv_total)
            .bind(computed.isv_reduction_percentage)
            .bind(computed.isv_final)
            .bind(&input.isv_table_version)
            .bind(computed.iva_rate)
            .bind(computed.iva_base)
            .bind(computed.iva_amount)
            .bind(computed.iuc_estimated)
            .bind(computed.total_estimated_cost)
            .bind(&input.calculation_details)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(estimation)
    }

    async fn is_final(&self, estimation_id: Uuid) -> Result<Option<bool>, EstimationError> {
        sqlx::query_scalar::<_, bool>("SELECT is_final FROM tax_estimations WHERE estimation_id = $1")
            .bind(estimation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_error("check_estimation_state", e))
    }
}

#[async_trait]
impl TaxTableRepository for Database {
    #[instrument(skip(self), fields(kind = %kind, as_of = %as_of))]
    async fn resolve(
        &self,
        kind: TaxTableKind,
        as_of: NaiveDate,
    ) -> Result<TaxTable, EstimationError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["resolve_tax_table"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {}
            FROM tax_tables
            WHERE kind = $1
              AND is_active
              AND effective_date <= $2
              AND (end_date IS NULL OR end_date > $2)
            ORDER BY effective_date DESC, inserted_seq DESC
            LIMIT 1
            "#,
            TAX_TABLE_COLUMNS
        );

        let table = sqlx::query_as::<_, TaxTable>(&sql)
            .bind(kind.as_str())
            .bind(as_of)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_error("resolve_tax_table", e))?
            .ok_or(EstimationError::TableNotFound { kind, as_of })?;

        timer.observe_duration();

        warn_coverage_gaps(&table);
        Ok(table)
    }

    #[instrument(skip(self, input), fields(kind = %input.kind, version = %input.version))]
    async fn insert(&self, input: CreateTaxTable) -> Result<TaxTable, EstimationError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_tax_table"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO tax_tables (tax_table_id, kind, version, effective_date, end_date, data, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TAX_TABLE_COLUMNS
        );

        let table = sqlx::query_as::<_, TaxTable>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.kind.as_str())
            .bind(&input.version)
            .bind(input.effective_date)
            .bind(input.end_date)
            .bind(Json(TaxTableData {
                brackets: input.brackets.clone(),
            }))
            .bind(&input.notes)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| persistence_error("insert_tax_table", e))?;

        timer.observe_duration();

        warn_coverage_gaps(&table);
        info!(tax_table_id = %table.tax_table_id, "Tax table stored");
        Ok(table)
    }
}

#[async_trait]
impl CaseDirectory for Database {
    #[instrument(skip(self), fields(case_id = %case_id))]
    async fn tenant_for_case(&self, case_id: Uuid) -> Result<Uuid, EstimationError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["tenant_for_case"])
            .start_timer();

        let tenant_id =
            sqlx::query_scalar::<_, Uuid>("SELECT tenant_id FROM import_cases WHERE case_id = $1")
                .bind(case_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| persistence_error("tenant_for_case", e))?;

        timer.observe_duration();

        tenant_id.ok_or(EstimationError::CaseNotFound(case_id))
    }
}

#[async_trait]
impl EstimationStore for Database {
    #[instrument(skip(self, input), fields(case_id = %input.case_id, tenant_id = %input.tenant_id))]
    async fn create(&self, input: CreateEstimation) -> Result<TaxEstimation, EstimationError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_estimation"])
            .start_timer();

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(200),
            max_elapsed_time: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let max_attempts = self.version_allocation_retries + 1;
        let mut attempt = 0u32;

        let result = retry(backoff, || {
            attempt += 1;
            let attempt = attempt;
            let max_attempts = max_attempts;
            let input = &input;
            async move {
                self.insert_next_version(input).await.map_err(|e| {
                    if is_retryable(&e) && attempt < max_attempts {
                        warn!(attempt, error = %e, "Version allocation conflict, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await;

        let estimation = result.map_err(|e| persistence_error("create_estimation", e))?;

        timer.observe_duration();

        info!(
            estimation_id = %estimation.estimation_id,
            calculation_version = estimation.calculation_version,
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
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revise_estimation"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE tax_estimations
            SET depreciation_rate = $2, depreciated_value = $3, isv_cylinder = $4, isv_co2 = $5,
                isv_total = $6, isv_reduction_percentage = $7, isv_final = $8,
                isv_table_version = $9, iva_rate = $10, iva_base = $11, iva_amount = $12,
                iuc_estimated = $13, total_estimated_cost = $14, calculation_details = $15,
                calculated_at = NOW(), updated_utc = NOW()
            WHERE estimation_id = $1 AND is_final = FALSE
            RETURNING {}
            "#,
            ESTIMATION_COLUMNS
        );

        let computed = &revision.computed;
        let updated = sqlx::query_as::<_, TaxEstimation>(&sql)
            .bind(estimation_id)
            .bind(computed.depreciation_rate)
            .bind(computed.depreciated_value)
            .bind(computed.isv_cylinder)
            .bind(computed.isv_co2)
            .bind(computed.isv_total)
            .bind(computed.isv_reduction_percentage)
            .bind(computed.isv_final)
            .bind(&revision.isv_table_version)
            .bind(computed.iva_rate)
            .bind(computed.iva_base)
            .bind(computed.iva_amount)
            .bind(computed.iuc_estimated)
            .bind(computed.total_estimated_cost)
            .bind(&revision.calculation_details)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_error("revise_estimation", e))?;

        timer.observe_duration();

        match updated {
            Some(estimation) => Ok(estimation),
            None => match self.is_final(estimation_id).await? {
                Some(_) => Err(EstimationError::Finalized(estimation_id)),
                None => Err(EstimationError::EstimationNotFound(estimation_id)),
            },
        }
    }

    #[instrument(skip(self), fields(estimation_id = %estimation_id))]
    async fn finalize(
        &self,
        estimation_id: Uuid,
        approved_by: Uuid,
    ) -> Result<TaxEstimation, EstimationError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["finalize_estimation"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE tax_estimations
            SET is_final = TRUE, approved_by = $2, approved_at = NOW(), updated_utc = NOW()
            WHERE estimation_id = $1 AND is_final = FALSE
            RETURNING {}
            "#,
            ESTIMATION_COLUMNS
        );

        let updated = sqlx::query_as::<_, TaxEstimation>(&sql)
            .bind(estimation_id)
            .bind(approved_by)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_error("finalize_estimation", e))?;

        timer.observe_duration();

        match updated {
            Some(estimation) => {
                info!(approved_by = %approved_by, "Tax estimation finalized");
                Ok(estimation)
            }
            None => match self.is_final(estimation_id).await? {
                Some(_) => Err(EstimationError::AlreadyFinal(estimation_id)),
                None => Err(EstimationError::EstimationNotFound(estimation_id)),
            },
        }
    }

    #[instrument(skip(self), fields(estimation_id = %estimation_id))]
    async fn get(&self, estimation_id: Uuid) -> Result<Option<TaxEstimation>, EstimationError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_estimation"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM tax_estimations WHERE estimation_id = $1",
            ESTIMATION_COLUMNS
        );
        let estimation = sqlx::query_as::<_, TaxEstimation>(&sql)
            .bind(estimation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| persistence_error("get_estimation", e))?;

        timer.observe_duration();
        Ok(estimation)
    }

    #[instrument(skip(self), fields(case_id = %case_id))]
    async fn list_for_case(&self, case_id: Uuid) -> Result<Vec<TaxEstimation>, EstimationError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_estimations"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM tax_estimations WHERE case_id = $1 ORDER BY calculation_version ASC",
            ESTIMATION_COLUMNS
        );
        let estimations = sqlx::query_as::<_, TaxEstimation>(&sql)
            .bind(case_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| persistence_error("list_estimations", e))?;

        timer.observe_duration();
        Ok(estimations)
    }

    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), EstimationError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| persistence_error("health_check", e))?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for Database {
    #[instrument(skip(self, entry), fields(action = entry.action.as_str(), entity_id = %entry.entity_id))]
    async fn record(&self, entry: AuditEntry) -> Result<(), EstimationError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_audit"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO audit_logs (audit_id, tenant_id, case_id, user_id, action, entity_type, entity_id, new_values, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.tenant_id)
        .bind(entry.case_id)
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.new_values)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| persistence_error("record_audit", e))?;

        timer.observe_duration();
        Ok(())
    }
}
