//! Audit log entries emitted to the append-only audit sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ENTITY_TAX_ESTIMATION: &str = "TaxEstimation";

/// Audited actions on tax estimations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Calculate,
    Recalculate,
    Approve,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Calculate => "CALCULATE",
            AuditAction::Recalculate => "RECALCULATE",
            AuditAction::Approve => "APPROVE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub case_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub new_values: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditEntry {
    pub fn for_estimation(
        action: AuditAction,
        estimation: &crate::models::TaxEstimation,
        user_id: Option<Uuid>,
    ) -> Self {
        Self {
            action,
            entity_type: ENTITY_TAX_ESTIMATION.to_string(),
            entity_id: estimation.estimation_id,
            tenant_id: Some(estimation.tenant_id),
            case_id: Some(estimation.case_id),
            user_id,
            new_values: serde_json::to_value(estimation).unwrap_or(serde_json::Value::Null),
            created_utc: Utc::now(),
        }
    }
}
