//! HTTP handlers for tax-service.

pub mod estimations;
pub mod health;

pub use estimations::{
    create_estimation, finalize_estimation, get_estimation, latest_case_estimation,
    list_case_estimations, recalculate_estimation,
};
pub use health::{health_check, metrics_handler, readiness_check};
