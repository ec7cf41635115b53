//! Application startup and lifecycle management.

use crate::config::TaxServiceConfig;
use crate::engine::EstimationEngine;
use crate::handlers;
use crate::services::{init_metrics, Backends, Database};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TaxServiceConfig>,
    pub engine: EstimationEngine,
}

/// HTTP routes of the service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/estimations", post(handlers::create_estimation))
        .route("/estimations/:id", get(handlers::get_estimation))
        .route(
            "/estimations/:id/finalize",
            post(handlers::finalize_estimation),
        )
        .route(
            "/estimations/:id/recalculate",
            post(handlers::recalculate_estimation),
        )
        .route(
            "/cases/:case_id/estimations",
            get(handlers::list_case_estimations),
        )
        .route(
            "/cases/:case_id/estimations/latest",
            get(handlers::latest_case_estimation),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application against PostgreSQL, applying migrations.
    pub async fn build(config: TaxServiceConfig) -> Result<Self, AppError> {
        Self::build_postgres(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: TaxServiceConfig) -> Result<Self, AppError> {
        Self::build_postgres(config, false).await
    }

    async fn build_postgres(config: TaxServiceConfig, run_migrations: bool) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?
        .with_version_allocation_retries(config.database.version_allocation_retries);

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        Self::build_with_backends(config, Backends::postgres(db)).await
    }

    /// Build the application over caller-supplied collaborators.
    pub async fn build_with_backends(
        config: TaxServiceConfig,
        backends: Backends,
    ) -> Result<Self, AppError> {
        init_metrics();

        let engine = EstimationEngine::new(backends, config.engine.clone());
        let state = AppState {
            config: Arc::new(config),
            engine,
        };

        let http_addr = state.config.common.bind_address();
        let http_listener = TcpListener::bind(&http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Tax service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let http_router = router(self.state.clone());

        tracing::info!(
            service = %self.state.config.service_name,
            version = %self.state.config.service_version,
            http_port = self.http_port,
            iva_rate = %self.state.config.engine.iva_rate,
            iuc_source = self.state.config.engine.iuc_source.as_str(),
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, http_router)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
