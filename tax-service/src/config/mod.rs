//! Configuration module for tax-service.

use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::calculation::{iva, IucSource};

#[derive(Debug, Clone)]
pub struct TaxServiceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Extra insert attempts when version allocation hits a conflict.
    pub version_allocation_retries: u32,
}

/// Policy parameters of the calculation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// VAT percentage applied to the IVA base.
    pub iva_rate: Decimal,
    pub iuc_source: IucSource,
    /// Upper bound on each persistence round trip.
    pub persistence_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iva_rate: iva::default_rate(),
            iuc_source: IucSource::Fixed,
            persistence_timeout: Duration::from_millis(5000),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let iva_rate = match env::var("IVA_RATE") {
            Ok(raw) => parse_rate(&raw)?,
            Err(_) => defaults.iva_rate,
        };

        let iuc_source = match env::var("IUC_SOURCE") {
            Ok(raw) => IucSource::from_string(&raw).ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "IUC_SOURCE must be 'fixed' or 'table', got '{}'",
                    raw
                ))
            })?,
            Err(_) => defaults.iuc_source,
        };

        let persistence_timeout = env::var("PERSISTENCE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.persistence_timeout);

        Ok(Self {
            iva_rate,
            iuc_source,
            persistence_timeout,
        })
    }
}

fn parse_rate(raw: &str) -> Result<Decimal, AppError> {
    let rate = Decimal::from_str(raw.trim()).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("IVA_RATE '{}' is not a number: {}", raw, e))
    })?;
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "IVA_RATE must be between 0 and 100, got {}",
            rate
        )));
    }
    Ok(rate)
}

impl TaxServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "tax-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
                version_allocation_retries: env::var("VERSION_ALLOCATION_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            },
            engine: EngineConfig::from_env()?,
        })
    }
}
