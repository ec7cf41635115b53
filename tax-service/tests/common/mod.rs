//! Test helper module for tax-service integration tests.
//!
//! Boots the real HTTP server on a random port over the in-memory backend.

#![allow(dead_code)]

use rust_decimal_macros::dec;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::time::Duration;
use tax_service::config::{DatabaseConfig, EngineConfig, TaxServiceConfig};
use tax_service::models::{Bracket, CreateTaxTable, TaxTableKind};
use tax_service::services::{Backends, InMemoryBackend, TaxTableRepository};
use tax_service::startup::Application;
use uuid::Uuid;

pub const TEST_TENANT_ID: &str = "11111111-1111-1111-1111-111111111111";

pub fn test_config(engine: EngineConfig) -> TaxServiceConfig {
    TaxServiceConfig {
        common: CoreConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        service_name: "tax-service-test".to_string(),
        service_version: "0.1.0".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
            version_allocation_retries: 3,
        },
        engine,
    }
}

/// Cylinder and CO2 schedules effective from 2024-01-01.
pub fn standard_tables() -> Vec<CreateTaxTable> {
    vec![
        CreateTaxTable {
            kind: TaxTableKind::CylinderCapacity,
            version: "2024".to_string(),
            effective_date: "2024-01-01".parse().unwrap(),
            end_date: None,
            brackets: vec![
                Bracket::new(dec!(0), dec!(1000), dec!(1.04)),
                Bracket::new(dec!(1001), dec!(1250), dec!(1.12)),
                Bracket::new(dec!(1251), dec!(99999), dec!(5.61)),
            ],
            notes: None,
        },
        CreateTaxTable {
            kind: TaxTableKind::Co2Emissions,
            version: "2024".to_string(),
            effective_date: "2024-01-01".parse().unwrap(),
            end_date: None,
            brackets: vec![
                Bracket::new(dec!(0), dec!(115), dec!(4.62)),
                Bracket::new(dec!(116), dec!(9999), dec!(52.16)),
            ],
            notes: None,
        },
    ]
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub backend: InMemoryBackend,
    pub client: reqwest::Client,
    pub tenant_id: Uuid,
}

impl TestApp {
    /// Spawn with default engine settings and the standard tables.
    pub async fn spawn() -> Self {
        Self::spawn_with(EngineConfig::default(), standard_tables()).await
    }

    pub async fn spawn_with(engine: EngineConfig, tables: Vec<CreateTaxTable>) -> Self {
        let backend = InMemoryBackend::new();
        for table in tables {
            backend
                .insert(table)
                .await
                .expect("Failed to seed tax table");
        }

        let app = Application::build_with_backends(
            test_config(engine),
            Backends::in_memory(backend.clone()),
        )
        .await
        .expect("Failed to build test application");

        let port = app.http_port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Self {
            address,
            port,
            backend,
            client,
            tenant_id: Uuid::parse_str(TEST_TENANT_ID).unwrap(),
        }
    }

    /// Register a fresh case for the test tenant.
    pub async fn new_case(&self) -> Uuid {
        let case_id = Uuid::new_v4();
        self.backend.register_case(case_id, self.tenant_id).await;
        case_id
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_estimation(&self, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url("/estimations"))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn finalize(&self, estimation_id: &str, approved_by: Uuid) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/estimations/{}/finalize", estimation_id)))
            .json(&json!({ "approvedBy": approved_by }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let body = response.json().await.expect("Response is not JSON");
        (status, body)
    }
}

/// The worked gasoline example, dated inside the standard tables.
pub fn gasoline_request(case_id: Uuid) -> Value {
    json!({
        "caseId": case_id,
        "engineCapacity": 1600,
        "co2Emissions": 125,
        "vehicleAgeMonths": 24,
        "vehicleValue": 20000,
        "fuelType": "GASOLINE",
        "asOfDate": "2024-06-01"
    })
}

/// Compare a JSON money value against an expected amount.
pub fn assert_money(value: &Value, expected: f64) {
    let actual = value
        .as_f64()
        .unwrap_or_else(|| panic!("expected a number, got {}", value));
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}
