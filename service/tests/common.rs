//! Common test utilities for astro-ledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::{TestRequest, TestResponse, TestServer};
use serde_json::Value;
use tempfile::TempDir;

use astro_ledger_core::{CreditType, PolicyRegistry, UserId};
use astro_ledger_service::crypto::hmac_sha256_hex;
use astro_ledger_service::{create_router, AppState, Ledger, RetryConfig, ServiceConfig};
use astro_ledger_store::{RocksStore, Store};

pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const ADMIN_ID: &str = "support-alice";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const FRONTEND_URL: &str = "https://app.astro.test";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Ledger over the same store, for seeding and direct assertions.
    pub ledger: Ledger,
    /// The store behind the server.
    pub store: Arc<dyn Store>,
    /// A test user ID.
    pub test_user_id: UserId,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store: Arc<dyn Store> =
            Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            auth_base_url: "http://localhost".into(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
            frontend_url: FRONTEND_URL.into(),
            payment_retry: RetryConfig {
                max_retries: 2,
                backoff_ms: 1,
                backoff_factor: 2,
                max_backoff_ms: 5,
            },
            allow_test_tokens: true,
            ..ServiceConfig::default()
        };

        let state = AppState::new(store.clone(), PolicyRegistry::default(), config);
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            ledger: Ledger::new(store.clone(), Arc::new(PolicyRegistry::default())),
            store,
            test_user_id: UserId::generate(),
            _temp_dir: temp_dir,
        }
    }

    /// Give the test user credits directly through the ledger.
    pub fn seed(&self, credit_type: CreditType, amount: i64) {
        self.ledger
            .grant(&self.test_user_id, credit_type, amount, "seed")
            .expect("Failed to seed credits");
    }

    /// Authorization header for the test user.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_user_id)
    }

    /// Check access as a feature backend.
    pub async fn check(&self, user_id: &UserId, feature: &str) -> TestResponse {
        self.server
            .get(&format!("/v1/entitlements/{user_id}/{feature}"))
            .add_header("x-api-key", SERVICE_API_KEY)
            .add_header("x-service-name", "report-engine")
            .await
    }

    /// Consume one use as a feature backend.
    pub async fn consume(&self, user_id: &UserId, feature: &str) -> TestResponse {
        self.server
            .post(&format!("/v1/entitlements/{user_id}/{feature}/consume"))
            .add_header("x-api-key", SERVICE_API_KEY)
            .add_header("x-service-name", "report-engine")
            .await
    }

    /// GET as an admin.
    pub fn admin_get(&self, path: &str) -> TestRequest {
        self.server
            .get(path)
            .add_header("x-admin-key", ADMIN_API_KEY)
            .add_header("x-admin-id", ADMIN_ID)
    }

    /// POST as an admin.
    pub fn admin_post(&self, path: &str) -> TestRequest {
        self.server
            .post(path)
            .add_header("x-admin-key", ADMIN_API_KEY)
            .add_header("x-admin-id", ADMIN_ID)
    }

    /// Post a signed payment webhook.
    pub async fn payment_webhook(&self, event: &Value) -> TestResponse {
        let body = serde_json::to_vec(event).expect("serialize event");
        let signature = hmac_sha256_hex(WEBHOOK_SECRET, &body);
        self.server
            .post("/webhooks/payments")
            .add_header("content-type", "application/json")
            .add_header("x-payment-signature", signature)
            .bytes(body.into())
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
