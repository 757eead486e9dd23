//! Application state.

use std::sync::Arc;

use astro_ledger_core::{PolicyRegistry, ProductCatalog};
use astro_ledger_store::Store;

use crate::auth::JwksCache;
use crate::config::ServiceConfig;
use crate::ledger::Ledger;
use crate::reconcile::PaymentReconciler;

/// Application state shared across handlers.
pub struct AppState {
    /// Entitlement and credit ledger.
    pub ledger: Ledger,

    /// Payment event reconciler.
    pub reconciler: PaymentReconciler,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Identity provider signing keys.
    pub jwks: JwksCache,
}

impl AppState {
    /// Create application state over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policies: PolicyRegistry, config: ServiceConfig) -> Self {
        Self::with_catalog(store, policies, ProductCatalog::default(), config)
    }

    /// Create application state with a custom product catalog.
    #[must_use]
    pub fn with_catalog(
        store: Arc<dyn Store>,
        policies: PolicyRegistry,
        catalog: ProductCatalog,
        config: ServiceConfig,
    ) -> Self {
        if config.payment_webhook_secret.is_none() {
            tracing::warn!("Payment webhook secret not configured - payment events will be rejected");
        }
        if config.allow_test_tokens {
            tracing::warn!("Test tokens enabled - do not run this configuration in production");
        }

        let ledger = Ledger::new(store.clone(), Arc::new(policies));
        let reconciler =
            PaymentReconciler::new(store, Arc::new(catalog), config.payment_retry);

        Self {
            ledger,
            reconciler,
            config,
            jwks: JwksCache::new(),
        }
    }

    /// Absolute purchase URL for a redirect hint path.
    #[must_use]
    pub fn purchase_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.frontend_url.trim_end_matches('/'))
    }
}
