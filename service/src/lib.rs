//! Astro Ledger HTTP API Service.
//!
//! This crate provides the HTTP API for the entitlement and credit ledger,
//! including:
//!
//! - Feature access checks and credit consumption
//! - Entitlement snapshots for client caching
//! - Admin credit adjustments and read-only support queries
//! - Payment gateway webhooks
//!
//! # Authentication
//!
//! The service supports three authentication methods:
//!
//! 1. **User JWT tokens** - For end-user requests (mobile and web apps)
//! 2. **Service API keys** - For feature backends (chat, reports, scans)
//! 3. **Admin API keys** - For support tooling
//!
//! Webhooks are authenticated by an HMAC-SHA256 signature over the body.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers over the sync store stay async for axum

pub mod auth;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod reconcile;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use engine::{run_guarded, GuardError, Guarded, GuardedFeature};
pub use error::ApiError;
pub use ledger::{AccountDetail, AccountPage, Ledger, Spend, SubscriptionSummary};
pub use reconcile::{PaymentReconciler, ReconcileResult, RetryConfig};
pub use routes::create_router;
pub use state::AppState;
