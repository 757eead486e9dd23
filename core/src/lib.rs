//! Core types for astro-ledger.
//!
//! This crate provides the domain model of the entitlement and credit ledger:
//!
//! - **Identifiers**: `UserId`, `AdjustmentId`
//! - **Credits**: `CreditType`, `AdjustmentRecord`, `AdjustmentReason`
//! - **Accounts**: `Account`, `LedgerMutation`, `MutationContext`
//! - **Subscriptions**: `SubscriptionRecord`, `SubscriptionStatus`
//! - **Policies**: `FeaturePolicy`, `PolicyRegistry`
//! - **Entitlements**: `AccessDecision`, `resolve`, `FeatureUseState`
//! - **Payments**: `ProductCatalog`, `PaymentEvent`, `ProcessedPayment`
//!
//! # Balances
//!
//! Balances are whole credits stored as `i64` and never go below zero.
//! `ai_guru` and `kundali` also keep a legacy mirror
//! (`legacy_ai_question`, `legacy_kundali_basic`) that always moves with the
//! canonical value.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod catalog;
pub mod credits;
pub mod entitlement;
pub mod error;
pub mod ids;
pub mod payment;
pub mod policy;
pub mod subscription;

pub use account::{Account, AppliedMutation, LedgerMutation, MutationContext};
pub use catalog::{ProductCatalog, ProductGrant};
pub use credits::{AdjustmentReason, AdjustmentRecord, CreditType};
pub use entitlement::{
    purchase_path, resolve, AccessDecision, AccessVia, EntitlementSnapshot, FeatureUseState,
};
pub use error::{LedgerError, Result};
pub use ids::{AdjustmentId, IdError, UserId, MAX_USER_ID_LEN};
pub use payment::{
    PaymentAction, PaymentEvent, PaymentFailure, ProcessedPayment, EVENT_ORDER_PAID,
    EVENT_PAYMENT_CAPTURED, EVENT_SUBSCRIPTION_CANCELLED, PAYMENTS_ACTOR,
};
pub use policy::{FeaturePolicy, PolicyRegistry};
pub use subscription::{SubscriptionRecord, SubscriptionStatus};
