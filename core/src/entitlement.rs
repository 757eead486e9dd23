//! Entitlement resolution.
//!
//! [`resolve`] is a pure function of a policy, the user's subscription and
//! their account. It never mutates anything; the decision may be stale by the
//! time the caller spends, which is why the spend re-validates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Account, CreditType, FeaturePolicy, PolicyRegistry, SubscriptionRecord, UserId};

/// How access was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessVia {
    /// An effective subscription covers the feature.
    Subscription,

    /// The credit balance covers one use.
    Credit,
}

/// Result of an access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether the feature may be used.
    pub allowed: bool,

    /// How access was granted. `None` when denied.
    pub via: Option<AccessVia>,

    /// Credit type the feature spends.
    pub credit_type: CreditType,

    /// Current balance of that credit type.
    pub remaining: i64,

    /// Credits one use costs.
    pub cost_per_use: i64,

    /// Where to send the user to buy more. Only set when denied.
    pub redirect_hint: Option<String>,
}

/// Purchase path for a feature, relative to the frontend.
#[must_use]
pub fn purchase_path(feature_key: &str, credit_type: CreditType) -> String {
    format!("/purchase?feature={feature_key}&credit_type={credit_type}")
}

/// Decide whether the user may use a feature.
///
/// A missing account reads as all-zero balances.
#[must_use]
pub fn resolve(
    policy: &FeaturePolicy,
    subscription: Option<&SubscriptionRecord>,
    account: Option<&Account>,
    now: DateTime<Utc>,
) -> AccessDecision {
    let remaining = account.map_or(0, |account| account.balance(policy.credit_type));

    let (allowed, via) = if subscription.is_some_and(|sub| sub.is_effective(now)) {
        (true, Some(AccessVia::Subscription))
    } else if remaining >= policy.cost_per_use {
        (true, Some(AccessVia::Credit))
    } else {
        (false, None)
    };

    AccessDecision {
        allowed,
        via,
        credit_type: policy.credit_type,
        remaining,
        cost_per_use: policy.cost_per_use,
        redirect_hint: (!allowed)
            .then(|| purchase_path(&policy.feature_key, policy.credit_type)),
    }
}

/// Point-in-time view of a user's entitlements, served to clients for
/// caching. Never authoritative: the server re-decides on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    /// The user.
    pub user_id: UserId,

    /// Canonical balances.
    pub balances: BTreeMap<CreditType, i64>,

    /// Legacy mirror, for clients that still read the old names.
    #[serde(default)]
    pub legacy_balances: BTreeMap<CreditType, i64>,

    /// Subscription record, if any.
    pub subscription: Option<SubscriptionRecord>,

    /// Whether the subscription was effective at `generated_at`.
    pub subscription_effective: bool,

    /// Every feature policy.
    pub policies: Vec<FeaturePolicy>,

    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

impl EntitlementSnapshot {
    /// Build a snapshot. A missing account reads as all-zero balances.
    #[must_use]
    pub fn build(
        user_id: UserId,
        account: Option<Account>,
        subscription: Option<SubscriptionRecord>,
        policies: &PolicyRegistry,
        now: DateTime<Utc>,
    ) -> Self {
        let account = account.unwrap_or_else(|| Account::new(user_id.clone(), now));
        Self {
            subscription_effective: subscription
                .as_ref()
                .is_some_and(|sub| sub.is_effective(now)),
            user_id,
            balances: account.balances,
            legacy_balances: account.legacy_balances,
            subscription,
            policies: policies.iter().cloned().collect(),
            generated_at: now,
        }
    }

    /// Rebuild the account view held by this snapshot.
    #[must_use]
    pub fn account(&self) -> Account {
        let mut account = Account {
            user_id: self.user_id.clone(),
            balances: self.balances.clone(),
            legacy_balances: self.legacy_balances.clone(),
            created_at: self.generated_at,
            updated_at: self.generated_at,
        };
        account.normalize();
        account
    }

    /// Look up a policy carried by the snapshot.
    #[must_use]
    pub fn policy(&self, feature_key: &str) -> Option<&FeaturePolicy> {
        self.policies
            .iter()
            .find(|policy| policy.feature_key == feature_key)
    }
}

/// Lifecycle of one feature-use request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureUseState {
    /// Request received.
    Requested,
    /// Looking up policy and entitlement.
    Resolving,
    /// Covered by subscription; nothing is spent.
    AllowedViaSubscription,
    /// Covered by credit; a spend follows.
    AllowedViaCredit,
    /// Spend in progress.
    Spending,
    /// Spend committed.
    Spent,
    /// Access refused.
    Denied,
}

impl FeatureUseState {
    /// Whether the request has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Spent | Self::Denied | Self::AllowedViaSubscription
        )
    }

    /// State following an access decision.
    #[must_use]
    pub const fn after_decision(decision: &AccessDecision) -> Self {
        match decision.via {
            Some(AccessVia::Subscription) => Self::AllowedViaSubscription,
            Some(AccessVia::Credit) => Self::AllowedViaCredit,
            None => Self::Denied,
        }
    }
}
