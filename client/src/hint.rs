//! Local, non-authoritative access estimates.

use chrono::{DateTime, Duration, Utc};

use astro_ledger_core::{resolve, AccessDecision, Account, CreditType, EntitlementSnapshot};

use crate::types::ConsumeOutcome;

/// Access estimate computed from a cached [`EntitlementSnapshot`].
///
/// Apps use this to render locks and remaining counts without a round trip.
/// It can be wrong (another device may have spent in the meantime), so it
/// must never gate a spend: the server decides on every consume.
#[derive(Debug, Clone)]
pub struct AccessHint {
    snapshot: EntitlementSnapshot,
    account: Account,
}

impl AccessHint {
    /// Wrap a snapshot fetched from the server.
    #[must_use]
    pub fn new(snapshot: EntitlementSnapshot) -> Self {
        let account = snapshot.account();
        Self { snapshot, account }
    }

    /// The underlying snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &EntitlementSnapshot {
        &self.snapshot
    }

    /// Estimated decision for a feature at `now`. `None` if the snapshot
    /// carries no policy for it.
    #[must_use]
    pub fn estimate(&self, feature_key: &str, now: DateTime<Utc>) -> Option<AccessDecision> {
        let policy = self.snapshot.policy(feature_key)?;
        Some(resolve(
            policy,
            self.snapshot.subscription.as_ref(),
            Some(&self.account),
            now,
        ))
    }

    /// Whether the feature looks usable at `now`.
    #[must_use]
    pub fn can_access(&self, feature_key: &str, now: DateTime<Utc>) -> bool {
        self.estimate(feature_key, now)
            .is_some_and(|decision| decision.allowed)
    }

    /// Cached balance. Legacy names read their canonical type.
    #[must_use]
    pub fn remaining(&self, credit_type: CreditType) -> i64 {
        self.account.balance(credit_type)
    }

    /// Whether the snapshot is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.snapshot.generated_at > max_age
    }

    /// Fold a server-confirmed spend into the cached balances.
    pub fn record_spend(&mut self, outcome: &ConsumeOutcome) {
        let credit_type = outcome.credit_type.canonical();
        self.account.balances.insert(credit_type, outcome.balance);
        if let Some(alias) = credit_type.legacy_alias() {
            self.account.legacy_balances.insert(alias, outcome.balance);
        }
    }
}
