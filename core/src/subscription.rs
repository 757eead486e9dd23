//! Subscription state for astro-ledger.
//!
//! A subscription is a time-bound override: while it is effective, every
//! guarded feature is allowed without spending credits.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A user's subscription record.
///
/// Only the payment reconciler writes these. Expiry is evaluated by time
/// comparison at read time; nothing sweeps expired records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// The subscriber.
    pub user_id: UserId,

    /// Plan identifier (e.g. `premium`).
    pub plan_id: String,

    /// Whether the subscription is switched on.
    pub active: bool,

    /// End of the paid period. `None` means open-ended (lifetime plans).
    pub expires_at: Option<DateTime<Utc>>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Whether the subscription overrides credit checks at `now`.
    #[must_use]
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |expires_at| now < expires_at)
    }

    /// Status bucket used by admin aggregates.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        if !self.active {
            SubscriptionStatus::Inactive
        } else if self.is_effective(now) {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Expired
        }
    }

    /// Activate or extend a subscription.
    ///
    /// A renewal of a still-effective plan extends from the current expiry
    /// rather than from `now`, so paying early never loses days. `None` for
    /// `duration` makes the subscription open-ended.
    #[must_use]
    pub fn activate(
        existing: Option<&Self>,
        user_id: UserId,
        plan_id: &str,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = duration.map(|duration| {
            let start = existing
                .filter(|sub| sub.is_effective(now))
                .and_then(|sub| sub.expires_at)
                .map_or(now, |expires_at| expires_at.max(now));
            start + duration
        });

        Self {
            user_id,
            plan_id: plan_id.to_string(),
            active: true,
            expires_at,
            updated_at: now,
        }
    }

    /// Switch the subscription off.
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.updated_at = now;
    }
}

/// Status of a subscription at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Active and unexpired.
    Active,

    /// Active flag set but past `expires_at`.
    Expired,

    /// Switched off.
    Inactive,
}
