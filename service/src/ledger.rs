//! The ledger service object.
//!
//! [`Ledger`] is the single entry point for entitlement decisions and
//! balance changes. It holds the store and the policy registry by handle, so
//! handlers, the guarded-execution helper and tests share one instance.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info};

use astro_ledger_core::{
    resolve, AccessDecision, AccessVia, Account, AdjustmentId, AdjustmentReason, AdjustmentRecord,
    AppliedMutation, CreditType, EntitlementSnapshot, FeaturePolicy, FeatureUseState,
    LedgerError, LedgerMutation, MutationContext, PaymentFailure, PolicyRegistry,
    SubscriptionRecord, SubscriptionStatus, UserId,
};
use astro_ledger_store::{Result, Store};

/// Page size used when scanning every subscription.
const SUBSCRIPTION_SCAN_PAGE: usize = 500;

/// Outcome of a spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spend {
    /// How access was granted.
    pub via: AccessVia,

    /// Credit type the feature spends.
    pub credit_type: CreditType,

    /// Credits taken by this request (0 under a subscription).
    pub consumed: i64,

    /// Balance after the spend.
    pub balance: i64,

    /// Whether this outcome was replayed from an earlier identical request.
    pub replayed: bool,

    /// Audit record of the spend, if credits moved.
    pub adjustment_id: Option<AdjustmentId>,
}

impl Spend {
    fn from_applied(credit_type: CreditType, applied: &AppliedMutation) -> Self {
        Self {
            via: AccessVia::Credit,
            credit_type,
            consumed: -applied.records.iter().map(|record| record.delta).sum::<i64>(),
            balance: applied.account.balance(credit_type),
            replayed: applied.replayed,
            adjustment_id: applied.records.first().map(|record| record.id),
        }
    }
}

/// Per-user detail for support tooling.
#[derive(Debug, Clone, Serialize)]
pub struct AccountDetail {
    /// The account (all-zero when the user only has a subscription).
    pub account: Account,

    /// Subscription record, if any.
    pub subscription: Option<SubscriptionRecord>,

    /// Subscription status now.
    pub subscription_status: Option<SubscriptionStatus>,

    /// Most recent adjustments, newest first.
    pub recent_adjustments: Vec<AdjustmentRecord>,
}

/// One page of the account listing.
#[derive(Debug, Clone, Serialize)]
pub struct AccountPage {
    /// Accounts on this page, ordered by user ID.
    pub accounts: Vec<Account>,

    /// Cursor for the next page, if there may be one.
    pub next_cursor: Option<UserId>,
}

/// Aggregate subscription counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionSummary {
    /// Active and unexpired.
    pub active: u64,
    /// Active flag set but past expiry.
    pub expired: u64,
    /// Switched off.
    pub inactive: u64,
    /// All subscription records.
    pub total: u64,
}

/// Entitlement and credit ledger service.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    policies: Arc<PolicyRegistry>,
}

impl Ledger {
    /// Create a ledger over a store and a policy registry.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, policies: Arc<PolicyRegistry>) -> Self {
        Self { store, policies }
    }

    /// The policy registry.
    #[must_use]
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Resolve a feature policy, logging unknown keys as configuration bugs.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::PolicyNotFound` for an unregistered feature.
    pub fn policy(&self, feature_key: &str) -> std::result::Result<&FeaturePolicy, LedgerError> {
        self.policies.resolve(feature_key).map_err(|err| {
            error!(feature_key = %feature_key, "No access policy for feature");
            err
        })
    }

    // =========================================================================
    // Entitlements
    // =========================================================================

    /// Decide whether a user may use a feature. Never mutates.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(PolicyNotFound)` for an unregistered feature.
    /// - Storage errors.
    pub fn check_access(&self, user_id: &UserId, feature_key: &str) -> Result<AccessDecision> {
        let policy = self.policy(feature_key)?;
        let subscription = self.store.get_subscription(user_id)?;
        let account = self.store.get_account(user_id)?;

        let decision = resolve(policy, subscription.as_ref(), account.as_ref(), Utc::now());
        debug!(
            user_id = %user_id,
            feature_key = %feature_key,
            allowed = decision.allowed,
            via = ?decision.via,
            remaining = decision.remaining,
            "Access checked"
        );
        Ok(decision)
    }

    /// Snapshot of balances, subscription and policies for client caching.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn snapshot(&self, user_id: &UserId) -> Result<EntitlementSnapshot> {
        let account = self.store.get_account(user_id)?;
        let subscription = self.store.get_subscription(user_id)?;
        Ok(EntitlementSnapshot::build(
            user_id.clone(),
            account,
            subscription,
            &self.policies,
            Utc::now(),
        ))
    }

    // =========================================================================
    // Consumption
    // =========================================================================

    /// Spend `amount` credits of one type.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(UserNotFound)` if the user has no account.
    /// - `StoreError::Rejected(InsufficientCredits)` if the balance is short.
    /// - `StoreError::Conflict` if the write kept losing races.
    pub fn consume(
        &self,
        user_id: &UserId,
        credit_type: CreditType,
        amount: i64,
        ctx: &MutationContext,
    ) -> Result<Spend> {
        let credit_type = credit_type.canonical();
        let applied = self.store.apply_mutation(
            user_id,
            &LedgerMutation::Consume {
                credit_type,
                amount,
            },
            ctx,
        )?;
        Ok(Spend::from_applied(credit_type, &applied))
    }

    /// Spend one use of a feature.
    ///
    /// Under an effective subscription nothing is spent. Otherwise the
    /// policy's cost is consumed atomically. `request_id` makes the spend
    /// idempotent: a repeat returns the first outcome with `replayed` set.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(PolicyNotFound)` for an unregistered feature.
    /// - Every error of [`Ledger::consume`].
    pub fn consume_feature(
        &self,
        user_id: &UserId,
        feature_key: &str,
        actor: &str,
        request_id: Option<&str>,
    ) -> Result<Spend> {
        let mut state = FeatureUseState::Requested;
        debug!(user_id = %user_id, feature_key = %feature_key, ?state, "Feature use");

        state = FeatureUseState::Resolving;
        debug!(user_id = %user_id, feature_key = %feature_key, ?state, "Feature use");
        let policy = self.policy(feature_key)?;
        let now = Utc::now();

        if let Some(subscription) = self.store.get_subscription(user_id)? {
            if subscription.is_effective(now) {
                state = FeatureUseState::AllowedViaSubscription;
                debug!(user_id = %user_id, feature_key = %feature_key, ?state, "Feature use");
                let balance = self
                    .store
                    .get_account(user_id)?
                    .map_or(0, |account| account.balance(policy.credit_type));
                return Ok(Spend {
                    via: AccessVia::Subscription,
                    credit_type: policy.credit_type,
                    consumed: 0,
                    balance,
                    replayed: false,
                    adjustment_id: None,
                });
            }
        }

        state = FeatureUseState::AllowedViaCredit;
        debug!(user_id = %user_id, feature_key = %feature_key, ?state, "Feature use");
        state = FeatureUseState::Spending;
        debug!(user_id = %user_id, feature_key = %feature_key, ?state, "Feature use");

        let mut ctx = MutationContext::actor(actor).with_reference(feature_key);
        if let Some(request_id) = request_id {
            ctx = ctx.with_idempotency_key(request_id);
        }

        match self.consume(user_id, policy.credit_type, policy.cost_per_use, &ctx) {
            Ok(spend) => {
                state = FeatureUseState::Spent;
                info!(
                    user_id = %user_id,
                    feature_key = %feature_key,
                    credit_type = %spend.credit_type,
                    consumed = spend.consumed,
                    balance = spend.balance,
                    replayed = spend.replayed,
                    ?state,
                    "Feature use spent"
                );
                Ok(spend)
            }
            Err(err) => {
                state = FeatureUseState::Denied;
                info!(
                    user_id = %user_id,
                    feature_key = %feature_key,
                    error = %err,
                    ?state,
                    "Feature use denied"
                );
                Err(err)
            }
        }
    }

    // =========================================================================
    // Adjustments
    // =========================================================================

    /// Grant credits. Creates the account if missing.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(InvalidAmount)` for a non-positive amount.
    /// - `StoreError::Conflict` if the write kept losing races.
    pub fn grant(
        &self,
        user_id: &UserId,
        credit_type: CreditType,
        amount: i64,
        actor: &str,
    ) -> Result<AppliedMutation> {
        let applied = self.store.apply_mutation(
            user_id,
            &LedgerMutation::Grant {
                credit_type,
                amount,
                reason: AdjustmentReason::AdminGrant,
            },
            &MutationContext::actor(actor),
        )?;
        info!(
            user_id = %user_id,
            credit_type = %credit_type.canonical(),
            amount,
            actor = %actor,
            "Credits granted"
        );
        Ok(applied)
    }

    /// Revoke credits.
    ///
    /// # Errors
    ///
    /// - `StoreError::Rejected(UserNotFound)` if the user has no account.
    /// - `StoreError::Rejected(RevokeWouldUnderflow)` if the balance is short;
    ///   the balance is left unchanged.
    pub fn revoke(
        &self,
        user_id: &UserId,
        credit_type: CreditType,
        amount: i64,
        actor: &str,
    ) -> Result<AppliedMutation> {
        let applied = self.store.apply_mutation(
            user_id,
            &LedgerMutation::Revoke {
                credit_type,
                amount,
            },
            &MutationContext::actor(actor),
        )?;
        info!(
            user_id = %user_id,
            credit_type = %credit_type.canonical(),
            amount,
            actor = %actor,
            "Credits revoked"
        );
        Ok(applied)
    }

    /// Zero every balance, writing one record per zeroed type.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Rejected(UserNotFound)` if the user has no account.
    pub fn reset_all(&self, user_id: &UserId, actor: &str) -> Result<AppliedMutation> {
        let applied = self.store.apply_mutation(
            user_id,
            &LedgerMutation::ResetAll,
            &MutationContext::actor(actor),
        )?;
        info!(
            user_id = %user_id,
            zeroed = applied.records.len(),
            actor = %actor,
            "Balances reset"
        );
        Ok(applied)
    }

    // =========================================================================
    // Admin queries
    // =========================================================================

    /// Page through accounts, optionally filtered by user ID prefix.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn list_accounts(
        &self,
        search: Option<&str>,
        cursor: Option<&UserId>,
        limit: usize,
    ) -> Result<AccountPage> {
        let accounts = self.store.list_accounts(search, cursor, limit)?;
        let next_cursor = if limit > 0 && accounts.len() == limit {
            accounts.last().map(|account| account.user_id.clone())
        } else {
            None
        };
        Ok(AccountPage {
            accounts,
            next_cursor,
        })
    }

    /// Per-user detail.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Rejected(UserNotFound)` if the user has neither
    /// an account nor a subscription.
    pub fn account_detail(&self, user_id: &UserId, recent: usize) -> Result<AccountDetail> {
        let account = self.store.get_account(user_id)?;
        let subscription = self.store.get_subscription(user_id)?;
        let now = Utc::now();

        let account = match (account, &subscription) {
            (Some(account), _) => account,
            (None, Some(_)) => Account::new(user_id.clone(), now),
            (None, None) => {
                return Err(LedgerError::UserNotFound {
                    user_id: user_id.to_string(),
                }
                .into())
            }
        };

        Ok(AccountDetail {
            account,
            subscription_status: subscription.as_ref().map(|sub| sub.status(now)),
            subscription,
            recent_adjustments: self.store.list_adjustments_by_user(user_id, recent, 0)?,
        })
    }

    /// Adjustment history, newest first.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn adjustments(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdjustmentRecord>> {
        self.store.list_adjustments_by_user(user_id, limit, offset)
    }

    /// Count subscriptions by status.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn subscription_summary(&self) -> Result<SubscriptionSummary> {
        let now = Utc::now();
        let mut summary = SubscriptionSummary::default();
        let mut cursor: Option<UserId> = None;

        loop {
            let page = self
                .store
                .list_subscriptions(cursor.as_ref(), SUBSCRIPTION_SCAN_PAGE)?;
            for subscription in &page {
                let bucket = match subscription.status(now) {
                    SubscriptionStatus::Active => &mut summary.active,
                    SubscriptionStatus::Expired => &mut summary.expired,
                    SubscriptionStatus::Inactive => &mut summary.inactive,
                };
                *bucket += 1;
                summary.total += 1;
            }
            if page.len() < SUBSCRIPTION_SCAN_PAGE {
                break;
            }
            cursor = page.last().map(|sub| sub.user_id.clone());
        }

        debug!(total = summary.total, active = summary.active, "Subscription summary computed");
        Ok(summary)
    }

    /// Payment failures feed, newest first.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn payment_failures(&self, limit: usize, offset: usize) -> Result<Vec<PaymentFailure>> {
        self.store.list_payment_failures(limit, offset)
    }
}
