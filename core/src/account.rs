//! Credit account types for astro-ledger.
//!
//! An [`Account`] holds one balance per canonical [`CreditType`] plus a
//! mirror of the aliased balances under their legacy names. All balance
//! changes go through [`Account::apply`], which validates the mutation,
//! updates canonical and mirror values together, and returns the audit
//! records to persist in the same write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AdjustmentId, AdjustmentReason, AdjustmentRecord, CreditType, LedgerError, UserId};

/// A user's credit account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user ID.
    pub user_id: UserId,

    /// Canonical balances. Absent entries read as zero.
    #[serde(default)]
    pub balances: BTreeMap<CreditType, i64>,

    /// Legacy mirror, keyed by the legacy alias. Always equal to the
    /// canonical balance it aliases once the account has been normalized.
    #[serde(default)]
    pub legacy_balances: BTreeMap<CreditType, i64>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with all balances at zero.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        let mut account = Self {
            user_id,
            balances: BTreeMap::new(),
            legacy_balances: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        for credit_type in CreditType::CANONICAL {
            account.set_balance(credit_type, 0);
        }
        account
    }

    /// Balance for a credit type. Legacy aliases read their canonical type.
    #[must_use]
    pub fn balance(&self, credit_type: CreditType) -> i64 {
        self.balances
            .get(&credit_type.canonical())
            .copied()
            .unwrap_or(0)
    }

    /// Check if the account can cover `amount` of `credit_type`.
    #[must_use]
    pub fn has_sufficient_credits(&self, credit_type: CreditType, amount: i64) -> bool {
        self.balance(credit_type) >= amount
    }

    /// Check whether every legacy mirror equals its canonical balance.
    #[must_use]
    pub fn mirrors_consistent(&self) -> bool {
        CreditType::CANONICAL.iter().all(|credit_type| {
            credit_type.legacy_alias().map_or(true, |alias| {
                self.legacy_balances.get(&alias).copied().unwrap_or(0) == self.balance(*credit_type)
            })
        })
    }

    /// Reconcile legacy and canonical representations.
    ///
    /// Documents written by older clients may carry only the legacy field, or
    /// may have let the mirror drift. A missing canonical value adopts the
    /// legacy one; otherwise the canonical value wins. Stray legacy keys in
    /// the canonical map are folded into their canonical type.
    ///
    /// Returns `true` if anything changed.
    pub fn normalize(&mut self) -> bool {
        let before = self.clone();

        for legacy in [CreditType::LegacyAiQuestion, CreditType::LegacyKundaliBasic] {
            if let Some(value) = self.balances.remove(&legacy) {
                self.balances.entry(legacy.canonical()).or_insert(value);
            }
        }

        for credit_type in CreditType::CANONICAL {
            let canonical = match (credit_type.legacy_alias(), self.balances.get(&credit_type)) {
                (_, Some(value)) => *value,
                (Some(alias), None) => self.legacy_balances.get(&alias).copied().unwrap_or(0),
                (None, None) => 0,
            };
            self.set_balance(credit_type, canonical.max(0));
        }

        *self != before
    }

    /// Write a canonical balance and its legacy mirror together.
    fn set_balance(&mut self, credit_type: CreditType, value: i64) {
        let canonical = credit_type.canonical();
        self.balances.insert(canonical, value);
        if let Some(alias) = canonical.legacy_alias() {
            self.legacy_balances.insert(alias, value);
        }
    }

    /// Apply a mutation in memory.
    ///
    /// On error the account is left untouched. On success the returned
    /// records describe every balance change, in order.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` if the amount is not positive or overflows.
    /// - `LedgerError::InsufficientCredits` if a consumption exceeds the balance.
    /// - `LedgerError::RevokeWouldUnderflow` if a revoke exceeds the balance.
    pub fn apply(
        &mut self,
        mutation: &LedgerMutation,
        ctx: &MutationContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdjustmentRecord>, LedgerError> {
        let mut next = self.clone();
        next.normalize();

        let changes: Vec<(CreditType, i64, AdjustmentReason)> = match *mutation {
            LedgerMutation::Consume {
                credit_type,
                amount,
            } => {
                ensure_positive(amount)?;
                let balance = next.balance(credit_type);
                if balance < amount {
                    return Err(LedgerError::InsufficientCredits {
                        credit_type: credit_type.canonical(),
                        balance,
                        required: amount,
                    });
                }
                vec![(credit_type, -amount, AdjustmentReason::Consumption)]
            }
            LedgerMutation::Grant {
                credit_type,
                amount,
                reason,
            } => {
                ensure_positive(amount)?;
                if !reason.is_credit() {
                    return Err(LedgerError::InvalidAmount(format!(
                        "grant cannot use reason {reason:?}"
                    )));
                }
                next.balance(credit_type).checked_add(amount).ok_or_else(|| {
                    LedgerError::InvalidAmount(format!("grant of {amount} overflows balance"))
                })?;
                vec![(credit_type, amount, reason)]
            }
            LedgerMutation::Revoke {
                credit_type,
                amount,
            } => {
                ensure_positive(amount)?;
                let balance = next.balance(credit_type);
                if balance < amount {
                    return Err(LedgerError::RevokeWouldUnderflow {
                        credit_type: credit_type.canonical(),
                        balance,
                        requested: amount,
                    });
                }
                vec![(credit_type, -amount, AdjustmentReason::AdminRevoke)]
            }
            LedgerMutation::ResetAll => CreditType::CANONICAL
                .iter()
                .filter(|credit_type| next.balance(**credit_type) != 0)
                .map(|credit_type| {
                    (*credit_type, -next.balance(*credit_type), AdjustmentReason::AdminReset)
                })
                .collect(),
        };

        let mut records = Vec::with_capacity(changes.len());
        for (credit_type, delta, reason) in changes {
            let credit_type = credit_type.canonical();
            let balance_after = next.balance(credit_type) + delta;
            next.set_balance(credit_type, balance_after);
            records.push(AdjustmentRecord {
                id: AdjustmentId::generate(),
                user_id: next.user_id.clone(),
                credit_type,
                delta,
                balance_after,
                reason,
                actor: ctx.actor.clone(),
                reference: ctx.reference.clone(),
                created_at: now,
            });
        }

        next.updated_at = now;
        *self = next;
        Ok(records)
    }
}

fn ensure_positive(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be at least 1, got {amount}"
        )));
    }
    Ok(())
}

/// A single atomic change to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerMutation {
    /// Spend credits on a guarded feature.
    Consume {
        /// Credit type to spend.
        credit_type: CreditType,
        /// Amount to spend (≥ 1).
        amount: i64,
    },

    /// Add credits.
    Grant {
        /// Credit type to add.
        credit_type: CreditType,
        /// Amount to add (≥ 1).
        amount: i64,
        /// `Purchase` or `AdminGrant`.
        reason: AdjustmentReason,
    },

    /// Remove credits; rejected if the balance would go negative.
    Revoke {
        /// Credit type to remove.
        credit_type: CreditType,
        /// Amount to remove (≥ 1).
        amount: i64,
    },

    /// Zero every balance.
    ResetAll,
}

impl LedgerMutation {
    /// Whether applying this mutation may create a missing account.
    #[must_use]
    pub const fn creates_account(&self) -> bool {
        matches!(self, Self::Grant { .. })
    }
}

/// Who is mutating the ledger, and on behalf of what.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationContext {
    /// Actor recorded on every adjustment.
    pub actor: String,

    /// Reference recorded on every adjustment (feature key, payment id).
    pub reference: Option<String>,

    /// Idempotency key. A second mutation with the same key replays the
    /// first outcome instead of applying again.
    pub idempotency_key: Option<String>,
}

impl MutationContext {
    /// Context for an actor with no reference or idempotency key.
    #[must_use]
    pub fn actor(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            reference: None,
            idempotency_key: None,
        }
    }

    /// Attach a reference.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Outcome of a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMutation {
    /// The account after the mutation.
    pub account: Account,

    /// Audit records written by the mutation.
    pub records: Vec<AdjustmentRecord>,

    /// The mutation that was applied.
    pub mutation: LedgerMutation,

    /// Reference the mutation was recorded under.
    #[serde(default)]
    pub reference: Option<String>,

    /// `true` when this outcome was replayed from an earlier request with the
    /// same idempotency key.
    #[serde(skip)]
    pub replayed: bool,
}

impl AppliedMutation {
    /// Whether this outcome was produced by the same `mutation` and reference.
    #[must_use]
    pub fn matches(&self, mutation: &LedgerMutation, ctx: &MutationContext) -> bool {
        self.mutation == *mutation && self.reference == ctx.reference
    }
}
