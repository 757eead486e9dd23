//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait
//! on top of an `OptimisticTransactionDB`.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, Options, Transaction,
};
use tracing::{debug, warn};

use astro_ledger_core::{
    Account, AdjustmentId, AdjustmentReason, AdjustmentRecord, AppliedMutation, LedgerError,
    LedgerMutation, MutationContext, PaymentEvent, PaymentFailure, ProcessedPayment, ProductGrant,
    SubscriptionRecord, UserId, PAYMENTS_ACTOR,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{ReconcileOutcome, Store};

/// Commit attempts before a contended transaction gives up.
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 16;

type Db = OptimisticTransactionDB<MultiThreaded>;
type Txn<'db> = Transaction<'db, Db>;
type Cf<'db> = Arc<BoundColumnFamily<'db>>;

/// Column families touched by a balance change.
struct LedgerHandles<'db> {
    accounts: Cf<'db>,
    adjustments: Cf<'db>,
    adjustments_by_user: Cf<'db>,
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
    max_commit_attempts: u32,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Set how many times a conflicting commit is retried.
    #[must_use]
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Cf<'_>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn ledger_handles(&self) -> Result<LedgerHandles<'_>> {
        Ok(LedgerHandles {
            accounts: self.cf(cf::ACCOUNTS)?,
            adjustments: self.cf(cf::ADJUSTMENTS)?,
            adjustments_by_user: self.cf(cf::ADJUSTMENTS_BY_USER)?,
        })
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Read a key inside a transaction and register it for conflict checking.
    fn read_for_update<T: serde::de::DeserializeOwned>(
        txn: &Txn<'_>,
        cf: &Cf<'_>,
        key: &[u8],
    ) -> Result<Option<T>> {
        txn.get_for_update_cf(cf, key, true)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Run `body` in an optimistic transaction and commit it.
    ///
    /// `body` re-runs from scratch after a lost commit race, so it must do all
    /// of its reads through the transaction. An error from `body` rolls back
    /// without retrying.
    fn transact<T>(
        &self,
        operation: &'static str,
        mut body: impl FnMut(&Txn<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let txn = self.db.transaction();
            let value = body(&txn)?;

            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(err) if matches!(err.kind(), ErrorKind::Busy | ErrorKind::TryAgain) => {
                    if attempt >= self.max_commit_attempts {
                        warn!(operation, attempts = attempt, "Giving up after commit conflicts");
                        return Err(StoreError::Conflict { attempts: attempt });
                    }
                    debug!(operation, attempt, error = %err, "Commit conflict, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Apply a mutation to an account inside an open transaction.
    fn apply_in(
        txn: &Txn<'_>,
        handles: &LedgerHandles<'_>,
        user_id: &UserId,
        mutation: &LedgerMutation,
        ctx: &MutationContext,
        now: DateTime<Utc>,
    ) -> Result<AppliedMutation> {
        let account_key = keys::account_key(user_id);
        let mut account = match Self::read_for_update::<Account>(txn, &handles.accounts, &account_key)? {
            Some(account) => account,
            None if mutation.creates_account() => Account::new(user_id.clone(), now),
            None => {
                return Err(LedgerError::UserNotFound {
                    user_id: user_id.to_string(),
                }
                .into())
            }
        };

        let records = account.apply(mutation, ctx, now)?;

        txn.put_cf(&handles.accounts, &account_key, Self::serialize(&account)?)?;
        for record in &records {
            txn.put_cf(
                &handles.adjustments,
                keys::adjustment_key(&record.id),
                Self::serialize(record)?,
            )?;
            txn.put_cf(
                &handles.adjustments_by_user,
                keys::user_adjustment_key(&record.user_id, &record.id),
                b"",
            )?;
        }

        Ok(AppliedMutation {
            account,
            records,
            mutation: *mutation,
            reference: ctx.reference.clone(),
            replayed: false,
        })
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        let account: Option<Account> = self.get_value(cf::ACCOUNTS, &keys::account_key(user_id))?;
        Ok(account.map(|mut account| {
            account.normalize();
            account
        }))
    }

    fn list_accounts(
        &self,
        search: Option<&str>,
        after: Option<&UserId>,
        limit: usize,
    ) -> Result<Vec<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let prefix = search.unwrap_or_default().as_bytes();
        let start = match after {
            Some(after) if after.as_bytes() > prefix => after.as_bytes(),
            _ => prefix,
        };

        let mut accounts = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(start, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) || accounts.len() >= limit {
                break;
            }
            if after.is_some_and(|after| &*key <= after.as_bytes()) {
                continue;
            }

            let mut account: Account = Self::deserialize(&value)?;
            account.normalize();
            accounts.push(account);
        }

        Ok(accounts)
    }

    fn apply_mutation(
        &self,
        user_id: &UserId,
        mutation: &LedgerMutation,
        ctx: &MutationContext,
    ) -> Result<AppliedMutation> {
        let handles = self.ledger_handles()?;
        let cf_applied = self.cf(cf::APPLIED_MUTATIONS)?;
        let applied_key = ctx
            .idempotency_key
            .as_deref()
            .map(|key| keys::applied_mutation_key(user_id, key));

        self.transact("apply_mutation", |txn| {
            if let Some(key) = &applied_key {
                if let Some(mut previous) =
                    Self::read_for_update::<AppliedMutation>(txn, &cf_applied, key)?
                {
                    if !previous.matches(mutation, ctx) {
                        return Err(LedgerError::IdempotencyKeyReused {
                            key: ctx.idempotency_key.clone().unwrap_or_default(),
                        }
                        .into());
                    }
                    previous.replayed = true;
                    return Ok(previous);
                }
            }

            let applied = Self::apply_in(txn, &handles, user_id, mutation, ctx, Utc::now())?;
            if let Some(key) = &applied_key {
                txn.put_cf(&cf_applied, key, Self::serialize(&applied)?)?;
            }
            Ok(applied)
        })
    }

    fn get_applied(
        &self,
        user_id: &UserId,
        idempotency_key: &str,
    ) -> Result<Option<AppliedMutation>> {
        let applied: Option<AppliedMutation> = self.get_value(
            cf::APPLIED_MUTATIONS,
            &keys::applied_mutation_key(user_id, idempotency_key),
        )?;
        Ok(applied.map(|mut applied| {
            applied.replayed = true;
            applied
        }))
    }

    // =========================================================================
    // Adjustment Operations
    // =========================================================================

    fn get_adjustment(&self, id: &AdjustmentId) -> Result<Option<AdjustmentRecord>> {
        self.get_value(cf::ADJUSTMENTS, &keys::adjustment_key(id))
    }

    fn list_adjustments_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AdjustmentRecord>> {
        let cf_by_user = self.cf(cf::ADJUSTMENTS_BY_USER)?;
        let prefix = keys::user_adjustments_prefix(user_id);
        let upper = keys::user_adjustments_upper_bound(user_id);

        let mut records = Vec::new();
        let mut skipped = 0;

        // Reverse from the top of the user's range: newest first.
        for item in self
            .db
            .iterator_cf(&cf_by_user, IteratorMode::From(&upper, Direction::Reverse))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) || records.len() >= limit {
                break;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }

            let Some(id) = keys::extract_adjustment_id(&key) else {
                continue;
            };
            if let Some(record) = self.get_adjustment(&id)? {
                records.push(record);
            }
        }

        Ok(records)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    fn get_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        self.get_value(cf::SUBSCRIPTIONS, &keys::subscription_key(user_id))
    }

    fn list_subscriptions(
        &self,
        after: Option<&UserId>,
        limit: usize,
    ) -> Result<Vec<SubscriptionRecord>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let mode = after.map_or(IteratorMode::Start, |after| {
            IteratorMode::From(after.as_bytes(), Direction::Forward)
        });

        let mut subscriptions = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item?;
            if subscriptions.len() >= limit {
                break;
            }
            if after.is_some_and(|after| &*key <= after.as_bytes()) {
                continue;
            }
            subscriptions.push(Self::deserialize(&value)?);
        }

        Ok(subscriptions)
    }

    fn cancel_subscription(&self, user_id: &UserId) -> Result<Option<SubscriptionRecord>> {
        let cf = self.cf(cf::SUBSCRIPTIONS)?;
        let key = keys::subscription_key(user_id);

        self.transact("cancel_subscription", |txn| {
            let Some(mut record) = Self::read_for_update::<SubscriptionRecord>(txn, &cf, &key)?
            else {
                return Ok(None);
            };
            record.deactivate(Utc::now());
            txn.put_cf(&cf, &key, Self::serialize(&record)?)?;
            Ok(Some(record))
        })
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    fn reconcile_payment(
        &self,
        event: &PaymentEvent,
        grant: &ProductGrant,
    ) -> Result<ReconcileOutcome> {
        let handles = self.ledger_handles()?;
        let cf_subscriptions = self.cf(cf::SUBSCRIPTIONS)?;
        let cf_payments = self.cf(cf::PAYMENTS)?;
        let payment_key = keys::payment_key(&event.payment_id);

        self.transact("reconcile_payment", |txn| {
            if txn
                .get_for_update_cf(&cf_payments, &payment_key, true)?
                .is_some()
            {
                return Err(StoreError::DuplicatePayment {
                    payment_id: event.payment_id.clone(),
                });
            }

            let now = Utc::now();
            let outcome = match grant {
                ProductGrant::Credits {
                    credit_type,
                    amount,
                } => {
                    let mutation = LedgerMutation::Grant {
                        credit_type: *credit_type,
                        amount: *amount,
                        reason: AdjustmentReason::Purchase,
                    };
                    let ctx = MutationContext::actor(PAYMENTS_ACTOR)
                        .with_reference(event.payment_id.clone());
                    ReconcileOutcome::Credited(Self::apply_in(
                        txn, &handles, &event.uid, &mutation, &ctx, now,
                    )?)
                }
                ProductGrant::Subscription { plan_id, .. } => {
                    let key = keys::subscription_key(&event.uid);
                    let existing =
                        Self::read_for_update::<SubscriptionRecord>(txn, &cf_subscriptions, &key)?;
                    let record = SubscriptionRecord::activate(
                        existing.as_ref(),
                        event.uid.clone(),
                        plan_id,
                        grant.duration(),
                        now,
                    );
                    txn.put_cf(&cf_subscriptions, &key, Self::serialize(&record)?)?;
                    ReconcileOutcome::Subscribed(record)
                }
            };

            let processed = ProcessedPayment {
                payment_id: event.payment_id.clone(),
                order_id: event.order_id.clone(),
                user_id: event.uid.clone(),
                product_id: event.product_id.clone().unwrap_or_default(),
                amount: event.amount,
                grant: grant.clone(),
                processed_at: now,
            };
            txn.put_cf(&cf_payments, &payment_key, Self::serialize(&processed)?)?;

            Ok(outcome)
        })
    }

    fn get_payment(&self, payment_id: &str) -> Result<Option<ProcessedPayment>> {
        self.get_value(cf::PAYMENTS, &keys::payment_key(payment_id))
    }

    fn put_payment_failure(&self, failure: &PaymentFailure) -> Result<()> {
        let cf = self.cf(cf::PAYMENT_FAILURES)?;
        self.db.put_cf(
            &cf,
            keys::payment_failure_key(&failure.id),
            Self::serialize(failure)?,
        )?;
        Ok(())
    }

    fn list_payment_failures(&self, limit: usize, offset: usize) -> Result<Vec<PaymentFailure>> {
        let cf = self.cf(cf::PAYMENT_FAILURES)?;

        let mut failures = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End).skip(offset) {
            if failures.len() >= limit {
                break;
            }
            let (_, value) = item?;
            failures.push(Self::deserialize(&value)?);
        }

        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use astro_ledger_core::CreditType;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn grant(store: &RocksStore, user_id: &UserId, credit_type: CreditType, amount: i64) {
        store
            .apply_mutation(
                user_id,
                &LedgerMutation::Grant {
                    credit_type,
                    amount,
                    reason: AdjustmentReason::AdminGrant,
                },
                &MutationContext::actor("admin-1"),
            )
            .unwrap();
    }

    fn consume(store: &RocksStore, user_id: &UserId, credit_type: CreditType) -> Result<AppliedMutation> {
        store.apply_mutation(
            user_id,
            &LedgerMutation::Consume {
                credit_type,
                amount: 1,
            },
            &MutationContext::actor("chat-service").with_reference("kundali_report"),
        )
    }

    fn purchase(payment_id: &str, user_id: &UserId, product_id: &str) -> PaymentEvent {
        PaymentEvent {
            event_type: "payment.captured".into(),
            payment_id: payment_id.into(),
            order_id: Some(format!("order_{payment_id}")),
            uid: user_id.clone(),
            product_id: Some(product_id.into()),
            amount: 19900,
            signature: None,
        }
    }

    #[test]
    fn grant_creates_account_lazily() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        assert!(store.get_account(&user_id).unwrap().is_none());

        grant(&store, &user_id, CreditType::AiGuru, 5);

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::AiGuru), 5);
        assert_eq!(account.balance(CreditType::Kundali), 0);

        let records = store.list_adjustments_by_user(&user_id, 10, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].delta, 5);
        assert_eq!(records[0].reason, AdjustmentReason::AdminGrant);
        assert_eq!(records[0].actor, "admin-1");
        assert_eq!(store.get_adjustment(&records[0].id).unwrap().unwrap(), records[0]);
    }

    #[test]
    fn consume_without_account_is_user_not_found() {
        let (store, _dir) = create_test_store();
        let result = consume(&store, &UserId::generate(), CreditType::Kundali);
        assert!(matches!(
            result,
            Err(StoreError::Rejected(LedgerError::UserNotFound { .. }))
        ));
    }

    #[test]
    fn consume_until_exhausted() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::Kundali, 2);

        let first = consume(&store, &user_id, CreditType::Kundali).unwrap();
        assert_eq!(first.account.balance(CreditType::Kundali), 1);
        let second = consume(&store, &user_id, CreditType::Kundali).unwrap();
        assert_eq!(second.account.balance(CreditType::Kundali), 0);
        assert_eq!(second.records.len(), 1);
        assert_eq!(second.records[0].delta, -1);
        assert_eq!(second.records[0].reason, AdjustmentReason::Consumption);

        let third = consume(&store, &user_id, CreditType::Kundali);
        assert!(matches!(
            third,
            Err(StoreError::Rejected(LedgerError::InsufficientCredits {
                balance: 0,
                required: 1,
                ..
            }))
        ));

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::Kundali), 0);
        assert_eq!(store.list_adjustments_by_user(&user_id, 10, 0).unwrap().len(), 3);
    }

    #[test]
    fn revoke_underflow_leaves_balance() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::AiGuru, 3);

        let result = store.apply_mutation(
            &user_id,
            &LedgerMutation::Revoke {
                credit_type: CreditType::AiGuru,
                amount: 5,
            },
            &MutationContext::actor("admin-1"),
        );
        assert!(matches!(
            result,
            Err(StoreError::Rejected(LedgerError::RevokeWouldUnderflow {
                balance: 3,
                requested: 5,
                ..
            }))
        ));
        assert_eq!(
            store.get_account(&user_id).unwrap().unwrap().balance(CreditType::AiGuru),
            3
        );
        assert_eq!(store.list_adjustments_by_user(&user_id, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn reset_all_writes_one_record_per_zeroed_type() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::AiGuru, 4);
        grant(&store, &user_id, CreditType::LifetimePrediction, 1);

        let applied = store
            .apply_mutation(&user_id, &LedgerMutation::ResetAll, &MutationContext::actor("admin-2"))
            .unwrap();
        assert_eq!(applied.records.len(), 2);
        assert!(applied
            .records
            .iter()
            .all(|record| record.reason == AdjustmentReason::AdminReset && record.balance_after == 0));

        let account = store.get_account(&user_id).unwrap().unwrap();
        for credit_type in CreditType::CANONICAL {
            assert_eq!(account.balance(credit_type), 0);
        }
        assert!(account.mirrors_consistent());
    }

    #[test]
    fn legacy_mirror_follows_every_write() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::LegacyAiQuestion, 3);
        consume(&store, &user_id, CreditType::AiGuru).unwrap();

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::AiGuru), 2);
        assert_eq!(account.legacy_balances[&CreditType::LegacyAiQuestion], 2);
        assert!(account.mirrors_consistent());

        store
            .apply_mutation(
                &user_id,
                &LedgerMutation::Revoke {
                    credit_type: CreditType::LegacyAiQuestion,
                    amount: 2,
                },
                &MutationContext::actor("admin-1"),
            )
            .unwrap();

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::AiGuru), 0);
        assert_eq!(account.legacy_balances[&CreditType::LegacyAiQuestion], 0);
        assert!(account.mirrors_consistent());
    }

    #[test]
    fn legacy_only_document_is_adopted_and_repaired() {
        let (store, _dir) = create_test_store();
        let user_id: UserId = "legacy-user".parse().unwrap();

        let mut legacy = Account::new(user_id.clone(), Utc::now());
        legacy.balances = BTreeMap::new();
        legacy.legacy_balances = BTreeMap::from([(CreditType::LegacyKundaliBasic, 4)]);
        let cf = store.cf(cf::ACCOUNTS).unwrap();
        store
            .db
            .put_cf(&cf, keys::account_key(&user_id), RocksStore::serialize(&legacy).unwrap())
            .unwrap();

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::Kundali), 4);

        consume(&store, &user_id, CreditType::Kundali).unwrap();
        let raw: Account = store
            .get_value(cf::ACCOUNTS, &keys::account_key(&user_id))
            .unwrap()
            .unwrap();
        assert_eq!(raw.balances[&CreditType::Kundali], 3);
        assert_eq!(raw.legacy_balances[&CreditType::LegacyKundaliBasic], 3);
    }

    #[test]
    fn idempotency_key_replays_outcome() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::Kundali, 2);

        let mutation = LedgerMutation::Consume {
            credit_type: CreditType::Kundali,
            amount: 1,
        };
        let ctx = MutationContext::actor("report-service").with_idempotency_key("req-1");

        let first = store.apply_mutation(&user_id, &mutation, &ctx).unwrap();
        let second = store.apply_mutation(&user_id, &mutation, &ctx).unwrap();
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.records, first.records);
        assert_eq!(
            store.get_account(&user_id).unwrap().unwrap().balance(CreditType::Kundali),
            1
        );
        assert!(store.get_applied(&user_id, "req-1").unwrap().is_some());
        assert!(store.get_applied(&user_id, "req-2").unwrap().is_none());
    }

    #[test]
    fn idempotency_key_is_bound_to_its_mutation() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::Kundali, 2);

        let mutation = LedgerMutation::Consume {
            credit_type: CreditType::Kundali,
            amount: 1,
        };
        let ctx = MutationContext::actor("report-service")
            .with_reference("kundali_report")
            .with_idempotency_key("req-1");
        store.apply_mutation(&user_id, &mutation, &ctx).unwrap();

        let other_reference = MutationContext::actor("report-service")
            .with_reference("compatibility_report")
            .with_idempotency_key("req-1");
        let other_amount = LedgerMutation::Consume {
            credit_type: CreditType::Kundali,
            amount: 2,
        };
        for (mutation, ctx) in [(&mutation, &other_reference), (&other_amount, &ctx)] {
            assert!(matches!(
                store.apply_mutation(&user_id, mutation, ctx),
                Err(StoreError::Rejected(LedgerError::IdempotencyKeyReused { .. }))
            ));
        }
        assert_eq!(
            store.get_account(&user_id).unwrap().unwrap().balance(CreditType::Kundali),
            1
        );
    }

    #[test]
    fn concurrent_consumes_spend_single_credit_once() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::Kundali, 1);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| consume(&store, &user_id, CreditType::Kundali)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(StoreError::Rejected(LedgerError::InsufficientCredits { .. }))
                )
            })
            .count();
        assert_eq!(successes, 1);
        assert_eq!(insufficient, 7);
        assert_eq!(
            store.get_account(&user_id).unwrap().unwrap().balance(CreditType::Kundali),
            0
        );
    }

    #[test]
    fn concurrent_consumes_never_go_negative() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::AiGuru, 5);

        let successes: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..12)
                .map(|_| scope.spawn(|| consume(&store, &user_id, CreditType::AiGuru).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(successes, 5);
        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::AiGuru), 0);
        assert!(account.mirrors_consistent());
    }

    #[test]
    fn conflicting_grants_retry_until_all_land() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        grant(&store, &user_id, CreditType::Kundali, 1);

        // Each lost race means another grant committed, so 8 writers lose at
        // most 7 times each, well under the default attempt limit.
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| grant(&store, &user_id, CreditType::Kundali, 1));
            }
        });

        let account = store.get_account(&user_id).unwrap().unwrap();
        assert_eq!(account.balance(CreditType::Kundali), 9);
        assert_eq!(store.list_adjustments_by_user(&user_id, 20, 0).unwrap().len(), 9);
    }

    #[test]
    fn payment_is_granted_once() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let event = purchase("pay_001", &user_id, "ai_guru_pack_5");
        let pack = ProductGrant::Credits {
            credit_type: CreditType::AiGuru,
            amount: 5,
        };

        let outcome = store.reconcile_payment(&event, &pack).unwrap();
        let ReconcileOutcome::Credited(applied) = outcome else {
            panic!("expected credit grant");
        };
        assert_eq!(applied.account.balance(CreditType::AiGuru), 5);
        assert_eq!(applied.records[0].reason, AdjustmentReason::Purchase);
        assert_eq!(applied.records[0].reference.as_deref(), Some("pay_001"));

        let duplicate = store.reconcile_payment(&event, &pack);
        assert!(matches!(duplicate, Err(StoreError::DuplicatePayment { payment_id }) if payment_id == "pay_001"));
        assert_eq!(
            store.get_account(&user_id).unwrap().unwrap().balance(CreditType::AiGuru),
            5
        );

        let processed = store.get_payment("pay_001").unwrap().unwrap();
        assert_eq!(processed.product_id, "ai_guru_pack_5");
        assert_eq!(processed.grant, pack);
    }

    #[test]
    fn subscription_payment_activates_and_renews() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let monthly = ProductGrant::Subscription {
            plan_id: "premium".into(),
            duration_days: Some(30),
        };

        store
            .reconcile_payment(&purchase("pay_a", &user_id, "premium_monthly"), &monthly)
            .unwrap();
        let first = store.get_subscription(&user_id).unwrap().unwrap();
        assert!(first.is_effective(Utc::now()));

        store
            .reconcile_payment(&purchase("pay_b", &user_id, "premium_monthly"), &monthly)
            .unwrap();
        let renewed = store.get_subscription(&user_id).unwrap().unwrap();
        assert_eq!(
            renewed.expires_at.unwrap() - first.expires_at.unwrap(),
            chrono::Duration::days(30)
        );

        let cancelled = store.cancel_subscription(&user_id).unwrap().unwrap();
        assert!(!cancelled.active);
        assert!(!store
            .get_subscription(&user_id)
            .unwrap()
            .unwrap()
            .is_effective(Utc::now()));
        assert!(store.cancel_subscription(&UserId::generate()).unwrap().is_none());
    }

    #[test]
    fn list_accounts_by_prefix_and_cursor() {
        let (store, _dir) = create_test_store();
        for uid in ["alice-1", "alice-2", "alice-3", "bob-1"] {
            grant(&store, &uid.parse().unwrap(), CreditType::AiGuru, 1);
        }

        let all = store.list_accounts(None, None, 10).unwrap();
        assert_eq!(all.len(), 4);

        let alices = store.list_accounts(Some("alice"), None, 2).unwrap();
        let ids: Vec<_> = alices.iter().map(|a| a.user_id.as_str()).collect();
        assert_eq!(ids, ["alice-1", "alice-2"]);

        let next = store
            .list_accounts(Some("alice"), Some(&alices[1].user_id), 2)
            .unwrap();
        let ids: Vec<_> = next.iter().map(|a| a.user_id.as_str()).collect();
        assert_eq!(ids, ["alice-3"]);

        assert!(store.list_accounts(Some("carol"), None, 10).unwrap().is_empty());
    }

    #[test]
    fn adjustments_newest_first_with_pagination() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();
        let other = UserId::generate();

        grant(&store, &user_id, CreditType::AiGuru, 1);
        std::thread::sleep(std::time::Duration::from_millis(2));
        grant(&store, &user_id, CreditType::AiGuru, 2);
        std::thread::sleep(std::time::Duration::from_millis(2));
        grant(&store, &user_id, CreditType::AiGuru, 3);
        grant(&store, &other, CreditType::AiGuru, 9);

        let all = store.list_adjustments_by_user(&user_id, 10, 0).unwrap();
        let deltas: Vec<_> = all.iter().map(|r| r.delta).collect();
        assert_eq!(deltas, [3, 2, 1]);

        let page = store.list_adjustments_by_user(&user_id, 1, 1).unwrap();
        assert_eq!(page[0].delta, 2);
    }

    #[test]
    fn payment_failures_feed_newest_first() {
        let (store, _dir) = create_test_store();
        let user_id = UserId::generate();

        for (i, payment_id) in ["pay_x", "pay_y"].into_iter().enumerate() {
            if i > 0 {
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            store
                .put_payment_failure(&PaymentFailure {
                    id: AdjustmentId::generate(),
                    event: purchase(payment_id, &user_id, "mystery_box"),
                    error: "unknown product: mystery_box".into(),
                    attempts: 1,
                    failed_at: Utc::now(),
                })
                .unwrap();
        }

        let failures = store.list_payment_failures(10, 0).unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].event.payment_id, "pay_y");
        assert_eq!(store.list_payment_failures(10, 1).unwrap().len(), 1);
    }
}
