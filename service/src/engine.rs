//! Guarded execution of paid features.
//!
//! [`run_guarded`] wraps a feature engine (report generator, AI guru, ...)
//! so that the engine only runs for users with access, and its output is
//! only released once the spend has committed.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use astro_ledger_core::{AccessDecision, FeatureUseState, UserId};
use astro_ledger_store::StoreError;

use crate::ledger::{Ledger, Spend};

/// A paid feature backend.
#[async_trait]
pub trait GuardedFeature: Send + Sync {
    /// What the feature produces.
    type Output: Send;

    /// Produce the feature output for a user.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; no credits are spent.
    async fn run(&self, user_id: &UserId) -> Result<Self::Output, String>;
}

/// Output released together with the spend that paid for it.
#[derive(Debug, Clone, Serialize)]
pub struct Guarded<O> {
    /// Feature output.
    pub output: O,
    /// The committed spend.
    pub spend: Spend,
}

/// Why a guarded run produced no output.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The user had no access when checked.
    #[error("access denied")]
    Denied(AccessDecision),

    /// The engine failed; nothing was spent.
    #[error("feature engine failed: {0}")]
    Engine(String),

    /// The ledger refused or failed the spend; the output was withheld.
    #[error(transparent)]
    Ledger(#[from] StoreError),
}

/// Check access, run the engine, then spend.
///
/// The pre-check avoids running an expensive engine for users without
/// access. The spend re-validates atomically, so a concurrent request that
/// drains the balance in between makes this call fail with
/// `GuardError::Ledger` and the output is dropped.
///
/// # Errors
///
/// See [`GuardError`].
pub async fn run_guarded<F>(
    ledger: &Ledger,
    user_id: &UserId,
    feature_key: &str,
    actor: &str,
    request_id: Option<&str>,
    engine: &F,
) -> Result<Guarded<F::Output>, GuardError>
where
    F: GuardedFeature + ?Sized,
{
    let decision = ledger.check_access(user_id, feature_key)?;
    let state = FeatureUseState::after_decision(&decision);
    debug!(user_id = %user_id, feature_key = %feature_key, ?state, "Guarded feature checked");
    if !decision.allowed {
        return Err(GuardError::Denied(decision));
    }

    let output = engine.run(user_id).await.map_err(|err| {
        warn!(user_id = %user_id, feature_key = %feature_key, error = %err, "Feature engine failed");
        GuardError::Engine(err)
    })?;

    match ledger.consume_feature(user_id, feature_key, actor, request_id) {
        Ok(spend) => Ok(Guarded { output, spend }),
        Err(err) => {
            info!(
                user_id = %user_id,
                feature_key = %feature_key,
                error = %err,
                "Withholding feature output after failed spend"
            );
            Err(GuardError::Ledger(err))
        }
    }
}
