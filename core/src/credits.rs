//! Credit types and adjustment records.
//!
//! Every change to a balance produces an [`AdjustmentRecord`]; records are
//! append-only and never rewritten.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AdjustmentId, LedgerError, UserId};

/// The closed set of consumable credit types.
///
/// The two `Legacy*` variants are aliases kept for older clients and stored
/// documents. They are never stored as canonical balances: every operation
/// resolves them through [`CreditType::canonical`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditType {
    /// AI Guru chat questions and image scans.
    AiGuru,

    /// Kundali and compatibility reports.
    Kundali,

    /// Lifetime prediction reports.
    LifetimePrediction,

    /// Older name for [`CreditType::AiGuru`].
    LegacyAiQuestion,

    /// Older name for [`CreditType::Kundali`].
    LegacyKundaliBasic,
}

impl CreditType {
    /// Canonical credit types, in storage order.
    pub const CANONICAL: [Self; 3] = [Self::AiGuru, Self::Kundali, Self::LifetimePrediction];

    /// Resolve legacy aliases to their canonical type.
    #[must_use]
    pub const fn canonical(self) -> Self {
        match self {
            Self::LegacyAiQuestion => Self::AiGuru,
            Self::LegacyKundaliBasic => Self::Kundali,
            other => other,
        }
    }

    /// The legacy mirror field kept in sync with this canonical type, if any.
    #[must_use]
    pub const fn legacy_alias(self) -> Option<Self> {
        match self.canonical() {
            Self::AiGuru => Some(Self::LegacyAiQuestion),
            Self::Kundali => Some(Self::LegacyKundaliBasic),
            _ => None,
        }
    }

    /// Whether this variant is a legacy alias.
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::LegacyAiQuestion | Self::LegacyKundaliBasic)
    }

    /// Stable wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AiGuru => "ai_guru",
            Self::Kundali => "kundali",
            Self::LifetimePrediction => "lifetime_prediction",
            Self::LegacyAiQuestion => "legacy_ai_question",
            Self::LegacyKundaliBasic => "legacy_kundali_basic",
        }
    }
}

impl fmt::Display for CreditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai_guru" => Ok(Self::AiGuru),
            "kundali" => Ok(Self::Kundali),
            "lifetime_prediction" => Ok(Self::LifetimePrediction),
            "legacy_ai_question" => Ok(Self::LegacyAiQuestion),
            "legacy_kundali_basic" => Ok(Self::LegacyKundaliBasic),
            other => Err(LedgerError::UnknownCreditType(other.to_string())),
        }
    }
}

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Credits bought through the payment gateway.
    Purchase,

    /// Credits granted manually by support.
    AdminGrant,

    /// Credits removed manually by support.
    AdminRevoke,

    /// Balance zeroed by an admin reset.
    AdminReset,

    /// Credits spent on a guarded feature.
    Consumption,
}

impl AdjustmentReason {
    /// Check if this reason adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Purchase | Self::AdminGrant)
    }
}

/// An immutable audit entry for a single balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    /// Unique record ID (ULID for time-ordering).
    pub id: AdjustmentId,

    /// The user whose balance changed.
    pub user_id: UserId,

    /// Canonical credit type affected.
    pub credit_type: CreditType,

    /// Signed change. Positive = credit, negative = debit.
    pub delta: i64,

    /// Balance of `credit_type` after this change.
    pub balance_after: i64,

    /// Why the balance changed.
    pub reason: AdjustmentReason,

    /// Who caused the change (admin id, `payments`, or the calling service).
    pub actor: String,

    /// Related object: feature key, payment id, or request id.
    #[serde(default)]
    pub reference: Option<String>,

    /// When the change was committed.
    pub created_at: DateTime<Utc>,
}
