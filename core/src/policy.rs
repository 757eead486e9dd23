//! Feature access policies.
//!
//! The registry maps every guarded feature to the credit type it spends and
//! how much one use costs. It is built once at startup and never mutated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CreditType, LedgerError};

/// Access policy for one guarded feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePolicy {
    /// Feature key used in requests (e.g. `kundali_report`).
    pub feature_key: String,

    /// Canonical credit type spent by this feature.
    pub credit_type: CreditType,

    /// Credits spent per use (≥ 1).
    pub cost_per_use: i64,

    /// Human-readable label.
    pub label: String,
}

impl FeaturePolicy {
    /// Create a policy.
    #[must_use]
    pub fn new(
        feature_key: impl Into<String>,
        credit_type: CreditType,
        cost_per_use: i64,
        label: impl Into<String>,
    ) -> Self {
        Self {
            feature_key: feature_key.into(),
            credit_type,
            cost_per_use,
            label: label.into(),
        }
    }
}

/// Process-wide, read-only feature policy registry.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, FeaturePolicy>,
}

impl PolicyRegistry {
    /// Build a registry, validating every policy.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if a key is empty or duplicated,
    /// a cost is below 1, or a policy references a legacy credit type.
    pub fn new(policies: impl IntoIterator<Item = FeaturePolicy>) -> Result<Self, LedgerError> {
        let mut map = BTreeMap::new();
        for policy in policies {
            if policy.feature_key.trim().is_empty() {
                return Err(LedgerError::Configuration(
                    "feature key must not be empty".into(),
                ));
            }
            if policy.cost_per_use < 1 {
                return Err(LedgerError::Configuration(format!(
                    "feature {} has cost_per_use {}; must be at least 1",
                    policy.feature_key, policy.cost_per_use
                )));
            }
            if policy.credit_type.is_legacy() {
                return Err(LedgerError::Configuration(format!(
                    "feature {} uses legacy credit type {}; use {}",
                    policy.feature_key,
                    policy.credit_type,
                    policy.credit_type.canonical()
                )));
            }
            if map.contains_key(&policy.feature_key) {
                return Err(LedgerError::Configuration(format!(
                    "duplicate feature key: {}",
                    policy.feature_key
                )));
            }
            map.insert(policy.feature_key.clone(), policy);
        }
        Ok(Self { policies: map })
    }

    /// Parse a registry from a JSON array of policies.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` if the JSON is malformed or a
    /// policy is invalid.
    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        let policies: Vec<FeaturePolicy> = serde_json::from_str(json)
            .map_err(|e| LedgerError::Configuration(format!("invalid policy file: {e}")))?;
        Self::new(policies)
    }

    /// Look up the policy for a feature.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::PolicyNotFound` for an unregistered key.
    pub fn resolve(&self, feature_key: &str) -> Result<&FeaturePolicy, LedgerError> {
        self.policies
            .get(feature_key)
            .ok_or_else(|| LedgerError::PolicyNotFound {
                feature_key: feature_key.to_string(),
            })
    }

    /// All policies, ordered by feature key.
    pub fn iter(&self) -> impl Iterator<Item = &FeaturePolicy> {
        self.policies.values()
    }

    /// Number of registered features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let policies = [
            FeaturePolicy::new("ai_guru_chat", CreditType::AiGuru, 1, "AI Guru chat question"),
            FeaturePolicy::new("kundali_report", CreditType::Kundali, 1, "Kundali report"),
            FeaturePolicy::new(
                "compatibility_report",
                CreditType::Kundali,
                1,
                "Compatibility report",
            ),
            FeaturePolicy::new(
                "lifetime_prediction",
                CreditType::LifetimePrediction,
                1,
                "Lifetime prediction",
            ),
            FeaturePolicy::new("palm_scan", CreditType::AiGuru, 2, "Palm reading scan"),
            FeaturePolicy::new("face_scan", CreditType::AiGuru, 2, "Face reading scan"),
        ];

        Self {
            policies: policies
                .into_iter()
                .map(|policy| (policy.feature_key.clone(), policy))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_policies_are_valid() {
        let registry = PolicyRegistry::default();
        let revalidated = PolicyRegistry::new(registry.iter().cloned()).unwrap();
        assert_eq!(revalidated.len(), registry.len());

        let kundali = registry.resolve("kundali_report").unwrap();
        assert_eq!(kundali.credit_type, CreditType::Kundali);
        assert_eq!(kundali.cost_per_use, 1);
        assert_eq!(registry.resolve("palm_scan").unwrap().cost_per_use, 2);
    }

    #[test]
    fn unknown_feature_is_policy_not_found() {
        let registry = PolicyRegistry::default();
        assert_eq!(
            registry.resolve("tarot_reading").unwrap_err(),
            LedgerError::PolicyNotFound {
                feature_key: "tarot_reading".into()
            }
        );
    }

    #[test]
    fn zero_cost_rejected() {
        let err = PolicyRegistry::new([FeaturePolicy::new("free", CreditType::AiGuru, 0, "Free")])
            .unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(_)));
    }

    #[test]
    fn legacy_credit_type_rejected() {
        let err = PolicyRegistry::new([FeaturePolicy::new(
            "old_chat",
            CreditType::LegacyAiQuestion,
            1,
            "Old chat",
        )])
        .unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(msg) if msg.contains("ai_guru")));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let err = PolicyRegistry::new([
            FeaturePolicy::new("chat", CreditType::AiGuru, 1, "Chat"),
            FeaturePolicy::new("chat", CreditType::Kundali, 1, "Chat again"),
        ])
        .unwrap_err();
        assert!(matches!(err, LedgerError::Configuration(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn loads_from_json() {
        let registry = PolicyRegistry::from_json(
            r#"[
                {"feature_key": "dream_analysis", "credit_type": "ai_guru", "cost_per_use": 3, "label": "Dream analysis"}
            ]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("dream_analysis").unwrap().cost_per_use, 3);
        assert!(registry.resolve("kundali_report").is_err());
    }

    #[test]
    fn malformed_json_is_configuration_error() {
        assert!(matches!(
            PolicyRegistry::from_json(r#"[{"feature_key": "x", "credit_type": "tarot"}]"#),
            Err(LedgerError::Configuration(_))
        ));
    }
}
