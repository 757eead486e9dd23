//! Product catalog for payment reconciliation.
//!
//! Maps a gateway `product_id` to what the purchase grants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CreditType, LedgerError};

/// What a purchased product grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductGrant {
    /// A one-off credit pack.
    Credits {
        /// Credit type granted.
        credit_type: CreditType,
        /// Number of credits.
        amount: i64,
    },

    /// A subscription activation or renewal.
    Subscription {
        /// Plan identifier stored on the subscription record.
        plan_id: String,
        /// Length of the paid period. `None` is open-ended.
        duration_days: Option<i64>,
    },
}

impl ProductGrant {
    /// Subscription period as a duration, if bounded.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        match self {
            Self::Subscription {
                duration_days: Some(days),
                ..
            } => Some(chrono::Duration::days(*days)),
            _ => None,
        }
    }
}

/// Static product catalog.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    products: BTreeMap<String, ProductGrant>,
}

impl ProductCatalog {
    /// Build a catalog from `(product_id, grant)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` for non-positive credit amounts,
    /// non-positive durations, or legacy credit types.
    pub fn new(
        products: impl IntoIterator<Item = (String, ProductGrant)>,
    ) -> Result<Self, LedgerError> {
        let mut map = BTreeMap::new();
        for (product_id, grant) in products {
            match &grant {
                ProductGrant::Credits {
                    credit_type,
                    amount,
                } => {
                    if *amount < 1 {
                        return Err(LedgerError::Configuration(format!(
                            "product {product_id} grants {amount} credits"
                        )));
                    }
                    if credit_type.is_legacy() {
                        return Err(LedgerError::Configuration(format!(
                            "product {product_id} uses legacy credit type {credit_type}"
                        )));
                    }
                }
                ProductGrant::Subscription {
                    duration_days: Some(days),
                    ..
                } if *days < 1 => {
                    return Err(LedgerError::Configuration(format!(
                        "product {product_id} has duration {days} days"
                    )));
                }
                ProductGrant::Subscription { .. } => {}
            }
            map.insert(product_id, grant);
        }
        Ok(Self { products: map })
    }

    /// Look up the grant for a product.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownProduct` if the product is not sold.
    pub fn lookup(&self, product_id: &str) -> Result<&ProductGrant, LedgerError> {
        self.products
            .get(product_id)
            .ok_or_else(|| LedgerError::UnknownProduct {
                product_id: product_id.to_string(),
            })
    }

    /// Iterate over `(product_id, grant)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProductGrant)> {
        self.products.iter().map(|(id, grant)| (id.as_str(), grant))
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        let credits = |credit_type, amount| ProductGrant::Credits {
            credit_type,
            amount,
        };
        let subscription = |plan_id: &str, duration_days| ProductGrant::Subscription {
            plan_id: plan_id.to_string(),
            duration_days,
        };

        let products = [
            ("ai_guru_pack_5", credits(CreditType::AiGuru, 5)),
            ("ai_guru_pack_20", credits(CreditType::AiGuru, 20)),
            ("kundali_single", credits(CreditType::Kundali, 1)),
            ("kundali_pack_3", credits(CreditType::Kundali, 3)),
            (
                "lifetime_prediction",
                credits(CreditType::LifetimePrediction, 1),
            ),
            ("premium_monthly", subscription("premium", Some(30))),
            ("premium_yearly", subscription("premium", Some(365))),
            ("premium_lifetime", subscription("premium_lifetime", None)),
        ];

        Self {
            products: products
                .into_iter()
                .map(|(id, grant)| (id.to_string(), grant))
                .collect(),
        }
    }
}
