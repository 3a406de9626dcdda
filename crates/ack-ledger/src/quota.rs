use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// How many acknowledgments a document may collect.
///
/// Chosen once from configuration when the signing service is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignatureQuota {
    #[default]
    Unlimited,
    PlanBased { max_signers_per_document: u64 },
}

impl SignatureQuota {
    /// Check whether one more signature fits on a document that already has
    /// `current` of them.
    pub fn check(&self, doc_id: &str, current: u64) -> Result<(), LedgerError> {
        match *self {
            Self::Unlimited => Ok(()),
            Self::PlanBased {
                max_signers_per_document,
            } if current >= max_signers_per_document => Err(LedgerError::QuotaExceeded {
                doc_id: doc_id.to_string(),
                limit: max_signers_per_document,
            }),
            Self::PlanBased { .. } => Ok(()),
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Unlimited => None,
            Self::PlanBased {
                max_signers_per_document,
            } => Some(*max_signers_per_document),
        }
    }
}
