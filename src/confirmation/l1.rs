use std::sync::Arc;

use super::ConfirmationResult;
use crate::error::RelayError;
use crate::l1_client::{L1Client, L1Transaction};

/// L1 confirmation checker. A transaction is final once it is part of a
/// checkpoint.
pub struct L1Confirmation {
    client: Arc<L1Client>,
}

impl L1Confirmation {
    pub fn new(client: Arc<L1Client>) -> Self {
        Self { client }
    }

    /// Check an unlock transaction by digest
    pub async fn check(&self, digest: &str) -> Result<ConfirmationResult, RelayError> {
        let tx = self.client.get_transaction(digest).await?;
        Ok(evaluate_transaction(tx.as_ref()))
    }
}

fn evaluate_transaction(tx: Option<&L1Transaction>) -> ConfirmationResult {
    let Some(tx) = tx else {
        return ConfirmationResult::Pending;
    };

    if let Some(effects) = &tx.effects {
        if !effects.status.is_success() {
            return ConfirmationResult::Failed(
                effects
                    .status
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("unlock {} failed", tx.digest)),
            );
        }
    }

    match (&tx.checkpoint, &tx.effects) {
        (Some(_), Some(_)) => ConfirmationResult::Confirmed,
        _ => ConfirmationResult::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tx(value: serde_json::Value) -> L1Transaction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_unknown_transaction_is_pending() {
        assert_eq!(evaluate_transaction(None), ConfirmationResult::Pending);
    }

    #[test]
    fn test_checkpointed_success_is_confirmed() {
        let confirmed = tx(json!({
            "digest": "D1",
            "effects": { "status": { "status": "success" } },
            "checkpoint": "1200"
        }));
        assert_eq!(
            evaluate_transaction(Some(&confirmed)),
            ConfirmationResult::Confirmed
        );

        let executed = tx(json!({
            "digest": "D1",
            "effects": { "status": { "status": "success" } }
        }));
        assert_eq!(
            evaluate_transaction(Some(&executed)),
            ConfirmationResult::Pending
        );
    }

    #[test]
    fn test_failed_effects() {
        let failed = tx(json!({
            "digest": "D2",
            "effects": { "status": { "status": "failure", "error": "MoveAbort(.., 3)" } },
            "checkpoint": "1200"
        }));
        assert_eq!(
            evaluate_transaction(Some(&failed)),
            ConfirmationResult::Failed("MoveAbort(.., 3)".to_string())
        );
    }
}
