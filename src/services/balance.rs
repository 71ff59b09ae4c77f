use log::info;
use mongodb::bson::oid::ObjectId;

use crate::ledger::{LedgerError, LedgerStore, Posting};
use crate::models::{CoinReason, CoinTransaction, User};
use crate::services::access::{self, Capability};

pub struct BalanceService;

impl BalanceService {
    pub async fn balance(ledger: &dyn LedgerStore, user_id: &ObjectId) -> Result<i64, LedgerError> {
        ledger.balance(user_id).await
    }

    /// Moves `delta` coins and journals the move under `reason`. Returns the
    /// new balance.
    pub async fn adjust(
        ledger: &dyn LedgerStore,
        user_id: &ObjectId,
        delta: i64,
        reason: CoinReason,
        description: &str,
    ) -> Result<i64, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::Validation("delta must be non-zero".to_string()));
        }
        let entry = ledger
            .post(Posting::new(*user_id, delta, reason, description))
            .await?;
        Ok(entry.balance_after)
    }

    pub async fn admin_grant(
        ledger: &dyn LedgerStore,
        actor: &User,
        user_id: &ObjectId,
        amount: i64,
        description: &str,
    ) -> Result<CoinTransaction, LedgerError> {
        access::require(actor, Capability::ManageCoins)?;
        if amount <= 0 {
            return Err(LedgerError::Validation("amount must be positive".to_string()));
        }
        let description = description.trim();
        if description.is_empty() {
            return Err(LedgerError::Validation("description is required".to_string()));
        }

        let mut posting = Posting::new(*user_id, amount, CoinReason::AdminGrant, description);
        if let Some(actor_id) = actor.id {
            posting = posting.with_reference(actor_id.to_hex());
        }
        let entry = ledger.post(posting).await?;
        info!(
            "Granted {} LeadCoins to {} ({}), balance now {}",
            amount, user_id, description, entry.balance_after
        );
        Ok(entry)
    }

    pub async fn history(
        ledger: &dyn LedgerStore,
        user_id: &ObjectId,
        limit: i64,
    ) -> Result<Vec<CoinTransaction>, LedgerError> {
        ledger.transactions(user_id, limit.clamp(1, 200)).await
    }
}
