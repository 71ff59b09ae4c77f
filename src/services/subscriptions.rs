use log::{info, warn};
use mongodb::bson::{oid::ObjectId, DateTime};

use crate::ledger::{LedgerError, LedgerStore, Settlement};
use crate::models::{CoinOrder, SubscriptionStatus, UserSubscription};

pub struct SubscriptionService;

impl SubscriptionService {
    /// A pending record for an active plan. No coins move until activation.
    pub async fn create_pending(
        ledger: &dyn LedgerStore,
        user_id: &ObjectId,
        plan_id: &ObjectId,
        session_id: Option<String>,
    ) -> Result<UserSubscription, LedgerError> {
        let plan = ledger
            .plan(plan_id)
            .await?
            .filter(|plan| plan.active)
            .ok_or(LedgerError::SubscriptionNotFound)?;

        let record = UserSubscription::pending(*user_id, &plan, *plan_id, session_id);
        let record = ledger.insert_subscription(record).await?;
        info!("Pending subscription {:?} created for user {}", record.id, user_id);
        Ok(record)
    }

    /// Links a pending record to its checkout session. If the webhook got
    /// there first and already matched the session, the record is returned
    /// as is.
    pub async fn attach_session(
        ledger: &dyn LedgerStore,
        id: &ObjectId,
        session_id: &str,
    ) -> Result<UserSubscription, LedgerError> {
        if let Some(record) = ledger.attach_session(id, session_id).await? {
            return Ok(record);
        }
        let record = ledger.subscription(id).await?.ok_or(LedgerError::SubscriptionNotFound)?;
        if record.payment_session_id.as_deref() == Some(session_id) {
            info!("Subscription {} already matched to session {}", id, session_id);
            return Ok(record);
        }
        Err(LedgerError::InvalidTransition {
            from: record.status.as_str(),
            to: SubscriptionStatus::Pending.as_str(),
        })
    }

    /// Idempotent: a second call on the same record credits nothing.
    pub async fn activate(
        ledger: &dyn LedgerStore,
        id: &ObjectId,
    ) -> Result<Settlement<UserSubscription>, LedgerError> {
        Self::activate_with_session(ledger, id, None).await
    }

    pub async fn activate_with_session(
        ledger: &dyn LedgerStore,
        id: &ObjectId,
        session_id: Option<&str>,
    ) -> Result<Settlement<UserSubscription>, LedgerError> {
        let settlement = ledger.activate_subscription(id, session_id, DateTime::now()).await?;
        match &settlement {
            Settlement::Applied { record, transaction } => info!(
                "Subscription {} activated, {} LeadCoins credited to {} (balance {})",
                id, record.initial_lead_coins, record.user_id, transaction.balance_after
            ),
            Settlement::AlreadySettled(_) => warn!("Subscription {} already active, skipping", id),
        }
        Ok(settlement)
    }

    /// Payment failed or the checkout expired.
    pub async fn fail(ledger: &dyn LedgerStore, id: &ObjectId) -> Result<Option<UserSubscription>, LedgerError> {
        ledger
            .transition_subscription(id, &[SubscriptionStatus::Pending], SubscriptionStatus::Cancelled)
            .await
    }

    /// Owner-initiated cancel. Coins already credited stay with the user.
    pub async fn cancel(
        ledger: &dyn LedgerStore,
        user_id: &ObjectId,
        id: &ObjectId,
    ) -> Result<UserSubscription, LedgerError> {
        let record = ledger
            .subscription(id)
            .await?
            .filter(|record| &record.user_id == user_id)
            .ok_or(LedgerError::SubscriptionNotFound)?;

        ledger
            .transition_subscription(
                id,
                &[SubscriptionStatus::Pending, SubscriptionStatus::Active],
                SubscriptionStatus::Cancelled,
            )
            .await?
            .ok_or(LedgerError::InvalidTransition {
                from: record.status.as_str(),
                to: SubscriptionStatus::Cancelled.as_str(),
            })
    }

    pub async fn expire_due(ledger: &dyn LedgerStore, now: DateTime) -> Result<u64, LedgerError> {
        ledger.expire_subscriptions(now).await
    }

    pub async fn for_user(ledger: &dyn LedgerStore, user_id: &ObjectId) -> Result<Vec<UserSubscription>, LedgerError> {
        ledger.subscriptions_for_user(user_id).await
    }

    pub async fn create_coin_order(
        ledger: &dyn LedgerStore,
        user_id: &ObjectId,
        coins: i64,
        amount: i64,
        session_id: String,
    ) -> Result<CoinOrder, LedgerError> {
        if coins <= 0 {
            return Err(LedgerError::Validation("coins must be positive".to_string()));
        }
        ledger
            .insert_coin_order(CoinOrder::pending(*user_id, coins, amount, session_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::models::Role;

    #[tokio::test]
    async fn pending_record_credits_nothing() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(40, 30);

        let record = SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_a".into()))
            .await
            .unwrap();

        assert_eq!(record.status, SubscriptionStatus::Pending);
        assert!(!record.payment_verified);
        assert_eq!(record.initial_lead_coins, 40);
        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn activating_twice_credits_once() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 2);
        let plan = ledger.add_plan(40, 30);
        let record = SubscriptionService::create_pending(&ledger, &user, &plan, None).await.unwrap();
        let id = record.id.unwrap();

        let first = SubscriptionService::activate(&ledger, &id).await.unwrap();
        let second = SubscriptionService::activate(&ledger, &id).await.unwrap();

        assert!(first.is_applied());
        assert!(!second.is_applied());
        assert_eq!(ledger.balance(&user).await.unwrap(), 42);
        assert_eq!(ledger.journal(&user).len(), 1);

        let active = second.into_record();
        assert_eq!(active.status, SubscriptionStatus::Active);
        assert!(active.payment_verified);
        let days = (active.end_date.timestamp_millis() - active.start_date.timestamp_millis()) / 86_400_000;
        assert_eq!(days, 30);
    }

    #[tokio::test]
    async fn out_of_range_duration_is_rejected_without_credit() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(40, 200_000_000_000);
        let id = SubscriptionService::create_pending(&ledger, &user, &plan, None)
            .await
            .unwrap()
            .id
            .unwrap();

        let err = SubscriptionService::activate(&ledger, &id).await.unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
        assert!(ledger.journal(&user).is_empty());
        assert_eq!(ledger.subscription(&id).await.unwrap().unwrap().status, SubscriptionStatus::Pending);
    }

    #[tokio::test]
    async fn session_is_attached_after_the_record_exists() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(40, 30);
        let id = SubscriptionService::create_pending(&ledger, &user, &plan, None)
            .await
            .unwrap()
            .id
            .unwrap();
        let other = SubscriptionService::create_pending(&ledger, &user, &plan, None)
            .await
            .unwrap()
            .id
            .unwrap();

        let record = SubscriptionService::attach_session(&ledger, &id, "cs_first").await.unwrap();
        assert_eq!(record.payment_session_id.as_deref(), Some("cs_first"));
        assert_eq!(record.status, SubscriptionStatus::Pending);

        let err = SubscriptionService::attach_session(&ledger, &other, "cs_first").await.unwrap_err();
        assert!(matches!(err, LedgerError::Duplicate));
        assert!(ledger.attach_session(&id, "cs_second").await.unwrap().is_none());
        assert_eq!(
            ledger.subscription_by_session("cs_first").await.unwrap().unwrap().id,
            Some(id)
        );
    }

    #[tokio::test]
    async fn attach_after_webhook_match_keeps_the_settled_record() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(40, 30);
        let id = SubscriptionService::create_pending(&ledger, &user, &plan, None)
            .await
            .unwrap()
            .id
            .unwrap();
        SubscriptionService::activate_with_session(&ledger, &id, Some("cs_fast")).await.unwrap();

        let record = SubscriptionService::attach_session(&ledger, &id, "cs_fast").await.unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(ledger.balance(&user).await.unwrap(), 40);

        let cancelled = SubscriptionService::create_pending(&ledger, &user, &plan, None)
            .await
            .unwrap()
            .id
            .unwrap();
        SubscriptionService::fail(&ledger, &cancelled).await.unwrap();
        let err = SubscriptionService::attach_session(&ledger, &cancelled, "cs_late").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { from: "cancelled", .. }));
    }

    #[tokio::test]
    async fn inactive_plans_cannot_be_bought() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);

        let err = SubscriptionService::create_pending(&ledger, &user, &ObjectId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SubscriptionNotFound));
    }

    #[tokio::test]
    async fn cancelled_records_cannot_be_activated() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(10, 30);
        let record = SubscriptionService::create_pending(&ledger, &user, &plan, None).await.unwrap();
        let id = record.id.unwrap();

        SubscriptionService::fail(&ledger, &id).await.unwrap();
        let err = SubscriptionService::activate(&ledger, &id).await.unwrap_err();

        assert!(matches!(err, LedgerError::InvalidTransition { from: "cancelled", .. }));
        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn owner_cancel_keeps_granted_coins() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let other = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(10, 30);
        let id = SubscriptionService::create_pending(&ledger, &user, &plan, None)
            .await
            .unwrap()
            .id
            .unwrap();
        SubscriptionService::activate(&ledger, &id).await.unwrap();

        let err = SubscriptionService::cancel(&ledger, &other, &id).await.unwrap_err();
        assert!(matches!(err, LedgerError::SubscriptionNotFound));

        let cancelled = SubscriptionService::cancel(&ledger, &user, &id).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert_eq!(ledger.balance(&user).await.unwrap(), 10);

        let err = SubscriptionService::cancel(&ledger, &user, &id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn expiry_touches_only_past_due_active_records() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let short = ledger.add_plan(5, 1);
        let long = ledger.add_plan(5, 365);

        let a = SubscriptionService::create_pending(&ledger, &user, &short, None).await.unwrap().id.unwrap();
        let b = SubscriptionService::create_pending(&ledger, &user, &long, None).await.unwrap().id.unwrap();
        let c = SubscriptionService::create_pending(&ledger, &user, &short, None).await.unwrap().id.unwrap();
        SubscriptionService::activate(&ledger, &a).await.unwrap();
        SubscriptionService::activate(&ledger, &b).await.unwrap();

        let two_days_later = DateTime::from_millis(DateTime::now().timestamp_millis() + 2 * 86_400_000);
        let expired = SubscriptionService::expire_due(&ledger, two_days_later).await.unwrap();

        assert_eq!(expired, 1);
        assert_eq!(ledger.subscription(&a).await.unwrap().unwrap().status, SubscriptionStatus::Expired);
        assert_eq!(ledger.subscription(&b).await.unwrap().unwrap().status, SubscriptionStatus::Active);
        assert_eq!(ledger.subscription(&c).await.unwrap().unwrap().status, SubscriptionStatus::Pending);
    }
}
