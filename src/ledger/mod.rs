//! Storage seam for every balance-affecting operation.
//!
//! Each method that mutates more than one record is atomic: either every
//! write lands or none does. The MongoDB implementation uses multi-document
//! transactions; the in-memory one used by tests holds a single lock.

#[cfg(test)]
pub mod memory;
pub mod mongo;

use std::sync::Arc;

use mongodb::bson::{oid::ObjectId, DateTime};
use thiserror::Error;

use crate::models::{
    CoinOrder, CoinReason, CoinTransaction, Coupon, Lead, LeadCoinSettings, LeadView,
    ReconciliationItem, SubscriptionPlan, SubscriptionStatus, User, UserSubscription,
};

pub use mongo::MongoLedger;

/// Shared handle managed by Rocket.
pub type Ledger = Arc<dyn LedgerStore>;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error("Not enough LeadCoins: balance {balance}, cost {cost}")]
    InsufficientCoins { balance: i64, cost: i64 },

    #[error("Coupon not found")]
    CouponNotFound,

    #[error("Coupon has reached its usage limit")]
    CouponExhausted,

    #[error("Coupon already redeemed")]
    AlreadyRedeemed,

    #[error("Subscription not found")]
    SubscriptionNotFound,

    #[error("Coin order not found")]
    OrderNotFound,

    #[error("Lead not found")]
    LeadNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("Cannot move {from} record to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("Payment verification failed: {0}")]
    PaymentVerificationFailed(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Duplicate key")]
    Duplicate,

    #[error("Concurrent update conflict")]
    Conflict,

    #[error("Database error: {0}")]
    Database(String),
}

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// `now` plus a whole number of days. Non-positive or out-of-range spans
/// fail with `Validation`.
pub fn days_after(now: DateTime, days: i64) -> LedgerResult<DateTime> {
    if days < 1 {
        return Err(LedgerError::Validation(format!("{} is not a valid number of days", days)));
    }
    days.checked_mul(MILLIS_PER_DAY)
        .and_then(|span| now.timestamp_millis().checked_add(span))
        .map(DateTime::from_millis)
        .ok_or_else(|| LedgerError::Validation(format!("{} days is out of range", days)))
}

/// A single balance movement, applied together with its journal entry.
#[derive(Debug, Clone)]
pub struct Posting {
    pub user_id: ObjectId,
    pub delta: i64,
    pub reason: CoinReason,
    pub description: String,
    pub reference: Option<String>,
}

impl Posting {
    pub fn new(user_id: ObjectId, delta: i64, reason: CoinReason, description: impl Into<String>) -> Self {
        Posting {
            user_id,
            delta,
            reason,
            description: description.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub(crate) fn journal_entry(&self, balance_after: i64) -> CoinTransaction {
        CoinTransaction {
            id: None,
            user_id: self.user_id,
            delta: self.delta,
            reason: self.reason,
            description: self.description.clone(),
            reference: self.reference.clone(),
            balance_after,
            created_at: DateTime::now(),
        }
    }
}

/// Result of a pending→settled transition that may already have happened.
#[derive(Debug, Clone)]
pub enum Settlement<T> {
    /// This call performed the transition and credited the coins.
    Applied { record: T, transaction: CoinTransaction },
    /// An earlier call already did; nothing changed.
    AlreadySettled(T),
}

impl<T> Settlement<T> {
    pub fn into_record(self) -> T {
        match self {
            Settlement::Applied { record, .. } => record,
            Settlement::AlreadySettled(record) => record,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Settlement::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unlock {
    /// First view: recorded now, `coins_spent` debited.
    Unlocked { coins_spent: i64, balance: i64 },
    /// The view record already existed; nothing debited.
    AlreadyUnlocked { balance: i64 },
}

#[rocket::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn user(&self, user_id: &ObjectId) -> LedgerResult<Option<User>>;

    async fn balance(&self, user_id: &ObjectId) -> LedgerResult<i64>;

    /// Applies the delta and appends the journal entry atomically. A debit
    /// that would overdraw fails with `InsufficientFunds` and changes nothing.
    async fn post(&self, posting: Posting) -> LedgerResult<CoinTransaction>;

    /// Newest first.
    async fn transactions(&self, user_id: &ObjectId, limit: i64) -> LedgerResult<Vec<CoinTransaction>>;

    async fn plan(&self, plan_id: &ObjectId) -> LedgerResult<Option<SubscriptionPlan>>;

    /// Fails with `Duplicate` when the session id is already taken.
    async fn insert_subscription(&self, record: UserSubscription) -> LedgerResult<UserSubscription>;

    async fn subscription(&self, id: &ObjectId) -> LedgerResult<Option<UserSubscription>>;

    /// Stores the checkout session id on a pending record that has none yet.
    /// Returns `None` when the record has moved on or already carries one.
    /// Fails with `Duplicate` when another record holds the session id.
    async fn attach_session(&self, id: &ObjectId, session_id: &str) -> LedgerResult<Option<UserSubscription>>;

    async fn subscription_by_session(&self, session_id: &str) -> LedgerResult<Option<UserSubscription>>;

    /// Most recent pending record for this user and plan.
    async fn pending_subscription(&self, user_id: &ObjectId, plan_id: &ObjectId) -> LedgerResult<Option<UserSubscription>>;

    /// Newest first.
    async fn subscriptions_for_user(&self, user_id: &ObjectId) -> LedgerResult<Vec<UserSubscription>>;

    /// pending → active with `payment_verified`, crediting
    /// `initial_lead_coins` in the same transaction. `session_id`, when
    /// given, replaces the stored session id.
    async fn activate_subscription(
        &self,
        id: &ObjectId,
        session_id: Option<&str>,
        now: DateTime,
    ) -> LedgerResult<Settlement<UserSubscription>>;

    /// Moves a record in one of `from` to `to`. Returns `None` when the
    /// record exists but is in some other state.
    async fn transition_subscription(
        &self,
        id: &ObjectId,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> LedgerResult<Option<UserSubscription>>;

    /// active → expired for every record whose `end_date` is before `now`.
    async fn expire_subscriptions(&self, now: DateTime) -> LedgerResult<u64>;

    async fn insert_coin_order(&self, order: CoinOrder) -> LedgerResult<CoinOrder>;

    async fn coin_order_by_session(&self, session_id: &str) -> LedgerResult<Option<CoinOrder>>;

    /// pending → completed, crediting `coins` in the same transaction.
    async fn complete_coin_order(&self, id: &ObjectId) -> LedgerResult<Settlement<CoinOrder>>;

    /// pending → failed. Returns false when the order was not pending.
    async fn fail_coin_order(&self, id: &ObjectId) -> LedgerResult<bool>;

    async fn lead(&self, lead_id: &ObjectId) -> LedgerResult<Option<Lead>>;

    async fn settings(&self) -> LedgerResult<LeadCoinSettings>;

    async fn lead_view(&self, user_id: &ObjectId, lead_id: &ObjectId) -> LedgerResult<Option<LeadView>>;

    /// Records the (user, lead) view and debits `cost` as one unit. When the
    /// view already exists nothing is debited.
    async fn unlock_lead(&self, user_id: &ObjectId, lead_id: &ObjectId, cost: i64) -> LedgerResult<Unlock>;

    async fn coupon_by_code(&self, code: &str) -> LedgerResult<Option<Coupon>>;

    /// Records the redemption, bumps `current_uses` under the `max_uses`
    /// cap, and credits `coin_amount`, all in one transaction.
    async fn redeem_coupon(&self, coupon: &Coupon, user_id: &ObjectId) -> LedgerResult<CoinTransaction>;

    /// Upserts by session id, so redelivered events queue once.
    async fn flag_for_reconciliation(&self, item: ReconciliationItem) -> LedgerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_after_rejects_spans_it_cannot_represent() {
        let now = DateTime::from_millis(0);
        assert_eq!(days_after(now, 2).unwrap().timestamp_millis(), 2 * 86_400_000);
        assert!(matches!(days_after(now, 0), Err(LedgerError::Validation(_))));
        assert!(matches!(days_after(now, 200_000_000_000), Err(LedgerError::Validation(_))));
        assert!(matches!(days_after(now, i64::MAX), Err(LedgerError::Validation(_))));
    }
}
