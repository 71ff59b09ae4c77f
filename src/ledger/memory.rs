//! Single-lock ledger for tests. Every operation runs under one mutex, so
//! each call is serializable, and the uniqueness rules of the MongoDB indexes
//! are re-checked by hand.

use std::collections::HashMap;
use std::sync::Mutex;

use mongodb::bson::{oid::ObjectId, DateTime};

use super::{days_after, LedgerError, LedgerResult, LedgerStore, Posting, Settlement, Unlock};
use crate::models::{
    CoinOrder, CoinReason, CoinTransaction, Coupon, CouponRedemption, Lead, LeadCoinSettings,
    LeadView, OrderStatus, ReconciliationItem, Role, SubscriptionPlan, SubscriptionStatus, User,
    UserStatus, UserSubscription,
};

#[derive(Default)]
struct State {
    users: HashMap<ObjectId, User>,
    plans: HashMap<ObjectId, SubscriptionPlan>,
    subscriptions: Vec<UserSubscription>,
    orders: Vec<CoinOrder>,
    journal: Vec<CoinTransaction>,
    leads: HashMap<ObjectId, Lead>,
    views: Vec<LeadView>,
    settings: LeadCoinSettings,
    coupons: HashMap<ObjectId, Coupon>,
    redemptions: Vec<CouponRedemption>,
    reconciliation: Vec<ReconciliationItem>,
}

impl State {
    fn apply(&mut self, posting: &Posting) -> LedgerResult<CoinTransaction> {
        let user = self
            .users
            .get_mut(&posting.user_id)
            .ok_or(LedgerError::UserNotFound)?;
        let balance = user
            .lead_coins
            .checked_add(posting.delta)
            .ok_or_else(|| LedgerError::Validation("balance out of range".to_string()))?;
        if balance < 0 {
            return Err(LedgerError::InsufficientFunds {
                balance: user.lead_coins,
                requested: -posting.delta,
            });
        }
        user.lead_coins = balance;

        let mut entry = posting.journal_entry(user.lead_coins);
        entry.id = Some(ObjectId::new());
        self.journal.push(entry.clone());
        Ok(entry)
    }

    fn session_taken(&self, session_id: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| s.payment_session_id.as_deref() == Some(session_id))
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_user(&self, role: Role, lead_coins: i64) -> ObjectId {
        let id = ObjectId::new();
        let now = DateTime::now();
        let user = User {
            id: Some(id),
            name: format!("{} {}", role.as_str(), id.to_hex()),
            email: format!("{}@example.com", id.to_hex()),
            password_hash: String::new(),
            role,
            lead_coins,
            permissions: Vec::new(),
            status: UserStatus::Active,
            is_verified: true,
            verification_token: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        self.lock().users.insert(id, user);
        id
    }

    pub fn set_permissions(&self, user_id: &ObjectId, permissions: &[&str]) {
        if let Some(user) = self.lock().users.get_mut(user_id) {
            user.permissions = permissions.iter().map(|p| p.to_string()).collect();
        }
    }

    pub fn set_status(&self, user_id: &ObjectId, status: UserStatus) {
        if let Some(user) = self.lock().users.get_mut(user_id) {
            user.status = status;
        }
    }

    pub fn add_plan(&self, lead_coins: i64, duration_days: i64) -> ObjectId {
        let id = ObjectId::new();
        let now = DateTime::now();
        self.lock().plans.insert(
            id,
            SubscriptionPlan {
                id: Some(id),
                name: format!("{} coins", lead_coins),
                price: lead_coins * 100,
                lead_coins,
                duration_days,
                active: true,
                features: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn add_lead(&self, created_by: ObjectId) -> ObjectId {
        let id = ObjectId::new();
        let now = DateTime::now();
        self.lock().leads.insert(
            id,
            Lead {
                id: Some(id),
                title: "Kitchen renovation".to_string(),
                description: "Full remodel, three weeks".to_string(),
                price: Some(4500.0),
                location: Some("Leeds".to_string()),
                images: Vec::new(),
                category: Some("construction".to_string()),
                contact_email: Some("owner@example.com".to_string()),
                contact_phone: Some("+44 113 496 0000".to_string()),
                skills: vec!["carpentry".to_string()],
                work_type: None,
                experience: None,
                created_by,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn add_coupon(&self, code: &str, max_uses: i64, coin_amount: i64) -> ObjectId {
        let id = ObjectId::new();
        let now = DateTime::now();
        self.lock().coupons.insert(
            id,
            Coupon {
                id: Some(id),
                code: code.to_string(),
                max_uses,
                current_uses: 0,
                coin_amount,
                active: true,
                expires_at: None,
                created_by: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn update_coupon(&self, id: &ObjectId, f: impl FnOnce(&mut Coupon)) {
        if let Some(coupon) = self.lock().coupons.get_mut(id) {
            f(coupon);
        }
    }

    pub fn set_settings(&self, settings: LeadCoinSettings) {
        self.lock().settings = settings;
    }

    pub fn coupon(&self, id: &ObjectId) -> Option<Coupon> {
        self.lock().coupons.get(id).cloned()
    }

    pub fn journal(&self, user_id: &ObjectId) -> Vec<CoinTransaction> {
        self.lock()
            .journal
            .iter()
            .filter(|t| &t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn reconciliation(&self) -> Vec<ReconciliationItem> {
        self.lock().reconciliation.clone()
    }

    pub fn all_subscriptions(&self) -> Vec<UserSubscription> {
        self.lock().subscriptions.clone()
    }
}

#[rocket::async_trait]
impl LedgerStore for MemoryLedger {
    async fn user(&self, user_id: &ObjectId) -> LedgerResult<Option<User>> {
        Ok(self.lock().users.get(user_id).cloned())
    }

    async fn balance(&self, user_id: &ObjectId) -> LedgerResult<i64> {
        self.lock()
            .users
            .get(user_id)
            .map(|u| u.lead_coins)
            .ok_or(LedgerError::UserNotFound)
    }

    async fn post(&self, posting: Posting) -> LedgerResult<CoinTransaction> {
        self.lock().apply(&posting)
    }

    async fn transactions(&self, user_id: &ObjectId, limit: i64) -> LedgerResult<Vec<CoinTransaction>> {
        Ok(self
            .lock()
            .journal
            .iter()
            .rev()
            .filter(|t| &t.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn plan(&self, plan_id: &ObjectId) -> LedgerResult<Option<SubscriptionPlan>> {
        Ok(self.lock().plans.get(plan_id).cloned())
    }

    async fn insert_subscription(&self, mut record: UserSubscription) -> LedgerResult<UserSubscription> {
        let mut state = self.lock();
        if let Some(session_id) = record.payment_session_id.as_deref() {
            if state.session_taken(session_id) {
                return Err(LedgerError::Duplicate);
            }
        }
        record.id = Some(ObjectId::new());
        state.subscriptions.push(record.clone());
        Ok(record)
    }

    async fn subscription(&self, id: &ObjectId) -> LedgerResult<Option<UserSubscription>> {
        Ok(self.lock().subscriptions.iter().find(|s| s.id.as_ref() == Some(id)).cloned())
    }

    async fn attach_session(&self, id: &ObjectId, session_id: &str) -> LedgerResult<Option<UserSubscription>> {
        let mut state = self.lock();
        let index = state
            .subscriptions
            .iter()
            .position(|s| s.id.as_ref() == Some(id))
            .ok_or(LedgerError::SubscriptionNotFound)?;
        let record = &state.subscriptions[index];
        if record.status != SubscriptionStatus::Pending || record.payment_session_id.is_some() {
            return Ok(None);
        }
        if state.session_taken(session_id) {
            return Err(LedgerError::Duplicate);
        }

        let record = &mut state.subscriptions[index];
        record.payment_session_id = Some(session_id.to_string());
        record.updated_at = DateTime::now();
        Ok(Some(record.clone()))
    }

    async fn subscription_by_session(&self, session_id: &str) -> LedgerResult<Option<UserSubscription>> {
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .find(|s| s.payment_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn pending_subscription(
        &self,
        user_id: &ObjectId,
        plan_id: &ObjectId,
    ) -> LedgerResult<Option<UserSubscription>> {
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .rev()
            .find(|s| {
                &s.user_id == user_id
                    && &s.subscription_id == plan_id
                    && s.status == SubscriptionStatus::Pending
            })
            .cloned())
    }

    async fn subscriptions_for_user(&self, user_id: &ObjectId) -> LedgerResult<Vec<UserSubscription>> {
        Ok(self
            .lock()
            .subscriptions
            .iter()
            .rev()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn activate_subscription(
        &self,
        id: &ObjectId,
        session_id: Option<&str>,
        now: DateTime,
    ) -> LedgerResult<Settlement<UserSubscription>> {
        let mut state = self.lock();
        let index = state
            .subscriptions
            .iter()
            .position(|s| s.id.as_ref() == Some(id))
            .ok_or(LedgerError::SubscriptionNotFound)?;

        let current = state.subscriptions[index].clone();
        if current.is_settled() {
            return Ok(Settlement::AlreadySettled(current));
        }
        if current.status != SubscriptionStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                from: current.status.as_str(),
                to: SubscriptionStatus::Active.as_str(),
            });
        }
        if let Some(session_id) = session_id {
            let taken_elsewhere = state.subscriptions.iter().any(|s| {
                s.id.as_ref() != Some(id) && s.payment_session_id.as_deref() == Some(session_id)
            });
            if taken_elsewhere {
                return Err(LedgerError::Duplicate);
            }
        }

        let end_date = days_after(now, current.duration_days)?;
        let posting = Posting::new(
            current.user_id,
            current.initial_lead_coins,
            CoinReason::SubscriptionActivation,
            "Subscription activated",
        )
        .with_reference(id.to_hex());
        let transaction = state.apply(&posting)?;

        let record = &mut state.subscriptions[index];
        record.status = SubscriptionStatus::Active;
        record.payment_verified = true;
        record.start_date = now;
        record.end_date = end_date;
        record.updated_at = now;
        if let Some(session_id) = session_id {
            record.payment_session_id = Some(session_id.to_string());
        }

        Ok(Settlement::Applied { record: record.clone(), transaction })
    }

    async fn transition_subscription(
        &self,
        id: &ObjectId,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> LedgerResult<Option<UserSubscription>> {
        let mut state = self.lock();
        let record = state
            .subscriptions
            .iter_mut()
            .find(|s| s.id.as_ref() == Some(id))
            .ok_or(LedgerError::SubscriptionNotFound)?;
        if !from.contains(&record.status) {
            return Ok(None);
        }
        record.status = to;
        record.updated_at = DateTime::now();
        Ok(Some(record.clone()))
    }

    async fn expire_subscriptions(&self, now: DateTime) -> LedgerResult<u64> {
        let mut expired = 0;
        for record in self.lock().subscriptions.iter_mut() {
            if record.status == SubscriptionStatus::Active && record.end_date < now {
                record.status = SubscriptionStatus::Expired;
                record.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn insert_coin_order(&self, mut order: CoinOrder) -> LedgerResult<CoinOrder> {
        let mut state = self.lock();
        if state.orders.iter().any(|o| o.payment_session_id == order.payment_session_id) {
            return Err(LedgerError::Duplicate);
        }
        order.id = Some(ObjectId::new());
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn coin_order_by_session(&self, session_id: &str) -> LedgerResult<Option<CoinOrder>> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|o| o.payment_session_id == session_id)
            .cloned())
    }

    async fn complete_coin_order(&self, id: &ObjectId) -> LedgerResult<Settlement<CoinOrder>> {
        let mut state = self.lock();
        let index = state
            .orders
            .iter()
            .position(|o| o.id.as_ref() == Some(id))
            .ok_or(LedgerError::OrderNotFound)?;

        let current = state.orders[index].clone();
        match current.status {
            OrderStatus::Completed => return Ok(Settlement::AlreadySettled(current)),
            OrderStatus::Failed => {
                return Err(LedgerError::InvalidTransition {
                    from: OrderStatus::Failed.as_str(),
                    to: OrderStatus::Completed.as_str(),
                })
            }
            OrderStatus::Pending => {}
        }

        let posting = Posting::new(
            current.user_id,
            current.coins,
            CoinReason::CoinPurchase,
            format!("Purchased {} LeadCoins", current.coins),
        )
        .with_reference(id.to_hex());
        let transaction = state.apply(&posting)?;

        let record = &mut state.orders[index];
        record.status = OrderStatus::Completed;
        record.updated_at = DateTime::now();
        Ok(Settlement::Applied { record: record.clone(), transaction })
    }

    async fn fail_coin_order(&self, id: &ObjectId) -> LedgerResult<bool> {
        let mut state = self.lock();
        match state.orders.iter_mut().find(|o| o.id.as_ref() == Some(id)) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Failed;
                order.updated_at = DateTime::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lead(&self, lead_id: &ObjectId) -> LedgerResult<Option<Lead>> {
        Ok(self.lock().leads.get(lead_id).cloned())
    }

    async fn settings(&self) -> LedgerResult<LeadCoinSettings> {
        Ok(self.lock().settings.clone())
    }

    async fn lead_view(&self, user_id: &ObjectId, lead_id: &ObjectId) -> LedgerResult<Option<LeadView>> {
        Ok(self
            .lock()
            .views
            .iter()
            .find(|v| &v.user_id == user_id && &v.lead_id == lead_id)
            .cloned())
    }

    async fn unlock_lead(&self, user_id: &ObjectId, lead_id: &ObjectId, cost: i64) -> LedgerResult<Unlock> {
        let mut state = self.lock();
        let balance = state
            .users
            .get(user_id)
            .map(|u| u.lead_coins)
            .ok_or(LedgerError::UserNotFound)?;

        if state.views.iter().any(|v| &v.user_id == user_id && &v.lead_id == lead_id) {
            return Ok(Unlock::AlreadyUnlocked { balance });
        }

        let balance = if cost > 0 {
            let posting = Posting::new(*user_id, -cost, CoinReason::LeadView, "Lead contact unlocked")
                .with_reference(lead_id.to_hex());
            state.apply(&posting)?.balance_after
        } else {
            balance
        };

        state.views.push(LeadView {
            id: Some(ObjectId::new()),
            user_id: *user_id,
            lead_id: *lead_id,
            coins_spent: cost,
            viewed_at: DateTime::now(),
        });
        Ok(Unlock::Unlocked { coins_spent: cost, balance })
    }

    async fn coupon_by_code(&self, code: &str) -> LedgerResult<Option<Coupon>> {
        Ok(self.lock().coupons.values().find(|c| c.code == code).cloned())
    }

    async fn redeem_coupon(&self, coupon: &Coupon, user_id: &ObjectId) -> LedgerResult<CoinTransaction> {
        let coupon_id = coupon.id.ok_or(LedgerError::CouponNotFound)?;
        let mut state = self.lock();

        if state
            .redemptions
            .iter()
            .any(|r| r.coupon_id == coupon_id && &r.user_id == user_id)
        {
            return Err(LedgerError::AlreadyRedeemed);
        }

        let stored = state.coupons.get(&coupon_id).ok_or(LedgerError::CouponNotFound)?;
        if !stored.active || stored.current_uses >= stored.max_uses {
            return Err(LedgerError::CouponExhausted);
        }

        let posting = Posting::new(
            *user_id,
            coupon.coin_amount,
            CoinReason::CouponRedemption,
            format!("Coupon {}", coupon.code),
        )
        .with_reference(coupon_id.to_hex());
        let entry = state.apply(&posting)?;

        if let Some(stored) = state.coupons.get_mut(&coupon_id) {
            stored.current_uses += 1;
        }
        state.redemptions.push(CouponRedemption {
            id: Some(ObjectId::new()),
            coupon_id,
            user_id: *user_id,
            coins_granted: coupon.coin_amount,
            redeemed_at: DateTime::now(),
        });
        Ok(entry)
    }

    async fn flag_for_reconciliation(&self, mut item: ReconciliationItem) -> LedgerResult<()> {
        let mut state = self.lock();
        if state
            .reconciliation
            .iter()
            .all(|r| r.payment_session_id != item.payment_session_id)
        {
            item.id = Some(ObjectId::new());
            state.reconciliation.push(item);
        }
        Ok(())
    }
}
