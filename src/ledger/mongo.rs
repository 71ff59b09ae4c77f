use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions, ReturnDocument, UpdateOptions,
};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use rocket::futures::TryStreamExt;

use super::{days_after, LedgerError, LedgerResult, LedgerStore, Posting, Settlement, Unlock};
use crate::db;
use crate::models::{
    CoinOrder, CoinReason, CoinTransaction, Coupon, CouponRedemption, Lead, LeadCoinSettings,
    LeadView, OrderStatus, ReconciliationItem, SubscriptionPlan, SubscriptionStatus, User,
    UserSubscription, SETTINGS_ID,
};

const MAX_TXN_ATTEMPTS: u32 = 3;
const DUPLICATE_KEY: i32 = 11000;

impl From<MongoError> for LedgerError {
    fn from(e: MongoError) -> Self {
        if e.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            return LedgerError::Conflict;
        }
        if is_duplicate_key(&e) {
            return LedgerError::Duplicate;
        }
        LedgerError::Database(e.to_string())
    }
}

fn is_duplicate_key(e: &MongoError) -> bool {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
        ErrorKind::Command(ce) => ce.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn return_after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

/// Re-runs a transactional operation while it keeps losing write conflicts.
macro_rules! with_retry {
    ($op:expr) => {{
        let mut attempt = 1;
        loop {
            match $op {
                Err(LedgerError::Conflict) if attempt < MAX_TXN_ATTEMPTS => attempt += 1,
                other => break other,
            }
        }
    }};
}

pub struct MongoLedger {
    client: Client,
    db: Database,
}

impl MongoLedger {
    pub fn new(client: Client, db: Database) -> Self {
        MongoLedger { client, db }
    }

    fn users(&self) -> Collection<User> {
        self.db.collection(db::USERS)
    }

    fn plans(&self) -> Collection<SubscriptionPlan> {
        self.db.collection(db::SUBSCRIPTION_PLANS)
    }

    fn user_subscriptions(&self) -> Collection<UserSubscription> {
        self.db.collection(db::USER_SUBSCRIPTIONS)
    }

    fn coin_orders(&self) -> Collection<CoinOrder> {
        self.db.collection(db::COIN_ORDERS)
    }

    fn coin_transactions(&self) -> Collection<CoinTransaction> {
        self.db.collection(db::COIN_TRANSACTIONS)
    }

    fn leads(&self) -> Collection<Lead> {
        self.db.collection(db::LEADS)
    }

    fn lead_views(&self) -> Collection<LeadView> {
        self.db.collection(db::LEAD_VIEWS)
    }

    fn coupons(&self) -> Collection<Coupon> {
        self.db.collection(db::COUPONS)
    }

    fn redemptions(&self) -> Collection<CouponRedemption> {
        self.db.collection(db::COUPON_REDEMPTIONS)
    }

    /// Unique indexes here back the idempotency rules of the ledger.
    pub async fn ensure_indexes(&self) -> LedgerResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        let indexes: Vec<(&str, Document, Option<IndexOptions>)> = vec![
            (db::USERS, doc! { "email": 1 }, Some(unique())),
            (
                db::USER_SUBSCRIPTIONS,
                doc! { "payment_session_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "payment_session_id": { "$type": "string" } })
                        .build(),
                ),
            ),
            (
                db::USER_SUBSCRIPTIONS,
                doc! { "user_id": 1, "subscription_id": 1, "status": 1 },
                None,
            ),
            (db::USER_SUBSCRIPTIONS, doc! { "status": 1, "end_date": 1 }, None),
            (db::COIN_ORDERS, doc! { "payment_session_id": 1 }, Some(unique())),
            (db::LEAD_VIEWS, doc! { "user_id": 1, "lead_id": 1 }, Some(unique())),
            (db::COUPONS, doc! { "code": 1 }, Some(unique())),
            (db::COUPON_REDEMPTIONS, doc! { "coupon_id": 1, "user_id": 1 }, Some(unique())),
            (db::COIN_TRANSACTIONS, doc! { "user_id": 1, "created_at": -1 }, None),
            (db::RECONCILIATION_QUEUE, doc! { "payment_session_id": 1 }, Some(unique())),
        ];

        for (collection, keys, options) in indexes {
            let model = IndexModel::builder().keys(keys).options(options).build();
            self.db
                .collection::<Document>(collection)
                .create_index(model, None)
                .await?;
        }
        Ok(())
    }

    async fn begin(&self) -> LedgerResult<ClientSession> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(session)
    }

    /// Balance change plus journal entry inside an open transaction.
    async fn post_in(&self, session: &mut ClientSession, posting: &Posting) -> LedgerResult<CoinTransaction> {
        let mut filter = doc! { "_id": posting.user_id };
        if posting.delta < 0 {
            filter.insert("lead_coins", doc! { "$gte": -posting.delta });
        } else {
            filter.insert("lead_coins", doc! { "$lte": i64::MAX - posting.delta });
        }

        let updated = self
            .users()
            .find_one_and_update_with_session(
                filter,
                doc! {
                    "$inc": { "lead_coins": posting.delta },
                    "$set": { "updated_at": DateTime::now() }
                },
                return_after(),
                session,
            )
            .await?;

        let user = match updated {
            Some(user) => user,
            None => {
                let current = self
                    .users()
                    .find_one_with_session(doc! { "_id": posting.user_id }, None, session)
                    .await?;
                return Err(match current {
                    Some(_) if posting.delta > 0 => LedgerError::Validation("balance out of range".to_string()),
                    Some(user) => LedgerError::InsufficientFunds {
                        balance: user.lead_coins,
                        requested: -posting.delta,
                    },
                    None => LedgerError::UserNotFound,
                });
            }
        };

        let mut entry = posting.journal_entry(user.lead_coins);
        let inserted = self
            .coin_transactions()
            .insert_one_with_session(&entry, None, session)
            .await?;
        entry.id = inserted.inserted_id.as_object_id();
        Ok(entry)
    }

    async fn post_once(&self, posting: &Posting) -> LedgerResult<CoinTransaction> {
        let mut session = self.begin().await?;
        let entry = self.post_in(&mut session, posting).await?;
        session.commit_transaction().await?;
        Ok(entry)
    }

    async fn activate_once(
        &self,
        id: &ObjectId,
        session_id: Option<&str>,
        now: DateTime,
    ) -> LedgerResult<Settlement<UserSubscription>> {
        let mut session = self.begin().await?;

        let current = self
            .user_subscriptions()
            .find_one_with_session(doc! { "_id": id }, None, &mut session)
            .await?
            .ok_or(LedgerError::SubscriptionNotFound)?;

        if current.is_settled() {
            return Ok(Settlement::AlreadySettled(current));
        }
        if current.status != SubscriptionStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                from: current.status.as_str(),
                to: SubscriptionStatus::Active.as_str(),
            });
        }

        let end_date = days_after(now, current.duration_days)?;
        let mut set = doc! {
            "status": SubscriptionStatus::Active.as_str(),
            "payment_verified": true,
            "start_date": now,
            "end_date": end_date,
            "updated_at": now,
        };
        if let Some(session_id) = session_id {
            set.insert("payment_session_id", session_id);
        }

        let record = self
            .user_subscriptions()
            .find_one_and_update_with_session(
                doc! { "_id": id, "status": SubscriptionStatus::Pending.as_str(), "payment_verified": false },
                doc! { "$set": set },
                return_after(),
                &mut session,
            )
            .await?
            // Lost the race to another activation; the retry sees it settled.
            .ok_or(LedgerError::Conflict)?;

        let posting = Posting::new(
            record.user_id,
            record.initial_lead_coins,
            CoinReason::SubscriptionActivation,
            "Subscription activated",
        )
        .with_reference(id.to_hex());
        let transaction = self.post_in(&mut session, &posting).await?;

        session.commit_transaction().await?;
        Ok(Settlement::Applied { record, transaction })
    }

    async fn complete_order_once(&self, id: &ObjectId) -> LedgerResult<Settlement<CoinOrder>> {
        let mut session = self.begin().await?;

        let current = self
            .coin_orders()
            .find_one_with_session(doc! { "_id": id }, None, &mut session)
            .await?
            .ok_or(LedgerError::OrderNotFound)?;

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

        let record = self
            .coin_orders()
            .find_one_and_update_with_session(
                doc! { "_id": id, "status": OrderStatus::Pending.as_str() },
                doc! { "$set": { "status": OrderStatus::Completed.as_str(), "updated_at": DateTime::now() } },
                return_after(),
                &mut session,
            )
            .await?
            .ok_or(LedgerError::Conflict)?;

        let posting = Posting::new(
            record.user_id,
            record.coins,
            CoinReason::CoinPurchase,
            format!("Purchased {} LeadCoins", record.coins),
        )
        .with_reference(id.to_hex());
        let transaction = self.post_in(&mut session, &posting).await?;

        session.commit_transaction().await?;
        Ok(Settlement::Applied { record, transaction })
    }

    async fn unlock_once(&self, user_id: &ObjectId, lead_id: &ObjectId, cost: i64) -> LedgerResult<Unlock> {
        let mut session = self.begin().await?;

        let view = LeadView {
            id: None,
            user_id: *user_id,
            lead_id: *lead_id,
            coins_spent: cost,
            viewed_at: DateTime::now(),
        };
        if let Err(e) = self.lead_views().insert_one_with_session(&view, None, &mut session).await {
            return match LedgerError::from(e) {
                LedgerError::Duplicate => {
                    session.abort_transaction().await.ok();
                    Ok(Unlock::AlreadyUnlocked { balance: self.balance(user_id).await? })
                }
                other => Err(other),
            };
        }

        let balance = if cost > 0 {
            let posting = Posting::new(*user_id, -cost, CoinReason::LeadView, "Lead contact unlocked")
                .with_reference(lead_id.to_hex());
            self.post_in(&mut session, &posting).await?.balance_after
        } else {
            self.users()
                .find_one_with_session(doc! { "_id": user_id }, None, &mut session)
                .await?
                .ok_or(LedgerError::UserNotFound)?
                .lead_coins
        };

        session.commit_transaction().await?;
        Ok(Unlock::Unlocked { coins_spent: cost, balance })
    }

    async fn redeem_once(&self, coupon: &Coupon, coupon_id: &ObjectId, user_id: &ObjectId) -> LedgerResult<CoinTransaction> {
        let mut session = self.begin().await?;
        let now = DateTime::now();

        let redemption = CouponRedemption {
            id: None,
            coupon_id: *coupon_id,
            user_id: *user_id,
            coins_granted: coupon.coin_amount,
            redeemed_at: now,
        };
        if let Err(e) = self.redemptions().insert_one_with_session(&redemption, None, &mut session).await {
            return Err(match LedgerError::from(e) {
                LedgerError::Duplicate => LedgerError::AlreadyRedeemed,
                other => other,
            });
        }

        self.coupons()
            .find_one_and_update_with_session(
                doc! {
                    "_id": coupon_id,
                    "active": true,
                    "$expr": { "$lt": ["$current_uses", "$max_uses"] }
                },
                doc! { "$inc": { "current_uses": 1 }, "$set": { "updated_at": now } },
                return_after(),
                &mut session,
            )
            .await?
            .ok_or(LedgerError::CouponExhausted)?;

        let posting = Posting::new(
            *user_id,
            coupon.coin_amount,
            CoinReason::CouponRedemption,
            format!("Coupon {}", coupon.code),
        )
        .with_reference(coupon_id.to_hex());
        let entry = self.post_in(&mut session, &posting).await?;

        session.commit_transaction().await?;
        Ok(entry)
    }
}

#[rocket::async_trait]
impl LedgerStore for MongoLedger {
    async fn user(&self, user_id: &ObjectId) -> LedgerResult<Option<User>> {
        Ok(self.users().find_one(doc! { "_id": user_id }, None).await?)
    }

    async fn balance(&self, user_id: &ObjectId) -> LedgerResult<i64> {
        self.user(user_id)
            .await?
            .map(|user| user.lead_coins)
            .ok_or(LedgerError::UserNotFound)
    }

    async fn post(&self, posting: Posting) -> LedgerResult<CoinTransaction> {
        with_retry!(self.post_once(&posting).await)
    }

    async fn transactions(&self, user_id: &ObjectId, limit: i64) -> LedgerResult<Vec<CoinTransaction>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1, "_id": -1 })
            .limit(limit)
            .build();
        Ok(self
            .coin_transactions()
            .find(doc! { "user_id": user_id }, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn plan(&self, plan_id: &ObjectId) -> LedgerResult<Option<SubscriptionPlan>> {
        Ok(self.plans().find_one(doc! { "_id": plan_id }, None).await?)
    }

    async fn insert_subscription(&self, mut record: UserSubscription) -> LedgerResult<UserSubscription> {
        let inserted = self.user_subscriptions().insert_one(&record, None).await?;
        record.id = inserted.inserted_id.as_object_id();
        Ok(record)
    }

    async fn subscription(&self, id: &ObjectId) -> LedgerResult<Option<UserSubscription>> {
        Ok(self.user_subscriptions().find_one(doc! { "_id": id }, None).await?)
    }

    async fn attach_session(&self, id: &ObjectId, session_id: &str) -> LedgerResult<Option<UserSubscription>> {
        let updated = self
            .user_subscriptions()
            .find_one_and_update(
                doc! {
                    "_id": id,
                    "status": SubscriptionStatus::Pending.as_str(),
                    "payment_session_id": { "$exists": false },
                },
                doc! { "$set": { "payment_session_id": session_id, "updated_at": DateTime::now() } },
                return_after(),
            )
            .await?;

        if updated.is_none() && self.subscription(id).await?.is_none() {
            return Err(LedgerError::SubscriptionNotFound);
        }
        Ok(updated)
    }

    async fn subscription_by_session(&self, session_id: &str) -> LedgerResult<Option<UserSubscription>> {
        Ok(self
            .user_subscriptions()
            .find_one(doc! { "payment_session_id": session_id }, None)
            .await?)
    }

    async fn pending_subscription(
        &self,
        user_id: &ObjectId,
        plan_id: &ObjectId,
    ) -> LedgerResult<Option<UserSubscription>> {
        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        Ok(self
            .user_subscriptions()
            .find_one(
                doc! {
                    "user_id": user_id,
                    "subscription_id": plan_id,
                    "status": SubscriptionStatus::Pending.as_str()
                },
                options,
            )
            .await?)
    }

    async fn subscriptions_for_user(&self, user_id: &ObjectId) -> LedgerResult<Vec<UserSubscription>> {
        let options = FindOptions::builder().sort(doc! { "created_at": -1 }).build();
        Ok(self
            .user_subscriptions()
            .find(doc! { "user_id": user_id }, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn activate_subscription(
        &self,
        id: &ObjectId,
        session_id: Option<&str>,
        now: DateTime,
    ) -> LedgerResult<Settlement<UserSubscription>> {
        with_retry!(self.activate_once(id, session_id, now).await)
    }

    async fn transition_subscription(
        &self,
        id: &ObjectId,
        from: &[SubscriptionStatus],
        to: SubscriptionStatus,
    ) -> LedgerResult<Option<UserSubscription>> {
        let from: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let updated = self
            .user_subscriptions()
            .find_one_and_update(
                doc! { "_id": id, "status": { "$in": from } },
                doc! { "$set": { "status": to.as_str(), "updated_at": DateTime::now() } },
                return_after(),
            )
            .await?;

        if updated.is_none() && self.subscription(id).await?.is_none() {
            return Err(LedgerError::SubscriptionNotFound);
        }
        Ok(updated)
    }

    async fn expire_subscriptions(&self, now: DateTime) -> LedgerResult<u64> {
        let result = self
            .user_subscriptions()
            .update_many(
                doc! { "status": SubscriptionStatus::Active.as_str(), "end_date": { "$lt": now } },
                doc! { "$set": { "status": SubscriptionStatus::Expired.as_str(), "updated_at": now } },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn insert_coin_order(&self, mut order: CoinOrder) -> LedgerResult<CoinOrder> {
        let inserted = self.coin_orders().insert_one(&order, None).await?;
        order.id = inserted.inserted_id.as_object_id();
        Ok(order)
    }

    async fn coin_order_by_session(&self, session_id: &str) -> LedgerResult<Option<CoinOrder>> {
        Ok(self
            .coin_orders()
            .find_one(doc! { "payment_session_id": session_id }, None)
            .await?)
    }

    async fn complete_coin_order(&self, id: &ObjectId) -> LedgerResult<Settlement<CoinOrder>> {
        with_retry!(self.complete_order_once(id).await)
    }

    async fn fail_coin_order(&self, id: &ObjectId) -> LedgerResult<bool> {
        let result = self
            .coin_orders()
            .update_one(
                doc! { "_id": id, "status": OrderStatus::Pending.as_str() },
                doc! { "$set": { "status": OrderStatus::Failed.as_str(), "updated_at": DateTime::now() } },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn lead(&self, lead_id: &ObjectId) -> LedgerResult<Option<Lead>> {
        Ok(self.leads().find_one(doc! { "_id": lead_id }, None).await?)
    }

    async fn settings(&self) -> LedgerResult<LeadCoinSettings> {
        let settings = self
            .db
            .collection::<LeadCoinSettings>(db::LEAD_COIN_SETTINGS)
            .find_one(doc! { "_id": SETTINGS_ID }, None)
            .await?;
        Ok(settings.unwrap_or_default())
    }

    async fn lead_view(&self, user_id: &ObjectId, lead_id: &ObjectId) -> LedgerResult<Option<LeadView>> {
        Ok(self
            .lead_views()
            .find_one(doc! { "user_id": user_id, "lead_id": lead_id }, None)
            .await?)
    }

    async fn unlock_lead(&self, user_id: &ObjectId, lead_id: &ObjectId, cost: i64) -> LedgerResult<Unlock> {
        with_retry!(self.unlock_once(user_id, lead_id, cost).await)
    }

    async fn coupon_by_code(&self, code: &str) -> LedgerResult<Option<Coupon>> {
        Ok(self.coupons().find_one(doc! { "code": code }, None).await?)
    }

    async fn redeem_coupon(&self, coupon: &Coupon, user_id: &ObjectId) -> LedgerResult<CoinTransaction> {
        let coupon_id = coupon.id.ok_or(LedgerError::CouponNotFound)?;
        with_retry!(self.redeem_once(coupon, &coupon_id, user_id).await)
    }

    async fn flag_for_reconciliation(&self, item: ReconciliationItem) -> LedgerResult<()> {
        let mut on_insert = mongodb::bson::to_document(&item)
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        on_insert.remove("payment_session_id");

        self.db
            .collection::<Document>(db::RECONCILIATION_QUEUE)
            .update_one(
                doc! { "payment_session_id": &item.payment_session_id },
                doc! { "$setOnInsert": on_insert },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }
}
