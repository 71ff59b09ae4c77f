//! Payment-provider notifications.
//!
//! Every path here can run more than once for the same session: the
//! provider redelivers until it sees a 2xx, and the checkout poll feeds the
//! same settlement code. Repeats land on the `AlreadySettled` branch of the
//! ledger and credit nothing.

use hmac::{Hmac, Mac};
use log::{error, info, warn};
use mongodb::bson::{oid::ObjectId, DateTime};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::Config;
use crate::ledger::{LedgerError, LedgerStore, Settlement};
use crate::models::{ReconciliationItem, SubscriptionStatus};
use crate::services::stripe::CheckoutSession;
use crate::services::subscriptions::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";
pub const ASYNC_PAYMENT_FAILED: &str = "checkout.session.async_payment_failed";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";

/// Session metadata keys written at checkout creation.
pub const META_KIND: &str = "kind";
pub const META_USER: &str = "user_id";
pub const META_PLAN: &str = "plan_id";
pub const KIND_COINS: &str = "coins";
pub const KIND_SUBSCRIPTION: &str = "subscription";

/// Managed Rocket state for the webhook route.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: Option<String>,
    pub tolerance_secs: i64,
    pub allow_fallback_grants: bool,
}

impl WebhookConfig {
    pub fn from_config() -> Self {
        WebhookConfig {
            secret: Config::stripe_webhook_secret(),
            tolerance_secs: Config::webhook_tolerance_secs(),
            allow_fallback_grants: Config::webhook_fallback_grants(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: CheckoutSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Activated,
    AlreadyActive,
    FallbackActivated,
    Cancelled,
    OrderCompleted,
    OrderAlreadyCompleted,
    OrderFailed,
    Queued,
    Ignored,
}

pub struct WebhookService;

impl WebhookService {
    /// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`)
    /// against the raw body.
    pub fn verify_signature(
        header: &str,
        body: &str,
        secret: &str,
        tolerance_secs: i64,
        now_secs: i64,
    ) -> Result<(), LedgerError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            LedgerError::PaymentVerificationFailed("missing signature timestamp".to_string())
        })?;
        if signatures.is_empty() {
            return Err(LedgerError::PaymentVerificationFailed("missing v1 signature".to_string()));
        }
        if (now_secs - timestamp).abs() > tolerance_secs {
            return Err(LedgerError::PaymentVerificationFailed(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| LedgerError::PaymentVerificationFailed(e.to_string()))?;
        mac.update(format!("{}.{}", timestamp, body).as_bytes());

        let matched = signatures.iter().any(|signature| {
            hex::decode(signature)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });
        if matched {
            Ok(())
        } else {
            Err(LedgerError::PaymentVerificationFailed("signature mismatch".to_string()))
        }
    }

    /// Verifies, parses and settles one delivery.
    pub async fn handle(
        ledger: &dyn LedgerStore,
        config: &WebhookConfig,
        signature: Option<&str>,
        body: &str,
    ) -> Result<WebhookOutcome, LedgerError> {
        let secret = config.secret.as_deref().ok_or_else(|| {
            LedgerError::PaymentVerificationFailed("webhook secret not configured".to_string())
        })?;
        let signature = signature.ok_or_else(|| {
            LedgerError::PaymentVerificationFailed("missing Stripe-Signature header".to_string())
        })?;

        if let Err(e) = Self::verify_signature(
            signature,
            body,
            secret,
            config.tolerance_secs,
            DateTime::now().timestamp_millis() / 1000,
        ) {
            warn!("Rejected webhook: {}", e);
            return Err(e);
        }

        let payload: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| LedgerError::Validation(format!("invalid event payload: {}", e)))?;
        let event: StripeEvent = serde_json::from_value(payload.clone())
            .map_err(|e| LedgerError::Validation(format!("unsupported event payload: {}", e)))?;

        info!("Webhook {} ({}) for session {}", event.id, event.event_type, event.data.object.id);
        Self::dispatch(ledger, &event.event_type, &event.data.object, &payload, config.allow_fallback_grants).await
    }

    pub async fn dispatch(
        ledger: &dyn LedgerStore,
        event_type: &str,
        session: &CheckoutSession,
        payload: &serde_json::Value,
        allow_fallback: bool,
    ) -> Result<WebhookOutcome, LedgerError> {
        match event_type {
            CHECKOUT_COMPLETED | ASYNC_PAYMENT_SUCCEEDED => {
                if !session.is_paid() {
                    info!("Session {} completed without payment yet, waiting", session.id);
                    return Ok(WebhookOutcome::Ignored);
                }
                Self::settle_paid(ledger, event_type, session, payload, allow_fallback).await
            }
            ASYNC_PAYMENT_FAILED | CHECKOUT_EXPIRED => Self::settle_failed(ledger, session).await,
            other => {
                info!("Ignoring webhook event type {}", other);
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Credits whatever the paid session was for.
    pub async fn settle_paid(
        ledger: &dyn LedgerStore,
        event_type: &str,
        session: &CheckoutSession,
        payload: &serde_json::Value,
        allow_fallback: bool,
    ) -> Result<WebhookOutcome, LedgerError> {
        if session.meta(META_KIND) == Some(KIND_COINS) {
            return Self::settle_coin_order(ledger, event_type, session, payload).await;
        }

        if let Some(record) = ledger.subscription_by_session(&session.id).await? {
            let id = record.id.ok_or(LedgerError::SubscriptionNotFound)?;
            // Coins were credited once; a later cancel or expiry does not reopen it.
            if record.payment_verified {
                warn!(
                    "Session {} already settled ({} subscription {}), acknowledging",
                    session.id,
                    record.status.as_str(),
                    id
                );
                return Ok(WebhookOutcome::AlreadyActive);
            }
            if record.status != SubscriptionStatus::Pending {
                let detail = format!("payment succeeded for {} subscription {}", record.status.as_str(), id);
                Self::queue(ledger, event_type, session, payload, detail).await?;
                return Ok(WebhookOutcome::Queued);
            }
            return Ok(match SubscriptionService::activate(ledger, &id).await? {
                Settlement::Applied { .. } => WebhookOutcome::Activated,
                Settlement::AlreadySettled(_) => WebhookOutcome::AlreadyActive,
            });
        }

        let user_id = session.meta(META_USER).and_then(|v| ObjectId::parse_str(v).ok());
        let plan_id = session.meta(META_PLAN).and_then(|v| ObjectId::parse_str(v).ok());

        if let (Some(user_id), Some(plan_id)) = (user_id, plan_id) {
            if let Some(record) = ledger.pending_subscription(&user_id, &plan_id).await? {
                let id = record.id.ok_or(LedgerError::SubscriptionNotFound)?;
                info!("Matched session {} to pending subscription {}", session.id, id);
                return Ok(
                    match SubscriptionService::activate_with_session(ledger, &id, Some(&session.id)).await? {
                        Settlement::Applied { .. } => WebhookOutcome::Activated,
                        Settlement::AlreadySettled(_) => WebhookOutcome::AlreadyActive,
                    },
                );
            }
        }

        let detail = "no pending subscription matches this payment".to_string();
        Self::queue(ledger, event_type, session, payload, detail).await?;

        match (allow_fallback, user_id, plan_id) {
            (true, Some(user_id), Some(plan_id)) => {
                let record = match SubscriptionService::create_pending(
                    ledger,
                    &user_id,
                    &plan_id,
                    Some(session.id.clone()),
                )
                .await
                {
                    Ok(record) => record,
                    Err(LedgerError::Duplicate) => ledger
                        .subscription_by_session(&session.id)
                        .await?
                        .ok_or(LedgerError::Conflict)?,
                    Err(e) => return Err(e),
                };
                let id = record.id.ok_or(LedgerError::SubscriptionNotFound)?;
                warn!("Fallback subscription {} created for session {}", id, session.id);
                Ok(match SubscriptionService::activate(ledger, &id).await? {
                    Settlement::Applied { .. } => WebhookOutcome::FallbackActivated,
                    Settlement::AlreadySettled(_) => WebhookOutcome::AlreadyActive,
                })
            }
            _ => Err(LedgerError::SubscriptionNotFound),
        }
    }

    async fn settle_coin_order(
        ledger: &dyn LedgerStore,
        event_type: &str,
        session: &CheckoutSession,
        payload: &serde_json::Value,
    ) -> Result<WebhookOutcome, LedgerError> {
        let Some(order) = ledger.coin_order_by_session(&session.id).await? else {
            let detail = "no coin order matches this payment".to_string();
            Self::queue(ledger, event_type, session, payload, detail).await?;
            return Err(LedgerError::OrderNotFound);
        };
        let id = order.id.ok_or(LedgerError::OrderNotFound)?;

        match ledger.complete_coin_order(&id).await {
            Ok(Settlement::Applied { record, transaction }) => {
                info!(
                    "Coin order {} completed, {} LeadCoins credited to {} (balance {})",
                    id, record.coins, record.user_id, transaction.balance_after
                );
                Ok(WebhookOutcome::OrderCompleted)
            }
            Ok(Settlement::AlreadySettled(_)) => {
                warn!("Coin order {} already completed, acknowledging", id);
                Ok(WebhookOutcome::OrderAlreadyCompleted)
            }
            Err(LedgerError::InvalidTransition { from, .. }) => {
                let detail = format!("payment succeeded for {} coin order {}", from, id);
                Self::queue(ledger, event_type, session, payload, detail).await?;
                Ok(WebhookOutcome::Queued)
            }
            Err(e) => Err(e),
        }
    }

    async fn settle_failed(ledger: &dyn LedgerStore, session: &CheckoutSession) -> Result<WebhookOutcome, LedgerError> {
        if session.meta(META_KIND) == Some(KIND_COINS) {
            if let Some(order) = ledger.coin_order_by_session(&session.id).await? {
                let id = order.id.ok_or(LedgerError::OrderNotFound)?;
                if ledger.fail_coin_order(&id).await? {
                    info!("Coin order {} failed", id);
                    return Ok(WebhookOutcome::OrderFailed);
                }
            }
            return Ok(WebhookOutcome::Ignored);
        }

        if let Some(record) = ledger.subscription_by_session(&session.id).await? {
            let id = record.id.ok_or(LedgerError::SubscriptionNotFound)?;
            if SubscriptionService::fail(ledger, &id).await?.is_some() {
                info!("Subscription {} cancelled, payment did not go through", id);
                return Ok(WebhookOutcome::Cancelled);
            }
        }
        Ok(WebhookOutcome::Ignored)
    }

    async fn queue(
        ledger: &dyn LedgerStore,
        event_type: &str,
        session: &CheckoutSession,
        payload: &serde_json::Value,
        detail: String,
    ) -> Result<(), LedgerError> {
        error!("Reconciliation needed for session {}: {}", session.id, detail);
        ledger
            .flag_for_reconciliation(ReconciliationItem {
                id: None,
                payment_session_id: session.id.clone(),
                event_type: event_type.to_string(),
                detail,
                payload: payload.clone(),
                resolved: false,
                created_at: DateTime::now(),
            })
            .await
    }
}

/// Builds a header the way the provider does.
#[cfg(test)]
pub fn sign(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;
    use crate::models::Role;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn now_secs() -> i64 {
        DateTime::now().timestamp_millis() / 1000
    }

    fn config(allow_fallback_grants: bool) -> WebhookConfig {
        WebhookConfig {
            secret: Some(SECRET.to_string()),
            tolerance_secs: 300,
            allow_fallback_grants,
        }
    }

    fn event(event_type: &str, session_id: &str, metadata: serde_json::Value) -> String {
        json!({
            "id": format!("evt_{}", session_id),
            "type": event_type,
            "data": { "object": {
                "id": session_id,
                "payment_status": "paid",
                "metadata": metadata,
            }}
        })
        .to_string()
    }

    async fn deliver(ledger: &MemoryLedger, config: &WebhookConfig, body: &str) -> Result<WebhookOutcome, LedgerError> {
        let header = sign(SECRET, now_secs(), body);
        WebhookService::handle(ledger, config, Some(&header), body).await
    }

    #[test]
    fn signature_checks() {
        let body = r#"{"id":"evt_1"}"#;
        let now = now_secs();
        let header = sign(SECRET, now, body);

        assert!(WebhookService::verify_signature(&header, body, SECRET, 300, now).is_ok());
        assert!(WebhookService::verify_signature(&header, r#"{"id":"evt_2"}"#, SECRET, 300, now).is_err());
        assert!(WebhookService::verify_signature(&header, body, "whsec_other", 300, now).is_err());
        assert!(WebhookService::verify_signature(&header, body, SECRET, 300, now + 301).is_err());
        assert!(WebhookService::verify_signature("v1=abcd", body, SECRET, 300, now).is_err());
        assert!(WebhookService::verify_signature(&format!("t={}", now), body, SECRET, 300, now).is_err());
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let body = "{}";
        let now = now_secs();
        let good = sign(SECRET, now, body);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", now, good_sig);
        assert!(WebhookService::verify_signature(&header, body, SECRET, 300, now).is_ok());
    }

    #[tokio::test]
    async fn success_activates_pending_record_once() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(40, 30);
        let record = SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_1".into()))
            .await
            .unwrap();
        let body = event(CHECKOUT_COMPLETED, "sess_1", json!({ "kind": "subscription" }));

        let first = deliver(&ledger, &config(false), &body).await.unwrap();
        let second = deliver(&ledger, &config(false), &body).await.unwrap();

        assert_eq!(first, WebhookOutcome::Activated);
        assert_eq!(second, WebhookOutcome::AlreadyActive);
        assert_eq!(ledger.balance(&user).await.unwrap(), 40);
        let stored = ledger.subscription(&record.id.unwrap()).await.unwrap().unwrap();
        assert!(stored.is_settled());
    }

    #[tokio::test]
    async fn unknown_session_falls_back_to_users_pending_record() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(25, 30);
        let record = SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_old".into()))
            .await
            .unwrap();
        let body = event(
            CHECKOUT_COMPLETED,
            "sess_new",
            json!({ "kind": "subscription", "user_id": user.to_hex(), "plan_id": plan.to_hex() }),
        );

        let outcome = deliver(&ledger, &config(false), &body).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Activated);
        let stored = ledger.subscription(&record.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.payment_session_id.as_deref(), Some("sess_new"));
        assert_eq!(ledger.balance(&user).await.unwrap(), 25);

        assert_eq!(
            deliver(&ledger, &config(false), &body).await.unwrap(),
            WebhookOutcome::AlreadyActive
        );
        assert_eq!(ledger.balance(&user).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn unmatched_payment_is_queued_and_credits_nothing() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(25, 30);
        let body = event(
            CHECKOUT_COMPLETED,
            "sess_lost",
            json!({ "kind": "subscription", "user_id": user.to_hex(), "plan_id": plan.to_hex() }),
        );

        let err = deliver(&ledger, &config(false), &body).await.unwrap_err();
        assert!(matches!(err, LedgerError::SubscriptionNotFound));
        deliver(&ledger, &config(false), &body).await.unwrap_err();

        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
        let queue = ledger.reconciliation();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].payment_session_id, "sess_lost");
        assert!(ledger.all_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn fallback_grant_creates_one_record_per_session() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(25, 30);
        let body = event(
            CHECKOUT_COMPLETED,
            "sess_orphan",
            json!({ "kind": "subscription", "user_id": user.to_hex(), "plan_id": plan.to_hex() }),
        );

        let first = deliver(&ledger, &config(true), &body).await.unwrap();
        let second = deliver(&ledger, &config(true), &body).await.unwrap();

        assert_eq!(first, WebhookOutcome::FallbackActivated);
        assert_eq!(second, WebhookOutcome::AlreadyActive);
        assert_eq!(ledger.all_subscriptions().len(), 1);
        assert_eq!(ledger.balance(&user).await.unwrap(), 25);
        assert_eq!(ledger.reconciliation().len(), 1);
    }

    #[tokio::test]
    async fn failed_payment_cancels_and_blocks_later_success() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(10, 30);
        let record = SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_f".into()))
            .await
            .unwrap();

        let failed = event(ASYNC_PAYMENT_FAILED, "sess_f", json!({}));
        assert_eq!(deliver(&ledger, &config(false), &failed).await.unwrap(), WebhookOutcome::Cancelled);

        let success = event(ASYNC_PAYMENT_SUCCEEDED, "sess_f", json!({}));
        assert_eq!(deliver(&ledger, &config(false), &success).await.unwrap(), WebhookOutcome::Queued);

        let stored = ledger.subscription(&record.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Cancelled);
        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn redelivery_after_cancel_or_expiry_is_acknowledged() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(40, 1);
        let cancelled = SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_r".into()))
            .await
            .unwrap()
            .id
            .unwrap();
        let expired = SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_e".into()))
            .await
            .unwrap()
            .id
            .unwrap();
        let first = event(CHECKOUT_COMPLETED, "sess_r", json!({ "kind": "subscription" }));
        let second = event(ASYNC_PAYMENT_SUCCEEDED, "sess_e", json!({ "kind": "subscription" }));

        assert_eq!(deliver(&ledger, &config(false), &first).await.unwrap(), WebhookOutcome::Activated);
        assert_eq!(deliver(&ledger, &config(false), &second).await.unwrap(), WebhookOutcome::Activated);
        SubscriptionService::cancel(&ledger, &user, &cancelled).await.unwrap();
        let two_days_later = DateTime::from_millis(DateTime::now().timestamp_millis() + 2 * 86_400_000);
        assert_eq!(SubscriptionService::expire_due(&ledger, two_days_later).await.unwrap(), 1);

        assert_eq!(deliver(&ledger, &config(false), &first).await.unwrap(), WebhookOutcome::AlreadyActive);
        assert_eq!(deliver(&ledger, &config(false), &second).await.unwrap(), WebhookOutcome::AlreadyActive);

        assert!(ledger.reconciliation().is_empty());
        assert_eq!(ledger.balance(&user).await.unwrap(), 80);
        assert_eq!(ledger.journal(&user).len(), 2);
        assert_eq!(ledger.subscription(&cancelled).await.unwrap().unwrap().status, SubscriptionStatus::Cancelled);
        assert_eq!(ledger.subscription(&expired).await.unwrap().unwrap().status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn coin_orders_complete_once_and_fail_cleanly() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 1);
        SubscriptionService::create_coin_order(&ledger, &user, 15, 1500, "sess_c".into())
            .await
            .unwrap();
        SubscriptionService::create_coin_order(&ledger, &user, 5, 500, "sess_x".into())
            .await
            .unwrap();

        let paid = event(CHECKOUT_COMPLETED, "sess_c", json!({ "kind": "coins" }));
        assert_eq!(deliver(&ledger, &config(false), &paid).await.unwrap(), WebhookOutcome::OrderCompleted);
        assert_eq!(
            deliver(&ledger, &config(false), &paid).await.unwrap(),
            WebhookOutcome::OrderAlreadyCompleted
        );

        let expired = event(CHECKOUT_EXPIRED, "sess_x", json!({ "kind": "coins" }));
        assert_eq!(deliver(&ledger, &config(false), &expired).await.unwrap(), WebhookOutcome::OrderFailed);

        assert_eq!(ledger.balance(&user).await.unwrap(), 16);
    }

    #[tokio::test]
    async fn unsigned_or_tampered_deliveries_change_nothing() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(10, 30);
        SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_t".into()))
            .await
            .unwrap();
        let body = event(CHECKOUT_COMPLETED, "sess_t", json!({}));
        let header = sign("whsec_wrong", now_secs(), &body);

        let err = WebhookService::handle(&ledger, &config(false), Some(&header), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PaymentVerificationFailed(_)));

        let err = WebhookService::handle(&ledger, &config(false), None, &body).await.unwrap_err();
        assert!(matches!(err, LedgerError::PaymentVerificationFailed(_)));
        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unpaid_completion_waits_for_async_result() {
        let ledger = MemoryLedger::new();
        let user = ledger.add_user(Role::User, 0);
        let plan = ledger.add_plan(10, 30);
        SubscriptionService::create_pending(&ledger, &user, &plan, Some("sess_u".into()))
            .await
            .unwrap();
        let body = json!({
            "id": "evt_u",
            "type": CHECKOUT_COMPLETED,
            "data": { "object": { "id": "sess_u", "payment_status": "unpaid" } }
        })
        .to_string();

        assert_eq!(deliver(&ledger, &config(false), &body).await.unwrap(), WebhookOutcome::Ignored);
        assert_eq!(ledger.balance(&user).await.unwrap(), 0);
    }
}
