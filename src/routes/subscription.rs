use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use rocket::futures::TryStreamExt;
use mongodb::bson::{doc, DateTime, Document};
use mongodb::options::FindOptions;
use validator::Validate;
use log::{error, info, warn};

use crate::config::Config;
use crate::db::{self, DbConn};
use crate::guards::ActorGuard;
use crate::ledger::{Ledger, LedgerStore};
use crate::models::{
    BuyCoinsDto, CreatePlanDto, PlanResponse, PurchaseSubscriptionDto, SubscriptionPlan,
    UpdatePlanDto, UserSubscriptionResponse,
};
use crate::services::access::{self, Capability};
use crate::services::stripe::CheckoutItem;
use crate::services::webhook::{
    WebhookOutcome, CHECKOUT_COMPLETED, KIND_COINS, KIND_SUBSCRIPTION, META_KIND, META_PLAN, META_USER,
};
use crate::services::{StripeService, SubscriptionService, WebhookConfig, WebhookService};
use crate::utils::{parse_object_id, ApiError, ApiResponse};

/* ----------------------------- PLANS ----------------------------- */

#[openapi(tag = "Plans")]
#[get("/plans")]
pub async fn list_active_plans(
    db: &State<DbConn>,
) -> Result<Json<ApiResponse<Vec<PlanResponse>>>, ApiError> {
    let plans: Vec<SubscriptionPlan> = db
        .collection::<SubscriptionPlan>(db::SUBSCRIPTION_PLANS)
        .find(doc! { "active": true }, FindOptions::builder().sort(doc! { "price": 1 }).build())
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;

    Ok(Json(ApiResponse::success(plans.into_iter().map(PlanResponse::from).collect())))
}

#[openapi(tag = "Plans")]
#[get("/admin/plans")]
pub async fn list_all_plans(
    db: &State<DbConn>,
    actor: ActorGuard,
) -> Result<Json<ApiResponse<Vec<PlanResponse>>>, ApiError> {
    access::require(&actor.user, Capability::ManageSubscriptions)?;

    let plans: Vec<SubscriptionPlan> = db
        .collection::<SubscriptionPlan>(db::SUBSCRIPTION_PLANS)
        .find(None, FindOptions::builder().sort(doc! { "created_at": -1 }).build())
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;

    Ok(Json(ApiResponse::success(plans.into_iter().map(PlanResponse::from).collect())))
}

#[openapi(tag = "Plans")]
#[post("/admin/plans", data = "<dto>")]
pub async fn create_plan(
    db: &State<DbConn>,
    actor: ActorGuard,
    dto: Json<CreatePlanDto>,
) -> Result<Json<ApiResponse<PlanResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageSubscriptions)?;
    dto.validate()?;

    let dto = dto.into_inner();
    let now = DateTime::now();
    let mut plan = SubscriptionPlan {
        id: None,
        name: dto.name,
        price: dto.price,
        lead_coins: dto.lead_coins,
        duration_days: dto.duration_days,
        active: true,
        features: dto.features,
        created_at: now,
        updated_at: now,
    };

    let result = db
        .collection::<SubscriptionPlan>(db::SUBSCRIPTION_PLANS)
        .insert_one(&plan, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to create plan: {}", e)))?;
    plan.id = result.inserted_id.as_object_id();

    Ok(Json(ApiResponse::success(PlanResponse::from(plan))))
}

/// Once anyone has bought a plan only its `active` flag may change.
#[openapi(tag = "Plans")]
#[put("/admin/plans/<id>", data = "<dto>")]
pub async fn update_plan(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
    dto: Json<UpdatePlanDto>,
) -> Result<Json<ApiResponse<PlanResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageSubscriptions)?;
    dto.validate()?;
    let plan_id = parse_object_id(&id, "plan")?;

    if dto.changes_terms() {
        let referenced = db
            .collection::<Document>(db::USER_SUBSCRIPTIONS)
            .count_documents(doc! { "subscription_id": plan_id }, None)
            .await
            .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;
        if referenced > 0 {
            return Err(ApiError::conflict(
                "Plan has subscribers; only its active flag can change. Create a new plan instead.",
            ));
        }
    }

    let dto = dto.into_inner();
    let mut set = Document::new();
    if let Some(name) = dto.name {
        set.insert("name", name);
    }
    if let Some(price) = dto.price {
        set.insert("price", price);
    }
    if let Some(lead_coins) = dto.lead_coins {
        set.insert("lead_coins", lead_coins);
    }
    if let Some(duration_days) = dto.duration_days {
        set.insert("duration_days", duration_days);
    }
    if let Some(features) = dto.features {
        set.insert("features", features);
    }
    if let Some(active) = dto.active {
        set.insert("active", active);
    }
    set.insert("updated_at", DateTime::now());

    let plan = db
        .collection::<SubscriptionPlan>(db::SUBSCRIPTION_PLANS)
        .find_one_and_update(
            doc! { "_id": plan_id },
            doc! { "$set": set },
            mongodb::options::FindOneAndUpdateOptions::builder()
                .return_document(mongodb::options::ReturnDocument::After)
                .build(),
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update plan: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Plan not found"))?;

    Ok(Json(ApiResponse::success(PlanResponse::from(plan))))
}

/* ----------------------------- CHECKOUT ----------------------------- */

/// Opens a checkout session and records a pending subscription. Coins are
/// credited once the payment is confirmed.
#[openapi(tag = "Subscriptions")]
#[post("/subscriptions/purchase", data = "<dto>")]
pub async fn purchase_subscription(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    dto: Json<PurchaseSubscriptionDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let plan_id = parse_object_id(&dto.subscription_id, "plan")?;
    let ledger = ledger.inner().as_ref();

    let plan = ledger
        .plan(&plan_id)
        .await?
        .filter(|plan| plan.active)
        .ok_or_else(|| ApiError::not_found("Plan not found"))?;

    // The record exists before the session so a fast webhook can match it.
    let pending = SubscriptionService::create_pending(ledger, &actor.id, &plan_id, None).await?;
    let record_id = pending.id.ok_or_else(|| ApiError::internal_error("Subscription has no id"))?;

    let session = match StripeService::create_checkout_session(CheckoutItem {
        name: &plan.name,
        amount: plan.price,
        metadata: vec![
            (META_KIND, KIND_SUBSCRIPTION.to_string()),
            (META_USER, actor.id.to_hex()),
            (META_PLAN, plan_id.to_hex()),
        ],
    })
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!("Checkout session for plan {} failed: {}", plan_id, e);
            if let Err(e) = SubscriptionService::fail(ledger, &record_id).await {
                warn!("Could not cancel pending subscription {}: {}", record_id, e);
            }
            return Err(ApiError::internal_error("Failed to start checkout"));
        }
    };

    let record = SubscriptionService::attach_session(ledger, &record_id, &session.id).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "session_id": session.id,
        "checkout_url": session.url,
        "subscription": UserSubscriptionResponse::from(record),
    }))))
}

#[openapi(tag = "Subscriptions")]
#[post("/subscriptions/buy-coins", data = "<dto>")]
pub async fn buy_coins(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    dto: Json<BuyCoinsDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()?;
    let amount = dto.coins * Config::coin_unit_price();
    let name = format!("{} LeadCoins", dto.coins);

    let session = StripeService::create_checkout_session(CheckoutItem {
        name: &name,
        amount,
        metadata: vec![
            (META_KIND, KIND_COINS.to_string()),
            (META_USER, actor.id.to_hex()),
        ],
    })
    .await
    .map_err(|e| {
        error!("Coin checkout session failed: {}", e);
        ApiError::internal_error("Failed to start checkout")
    })?;

    let order = SubscriptionService::create_coin_order(
        ledger.inner().as_ref(),
        &actor.id,
        dto.coins,
        amount,
        session.id.clone(),
    )
    .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "session_id": session.id,
        "checkout_url": session.url,
        "coins": order.coins,
        "amount": order.amount,
        "currency": Config::currency(),
    }))))
}

/// Polls the provider and settles the session the same way the webhook
/// would. Safe to call repeatedly.
#[openapi(tag = "Subscriptions")]
#[post("/subscriptions/checkout/<session_id>/verify")]
pub async fn verify_checkout(
    ledger: &State<Ledger>,
    webhook: &State<WebhookConfig>,
    actor: ActorGuard,
    session_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let session = StripeService::retrieve_checkout_session(&session_id)
        .await
        .map_err(|e| ApiError::bad_request(format!("Could not verify checkout: {}", e)))?;

    let owner = actor.id.to_hex();
    if session.meta(META_USER) != Some(owner.as_str()) {
        return Err(ApiError::not_found("Checkout session not found"));
    }

    let ledger = ledger.inner().as_ref();
    let outcome = if session.is_paid() {
        let payload = serde_json::to_value(&session).unwrap_or_default();
        WebhookService::settle_paid(
            ledger,
            CHECKOUT_COMPLETED,
            &session,
            &payload,
            webhook.allow_fallback_grants,
        )
        .await?
    } else {
        WebhookOutcome::Ignored
    };
    info!("Checkout {} verified by {}: {:?}", session_id, actor.id, outcome);

    let balance = ledger.balance(&actor.id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "paid": session.is_paid(),
        "outcome": outcome,
        "lead_coins": balance,
    }))))
}

/* ----------------------------- MINE ----------------------------- */

#[openapi(tag = "Subscriptions")]
#[get("/subscriptions/mine")]
pub async fn my_subscriptions(
    ledger: &State<Ledger>,
    actor: ActorGuard,
) -> Result<Json<ApiResponse<Vec<UserSubscriptionResponse>>>, ApiError> {
    let records = SubscriptionService::for_user(ledger.inner().as_ref(), &actor.id).await?;
    Ok(Json(ApiResponse::success(
        records.into_iter().map(UserSubscriptionResponse::from).collect(),
    )))
}

#[openapi(tag = "Subscriptions")]
#[post("/subscriptions/<id>/cancel")]
pub async fn cancel_subscription(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    id: String,
) -> Result<Json<ApiResponse<UserSubscriptionResponse>>, ApiError> {
    let record_id = parse_object_id(&id, "subscription")?;
    let record = SubscriptionService::cancel(ledger.inner().as_ref(), &actor.id, &record_id).await?;
    Ok(Json(ApiResponse::success_with_message(
        "Subscription cancelled".to_string(),
        UserSubscriptionResponse::from(record),
    )))
}
