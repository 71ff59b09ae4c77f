use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

/// A purchasable plan. Prices are in the currency's minor unit.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionPlan {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub price: i64,
    pub lead_coins: i64,
    pub duration_days: i64,
    pub active: bool,
    #[serde(default)]
    pub features: Vec<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserSubscription {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub subscription_id: ObjectId,
    pub status: SubscriptionStatus,
    pub payment_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_session_id: Option<String>,
    pub initial_lead_coins: i64,
    pub duration_days: i64,
    pub start_date: DateTime,
    pub end_date: DateTime,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl UserSubscription {
    /// Awaiting payment. Dates are provisional until activation.
    pub fn pending(user_id: ObjectId, plan: &SubscriptionPlan, plan_id: ObjectId, session_id: Option<String>) -> Self {
        let now = DateTime::now();
        UserSubscription {
            id: None,
            user_id,
            subscription_id: plan_id,
            status: SubscriptionStatus::Pending,
            payment_verified: false,
            payment_session_id: session_id,
            initial_lead_coins: plan.lead_coins,
            duration_days: plan.duration_days,
            start_date: now,
            end_date: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status == SubscriptionStatus::Active && self.payment_verified
    }
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreatePlanDto {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(range(min = 1, max = 1000000))]
    pub lead_coins: i64,
    #[validate(range(min = 1, max = 3650))]
    pub duration_days: i64,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdatePlanDto {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(range(min = 0))]
    pub price: Option<i64>,
    #[validate(range(min = 1, max = 1000000))]
    pub lead_coins: Option<i64>,
    #[validate(range(min = 1, max = 3650))]
    pub duration_days: Option<i64>,
    pub features: Option<Vec<String>>,
    pub active: Option<bool>,
}

impl UpdatePlanDto {
    /// True when the update touches anything besides the `active` toggle.
    pub fn changes_terms(&self) -> bool {
        self.name.is_some()
            || self.price.is_some()
            || self.lead_coins.is_some()
            || self.duration_days.is_some()
            || self.features.is_some()
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PurchaseSubscriptionDto {
    pub subscription_id: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct BuyCoinsDto {
    #[validate(range(min = 1, max = 100000))]
    pub coins: i64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PlanResponse {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub lead_coins: i64,
    pub duration_days: i64,
    pub active: bool,
    pub features: Vec<String>,
}

impl From<SubscriptionPlan> for PlanResponse {
    fn from(plan: SubscriptionPlan) -> Self {
        PlanResponse {
            id: plan.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: plan.name,
            price: plan.price,
            lead_coins: plan.lead_coins,
            duration_days: plan.duration_days,
            active: plan.active,
            features: plan.features,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UserSubscriptionResponse {
    pub id: String,
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub payment_verified: bool,
    pub initial_lead_coins: i64,
    pub start_date: String,
    pub end_date: String,
}

impl From<UserSubscription> for UserSubscriptionResponse {
    fn from(sub: UserSubscription) -> Self {
        UserSubscriptionResponse {
            id: sub.id.map(|id| id.to_hex()).unwrap_or_default(),
            subscription_id: sub.subscription_id.to_hex(),
            status: sub.status,
            payment_verified: sub.payment_verified,
            initial_lead_coins: sub.initial_lead_coins,
            start_date: sub.start_date.try_to_rfc3339_string().unwrap_or_default(),
            end_date: sub.end_date.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}
