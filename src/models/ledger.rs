use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

pub const SETTINGS_ID: &str = "global";

/// Why a balance moved. Every journal entry carries one.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CoinReason {
    SubscriptionActivation,
    CoinPurchase,
    LeadView,
    CouponRedemption,
    AdminGrant,
}

/// Append-only journal entry. `balance_after` is the user's balance once
/// this entry was applied.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoinTransaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub delta: i64,
    pub reason: CoinReason,
    pub description: String,
    pub reference: Option<String>,
    pub balance_after: i64,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CoinTransactionResponse {
    pub id: String,
    pub delta: i64,
    pub reason: CoinReason,
    pub description: String,
    pub reference: Option<String>,
    pub balance_after: i64,
    pub created_at: String,
}

impl From<CoinTransaction> for CoinTransactionResponse {
    fn from(tx: CoinTransaction) -> Self {
        CoinTransactionResponse {
            id: tx.id.map(|id| id.to_hex()).unwrap_or_default(),
            delta: tx.delta,
            reason: tx.reason,
            description: tx.description,
            reference: tx.reference,
            balance_after: tx.balance_after,
            created_at: tx.created_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}

/// Global singleton read by the lead view gate.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct LeadCoinSettings {
    #[serde(rename = "_id")]
    #[schemars(skip)]
    pub id: String,
    pub contact_info_cost: i64,
    pub detailed_info_cost: i64,
    pub full_access_cost: i64,
}

impl Default for LeadCoinSettings {
    fn default() -> Self {
        LeadCoinSettings {
            id: SETTINGS_ID.to_string(),
            contact_info_cost: 1,
            detailed_info_cost: 3,
            full_access_cost: 5,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateLeadCoinSettingsDto {
    #[validate(range(min = 0, max = 1000000))]
    pub contact_info_cost: Option<i64>,
    #[validate(range(min = 0, max = 1000000))]
    pub detailed_info_cost: Option<i64>,
    #[validate(range(min = 0, max = 1000000))]
    pub full_access_cost: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

/// One-off LeadCoin purchase paid through a checkout session.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoinOrder {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub coins: i64,
    pub amount: i64,
    pub status: OrderStatus,
    pub payment_session_id: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl CoinOrder {
    pub fn pending(user_id: ObjectId, coins: i64, amount: i64, session_id: String) -> Self {
        let now = DateTime::now();
        CoinOrder {
            id: None,
            user_id,
            coins,
            amount,
            status: OrderStatus::Pending,
            payment_session_id: session_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A paid session nobody could match to a pending record.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconciliationItem {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub payment_session_id: String,
    pub event_type: String,
    pub detail: String,
    pub payload: serde_json::Value,
    pub resolved: bool,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReconciliationResponse {
    pub id: String,
    pub payment_session_id: String,
    pub event_type: String,
    pub detail: String,
    pub resolved: bool,
    pub created_at: String,
}

impl From<ReconciliationItem> for ReconciliationResponse {
    fn from(item: ReconciliationItem) -> Self {
        ReconciliationResponse {
            id: item.id.map(|id| id.to_hex()).unwrap_or_default(),
            payment_session_id: item.payment_session_id,
            event_type: item.event_type,
            detail: item.detail,
            resolved: item.resolved,
            created_at: item.created_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}
