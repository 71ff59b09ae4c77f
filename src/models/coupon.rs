use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Coupon {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub code: String,
    pub max_uses: i64,
    pub current_uses: i64,
    pub coin_amount: i64,
    pub active: bool,
    pub expires_at: Option<DateTime>,
    pub created_by: Option<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Coupon {
    pub fn is_redeemable_at(&self, now: DateTime) -> bool {
        self.active && self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// At most one per (coupon, user).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CouponRedemption {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub coupon_id: ObjectId,
    pub user_id: ObjectId,
    pub coins_granted: i64,
    pub redeemed_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateCouponDto {
    /// Generated when omitted.
    #[validate(length(min = 4, max = 32))]
    pub code: Option<String>,
    #[validate(range(min = 1))]
    pub max_uses: i64,
    #[validate(range(min = 1, max = 1000000))]
    pub coin_amount: i64,
    /// Days until the code stops working.
    #[validate(range(min = 1, max = 3650))]
    pub valid_days: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateCouponStatusDto {
    pub active: bool,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CouponResponse {
    pub id: String,
    pub code: String,
    pub max_uses: i64,
    pub current_uses: i64,
    pub coin_amount: i64,
    pub active: bool,
    pub expires_at: Option<String>,
}

impl From<Coupon> for CouponResponse {
    fn from(coupon: Coupon) -> Self {
        CouponResponse {
            id: coupon.id.map(|id| id.to_hex()).unwrap_or_default(),
            code: coupon.code,
            max_uses: coupon.max_uses,
            current_uses: coupon.current_uses,
            coin_amount: coupon.coin_amount,
            active: coupon.active,
            expires_at: coupon.expires_at.and_then(|at| at.try_to_rfc3339_string().ok()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RedemptionResponse {
    pub coins_granted: i64,
    pub new_balance: i64,
}
