use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use rocket::futures::TryStreamExt;
use mongodb::bson::{doc, DateTime};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use validator::Validate;
use log::info;

use crate::db::{self, DbConn};
use crate::guards::ActorGuard;
use crate::ledger::{days_after, Ledger, LedgerError};
use crate::models::{
    Coupon, CouponResponse, CreateCouponDto, RedemptionResponse, UpdateCouponStatusDto,
};
use crate::services::access::{self, Capability};
use crate::services::CouponService;
use crate::utils::{parse_object_id, validate_coupon_code, ApiError, ApiResponse};

#[openapi(tag = "Coupons")]
#[post("/admin/coupons", data = "<dto>")]
pub async fn create_coupon(
    db: &State<DbConn>,
    actor: ActorGuard,
    dto: Json<CreateCouponDto>,
) -> Result<Json<ApiResponse<CouponResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageCoupons)?;
    dto.validate()?;

    let dto = dto.into_inner();
    let code = match dto.code {
        Some(code) => CouponService::normalize(&code),
        None => CouponService::generate_code(),
    };
    if !validate_coupon_code(&code) {
        return Err(ApiError::bad_request(
            "Coupon code may only contain letters, digits, '-' and '_'",
        ));
    }

    let now = DateTime::now();
    let expires_at = dto.valid_days.map(|days| days_after(now, days)).transpose()?;

    let mut coupon = Coupon {
        id: None,
        code,
        max_uses: dto.max_uses,
        current_uses: 0,
        coin_amount: dto.coin_amount,
        active: true,
        expires_at,
        created_by: Some(actor.id),
        created_at: now,
        updated_at: now,
    };

    let result = db
        .collection::<Coupon>(db::COUPONS)
        .insert_one(&coupon, None)
        .await
        .map_err(|e| match LedgerError::from(e) {
            LedgerError::Duplicate => ApiError::conflict("Coupon code already exists"),
            other => ApiError::from(other),
        })?;
    coupon.id = result.inserted_id.as_object_id();

    info!("Coupon {} created by {}", coupon.code, actor.id);
    Ok(Json(ApiResponse::success(CouponResponse::from(coupon))))
}

#[openapi(tag = "Coupons")]
#[get("/admin/coupons?<active>")]
pub async fn list_coupons(
    db: &State<DbConn>,
    actor: ActorGuard,
    active: Option<bool>,
) -> Result<Json<ApiResponse<Vec<CouponResponse>>>, ApiError> {
    access::require(&actor.user, Capability::ManageCoupons)?;

    let filter = match active {
        Some(active) => doc! { "active": active },
        None => doc! {},
    };
    let coupons: Vec<Coupon> = db
        .collection::<Coupon>(db::COUPONS)
        .find(filter, FindOptions::builder().sort(doc! { "created_at": -1 }).build())
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;

    Ok(Json(ApiResponse::success(
        coupons.into_iter().map(CouponResponse::from).collect(),
    )))
}

#[openapi(tag = "Coupons")]
#[put("/admin/coupons/<id>/status", data = "<dto>")]
pub async fn update_coupon_status(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
    dto: Json<UpdateCouponStatusDto>,
) -> Result<Json<ApiResponse<CouponResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageCoupons)?;
    let coupon_id = parse_object_id(&id, "coupon")?;

    let coupon = db
        .collection::<Coupon>(db::COUPONS)
        .find_one_and_update(
            doc! { "_id": coupon_id },
            doc! { "$set": { "active": dto.active, "updated_at": DateTime::now() } },
            FindOneAndUpdateOptions::builder()
                .return_document(ReturnDocument::After)
                .build(),
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update coupon: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Coupon not found"))?;

    Ok(Json(ApiResponse::success(CouponResponse::from(coupon))))
}

#[openapi(tag = "Coupons")]
#[post("/coupons/<code>/redeem")]
pub async fn redeem_coupon(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    code: String,
) -> Result<Json<ApiResponse<RedemptionResponse>>, ApiError> {
    let redemption = CouponService::redeem(ledger.inner().as_ref(), &code, &actor.id).await?;
    Ok(Json(ApiResponse::success_with_message(
        format!("{} LeadCoins added to your balance", redemption.coins_granted),
        redemption,
    )))
}
