use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime};
use validator::Validate;

use crate::db::{self, DbConn};
use crate::guards::ActorGuard;
use crate::ledger::Ledger;
use crate::models::{CoinTransactionResponse, UpdateProfileDto, UserResponse};
use crate::services::BalanceService;
use crate::utils::{ApiError, ApiResponse};

#[openapi(tag = "User")]
#[get("/users/me")]
pub async fn get_profile(actor: ActorGuard) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    Ok(Json(ApiResponse::success(UserResponse::from(actor.user))))
}

#[openapi(tag = "User")]
#[put("/users/me", data = "<dto>")]
pub async fn update_profile(
    db: &State<DbConn>,
    actor: ActorGuard,
    dto: Json<UpdateProfileDto>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    dto.validate()?;
    let mut user = actor.user;

    if let Some(name) = &dto.name {
        let name = name.trim().to_string();
        db.collection::<mongodb::bson::Document>(db::USERS)
            .update_one(
                doc! { "_id": actor.id },
                doc! { "$set": { "name": &name, "updated_at": DateTime::now() } },
                None,
            )
            .await
            .map_err(|e| ApiError::internal_error(format!("Failed to update profile: {}", e)))?;
        user.name = name;
    }

    Ok(Json(ApiResponse::success_with_message(
        "Profile updated".to_string(),
        UserResponse::from(user),
    )))
}

#[openapi(tag = "User")]
#[get("/users/me/balance")]
pub async fn get_balance(
    ledger: &State<Ledger>,
    actor: ActorGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let balance = BalanceService::balance(ledger.inner().as_ref(), &actor.id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({
        "lead_coins": balance
    }))))
}

#[openapi(tag = "User")]
#[get("/users/me/transactions?<limit>")]
pub async fn get_transactions(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<Vec<CoinTransactionResponse>>>, ApiError> {
    let entries = BalanceService::history(ledger.inner().as_ref(), &actor.id, limit.unwrap_or(50)).await?;
    Ok(Json(ApiResponse::success(
        entries.into_iter().map(CoinTransactionResponse::from).collect(),
    )))
}
