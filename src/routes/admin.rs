use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use rocket::futures::TryStreamExt;
use mongodb::bson::{doc, DateTime, Document, Regex as BsonRegex};
use mongodb::options::{FindOptions, ReplaceOptions};
use serde::Deserialize;
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;
use log::info;

use crate::db::{self, DbConn};
use crate::guards::ActorGuard;
use crate::ledger::{Ledger, LedgerStore};
use crate::models::{
    CoinTransactionResponse, GrantCoinsDto, LeadCoinSettings, ReconciliationItem,
    ReconciliationResponse, Role, UpdateLeadCoinSettingsDto, UpdateRoleDto, UpdateStatusDto, User,
    UserResponse, SETTINGS_ID,
};
use crate::services::access::{self, Capability};
use crate::services::BalanceService;
use crate::utils::{parse_object_id, ApiError, ApiResponse};

async fn load_user(db: &DbConn, id: &mongodb::bson::oid::ObjectId) -> Result<User, ApiError> {
    db.collection::<User>(db::USERS)
        .find_one(doc! { "_id": id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

#[derive(FromForm, Deserialize, JsonSchema)]
pub struct UserListQuery {
    pub role: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[openapi(tag = "Admin")]
#[get("/admin/users?<query..>")]
pub async fn list_users(
    db: &State<DbConn>,
    actor: ActorGuard,
    query: UserListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    access::require(&actor.user, Capability::ManageUsers)?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let skip = (page - 1) * limit;

    let mut filter = doc! {};
    if let Some(role) = query.role {
        filter.insert("role", role);
    }
    if let Some(status) = query.status {
        filter.insert("status", status);
    }
    if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
        let pattern = BsonRegex {
            pattern: regex::escape(search.trim()),
            options: "i".to_string(),
        };
        filter.insert(
            "$or",
            vec![doc! { "name": pattern.clone() }, doc! { "email": pattern }],
        );
    }

    let find_options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip as u64)
        .limit(limit)
        .build();

    let users = db.collection::<User>(db::USERS);
    let total = users
        .count_documents(filter.clone(), None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;
    let found: Vec<User> = users
        .find(filter, find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;

    let users: Vec<UserResponse> = found.into_iter().map(UserResponse::from).collect();
    Ok(Json(ApiResponse::success(serde_json::json!({
        "users": users,
        "total": total,
        "page": page,
        "limit": limit,
    }))))
}

/// Only admins change roles. Permissions are kept for subadmins only.
#[openapi(tag = "Admin")]
#[put("/admin/users/<id>/role", data = "<dto>")]
pub async fn update_user_role(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
    dto: Json<UpdateRoleDto>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    if actor.user.role != Role::Admin {
        return Err(ApiError::forbidden("Only admins can change roles"));
    }
    let user_id = parse_object_id(&id, "user")?;
    if user_id == actor.id {
        return Err(ApiError::bad_request("You cannot change your own role"));
    }
    access::validate_permissions(&dto.permissions)?;

    let permissions = if dto.role == Role::Subadmin {
        dto.permissions.clone()
    } else {
        Vec::new()
    };

    let mut user = load_user(db, &user_id).await?;
    db.collection::<User>(db::USERS)
        .update_one(
            doc! { "_id": user_id },
            doc! { "$set": {
                "role": dto.role.as_str(),
                "permissions": permissions.clone(),
                "updated_at": DateTime::now()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update role: {}", e)))?;

    info!("User {} is now {} with {:?}", user_id, dto.role.as_str(), permissions);
    user.role = dto.role;
    user.permissions = permissions;
    Ok(Json(ApiResponse::success(UserResponse::from(user))))
}

#[openapi(tag = "Admin")]
#[put("/admin/users/<id>/status", data = "<dto>")]
pub async fn update_user_status(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
    dto: Json<UpdateStatusDto>,
) -> Result<Json<ApiResponse<UserResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageUsers)?;
    let user_id = parse_object_id(&id, "user")?;
    if user_id == actor.id {
        return Err(ApiError::bad_request("You cannot change your own status"));
    }

    let mut user = load_user(db, &user_id).await?;
    if user.role == Role::Admin && actor.user.role != Role::Admin {
        return Err(ApiError::forbidden("Only admins can change an admin's status"));
    }

    db.collection::<User>(db::USERS)
        .update_one(
            doc! { "_id": user_id },
            doc! { "$set": { "status": dto.status.as_str(), "updated_at": DateTime::now() } },
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update status: {}", e)))?;

    user.status = dto.status;
    Ok(Json(ApiResponse::success(UserResponse::from(user))))
}

#[openapi(tag = "Admin")]
#[delete("/admin/users/<id>")]
pub async fn delete_user(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    access::require(&actor.user, Capability::ManageUsers)?;
    let user_id = parse_object_id(&id, "user")?;

    let user = load_user(db, &user_id).await?;
    if user.role == Role::Admin {
        return Err(ApiError::forbidden("Admin accounts cannot be deleted"));
    }

    db.collection::<User>(db::USERS)
        .delete_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to delete user: {}", e)))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "User deleted"
    }))))
}

#[openapi(tag = "Admin")]
#[post("/admin/users/<id>/coins", data = "<dto>")]
pub async fn grant_coins(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    id: String,
    dto: Json<GrantCoinsDto>,
) -> Result<Json<ApiResponse<CoinTransactionResponse>>, ApiError> {
    dto.validate()?;
    let user_id = parse_object_id(&id, "user")?;

    let entry = BalanceService::admin_grant(
        ledger.inner().as_ref(),
        &actor.user,
        &user_id,
        dto.amount,
        &dto.description,
    )
    .await?;

    Ok(Json(ApiResponse::success_with_message(
        format!("Granted {} LeadCoins", dto.amount),
        CoinTransactionResponse::from(entry),
    )))
}

#[openapi(tag = "Admin")]
#[get("/admin/settings")]
pub async fn get_settings(
    ledger: &State<Ledger>,
    actor: ActorGuard,
) -> Result<Json<ApiResponse<LeadCoinSettings>>, ApiError> {
    access::require(&actor.user, Capability::ViewDashboard)?;
    let settings = ledger.settings().await?;
    Ok(Json(ApiResponse::success(settings)))
}

#[openapi(tag = "Admin")]
#[put("/admin/settings", data = "<dto>")]
pub async fn update_settings(
    db: &State<DbConn>,
    ledger: &State<Ledger>,
    actor: ActorGuard,
    dto: Json<UpdateLeadCoinSettingsDto>,
) -> Result<Json<ApiResponse<LeadCoinSettings>>, ApiError> {
    access::require(&actor.user, Capability::ManageSettings)?;
    dto.validate()?;

    let mut settings = ledger.settings().await?;
    if let Some(cost) = dto.contact_info_cost {
        settings.contact_info_cost = cost;
    }
    if let Some(cost) = dto.detailed_info_cost {
        settings.detailed_info_cost = cost;
    }
    if let Some(cost) = dto.full_access_cost {
        settings.full_access_cost = cost;
    }
    settings.id = SETTINGS_ID.to_string();

    db.collection::<LeadCoinSettings>(db::LEAD_COIN_SETTINGS)
        .replace_one(
            doc! { "_id": SETTINGS_ID },
            &settings,
            ReplaceOptions::builder().upsert(true).build(),
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to save settings: {}", e)))?;

    info!("LeadCoin settings updated by {}: {:?}", actor.id, settings);
    Ok(Json(ApiResponse::success(settings)))
}

#[openapi(tag = "Admin")]
#[get("/admin/reconciliation?<resolved>")]
pub async fn list_reconciliation(
    db: &State<DbConn>,
    actor: ActorGuard,
    resolved: Option<bool>,
) -> Result<Json<ApiResponse<Vec<ReconciliationResponse>>>, ApiError> {
    access::require(&actor.user, Capability::ManageSubscriptions)?;

    let filter = doc! { "resolved": resolved.unwrap_or(false) };
    let items: Vec<ReconciliationItem> = db
        .collection::<ReconciliationItem>(db::RECONCILIATION_QUEUE)
        .find(filter, FindOptions::builder().sort(doc! { "created_at": -1 }).build())
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;

    Ok(Json(ApiResponse::success(
        items.into_iter().map(ReconciliationResponse::from).collect(),
    )))
}

#[openapi(tag = "Admin")]
#[put("/admin/reconciliation/<id>/resolve")]
pub async fn resolve_reconciliation(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    access::require(&actor.user, Capability::ManageSubscriptions)?;
    let item_id = parse_object_id(&id, "reconciliation item")?;

    let result = db
        .collection::<Document>(db::RECONCILIATION_QUEUE)
        .update_one(
            doc! { "_id": item_id },
            doc! { "$set": {
                "resolved": true,
                "resolved_by": actor.id,
                "resolved_at": DateTime::now()
            }},
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    if result.matched_count == 0 {
        return Err(ApiError::not_found("Reconciliation item not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Marked as resolved"
    }))))
}
