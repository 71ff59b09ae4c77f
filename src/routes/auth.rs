use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use mongodb::bson::{doc, DateTime, oid::ObjectId};
use serde::Deserialize;
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

use crate::config::Config;
use crate::db::{self, DbConn};
use crate::models::{LoginDto, RegisterDto, User, UserResponse, UserStatus};
use crate::services::{EmailService, JwtService};
use crate::utils::{validate_email, validate_password, ApiError, ApiResponse};

const LOGIN_LIMIT: i32 = 5;
const LOGIN_WINDOW_MS: i64 = 15 * 60 * 1000;
const REGISTER_LIMIT: i32 = 3;
const REGISTER_WINDOW_MS: i64 = 60 * 60 * 1000;
const REFRESH_LIMIT: i32 = 10;
const REFRESH_WINDOW_MS: i64 = 60 * 1000;

/// --------------------
/// Rate limiter helper
/// --------------------
async fn rate_limit(
    db: &DbConn,
    key: &str,
    limit: i32,
    window_ms: i64,
) -> Result<(), ApiError> {
    let now = chrono::Utc::now().timestamp_millis();
    let window_expires = DateTime::from_millis(now + window_ms);

    let collection = db.collection::<mongodb::bson::Document>(db::RATE_LIMITS);

    let doc = collection
        .find_one(doc! { "key": key }, None)
        .await
        .map_err(|_| ApiError::internal_error("Rate limiter lookup failed"))?;

    match doc {
        // First request OR expired window
        None => {
            collection
                .insert_one(
                    doc! {
                        "key": key,
                        "count": 1,
                        "expires_at": window_expires
                    },
                    None,
                )
                .await
                .map_err(|_| ApiError::internal_error("Rate limiter insert failed"))?;
            Ok(())
        }

        Some(d) => {
            let count = d.get_i32("count").unwrap_or(0);
            let expires_at = d.get_datetime("expires_at").ok();

            if expires_at.map(|e| *e < DateTime::now()).unwrap_or(true) {
                collection
                    .update_one(
                        doc! { "key": key },
                        doc! {
                            "$set": {
                                "count": 1,
                                "expires_at": window_expires
                            }
                        },
                        None,
                    )
                    .await
                    .map_err(|_| ApiError::internal_error("Rate limiter reset failed"))?;
                return Ok(());
            }

            if count >= limit {
                return Err(ApiError::too_many_requests(
                    "Too many requests. Please try later.",
                ));
            }

            collection
                .update_one(
                    doc! { "key": key },
                    doc! { "$inc": { "count": 1 } },
                    None,
                )
                .await
                .map_err(|_| ApiError::internal_error("Rate limiter increment failed"))?;

            Ok(())
        }
    }
}

fn issue_tokens(user: &User) -> Result<(String, String), ApiError> {
    let user_id = user
        .id
        .as_ref()
        .ok_or_else(|| ApiError::internal_error("User has no id"))?;

    let access_token = JwtService::generate_access_token(user_id, user.role)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    let refresh_token = JwtService::generate_refresh_token(user_id, user.role)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    Ok((access_token, refresh_token))
}

/// The verification token is echoed back only outside production.
fn registration_body(user: User, email_sent: bool, dev_token: Option<String>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "user": UserResponse::from(user),
        "verification_email_sent": email_sent,
    });
    if let Some(token) = dev_token {
        body["verification_token"] = serde_json::Value::String(token);
    }
    body
}

/// --------------------
/// Register
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<dto>")]
pub async fn register(
    db: &State<DbConn>,
    dto: Json<RegisterDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate()?;
    let email = dto.email.trim().to_lowercase();
    if !validate_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }
    if !validate_password(&dto.password) {
        return Err(ApiError::bad_request(
            "Password must be at least 8 characters and contain a letter and a digit",
        ));
    }

    rate_limit(db, &format!("register:{}", email), REGISTER_LIMIT, REGISTER_WINDOW_MS).await?;

    let users = db.collection::<User>(db::USERS);
    let existing = users
        .find_one(doc! { "email": &email }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    if existing.is_some() {
        return Err(ApiError::conflict("Email already registered"));
    }

    let password_hash = bcrypt::hash(&dto.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    let token = uuid::Uuid::new_v4().to_string();

    let mut user = User::new(dto.name.trim().to_string(), email, password_hash, token.clone());
    let res = users
        .insert_one(&user, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to register: {}", e)))?;
    user.id = res.inserted_id.as_object_id();

    let email_sent = EmailService::send_verification_email(&user.email, &user.name, &token).await;

    let dev_token = Config::is_development().then_some(token);
    let body = registration_body(user, email_sent, dev_token);

    Ok(Json(ApiResponse::success_with_message(
        "Registration successful. Check your email to verify your account.".to_string(),
        body,
    )))
}

/// --------------------
/// Verify email
/// --------------------
#[openapi(tag = "Auth")]
#[get("/auth/verify-email?<token>")]
pub async fn verify_email(
    db: &State<DbConn>,
    token: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let result = db
        .collection::<User>(db::USERS)
        .update_one(
            doc! { "verification_token": &token },
            doc! {
                "$set": {
                    "is_verified": true,
                    "status": UserStatus::Active.as_str(),
                    "updated_at": DateTime::now()
                },
                "$unset": { "verification_token": "" }
            },
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    if result.matched_count == 0 {
        return Err(ApiError::bad_request("Invalid or expired verification token"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Email verified. You can now log in."
    }))))
}

/// --------------------
/// Login
/// --------------------
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<dto>")]
pub async fn login(
    db: &State<DbConn>,
    dto: Json<LoginDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let email = dto.email.trim().to_lowercase();
    rate_limit(db, &format!("login:{}", email), LOGIN_LIMIT, LOGIN_WINDOW_MS).await?;

    let user = db
        .collection::<User>(db::USERS)
        .find_one(doc! { "email": &email }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    let valid = bcrypt::verify(&dto.password, &user.password_hash).unwrap_or(false);
    if !valid {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }
    if user.status == UserStatus::Inactive {
        return Err(ApiError::forbidden("Account is deactivated"));
    }
    if !user.is_verified {
        return Err(ApiError::forbidden("Verify your email before logging in"));
    }

    db.collection::<User>(db::USERS)
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": { "last_login_at": DateTime::now() } },
            None,
        )
        .await
        .ok();

    let (access_token, refresh_token) = issue_tokens(&user)?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Login successful",
        "user": UserResponse::from(user),
        "access_token": access_token,
        "refresh_token": refresh_token
    }))))
}

/// --------------------
/// Silent Refresh Token
/// --------------------
#[derive(Deserialize, JsonSchema)]
pub struct RefreshTokenDto {
    pub refresh_token: String,
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh", data = "<dto>")]
pub async fn refresh_token(
    db: &State<DbConn>,
    dto: Json<RefreshTokenDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let claims = JwtService::verify_token(&dto.refresh_token, true)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;

    let user_id = ObjectId::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthorized("Invalid user id in token"))?;

    rate_limit(db, &format!("refresh:{}", claims.sub), REFRESH_LIMIT, REFRESH_WINDOW_MS).await?;

    // Role may have changed since the refresh token was issued.
    let user = db
        .collection::<User>(db::USERS)
        .find_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))?;
    if user.status == UserStatus::Inactive {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    let access = JwtService::generate_access_token(&user_id, user.role)
        .map_err(|e| ApiError::internal_error(e.to_string()))?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "access_token": access
    }))))
}
