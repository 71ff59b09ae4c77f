use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Subadmin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Subadmin => "subadmin",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Pending,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Pending => "pending",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub lead_coins: i64,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub status: UserStatus,
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
    pub last_login_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    /// A freshly registered account: pending, unverified, empty wallet.
    pub fn new(name: String, email: String, password_hash: String, verification_token: String) -> Self {
        let now = DateTime::now();
        User {
            id: None,
            name,
            email,
            password_hash,
            role: Role::User,
            lead_coins: 0,
            permissions: Vec::new(),
            status: UserStatus::Pending,
            is_verified: false,
            verification_token: Some(verification_token),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct RegisterDto {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoginDto {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateProfileDto {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateRoleDto {
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateStatusDto {
    pub status: UserStatus,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct GrantCoinsDto {
    #[validate(range(min = 1, max = 1000000))]
    pub amount: i64,
    #[validate(length(min = 1, max = 200))]
    pub description: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub lead_coins: i64,
    pub permissions: Vec<String>,
    pub status: UserStatus,
    pub is_verified: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            email: user.email,
            role: user.role,
            lead_coins: user.lead_coins,
            permissions: user.permissions,
            status: user.status,
            is_verified: user.is_verified,
        }
    }
}
