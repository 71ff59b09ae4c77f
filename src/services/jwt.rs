use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::Role;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtService;

impl JwtService {
    fn sign(user_id: &ObjectId, role: Role, expiry: i64, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_hex(),
            role,
            exp: now + expiry,
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    pub fn generate_access_token(user_id: &ObjectId, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        Self::sign(user_id, role, Config::jwt_expiry(), &Config::jwt_secret())
    }

    pub fn generate_refresh_token(user_id: &ObjectId, role: Role) -> Result<String, jsonwebtoken::errors::Error> {
        Self::sign(user_id, role, Config::jwt_refresh_expiry(), &Config::jwt_refresh_secret())
    }

    pub fn verify_token(token: &str, is_refresh: bool) -> Result<Claims, jsonwebtoken::errors::Error> {
        let secret = if is_refresh {
            Config::jwt_refresh_secret()
        } else {
            Config::jwt_secret()
        };

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}
