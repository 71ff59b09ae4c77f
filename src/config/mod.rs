use rocket::figment::{Figment, providers::{Env, Format, Toml}};
use rocket::Config as RocketConfig;
use std::env;

pub struct Config;

impl Config {
    fn figment() -> Figment {
        // Get the current profile
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

        Figment::from(RocketConfig::default())
            .merge(Toml::file("Rocket.toml").nested())
            .select(&profile)
            .merge(Env::prefixed("ROCKET_").split("_"))
    }

    pub fn jwt_secret() -> String {
        Self::figment()
            .extract_inner("jwt_secret")
            .unwrap_or_else(|_| "default-secret".to_string())
    }

    pub fn jwt_refresh_secret() -> String {
        Self::figment()
            .extract_inner("jwt_refresh_secret")
            .unwrap_or_else(|_| "default-refresh-secret".to_string())
    }

    pub fn jwt_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_expiry")
            .unwrap_or(900)
    }

    pub fn jwt_refresh_expiry() -> i64 {
        Self::figment()
            .extract_inner("jwt_refresh_expiry")
            .unwrap_or(604800)
    }

    pub fn mongodb_uri() -> String {
        Self::figment()
            .extract_inner("mongodb_uri")
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string())
    }

    pub fn mongodb_database() -> String {
        Self::figment()
            .extract_inner("mongodb_database")
            .unwrap_or_else(|_| "leadcoin".to_string())
    }

    pub fn stripe_secret_key() -> Option<String> {
        Self::figment()
            .extract_inner("stripe_secret_key")
            .ok()
    }

    pub fn stripe_webhook_secret() -> Option<String> {
        Self::figment()
            .extract_inner("stripe_webhook_secret")
            .ok()
    }

    pub fn is_stripe_enabled() -> bool {
        Self::stripe_secret_key().is_some()
    }

    pub fn webhook_tolerance_secs() -> i64 {
        Self::figment()
            .extract_inner("webhook_tolerance_secs")
            .unwrap_or(300)
    }

    /// Lets an unmatched paid session create its own subscription record.
    pub fn webhook_fallback_grants() -> bool {
        Self::figment()
            .extract_inner("webhook_fallback_grants")
            .unwrap_or(false)
    }

    /// Price of a single LeadCoin in the currency's minor unit.
    pub fn coin_unit_price() -> i64 {
        Self::figment()
            .extract_inner("coin_unit_price")
            .unwrap_or(100)
    }

    pub fn currency() -> String {
        Self::figment()
            .extract_inner("currency")
            .unwrap_or_else(|_| "usd".to_string())
    }

    pub fn app_base_url() -> String {
        Self::figment()
            .extract_inner("app_base_url")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
    }

    pub fn expiry_sweep_secs() -> u64 {
        Self::figment()
            .extract_inner("expiry_sweep_secs")
            .unwrap_or(3600)
    }

    pub fn mail_host() -> String {
        Self::figment()
            .extract_inner("mail_host")
            .unwrap_or_else(|_| "smtp.gmail.com".to_string())
    }

    pub fn mail_port() -> u16 {
        Self::figment()
            .extract_inner("mail_port")
            .unwrap_or(587)
    }

    pub fn mail_user() -> String {
        Self::figment()
            .extract_inner("mail_user")
            .unwrap_or_default()
    }

    pub fn mail_password() -> String {
        Self::figment()
            .extract_inner("mail_password")
            .unwrap_or_default()
    }

    pub fn mail_from() -> String {
        Self::figment()
            .extract_inner("mail_from")
            .unwrap_or_else(|_| "LeadCoin <noreply@leadcoin.app>".to_string())
    }

    pub fn is_development() -> bool {
        let profile = env::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());
        profile == "development"
    }
}
