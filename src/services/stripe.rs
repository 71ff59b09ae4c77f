use std::collections::HashMap;

use reqwest::Client;
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::Config;

const STRIPE_BASE: &str = "https://api.stripe.com/v1";

/// The slice of a Stripe checkout session this server reads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        )
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// What a checkout pays for.
pub struct CheckoutItem<'a> {
    pub name: &'a str,
    pub amount: i64,
    pub metadata: Vec<(&'a str, String)>,
}

pub struct StripeService;

impl StripeService {
    fn client() -> Client {
        Client::new()
    }

    fn secret_key() -> Result<String, String> {
        Config::stripe_secret_key().ok_or_else(|| "STRIPE_SECRET_KEY not configured".to_string())
    }

    fn checkout_form(item: &CheckoutItem<'_>) -> Vec<(String, String)> {
        let base_url = Config::app_base_url();
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "success_url".to_string(),
                format!("{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}", base_url),
            ),
            ("cancel_url".to_string(), format!("{}/payment/cancelled", base_url)),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), Config::currency()),
            ("line_items[0][price_data][unit_amount]".to_string(), item.amount.to_string()),
            ("line_items[0][price_data][product_data][name]".to_string(), item.name.to_string()),
        ];
        for (key, value) in &item.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }
        form
    }

    /// Create a hosted checkout session
    pub async fn create_checkout_session(item: CheckoutItem<'_>) -> Result<CheckoutSession, String> {
        if !Config::is_stripe_enabled() {
            return Err("Stripe is not enabled".to_string());
        }

        let res = Self::client()
            .post(format!("{}/checkout/sessions", STRIPE_BASE))
            .bearer_auth(Self::secret_key()?)
            .form(&Self::checkout_form(&item))
            .send()
            .await
            .map_err(|e| format!("Stripe request failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "Stripe error".to_string()));
        }

        res.json().await.map_err(|e| e.to_string())
    }

    /// Fetch a session to check its payment status
    pub async fn retrieve_checkout_session(session_id: &str) -> Result<CheckoutSession, String> {
        if !Config::is_stripe_enabled() {
            return Err("Stripe is not enabled".to_string());
        }

        let res = Self::client()
            .get(format!("{}/checkout/sessions/{}", STRIPE_BASE, session_id))
            .bearer_auth(Self::secret_key()?)
            .send()
            .await
            .map_err(|e| format!("Stripe request failed: {}", e))?;

        if !res.status().is_success() {
            return Err(res.text().await.unwrap_or_else(|_| "Stripe session lookup failed".to_string()));
        }

        res.json().await.map_err(|e| e.to_string())
    }
}
