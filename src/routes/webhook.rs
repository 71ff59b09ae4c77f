use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;

use crate::guards::StripeSignature;
use crate::ledger::Ledger;
use crate::services::{WebhookConfig, WebhookService};
use crate::utils::{ApiError, ApiResponse};

/// Payment provider callback. The body is read raw so the signature can be
/// checked against the exact bytes that were signed.
#[openapi(skip)]
#[post("/webhooks/payment", data = "<body>")]
pub async fn payment_webhook(
    ledger: &State<Ledger>,
    config: &State<WebhookConfig>,
    signature: StripeSignature,
    body: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let outcome = WebhookService::handle(
        ledger.inner().as_ref(),
        config.inner(),
        signature.0.as_deref(),
        &body,
    )
    .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "received": true,
        "outcome": outcome,
    }))))
}
