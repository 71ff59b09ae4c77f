use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use rocket::futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};

use crate::db::{self, DbConn};
use crate::guards::ActorGuard;
use crate::ledger::{Ledger, LedgerStore};
use crate::models::{SubscriptionStatus, TicketStatus, UserSubscriptionResponse};
use crate::services::access::{self, Capability};
use crate::utils::{ApiError, ApiResponse};

async fn count(db: &DbConn, collection: &str, filter: Document) -> Result<u64, ApiError> {
    db.collection::<Document>(collection)
        .count_documents(filter, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))
}

fn open_ticket_filter() -> Document {
    doc! { "status": { "$in": [TicketStatus::Open.as_str(), TicketStatus::InProgress.as_str()] } }
}

#[openapi(tag = "Dashboard")]
#[get("/dashboard")]
pub async fn user_dashboard(
    db: &State<DbConn>,
    ledger: &State<Ledger>,
    actor: ActorGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let balance = ledger.balance(&actor.id).await?;
    let active_subscription = ledger
        .subscriptions_for_user(&actor.id)
        .await?
        .into_iter()
        .find(|record| record.status == SubscriptionStatus::Active)
        .map(UserSubscriptionResponse::from);

    let unlocked_leads = count(db, db::LEAD_VIEWS, doc! { "user_id": actor.id }).await?;
    let mut tickets = open_ticket_filter();
    tickets.insert("user_id", actor.id);
    let open_tickets = count(db, db::SUPPORT_TICKETS, tickets).await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "lead_coins": balance,
        "active_subscription": active_subscription,
        "unlocked_leads": unlocked_leads,
        "open_tickets": open_tickets,
    }))))
}

#[openapi(tag = "Dashboard")]
#[get("/admin/dashboard")]
pub async fn admin_dashboard(
    db: &State<DbConn>,
    actor: ActorGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    access::require(&actor.user, Capability::ViewDashboard)?;

    let users = count(db, db::USERS, doc! {}).await?;
    let leads = count(db, db::LEADS, doc! {}).await?;
    let active_subscriptions = count(
        db,
        db::USER_SUBSCRIPTIONS,
        doc! { "status": SubscriptionStatus::Active.as_str() },
    )
    .await?;
    let open_tickets = count(db, db::SUPPORT_TICKETS, open_ticket_filter()).await?;
    let pending_reconciliation = count(db, db::RECONCILIATION_QUEUE, doc! { "resolved": false }).await?;

    let totals: Vec<Document> = db
        .collection::<Document>(db::USERS)
        .aggregate(
            vec![doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$lead_coins" } } }],
            None,
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;
    let coins_in_circulation = match totals.first().and_then(|d| d.get("total")) {
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Int32(n)) => i64::from(*n),
        _ => 0,
    };

    Ok(Json(ApiResponse::success(serde_json::json!({
        "users": users,
        "leads": leads,
        "active_subscriptions": active_subscriptions,
        "coins_in_circulation": coins_in_circulation,
        "open_tickets": open_tickets,
        "pending_reconciliation": pending_reconciliation,
    }))))
}
