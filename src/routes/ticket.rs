use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use rocket::futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, DateTime};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use validator::Validate;
use log::{info, warn};

use crate::db::{self, DbConn};
use crate::guards::ActorGuard;
use crate::ledger::{Ledger, LedgerStore};
use crate::models::{
    CreateReplyDto, CreateTicketDto, SupportTicket, TicketListQuery, TicketPriority, TicketReply,
    TicketResponse, TicketStatus, UpdateTicketStatusDto,
};
use crate::services::access::{self, Capability};
use crate::services::EmailService;
use crate::utils::{parse_object_id, ApiError, ApiResponse};

async fn load_ticket(db: &DbConn, id: &ObjectId) -> Result<SupportTicket, ApiError> {
    db.collection::<SupportTicket>(db::SUPPORT_TICKETS)
        .find_one(doc! { "_id": id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Ticket not found"))
}

/// Staff see every ticket; everyone else only their own. Other people's
/// tickets read as missing.
fn ensure_visible(actor: &ActorGuard, ticket: &SupportTicket) -> Result<(), ApiError> {
    if ticket.user_id == actor.id || access::has(&actor.user, Capability::ManageTickets) {
        Ok(())
    } else {
        Err(ApiError::not_found("Ticket not found"))
    }
}

#[openapi(tag = "Support")]
#[post("/tickets", data = "<dto>")]
pub async fn create_ticket(
    db: &State<DbConn>,
    actor: ActorGuard,
    dto: Json<CreateTicketDto>,
) -> Result<Json<ApiResponse<TicketResponse>>, ApiError> {
    dto.validate()?;

    let dto = dto.into_inner();
    let now = DateTime::now();
    let mut ticket = SupportTicket {
        id: None,
        user_id: actor.id,
        subject: dto.subject.trim().to_string(),
        message: dto.message,
        status: TicketStatus::Open,
        priority: dto.priority.unwrap_or(TicketPriority::Medium),
        replies: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    let result = db
        .collection::<SupportTicket>(db::SUPPORT_TICKETS)
        .insert_one(&ticket, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to create ticket: {}", e)))?;
    ticket.id = result.inserted_id.as_object_id();

    Ok(Json(ApiResponse::success(TicketResponse::from(ticket))))
}

#[openapi(tag = "Support")]
#[get("/tickets?<query..>")]
pub async fn list_tickets(
    db: &State<DbConn>,
    actor: ActorGuard,
    query: TicketListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let skip = (page - 1) * limit;

    let mut filter = doc! {};
    if !access::has(&actor.user, Capability::ManageTickets) {
        filter.insert("user_id", actor.id);
    }
    if let Some(status) = query.status {
        filter.insert("status", status);
    }

    let tickets_collection = db.collection::<SupportTicket>(db::SUPPORT_TICKETS);
    let total = tickets_collection
        .count_documents(filter.clone(), None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    let find_options = FindOptions::builder()
        .sort(doc! { "updated_at": -1 })
        .skip(skip as u64)
        .limit(limit)
        .build();
    let tickets: Vec<SupportTicket> = tickets_collection
        .find(filter, find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;

    let tickets: Vec<TicketResponse> = tickets.into_iter().map(TicketResponse::from).collect();
    Ok(Json(ApiResponse::success(serde_json::json!({
        "tickets": tickets,
        "total": total,
        "page": page,
        "limit": limit,
    }))))
}

#[openapi(tag = "Support")]
#[get("/tickets/<id>")]
pub async fn get_ticket(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
) -> Result<Json<ApiResponse<TicketResponse>>, ApiError> {
    let ticket_id = parse_object_id(&id, "ticket")?;
    let ticket = load_ticket(db, &ticket_id).await?;
    ensure_visible(&actor, &ticket)?;
    Ok(Json(ApiResponse::success(TicketResponse::from(ticket))))
}

/// A staff reply moves an open ticket to in-progress and emails the owner.
/// An owner reply reopens a resolved ticket.
#[openapi(tag = "Support")]
#[post("/tickets/<id>/replies", data = "<dto>")]
pub async fn reply_to_ticket(
    db: &State<DbConn>,
    ledger: &State<Ledger>,
    actor: ActorGuard,
    id: String,
    dto: Json<CreateReplyDto>,
) -> Result<Json<ApiResponse<TicketResponse>>, ApiError> {
    dto.validate()?;
    let ticket_id = parse_object_id(&id, "ticket")?;

    let ticket = load_ticket(db, &ticket_id).await?;
    ensure_visible(&actor, &ticket)?;
    let is_staff = ticket.user_id != actor.id;
    let status = ticket
        .status
        .after_reply(is_staff)
        .ok_or_else(|| ApiError::conflict("Ticket is closed"))?;
    let now = DateTime::now();
    let reply = TicketReply {
        author_id: actor.id,
        is_staff,
        message: dto.message.clone(),
        created_at: now,
    };
    let reply = to_bson(&reply).map_err(|e| ApiError::internal_error(e.to_string()))?;

    let updated = db
        .collection::<SupportTicket>(db::SUPPORT_TICKETS)
        .find_one_and_update(
            doc! { "_id": ticket_id, "status": { "$ne": TicketStatus::Closed.as_str() } },
            doc! {
                "$push": { "replies": reply },
                "$set": { "status": status.as_str(), "updated_at": now }
            },
            FindOneAndUpdateOptions::builder()
                .return_document(ReturnDocument::After)
                .build(),
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to add reply: {}", e)))?
        .ok_or_else(|| ApiError::conflict("Ticket is closed"))?;

    if is_staff {
        match ledger.user(&updated.user_id).await {
            Ok(Some(owner)) => {
                if !EmailService::send_ticket_reply_email(&owner.email, &updated.subject, &dto.message).await {
                    warn!("Reply notification for ticket {} was not delivered", ticket_id);
                }
            }
            Ok(None) => warn!("Owner of ticket {} no longer exists", ticket_id),
            Err(e) => warn!("Could not load owner of ticket {}: {}", ticket_id, e),
        }
    }

    Ok(Json(ApiResponse::success(TicketResponse::from(updated))))
}

#[openapi(tag = "Support")]
#[put("/tickets/<id>/status", data = "<dto>")]
pub async fn update_ticket_status(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
    dto: Json<UpdateTicketStatusDto>,
) -> Result<Json<ApiResponse<TicketResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageTickets)?;
    let ticket_id = parse_object_id(&id, "ticket")?;

    let updated = db
        .collection::<SupportTicket>(db::SUPPORT_TICKETS)
        .find_one_and_update(
            doc! { "_id": ticket_id },
            doc! { "$set": { "status": dto.status.as_str(), "updated_at": DateTime::now() } },
            FindOneAndUpdateOptions::builder()
                .return_document(ReturnDocument::After)
                .build(),
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update ticket: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Ticket not found"))?;

    info!("Ticket {} set to {} by {}", ticket_id, dto.status.as_str(), actor.id);
    Ok(Json(ApiResponse::success(TicketResponse::from(updated))))
}
