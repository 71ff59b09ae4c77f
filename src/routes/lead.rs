use std::collections::HashSet;

use rocket::serde::json::Json;
use rocket::State;
use rocket_okapi::openapi;
use rocket::futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime, Document, Regex as BsonRegex};
use mongodb::options::FindOptions;
use validator::Validate;
use log::info;

use crate::db::{self, DbConn};
use crate::guards::ActorGuard;
use crate::ledger::{Ledger, LedgerStore};
use crate::models::{
    CreateLeadDto, Lead, LeadAccessResponse, LeadListQuery, LeadResponse, LeadView, UpdateLeadDto,
};
use crate::services::access::{self, Capability};
use crate::services::LeadGate;
use crate::utils::{parse_object_id, ApiError, ApiResponse};

#[openapi(tag = "Leads")]
#[post("/leads", data = "<dto>")]
pub async fn create_lead(
    db: &State<DbConn>,
    actor: ActorGuard,
    dto: Json<CreateLeadDto>,
) -> Result<Json<ApiResponse<LeadResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageLeads)?;
    dto.validate()?;

    let dto = dto.into_inner();
    let now = DateTime::now();
    let mut lead = Lead {
        id: None,
        title: dto.title,
        description: dto.description,
        price: dto.price,
        location: dto.location,
        images: dto.images,
        category: dto.category,
        contact_email: dto.contact_email,
        contact_phone: dto.contact_phone,
        skills: dto.skills,
        work_type: dto.work_type,
        experience: dto.experience,
        created_by: actor.id,
        created_at: now,
        updated_at: now,
    };

    let result = db
        .collection::<Lead>(db::LEADS)
        .insert_one(&lead, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to create lead: {}", e)))?;
    lead.id = result.inserted_id.as_object_id();

    info!("Lead {:?} created by {}", lead.id, actor.id);
    Ok(Json(ApiResponse::success_with_message(
        "Lead created".to_string(),
        LeadResponse::new(lead, true),
    )))
}

/// Contact fields are redacted unless the caller already unlocked the lead.
#[openapi(tag = "Leads")]
#[get("/leads?<query..>")]
pub async fn list_leads(
    db: &State<DbConn>,
    actor: ActorGuard,
    query: LeadListQuery,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let skip = (page - 1) * limit;

    let mut filter = doc! {};
    if let Some(category) = query.category {
        filter.insert("category", category);
    }
    if let Some(location) = query.location {
        filter.insert(
            "location",
            BsonRegex { pattern: regex::escape(&location), options: "i".to_string() },
        );
    }
    if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
        let pattern = BsonRegex { pattern: regex::escape(search.trim()), options: "i".to_string() };
        filter.insert(
            "$or",
            vec![doc! { "title": pattern.clone() }, doc! { "description": pattern }],
        );
    }

    let leads_collection = db.collection::<Lead>(db::LEADS);
    let total = leads_collection
        .count_documents(filter.clone(), None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?;

    let find_options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .skip(skip as u64)
        .limit(limit)
        .build();
    let leads: Vec<Lead> = leads_collection
        .find(filter, find_options)
        .await
        .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;

    let unlocked: HashSet<ObjectId> = if access::has(&actor.user, Capability::UnlockLeadsFree) {
        leads.iter().filter_map(|lead| lead.id).collect()
    } else {
        let ids: Vec<ObjectId> = leads.iter().filter_map(|lead| lead.id).collect();
        let views: Vec<LeadView> = db
            .collection::<LeadView>(db::LEAD_VIEWS)
            .find(doc! { "user_id": actor.id, "lead_id": { "$in": ids } }, None)
            .await
            .map_err(|e| ApiError::internal_error(format!("Database error: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| ApiError::internal_error(format!("Cursor error: {}", e)))?;
        views.into_iter().map(|view| view.lead_id).collect()
    };

    let leads: Vec<LeadResponse> = leads
        .into_iter()
        .map(|lead| {
            let open = lead.id.map(|id| unlocked.contains(&id)).unwrap_or(false);
            LeadResponse::new(lead, open)
        })
        .collect();

    Ok(Json(ApiResponse::success(serde_json::json!({
        "leads": leads,
        "total": total,
        "page": page,
        "limit": limit,
    }))))
}

#[openapi(tag = "Leads")]
#[get("/leads/<id>")]
pub async fn get_lead(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    id: String,
) -> Result<Json<ApiResponse<LeadResponse>>, ApiError> {
    let lead_id = parse_object_id(&id, "lead")?;
    let ledger = ledger.inner().as_ref();

    let lead = ledger.lead(&lead_id).await?.ok_or_else(|| ApiError::not_found("Lead not found"))?;
    let unlocked = LeadGate::is_unlocked(ledger, &actor.user, &lead_id).await?;

    Ok(Json(ApiResponse::success(LeadResponse::new(lead, unlocked))))
}

#[openapi(tag = "Leads")]
#[put("/leads/<id>", data = "<dto>")]
pub async fn update_lead(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
    dto: Json<UpdateLeadDto>,
) -> Result<Json<ApiResponse<LeadResponse>>, ApiError> {
    access::require(&actor.user, Capability::ManageLeads)?;
    dto.validate()?;
    let lead_id = parse_object_id(&id, "lead")?;

    let dto = dto.into_inner();
    let mut set = Document::new();
    if let Some(title) = dto.title {
        set.insert("title", title);
    }
    if let Some(description) = dto.description {
        set.insert("description", description);
    }
    if let Some(price) = dto.price {
        set.insert("price", price);
    }
    if let Some(location) = dto.location {
        set.insert("location", location);
    }
    if let Some(images) = dto.images {
        set.insert("images", images);
    }
    if let Some(category) = dto.category {
        set.insert("category", category);
    }
    if let Some(email) = dto.contact_email {
        set.insert("contact_email", email);
    }
    if let Some(phone) = dto.contact_phone {
        set.insert("contact_phone", phone);
    }
    if let Some(skills) = dto.skills {
        set.insert("skills", skills);
    }
    if let Some(work_type) = dto.work_type {
        set.insert("work_type", work_type);
    }
    if let Some(experience) = dto.experience {
        set.insert("experience", experience);
    }
    set.insert("updated_at", DateTime::now());

    let updated = db
        .collection::<Lead>(db::LEADS)
        .find_one_and_update(
            doc! { "_id": lead_id },
            doc! { "$set": set },
            mongodb::options::FindOneAndUpdateOptions::builder()
                .return_document(mongodb::options::ReturnDocument::After)
                .build(),
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update lead: {}", e)))?
        .ok_or_else(|| ApiError::not_found("Lead not found"))?;

    Ok(Json(ApiResponse::success(LeadResponse::new(updated, true))))
}

#[openapi(tag = "Leads")]
#[delete("/leads/<id>")]
pub async fn delete_lead(
    db: &State<DbConn>,
    actor: ActorGuard,
    id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    access::require(&actor.user, Capability::ManageLeads)?;
    let lead_id = parse_object_id(&id, "lead")?;

    let result = db
        .collection::<Lead>(db::LEADS)
        .delete_one(doc! { "_id": lead_id }, None)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to delete lead: {}", e)))?;

    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Lead not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "message": "Lead deleted"
    }))))
}

/// Unlocks contact details, charging LeadCoins on the first view.
#[openapi(tag = "Leads")]
#[post("/leads/<id>/view")]
pub async fn view_lead(
    ledger: &State<Ledger>,
    actor: ActorGuard,
    id: String,
) -> Result<Json<ApiResponse<LeadAccessResponse>>, ApiError> {
    let lead_id = parse_object_id(&id, "lead")?;
    let access = LeadGate::request_contact_info(ledger.inner().as_ref(), &actor.user, &lead_id).await?;
    Ok(Json(ApiResponse::success(access)))
}
