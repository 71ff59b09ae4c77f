use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Lead {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    pub description: String,
    /// Informational only, never charged to a viewer.
    pub price: Option<f64>,
    pub location: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub category: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub work_type: Option<String>,
    pub experience: Option<String>,
    pub created_by: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// Proof that a user has paid for a lead's contact details.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LeadView {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub lead_id: ObjectId,
    pub coins_spent: i64,
    pub viewed_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateLeadDto {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
    pub location: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub category: Option<String>,
    #[validate(email)]
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub work_type: Option<String>,
    pub experience: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct UpdateLeadDto {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    pub description: Option<String>,
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
    pub location: Option<String>,
    pub images: Option<Vec<String>>,
    pub category: Option<String>,
    #[validate(email)]
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub skills: Option<Vec<String>>,
    pub work_type: Option<String>,
    pub experience: Option<String>,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct LeadListQuery {
    pub category: Option<String>,
    pub location: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct LeadContact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl From<&Lead> for LeadContact {
    fn from(lead: &Lead) -> Self {
        LeadContact {
            email: lead.contact_email.clone(),
            phone: lead.contact_phone.clone(),
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct LeadResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub images: Vec<String>,
    pub category: Option<String>,
    pub skills: Vec<String>,
    pub work_type: Option<String>,
    pub experience: Option<String>,
    pub unlocked: bool,
    /// Present only once the caller has unlocked the lead.
    pub contact: Option<LeadContact>,
}

impl LeadResponse {
    pub fn new(lead: Lead, unlocked: bool) -> Self {
        let contact = unlocked.then(|| LeadContact::from(&lead));
        LeadResponse {
            id: lead.id.map(|id| id.to_hex()).unwrap_or_default(),
            title: lead.title,
            description: lead.description,
            price: lead.price,
            location: lead.location,
            images: lead.images,
            category: lead.category,
            skills: lead.skills,
            work_type: lead.work_type,
            experience: lead.experience,
            unlocked,
            contact,
        }
    }
}

/// Outcome of asking for a lead's contact details.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct LeadAccessResponse {
    pub granted: bool,
    pub coins_spent: i64,
    pub remaining_coins: i64,
    pub contact: Option<LeadContact>,
}
