use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use rocket_okapi::okapi::schemars;
use rocket_okapi::okapi::schemars::JsonSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    /// Status after a reply. Staff picking up an open ticket moves it to
    /// `in_progress`; the owner replying to a resolved one reopens it.
    /// `None` means the ticket is closed and takes no replies.
    pub fn after_reply(self, is_staff: bool) -> Option<TicketStatus> {
        match (is_staff, self) {
            (_, TicketStatus::Closed) => None,
            (true, TicketStatus::Open) => Some(TicketStatus::InProgress),
            (false, TicketStatus::Resolved) => Some(TicketStatus::Open),
            (_, status) => Some(status),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TicketReply {
    pub author_id: ObjectId,
    pub is_staff: bool,
    pub message: String,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupportTicket {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub subject: String,
    pub message: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    #[serde(default)]
    pub replies: Vec<TicketReply>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateTicketDto {
    #[validate(length(min = 1, max = 200))]
    pub subject: String,
    #[validate(length(min = 1, max = 5000))]
    pub message: String,
    pub priority: Option<TicketPriority>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct CreateReplyDto {
    #[validate(length(min = 1, max = 5000))]
    pub message: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateTicketStatusDto {
    pub status: TicketStatus,
}

#[derive(Debug, FromForm, Deserialize, JsonSchema)]
pub struct TicketListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TicketReplyResponse {
    pub author_id: String,
    pub is_staff: bool,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TicketResponse {
    pub id: String,
    pub user_id: String,
    pub subject: String,
    pub message: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub replies: Vec<TicketReplyResponse>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<SupportTicket> for TicketResponse {
    fn from(ticket: SupportTicket) -> Self {
        TicketResponse {
            id: ticket.id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: ticket.user_id.to_hex(),
            subject: ticket.subject,
            message: ticket.message,
            status: ticket.status,
            priority: ticket.priority,
            replies: ticket
                .replies
                .into_iter()
                .map(|r| TicketReplyResponse {
                    author_id: r.author_id.to_hex(),
                    is_staff: r.is_staff,
                    message: r.message,
                    created_at: r.created_at.try_to_rfc3339_string().unwrap_or_default(),
                })
                .collect(),
            created_at: ticket.created_at.try_to_rfc3339_string().unwrap_or_default(),
            updated_at: ticket.updated_at.try_to_rfc3339_string().unwrap_or_default(),
        }
    }
}
