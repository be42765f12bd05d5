use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Pending => "pending",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(TicketStatus::Open),
            "pending" => Ok(TicketStatus::Pending),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Normal => "normal",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketPriority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(TicketPriority::Low),
            "normal" => Ok(TicketPriority::Normal),
            "high" => Ok(TicketPriority::High),
            "urgent" => Ok(TicketPriority::Urgent),
            other => Err(format!("unknown ticket priority {other}")),
        }
    }
}

/// Who wrote a comment. Staff act through a member account, customers
/// through a portal access grant, and automated writers (the mail
/// ingestion pipeline) are recorded as System rather than an empty
/// actor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Author {
    Staff { member_id: String },
    Customer { portal_access_id: String },
    System,
}

impl Author {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Author::Staff { .. } => "staff",
            Author::Customer { .. } => "customer",
            Author::System => "system",
        }
    }

    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Author::Staff { member_id } => Some(member_id),
            Author::Customer { portal_access_id } => Some(portal_access_id),
            Author::System => None,
        }
    }

    pub(crate) fn from_columns(
        kind: &str,
        actor_id: Option<String>,
    ) -> Result<Self, HelpdeskStoreError> {
        match (kind, actor_id) {
            ("staff", Some(member_id)) => Ok(Author::Staff { member_id }),
            ("customer", Some(portal_access_id)) => Ok(Author::Customer { portal_access_id }),
            ("system", _) => Ok(Author::System),
            ("staff", None) | ("customer", None) => Err(HelpdeskStoreError::Storage(format!(
                "comment author kind {kind} has no actor id"
            ))),
            (kind, _) => Err(HelpdeskStoreError::Storage(format!(
                "unknown comment author kind {kind}"
            ))),
        }
    }
}

/// Client organization of a tenant. Inbound mail is routed to the client
/// whose registered domains contain the sender's domain.
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub domains: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A connected Gmail mailbox. The refresh token never leaves the store
/// through the API surface.
#[derive(Debug, Clone, Serialize)]
pub struct MailboxIntegration {
    pub id: String,
    pub tenant_id: String,
    pub email_address: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub is_active: bool,
    pub auto_create_tickets: bool,
    pub auto_sync: bool,
    /// Priority stamped on tickets the pipeline opens from this mailbox.
    pub default_priority: TicketPriority,
    /// Staff member attributed as creator of pipeline-opened tickets, so
    /// attribution is a fixed configuration instead of a membership query.
    pub actor_member_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_history_id: Option<u64>,
    pub watch_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Link between a provider-side conversation and the ticket it maps to.
/// (tenant_id, provider_thread_id) is unique so two writers cannot attach
/// the same conversation to different tickets, and a link is never
/// repointed once created.
#[derive(Debug, Clone, Serialize)]
pub struct EmailThread {
    pub id: String,
    pub tenant_id: String,
    /// Mailbox the conversation first arrived through.
    pub integration_id: String,
    pub provider_thread_id: String,
    pub ticket_id: String,
    pub subject: String,
    pub participants: Vec<String>,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub requester_email: String,
    pub requester_name: Option<String>,
    /// Member credited as creator. Pipeline-opened tickets carry the
    /// integration's actor member when one is configured.
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketComment {
    pub id: String,
    pub tenant_id: String,
    pub ticket_id: String,
    pub author: Author,
    pub body: String,
    pub is_internal: bool,
    /// True for comments the mail pipeline writes on the requester's behalf.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HelpdeskStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("thread {provider_thread_id} is already linked to a ticket")]
    DuplicateThread { provider_thread_id: String },
    #[error("storage error: {0}")]
    Storage(String),
}
