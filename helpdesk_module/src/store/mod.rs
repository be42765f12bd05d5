//! SQLite persistence for clients, mailbox integrations, tickets,
//! comments, and thread links.
//!
//! A connection is opened per operation with a short busy timeout, so the
//! store can be shared across the service handlers and the sync poller
//! without a pool. Multi-row writes go through transactions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

mod types;

#[cfg(test)]
mod tests;

pub use types::{
    Author, Client, EmailThread, HelpdeskStoreError, MailboxIntegration, Ticket, TicketComment,
    TicketPriority, TicketStatus,
};

const HELPDESK_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    domains TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_clients_tenant ON clients(tenant_id);

CREATE TABLE IF NOT EXISTS mailbox_integrations (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    email_address TEXT NOT NULL UNIQUE,
    refresh_token TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    auto_create_tickets INTEGER NOT NULL DEFAULT 1,
    auto_sync INTEGER NOT NULL DEFAULT 1,
    default_priority TEXT NOT NULL DEFAULT 'normal',
    actor_member_id TEXT,
    last_synced_at TEXT,
    last_history_id INTEGER,
    watch_expires_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tickets (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    client_id TEXT NOT NULL REFERENCES clients(id),
    subject TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    priority TEXT NOT NULL DEFAULT 'normal',
    requester_email TEXT NOT NULL,
    requester_name TEXT,
    created_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickets_tenant ON tickets(tenant_id);
CREATE INDEX IF NOT EXISTS idx_tickets_client ON tickets(client_id);

CREATE TABLE IF NOT EXISTS email_threads (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    integration_id TEXT NOT NULL REFERENCES mailbox_integrations(id) ON DELETE CASCADE,
    provider_thread_id TEXT NOT NULL,
    ticket_id TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
    subject TEXT NOT NULL,
    participants TEXT NOT NULL,
    last_message_id TEXT,
    last_message_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(tenant_id, provider_thread_id)
);

CREATE TABLE IF NOT EXISTS ticket_comments (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    ticket_id TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
    author_kind TEXT NOT NULL,
    author_id TEXT,
    body TEXT NOT NULL,
    is_internal INTEGER NOT NULL DEFAULT 0,
    is_system INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_comments_ticket ON ticket_comments(ticket_id);
"#;

#[derive(Debug, Clone)]
pub struct HelpdeskStore {
    path: PathBuf,
}

impl HelpdeskStore {
    pub fn new(path: PathBuf) -> Result<Self, HelpdeskStoreError> {
        let store = Self { path };
        let _ = store.open()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, HelpdeskStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(HELPDESK_SCHEMA)?;
        Ok(conn)
    }

    // ==================== Clients ====================

    pub fn insert_client(&self, client: &Client) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO clients (id, tenant_id, name, domains, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                client.id,
                client.tenant_id,
                client.name,
                serde_json::to_string(&client.domains)?,
                client.is_active,
                format_datetime(client.created_at),
                format_datetime(client.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_client(&self, id: &str) -> Result<Option<Client>, HelpdeskStoreError> {
        let conn = self.open()?;
        let raw = conn
            .query_row(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1"),
                params![id],
                map_client_row,
            )
            .optional()?;
        raw.map(finish_client_row).transpose()
    }

    pub fn list_clients(&self, tenant_id: &str) -> Result<Vec<Client>, HelpdeskStoreError> {
        self.query_clients(
            &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE tenant_id = ?1 ORDER BY created_at"),
            tenant_id,
        )
    }

    /// Active clients in creation order. The router resolves domain overlaps
    /// in favor of the earliest-created client, so the order matters.
    pub fn list_active_clients(&self, tenant_id: &str) -> Result<Vec<Client>, HelpdeskStoreError> {
        self.query_clients(
            &format!(
                "SELECT {CLIENT_COLUMNS} FROM clients
                 WHERE tenant_id = ?1 AND is_active = 1 ORDER BY created_at"
            ),
            tenant_id,
        )
    }

    fn query_clients(&self, sql: &str, tenant_id: &str) -> Result<Vec<Client>, HelpdeskStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![tenant_id], map_client_row)?;
        let mut clients = Vec::new();
        for row in rows {
            clients.push(finish_client_row(row?)?);
        }
        Ok(clients)
    }

    // ==================== Mailbox integrations ====================

    pub fn insert_integration(
        &self,
        integration: &MailboxIntegration,
    ) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO mailbox_integrations (id, tenant_id, email_address, refresh_token,
                                               is_active, auto_create_tickets, auto_sync,
                                               default_priority, actor_member_id,
                                               last_synced_at, last_history_id, watch_expires_at,
                                               created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                integration.id,
                integration.tenant_id,
                integration.email_address,
                integration.refresh_token,
                integration.is_active,
                integration.auto_create_tickets,
                integration.auto_sync,
                integration.default_priority.as_str(),
                integration.actor_member_id,
                integration.last_synced_at.map(format_datetime),
                integration.last_history_id.map(|value| value as i64),
                integration.watch_expires_at.map(format_datetime),
                format_datetime(integration.created_at),
                format_datetime(integration.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_integration(
        &self,
        id: &str,
    ) -> Result<Option<MailboxIntegration>, HelpdeskStoreError> {
        let conn = self.open()?;
        let raw = conn
            .query_row(
                &format!("SELECT {INTEGRATION_COLUMNS} FROM mailbox_integrations WHERE id = ?1"),
                params![id],
                map_integration_row,
            )
            .optional()?;
        raw.map(finish_integration_row).transpose()
    }

    pub fn find_integration_by_address(
        &self,
        email_address: &str,
    ) -> Result<Option<MailboxIntegration>, HelpdeskStoreError> {
        let conn = self.open()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {INTEGRATION_COLUMNS} FROM mailbox_integrations WHERE email_address = ?1"
                ),
                params![email_address],
                map_integration_row,
            )
            .optional()?;
        raw.map(finish_integration_row).transpose()
    }

    pub fn list_integrations(&self) -> Result<Vec<MailboxIntegration>, HelpdeskStoreError> {
        self.query_integrations(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM mailbox_integrations ORDER BY created_at"
        ))
    }

    pub fn list_active_integrations(&self) -> Result<Vec<MailboxIntegration>, HelpdeskStoreError> {
        self.query_integrations(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM mailbox_integrations
             WHERE is_active = 1 ORDER BY created_at"
        ))
    }

    fn query_integrations(&self, sql: &str) -> Result<Vec<MailboxIntegration>, HelpdeskStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map_integration_row)?;
        let mut integrations = Vec::new();
        for row in rows {
            integrations.push(finish_integration_row(row?)?);
        }
        Ok(integrations)
    }

    pub fn set_integration_active(
        &self,
        id: &str,
        is_active: bool,
    ) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE mailbox_integrations SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_active, format_datetime(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(HelpdeskStoreError::NotFound {
                entity: "integration",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Move the sync checkpoint forward. Never moves it back, so a slow
    /// sync finishing after a newer one cannot rewind the window.
    pub fn advance_checkpoint(
        &self,
        id: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE mailbox_integrations
             SET last_synced_at = ?1, updated_at = ?2
             WHERE id = ?3 AND (last_synced_at IS NULL OR last_synced_at < ?1)",
            params![format_datetime(synced_at), format_datetime(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Record the newest Gmail history id seen for the mailbox. Monotonic
    /// for the same reason as the checkpoint: push notifications can arrive
    /// out of order.
    pub fn record_history_cursor(
        &self,
        id: &str,
        history_id: u64,
    ) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE mailbox_integrations
             SET last_history_id = ?1, updated_at = ?2
             WHERE id = ?3 AND (last_history_id IS NULL OR last_history_id < ?1)",
            params![history_id as i64, format_datetime(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn set_watch(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE mailbox_integrations SET watch_expires_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![format_datetime(expires_at), format_datetime(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(HelpdeskStoreError::NotFound {
                entity: "integration",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn clear_watch(&self, id: &str) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE mailbox_integrations SET watch_expires_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![format_datetime(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(HelpdeskStoreError::NotFound {
                entity: "integration",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ==================== Tickets and threads ====================

    /// Insert the ticket and its thread link in one transaction. When the
    /// (tenant, provider thread) pair is already linked the whole write
    /// rolls back and DuplicateThread comes back, so the caller can re-fetch
    /// the winning link and append there instead.
    pub fn create_ticket_with_thread(
        &self,
        ticket: &Ticket,
        thread: &EmailThread,
    ) -> Result<(), HelpdeskStoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        insert_ticket_row(&tx, ticket)?;
        let inserted = tx.execute(
            "INSERT INTO email_threads (id, tenant_id, integration_id, provider_thread_id,
                                        ticket_id, subject, participants, last_message_id,
                                        last_message_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                thread.id,
                thread.tenant_id,
                thread.integration_id,
                thread.provider_thread_id,
                thread.ticket_id,
                thread.subject,
                serde_json::to_string(&thread.participants)?,
                thread.last_message_id,
                thread.last_message_at.map(format_datetime),
                format_datetime(thread.created_at),
                format_datetime(thread.updated_at),
            ],
        );
        match inserted {
            Ok(_) => {
                tx.commit()?;
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => Err(HelpdeskStoreError::DuplicateThread {
                provider_thread_id: thread.provider_thread_id.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        insert_ticket_row(&conn, ticket)?;
        Ok(())
    }

    pub fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, HelpdeskStoreError> {
        let conn = self.open()?;
        let raw = conn
            .query_row(
                &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
                params![id],
                map_ticket_row,
            )
            .optional()?;
        raw.map(finish_ticket_row).transpose()
    }

    pub fn list_tickets(&self, tenant_id: &str) -> Result<Vec<Ticket>, HelpdeskStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE tenant_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![tenant_id], map_ticket_row)?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(finish_ticket_row(row?)?);
        }
        Ok(tickets)
    }

    pub fn list_tickets_for_client(
        &self,
        tenant_id: &str,
        client_id: &str,
    ) -> Result<Vec<Ticket>, HelpdeskStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE tenant_id = ?1 AND client_id = ?2 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![tenant_id, client_id], map_ticket_row)?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(finish_ticket_row(row?)?);
        }
        Ok(tickets)
    }

    pub fn find_thread(
        &self,
        tenant_id: &str,
        provider_thread_id: &str,
    ) -> Result<Option<EmailThread>, HelpdeskStoreError> {
        let conn = self.open()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {THREAD_COLUMNS} FROM email_threads
                     WHERE tenant_id = ?1 AND provider_thread_id = ?2"
                ),
                params![tenant_id, provider_thread_id],
                map_thread_row,
            )
            .optional()?;
        raw.map(finish_thread_row).transpose()
    }

    /// Record the latest message seen on a linked conversation.
    pub fn touch_thread(
        &self,
        id: &str,
        last_message_id: &str,
        last_message_at: DateTime<Utc>,
        participants: &[String],
    ) -> Result<(), HelpdeskStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE email_threads
             SET last_message_id = ?1, last_message_at = ?2, participants = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                last_message_id,
                format_datetime(last_message_at),
                serde_json::to_string(participants)?,
                format_datetime(Utc::now()),
                id
            ],
        )?;
        if changed == 0 {
            return Err(HelpdeskStoreError::NotFound {
                entity: "thread",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ==================== Comments ====================

    /// Append a comment and bump the parent ticket's updated_at together.
    pub fn append_comment(&self, comment: &TicketComment) -> Result<(), HelpdeskStoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let bumped = tx.execute(
            "UPDATE tickets SET updated_at = ?1 WHERE id = ?2",
            params![format_datetime(comment.created_at), comment.ticket_id],
        )?;
        if bumped == 0 {
            return Err(HelpdeskStoreError::NotFound {
                entity: "ticket",
                id: comment.ticket_id.clone(),
            });
        }
        tx.execute(
            "INSERT INTO ticket_comments (id, tenant_id, ticket_id, author_kind, author_id,
                                          body, is_internal, is_system, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                comment.id,
                comment.tenant_id,
                comment.ticket_id,
                comment.author.kind_label(),
                comment.author.actor_id(),
                comment.body,
                comment.is_internal,
                comment.is_system,
                format_datetime(comment.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_comments(
        &self,
        ticket_id: &str,
        include_internal: bool,
    ) -> Result<Vec<TicketComment>, HelpdeskStoreError> {
        let conn = self.open()?;
        let sql = if include_internal {
            format!(
                "SELECT {COMMENT_COLUMNS} FROM ticket_comments
                 WHERE ticket_id = ?1 ORDER BY created_at"
            )
        } else {
            format!(
                "SELECT {COMMENT_COLUMNS} FROM ticket_comments
                 WHERE ticket_id = ?1 AND is_internal = 0 ORDER BY created_at"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![ticket_id], map_comment_row)?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(finish_comment_row(row?)?);
        }
        Ok(comments)
    }
}

fn insert_ticket_row(conn: &Connection, ticket: &Ticket) -> Result<(), HelpdeskStoreError> {
    conn.execute(
        "INSERT INTO tickets (id, tenant_id, client_id, subject, description, status, priority,
                              requester_email, requester_name, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            ticket.id,
            ticket.tenant_id,
            ticket.client_id,
            ticket.subject,
            ticket.description,
            ticket.status.as_str(),
            ticket.priority.as_str(),
            ticket.requester_email,
            ticket.requester_name,
            ticket.created_by,
            format_datetime(ticket.created_at),
            format_datetime(ticket.updated_at),
        ],
    )?;
    Ok(())
}

const CLIENT_COLUMNS: &str = "id, tenant_id, name, domains, is_active, created_at, updated_at";

const INTEGRATION_COLUMNS: &str = "id, tenant_id, email_address, refresh_token, is_active, \
                                   auto_create_tickets, auto_sync, default_priority, \
                                   actor_member_id, last_synced_at, last_history_id, \
                                   watch_expires_at, created_at, updated_at";

const TICKET_COLUMNS: &str = "id, tenant_id, client_id, subject, description, status, priority, \
                              requester_email, requester_name, created_by, created_at, updated_at";

const THREAD_COLUMNS: &str = "id, tenant_id, integration_id, provider_thread_id, ticket_id, \
                              subject, participants, last_message_id, last_message_at, \
                              created_at, updated_at";

const COMMENT_COLUMNS: &str =
    "id, tenant_id, ticket_id, author_kind, author_id, body, is_internal, is_system, created_at";

type RawClientRow = (String, String, String, String, bool, String, String);

fn map_client_row(row: &Row<'_>) -> rusqlite::Result<RawClientRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn finish_client_row(raw: RawClientRow) -> Result<Client, HelpdeskStoreError> {
    let (id, tenant_id, name, domains, is_active, created_at, updated_at) = raw;
    Ok(Client {
        id,
        tenant_id,
        name,
        domains: serde_json::from_str(&domains)?,
        is_active,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

type RawIntegrationRow = (
    String,
    String,
    String,
    String,
    bool,
    bool,
    bool,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    Option<String>,
    String,
    String,
);

fn map_integration_row(row: &Row<'_>) -> rusqlite::Result<RawIntegrationRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

fn finish_integration_row(raw: RawIntegrationRow) -> Result<MailboxIntegration, HelpdeskStoreError> {
    let (
        id,
        tenant_id,
        email_address,
        refresh_token,
        is_active,
        auto_create_tickets,
        auto_sync,
        default_priority,
        actor_member_id,
        last_synced_at,
        last_history_id,
        watch_expires_at,
        created_at,
        updated_at,
    ) = raw;
    Ok(MailboxIntegration {
        id,
        tenant_id,
        email_address,
        refresh_token,
        is_active,
        auto_create_tickets,
        auto_sync,
        default_priority: default_priority.parse().unwrap_or_default(),
        actor_member_id,
        last_synced_at: parse_optional_datetime(last_synced_at)?,
        last_history_id: last_history_id.map(|value| value as u64),
        watch_expires_at: parse_optional_datetime(watch_expires_at)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

type RawTicketRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn map_ticket_row(row: &Row<'_>) -> rusqlite::Result<RawTicketRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn finish_ticket_row(raw: RawTicketRow) -> Result<Ticket, HelpdeskStoreError> {
    let (
        id,
        tenant_id,
        client_id,
        subject,
        description,
        status,
        priority,
        requester_email,
        requester_name,
        created_by,
        created_at,
        updated_at,
    ) = raw;
    Ok(Ticket {
        id,
        tenant_id,
        client_id,
        subject,
        description,
        status: status.parse().unwrap_or_default(),
        priority: priority.parse().unwrap_or_default(),
        requester_email,
        requester_name,
        created_by,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

type RawThreadRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn map_thread_row(row: &Row<'_>) -> rusqlite::Result<RawThreadRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn finish_thread_row(raw: RawThreadRow) -> Result<EmailThread, HelpdeskStoreError> {
    let (
        id,
        tenant_id,
        integration_id,
        provider_thread_id,
        ticket_id,
        subject,
        participants,
        last_message_id,
        last_message_at,
        created_at,
        updated_at,
    ) = raw;
    Ok(EmailThread {
        id,
        tenant_id,
        integration_id,
        provider_thread_id,
        ticket_id,
        subject,
        participants: serde_json::from_str(&participants)?,
        last_message_id,
        last_message_at: parse_optional_datetime(last_message_at)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

type RawCommentRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    bool,
    bool,
    String,
);

fn map_comment_row(row: &Row<'_>) -> rusqlite::Result<RawCommentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn finish_comment_row(raw: RawCommentRow) -> Result<TicketComment, HelpdeskStoreError> {
    let (id, tenant_id, ticket_id, author_kind, author_id, body, is_internal, is_system, created_at) =
        raw;
    Ok(TicketComment {
        id,
        tenant_id,
        ticket_id,
        author: Author::from_columns(&author_kind, author_id)?,
        body,
        is_internal,
        is_system,
        created_at: parse_datetime(&created_at)?,
    })
}

// Primary key and foreign key failures share the constraint primary code;
// only a UNIQUE index hit may take the conflict path.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_optional_datetime(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    value.as_deref().map(parse_datetime).transpose()
}
