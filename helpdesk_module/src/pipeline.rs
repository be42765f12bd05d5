//! Mailbox-to-ticket ingestion.
//!
//! One sync run lists unread mail inside the checkpoint window, fetches
//! each message, and walks a small per-message state machine: route the
//! sender to a client, then either open a ticket for a new conversation
//! or append a comment to the ticket an existing thread already owns.
//! Message failures are isolated so one bad payload never stalls the
//! mailbox.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint;
use crate::extractor;
use crate::gmail::types::{GmailMessage, WatchRequest, WatchResponse};
use crate::gmail::{GmailApiError, GmailClient};
use crate::google_auth::{GoogleAuth, GoogleAuthError};
use crate::routing::{self, DomainRoutingTable};
use crate::store::{
    Author, EmailThread, HelpdeskStore, HelpdeskStoreError, MailboxIntegration, Ticket,
    TicketComment, TicketStatus,
};
use crate::threads::{self, ThreadDecision};

// ==================== Settings ====================

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Upper bound on message stubs pulled per run.
    pub page_size: u32,
    /// Pub/Sub topic for watch registration, when push is configured.
    pub push_topic: Option<String>,
    /// Labels a registered watch is scoped to.
    pub watch_labels: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            push_topic: None,
            watch_labels: vec!["INBOX".to_string()],
        }
    }
}

// ==================== Errors ====================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("integration {0} not found")]
    IntegrationNotFound(String),
    #[error("integration {0} is inactive")]
    IntegrationInactive(String),
    #[error("push notifications require a Pub/Sub topic")]
    PushTopicMissing,
    #[error("auth error: {0}")]
    Auth(#[from] GoogleAuthError),
    #[error("gmail error: {0}")]
    Provider(#[from] GmailApiError),
    #[error("store error: {0}")]
    Store(#[from] HelpdeskStoreError),
}

// ==================== Reports ====================

/// Counters for one sync run. `messages_processed` covers every message
/// whose state machine ran to completion, including drops and skips;
/// `failed` covers fetch and processing errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub messages_processed: u64,
    pub tickets_created: u64,
    pub comments_appended: u64,
    pub dropped: u64,
    pub skipped_empty: u64,
    pub failed: u64,
}

enum MessageOutcome {
    TicketCreated,
    CommentAppended,
    Dropped,
    SkippedEmpty,
}

// ==================== Engine ====================

pub struct SyncEngine {
    store: Arc<HelpdeskStore>,
    gmail: GmailClient,
    auth: GoogleAuth,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        store: Arc<HelpdeskStore>,
        gmail: GmailClient,
        auth: GoogleAuth,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            gmail,
            auth,
            settings,
        }
    }

    pub fn store(&self) -> &HelpdeskStore {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one sync for the given integration id.
    pub async fn sync_mailbox(&self, integration_id: &str) -> Result<SyncReport, SyncError> {
        let integration = self.require_active(integration_id)?;
        self.sync_integration(&integration).await
    }

    pub async fn sync_integration(
        &self,
        integration: &MailboxIntegration,
    ) -> Result<SyncReport, SyncError> {
        // Captured before listing so mail arriving mid-run stays inside
        // the next window.
        let started_at = Utc::now();
        let access_token = self
            .auth
            .access_token_for(&integration.id, &integration.refresh_token)
            .await?;

        let window_start = checkpoint::window_start(integration, started_at);
        let query = checkpoint::unread_query(window_start);
        debug!(
            "syncing {} with query {:?}",
            integration.email_address, query
        );

        let listed = self
            .gmail
            .list_messages(
                &access_token,
                &integration.email_address,
                &query,
                self.settings.page_size,
            )
            .await?;

        let mut report = SyncReport::default();
        let mut messages: Vec<GmailMessage> = Vec::with_capacity(listed.messages.len());
        for stub in &listed.messages {
            match self
                .gmail
                .get_message(&access_token, &integration.email_address, &stub.id)
                .await
            {
                Ok(message) => messages.push(message),
                Err(err) => {
                    warn!(
                        "fetching message {} from {} failed: {}",
                        stub.id, integration.email_address, err
                    );
                    report.failed += 1;
                }
            }
        }

        // Oldest first, so a conversation's opening message creates the
        // ticket and the rest land as comments.
        messages.sort_by_key(|message| message.internal_timestamp());

        let routing_table =
            DomainRoutingTable::build(&self.store.list_active_clients(&integration.tenant_id)?);
        if !messages.is_empty() && routing_table.is_empty() {
            warn!(
                "tenant {} has no routable client domains",
                integration.tenant_id
            );
        }

        let mut newest_history_id: Option<u64> = None;
        for message in &messages {
            if let Some(history_id) = message.history_id_value() {
                newest_history_id = newest_history_id.max(Some(history_id));
            }
            match self.process_message(integration, &routing_table, message) {
                Ok(outcome) => {
                    report.messages_processed += 1;
                    match outcome {
                        MessageOutcome::TicketCreated => report.tickets_created += 1,
                        MessageOutcome::CommentAppended => report.comments_appended += 1,
                        MessageOutcome::Dropped => report.dropped += 1,
                        MessageOutcome::SkippedEmpty => report.skipped_empty += 1,
                    }
                }
                Err(err) => {
                    error!(
                        "processing message {} for {} failed: {}",
                        message.id, integration.email_address, err
                    );
                    report.failed += 1;
                }
            }
        }

        if let Some(history_id) = newest_history_id {
            self.store
                .record_history_cursor(&integration.id, history_id)?;
        }
        // The checkpoint advances even when individual messages failed;
        // the next window opens at this run's capture time, so failures
        // are counted and logged but not retried.
        checkpoint::advance(&self.store, &integration.id, started_at)?;

        info!(
            "synced {}: {} processed ({} tickets, {} comments, {} dropped, {} empty), {} failed",
            integration.email_address,
            report.messages_processed,
            report.tickets_created,
            report.comments_appended,
            report.dropped,
            report.skipped_empty,
            report.failed
        );
        Ok(report)
    }

    fn process_message(
        &self,
        integration: &MailboxIntegration,
        routing_table: &DomainRoutingTable,
        message: &GmailMessage,
    ) -> Result<MessageOutcome, SyncError> {
        let from_header = message.header("From").unwrap_or_default();
        let Some(sender) = routing::sender_address(from_header) else {
            debug!("message {} has no parsable sender, dropping", message.id);
            return Ok(MessageOutcome::Dropped);
        };
        let Some(client_id) = routing_table.resolve(&sender) else {
            debug!(
                "no client domain matches {}, dropping message {}",
                sender, message.id
            );
            return Ok(MessageOutcome::Dropped);
        };
        let client_id = client_id.to_string();

        match threads::resolve_thread(&self.store, &integration.tenant_id, &message.thread_id)? {
            ThreadDecision::Existing(thread) => self.append_reply(&thread, &sender, message),
            ThreadDecision::New => self.open_ticket(integration, &client_id, &sender, message),
        }
    }

    /// Record a reply on the ticket its thread is linked to.
    fn append_reply(
        &self,
        thread: &EmailThread,
        sender: &str,
        message: &GmailMessage,
    ) -> Result<MessageOutcome, SyncError> {
        let Some(body) = extractor::extract_message_text(message) else {
            debug!(
                "message {} in thread {} has no text body, skipping",
                message.id, thread.id
            );
            return Ok(MessageOutcome::SkippedEmpty);
        };
        let received_at = message.received_at().unwrap_or_else(Utc::now);
        let comment = TicketComment {
            id: Uuid::new_v4().to_string(),
            tenant_id: thread.tenant_id.clone(),
            ticket_id: thread.ticket_id.clone(),
            author: Author::System,
            body: reply_note(sender, received_at, &body),
            is_internal: false,
            is_system: true,
            created_at: received_at,
        };
        self.store.append_comment(&comment)?;

        let mut participants = thread.participants.clone();
        let normalized = routing::normalize_address(sender);
        if !participants.iter().any(|existing| existing == &normalized) {
            participants.push(normalized);
        }
        self.store
            .touch_thread(&thread.id, &message.id, received_at, &participants)?;
        debug!(
            "appended comment {} to ticket {} from thread {}",
            comment.id, thread.ticket_id, thread.provider_thread_id
        );
        Ok(MessageOutcome::CommentAppended)
    }

    /// Open a ticket for a conversation seen for the first time.
    fn open_ticket(
        &self,
        integration: &MailboxIntegration,
        client_id: &str,
        sender: &str,
        message: &GmailMessage,
    ) -> Result<MessageOutcome, SyncError> {
        if !integration.auto_create_tickets {
            debug!(
                "auto ticket creation is off for {}, dropping message {}",
                integration.email_address, message.id
            );
            return Ok(MessageOutcome::Dropped);
        }

        let subject = message
            .header("Subject")
            .map(str::trim)
            .filter(|subject| !subject.is_empty())
            .unwrap_or("(no subject)")
            .to_string();
        let body = extractor::extract_message_text(message).unwrap_or_default();
        let received_at = message.received_at().unwrap_or_else(Utc::now);
        let requester_name = message.header("From").and_then(routing::sender_display_name);

        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4().to_string(),
            tenant_id: integration.tenant_id.clone(),
            client_id: client_id.to_string(),
            subject: subject.clone(),
            description: compose_description(sender, &subject, &body),
            status: TicketStatus::Open,
            priority: integration.default_priority,
            requester_email: routing::normalize_address(sender),
            requester_name,
            created_by: integration.actor_member_id.clone(),
            created_at: received_at,
            updated_at: received_at,
        };
        let thread = EmailThread {
            id: Uuid::new_v4().to_string(),
            tenant_id: integration.tenant_id.clone(),
            integration_id: integration.id.clone(),
            provider_thread_id: message.thread_id.clone(),
            ticket_id: ticket.id.clone(),
            subject,
            participants: vec![routing::normalize_address(sender)],
            last_message_id: Some(message.id.clone()),
            last_message_at: Some(received_at),
            created_at: now,
            updated_at: now,
        };

        match self.store.create_ticket_with_thread(&ticket, &thread) {
            Ok(()) => {
                info!(
                    "created ticket {} from thread {} for client {}",
                    ticket.id, thread.provider_thread_id, client_id
                );
                Ok(MessageOutcome::TicketCreated)
            }
            Err(HelpdeskStoreError::DuplicateThread { .. }) => {
                // Lost the insert race; another writer linked the
                // conversation first. Fall back to the reply path.
                let Some(winner) = self
                    .store
                    .find_thread(&integration.tenant_id, &message.thread_id)?
                else {
                    return Err(SyncError::Store(HelpdeskStoreError::Storage(format!(
                        "thread {} vanished after a duplicate link",
                        message.thread_id
                    ))));
                };
                warn!(
                    "thread {} already linked to ticket {}, appending instead",
                    message.thread_id, winner.ticket_id
                );
                self.append_reply(&winner, sender, message)
            }
            Err(err) => Err(err.into()),
        }
    }

    // ==================== Push notifications ====================

    /// Register (or renew) the Gmail watch for a mailbox.
    pub async fn setup_push_notifications(
        &self,
        integration_id: &str,
    ) -> Result<WatchResponse, SyncError> {
        let integration = self.require_active(integration_id)?;
        let topic = self
            .settings
            .push_topic
            .clone()
            .ok_or(SyncError::PushTopicMissing)?;
        let access_token = self
            .auth
            .access_token_for(&integration.id, &integration.refresh_token)
            .await?;

        let request = WatchRequest {
            topic_name: topic,
            label_ids: self.settings.watch_labels.clone(),
            label_filter_behavior: None,
        };
        let response = self
            .gmail
            .watch(&access_token, &integration.email_address, &request)
            .await?;

        if let Some(expires_at) = response.expires_at() {
            self.store.set_watch(&integration.id, expires_at)?;
        }
        if let Some(history_id) = response.history_id_value() {
            self.store
                .record_history_cursor(&integration.id, history_id)?;
        }
        info!(
            "watch registered for {} until {:?}",
            integration.email_address,
            response.expires_at()
        );
        Ok(response)
    }

    /// Tear down the Gmail watch and forget its expiry.
    pub async fn stop_push_notifications(&self, integration_id: &str) -> Result<(), SyncError> {
        let integration = self
            .store
            .get_integration(integration_id)?
            .ok_or_else(|| SyncError::IntegrationNotFound(integration_id.to_string()))?;
        let access_token = self
            .auth
            .access_token_for(&integration.id, &integration.refresh_token)
            .await?;
        self.gmail
            .stop_watch(&access_token, &integration.email_address)
            .await?;
        self.store.clear_watch(&integration.id)?;
        info!("watch stopped for {}", integration.email_address);
        Ok(())
    }

    /// React to a push notification. With an address, sync that mailbox;
    /// without one, sync every active mailbox.
    pub async fn handle_notification(
        &self,
        email_address: Option<&str>,
        history_id: Option<u64>,
    ) -> Result<Vec<(String, Result<SyncReport, SyncError>)>, SyncError> {
        let targets = match email_address {
            Some(address) => {
                let Some(integration) = self.store.find_integration_by_address(address)? else {
                    warn!("notification for unknown mailbox {}", address);
                    return Ok(Vec::new());
                };
                vec![integration]
            }
            None => self.store.list_active_integrations()?,
        };

        let mut results = Vec::with_capacity(targets.len());
        for integration in targets {
            if !integration.is_active {
                debug!(
                    "mailbox {} is inactive, ignoring notification",
                    integration.email_address
                );
                continue;
            }
            if let Some(history_id) = history_id {
                self.store
                    .record_history_cursor(&integration.id, history_id)?;
            }
            let outcome = self.sync_integration(&integration).await;
            results.push((integration.id.clone(), outcome));
        }
        Ok(results)
    }

    fn require_active(&self, integration_id: &str) -> Result<MailboxIntegration, SyncError> {
        let integration = self
            .store
            .get_integration(integration_id)?
            .ok_or_else(|| SyncError::IntegrationNotFound(integration_id.to_string()))?;
        if !integration.is_active {
            return Err(SyncError::IntegrationInactive(integration_id.to_string()));
        }
        Ok(integration)
    }
}

fn reply_note(sender: &str, received_at: DateTime<Utc>, body: &str) -> String {
    format!(
        "Email reply from {} on {}\n\n{}",
        sender,
        received_at.to_rfc3339(),
        body
    )
}

fn compose_description(sender: &str, subject: &str, body: &str) -> String {
    format!("From: {sender}\nSubject: {subject}\n\n{body}")
}
