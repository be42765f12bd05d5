//! Thread-to-ticket resolution.
//!
//! The lookup is check-only. Linking happens later, atomically with ticket
//! creation, so two writers racing on the same conversation are settled by
//! the store's unique constraint rather than by this read.

use crate::store::{EmailThread, HelpdeskStore, HelpdeskStoreError};

#[derive(Debug)]
pub enum ThreadDecision {
    /// Conversation already linked; replies append to its ticket.
    Existing(EmailThread),
    /// First sighting; the pipeline may open a ticket for it.
    New,
}

pub fn resolve_thread(
    store: &HelpdeskStore,
    tenant_id: &str,
    provider_thread_id: &str,
) -> Result<ThreadDecision, HelpdeskStoreError> {
    match store.find_thread(tenant_id, provider_thread_id)? {
        Some(thread) => Ok(ThreadDecision::Existing(thread)),
        None => Ok(ThreadDecision::New),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Client, EmailThread, MailboxIntegration, Ticket, TicketPriority, TicketStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn seeded_store() -> (TempDir, HelpdeskStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = HelpdeskStore::new(dir.path().join("helpdesk.db")).expect("store");
        let now = Utc::now();
        for tenant in ["tenant-1", "tenant-2"] {
            store
                .insert_client(&Client {
                    id: format!("client-{tenant}"),
                    tenant_id: tenant.to_string(),
                    name: "Acme".to_string(),
                    domains: vec!["acme.com".to_string()],
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                })
                .expect("client");
            store
                .insert_integration(&MailboxIntegration {
                    id: format!("int-{tenant}"),
                    tenant_id: tenant.to_string(),
                    email_address: format!("{tenant}@helpdeck.io"),
                    refresh_token: "refresh".to_string(),
                    is_active: true,
                    auto_create_tickets: true,
                    auto_sync: true,
                    default_priority: TicketPriority::Normal,
                    actor_member_id: None,
                    last_synced_at: None,
                    last_history_id: None,
                    watch_expires_at: None,
                    created_at: now,
                    updated_at: now,
                })
                .expect("integration");
        }
        (dir, store)
    }

    #[test]
    fn unknown_thread_is_new() {
        let (_dir, store) = seeded_store();
        assert!(matches!(
            resolve_thread(&store, "tenant-1", "gmail-thread-1").expect("resolve"),
            ThreadDecision::New
        ));
    }

    #[test]
    fn linked_thread_resolves_to_its_ticket() {
        let (_dir, store) = seeded_store();
        let now = Utc::now();
        let ticket = Ticket {
            id: "ticket-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            client_id: "client-tenant-1".to_string(),
            subject: "Help".to_string(),
            description: "body".to_string(),
            status: TicketStatus::Open,
            priority: TicketPriority::Normal,
            requester_email: "jane@acme.com".to_string(),
            requester_name: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        let thread = EmailThread {
            id: "thread-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            integration_id: "int-tenant-1".to_string(),
            provider_thread_id: "gmail-thread-1".to_string(),
            ticket_id: "ticket-1".to_string(),
            subject: "Help".to_string(),
            participants: vec!["jane@acme.com".to_string()],
            last_message_id: Some("msg-1".to_string()),
            last_message_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        store
            .create_ticket_with_thread(&ticket, &thread)
            .expect("create");

        match resolve_thread(&store, "tenant-1", "gmail-thread-1").expect("resolve") {
            ThreadDecision::Existing(found) => assert_eq!(found.ticket_id, "ticket-1"),
            ThreadDecision::New => panic!("expected the linked thread"),
        }

        // Same provider id under a different tenant is a different conversation.
        assert!(matches!(
            resolve_thread(&store, "tenant-2", "gmail-thread-1").expect("resolve"),
            ThreadDecision::New
        ));
    }
}
