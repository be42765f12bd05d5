use chrono::{Duration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use super::*;

fn open_store() -> (TempDir, HelpdeskStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = HelpdeskStore::new(dir.path().join("helpdesk.db")).expect("store");
    (dir, store)
}

fn sample_client(id: &str, tenant_id: &str, domains: &[&str]) -> Client {
    let now = Utc::now();
    Client {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        name: format!("client {id}"),
        domains: domains.iter().map(|domain| domain.to_string()).collect(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn sample_integration(id: &str, email_address: &str) -> MailboxIntegration {
    let now = Utc::now();
    MailboxIntegration {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        email_address: email_address.to_string(),
        refresh_token: "refresh-token".to_string(),
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
    }
}

fn sample_ticket(id: &str, client_id: &str) -> Ticket {
    let now = Utc::now();
    Ticket {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        client_id: client_id.to_string(),
        subject: "Printer on fire".to_string(),
        description: "From: jane@acme.com\nSubject: Printer on fire\n\nHelp".to_string(),
        status: TicketStatus::Open,
        priority: TicketPriority::Normal,
        requester_email: "jane@acme.com".to_string(),
        requester_name: Some("Jane".to_string()),
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn sample_thread(id: &str, integration_id: &str, ticket_id: &str, provider: &str) -> EmailThread {
    let now = Utc::now();
    EmailThread {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        integration_id: integration_id.to_string(),
        provider_thread_id: provider.to_string(),
        ticket_id: ticket_id.to_string(),
        subject: "Printer on fire".to_string(),
        participants: vec!["jane@acme.com".to_string()],
        last_message_id: None,
        last_message_at: Some(now),
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn client_round_trip_and_active_filter() {
    let (_dir, store) = open_store();
    let mut first = sample_client("client-1", "tenant-1", &["acme.com", "acme.io"]);
    first.created_at = Utc::now() - Duration::minutes(10);
    let mut second = sample_client("client-2", "tenant-1", &["globex.com"]);
    second.is_active = false;
    store.insert_client(&first).expect("insert first");
    store.insert_client(&second).expect("insert second");
    store
        .insert_client(&sample_client("client-3", "tenant-2", &["other.net"]))
        .expect("insert other tenant");

    let loaded = store.get_client("client-1").expect("get").expect("found");
    assert_eq!(loaded.domains, vec!["acme.com", "acme.io"]);

    let all = store.list_clients("tenant-1").expect("list");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, "client-1");

    let active = store.list_active_clients("tenant-1").expect("list active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "client-1");
}

#[test]
fn integration_lookup_by_address() {
    let (_dir, store) = open_store();
    store
        .insert_integration(&sample_integration("int-1", "support@acme.com"))
        .expect("insert");

    let found = store
        .find_integration_by_address("support@acme.com")
        .expect("find")
        .expect("present");
    assert_eq!(found.id, "int-1");
    assert!(found.auto_create_tickets);

    assert!(store
        .find_integration_by_address("nobody@acme.com")
        .expect("find missing")
        .is_none());
}

#[test]
fn advance_checkpoint_never_rewinds() {
    let (_dir, store) = open_store();
    store
        .insert_integration(&sample_integration("int-1", "support@acme.com"))
        .expect("insert");

    let newer = Utc::now();
    let older = newer - Duration::minutes(30);

    store.advance_checkpoint("int-1", newer).expect("advance");
    store.advance_checkpoint("int-1", older).expect("stale advance");

    let loaded = store.get_integration("int-1").expect("get").expect("found");
    assert_eq!(loaded.last_synced_at, Some(newer));
}

#[test]
fn history_cursor_keeps_the_newest_id() {
    let (_dir, store) = open_store();
    store
        .insert_integration(&sample_integration("int-1", "support@acme.com"))
        .expect("insert");

    store.record_history_cursor("int-1", 4200).expect("record");
    store.record_history_cursor("int-1", 1000).expect("stale record");

    let loaded = store.get_integration("int-1").expect("get").expect("found");
    assert_eq!(loaded.last_history_id, Some(4200));
}

#[test]
fn watch_expiry_set_and_clear() {
    let (_dir, store) = open_store();
    store
        .insert_integration(&sample_integration("int-1", "support@acme.com"))
        .expect("insert");

    let expires = Utc::now() + Duration::days(7);
    store.set_watch("int-1", expires).expect("set watch");
    let loaded = store.get_integration("int-1").expect("get").expect("found");
    assert_eq!(loaded.watch_expires_at, Some(expires));

    store.clear_watch("int-1").expect("clear watch");
    let loaded = store.get_integration("int-1").expect("get").expect("found");
    assert!(loaded.watch_expires_at.is_none());

    assert!(matches!(
        store.set_watch("missing", expires),
        Err(HelpdeskStoreError::NotFound { .. })
    ));
}

#[test]
fn ticket_and_thread_insert_atomically() {
    let (_dir, store) = open_store();
    store
        .insert_client(&sample_client("client-1", "tenant-1", &["acme.com"]))
        .expect("client");
    store
        .insert_integration(&sample_integration("int-1", "support@acme.com"))
        .expect("integration");

    let ticket = sample_ticket("ticket-1", "client-1");
    let thread = sample_thread("thread-1", "int-1", "ticket-1", "gmail-thread-1");
    store
        .create_ticket_with_thread(&ticket, &thread)
        .expect("create");

    let found = store
        .find_thread("tenant-1", "gmail-thread-1")
        .expect("find")
        .expect("present");
    assert_eq!(found.ticket_id, "ticket-1");

    // A second writer racing on the same conversation loses the unique
    // constraint and nothing of its write survives.
    let loser_ticket = sample_ticket("ticket-2", "client-1");
    let loser_thread = sample_thread("thread-2", "int-1", "ticket-2", "gmail-thread-1");
    let err = store
        .create_ticket_with_thread(&loser_ticket, &loser_thread)
        .expect_err("duplicate link");
    assert!(matches!(err, HelpdeskStoreError::DuplicateThread { .. }));
    assert!(store.get_ticket("ticket-2").expect("get loser").is_none());

    let winner = store
        .find_thread("tenant-1", "gmail-thread-1")
        .expect("find")
        .expect("present");
    assert_eq!(winner.ticket_id, "ticket-1");
}

#[test]
fn conflict_error_is_reserved_for_duplicate_links() {
    let (_dir, store) = open_store();
    store
        .insert_client(&sample_client("client-1", "tenant-1", &["acme.com"]))
        .expect("client");
    store
        .insert_integration(&sample_integration("int-1", "support@acme.com"))
        .expect("integration");
    store
        .create_ticket_with_thread(
            &sample_ticket("ticket-1", "client-1"),
            &sample_thread("thread-1", "int-1", "ticket-1", "gmail-thread-1"),
        )
        .expect("create");

    // Re-using a thread row id trips the primary key, not the
    // (tenant, provider thread) link; that must not read as a conflict.
    let ticket = sample_ticket("ticket-2", "client-1");
    let colliding = sample_thread("thread-1", "int-1", "ticket-2", "gmail-thread-2");
    let err = store
        .create_ticket_with_thread(&ticket, &colliding)
        .expect_err("pk collision");
    assert!(matches!(err, HelpdeskStoreError::Sqlite(_)));
    assert!(store.get_ticket("ticket-2").expect("get").is_none());
    assert!(store
        .find_thread("tenant-1", "gmail-thread-2")
        .expect("find")
        .is_none());
}

#[test]
fn touch_thread_updates_activity_and_participants() {
    let (_dir, store) = open_store();
    store
        .insert_client(&sample_client("client-1", "tenant-1", &["acme.com"]))
        .expect("client");
    store
        .insert_integration(&sample_integration("int-1", "support@acme.com"))
        .expect("integration");
    let ticket = sample_ticket("ticket-1", "client-1");
    let thread = sample_thread("thread-1", "int-1", "ticket-1", "gmail-thread-1");
    store
        .create_ticket_with_thread(&ticket, &thread)
        .expect("create");

    let later = Utc::now() + Duration::minutes(3);
    let participants = vec!["jane@acme.com".to_string(), "bob@acme.com".to_string()];
    store
        .touch_thread("thread-1", "gmail-msg-9", later, &participants)
        .expect("touch");

    let loaded = store
        .find_thread("tenant-1", "gmail-thread-1")
        .expect("find")
        .expect("present");
    assert_eq!(loaded.last_message_id.as_deref(), Some("gmail-msg-9"));
    assert_eq!(loaded.last_message_at, Some(later));
    assert_eq!(loaded.participants, participants);

    assert!(matches!(
        store.touch_thread("missing", "gmail-msg-10", later, &participants),
        Err(HelpdeskStoreError::NotFound { .. })
    ));
}

#[test]
fn comments_round_trip_all_author_kinds() {
    let (_dir, store) = open_store();
    store
        .insert_client(&sample_client("client-1", "tenant-1", &["acme.com"]))
        .expect("client");
    let ticket = sample_ticket("ticket-1", "client-1");
    store.insert_ticket(&ticket).expect("ticket");

    let authors = [
        Author::Staff {
            member_id: "member-1".to_string(),
        },
        Author::Customer {
            portal_access_id: "portal-1".to_string(),
        },
        Author::System,
    ];
    for (index, author) in authors.iter().enumerate() {
        store
            .append_comment(&TicketComment {
                id: Uuid::new_v4().to_string(),
                tenant_id: "tenant-1".to_string(),
                ticket_id: "ticket-1".to_string(),
                author: author.clone(),
                body: format!("comment {index}"),
                is_internal: false,
                is_system: matches!(author, Author::System),
                created_at: Utc::now() + Duration::seconds(index as i64),
            })
            .expect("append");
    }

    let comments = store.list_comments("ticket-1", true).expect("list");
    assert_eq!(comments.len(), 3);
    assert_eq!(comments[0].author, authors[0]);
    assert_eq!(comments[1].author, authors[1]);
    assert_eq!(comments[2].author, authors[2]);
    assert!(!comments[0].is_system);
    assert!(comments[2].is_system);
}

#[test]
fn internal_comments_are_filtered_for_customers() {
    let (_dir, store) = open_store();
    store
        .insert_client(&sample_client("client-1", "tenant-1", &["acme.com"]))
        .expect("client");
    store.insert_ticket(&sample_ticket("ticket-1", "client-1")).expect("ticket");

    store
        .append_comment(&TicketComment {
            id: "comment-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            ticket_id: "ticket-1".to_string(),
            author: Author::Staff {
                member_id: "member-1".to_string(),
            },
            body: "internal note".to_string(),
            is_internal: true,
            is_system: false,
            created_at: Utc::now(),
        })
        .expect("append internal");
    store
        .append_comment(&TicketComment {
            id: "comment-2".to_string(),
            tenant_id: "tenant-1".to_string(),
            ticket_id: "ticket-1".to_string(),
            author: Author::System,
            body: "public reply".to_string(),
            is_internal: false,
            is_system: true,
            created_at: Utc::now() + Duration::seconds(1),
        })
        .expect("append public");

    let visible = store.list_comments("ticket-1", false).expect("list");
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, "comment-2");

    let all = store.list_comments("ticket-1", true).expect("list all");
    assert_eq!(all.len(), 2);
}

#[test]
fn append_comment_requires_an_existing_ticket() {
    let (_dir, store) = open_store();
    let err = store
        .append_comment(&TicketComment {
            id: "comment-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            ticket_id: "no-such-ticket".to_string(),
            author: Author::System,
            body: "orphan".to_string(),
            is_internal: false,
            is_system: true,
            created_at: Utc::now(),
        })
        .expect_err("missing ticket");
    assert!(matches!(err, HelpdeskStoreError::NotFound { entity: "ticket", .. }));
}

#[test]
fn comment_bumps_ticket_updated_at() {
    let (_dir, store) = open_store();
    store
        .insert_client(&sample_client("client-1", "tenant-1", &["acme.com"]))
        .expect("client");
    let mut ticket = sample_ticket("ticket-1", "client-1");
    ticket.created_at = Utc::now() - Duration::hours(2);
    ticket.updated_at = ticket.created_at;
    store.insert_ticket(&ticket).expect("ticket");

    let commented_at = Utc::now();
    store
        .append_comment(&TicketComment {
            id: "comment-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            ticket_id: "ticket-1".to_string(),
            author: Author::System,
            body: "reply".to_string(),
            is_internal: false,
            is_system: true,
            created_at: commented_at,
        })
        .expect("append");

    let loaded = store.get_ticket("ticket-1").expect("get").expect("found");
    assert_eq!(loaded.updated_at, commented_at);
}

#[test]
fn ticket_listings_scope_by_tenant_and_client() {
    let (_dir, store) = open_store();
    store
        .insert_client(&sample_client("client-1", "tenant-1", &["acme.com"]))
        .expect("client 1");
    store
        .insert_client(&sample_client("client-2", "tenant-1", &["globex.com"]))
        .expect("client 2");

    let mut a = sample_ticket("ticket-a", "client-1");
    a.created_at = Utc::now() - Duration::minutes(2);
    let b = sample_ticket("ticket-b", "client-2");
    store.insert_ticket(&a).expect("a");
    store.insert_ticket(&b).expect("b");

    let tenant_wide = store.list_tickets("tenant-1").expect("tenant list");
    assert_eq!(tenant_wide.len(), 2);
    assert_eq!(tenant_wide[0].id, "ticket-b");

    let scoped = store
        .list_tickets_for_client("tenant-1", "client-1")
        .expect("client list");
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].id, "ticket-a");

    assert!(store
        .list_tickets_for_client("tenant-2", "client-1")
        .expect("cross tenant")
        .is_empty());
}
