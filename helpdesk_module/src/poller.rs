//! Background mailbox polling.
//!
//! Push notifications cover the steady state; the poller is the safety
//! net that catches missed notifications and keeps watches registered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pipeline::SyncEngine;
use crate::store::MailboxIntegration;

/// Watches expiring within this lead get renewed during a poll pass.
const WATCH_RENEWAL_LEAD_HOURS: i64 = 24;

/// Spawn the periodic sync loop. Each pass syncs every active integration
/// with auto sync on and renews watches close to expiry. A set `stop_flag`
/// is observed after the current pass finishes sleeping.
pub fn spawn_sync_poller(
    engine: Arc<SyncEngine>,
    interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "mailbox poller started with {}s interval",
            interval.as_secs()
        );
        while !stop_flag.load(Ordering::Relaxed) {
            poll_once(&engine).await;
            tokio::time::sleep(interval).await;
        }
        info!("mailbox poller stopped");
    })
}

/// One poll pass over every active integration.
pub async fn poll_once(engine: &SyncEngine) {
    let integrations = match engine.store().list_active_integrations() {
        Ok(integrations) => integrations,
        Err(err) => {
            error!("listing integrations for poll failed: {}", err);
            return;
        }
    };

    for integration in integrations {
        if integration.auto_sync {
            match engine.sync_integration(&integration).await {
                Ok(report) => {
                    if report.messages_processed > 0 || report.failed > 0 {
                        info!(
                            "poll synced {}: {} processed, {} failed",
                            integration.email_address,
                            report.messages_processed,
                            report.failed
                        );
                    }
                }
                Err(err) => {
                    error!(
                        "poll sync for {} failed: {}",
                        integration.email_address, err
                    );
                }
            }
        }

        if engine.settings().push_topic.is_some()
            && watch_needs_renewal(&integration, Utc::now())
        {
            debug!(
                "watch for {} expires at {:?}, renewing",
                integration.email_address, integration.watch_expires_at
            );
            if let Err(err) = engine.setup_push_notifications(&integration.id).await {
                warn!(
                    "watch renewal for {} failed: {}",
                    integration.email_address, err
                );
            }
        }
    }
}

fn watch_needs_renewal(integration: &MailboxIntegration, now: DateTime<Utc>) -> bool {
    match integration.watch_expires_at {
        Some(expires_at) => now >= expires_at - ChronoDuration::hours(WATCH_RENEWAL_LEAD_HOURS),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn integration(watch_expires_at: Option<DateTime<Utc>>) -> MailboxIntegration {
        let now = Utc::now();
        MailboxIntegration {
            id: "int-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            email_address: "support@acme.com".to_string(),
            refresh_token: "refresh".to_string(),
            is_active: true,
            auto_create_tickets: true,
            auto_sync: true,
            default_priority: crate::store::TicketPriority::Normal,
            actor_member_id: None,
            last_synced_at: None,
            last_history_id: None,
            watch_expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unwatched_mailboxes_are_left_alone() {
        assert!(!watch_needs_renewal(&integration(None), Utc::now()));
    }

    #[test]
    fn distant_expiry_does_not_renew() {
        let now = Utc::now();
        let target = integration(Some(now + ChronoDuration::hours(48)));
        assert!(!watch_needs_renewal(&target, now));
    }

    #[test]
    fn imminent_expiry_renews() {
        let now = Utc::now();
        let target = integration(Some(now + ChronoDuration::hours(12)));
        assert!(watch_needs_renewal(&target, now));
    }

    #[test]
    fn already_expired_watch_renews() {
        let now = Utc::now();
        let target = integration(Some(now - ChronoDuration::hours(1)));
        assert!(watch_needs_renewal(&target, now));
    }
}
