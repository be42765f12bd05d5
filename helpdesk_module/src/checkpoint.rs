//! Sync window checkpointing.

use chrono::{DateTime, Duration, Utc};

use crate::store::{HelpdeskStore, HelpdeskStoreError, MailboxIntegration};

/// Look-back for integrations that have never synced, so a fresh mailbox
/// does not replay its whole history.
pub const FIRST_SYNC_LOOKBACK_SECS: i64 = 3600;

pub fn window_start(integration: &MailboxIntegration, now: DateTime<Utc>) -> DateTime<Utc> {
    integration
        .last_synced_at
        .unwrap_or_else(|| now - Duration::seconds(FIRST_SYNC_LOOKBACK_SECS))
}

/// Gmail search expression for the window. `after:` takes epoch seconds;
/// the unread filter keeps already-triaged mail out of the batch.
pub fn unread_query(window_start: DateTime<Utc>) -> String {
    format!("is:unread after:{}", window_start.timestamp())
}

/// Persist the checkpoint captured at the start of the run, so mail that
/// arrived mid-sync falls inside the next window. The store refuses moves
/// backward.
pub fn advance(
    store: &HelpdeskStore,
    integration_id: &str,
    captured_at: DateTime<Utc>,
) -> Result<(), HelpdeskStoreError> {
    store.advance_checkpoint(integration_id, captured_at)
}
