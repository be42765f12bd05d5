//! Customer portal access grants.
//!
//! A portal access row per (tenant, client, email) gates whether the holder
//! may reach that client's portal. Revoking keeps the row enumerable and
//! reversible; deleting removes it outright.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::secret;
use crate::store::{AccessStore, AccessStoreError, PortalAccessRecord};

#[derive(Debug, Clone)]
pub struct PortalEngine {
    store: AccessStore,
}

/// How long a granted credential stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    OneDay,
    OneWeek,
    OneMonth,
    OneYear,
    Never,
}

impl ExpiryPolicy {
    pub fn expires_at(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ExpiryPolicy::OneDay => Some(from + Duration::days(1)),
            ExpiryPolicy::OneWeek => Some(from + Duration::weeks(1)),
            ExpiryPolicy::OneMonth => Some(from + Duration::days(30)),
            ExpiryPolicy::OneYear => Some(from + Duration::days(365)),
            ExpiryPolicy::Never => None,
        }
    }
}

/// Resolved identity of a validated portal token.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PortalContext {
    pub access_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Grant result. `raw_token` is never persisted and cannot be recovered.
#[derive(Debug, Clone)]
pub struct GrantedPortalAccess {
    pub record: PortalAccessRecord,
    pub raw_token: String,
}

impl PortalEngine {
    pub fn new(store: AccessStore) -> Self {
        Self { store }
    }

    pub fn grant(
        &self,
        tenant_id: &str,
        client_id: &str,
        email: &str,
        name: Option<String>,
        policy: ExpiryPolicy,
    ) -> Result<GrantedPortalAccess, AccessStoreError> {
        let email = email.trim().to_ascii_lowercase();
        let raw_token = secret::generate_secret(secret::PORTAL_TOKEN_PREFIX);
        let now = Utc::now();
        let record = PortalAccessRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            email,
            name,
            token_hash: secret::sha256_hex(&raw_token),
            expires_at: policy.expires_at(now),
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_portal_access(&record)?;
        info!(
            "granted portal access {} to {} for client {}",
            record.id, record.email, record.client_id
        );
        Ok(GrantedPortalAccess { record, raw_token })
    }

    /// Resolve a presented token, or None when unknown, revoked, or expired.
    /// Touches last_login_at on success.
    pub fn validate(&self, raw_token: &str) -> Result<Option<PortalContext>, AccessStoreError> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() {
            return Ok(None);
        }
        let hash = secret::sha256_hex(raw_token);
        let Some(record) = self.store.find_portal_access_by_hash(&hash)? else {
            debug!(
                "portal token {} did not match any record",
                secret::mask(raw_token)
            );
            return Ok(None);
        };
        if !record.is_active {
            debug!("portal access {} is revoked", record.id);
            return Ok(None);
        }
        let now = Utc::now();
        if let Some(expires_at) = record.expires_at {
            if expires_at <= now {
                debug!("portal access {} is expired", record.id);
                return Ok(None);
            }
        }
        self.store.touch_portal_last_login(&record.id, now)?;
        Ok(Some(PortalContext {
            access_id: record.id,
            tenant_id: record.tenant_id,
            client_id: record.client_id,
            email: record.email,
            name: record.name,
        }))
    }

    pub fn get(&self, id: &str) -> Result<Option<PortalAccessRecord>, AccessStoreError> {
        self.store.get_portal_access(id)
    }

    pub fn list(
        &self,
        tenant_id: &str,
        client_id: Option<&str>,
    ) -> Result<Vec<PortalAccessRecord>, AccessStoreError> {
        self.store.list_portal_access(tenant_id, client_id)
    }

    /// Soft-deactivate. The record stays enumerable; regenerating re-grants.
    pub fn revoke(&self, id: &str) -> Result<(), AccessStoreError> {
        self.store.set_portal_access_active(id, false)?;
        info!("revoked portal access {}", id);
        Ok(())
    }

    /// Hard, irreversible removal.
    pub fn delete(&self, id: &str) -> Result<(), AccessStoreError> {
        self.store.delete_portal_access(id)?;
        info!("deleted portal access {}", id);
        Ok(())
    }

    /// Change the expiry window without touching the credential itself.
    pub fn update_expiry(&self, id: &str, policy: ExpiryPolicy) -> Result<(), AccessStoreError> {
        self.store
            .update_portal_expiry(id, policy.expires_at(Utc::now()))?;
        info!("updated expiry of portal access {}", id);
        Ok(())
    }

    /// Issue a new token in place, reactivating the grant. Audit fields
    /// (created_at, last_login_at) survive because the row is kept.
    pub fn regenerate(&self, id: &str) -> Result<GrantedPortalAccess, AccessStoreError> {
        let raw_token = secret::generate_secret(secret::PORTAL_TOKEN_PREFIX);
        self.store
            .update_portal_secret(id, &secret::sha256_hex(&raw_token), Utc::now())?;
        let record = self
            .store
            .get_portal_access(id)?
            .ok_or_else(|| AccessStoreError::NotFound {
                entity: "portal access",
                id: id.to_string(),
            })?;
        info!("regenerated portal access {}", id);
        Ok(GrantedPortalAccess { record, raw_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (TempDir, PortalEngine) {
        let dir = TempDir::new().unwrap();
        let store = AccessStore::new(dir.path().join("access.db")).unwrap();
        (dir, PortalEngine::new(store))
    }

    #[test]
    fn grant_and_validate() {
        let (_dir, engine) = engine();
        let granted = engine
            .grant(
                "tenant-1",
                "client-1",
                "Jane@Acme.com",
                Some("Jane".to_string()),
                ExpiryPolicy::OneWeek,
            )
            .unwrap();

        assert!(granted.raw_token.starts_with("hpt_"));
        assert_eq!(granted.record.email, "jane@acme.com");
        assert!(granted.record.expires_at.is_some());

        let ctx = engine.validate(&granted.raw_token).unwrap().unwrap();
        assert_eq!(ctx.client_id, "client-1");
        assert_eq!(ctx.email, "jane@acme.com");

        let touched = engine.get(&granted.record.id).unwrap().unwrap();
        assert!(touched.last_login_at.is_some());
    }

    #[test]
    fn revoke_fails_validation_but_keeps_the_row() {
        let (_dir, engine) = engine();
        let granted = engine
            .grant("tenant-1", "client-1", "bob@acme.com", None, ExpiryPolicy::Never)
            .unwrap();

        engine.revoke(&granted.record.id).unwrap();
        assert!(engine.validate(&granted.raw_token).unwrap().is_none());

        let listed = engine.list("tenant-1", Some("client-1")).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_active);
    }

    #[test]
    fn delete_removes_from_enumeration() {
        let (_dir, engine) = engine();
        let granted = engine
            .grant("tenant-1", "client-1", "gone@acme.com", None, ExpiryPolicy::Never)
            .unwrap();

        engine.delete(&granted.record.id).unwrap();
        assert!(engine.validate(&granted.raw_token).unwrap().is_none());
        assert!(engine.list("tenant-1", None).unwrap().is_empty());
        assert!(matches!(
            engine.delete(&granted.record.id),
            Err(AccessStoreError::NotFound { .. })
        ));
    }

    #[test]
    fn expiry_policies_compute_windows() {
        let now = Utc::now();
        assert_eq!(
            ExpiryPolicy::OneDay.expires_at(now),
            Some(now + Duration::days(1))
        );
        assert_eq!(
            ExpiryPolicy::OneYear.expires_at(now),
            Some(now + Duration::days(365))
        );
        assert_eq!(ExpiryPolicy::Never.expires_at(now), None);
    }

    #[test]
    fn expired_grant_fails_validation() {
        let (_dir, engine) = engine();
        let granted = engine
            .grant(
                "tenant-1",
                "client-1",
                "late@acme.com",
                None,
                ExpiryPolicy::OneDay,
            )
            .unwrap();
        // Shrink the window to the past without touching the token.
        engine
            .store
            .update_portal_expiry(&granted.record.id, Some(Utc::now() - Duration::minutes(1)))
            .unwrap();
        assert!(engine.validate(&granted.raw_token).unwrap().is_none());
    }

    #[test]
    fn update_expiry_does_not_rotate_the_token() {
        let (_dir, engine) = engine();
        let granted = engine
            .grant(
                "tenant-1",
                "client-1",
                "keep@acme.com",
                None,
                ExpiryPolicy::OneDay,
            )
            .unwrap();

        engine
            .update_expiry(&granted.record.id, ExpiryPolicy::OneYear)
            .unwrap();
        // Old token still validates against the widened window.
        assert!(engine.validate(&granted.raw_token).unwrap().is_some());
    }

    #[test]
    fn regenerate_replaces_the_token_in_place() {
        let (_dir, engine) = engine();
        let granted = engine
            .grant(
                "tenant-1",
                "client-1",
                "rotate@acme.com",
                None,
                ExpiryPolicy::Never,
            )
            .unwrap();
        engine.revoke(&granted.record.id).unwrap();

        let rotated = engine.regenerate(&granted.record.id).unwrap();
        assert_ne!(rotated.raw_token, granted.raw_token);
        assert!(engine.validate(&granted.raw_token).unwrap().is_none());
        let ctx = engine.validate(&rotated.raw_token).unwrap().unwrap();
        assert_eq!(ctx.access_id, granted.record.id);

        // Still one row per (tenant, client, email).
        assert_eq!(engine.list("tenant-1", None).unwrap().len(), 1);
    }
}
