//! Programmatic API key issuance and validation.
//!
//! The raw key is returned exactly once at generation time. Every read path
//! afterwards sees only the stored hash and display prefix.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::secret;
use crate::store::{AccessStore, AccessStoreError, ApiKeyRecord};

#[derive(Debug, Clone)]
pub struct ApiKeyEngine {
    store: AccessStore,
}

/// Resolved identity of a validated API key.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AuthContext {
    pub key_id: String,
    pub tenant_id: String,
    pub permissions: Vec<String>,
}

impl AuthContext {
    /// Exact string membership against the granted permission list.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|granted| granted == permission)
    }
}

/// Generation result. `raw_key` is not stored anywhere and cannot be
/// recovered once dropped.
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    pub record: ApiKeyRecord,
    pub raw_key: String,
}

impl ApiKeyEngine {
    pub fn new(store: AccessStore) -> Self {
        Self { store }
    }

    pub fn generate(
        &self,
        tenant_id: &str,
        name: &str,
        permissions: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<GeneratedApiKey, AccessStoreError> {
        let raw_key = secret::generate_secret(secret::API_KEY_PREFIX);
        let now = Utc::now();
        let record = ApiKeyRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            key_prefix: secret::display_prefix(&raw_key),
            key_hash: secret::sha256_hex(&raw_key),
            permissions,
            expires_at,
            is_active: true,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_api_key(&record)?;
        info!(
            "generated api key {} ({}) for tenant {}",
            record.id, record.name, record.tenant_id
        );
        Ok(GeneratedApiKey { record, raw_key })
    }

    /// Resolve a presented raw key to its identity, or None when the key is
    /// unknown, revoked, or expired. Touches last_used_at on success.
    pub fn validate(&self, raw_key: &str) -> Result<Option<AuthContext>, AccessStoreError> {
        let raw_key = raw_key.trim();
        if raw_key.is_empty() {
            return Ok(None);
        }
        let prefix = secret::display_prefix(raw_key);
        let hash = secret::sha256_hex(raw_key);
        let now = Utc::now();
        for record in self.store.find_api_keys_by_prefix(&prefix)? {
            if record.key_hash != hash {
                continue;
            }
            if !record.is_active {
                debug!("api key {} is revoked", secret::mask(raw_key));
                return Ok(None);
            }
            if let Some(expires_at) = record.expires_at {
                if expires_at <= now {
                    debug!("api key {} is expired", secret::mask(raw_key));
                    return Ok(None);
                }
            }
            self.store.touch_api_key_last_used(&record.id, now)?;
            return Ok(Some(AuthContext {
                key_id: record.id,
                tenant_id: record.tenant_id,
                permissions: record.permissions,
            }));
        }
        debug!("api key {} did not match any record", secret::mask(raw_key));
        Ok(None)
    }

    pub fn get(&self, id: &str) -> Result<Option<ApiKeyRecord>, AccessStoreError> {
        self.store.get_api_key(id)
    }

    pub fn list(&self, tenant_id: &str) -> Result<Vec<ApiKeyRecord>, AccessStoreError> {
        self.store.list_api_keys(tenant_id)
    }

    /// Soft-deactivate. The row stays enumerable and can be revived by
    /// regenerating.
    pub fn revoke(&self, id: &str) -> Result<(), AccessStoreError> {
        self.store.set_api_key_active(id, false)?;
        info!("revoked api key {}", id);
        Ok(())
    }

    /// Hard removal.
    pub fn delete(&self, id: &str) -> Result<(), AccessStoreError> {
        self.store.delete_api_key(id)?;
        info!("deleted api key {}", id);
        Ok(())
    }

    /// Issue a new secret for an existing key, reactivating it. The previous
    /// secret stops validating immediately.
    pub fn regenerate(&self, id: &str) -> Result<GeneratedApiKey, AccessStoreError> {
        let raw_key = secret::generate_secret(secret::API_KEY_PREFIX);
        self.store.update_api_key_secret(
            id,
            &secret::display_prefix(&raw_key),
            &secret::sha256_hex(&raw_key),
            Utc::now(),
        )?;
        let record = self
            .store
            .get_api_key(id)?
            .ok_or_else(|| AccessStoreError::NotFound {
                entity: "api key",
                id: id.to_string(),
            })?;
        info!("regenerated api key {}", id);
        Ok(GeneratedApiKey { record, raw_key })
    }
}
