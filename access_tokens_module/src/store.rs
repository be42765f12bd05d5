//! SQLite persistence for access credentials.
//!
//! Both credential tables live in one database file. Raw secrets are never
//! written anywhere in this module; callers hand in hashes and prefixes only.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AccessStore {
    path: PathBuf,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PortalAccessRecord {
    pub id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub email: String,
    pub name: Option<String>,
    pub token_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("portal access already granted for {email}")]
    AlreadyGranted { email: String },
}

const ACCESS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    key_prefix TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    permissions TEXT NOT NULL,
    expires_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_used_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_keys_prefix ON api_keys(key_prefix);
CREATE INDEX IF NOT EXISTS idx_api_keys_tenant ON api_keys(tenant_id);

CREATE TABLE IF NOT EXISTS portal_access (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    email TEXT NOT NULL,
    name TEXT,
    token_hash TEXT NOT NULL,
    expires_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_login_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(tenant_id, client_id, email)
);

CREATE INDEX IF NOT EXISTS idx_portal_access_hash ON portal_access(token_hash);
CREATE INDEX IF NOT EXISTS idx_portal_access_tenant ON portal_access(tenant_id);
"#;

impl AccessStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, AccessStoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, AccessStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(ACCESS_SCHEMA)?;
        Ok(conn)
    }

    // ==================== API keys ====================

    pub fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO api_keys (id, tenant_id, name, key_prefix, key_hash, permissions,
                                   expires_at, is_active, last_used_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.tenant_id,
                record.name,
                record.key_prefix,
                record.key_hash,
                serde_json::to_string(&record.permissions)?,
                record.expires_at.map(format_datetime),
                record.is_active,
                record.last_used_at.map(format_datetime),
                format_datetime(record.created_at),
                format_datetime(record.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_api_key(&self, id: &str) -> Result<Option<ApiKeyRecord>, AccessStoreError> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
            params![id],
            map_api_key_row,
        )
        .optional()?
        .map(finish_api_key_row)
        .transpose()
    }

    /// All keys whose stored display prefix matches. The caller compares
    /// hashes; prefixes are short enough to collide.
    pub fn find_api_keys_by_prefix(
        &self,
        key_prefix: &str,
    ) -> Result<Vec<ApiKeyRecord>, AccessStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_prefix = ?1"
        ))?;
        let rows = stmt.query_map(params![key_prefix], map_api_key_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(finish_api_key_row(row?)?);
        }
        Ok(records)
    }

    pub fn list_api_keys(&self, tenant_id: &str) -> Result<Vec<ApiKeyRecord>, AccessStoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE tenant_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![tenant_id], map_api_key_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(finish_api_key_row(row?)?);
        }
        Ok(records)
    }

    pub fn set_api_key_active(&self, id: &str, is_active: bool) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE api_keys SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_active, format_datetime(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(AccessStoreError::NotFound {
                entity: "api key",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_api_key(&self, id: &str) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let changed = conn.execute("DELETE FROM api_keys WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(AccessStoreError::NotFound {
                entity: "api key",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn touch_api_key_last_used(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(now), id],
        )?;
        Ok(())
    }

    /// Swap in a freshly generated secret and reactivate the row. The old
    /// secret stops validating because its hash is gone.
    pub fn update_api_key_secret(
        &self,
        id: &str,
        key_prefix: &str,
        key_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE api_keys
             SET key_prefix = ?1, key_hash = ?2, is_active = 1, updated_at = ?3
             WHERE id = ?4",
            params![key_prefix, key_hash, format_datetime(now), id],
        )?;
        if changed == 0 {
            return Err(AccessStoreError::NotFound {
                entity: "api key",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ==================== Portal access ====================

    pub fn insert_portal_access(&self, record: &PortalAccessRecord) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let inserted = conn.execute(
            "INSERT INTO portal_access (id, tenant_id, client_id, email, name, token_hash,
                                        expires_at, is_active, last_login_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id,
                record.tenant_id,
                record.client_id,
                record.email,
                record.name,
                record.token_hash,
                record.expires_at.map(format_datetime),
                record.is_active,
                record.last_login_at.map(format_datetime),
                format_datetime(record.created_at),
                format_datetime(record.updated_at),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(AccessStoreError::AlreadyGranted {
                email: record.email.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_portal_access(
        &self,
        id: &str,
    ) -> Result<Option<PortalAccessRecord>, AccessStoreError> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {PORTAL_COLUMNS} FROM portal_access WHERE id = ?1"),
            params![id],
            map_portal_row,
        )
        .optional()?
        .map(finish_portal_row)
        .transpose()
    }

    pub fn find_portal_access_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<PortalAccessRecord>, AccessStoreError> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {PORTAL_COLUMNS} FROM portal_access WHERE token_hash = ?1"),
            params![token_hash],
            map_portal_row,
        )
        .optional()?
        .map(finish_portal_row)
        .transpose()
    }

    pub fn list_portal_access(
        &self,
        tenant_id: &str,
        client_id: Option<&str>,
    ) -> Result<Vec<PortalAccessRecord>, AccessStoreError> {
        let conn = self.open()?;
        let mut records = Vec::new();
        match client_id {
            Some(client_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PORTAL_COLUMNS} FROM portal_access
                     WHERE tenant_id = ?1 AND client_id = ?2 ORDER BY created_at"
                ))?;
                let rows = stmt.query_map(params![tenant_id, client_id], map_portal_row)?;
                for row in rows {
                    records.push(finish_portal_row(row?)?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PORTAL_COLUMNS} FROM portal_access
                     WHERE tenant_id = ?1 ORDER BY created_at"
                ))?;
                let rows = stmt.query_map(params![tenant_id], map_portal_row)?;
                for row in rows {
                    records.push(finish_portal_row(row?)?);
                }
            }
        }
        Ok(records)
    }

    pub fn set_portal_access_active(
        &self,
        id: &str,
        is_active: bool,
    ) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE portal_access SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_active, format_datetime(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(AccessStoreError::NotFound {
                entity: "portal access",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_portal_access(&self, id: &str) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let changed = conn.execute("DELETE FROM portal_access WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(AccessStoreError::NotFound {
                entity: "portal access",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn touch_portal_last_login(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE portal_access SET last_login_at = ?1 WHERE id = ?2",
            params![format_datetime(now), id],
        )?;
        Ok(())
    }

    pub fn update_portal_expiry(
        &self,
        id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE portal_access SET expires_at = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                expires_at.map(format_datetime),
                format_datetime(Utc::now()),
                id
            ],
        )?;
        if changed == 0 {
            return Err(AccessStoreError::NotFound {
                entity: "portal access",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn update_portal_secret(
        &self,
        id: &str,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AccessStoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE portal_access
             SET token_hash = ?1, is_active = 1, updated_at = ?2
             WHERE id = ?3",
            params![token_hash, format_datetime(now), id],
        )?;
        if changed == 0 {
            return Err(AccessStoreError::NotFound {
                entity: "portal access",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

const API_KEY_COLUMNS: &str = "id, tenant_id, name, key_prefix, key_hash, permissions, \
                               expires_at, is_active, last_used_at, created_at, updated_at";

const PORTAL_COLUMNS: &str = "id, tenant_id, client_id, email, name, token_hash, \
                              expires_at, is_active, last_login_at, created_at, updated_at";

type RawApiKeyRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    String,
    String,
);

fn map_api_key_row(row: &Row<'_>) -> rusqlite::Result<RawApiKeyRow> {
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

fn finish_api_key_row(raw: RawApiKeyRow) -> Result<ApiKeyRecord, AccessStoreError> {
    let (
        id,
        tenant_id,
        name,
        key_prefix,
        key_hash,
        permissions,
        expires_at,
        is_active,
        last_used_at,
        created_at,
        updated_at,
    ) = raw;
    Ok(ApiKeyRecord {
        id,
        tenant_id,
        name,
        key_prefix,
        key_hash,
        permissions: serde_json::from_str(&permissions)?,
        expires_at: parse_optional_datetime(expires_at)?,
        is_active,
        last_used_at: parse_optional_datetime(last_used_at)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

type RawPortalRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    bool,
    Option<String>,
    String,
    String,
);

fn map_portal_row(row: &Row<'_>) -> rusqlite::Result<RawPortalRow> {
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

fn finish_portal_row(raw: RawPortalRow) -> Result<PortalAccessRecord, AccessStoreError> {
    let (
        id,
        tenant_id,
        client_id,
        email,
        name,
        token_hash,
        expires_at,
        is_active,
        last_login_at,
        created_at,
        updated_at,
    ) = raw;
    Ok(PortalAccessRecord {
        id,
        tenant_id,
        client_id,
        email,
        name,
        token_hash,
        expires_at: parse_optional_datetime(expires_at)?,
        is_active,
        last_login_at: parse_optional_datetime(last_login_at)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
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
    value.map(|raw| parse_datetime(&raw)).transpose()
}
