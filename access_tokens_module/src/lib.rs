//! API key and customer portal credential management.
//!
//! Two credential families share one SQLite store: programmatic API keys
//! (`hdk_` prefix, permission-scoped) and customer portal tokens (`hpt_`
//! prefix, scoped to a single client). Raw secrets are returned exactly
//! once at issue time; only SHA-256 hashes are persisted.

pub mod api_keys;
pub mod portal;
pub mod secret;
pub mod store;

pub use api_keys::{ApiKeyEngine, AuthContext, GeneratedApiKey};
pub use portal::{ExpiryPolicy, GrantedPortalAccess, PortalContext, PortalEngine};
pub use store::{AccessStore, AccessStoreError, ApiKeyRecord, PortalAccessRecord};
