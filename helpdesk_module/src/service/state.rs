use std::sync::Arc;

use access_tokens_module::{AccessStore, ApiKeyEngine, PortalEngine};

use crate::gmail::{GmailClient, GmailConfig};
use crate::google_auth::{GoogleAuth, GoogleAuthConfig};
use crate::pipeline::{SyncEngine, SyncSettings};
use crate::store::HelpdeskStore;

use super::config::ServiceConfig;
use super::BoxError;

#[derive(Clone)]
pub struct AppState {
    pub(super) config: Arc<ServiceConfig>,
    pub(super) store: Arc<HelpdeskStore>,
    pub(super) engine: Arc<SyncEngine>,
    pub(super) api_keys: ApiKeyEngine,
    pub(super) portal: PortalEngine,
}

impl AppState {
    pub fn from_config(config: ServiceConfig) -> Result<Self, BoxError> {
        let config = Arc::new(config);
        let store = Arc::new(HelpdeskStore::new(config.helpdesk_db_path.clone())?);
        let access_store = AccessStore::new(config.access_db_path.clone())?;

        let mut gmail_config = GmailConfig::default();
        if let Some(base) = &config.gmail_api_base {
            gmail_config.api_base = base.clone();
        }
        let gmail = GmailClient::new(gmail_config)?;

        let mut auth_config = GoogleAuthConfig::new(
            config.google_client_id.clone(),
            config.google_client_secret.clone(),
        );
        if let Some(url) = &config.google_token_url {
            auth_config.token_url = url.clone();
        }
        let auth = GoogleAuth::new(auth_config)?;

        let settings = SyncSettings {
            page_size: config.gmail_page_size,
            push_topic: config.gmail_pubsub_topic.clone(),
            ..SyncSettings::default()
        };
        let engine = Arc::new(SyncEngine::new(store.clone(), gmail, auth, settings));

        Ok(Self {
            config,
            store,
            engine,
            api_keys: ApiKeyEngine::new(access_store.clone()),
            portal: PortalEngine::new(access_store),
        })
    }
}
