use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use super::BoxError;

pub const DEFAULT_GMAIL_PAGE_SIZE: u32 = 100;
pub const MAX_GMAIL_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub helpdesk_db_path: PathBuf,
    pub access_db_path: PathBuf,
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Override for the OAuth token endpoint, used by tests.
    pub google_token_url: Option<String>,
    /// Override for the Gmail API base, used by tests.
    pub gmail_api_base: Option<String>,
    pub gmail_page_size: u32,
    /// Pub/Sub topic watches publish to. Unset means polling only.
    pub gmail_pubsub_topic: Option<String>,
    /// Shared secret the push endpoint checks when set.
    pub webhook_token: Option<String>,
    pub poll_interval: Duration,
    pub auto_sync_enabled: bool,
    /// Base URL portal links are built from.
    pub portal_base_url: Option<String>,
    /// Bearer token guarding the admin routes. Unset disables them.
    pub admin_token: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("HELPDECK_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("HELPDECK_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(9400);

        let data_root = match env_var_non_empty("HELPDECK_DATA_ROOT") {
            Some(root) => resolve_path(root)?,
            None => default_data_root()?,
        };
        let helpdesk_db_path = match env_var_non_empty("HELPDECK_DB_PATH") {
            Some(path) => resolve_path(path)?,
            None => data_root.join("helpdesk.db"),
        };
        let access_db_path = match env_var_non_empty("HELPDECK_ACCESS_DB_PATH") {
            Some(path) => resolve_path(path)?,
            None => data_root.join("access.db"),
        };

        let google_client_id =
            env_var_non_empty("GOOGLE_CLIENT_ID").ok_or("GOOGLE_CLIENT_ID is not set")?;
        let google_client_secret =
            env_var_non_empty("GOOGLE_CLIENT_SECRET").ok_or("GOOGLE_CLIENT_SECRET is not set")?;
        let google_token_url = env_var_non_empty("GOOGLE_TOKEN_URL");

        let gmail_api_base = env_var_non_empty("GMAIL_API_BASE");
        let gmail_page_size = env::var("GMAIL_PAGE_SIZE")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_GMAIL_PAGE_SIZE)
            .min(MAX_GMAIL_PAGE_SIZE);
        let gmail_pubsub_topic = env_var_non_empty("GMAIL_PUBSUB_TOPIC");
        let webhook_token = env_var_non_empty("HELPDECK_WEBHOOK_TOKEN");

        let poll_interval = env::var("HELPDECK_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(300));
        let auto_sync_enabled = env_flag("HELPDECK_AUTO_SYNC_ENABLED", true);
        let portal_base_url = env_var_non_empty("HELPDECK_PORTAL_BASE_URL");
        let admin_token = env_var_non_empty("HELPDECK_ADMIN_TOKEN");

        Ok(Self {
            host,
            port,
            helpdesk_db_path,
            access_db_path,
            google_client_id,
            google_client_secret,
            google_token_url,
            gmail_api_base,
            gmail_page_size,
            gmail_pubsub_topic,
            webhook_token,
            poll_interval,
            auto_sync_enabled,
            portal_base_url,
            admin_token,
        })
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_data_root() -> Result<PathBuf, io::Error> {
    let home =
        env::var("HOME").map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".helpdeck"))
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
