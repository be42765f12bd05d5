//! One-shot Gmail sync runner for operators.
//!
//! Runs outside the service process against the same databases, which is
//! handy for backfills and for debugging a single mailbox.

use std::env;
use std::process::exit;
use std::sync::Arc;

use helpdesk_module::gmail::{GmailClient, GmailConfig};
use helpdesk_module::google_auth::{GoogleAuth, GoogleAuthConfig};
use helpdesk_module::{HelpdeskStore, ServiceConfig, SyncEngine, SyncReport, SyncSettings};

fn print_usage() {
    eprintln!(
        r##"Usage: gmail-sync <command> [arguments]

Commands:
  list                       List connected mailbox integrations
  sync <integration_id>      Sync one mailbox now
  sync-all                   Sync every active mailbox with auto sync on

Environment Variables:
  GOOGLE_CLIENT_ID           Google OAuth client ID (required)
  GOOGLE_CLIENT_SECRET       Google OAuth client secret (required)
  HELPDECK_DATA_ROOT         Data directory (default ~/.helpdeck)
  HELPDECK_DB_PATH           Helpdesk database path override
  GMAIL_PAGE_SIZE            Messages fetched per sync (default 100)
"##
    );
}

fn load_config() -> Result<ServiceConfig, String> {
    ServiceConfig::from_env().map_err(|e| format!("configuration error: {}", e))
}

fn build_engine(config: &ServiceConfig) -> Result<SyncEngine, String> {
    let store = Arc::new(
        HelpdeskStore::new(config.helpdesk_db_path.clone())
            .map_err(|e| format!("failed to open helpdesk store: {}", e))?,
    );

    let mut gmail_config = GmailConfig::default();
    if let Some(base) = &config.gmail_api_base {
        gmail_config.api_base = base.clone();
    }
    let gmail = GmailClient::new(gmail_config)
        .map_err(|e| format!("failed to build gmail client: {}", e))?;

    let mut auth_config = GoogleAuthConfig::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
    );
    if let Some(url) = &config.google_token_url {
        auth_config.token_url = url.clone();
    }
    let auth =
        GoogleAuth::new(auth_config).map_err(|e| format!("failed to build google auth: {}", e))?;

    let settings = SyncSettings {
        page_size: config.gmail_page_size,
        push_topic: config.gmail_pubsub_topic.clone(),
        ..SyncSettings::default()
    };
    Ok(SyncEngine::new(store, gmail, auth, settings))
}

fn format_report(report: &SyncReport) -> String {
    format!(
        "{} processed ({} tickets, {} comments, {} dropped, {} empty), {} failed",
        report.messages_processed,
        report.tickets_created,
        report.comments_appended,
        report.dropped,
        report.skipped_empty,
        report.failed
    )
}

async fn cmd_list() -> Result<String, String> {
    let config = load_config()?;
    let store = HelpdeskStore::new(config.helpdesk_db_path.clone())
        .map_err(|e| format!("failed to open helpdesk store: {}", e))?;
    let integrations = store
        .list_integrations()
        .map_err(|e| format!("failed to list integrations: {}", e))?;

    let mut output = String::new();
    output.push_str(&format!("Found {} integrations:\n\n", integrations.len()));
    for integration in integrations {
        let last_synced = integration
            .last_synced_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        output.push_str(&format!(
            "- {} {} (active={}, auto_sync={}, last_synced={})\n",
            integration.id,
            integration.email_address,
            integration.is_active,
            integration.auto_sync,
            last_synced
        ));
    }
    Ok(output)
}

async fn cmd_sync(integration_id: &str) -> Result<String, String> {
    let config = load_config()?;
    let engine = build_engine(&config)?;
    let report = engine
        .sync_mailbox(integration_id)
        .await
        .map_err(|e| format!("sync failed: {}", e))?;
    Ok(format!("Synced {}: {}", integration_id, format_report(&report)))
}

async fn cmd_sync_all() -> Result<String, String> {
    let config = load_config()?;
    let engine = build_engine(&config)?;
    let integrations = engine
        .store()
        .list_active_integrations()
        .map_err(|e| format!("failed to list integrations: {}", e))?;

    let mut output = String::new();
    let mut failures = 0;
    for integration in integrations {
        if !integration.auto_sync {
            output.push_str(&format!(
                "- {} skipped (auto sync off)\n",
                integration.email_address
            ));
            continue;
        }
        match engine.sync_integration(&integration).await {
            Ok(report) => {
                output.push_str(&format!(
                    "- {} {}\n",
                    integration.email_address,
                    format_report(&report)
                ));
            }
            Err(e) => {
                failures += 1;
                output.push_str(&format!("- {} failed: {}\n", integration.email_address, e));
            }
        }
    }
    if failures > 0 {
        return Err(format!("{} mailboxes failed\n\n{}", failures, output));
    }
    Ok(output)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        exit(1);
    }

    let command = &args[1];
    let result = match command.as_str() {
        "list" => cmd_list().await,
        "sync" => {
            if args.len() < 3 {
                eprintln!("Error: integration id required");
                print_usage();
                exit(1);
            }
            cmd_sync(&args[2]).await
        }
        "sync-all" => cmd_sync_all().await,
        "--help" | "-h" | "help" => {
            print_usage();
            exit(0);
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            exit(1);
        }
    };

    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}
