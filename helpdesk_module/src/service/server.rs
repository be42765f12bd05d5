use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gmail::types::{decode_notification, PushEnvelope};
use crate::pipeline::SyncError;
use crate::poller::spawn_sync_poller;
use crate::routing::normalize_domain;
use crate::store::{Client, HelpdeskStoreError, MailboxIntegration, TicketPriority};

use super::auth::{admin_router, error_response, require_admin, run_blocking};
use super::config::ServiceConfig;
use super::state::AppState;
use super::tickets::ticket_router;
use super::BoxError;

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let state = AppState::from_config(config)?;
    let config = state.config.clone();

    let stop_flag = Arc::new(AtomicBool::new(false));
    let poller_handle = if config.auto_sync_enabled {
        Some(spawn_sync_poller(
            state.engine.clone(),
            config.poll_interval,
            stop_flag.clone(),
        ))
    } else {
        info!("auto sync is disabled; relying on push notifications and manual syncs");
        None
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("helpdeck service listening on {}", addr);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    stop_flag.store(true, Ordering::Relaxed);
    if let Some(handle) = poller_handle {
        handle.abort();
    }
    serve_result?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/gmail/notifications", post(gmail_notifications))
        .route("/admin/clients", post(create_client).get(list_clients))
        .route(
            "/admin/integrations",
            post(create_integration).get(list_integrations),
        )
        .route("/admin/integrations/:id/sync", post(sync_integration))
        .route(
            "/admin/integrations/:id/watch",
            post(start_watch).delete(stop_watch),
        )
        .route(
            "/admin/integrations/:id/activate",
            post(activate_integration),
        )
        .route(
            "/admin/integrations/:id/deactivate",
            post(deactivate_integration),
        )
        .with_state(state.clone())
        .merge(ticket_router(state.clone()))
        .merge(admin_router(state))
        .layer(CorsLayer::permissive())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ============================================================================
// Push notifications
// ============================================================================

#[derive(Debug, Deserialize)]
struct NotificationQuery {
    token: Option<String>,
}

/// POST /gmail/notifications
/// Pub/Sub push endpoint. Non-2xx responses make Pub/Sub redeliver.
async fn gmail_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
    Json(envelope): Json<PushEnvelope>,
) -> Result<Response, Response> {
    if let Some(expected) = state.config.webhook_token.as_deref() {
        if query.token.as_deref() != Some(expected) {
            warn!("push notification rejected: bad shared secret");
            return Err(error_response(StatusCode::UNAUTHORIZED, "Invalid token"));
        }
    }

    let Some(notification) = decode_notification(&envelope) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Unparseable push notification",
        ));
    };
    info!(
        "push notification for {} (history {:?})",
        notification.email_address.as_deref().unwrap_or("all mailboxes"),
        notification.history_id
    );

    let results = match state
        .engine
        .handle_notification(
            notification.email_address.as_deref(),
            notification.history_id,
        )
        .await
    {
        Ok(results) => results,
        Err(err) => {
            error!("notification handling failed: {}", err);
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Sync failed",
            ));
        }
    };

    let mut reports = serde_json::Map::new();
    let mut failures = 0;
    for (integration_id, outcome) in results {
        match outcome {
            Ok(report) => {
                reports.insert(
                    integration_id,
                    serde_json::to_value(report).unwrap_or_default(),
                );
            }
            Err(err) => {
                error!("notification sync for {} failed: {}", integration_id, err);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        return Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Sync failed",
        ));
    }
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "ok", "reports": reports })),
    )
        .into_response())
}

// ============================================================================
// Client administration
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateClientRequest {
    tenant_id: String,
    name: String,
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TenantQuery {
    tenant_id: Option<String>,
}

/// POST /admin/clients
async fn create_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateClientRequest>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    if payload.tenant_id.trim().is_empty() || payload.name.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "tenant_id and name are required",
        ));
    }

    let domains: Vec<String> = payload
        .domains
        .iter()
        .map(|domain| normalize_domain(domain))
        .filter(|domain| !domain.is_empty())
        .collect();
    let now = Utc::now();
    let client = Client {
        id: Uuid::new_v4().to_string(),
        tenant_id: payload.tenant_id,
        name: payload.name,
        domains,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let store = state.store.clone();
    let record = client.clone();
    match run_blocking(move || store.insert_client(&record)).await? {
        Ok(()) => {
            info!("created client {} ({})", client.id, client.name);
            Ok((StatusCode::CREATED, Json(json!({ "client": client }))).into_response())
        }
        Err(err) => {
            error!("client creation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create client",
            ))
        }
    }
}

/// GET /admin/clients?tenant_id=...
async fn list_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TenantQuery>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let Some(tenant_id) = query.tenant_id.filter(|value| !value.trim().is_empty()) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "tenant_id query parameter is required",
        ));
    };

    let store = state.store.clone();
    match run_blocking(move || store.list_clients(&tenant_id)).await? {
        Ok(clients) => Ok((StatusCode::OK, Json(json!({ "clients": clients }))).into_response()),
        Err(err) => {
            error!("client listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list clients",
            ))
        }
    }
}

// ============================================================================
// Integration administration
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateIntegrationRequest {
    tenant_id: String,
    email_address: String,
    refresh_token: String,
    #[serde(default = "default_true")]
    auto_create_tickets: bool,
    #[serde(default = "default_true")]
    auto_sync: bool,
    #[serde(default)]
    default_priority: TicketPriority,
    /// Member credited as creator of auto-created tickets.
    #[serde(default)]
    actor_member_id: Option<String>,
}

fn default_true() -> bool {
    true
}

/// POST /admin/integrations
async fn create_integration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateIntegrationRequest>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    if payload.tenant_id.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "tenant_id is required",
        ));
    }
    if !payload.email_address.contains('@') {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "email_address is not a valid address",
        ));
    }
    if payload.refresh_token.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "refresh_token is required",
        ));
    }

    let now = Utc::now();
    let integration = MailboxIntegration {
        id: Uuid::new_v4().to_string(),
        tenant_id: payload.tenant_id,
        email_address: payload.email_address.trim().to_ascii_lowercase(),
        refresh_token: payload.refresh_token,
        is_active: true,
        auto_create_tickets: payload.auto_create_tickets,
        auto_sync: payload.auto_sync,
        default_priority: payload.default_priority,
        actor_member_id: payload
            .actor_member_id
            .filter(|member| !member.trim().is_empty()),
        last_synced_at: None,
        last_history_id: None,
        watch_expires_at: None,
        created_at: now,
        updated_at: now,
    };

    let store = state.store.clone();
    let record = integration.clone();
    let result = run_blocking(move || -> Result<bool, HelpdeskStoreError> {
        if store
            .find_integration_by_address(&record.email_address)?
            .is_some()
        {
            return Ok(false);
        }
        store.insert_integration(&record)?;
        Ok(true)
    })
    .await?;

    match result {
        Ok(true) => {
            info!(
                "connected mailbox {} for tenant {}",
                integration.email_address, integration.tenant_id
            );
            Ok((
                StatusCode::CREATED,
                Json(json!({ "integration": integration })),
            )
                .into_response())
        }
        Ok(false) => Err(error_response(
            StatusCode::CONFLICT,
            "Mailbox is already connected",
        )),
        Err(err) => {
            error!("integration creation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create integration",
            ))
        }
    }
}

/// GET /admin/integrations
async fn list_integrations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let store = state.store.clone();
    match run_blocking(move || store.list_integrations()).await? {
        Ok(integrations) => Ok((
            StatusCode::OK,
            Json(json!({ "integrations": integrations })),
        )
            .into_response()),
        Err(err) => {
            error!("integration listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list integrations",
            ))
        }
    }
}

/// POST /admin/integrations/:id/sync
async fn sync_integration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    match state.engine.sync_mailbox(&id).await {
        Ok(report) => Ok((StatusCode::OK, Json(json!({ "report": report }))).into_response()),
        Err(SyncError::IntegrationNotFound(_)) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Integration not found",
        )),
        Err(SyncError::IntegrationInactive(_)) => Err(error_response(
            StatusCode::CONFLICT,
            "Integration is inactive",
        )),
        Err(err) => {
            error!("manual sync for {} failed: {}", id, err);
            Err(error_response(StatusCode::BAD_GATEWAY, "Sync failed"))
        }
    }
}

/// POST /admin/integrations/:id/watch
async fn start_watch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    match state.engine.setup_push_notifications(&id).await {
        Ok(response) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "watching",
                "expires_at": response.expires_at(),
                "history_id": response.history_id_value(),
            })),
        )
            .into_response()),
        Err(SyncError::PushTopicMissing) => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Push notifications not configured (missing GMAIL_PUBSUB_TOPIC)",
        )),
        Err(SyncError::IntegrationNotFound(_)) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Integration not found",
        )),
        Err(SyncError::IntegrationInactive(_)) => Err(error_response(
            StatusCode::CONFLICT,
            "Integration is inactive",
        )),
        Err(err) => {
            error!("watch registration for {} failed: {}", id, err);
            Err(error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to register watch",
            ))
        }
    }
}

/// DELETE /admin/integrations/:id/watch
async fn stop_watch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    match state.engine.stop_push_notifications(&id).await {
        Ok(()) => Ok((StatusCode::OK, Json(json!({ "status": "stopped" }))).into_response()),
        Err(SyncError::IntegrationNotFound(_)) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Integration not found",
        )),
        Err(err) => {
            error!("watch teardown for {} failed: {}", id, err);
            Err(error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to stop watch",
            ))
        }
    }
}

/// POST /admin/integrations/:id/activate
async fn activate_integration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    set_integration_active(&state, id, true).await
}

/// POST /admin/integrations/:id/deactivate
/// Deactivated mailboxes are skipped by the poller and push handler.
async fn deactivate_integration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    set_integration_active(&state, id, false).await
}

async fn set_integration_active(
    state: &AppState,
    id: String,
    is_active: bool,
) -> Result<Response, Response> {
    let store = state.store.clone();
    let integration_id = id.clone();
    match run_blocking(move || store.set_integration_active(&integration_id, is_active)).await? {
        Ok(()) => {
            let status = if is_active { "active" } else { "inactive" };
            info!("integration {} is now {}", id, status);
            Ok((StatusCode::OK, Json(json!({ "status": status, "id": id }))).into_response())
        }
        Err(HelpdeskStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Integration not found",
        )),
        Err(err) => {
            error!("integration update failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update integration",
            ))
        }
    }
}
