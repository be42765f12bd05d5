use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tracing::error;

use access_tokens_module::{AccessStoreError, AuthContext, ExpiryPolicy, PortalContext};

use super::state::AppState;

// ============================================================================
// Shared guards and helpers
// ============================================================================

/// Extract Bearer token from Authorization header
pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.to_string())
}

pub(super) fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Run a store call on the blocking pool; a panic becomes a 500.
pub(super) async fn run_blocking<T, F>(task_fn: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(task_fn).await.map_err(|err| {
        error!("blocking task panicked: {}", err);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    })
}

/// Resolve the caller's API key to an identity, or reject the request.
pub(super) async fn authenticate_api_key(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthContext, Response> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header",
        ));
    };
    let engine = state.api_keys.clone();
    match run_blocking(move || engine.validate(&token)).await? {
        Ok(Some(context)) => Ok(context),
        Ok(None) => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid or expired API key",
        )),
        Err(err) => {
            error!("api key validation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
            ))
        }
    }
}

pub(super) fn require_permission(
    context: &AuthContext,
    permission: &str,
) -> Result<(), Response> {
    if context.has_permission(permission) {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::FORBIDDEN,
            &format!("API key lacks the {} permission", permission),
        ))
    }
}

/// Resolve the caller's portal token to a grant, or reject the request.
pub(super) async fn authenticate_portal(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<PortalContext, Response> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header",
        ));
    };
    let engine = state.portal.clone();
    match run_blocking(move || engine.validate(&token)).await? {
        Ok(Some(context)) => Ok(context),
        Ok(None) => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid or expired portal token",
        )),
        Err(err) => {
            error!("portal token validation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
            ))
        }
    }
}

/// Admin routes are guarded by a static bearer token from the environment.
pub(super) fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Admin API not configured (missing HELPDECK_ADMIN_TOKEN)",
        ));
    };
    match extract_bearer_token(headers) {
        Some(presented) if presented == expected => Ok(()),
        _ => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Invalid admin token",
        )),
    }
}

// ============================================================================
// API key administration
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateApiKeyRequest {
    tenant_id: String,
    name: String,
    #[serde(default)]
    permissions: Vec<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TenantQuery {
    tenant_id: Option<String>,
}

/// POST /admin/api-keys
/// The raw key appears in this response and nowhere else.
async fn create_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    if payload.tenant_id.trim().is_empty() || payload.name.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "tenant_id and name are required",
        ));
    }

    let engine = state.api_keys.clone();
    match run_blocking(move || {
        engine.generate(
            &payload.tenant_id,
            &payload.name,
            payload.permissions,
            payload.expires_at,
        )
    })
    .await?
    {
        Ok(generated) => Ok((
            StatusCode::CREATED,
            Json(json!({
                "api_key": generated.record,
                "raw_key": generated.raw_key,
            })),
        )
            .into_response()),
        Err(err) => {
            error!("api key generation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create API key",
            ))
        }
    }
}

/// GET /admin/api-keys?tenant_id=...
async fn list_api_keys(
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

    let engine = state.api_keys.clone();
    match run_blocking(move || engine.list(&tenant_id)).await? {
        Ok(records) => {
            Ok((StatusCode::OK, Json(json!({ "api_keys": records }))).into_response())
        }
        Err(err) => {
            error!("api key listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list API keys",
            ))
        }
    }
}

/// POST /admin/api-keys/:id/revoke
async fn revoke_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let engine = state.api_keys.clone();
    let key_id = id.clone();
    match run_blocking(move || engine.revoke(&key_id)).await? {
        Ok(()) => Ok((StatusCode::OK, Json(json!({ "status": "revoked", "id": id }))).into_response()),
        Err(AccessStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "API key not found",
        )),
        Err(err) => {
            error!("api key revoke failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to revoke API key",
            ))
        }
    }
}

/// POST /admin/api-keys/:id/regenerate
/// Rotates the secret in place; existing copies of the old key stop working.
async fn regenerate_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let engine = state.api_keys.clone();
    match run_blocking(move || engine.regenerate(&id)).await? {
        Ok(generated) => Ok((
            StatusCode::OK,
            Json(json!({
                "api_key": generated.record,
                "raw_key": generated.raw_key,
            })),
        )
            .into_response()),
        Err(AccessStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "API key not found",
        )),
        Err(err) => {
            error!("api key regenerate failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to regenerate API key",
            ))
        }
    }
}

/// DELETE /admin/api-keys/:id
async fn delete_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let engine = state.api_keys.clone();
    let key_id = id.clone();
    match run_blocking(move || engine.delete(&key_id)).await? {
        Ok(()) => Ok((StatusCode::OK, Json(json!({ "status": "deleted", "id": id }))).into_response()),
        Err(AccessStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "API key not found",
        )),
        Err(err) => {
            error!("api key delete failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to delete API key",
            ))
        }
    }
}

// ============================================================================
// Portal access administration
// ============================================================================

#[derive(Debug, Deserialize)]
struct GrantPortalAccessRequest {
    tenant_id: String,
    client_id: String,
    email: String,
    name: Option<String>,
    expiry: Option<ExpiryPolicy>,
}

#[derive(Debug, Deserialize)]
struct PortalListQuery {
    tenant_id: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateExpiryRequest {
    expiry: ExpiryPolicy,
}

fn portal_url(state: &AppState, raw_token: &str) -> Option<String> {
    state.config.portal_base_url.as_ref().map(|base| {
        format!(
            "{}/portal?token={}",
            base.trim_end_matches('/'),
            urlencoding::encode(raw_token)
        )
    })
}

/// POST /admin/portal-access
/// The raw token appears in this response and nowhere else.
async fn grant_portal_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GrantPortalAccessRequest>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    if payload.tenant_id.trim().is_empty() || payload.client_id.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "tenant_id and client_id are required",
        ));
    }
    if !payload.email.contains('@') {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "email is not a valid address",
        ));
    }

    let engine = state.portal.clone();
    let expiry = payload.expiry.unwrap_or(ExpiryPolicy::OneMonth);
    match run_blocking(move || {
        engine.grant(
            &payload.tenant_id,
            &payload.client_id,
            &payload.email,
            payload.name,
            expiry,
        )
    })
    .await?
    {
        Ok(granted) => {
            let url = portal_url(&state, &granted.raw_token);
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "portal_access": granted.record,
                    "raw_token": granted.raw_token,
                    "portal_url": url,
                })),
            )
                .into_response())
        }
        Err(AccessStoreError::AlreadyGranted { email }) => Err(error_response(
            StatusCode::CONFLICT,
            &format!("{} already has portal access for this client", email),
        )),
        Err(err) => {
            error!("portal grant failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to grant portal access",
            ))
        }
    }
}

/// GET /admin/portal-access?tenant_id=...&client_id=...
async fn list_portal_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PortalListQuery>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let Some(tenant_id) = query.tenant_id.filter(|value| !value.trim().is_empty()) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "tenant_id query parameter is required",
        ));
    };

    let engine = state.portal.clone();
    match run_blocking(move || engine.list(&tenant_id, query.client_id.as_deref())).await? {
        Ok(records) => {
            Ok((StatusCode::OK, Json(json!({ "portal_access": records }))).into_response())
        }
        Err(err) => {
            error!("portal listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list portal access",
            ))
        }
    }
}

/// POST /admin/portal-access/:id/revoke
async fn revoke_portal_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let engine = state.portal.clone();
    let access_id = id.clone();
    match run_blocking(move || engine.revoke(&access_id)).await? {
        Ok(()) => Ok((StatusCode::OK, Json(json!({ "status": "revoked", "id": id }))).into_response()),
        Err(AccessStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Portal access not found",
        )),
        Err(err) => {
            error!("portal revoke failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to revoke portal access",
            ))
        }
    }
}

/// POST /admin/portal-access/:id/expiry
/// Recomputes the expiry window from now; the token itself is unchanged.
async fn update_portal_expiry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<UpdateExpiryRequest>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let engine = state.portal.clone();
    match run_blocking(move || {
        engine.update_expiry(&id, payload.expiry)?;
        engine.get(&id)
    })
    .await?
    {
        Ok(Some(record)) => {
            Ok((StatusCode::OK, Json(json!({ "portal_access": record }))).into_response())
        }
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Portal access not found",
        )),
        Err(AccessStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Portal access not found",
        )),
        Err(err) => {
            error!("portal expiry update failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update portal access",
            ))
        }
    }
}

/// POST /admin/portal-access/:id/regenerate
async fn regenerate_portal_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let engine = state.portal.clone();
    match run_blocking(move || engine.regenerate(&id)).await? {
        Ok(granted) => {
            let url = portal_url(&state, &granted.raw_token);
            Ok((
                StatusCode::OK,
                Json(json!({
                    "portal_access": granted.record,
                    "raw_token": granted.raw_token,
                    "portal_url": url,
                })),
            )
                .into_response())
        }
        Err(AccessStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Portal access not found",
        )),
        Err(err) => {
            error!("portal regenerate failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to regenerate portal access",
            ))
        }
    }
}

/// DELETE /admin/portal-access/:id
async fn delete_portal_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    require_admin(&state, &headers)?;
    let engine = state.portal.clone();
    let access_id = id.clone();
    match run_blocking(move || engine.delete(&access_id)).await? {
        Ok(()) => Ok((StatusCode::OK, Json(json!({ "status": "deleted", "id": id }))).into_response()),
        Err(AccessStoreError::NotFound { .. }) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Portal access not found",
        )),
        Err(err) => {
            error!("portal delete failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to delete portal access",
            ))
        }
    }
}

pub(super) fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/api-keys", post(create_api_key).get(list_api_keys))
        .route("/admin/api-keys/:id", delete(delete_api_key))
        .route("/admin/api-keys/:id/revoke", post(revoke_api_key))
        .route("/admin/api-keys/:id/regenerate", post(regenerate_api_key))
        .route(
            "/admin/portal-access",
            post(grant_portal_access).get(list_portal_access),
        )
        .route("/admin/portal-access/:id", delete(delete_portal_access))
        .route("/admin/portal-access/:id/revoke", post(revoke_portal_access))
        .route("/admin/portal-access/:id/expiry", post(update_portal_expiry))
        .route(
            "/admin/portal-access/:id/regenerate",
            post(regenerate_portal_access),
        )
        .with_state(state)
}
