use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::store::{Author, HelpdeskStoreError, Ticket, TicketComment, TicketPriority, TicketStatus};

use super::auth::{
    authenticate_api_key, authenticate_portal, error_response, require_permission, run_blocking,
};
use super::state::AppState;

// ============================================================================
// Staff API (API key)
// ============================================================================

#[derive(Debug, Deserialize)]
struct TicketListQuery {
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTicketRequest {
    client_id: String,
    subject: String,
    #[serde(default)]
    description: String,
    priority: Option<TicketPriority>,
    requester_email: String,
    requester_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateCommentRequest {
    body: String,
    #[serde(default)]
    is_internal: bool,
    /// Staff member to attribute the comment to; omitted means automation.
    member_id: Option<String>,
}

/// GET /api/tickets
async fn list_tickets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TicketListQuery>,
) -> Result<Response, Response> {
    let context = authenticate_api_key(&state, &headers).await?;
    require_permission(&context, "tickets:read")?;

    let store = state.store.clone();
    let tenant_id = context.tenant_id.clone();
    let result = run_blocking(move || match query.client_id.as_deref() {
        Some(client_id) => store.list_tickets_for_client(&tenant_id, client_id),
        None => store.list_tickets(&tenant_id),
    })
    .await?;

    match result {
        Ok(tickets) => Ok((StatusCode::OK, Json(json!({ "tickets": tickets }))).into_response()),
        Err(err) => {
            error!("ticket listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list tickets",
            ))
        }
    }
}

/// POST /api/tickets
async fn create_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateTicketRequest>,
) -> Result<Response, Response> {
    let context = authenticate_api_key(&state, &headers).await?;
    require_permission(&context, "tickets:create")?;

    if payload.subject.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "subject is required"));
    }
    if !payload.requester_email.contains('@') {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "requester_email is not a valid address",
        ));
    }

    let now = Utc::now();
    let ticket = Ticket {
        id: Uuid::new_v4().to_string(),
        tenant_id: context.tenant_id.clone(),
        client_id: payload.client_id.clone(),
        subject: payload.subject.trim().to_string(),
        description: payload.description,
        status: TicketStatus::Open,
        priority: payload.priority.unwrap_or_default(),
        requester_email: payload.requester_email.trim().to_ascii_lowercase(),
        requester_name: payload.requester_name,
        created_by: Some(context.key_id.clone()),
        created_at: now,
        updated_at: now,
    };

    let store = state.store.clone();
    let tenant_id = context.tenant_id.clone();
    let result = run_blocking(move || -> Result<Option<Ticket>, HelpdeskStoreError> {
        let Some(client) = store.get_client(&ticket.client_id)? else {
            return Ok(None);
        };
        if client.tenant_id != tenant_id {
            return Ok(None);
        }
        store.insert_ticket(&ticket)?;
        Ok(Some(ticket))
    })
    .await?;

    match result {
        Ok(Some(ticket)) => {
            Ok((StatusCode::CREATED, Json(json!({ "ticket": ticket }))).into_response())
        }
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Client not found")),
        Err(err) => {
            error!("ticket creation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create ticket",
            ))
        }
    }
}

/// GET /api/tickets/:id
async fn get_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let context = authenticate_api_key(&state, &headers).await?;
    require_permission(&context, "tickets:read")?;

    let store = state.store.clone();
    let result = run_blocking(move || store.get_ticket(&id)).await?;
    match result {
        Ok(Some(ticket)) if ticket.tenant_id == context.tenant_id => {
            Ok((StatusCode::OK, Json(json!({ "ticket": ticket }))).into_response())
        }
        Ok(_) => Err(error_response(StatusCode::NOT_FOUND, "Ticket not found")),
        Err(err) => {
            error!("ticket lookup failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load ticket",
            ))
        }
    }
}

/// GET /api/tickets/:id/comments
/// Staff callers see internal comments.
async fn list_ticket_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let context = authenticate_api_key(&state, &headers).await?;
    require_permission(&context, "comments:read")?;

    let store = state.store.clone();
    let tenant_id = context.tenant_id.clone();
    let result = run_blocking(
        move || -> Result<Option<Vec<TicketComment>>, HelpdeskStoreError> {
            let Some(ticket) = store.get_ticket(&id)? else {
                return Ok(None);
            };
            if ticket.tenant_id != tenant_id {
                return Ok(None);
            }
            store.list_comments(&ticket.id, true).map(Some)
        },
    )
    .await?;

    match result {
        Ok(Some(comments)) => {
            Ok((StatusCode::OK, Json(json!({ "comments": comments }))).into_response())
        }
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Ticket not found")),
        Err(err) => {
            error!("comment listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list comments",
            ))
        }
    }
}

/// POST /api/tickets/:id/comments
async fn create_ticket_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<Response, Response> {
    let context = authenticate_api_key(&state, &headers).await?;
    require_permission(&context, "comments:create")?;

    if payload.body.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "body is required"));
    }
    let author = match payload.member_id {
        Some(member_id) if !member_id.trim().is_empty() => Author::Staff { member_id },
        _ => Author::System,
    };
    let comment = TicketComment {
        id: Uuid::new_v4().to_string(),
        tenant_id: context.tenant_id.clone(),
        ticket_id: id,
        author,
        body: payload.body,
        is_internal: payload.is_internal,
        is_system: false,
        created_at: Utc::now(),
    };

    let store = state.store.clone();
    let tenant_id = context.tenant_id.clone();
    let result = run_blocking(
        move || -> Result<Option<TicketComment>, HelpdeskStoreError> {
            let Some(ticket) = store.get_ticket(&comment.ticket_id)? else {
                return Ok(None);
            };
            if ticket.tenant_id != tenant_id {
                return Ok(None);
            }
            store.append_comment(&comment)?;
            Ok(Some(comment))
        },
    )
    .await?;

    match result {
        Ok(Some(comment)) => {
            Ok((StatusCode::CREATED, Json(json!({ "comment": comment }))).into_response())
        }
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Ticket not found")),
        Err(err) => {
            error!("comment creation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create comment",
            ))
        }
    }
}

// ============================================================================
// Customer portal (portal token)
// ============================================================================

/// GET /portal/tickets
/// Scoped to the client the token was granted for.
async fn portal_list_tickets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let context = authenticate_portal(&state, &headers).await?;

    let store = state.store.clone();
    let result = run_blocking(move || {
        store.list_tickets_for_client(&context.tenant_id, &context.client_id)
    })
    .await?;

    match result {
        Ok(tickets) => Ok((StatusCode::OK, Json(json!({ "tickets": tickets }))).into_response()),
        Err(err) => {
            error!("portal ticket listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list tickets",
            ))
        }
    }
}

/// GET /portal/tickets/:id
async fn portal_get_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let context = authenticate_portal(&state, &headers).await?;

    let store = state.store.clone();
    let result = run_blocking(move || store.get_ticket(&id)).await?;
    match result {
        Ok(Some(ticket))
            if ticket.tenant_id == context.tenant_id && ticket.client_id == context.client_id =>
        {
            Ok((StatusCode::OK, Json(json!({ "ticket": ticket }))).into_response())
        }
        Ok(_) => Err(error_response(StatusCode::NOT_FOUND, "Ticket not found")),
        Err(err) => {
            error!("portal ticket lookup failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load ticket",
            ))
        }
    }
}

/// GET /portal/tickets/:id/comments
/// Internal comments never cross this boundary.
async fn portal_list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let context = authenticate_portal(&state, &headers).await?;

    let store = state.store.clone();
    let result = run_blocking(
        move || -> Result<Option<Vec<TicketComment>>, HelpdeskStoreError> {
            let Some(ticket) = store.get_ticket(&id)? else {
                return Ok(None);
            };
            if ticket.tenant_id != context.tenant_id || ticket.client_id != context.client_id {
                return Ok(None);
            }
            store.list_comments(&ticket.id, false).map(Some)
        },
    )
    .await?;

    match result {
        Ok(Some(comments)) => {
            Ok((StatusCode::OK, Json(json!({ "comments": comments }))).into_response())
        }
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Ticket not found")),
        Err(err) => {
            error!("portal comment listing failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list comments",
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
struct PortalCommentRequest {
    body: String,
}

/// POST /portal/tickets/:id/comments
/// Customer comments are always public.
async fn portal_create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<PortalCommentRequest>,
) -> Result<Response, Response> {
    let context = authenticate_portal(&state, &headers).await?;

    if payload.body.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "body is required"));
    }
    let comment = TicketComment {
        id: Uuid::new_v4().to_string(),
        tenant_id: context.tenant_id.clone(),
        ticket_id: id,
        author: Author::Customer {
            portal_access_id: context.access_id.clone(),
        },
        body: payload.body,
        is_internal: false,
        is_system: false,
        created_at: Utc::now(),
    };

    let store = state.store.clone();
    let result = run_blocking(
        move || -> Result<Option<TicketComment>, HelpdeskStoreError> {
            let Some(ticket) = store.get_ticket(&comment.ticket_id)? else {
                return Ok(None);
            };
            if ticket.tenant_id != context.tenant_id || ticket.client_id != context.client_id {
                return Ok(None);
            }
            store.append_comment(&comment)?;
            Ok(Some(comment))
        },
    )
    .await?;

    match result {
        Ok(Some(comment)) => {
            Ok((StatusCode::CREATED, Json(json!({ "comment": comment }))).into_response())
        }
        Ok(None) => Err(error_response(StatusCode::NOT_FOUND, "Ticket not found")),
        Err(err) => {
            error!("portal comment creation failed: {}", err);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create comment",
            ))
        }
    }
}

pub(super) fn ticket_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/:id", get(get_ticket))
        .route(
            "/api/tickets/:id/comments",
            get(list_ticket_comments).post(create_ticket_comment),
        )
        .route("/portal/tickets", get(portal_list_tickets))
        .route("/portal/tickets/:id", get(portal_get_ticket))
        .route(
            "/portal/tickets/:id/comments",
            get(portal_list_comments).post(portal_create_comment),
        )
        .with_state(state)
}
