//! HTTP entry point: subdomain routing plus the application router.
//!
//! Every request first passes the workspace middleware. Hosts of the form
//! `<user>--<repo>.<base-domain>` are authenticated, tied to a workspace
//! session cookie, and proxied to their machine; everything else falls
//! through to the application routes untouched.

pub mod pages;
pub mod proxy;
pub mod session;
pub mod subdomain;

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::{HOST, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::workspace::{WorkspaceError, WorkspaceKey, WorkspaceRegistry};

use self::proxy::StreamingProxy;
use self::subdomain::SubdomainError;

/// Shared state for the gateway middleware and the application handlers.
pub struct GatewayState {
    pub registry: WorkspaceRegistry,
    pub proxy: StreamingProxy,
    pub authenticator: Arc<dyn Authenticator>,
    pub base_domain: String,
}

/// Build the public router: application routes wrapped by the workspace
/// middleware.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(landing))
        .route("/healthz", get(healthz))
        .route("/auth/github", get(auth_login))
        .route("/api/workspaces/{user}/{repo}/machine", get(machine_status))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            workspace_gateway,
        ))
        .with_state(state)
}

/// Middleware dispatching workspace-host requests to the streaming proxy.
pub async fn workspace_gateway(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(host) = request_host(&request) else {
        return next.run(request).await;
    };
    if !subdomain::is_workspace_host(&host) {
        return next.run(request).await;
    }

    let (user, repo) = match subdomain::parse_subdomain(&host) {
        Ok(parts) => parts,
        Err(SubdomainError::NotWorkspace) => return pages::invalid_subdomain(),
        Err(SubdomainError::Malformed) => return pages::malformed_subdomain(),
    };

    let secure = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|p| p.eq_ignore_ascii_case("https"))
        .unwrap_or(false);

    if state
        .authenticator
        .principal(request.headers())
        .await
        .is_none()
    {
        let scheme = if secure { "https" } else { "http" };
        let base = subdomain::base_host(&host).unwrap_or(&state.base_domain);
        return Redirect::temporary(&format!("{scheme}://{base}/auth/github")).into_response();
    }

    let (session_id, new_session) =
        match session::cookie_value(request.headers(), session::SESSION_COOKIE)
            .filter(|id| session::is_valid_session_id(id))
        {
            Some(id) => (id, false),
            None => (session::new_session_id(), true),
        };

    let key = WorkspaceKey {
        session_id: session_id.clone(),
        user,
        repo,
    };
    let handle = state.registry.get_or_create(key.clone()).await;

    let mut response = match handle.ensure_machine().await {
        Ok(machine_id) => {
            info!(workspace = %key, machine_id = %machine_id, "proxying to workspace");
            state.proxy.forward(&machine_id, request).await
        }
        Err(e) => {
            warn!(workspace = %key, error = %e, "workspace not ready");
            pages::starting_workspace()
        }
    };

    if new_session {
        response.headers_mut().append(
            SET_COOKIE,
            session::set_cookie(&session_id, &state.base_domain, secure),
        );
    }
    response
}

fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

async fn landing() -> &'static str {
    "eureka: open <user>--<repo> on this domain to enter a workspace\n"
}

async fn healthz() -> &'static str {
    "ok"
}

/// OAuth login lives in the upstream authenticator deployment; this route
/// only exists so unauthenticated redirects have somewhere to land in
/// development.
async fn auth_login() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        "login is handled by the authenticator service",
    )
        .into_response()
}

async fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// Pre-provisioning polling surface for the landing UI: reports the machine
/// id for the caller's session once one exists.
async fn machine_status(
    State(state): State<Arc<GatewayState>>,
    Path((user, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session::cookie_value(&headers, session::SESSION_COOKIE)
        .filter(|id| session::is_valid_session_id(id))
    else {
        return Json(json!({ "machine_id": null })).into_response();
    };

    let handle = state
        .registry
        .get_or_create(WorkspaceKey {
            session_id,
            user,
            repo,
        })
        .await;
    match handle.machine_id().await {
        Ok(id) => Json(json!({ "machine_id": id })).into_response(),
        Err(WorkspaceError::NoMachine) => Json(json!({ "machine_id": null })).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
