//! HTTP API: login, logout, session query and grammar check.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::checker::GrammarChecker;
use crate::error::CheckError;
use crate::session::{AuthError, SessionGate, StoreError, SESSION_COOKIE};

/// Shared state for every handler
pub struct AppState {
    pub gate: SessionGate,
    pub checker: GrammarChecker,
    /// Cookie lifetime, matching the session store TTL
    pub session_ttl_secs: u64,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Build the application router
pub fn router(state: Arc<AppState>, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session))
        .route("/api/grammar", post(check_grammar))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_request_bytes))
        .with_state(state)
}

/// Read the session id out of the request cookies
fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn session_cookie(id: &str, max_age: u64) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax")
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

fn store_failure(err: StoreError) -> Response {
    tracing::error!("session store failed: {}", err);
    failure(StatusCode::INTERNAL_SERVER_ERROR, "Session store unavailable")
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn login(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: LoginRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("malformed login body: {}", e);
            return login_failure(AuthError::MalformedRequest);
        }
    };

    match state.gate.login(&request.username, &request.password).await {
        Ok(session) => (
            StatusCode::OK,
            [(header::SET_COOKIE, session_cookie(&session.id, state.session_ttl_secs))],
            Json(json!({ "success": true, "username": session.username })),
        )
            .into_response(),
        Err(e) => login_failure(e),
    }
}

fn login_failure(err: AuthError) -> Response {
    match err {
        AuthError::InvalidCredentials => failure(StatusCode::UNAUTHORIZED, "Invalid credentials"),
        AuthError::MalformedRequest => failure(StatusCode::BAD_REQUEST, "Invalid request body"),
        AuthError::Store(e) => store_failure(e),
    }
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(e) = state.gate.logout(session_id(&headers).as_deref()).await {
        // the cookie is cleared regardless
        tracing::warn!("failed to remove session: {}", e);
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(json!({ "success": true })),
    )
        .into_response()
}

async fn session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    match state.gate.current(session_id(&headers).as_deref()).await {
        Ok(Some(session)) => Json(json!({ "loggedIn": true, "username": session.username })).into_response(),
        Ok(None) => Json(json!({ "loggedIn": false })).into_response(),
        Err(e) => store_failure(e),
    }
}

async fn check_grammar(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    match state.gate.current(session_id(&headers).as_deref()).await {
        Ok(Some(_)) => {}
        Ok(None) => return CheckError::AuthenticationRequired.into_response(),
        Err(e) => return store_failure(e),
    }

    let text = match extract_text(&body) {
        Some(text) => text,
        None => return CheckError::InvalidInput.into_response(),
    };

    match state.checker.check(&text, None).await {
        Ok(outcome) => Json(json!({
            "success": true,
            "errors": outcome.errors,
            "normalizedText": outcome.normalized_text,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// The `text` field, if the body is JSON and it is a non-empty string
fn extract_text(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("text")? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}
