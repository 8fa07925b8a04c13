//! Page routing guard.
//!
//! [`authorize`] decides, from the request path and the session cookie
//! alone, whether a page request passes or is redirected:
//!
//! - no cookie, or one that does not decode: to the login page
//! - a manager outside the manager tree: to the manager landing page
//! - a customer outside the customer tree: to the customer landing page
//! - anything else passes untouched
//!
//! Decoding errors are indistinguishable from a missing cookie. The guard
//! never writes cookies and never touches the database.

use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::auth::{Role, SessionCodec};
use crate::config::GuardConfig;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Pass,
    Redirect(String),
}

/// Segment-aware prefix test: `/manager/x` is under `/manager`,
/// `/managerial` is not.
pub fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub fn authorize(
    path: &str,
    token: Option<&str>,
    codec: &SessionCodec,
    config: &GuardConfig,
) -> GuardDecision {
    let session = match token.map(|t| codec.decode(t)) {
        Some(Ok(session)) => session,
        Some(Err(e)) => {
            tracing::debug!(path = %path, "Rejected session cookie: {}", e);
            return GuardDecision::Redirect(config.login_page.clone());
        }
        None => return GuardDecision::Redirect(config.login_page.clone()),
    };

    let (prefix, landing) = match session.role {
        Role::Manager => (&config.manager_prefix, &config.manager_landing),
        Role::Customer => (&config.customer_prefix, &config.customer_landing),
    };

    if is_under(path, prefix) {
        GuardDecision::Pass
    } else {
        GuardDecision::Redirect(landing.clone())
    }
}

/// Middleware applying [`authorize`] to the guarded page trees
pub async fn page_guard(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Nested services see a stripped path; decide on the one the client sent.
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let jar = CookieJar::from_headers(request.headers());
    let token = jar.get(state.sessions.cookie_name()).map(|c| c.value());

    match authorize(&path, token, &state.sessions, &state.config.guard) {
        GuardDecision::Pass => next.run(request).await,
        GuardDecision::Redirect(target) => {
            tracing::debug!(path = %path, target = %target, "Guard redirect");
            Redirect::temporary(&target).into_response()
        }
    }
}
