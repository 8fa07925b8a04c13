//! The page shell.
//!
//! Pages are a prebuilt single-page app in `server.static_dir`. The manager
//! and customer trees serve it behind the routing guard; every other path
//! serves it openly. Unknown paths fall back to `index.html` so client-side
//! routes survive a reload.

use axum::{middleware, Router};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

use crate::guard::page_guard;
use crate::AppState;

/// Static files from `dir`, with `index.html` for anything not found
pub fn shell(dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")))
}

/// The guarded manager and customer page trees.
///
/// Prefixes come from a validated [`crate::config::Config`], so neither trims to `/`.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let shell = shell(&state.config.server.static_dir);
    let guard = &state.config.guard;

    Router::new()
        .nest_service(guard.manager_prefix.trim_end_matches('/'), shell.clone())
        .nest_service(guard.customer_prefix.trim_end_matches('/'), shell)
        .layer(middleware::from_fn_with_state(state.clone(), page_guard))
}
