// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the toggle service.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::SvcState;

/// Build the axum `Router` with all service routes. Every endpoint is
/// POST-only; axum answers 405 for anything else.
pub fn build_router(state: Arc<SvcState>, timeout: Duration) -> Router {
    Router::new()
        // Client path
        .route("/client/code-toggles", post(http::code_toggles))
        .route("/client/alive", post(http::alive))
        // Admin path
        .route("/apps", post(http::apps))
        .route("/apps/add", post(http::apps_add))
        .route("/toggles/add", post(http::toggles_add))
        .route("/toggles/edit", post(http::toggles_edit))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}
