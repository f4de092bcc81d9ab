// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the toggle service.
//!
//! Bodies are decoded by hand so every malformed request maps to a bare
//! 400 and never leaks extractor internals.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, SvcError};
use crate::toggle::{Key, Keys};
use crate::SvcState;

/// Header carrying a previously issued session ID.
const HEADER_TOGGLE_ID: &str = "x-codetoggleid";

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TogglesRequest {
    pub app: String,
    pub version: String,
    pub platform: String,
}

#[derive(Debug, Serialize)]
pub struct TogglesResponse {
    pub id: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AliveRequest {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct AddAppsRequest {
    pub apps: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedKey {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddTogglesRequest {
    pub app: String,
    pub version: String,
    pub platforms: Vec<String>,
    pub keys: Vec<SeedKey>,
}

#[derive(Debug, Deserialize)]
pub struct EditToggleRequest {
    pub app: String,
    pub version: String,
    pub platform: String,
    pub key: String,
    pub rate: f64,
}

// -- Helpers ------------------------------------------------------------------

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, SvcError> {
    serde_json::from_slice(body).map_err(|_| SvcError::BadRequest)
}

/// Empty JSON-typed response body, as admin endpoints answer.
fn empty_json() -> Response {
    ([(header::CONTENT_TYPE, "application/json")], "").into_response()
}

// -- Handlers -----------------------------------------------------------------

/// `POST /client/code-toggles` — resolve the enabled key set for a client.
pub async fn code_toggles(
    State(s): State<Arc<SvcState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TogglesResponse>, ApiError> {
    const EP: &str = "client-get-toggles";

    let req: TogglesRequest = decode(&body).map_err(|e| e.at(EP))?;

    let presented = headers
        .get(HEADER_TOGGLE_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let (id, keys) = s
        .engine
        .code_toggles(&req.app, &req.version, &req.platform, presented)
        .await
        .map_err(|e| e.at(EP))?;

    Ok(Json(TogglesResponse { id: id.unwrap_or_default(), keys }))
}

/// `POST /client/alive` — heartbeat for a session ID.
pub async fn alive(
    State(s): State<Arc<SvcState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    const EP: &str = "client-alive";

    let req: AliveRequest = decode(&body).map_err(|e| e.at(EP))?;

    s.engine.heartbeat(&req.id).await.map_err(|e| e.at(EP))?;

    Ok(empty_json())
}

/// `POST /apps` — list application names.
pub async fn apps(State(s): State<Arc<SvcState>>) -> Result<Json<Vec<String>>, ApiError> {
    const EP: &str = "apps-get";

    let apps = s.catalog.apps().await.map_err(|e| e.at(EP))?;

    Ok(Json(apps))
}

/// `POST /apps/add` — register application names.
pub async fn apps_add(
    State(s): State<Arc<SvcState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    const EP: &str = "apps-add";

    let req: AddAppsRequest = decode(&body).map_err(|e| e.at(EP))?;

    if req.apps.is_empty() {
        return Err(SvcError::BadRequest.at(EP));
    }

    s.catalog.add_apps(&req.apps).await.map_err(|e| e.at(EP))?;

    Ok(empty_json())
}

/// `POST /toggles/add` — seed a segment with toggle keys. An enabled
/// key starts at rate 1.0, a disabled one at 0.0.
pub async fn toggles_add(
    State(s): State<Arc<SvcState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    const EP: &str = "toggles-add";

    let req: AddTogglesRequest = decode(&body).map_err(|e| e.at(EP))?;

    let app_id = s.catalog.app_id(&req.app).await.map_err(|e| e.at(EP))?;

    let keys: Keys = req
        .keys
        .into_iter()
        .map(|k| Key { id: 0, rate: if k.enabled { 1.0 } else { 0.0 }, name: k.name })
        .collect();

    s.catalog
        .add_features(app_id, &req.version, &req.platforms, keys)
        .await
        .map_err(|e| e.at(EP))?;

    Ok(empty_json())
}

/// `POST /toggles/edit` — change the roll-out rate of one key.
pub async fn toggles_edit(
    State(s): State<Arc<SvcState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    const EP: &str = "toggles-edit";

    let req: EditToggleRequest = decode(&body).map_err(|e| e.at(EP))?;

    let app_id = s.catalog.app_id(&req.app).await.map_err(|e| e.at(EP))?;

    s.catalog
        .edit_feature(app_id, &req.version, &req.platform, &req.key, req.rate)
        .await
        .map_err(|e| e.at(EP))?;

    Ok(empty_json())
}
