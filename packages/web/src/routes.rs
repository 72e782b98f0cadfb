//! # HTTP surface
//!
//! JSON in, JSON out. Successful responses carry `"success": true` plus a payload
//! field; failures are `{"success": false, "error": msg}`.
//!
//! | Method | Path | Admin | Response |
//! |--------|------|-------|----------|
//! | GET | `/health` | | `{ok: true}` |
//! | POST | `/uploadImage` | yes | `{url}` |
//! | POST | `/publish` | yes | `{item}` |
//! | POST | `/update` | yes | `{item}` |
//! | POST | `/delete` | yes | `{deleted}` |
//! | GET | `/list?type=` | | `{items}` |
//! | GET | `/item?type=&id=` | | `{item}` |
//! | GET | `/latest?limit=` | | `{items}`, limit clamped to 1..=12, default 6 |
//! | POST | `/updateCover` | yes | `{cover}` |
//! | GET | `/cover` | | `{cover}` or `{cover: null}` |
//! | POST | `/deleteDemo` | yes | `{deleted}` |
//! | GET | `/stats?demo=` | | `{stats}` |
//!
//! `/assets/*` and `/data/*` are served from disk, so the server doubles as the static
//! snapshot origin.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use store::{CoverPayload, ItemKind, ItemPayload};

use crate::auth::require_admin;
use crate::database::{DbError, FileDatabase};
use crate::settings::Settings;
use crate::uploads;

pub const DEFAULT_LATEST: usize = 6;
pub const MAX_LATEST: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Db(#[from] DbError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Db(DbError::Invalid(_)) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Db(DbError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

type Result<T> = std::result::Result<T, AppError>;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<FileDatabase>,
    pub uploads_dir: PathBuf,
    pub admin_token: Arc<str>,
}

impl AppState {
    pub fn new(settings: &Settings) -> Self {
        Self {
            db: Arc::new(FileDatabase::new(&settings.storage.data)),
            uploads_dir: settings.storage.uploads(),
            admin_token: settings.admin.token.as_str().into(),
        }
    }
}

fn ok(mut body: Value) -> Json<Value> {
    body["success"] = Value::Bool(true);
    Json(body)
}

fn string_field<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or("").trim()
}

fn supported_kind(raw: &str) -> Result<ItemKind> {
    ItemKind::from_str(raw).map_err(|_| AppError::BadRequest(format!("Unsupported type: {raw}")))
}

/// Item payload from a request body. `__backendId` is accepted in place of `id`.
fn item_payload(mut body: Value, require_id: bool) -> Result<ItemPayload> {
    let kind = string_field(&body, "type").to_string();
    if kind.is_empty() {
        return Err(AppError::BadRequest("Missing type".into()));
    }
    if string_field(&body, "id").is_empty() {
        let legacy = string_field(&body, "__backendId").to_string();
        if !legacy.is_empty() {
            body["id"] = Value::String(legacy);
        }
    }
    if require_id && string_field(&body, "id").is_empty() {
        return Err(AppError::BadRequest("Missing id".into()));
    }
    let kind = supported_kind(&kind)?;
    body["type"] = Value::String(kind.as_str().to_string());
    serde_json::from_value(body).map_err(|e| AppError::BadRequest(e.to_string()))
}

async fn health() -> Json<Value> {
    ok(json!({ "ok": true }))
}

async fn upload_image(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let url = uploads::save_image(
        &state.uploads_dir,
        string_field(&body, "filename"),
        string_field(&body, "data"),
        string_field(&body, "mimeType"),
    )
    .await?;
    Ok(ok(json!({ "url": url })))
}

async fn publish(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let item = state.db.publish(item_payload(body, false)?).await?;
    Ok(ok(json!({ "item": item })))
}

async fn update(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let item = state.db.update(item_payload(body, true)?).await?;
    Ok(ok(json!({ "item": item })))
}

async fn delete(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let (kind, id) = (string_field(&body, "type"), string_field(&body, "id"));
    if kind.is_empty() || id.is_empty() {
        return Err(AppError::BadRequest("Missing type or id".into()));
    }
    let deleted = state.db.delete(supported_kind(kind)?, id).await?;
    Ok(ok(json!({ "deleted": deleted })))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let raw = query.get("type").map(|s| s.trim()).unwrap_or("");
    if raw.is_empty() {
        return Err(AppError::BadRequest("Missing type".into()));
    }
    let items = match ItemKind::from_str(raw) {
        Ok(kind) => state.db.list(kind).await?,
        Err(_) => Vec::new(),
    };
    Ok(ok(json!({ "items": items })))
}

async fn item(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let kind = query.get("type").map(|s| s.trim()).unwrap_or("");
    let id = query.get("id").map(|s| s.trim()).unwrap_or("");
    if kind.is_empty() || id.is_empty() {
        return Err(AppError::BadRequest("Missing type or id".into()));
    }
    let kind = ItemKind::from_str(kind).map_err(|_| DbError::NotFound)?;
    let item = state.db.get(kind, id).await?;
    Ok(ok(json!({ "item": item })))
}

/// `limit` clamped to `1..=12`; missing or unparsable means the default.
pub fn clamp_limit(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .map(|n| n.clamp(1.0, MAX_LATEST as f64) as usize)
        .unwrap_or(DEFAULT_LATEST)
}

async fn latest(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let limit = clamp_limit(query.get("limit").map(String::as_str));
    let items = state.db.latest(limit).await?;
    Ok(ok(json!({ "items": items })))
}

async fn update_cover(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(body) = body?;
    let payload: CoverPayload =
        serde_json::from_value(body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let cover = state.db.set_cover(payload).await?;
    Ok(ok(json!({ "cover": cover })))
}

async fn cover(State(state): State<AppState>) -> Result<Json<Value>> {
    let cover = state.db.cover().await?;
    Ok(ok(json!({ "cover": cover })))
}

async fn delete_demo(State(state): State<AppState>) -> Result<Json<Value>> {
    let deleted = state.db.delete_all_demo().await?;
    Ok(ok(json!({ "deleted": deleted })))
}

async fn stats(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let demo_only = query
        .get("demo")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    let stats = state.db.stats(demo_only).await?;
    Ok(ok(json!({ "stats": stats })))
}

pub fn router(settings: &Settings) -> Router {
    let state = AppState::new(settings);

    let admin = Router::new()
        .route("/uploadImage", post(upload_image))
        .route("/publish", post(publish))
        .route("/update", post(update))
        .route("/delete", post(delete))
        .route("/updateCover", post(update_cover))
        .route("/deleteDemo", post(delete_demo))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(health))
        .route("/list", get(list))
        .route("/item", get(item))
        .route("/latest", get(latest))
        .route("/cover", get(cover))
        .route("/stats", get(stats))
        .merge(admin)
        .nest_service("/assets", ServeDir::new(&settings.storage.assets))
        .nest_service("/data", ServeDir::new(&settings.storage.data))
        .layer(DefaultBodyLimit::max(settings.storage.limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
