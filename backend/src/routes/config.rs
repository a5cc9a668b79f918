// Config API

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use lodestar_config::{ConfigEntry, TypedValue};
use lodestar_core::types::Environment;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub value: HashMap<String, TypedValue>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When set, the entry is stored as an environment overlay.
    #[serde(default)]
    pub environment: Option<Environment>,
}

#[derive(Debug, Deserialize)]
pub struct EnvQuery {
    #[serde(default)]
    pub env: Option<Environment>,
    #[serde(default)]
    pub fallbacks: Option<String>,
}

impl EnvQuery {
    fn fallback_list(&self) -> Vec<Environment> {
        self.fallbacks
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub blob: String,
    pub password: String,
    #[serde(default)]
    pub skip_existing: bool,
}

async fn get_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<EnvQuery>,
) -> Result<Json<ConfigEntry>, ApiError> {
    let entry = match query.env {
        Some(env) => {
            state
                .config
                .get_for_environment(&key, env, &query.fallback_list())
                .await?
        }
        None => state.config.get(&key).await?,
    };
    Ok(Json(entry))
}

async fn set_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<SetConfigRequest>,
) -> Result<Json<ConfigEntry>, ApiError> {
    let entry = match request.environment {
        Some(env) => {
            state
                .config
                .set_for_environment(&key, env, request.value, request.metadata)
                .await?
        }
        None => state.config.set(&key, request.value, request.metadata).await?,
    };
    Ok(Json(entry))
}

async fn composite(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<EnvQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let resolved = match query.env {
        Some(env) => {
            state
                .config
                .composite_for_environment(&key, env, &query.fallback_list())
                .await?
        }
        None => state.config.composite(&key).await?,
    };
    Ok(Json(serde_json::Value::Object(resolved)))
}

async fn history(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let revisions = state.config.get_history(&key, query.limit).await?;
    let body: Vec<serde_json::Value> = revisions
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "entry": r.entry,
                "mod_revision": r.mod_revision,
            })
        })
        .collect();
    Ok(Json(serde_json::Value::Array(body)))
}

async fn environments(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HashMap<String, Vec<ConfigEntry>>>, ApiError> {
    Ok(Json(state.config.list_by_environment(&key).await?))
}

async fn export(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let blob = state.config.export_all(&request.password).await?;
    Ok(Json(serde_json::json!({"blob": blob})))
}

async fn import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let skipped = state
        .config
        .import_all(&request.blob, &request.password, request.skip_existing)
        .await?;
    Ok(Json(serde_json::json!({"skipped": skipped})))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/config/export", post(export))
        .route("/api/config/import", post(import))
        .route("/api/config/:key", get(get_entry).put(set_entry))
        .route("/api/config/:key/composite", get(composite))
        .route("/api/config/:key/history", get(history))
        .route("/api/config/:key/environments", get(environments))
}
