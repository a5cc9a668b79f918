// Registry API

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use lodestar_core::types::Environment;
use lodestar_registry::ServiceInstance;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    #[serde(default)]
    pub env: Option<Environment>,
}

async fn register(
    State(state): State<AppState>,
    Json(instance): Json<ServiceInstance>,
) -> Result<Json<ServiceInstance>, ApiError> {
    Ok(Json(state.registry.register(instance).await?))
}

async fn renew(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.renew(&id).await?;
    Ok(Json(serde_json::json!({"renewed": id})))
}

async fn unregister(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.unregister(&name, &id).await?;
    Ok(Json(serde_json::json!({"unregistered": id})))
}

async fn discover(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<Vec<ServiceInstance>>, ApiError> {
    let instances = match query.env {
        Some(env) => state.registry.discover_by_env(&name, env).await?,
        None => state.registry.discover(&name).await?,
    };
    Ok(Json(instances))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/registry/services", post(register))
        .route("/api/registry/instances/:id/renew", put(renew))
        .route("/api/registry/services/:name/:id", delete(unregister))
        .route("/api/registry/services/:name", get(discover))
}
