// ShortURL admin API

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use lodestar_shorturl::{ShortDomain, ShortLink};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub code: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct EnableRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    #[serde(default)]
    pub password: Option<String>,
}

async fn list_domains(State(state): State<AppState>) -> Result<Json<Vec<ShortDomain>>, ApiError> {
    Ok(Json(state.shorturl.list_domains().await?))
}

async fn create_domain(
    State(state): State<AppState>,
    Json(domain): Json<ShortDomain>,
) -> Result<Json<ShortDomain>, ApiError> {
    Ok(Json(state.shorturl.create_domain(domain).await?))
}

async fn update_domain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut domain): Json<ShortDomain>,
) -> Result<Json<ShortDomain>, ApiError> {
    domain.id = id;
    Ok(Json(state.shorturl.update_domain(domain).await?))
}

async fn delete_domain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.shorturl.delete_domain(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

async fn list_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ShortLink>>, ApiError> {
    Ok(Json(state.shorturl.list_links(&id).await?))
}

async fn create_link(
    State(state): State<AppState>,
    Json(link): Json<ShortLink>,
) -> Result<Json<ShortLink>, ApiError> {
    Ok(Json(state.shorturl.create_link(link).await?))
}

async fn update_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut link): Json<ShortLink>,
) -> Result<Json<ShortLink>, ApiError> {
    link.id = id;
    Ok(Json(state.shorturl.update_link(link).await?))
}

async fn set_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EnableRequest>,
) -> Result<Json<ShortLink>, ApiError> {
    Ok(Json(state.shorturl.set_link_enabled(&id, request.enabled).await?))
}

async fn set_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PasswordRequest>,
) -> Result<Json<ShortLink>, ApiError> {
    Ok(Json(
        state
            .shorturl
            .set_link_password(&id, request.password.as_deref())
            .await?,
    ))
}

async fn delete_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.shorturl.delete_link(&id).await?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

async fn report(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .shorturl
        .report(&request.code, &request.event_id, request.attributes)
        .await?;
    Ok(Json(serde_json::json!({"reported": request.code})))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/shorturl/domains", get(list_domains).post(create_domain))
        .route(
            "/api/shorturl/domains/:id",
            put(update_domain).delete(delete_domain),
        )
        .route("/api/shorturl/domains/:id/links", get(list_links))
        .route("/api/shorturl/links", post(create_link))
        .route(
            "/api/shorturl/links/:id",
            put(update_link).delete(delete_link),
        )
        .route("/api/shorturl/links/:id/enabled", put(set_enabled))
        .route("/api/shorturl/links/:id/password", put(set_password))
        .route("/api/shorturl/report", post(report))
}
