// Public short-link resolution endpoint
//
// `GET /:code` on any configured short domain. Url targets answer with a
// 302 to the resolved URL; UrlScheme targets answer with the landing
// payload (primary scheme URL plus browser fallback) for the renderer.

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Host, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lodestar_shorturl::TargetType;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    #[serde(default)]
    pub password: Option<String>,
}

async fn resolve(
    State(state): State<AppState>,
    Host(host): Host,
    Path(code): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Response, ApiError> {
    // The Host header may carry a port; domains are keyed by bare host.
    let host = host.split(':').next().unwrap_or(&host).to_string();
    let link = state
        .shorturl
        .visit(&host, &code, query.password.as_deref())
        .await?;
    let target = link.target();

    let response = match target.target_type {
        TargetType::Url => (
            StatusCode::FOUND,
            [(header::LOCATION, target.url)],
        )
            .into_response(),
        TargetType::UrlScheme => Json(serde_json::json!({
            "schemeUrl": target.url,
            "fallbackUrl": target.backup_url,
            "targetConfig": link.target_config,
        }))
        .into_response(),
    };
    Ok(response)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:code", get(resolve))
}
