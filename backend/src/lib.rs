//! Lodestar Control Plane
//!
//! One process hosting the auth manager, config service, service registry,
//! and short-url resolver behind a single HTTP surface. The binary in
//! `main.rs` is a thin shell over [`build_node`] and [`create_router`].

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

use crate::config::AppConfig;
use axum::Router;
use lodestar_auth::AuthManager;
use lodestar_config::{ConfigOptions, ConfigService};
use lodestar_core::traits::{Component, NodeContext};
use lodestar_kv::{EtcdConfig, EtcdStore, KvStore, MemoryStore};
use lodestar_registry::{Registry, RegistryOptions};
use lodestar_shorturl::{ShortUrlOptions, ShortUrlService};
use lodestar_supervisor::{Supervisor, SupervisorOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub config: Arc<ConfigService>,
    pub registry: Arc<Registry>,
    pub shorturl: Arc<ShortUrlService>,
}

/// Open the configured KV backend.
pub async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    match config.store.backend.as_str() {
        "memory" => {
            tracing::warn!("using the in-process KV store; state will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
        "etcd" => {
            let store = EtcdStore::connect(EtcdConfig {
                endpoints: config.store.endpoints.clone(),
                request_timeout: Duration::from_secs(config.store.request_timeout_secs),
                username: config.store.username.clone(),
                password: config.store.password.clone(),
            })
            .await?;
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown store backend {other:?}"),
    }
}

/// Construct every component, wire the supervisor, and initialize in
/// dependency order: config first (others load their settings from it),
/// then auth, registry, and shorturl.
pub async fn build_node(
    kv: Arc<dyn KvStore>,
    app_config: AppConfig,
) -> anyhow::Result<(AppState, Supervisor)> {
    let config_service = Arc::new(ConfigService::new(
        Arc::clone(&kv),
        ConfigOptions {
            prefix: "/aio/config/".to_string(),
            salt: app_config.node.config_salt.clone(),
        },
    )?);
    let auth = Arc::new(AuthManager::new(Arc::clone(&kv), app_config.auth.clone()));
    let registry = Arc::new(Registry::new(Arc::clone(&kv), RegistryOptions::default())?);
    let shorturl = Arc::new(ShortUrlService::new(
        Arc::clone(&kv),
        ShortUrlOptions::default(),
    ));

    let ctx = NodeContext {
        node_id: app_config.node.id.clone(),
        environment: app_config.node.environment.parse().unwrap_or_default(),
    };
    let supervisor = Supervisor::new(
        ctx,
        SupervisorOptions {
            config_dir: app_config.node.config_dir.clone().map(PathBuf::from),
        },
    )
    .with_config_service(Arc::clone(&config_service));

    supervisor
        .register(Arc::clone(&config_service) as Arc<dyn Component>)
        .await?;
    supervisor
        .register(Arc::clone(&auth) as Arc<dyn Component>)
        .await?;
    supervisor
        .register(Arc::clone(&registry) as Arc<dyn Component>)
        .await?;
    supervisor
        .register(Arc::clone(&shorturl) as Arc<dyn Component>)
        .await?;

    let state = AppState {
        auth,
        config: config_service,
        registry,
        shorturl,
    };
    Ok((state, supervisor))
}

/// Assemble the HTTP surface: public login/resolution routes, and the
/// protected API behind the authentication + authorization layers.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(routes::auth::protected_router())
        .merge(routes::config::router())
        .merge(routes::registry::router())
        .merge(routes::shorturl::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::authorize,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(routes::auth::public_router())
        .merge(routes::resolve::router())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
