//! The cached resolution path and admin surface.

use crate::store::ShortUrlStore;
use crate::types::{ShortDomain, ShortLink, SuccessEvent};
use async_trait::async_trait;
use lodestar_core::traits::{Component, ComponentStatus, NodeContext};
use lodestar_core::types::now_millis;
use lodestar_core::{Error, Result};
use lodestar_crypto::password;
use lodestar_kv::KvStore;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Cache TTLs for the two read-through layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortUrlOptions {
    /// Host → domain cache TTL (seconds). Default 10 minutes.
    pub domain_cache_ttl_secs: u64,
    /// (domain, code) → link cache TTL (seconds). Default 5 minutes.
    pub link_cache_ttl_secs: u64,
}

impl Default for ShortUrlOptions {
    fn default() -> Self {
        Self {
            domain_cache_ttl_secs: 600,
            link_cache_ttl_secs: 300,
        }
    }
}

/// Rebuild a shared loader error into an owned one, preserving the kinds
/// the resolution path distinguishes.
fn shared_err(e: Arc<Error>) -> Error {
    match &*e {
        Error::NotFound(msg) => Error::NotFound(msg.clone()),
        Error::StoreUnavailable(msg) => Error::StoreUnavailable(msg.clone()),
        Error::Serialization(msg) => Error::Serialization(msg.clone()),
        other => Error::Internal(other.to_string()),
    }
}

/// Short-link resolution engine with single-flight read-through caches.
pub struct ShortUrlService {
    store: ShortUrlStore,
    domain_cache: Cache<String, Arc<ShortDomain>>,
    link_cache: Cache<(String, String), Arc<ShortLink>>,
    status: RwLock<ComponentStatus>,
}

impl ShortUrlService {
    pub fn new(kv: Arc<dyn KvStore>, options: ShortUrlOptions) -> Self {
        Self {
            store: ShortUrlStore::new(kv),
            domain_cache: Cache::builder()
                .time_to_live(Duration::from_secs(options.domain_cache_ttl_secs))
                .build(),
            link_cache: Cache::builder()
                .time_to_live(Duration::from_secs(options.link_cache_ttl_secs))
                .build(),
            status: RwLock::new(ComponentStatus::NotInitialized),
        }
    }

    pub fn store(&self) -> &ShortUrlStore {
        &self.store
    }

    // ── Resolution hot path ──────────────────────────────────────

    /// Resolve `host` to its domain through the cache; unknown hosts fall
    /// back to the default-flagged domain.
    async fn resolve_domain(&self, host: &str) -> Result<Arc<ShortDomain>> {
        let store = self.store.clone();
        let host_owned = host.to_string();
        self.domain_cache
            .try_get_with(host_owned.clone(), async move {
                if let Some(domain) = store.find_domain_by_host(&host_owned).await? {
                    return Ok(Arc::new(domain));
                }
                match store.find_default_domain().await? {
                    Some(domain) => Ok(Arc::new(domain)),
                    None => Err(Error::NotFound(format!(
                        "no domain resolvable for host {host_owned}"
                    ))),
                }
            })
            .await
            .map_err(shared_err)
    }

    /// Resolve `(domain, code)` to its link through the cache.
    async fn resolve_link(&self, domain_id: &str, code: &str) -> Result<Arc<ShortLink>> {
        let store = self.store.clone();
        let key = (domain_id.to_string(), code.to_string());
        let (domain_owned, code_owned) = key.clone();
        self.link_cache
            .try_get_with(key, async move {
                match store.find_link(&domain_owned, &code_owned).await? {
                    Some(link) => Ok(Arc::new(link)),
                    None => Err(Error::NotFound(format!("short link {code_owned}"))),
                }
            })
            .await
            .map_err(shared_err)
    }

    /// Validation guards. Never cached: each request re-checks the flags
    /// and counters of the (possibly cached) link row.
    fn validate(link: &ShortLink, supplied_password: Option<&str>) -> Result<()> {
        if !link.enabled {
            return Err(Error::LinkDisabled(link.code.clone()));
        }
        if let Some(expires_at) = link.expires_at {
            if expires_at <= now_millis() {
                return Err(Error::LinkExpired(link.code.clone()));
            }
        }
        if let Some(max_visits) = link.max_visits {
            if link.visit_count >= max_visits {
                return Err(Error::LinkExhausted(link.code.clone()));
            }
        }
        if let Some(hash) = &link.password_hash {
            let Some(supplied) = supplied_password else {
                return Err(Error::PasswordRequired);
            };
            if !password::verify(supplied, hash)? {
                return Err(Error::PasswordWrong);
            }
        }
        Ok(())
    }

    /// Resolve and validate without counting a visit.
    pub async fn lookup(
        &self,
        host: &str,
        code: &str,
        supplied_password: Option<&str>,
    ) -> Result<ShortLink> {
        let domain = self.resolve_domain(host).await?;
        let link = self.resolve_link(&domain.id, code).await?;
        Self::validate(&link, supplied_password)?;
        Ok((*link).clone())
    }

    /// Resolve, validate, and count the visit. The counter increment is the
    /// source of truth for exhaustion, so the link cache is invalidated
    /// after it commits.
    pub async fn visit(
        &self,
        host: &str,
        code: &str,
        supplied_password: Option<&str>,
    ) -> Result<ShortLink> {
        let link = self.lookup(host, code, supplied_password).await?;
        let updated = self.store.increment_visits(&link.id).await?;
        self.invalidate_link(&updated).await;
        Ok(updated)
    }

    /// Idempotent success reporting: a non-empty `event_id` that was already
    /// recorded returns success without side effects.
    pub async fn report(
        &self,
        code: &str,
        event_id: &str,
        attributes: serde_json::Value,
    ) -> Result<()> {
        let link = self
            .store
            .find_link_by_code(code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("short link {code}")))?;

        let event_id = if event_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            if self.store.event_exists(event_id).await? {
                debug!(code, event_id, "duplicate success report ignored");
                return Ok(());
            }
            event_id.to_string()
        };

        let event = SuccessEvent {
            link_id: link.id.clone(),
            event_id,
            attributes,
            created_at: now_millis(),
        };
        self.store.record_success(&link.id, &event).await?;
        self.invalidate_link(&link).await;
        Ok(())
    }

    // ── Admin surface (writes invalidate post-commit) ────────────

    pub async fn create_domain(&self, domain: ShortDomain) -> Result<ShortDomain> {
        let created = self.store.create_domain(domain).await?;
        self.invalidate_domain(&created).await;
        Ok(created)
    }

    pub async fn update_domain(&self, domain: ShortDomain) -> Result<ShortDomain> {
        let old_host = self
            .store
            .get_domain(&domain.id)
            .await?
            .map(|d| d.host.clone());
        let updated = self.store.update_domain(domain).await?;
        self.invalidate_domain(&updated).await;
        if let Some(old_host) = old_host {
            self.domain_cache.invalidate(&old_host).await;
        }
        Ok(updated)
    }

    pub async fn delete_domain(&self, id: &str) -> Result<()> {
        let deleted = self.store.delete_domain(id).await?;
        self.invalidate_domain(&deleted).await;
        Ok(())
    }

    pub async fn list_domains(&self) -> Result<Vec<ShortDomain>> {
        self.store.list_domains().await
    }

    pub async fn create_link(&self, link: ShortLink) -> Result<ShortLink> {
        let created = self.store.create_link(link).await?;
        self.invalidate_link(&created).await;
        Ok(created)
    }

    pub async fn update_link(&self, link: ShortLink) -> Result<ShortLink> {
        let old = self.store.get_link(&link.id).await?;
        let updated = self.store.update_link(link).await?;
        self.invalidate_link(&updated).await;
        if let Some(old) = old {
            self.invalidate_link(&old).await;
        }
        Ok(updated)
    }

    pub async fn set_link_enabled(&self, id: &str, enabled: bool) -> Result<ShortLink> {
        let mut link = self
            .store
            .get_link(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("link {id}")))?;
        link.enabled = enabled;
        let updated = self.store.update_link(link).await?;
        self.invalidate_link(&updated).await;
        Ok(updated)
    }

    pub async fn delete_link(&self, id: &str) -> Result<()> {
        let deleted = self.store.delete_link(id).await?;
        self.invalidate_link(&deleted).await;
        Ok(())
    }

    pub async fn list_links(&self, domain_id: &str) -> Result<Vec<ShortLink>> {
        self.store.list_links(domain_id).await
    }

    /// Hash and attach a password guard to a link.
    pub async fn set_link_password(&self, id: &str, plain: Option<&str>) -> Result<ShortLink> {
        let mut link = self
            .store
            .get_link(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("link {id}")))?;
        link.password_hash = match plain {
            Some(p) if !p.is_empty() => Some(password::hash(p, password::DEFAULT_COST)?),
            _ => None,
        };
        let updated = self.store.update_link(link).await?;
        self.invalidate_link(&updated).await;
        Ok(updated)
    }

    async fn invalidate_domain(&self, domain: &ShortDomain) {
        self.domain_cache.invalidate(&domain.host).await;
    }

    async fn invalidate_link(&self, link: &ShortLink) {
        self.link_cache
            .invalidate(&(link.domain_id.clone(), link.code.clone()))
            .await;
    }
}

#[async_trait]
impl Component for ShortUrlService {
    fn name(&self) -> &str {
        "shorturl"
    }

    fn status(&self) -> ComponentStatus {
        *self.status.read().expect("status poisoned")
    }

    fn default_config(&self) -> Option<serde_json::Value> {
        serde_json::to_value(ShortUrlOptions::default()).ok()
    }

    async fn init(&self, _ctx: &NodeContext, _raw_config: serde_json::Value) -> Result<()> {
        *self.status.write().expect("status poisoned") = ComponentStatus::Initialized;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        *self.status.write().expect("status poisoned") = ComponentStatus::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.domain_cache.invalidate_all();
        self.link_cache.invalidate_all();
        *self.status.write().expect("status poisoned") = ComponentStatus::Stopped;
        Ok(())
    }
}
