//! KV persistence for domains, links, and success events.
//!
//! ```text
//! /aio/shorturl/domains/<domainID>          JSON domain
//! /aio/shorturl/hosts/<host>                domain id (host-uniqueness index)
//! /aio/shorturl/links/<linkID>              JSON link
//! /aio/shorturl/codes/<domainID>/<code>     link id (per-domain code index)
//! /aio/shorturl/events/<eventID>            JSON success event
//! ```
//!
//! Counter updates go through value-compare transactions so concurrent
//! visits and reports never lose increments.

use crate::types::{ShortDomain, ShortLink, SuccessEvent};
use lodestar_core::types::now_millis;
use lodestar_core::{Error, Result};
use lodestar_crypto::codegen;
use lodestar_kv::{Compare, CompareOp, KvStore, KvStoreExt, Txn, TxnOp};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const DOMAIN_PREFIX: &str = "/aio/shorturl/domains/";
const HOST_PREFIX: &str = "/aio/shorturl/hosts/";
const LINK_PREFIX: &str = "/aio/shorturl/links/";
const CODE_PREFIX: &str = "/aio/shorturl/codes/";
const EVENT_PREFIX: &str = "/aio/shorturl/events/";

/// Attempts before a contended CAS loop reports `TransactionConflict`.
const CAS_MAX_ATTEMPTS: usize = 16;
/// Attempts to find a free generated code before giving up.
const CODE_GEN_ATTEMPTS: usize = 5;

fn domain_key(id: &str) -> String {
    format!("{DOMAIN_PREFIX}{id}")
}

fn host_key(host: &str) -> String {
    format!("{HOST_PREFIX}{host}")
}

fn link_key(id: &str) -> String {
    format!("{LINK_PREFIX}{id}")
}

fn code_key(domain_id: &str, code: &str) -> String {
    format!("{CODE_PREFIX}{domain_id}/{code}")
}

fn event_key(event_id: &str) -> String {
    format!("{EVENT_PREFIX}{event_id}")
}

/// Typed access to the short-url rows.
#[derive(Clone)]
pub struct ShortUrlStore {
    kv: Arc<dyn KvStore>,
}

impl ShortUrlStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    // ── Domains ──────────────────────────────────────────────────

    pub async fn get_domain(&self, id: &str) -> Result<Option<ShortDomain>> {
        self.kv.get_json(&domain_key(id)).await
    }

    pub async fn list_domains(&self) -> Result<Vec<ShortDomain>> {
        self.kv.list_json(DOMAIN_PREFIX).await
    }

    pub async fn find_domain_by_host(&self, host: &str) -> Result<Option<ShortDomain>> {
        let Some(pair) = self.kv.get(&host_key(host)).await? else {
            return Ok(None);
        };
        self.get_domain(pair.value_str()?).await
    }

    pub async fn find_default_domain(&self) -> Result<Option<ShortDomain>> {
        Ok(self
            .list_domains()
            .await?
            .into_iter()
            .find(|d| d.is_default))
    }

    /// Create a domain; the host index guards host uniqueness.
    pub async fn create_domain(&self, mut domain: ShortDomain) -> Result<ShortDomain> {
        if domain.host.is_empty() {
            return Err(Error::InvalidInput("domain host is required".to_string()));
        }
        if domain.id.is_empty() {
            domain.id = Uuid::new_v4().to_string();
        }
        let now = now_millis();
        domain.created_at = now;
        domain.updated_at = now;

        let txn = Txn::new()
            .when([Compare::key_absent(host_key(&domain.host))])
            .and_then([
                TxnOp::put(domain_key(&domain.id), serde_json::to_vec(&domain)?),
                TxnOp::put(host_key(&domain.host), domain.id.as_bytes()),
            ]);
        if !self.kv.txn(txn).await?.succeeded {
            return Err(Error::Conflict(format!(
                "domain host {} already exists",
                domain.host
            )));
        }
        if domain.is_default {
            self.clear_other_defaults(&domain.id).await?;
        }
        Ok(domain)
    }

    pub async fn update_domain(&self, mut domain: ShortDomain) -> Result<ShortDomain> {
        let existing = self
            .get_domain(&domain.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("domain {}", domain.id)))?;
        domain.updated_at = now_millis();

        if existing.host != domain.host {
            let txn = Txn::new()
                .when([Compare::key_absent(host_key(&domain.host))])
                .and_then([
                    TxnOp::put(domain_key(&domain.id), serde_json::to_vec(&domain)?),
                    TxnOp::delete(host_key(&existing.host)),
                    TxnOp::put(host_key(&domain.host), domain.id.as_bytes()),
                ]);
            if !self.kv.txn(txn).await?.succeeded {
                return Err(Error::Conflict(format!(
                    "domain host {} already exists",
                    domain.host
                )));
            }
        } else {
            self.kv.put_json(&domain_key(&domain.id), &domain).await?;
        }
        if domain.is_default {
            self.clear_other_defaults(&domain.id).await?;
        }
        Ok(domain)
    }

    pub async fn delete_domain(&self, id: &str) -> Result<ShortDomain> {
        let domain = self
            .get_domain(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("domain {id}")))?;
        let txn = Txn::new().and_then([
            TxnOp::delete(domain_key(id)),
            TxnOp::delete(host_key(&domain.host)),
        ]);
        self.kv.txn(txn).await?;
        Ok(domain)
    }

    /// Enforce the at-most-one-default invariant after a write that set the
    /// flag on `keep_id`.
    async fn clear_other_defaults(&self, keep_id: &str) -> Result<()> {
        for mut other in self.list_domains().await? {
            if other.id != keep_id && other.is_default {
                other.is_default = false;
                other.updated_at = now_millis();
                self.kv.put_json(&domain_key(&other.id), &other).await?;
            }
        }
        Ok(())
    }

    // ── Links ────────────────────────────────────────────────────

    pub async fn get_link(&self, id: &str) -> Result<Option<ShortLink>> {
        self.kv.get_json(&link_key(id)).await
    }

    pub async fn list_links(&self, domain_id: &str) -> Result<Vec<ShortLink>> {
        Ok(self
            .kv
            .list_json::<ShortLink>(LINK_PREFIX)
            .await?
            .into_iter()
            .filter(|link| link.domain_id == domain_id)
            .collect())
    }

    pub async fn find_link(&self, domain_id: &str, code: &str) -> Result<Option<ShortLink>> {
        let Some(pair) = self.kv.get(&code_key(domain_id, code)).await? else {
            return Ok(None);
        };
        self.get_link(pair.value_str()?).await
    }

    /// Find a link by code across all domains (success reports carry only
    /// the code).
    pub async fn find_link_by_code(&self, code: &str) -> Result<Option<ShortLink>> {
        let suffix = format!("/{code}");
        for pair in self.kv.get_prefix(CODE_PREFIX).await? {
            if pair.key.ends_with(&suffix) {
                return self.get_link(pair.value_str()?).await;
            }
        }
        Ok(None)
    }

    /// Create a link. An explicit code conflicts when taken; a generated
    /// code retries until a free one is found.
    pub async fn create_link(&self, mut link: ShortLink) -> Result<ShortLink> {
        if link.domain_id.is_empty() {
            return Err(Error::InvalidInput("link domain is required".to_string()));
        }
        if link.url.is_empty() && !link.target_config.contains_key("url") {
            return Err(Error::InvalidInput("link target url is required".to_string()));
        }
        if link.id.is_empty() {
            link.id = Uuid::new_v4().to_string();
        }
        let now = now_millis();
        link.created_at = now;
        link.updated_at = now;

        let explicit = !link.code.is_empty();
        for _ in 0..CODE_GEN_ATTEMPTS {
            if !explicit {
                link.code = codegen::short_code(codegen::DEFAULT_CODE_LEN);
            }
            let txn = Txn::new()
                .when([Compare::key_absent(code_key(&link.domain_id, &link.code))])
                .and_then([
                    TxnOp::put(link_key(&link.id), serde_json::to_vec(&link)?),
                    TxnOp::put(code_key(&link.domain_id, &link.code), link.id.as_bytes()),
                ]);
            if self.kv.txn(txn).await?.succeeded {
                return Ok(link);
            }
            if explicit {
                return Err(Error::Conflict(format!(
                    "code {} already exists in domain {}",
                    link.code, link.domain_id
                )));
            }
            warn!(code = %link.code, "generated code collided, retrying");
        }
        Err(Error::Conflict("could not find a free short code".to_string()))
    }

    pub async fn update_link(&self, mut link: ShortLink) -> Result<ShortLink> {
        let existing = self
            .get_link(&link.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("link {}", link.id)))?;
        link.updated_at = now_millis();

        let moved = existing.code != link.code || existing.domain_id != link.domain_id;
        if moved {
            let txn = Txn::new()
                .when([Compare::key_absent(code_key(&link.domain_id, &link.code))])
                .and_then([
                    TxnOp::put(link_key(&link.id), serde_json::to_vec(&link)?),
                    TxnOp::delete(code_key(&existing.domain_id, &existing.code)),
                    TxnOp::put(code_key(&link.domain_id, &link.code), link.id.as_bytes()),
                ]);
            if !self.kv.txn(txn).await?.succeeded {
                return Err(Error::Conflict(format!(
                    "code {} already exists in domain {}",
                    link.code, link.domain_id
                )));
            }
        } else {
            self.kv.put_json(&link_key(&link.id), &link).await?;
        }
        Ok(link)
    }

    pub async fn delete_link(&self, id: &str) -> Result<ShortLink> {
        let link = self
            .get_link(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("link {id}")))?;
        let txn = Txn::new().and_then([
            TxnOp::delete(link_key(id)),
            TxnOp::delete(code_key(&link.domain_id, &link.code)),
        ]);
        self.kv.txn(txn).await?;
        Ok(link)
    }

    /// Compare-and-swap update of one link row.
    async fn link_cas<F>(&self, link_id: &str, mutate: F) -> Result<ShortLink>
    where
        F: Fn(&mut ShortLink),
    {
        let key = link_key(link_id);
        for _ in 0..CAS_MAX_ATTEMPTS {
            let pair = self
                .kv
                .get(&key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("link {link_id}")))?;
            let mut link: ShortLink = pair.json()?;
            mutate(&mut link);
            link.updated_at = now_millis();

            let txn = Txn::new()
                .when([Compare::value(&key, CompareOp::Equal, pair.value.clone())])
                .and_then([TxnOp::put(&key, serde_json::to_vec(&link)?)]);
            if self.kv.txn(txn).await?.succeeded {
                return Ok(link);
            }
        }
        Err(Error::TransactionConflict(format!(
            "link {link_id} counter update contended"
        )))
    }

    /// Atomically bump the visit counter.
    pub async fn increment_visits(&self, link_id: &str) -> Result<ShortLink> {
        self.link_cas(link_id, |link| link.visit_count += 1).await
    }

    // ── Success events ───────────────────────────────────────────

    pub async fn event_exists(&self, event_id: &str) -> Result<bool> {
        Ok(self.kv.get(&event_key(event_id)).await?.is_some())
    }

    /// Insert the success event and bump the link's success counter in one
    /// transaction. Returns `false` without side effects when the event id
    /// was already recorded.
    pub async fn record_success(&self, link_id: &str, event: &SuccessEvent) -> Result<bool> {
        let key = link_key(link_id);
        for _ in 0..CAS_MAX_ATTEMPTS {
            if self.event_exists(&event.event_id).await? {
                return Ok(false);
            }
            let pair = self
                .kv
                .get(&key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("link {link_id}")))?;
            let mut link: ShortLink = pair.json()?;
            link.success_count += 1;
            link.updated_at = now_millis();

            let txn = Txn::new()
                .when([
                    Compare::key_absent(event_key(&event.event_id)),
                    Compare::value(&key, CompareOp::Equal, pair.value.clone()),
                ])
                .and_then([
                    TxnOp::put(event_key(&event.event_id), serde_json::to_vec(event)?),
                    TxnOp::put(&key, serde_json::to_vec(&link)?),
                ]);
            if self.kv.txn(txn).await?.succeeded {
                return Ok(true);
            }
        }
        Err(Error::TransactionConflict(format!(
            "success report for link {link_id} contended"
        )))
    }
}
