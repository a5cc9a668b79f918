//! Short-link data model.

use lodestar_core::types::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a resolved link is presented to the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    /// Plain 302 redirect.
    #[default]
    Url,
    /// App-scheme landing page with a browser fallback.
    UrlScheme,
}

/// A short-link domain. At most one domain is flagged as the system
/// default, which catches lookups on unknown hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortDomain {
    #[serde(default)]
    pub id: String,
    pub host: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

fn default_true() -> bool {
    true
}

impl ShortDomain {
    pub fn new(host: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: String::new(),
            host: host.into(),
            enabled: true,
            is_default: false,
            comment: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn default_domain(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// A short link. `code` is base62 and unique within its domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortLink {
    #[serde(default)]
    pub id: String,
    pub domain_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub target_type: TargetType,
    /// Primary target URL.
    #[serde(default)]
    pub url: String,
    /// Fallback URL rendered on scheme landing pages.
    #[serde(default)]
    pub backup_url: String,
    /// Opaque per-target configuration handed to the renderer.
    #[serde(default)]
    pub target_config: HashMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub max_visits: Option<i64>,
    #[serde(default)]
    pub visit_count: i64,
    #[serde(default)]
    pub success_count: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ShortLink {
    pub fn new(domain_id: impl Into<String>, url: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: String::new(),
            domain_id: domain_id.into(),
            code: String::new(),
            target_type: TargetType::Url,
            url: url.into(),
            backup_url: String::new(),
            target_config: HashMap::new(),
            expires_at: None,
            password_hash: None,
            max_visits: None,
            visit_count: 0,
            success_count: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The redirect/landing payload collaborators render. The primary URL
    /// falls back to `target_config["url"]` when the normalized field is
    /// empty.
    pub fn target(&self) -> LinkTarget {
        let url = if self.url.is_empty() {
            self.target_config.get("url").cloned().unwrap_or_default()
        } else {
            self.url.clone()
        };
        LinkTarget {
            target_type: self.target_type,
            url,
            backup_url: self.backup_url.clone(),
        }
    }
}

/// Data a transport renders from: a 302 for [`TargetType::Url`], a landing
/// page carrying both URLs for [`TargetType::UrlScheme`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkTarget {
    pub target_type: TargetType,
    pub url: String,
    pub backup_url: String,
}

/// Idempotence record for one reported conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEvent {
    pub link_id: String,
    /// Globally unique; a second report with the same id is a no-op.
    pub event_id: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_falls_back_to_config_url() {
        let mut link = ShortLink::new("d1", "");
        link.target_config
            .insert("url".to_string(), "https://fallback".to_string());
        assert_eq!(link.target().url, "https://fallback");

        link.url = "https://primary".to_string();
        assert_eq!(link.target().url, "https://primary");
    }

    #[test]
    fn test_target_type_serde() {
        assert_eq!(
            serde_json::to_string(&TargetType::UrlScheme).unwrap(),
            "\"url_scheme\""
        );
        let t: TargetType = serde_json::from_str("\"url\"").unwrap();
        assert_eq!(t, TargetType::Url);
    }

    #[test]
    fn test_link_defaults() {
        let link: ShortLink =
            serde_json::from_str(r#"{"domain_id":"d1","url":"https://x"}"#).unwrap();
        assert!(link.enabled);
        assert_eq!(link.visit_count, 0);
        assert!(link.max_visits.is_none());
    }
}
