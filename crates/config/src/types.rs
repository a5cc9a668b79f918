//! Config entry data model.

use lodestar_core::types::Environment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved metadata key carrying the entry's environment.
pub const META_ENVIRONMENT: &str = "environment";
/// Reserved metadata key gating optional components.
pub const META_ENABLE: &str = "enable";

/// Tag of a [`TypedValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Int,
    Float,
    Bool,
    /// JSON object, stored in string form.
    Object,
    /// JSON array, stored in string form.
    Array,
    /// `<target key>.<property>` pointer into another entry.
    Reference,
    /// AES-GCM sealed value in the `ENC:` at-rest format.
    Encrypted,
}

/// A tagged config value. The payload is always carried as a string; the
/// kind says how to interpret it during composite resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub kind: ValueKind,
    pub value: String,
}

impl TypedValue {
    pub fn new(kind: ValueKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String, value)
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int, value.to_string())
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float, value.to_string())
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool, value.to_string())
    }

    pub fn reference(target: impl Into<String>) -> Self {
        Self::new(ValueKind::Reference, target)
    }

    pub fn encrypted(plaintext_or_enc: impl Into<String>) -> Self {
        Self::new(ValueKind::Encrypted, plaintext_or_enc)
    }
}

/// One stored configuration entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    #[serde(default)]
    pub value: HashMap<String, TypedValue>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Nanosecond write stamp; strictly increases across rewrites.
    pub version: i64,
    pub updated_at: i64,
}

impl ConfigEntry {
    /// Environment this entry is scoped to, from metadata or the key suffix.
    pub fn environment(&self) -> Option<Environment> {
        if let Some(env) = self.metadata.get(META_ENVIRONMENT) {
            return env.parse().ok();
        }
        split_env_suffix(&self.key).1
    }
}

/// A historical revision of an entry.
#[derive(Debug, Clone)]
pub struct ConfigRevision {
    pub entry: ConfigEntry,
    /// KV revision of the write that produced this state.
    pub mod_revision: i64,
}

/// Change notification delivered to watch subscribers.
#[derive(Debug, Clone)]
pub struct ConfigEvent {
    pub key: String,
    /// The new entry, or `None` when the key was deleted.
    pub entry: Option<ConfigEntry>,
}

/// Split a trailing known-environment suffix off a config key:
/// `db.dev` → (`db`, `Some(Dev)`), `db` → (`db`, `None`).
pub fn split_env_suffix(key: &str) -> (&str, Option<Environment>) {
    if let Some((base, tail)) = key.rsplit_once('.') {
        if !base.is_empty() {
            if let Ok(env) = tail.parse::<Environment>() {
                return (base, Some(env));
            }
        }
    }
    (key, None)
}

/// Concrete stored key for `base` scoped to `env`.
pub fn env_key(base: &str, env: Environment) -> String {
    format!("{base}.{env}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_env_suffix() {
        assert_eq!(split_env_suffix("db.dev"), ("db", Some(Environment::Dev)));
        assert_eq!(split_env_suffix("db.prod"), ("db", Some(Environment::Prod)));
        assert_eq!(split_env_suffix("db"), ("db", None));
        // Unknown tails are part of the key.
        assert_eq!(split_env_suffix("db.primary"), ("db.primary", None));
        // Nested bases keep their dots.
        assert_eq!(
            split_env_suffix("app.db.test"),
            ("app.db", Some(Environment::Test))
        );
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("db", Environment::Dev), "db.dev");
    }

    #[test]
    fn test_typed_value_serde_shape() {
        let tv = TypedValue::int(42);
        let json = serde_json::to_string(&tv).unwrap();
        assert_eq!(json, r#"{"type":"int","value":"42"}"#);
        let back: TypedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tv);
    }

    #[test]
    fn test_entry_environment_prefers_metadata() {
        let mut entry = ConfigEntry {
            key: "db.dev".into(),
            value: HashMap::new(),
            metadata: HashMap::new(),
            version: 0,
            updated_at: 0,
        };
        assert_eq!(entry.environment(), Some(Environment::Dev));
        entry
            .metadata
            .insert(META_ENVIRONMENT.into(), "prod".into());
        assert_eq!(entry.environment(), Some(Environment::Prod));
    }
}
