//! Registry data model and options.

use lodestar_core::types::Environment;
use lodestar_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Liveness status of a registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Active,
    /// Marked by the supervisory staleness pass; the lease still evicts it.
    Offline,
}

/// One registered service instance. Serialized as JSON and bound to a KV
/// lease at `<prefix>/<name>/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Generated as `<name>-<8 hex>` when not supplied.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub env: Environment,
    #[serde(default)]
    pub registered_at: i64,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub last_renewed_at: i64,
    #[serde(default)]
    pub offline_at: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_weight")]
    pub weight: i32,
    #[serde(default)]
    pub status: InstanceStatus,
}

fn default_weight() -> i32 {
    100
}

impl ServiceInstance {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            address: address.into(),
            protocol: String::new(),
            env: Environment::All,
            registered_at: 0,
            started_at: 0,
            last_renewed_at: 0,
            offline_at: None,
            metadata: HashMap::new(),
            weight: default_weight(),
            status: InstanceStatus::Active,
        }
    }

    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryOptions {
    /// KV prefix instances live under (no trailing slash).
    pub prefix: String,
    /// Lease TTL for registrations, in seconds.
    pub lease_ttl_secs: i64,
    /// Client-side renewal interval; must be strictly below the TTL.
    pub renew_interval_secs: u64,
    /// Re-registration attempts after a lost lease.
    pub retry_count: u32,
    /// Delay between re-registration attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            prefix: "/aio/registry".to_string(),
            lease_ttl_secs: 30,
            renew_interval_secs: 10,
            retry_count: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl RegistryOptions {
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(Error::Configuration("registry prefix is required".to_string()));
        }
        if self.lease_ttl_secs <= 0 {
            return Err(Error::Configuration(format!(
                "lease ttl must be positive, got {}",
                self.lease_ttl_secs
            )));
        }
        if self.renew_interval_secs == 0 {
            return Err(Error::Configuration("renew interval must be positive".to_string()));
        }
        if self.renew_interval_secs >= self.lease_ttl_secs as u64 {
            return Err(Error::Configuration(format!(
                "renew interval {}s must be below the lease ttl {}s",
                self.renew_interval_secs, self.lease_ttl_secs
            )));
        }
        Ok(())
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        RegistryOptions::default().validate().unwrap();
    }

    #[test]
    fn test_option_validation() {
        let mut opts = RegistryOptions {
            prefix: String::new(),
            ..RegistryOptions::default()
        };
        assert!(opts.validate().is_err());

        opts.prefix = "/aio/registry".to_string();
        opts.lease_ttl_secs = 0;
        assert!(opts.validate().is_err());

        opts.lease_ttl_secs = 30;
        opts.renew_interval_secs = 30;
        assert!(opts.validate().is_err());

        opts.renew_interval_secs = 29;
        opts.validate().unwrap();
    }

    #[test]
    fn test_instance_serde_defaults() {
        let instance: ServiceInstance =
            serde_json::from_str(r#"{"name":"svc","address":"10.0.0.1:80"}"#).unwrap();
        assert_eq!(instance.env, Environment::All);
        assert_eq!(instance.weight, 100);
        assert_eq!(instance.status, InstanceStatus::Active);
    }
}
