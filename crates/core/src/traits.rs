//! Component lifecycle contract
//!
//! Every long-lived control-plane component (auth manager, config service,
//! registry, short-url resolver) implements [`Component`] so the supervisor
//! can sequence initialization, startup, and shutdown uniformly.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a supervised component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    NotInitialized,
    Initialized,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentStatus::NotInitialized => "not_initialized",
            ComponentStatus::Initialized => "initialized",
            ComponentStatus::Running => "running",
            ComponentStatus::Stopped => "stopped",
            ComponentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Whether a component is mandatory for the node or opt-in.
///
/// Optional ("normal") components only start when their config entry in the
/// config service carries `enable == "true"` metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentKind {
    #[default]
    Core,
    Normal,
}

/// Static registration metadata a component reports to the supervisor.
#[derive(Debug, Clone, Default)]
pub struct ComponentMetadata {
    pub kind: ComponentKind,
}

/// Node-wide context handed to every component at init time.
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
    /// Stable identifier of this control-plane node.
    pub node_id: String,
    /// Environment the node itself runs in.
    pub environment: crate::types::Environment,
}

/// Trait for components that require supervised lifecycle management.
///
/// Status transitions follow `NotInitialized -> Initialized -> Running ->
/// Stopped`; the supervisor drives them and never calls `start` before a
/// successful `init`.
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component name; also the config-service key its configuration
    /// is looked up under.
    fn name(&self) -> &str;

    /// Current lifecycle status.
    fn status(&self) -> ComponentStatus;

    /// Registration metadata. Core components are always started.
    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata::default()
    }

    /// Configuration the supervisor falls back to when neither a config file
    /// nor a config-service entry exists for this component.
    fn default_config(&self) -> Option<serde_json::Value> {
        None
    }

    /// Initialize with the node context and the resolved raw configuration.
    async fn init(&self, ctx: &NodeContext, raw_config: serde_json::Value) -> Result<()>;

    /// Start serving. Called once after a successful `init`.
    async fn start(&self) -> Result<()>;

    /// Stop serving and release resources.
    async fn stop(&self) -> Result<()>;

    /// Stop and start again. Components with cheaper paths may override.
    async fn restart(&self, ctx: &NodeContext, raw_config: serde_json::Value) -> Result<()> {
        self.stop().await?;
        self.init(ctx, raw_config).await?;
        self.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ComponentStatus::NotInitialized.to_string(), "not_initialized");
        assert_eq!(ComponentStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ComponentStatus::Initialized).unwrap();
        assert_eq!(json, "\"initialized\"");
    }
}
