//! The component supervisor.

use lodestar_config::types::META_ENABLE;
use lodestar_config::ConfigService;
use lodestar_core::traits::{Component, ComponentKind, ComponentStatus, NodeContext};
use lodestar_core::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Supervisor settings.
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    /// Directory searched for `<component>.toml` / `<component>.json`
    /// configuration files.
    pub config_dir: Option<PathBuf>,
}

struct Entry {
    component: Arc<dyn Component>,
    /// Normal components resolved as disabled are registered but never
    /// initialized or started.
    enabled: bool,
}

/// Ordered init/start/stop of the node's components.
///
/// All mutations of the component list happen under one mutex, and each
/// component's start/stop runs inside it, so status transitions observed
/// through [`statuses`](Supervisor::statuses) are linearizable.
pub struct Supervisor {
    ctx: NodeContext,
    options: SupervisorOptions,
    config_service: Option<Arc<ConfigService>>,
    entries: Mutex<Vec<Entry>>,
}

impl Supervisor {
    pub fn new(ctx: NodeContext, options: SupervisorOptions) -> Self {
        Self {
            ctx,
            options,
            config_service: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Attach the config service used for component-config lookups and
    /// optional-component enablement.
    pub fn with_config_service(mut self, service: Arc<ConfigService>) -> Self {
        self.config_service = Some(service);
        self
    }

    /// Register and initialize a component. Registration order is start
    /// order.
    pub async fn register(&self, component: Arc<dyn Component>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let name = component.name().to_string();
        if entries.iter().any(|e| e.component.name() == name) {
            return Err(Error::Conflict(format!("component {name} already registered")));
        }

        let enabled = match component.metadata().kind {
            ComponentKind::Core => true,
            ComponentKind::Normal => self.component_enabled(&name).await?,
        };
        if enabled {
            let raw = self.resolve_config(component.as_ref()).await?;
            component.init(&self.ctx, raw).await?;
            info!(component = %name, "initialized");
        } else {
            info!(component = %name, "registered but disabled");
        }
        entries.push(Entry { component, enabled });
        Ok(())
    }

    /// Start every enabled component in registration order. The first
    /// failure aborts the sweep.
    pub async fn start_all(&self) -> Result<()> {
        let entries = self.entries.lock().await;
        for entry in entries.iter() {
            if !entry.enabled {
                continue;
            }
            entry.component.start().await?;
            info!(component = %entry.component.name(), "started");
        }
        Ok(())
    }

    /// Stop every enabled component in reverse registration order. Failures
    /// are logged and the sweep continues so later components still stop.
    pub async fn stop_all(&self) {
        let entries = self.entries.lock().await;
        for entry in entries.iter().rev() {
            if !entry.enabled {
                continue;
            }
            if let Err(e) = entry.component.stop().await {
                warn!(component = %entry.component.name(), error = %e, "stop failed");
            } else {
                info!(component = %entry.component.name(), "stopped");
            }
        }
    }

    /// Restart one component, re-resolving its configuration.
    pub async fn restart(&self, name: &str) -> Result<()> {
        let entries = self.entries.lock().await;
        let entry = entries
            .iter()
            .find(|e| e.component.name() == name)
            .ok_or_else(|| Error::NotFound(format!("component {name}")))?;
        if !entry.enabled {
            return Err(Error::InvalidState(format!("component {name} is disabled")));
        }
        let raw = self.resolve_config(entry.component.as_ref()).await?;
        entry.component.restart(&self.ctx, raw).await
    }

    /// Current status of every registered component, in registration order.
    pub async fn statuses(&self) -> Vec<(String, ComponentStatus)> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(|e| (e.component.name().to_string(), e.component.status()))
            .collect()
    }

    /// Resolve a component's configuration: file, then config service, then
    /// the component default.
    async fn resolve_config(&self, component: &dyn Component) -> Result<serde_json::Value> {
        let name = component.name();

        if let Some(value) = self.config_from_file(name)? {
            return Ok(value);
        }

        if let Some(config) = &self.config_service {
            match config.composite(name).await {
                Ok(map) => return Ok(serde_json::Value::Object(map)),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(component.default_config().unwrap_or(serde_json::Value::Null))
    }

    fn config_from_file(&self, name: &str) -> Result<Option<serde_json::Value>> {
        let Some(dir) = &self.options.config_dir else {
            return Ok(None);
        };

        let toml_path = dir.join(format!("{name}.toml"));
        if toml_path.is_file() {
            let text = std::fs::read_to_string(&toml_path)
                .map_err(|e| Error::Configuration(format!("reading {toml_path:?}: {e}")))?;
            let parsed: toml::Value = toml::from_str(&text)
                .map_err(|e| Error::Configuration(format!("parsing {toml_path:?}: {e}")))?;
            return Ok(Some(serde_json::to_value(parsed)?));
        }

        let json_path = dir.join(format!("{name}.json"));
        if json_path.is_file() {
            let text = std::fs::read_to_string(&json_path)
                .map_err(|e| Error::Configuration(format!("reading {json_path:?}: {e}")))?;
            let parsed: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| Error::Configuration(format!("parsing {json_path:?}: {e}")))?;
            return Ok(Some(parsed));
        }

        Ok(None)
    }

    /// Optional-component gate: `metadata.enable == "true"` on the config
    /// service entry named after the component. Without a config service
    /// (single-node dev), optional components default to enabled.
    async fn component_enabled(&self, name: &str) -> Result<bool> {
        let Some(config) = &self.config_service else {
            return Ok(true);
        };
        match config.get(name).await {
            Ok(entry) => Ok(entry.metadata.get(META_ENABLE).map(String::as_str) == Some("true")),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
