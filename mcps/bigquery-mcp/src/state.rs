//! Shared server state
//!
//! Tool calls take the active configuration and gate policy once and keep
//! that `Arc` for the whole call, so a reload never changes the rules in the
//! middle of a request.

use std::sync::Arc;

use query_gate::{PolicySnapshot, PolicyStore};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::backend::BigQueryBackend;
use crate::config::{Config, ConfigError};

/// Most recent project and dataset a tool touched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LastAccess {
    pub project: Option<String>,
    pub dataset: Option<String>,
}

/// A configuration and the gate policy built from it, published together
#[derive(Debug)]
pub struct Active {
    pub config: Config,
    pub policy: PolicySnapshot,
}

impl Active {
    fn build(config: Config) -> Result<Self, ConfigError> {
        let policy = config.to_snapshot()?;
        Ok(Self { config, policy })
    }
}

pub struct ServerState {
    backend: Arc<dyn BigQueryBackend>,
    active: PolicyStore<Active>,
    last_access: Mutex<LastAccess>,
}

impl ServerState {
    pub fn new(config: Config, backend: Arc<dyn BigQueryBackend>) -> Result<Self, ConfigError> {
        Ok(Self {
            backend,
            active: PolicyStore::new(Active::build(config)?),
            last_access: Mutex::new(LastAccess::default()),
        })
    }

    pub fn backend(&self) -> &dyn BigQueryBackend {
        self.backend.as_ref()
    }

    /// Configuration and policy in effect right now
    pub fn active(&self) -> Arc<Active> {
        self.active.load()
    }

    /// Swap in a new configuration. Nothing changes if its policy is invalid.
    pub fn reload(&self, config: Config) -> Result<(), ConfigError> {
        self.active.publish(Active::build(config)?);
        tracing::info!("Configuration reloaded");
        Ok(())
    }

    pub async fn record_access(&self, project: &str, dataset: Option<&str>) {
        let mut last = self.last_access.lock().await;
        if last.project.as_deref() != Some(project) {
            last.dataset = None;
        }
        last.project = Some(project.to_string());
        if let Some(dataset) = dataset {
            last.dataset = Some(dataset.to_string());
        }
    }

    pub async fn last_access(&self) -> LastAccess {
        self.last_access.lock().await.clone()
    }
}
