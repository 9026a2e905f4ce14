//! Persistence for the small per-load state records that must survive a
//! process restart (last commanded target, last switch time, fault lock).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::PersistedLoadState;

/// Small record store keyed by load name.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<PersistedLoadState>>;
    async fn save(&self, name: &str, record: &PersistedLoadState) -> Result<()>;
}

/// One JSON file per scope holding all load records. Load counts are tens,
/// not thousands, so rewriting the whole file on save is fine.
pub struct JsonStateStore {
    path: PathBuf,
    records: Mutex<HashMap<String, PersistedLoadState>>,
}

impl JsonStateStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("corrupt state file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", path.display()))
            }
        };
        info!(path = %path.display(), loads = records.len(), "opened load state store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn flush(&self, records: &HashMap<String, PersistedLoadState>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .with_context(|| format!("writing state file {}", self.path.display()))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self, name: &str) -> Result<Option<PersistedLoadState>> {
        Ok(self.records.lock().await.get(name).copied())
    }

    async fn save(&self, name: &str, record: &PersistedLoadState) -> Result<()> {
        let mut records = self.records.lock().await;
        records.insert(name.to_string(), *record);
        self.flush(&records).await
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, PersistedLoadState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, name: &str) -> Result<Option<PersistedLoadState>> {
        Ok(self.records.lock().await.get(name).copied())
    }

    async fn save(&self, name: &str, record: &PersistedLoadState) -> Result<()> {
        self.records.lock().await.insert(name.to_string(), *record);
        Ok(())
    }
}
