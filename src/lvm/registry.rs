use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use super::error::{LvmError, LvmResult};
use super::volume::LogicalVolume;

/// In-memory set of logical volumes created by this process, keyed by name.
///
/// One lock guards the whole map: readers share it, every mutation holds it
/// exclusively, so `add`'s existence check and insert are a single step.
/// The registry starts empty on every process start.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: RwLock<HashMap<String, LogicalVolume>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Fails if the name is already registered.
    pub async fn add(&self, lv: LogicalVolume) -> LvmResult<()> {
        let mut volumes = self.volumes.write().await;

        if volumes.contains_key(&lv.name) {
            debug!(name = %lv.name, "volume already registered");
            return Err(LvmError::AlreadyExists(lv.name));
        }

        volumes.insert(lv.name.clone(), lv);
        Ok(())
    }

    /// Remove a record, returning it.
    pub async fn remove(&self, name: &str) -> LvmResult<LogicalVolume> {
        let mut volumes = self.volumes.write().await;

        volumes.remove(name).ok_or_else(|| {
            debug!(%name, "volume not registered");
            LvmError::NotFound(name.to_string())
        })
    }

    pub async fn get(&self, name: &str) -> LvmResult<LogicalVolume> {
        let volumes = self.volumes.read().await;
        volumes.get(name).cloned().ok_or_else(|| LvmError::NotFound(name.to_string()))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.volumes.read().await.contains_key(name)
    }

    /// Snapshot of every registered volume, ordered by name.
    pub async fn list(&self) -> Vec<LogicalVolume> {
        let volumes = self.volumes.read().await;
        let mut list: Vec<_> = volumes.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn len(&self) -> usize {
        self.volumes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.volumes.read().await.is_empty()
    }
}
