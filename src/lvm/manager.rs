use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use super::backend::VolumeBackend;
use super::error::{LvmError, LvmResult};
use super::registry::VolumeRegistry;
use super::volume::LogicalVolume;

/// Creates and removes logical volumes and keeps the registry in step.
///
/// Every operation validates first, runs the external tool second and only
/// then touches the registry, so a registered volume is always one the tool
/// reported as created.
#[derive(Clone)]
pub struct VolumeManager {
    volume_dir: PathBuf,
    backend: Arc<dyn VolumeBackend>,
    registry: Arc<VolumeRegistry>,
}

impl VolumeManager {
    pub fn new(
        volume_dir: impl Into<PathBuf>,
        backend: Arc<dyn VolumeBackend>,
        registry: Arc<VolumeRegistry>,
    ) -> Self {
        Self { volume_dir: volume_dir.into(), backend, registry }
    }

    pub fn volume_dir(&self) -> &Path {
        &self.volume_dir
    }

    pub fn registry(&self) -> &Arc<VolumeRegistry> {
        &self.registry
    }

    /// Create the volume root if it does not exist yet.
    pub async fn ensure_volume_dir(&self) -> LvmResult<()> {
        let is_dir = tokio::fs::metadata(&self.volume_dir).await.is_ok_and(|m| m.is_dir());
        if !is_dir {
            info!(volume_dir = %self.volume_dir.display(), "creating volume directory");
            tokio::fs::create_dir_all(&self.volume_dir).await?;
        }
        Ok(())
    }

    /// `lvcreate -n <name> -L <size> <vg_name>` and register the result.
    pub async fn create_volume(
        &self,
        name: &str,
        vg_name: &str,
        size: &str,
    ) -> LvmResult<LogicalVolume> {
        let lv = LogicalVolume::new(&self.volume_dir, name, vg_name, size);
        self.create_logical_volume(lv).await
    }

    #[instrument(skip(self, lv), fields(name = %lv.name, vg = %lv.vg_name, size = %lv.size))]
    pub async fn create_logical_volume(&self, lv: LogicalVolume) -> LvmResult<LogicalVolume> {
        validate_name("volume name", &lv.name)?;
        validate_name("volume group", &lv.vg_name)?;
        if is_zero_size(&lv.size) {
            return Err(LvmError::InvalidArgument(format!("invalid volume size {:?}", lv.size)));
        }

        // Best-effort local probe; it cannot see a create of the same name
        // that is still running.
        if tokio::fs::try_exists(&lv.path).await? {
            debug!(path = %lv.path.display(), "device path already present");
            return Err(LvmError::AlreadyExists(lv.name));
        }

        let output = self.backend.create(&lv).await.inspect_err(|e| {
            error!(error = %e, "lvcreate failed");
        })?;
        debug!(%output, "lvcreate finished");

        if let Err(e) = self.registry.add(lv.clone()).await {
            // The logical volume now exists with no registry entry.
            error!(
                path = %lv.path.display(),
                error = %e,
                "volume created by lvcreate but registration failed; volume is orphaned",
            );
            return Err(e);
        }

        info!(path = %lv.path.display(), "logical volume created");
        Ok(lv)
    }

    /// `lvremove <path> -f` for a registered volume, then unregister it.
    ///
    /// A registered volume whose device node is gone is dropped from the
    /// registry without calling lvremove and reported as `DeviceMissing`.
    #[instrument(skip(self))]
    pub async fn delete_volume(&self, name: &str) -> LvmResult<()> {
        if name.is_empty() {
            return Err(LvmError::InvalidArgument("volume name is required".to_string()));
        }

        let lv = self.registry.get(name).await?;

        if !tokio::fs::try_exists(&lv.path).await? {
            warn!(
                path = %lv.path.display(),
                "registered volume has no device path; dropping record",
            );
            // A concurrent delete may already have taken the entry.
            let _ = self.registry.remove(name).await;
            return Err(LvmError::DeviceMissing(lv.path.display().to_string()));
        }

        let output = self.backend.remove(&lv).await.inspect_err(|e| {
            error!(error = %e, "lvremove failed");
        })?;
        debug!(%output, "lvremove finished");

        self.registry.remove(name).await.map_err(|e| {
            error!(
                path = %lv.path.display(),
                error = %e,
                "volume removed by lvremove but registry entry vanished",
            );
            LvmError::Inconsistent(format!("{}: {}", name, e))
        })?;

        info!(path = %lv.path.display(), "logical volume removed");
        Ok(())
    }

    pub async fn get_volume(&self, name: &str) -> LvmResult<LogicalVolume> {
        self.registry.get(name).await
    }

    pub async fn list_volumes(&self) -> Vec<LogicalVolume> {
        self.registry.list().await
    }
}

fn validate_name(what: &str, value: &str) -> LvmResult<()> {
    if value.is_empty() {
        return Err(LvmError::InvalidArgument(format!("{} is required", what)));
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(LvmError::InvalidArgument(format!("{} {:?} is not a valid name", what, value)));
    }
    Ok(())
}

/// True for an empty size or one whose numeric part is zero (`"0"`, `"0Gi"`).
fn is_zero_size(size: &str) -> bool {
    let numeric: String = size.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    match numeric.parse::<f64>() {
        Ok(n) => n == 0.0,
        Err(_) => size.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lvm::backend::MockVolumeBackend;

    fn manager(dir: &Path, backend: MockVolumeBackend) -> VolumeManager {
        VolumeManager::new(dir, Arc::new(backend), Arc::new(VolumeRegistry::new()))
    }

    #[test]
    fn test_is_zero_size() {
        assert!(is_zero_size(""));
        assert!(is_zero_size("0"));
        assert!(is_zero_size("0Gi"));
        assert!(is_zero_size("0.0m"));
        assert!(!is_zero_size("5Gi"));
        assert!(!is_zero_size("1073741824b"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("volume name", "pvc-1").is_ok());
        assert!(validate_name("volume name", "").is_err());
        assert!(validate_name("volume name", "../etc").is_err());
        assert!(validate_name("volume group", "..").is_err());
    }

    #[tokio::test]
    async fn test_create_validates_before_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockVolumeBackend::new();
        backend.expect_create().never();
        let manager = manager(dir.path(), backend);

        let err = manager.create_volume("", "lvmvg", "5Gi").await.unwrap_err();
        assert!(matches!(err, LvmError::InvalidArgument(_)));

        let err = manager.create_volume("test", "", "5Gi").await.unwrap_err();
        assert!(matches!(err, LvmError::InvalidArgument(_)));

        let err = manager.create_volume("test", "lvmvg", "").await.unwrap_err();
        assert!(matches!(err, LvmError::InvalidArgument(_)));

        let err = manager.create_volume("test", "lvmvg", "0").await.unwrap_err();
        assert!(matches!(err, LvmError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_create_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lvmvg")).unwrap();
        std::fs::write(dir.path().join("lvmvg/test"), "").unwrap();

        let mut backend = MockVolumeBackend::new();
        backend.expect_create().never();
        let manager = manager(dir.path(), backend);

        let err = manager.create_volume("test", "lvmvg", "5Gi").await.unwrap_err();
        assert!(matches!(err, LvmError::AlreadyExists(_)));
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_create_backend_failure_leaves_registry_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockVolumeBackend::new();
        backend.expect_create().times(1).returning(|lv| {
            Err(LvmError::CreationFailed {
                name: lv.name.clone(),
                output: "Volume group \"lvmvg\" has insufficient free space".to_string(),
            })
        });
        let manager = manager(dir.path(), backend);

        let err = manager.create_volume("test", "lvmvg", "5Gi").await.unwrap_err();
        assert!(matches!(err, LvmError::CreationFailed { .. }));
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_unknown_volume() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockVolumeBackend::new();
        backend.expect_remove().never();
        let manager = manager(dir.path(), backend);

        let err = manager.delete_volume("ghost").await.unwrap_err();
        assert!(matches!(err, LvmError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_device_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockVolumeBackend::new();
        backend.expect_remove().never();
        let manager = manager(dir.path(), backend);

        // Registered, but nothing on disk.
        let lv = LogicalVolume::new(dir.path(), "test", "lvmvg", "5Gi");
        manager.registry().add(lv).await.unwrap();

        let err = manager.delete_volume("test").await.unwrap_err();
        assert!(matches!(err, LvmError::DeviceMissing(_)));
        assert!(!manager.registry().contains("test").await);

        // The record is gone, so a second delete sees an unknown name.
        let err = manager.delete_volume("test").await.unwrap_err();
        assert!(matches!(err, LvmError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_backend_failure_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lvmvg")).unwrap();
        std::fs::write(dir.path().join("lvmvg/test"), "").unwrap();

        let mut backend = MockVolumeBackend::new();
        backend.expect_remove().times(1).returning(|lv| {
            Err(LvmError::DeletionFailed {
                path: lv.path.display().to_string(),
                output: "Logical volume lvmvg/test contains a filesystem in use.".to_string(),
            })
        });
        let manager = manager(dir.path(), backend);
        let lv = LogicalVolume::new(dir.path(), "test", "lvmvg", "5Gi");
        manager.registry().add(lv).await.unwrap();

        let err = manager.delete_volume("test").await.unwrap_err();
        assert!(matches!(err, LvmError::DeletionFailed { .. }));
        assert!(manager.registry().contains("test").await);
    }

    #[tokio::test]
    async fn test_create_registration_conflict_orphans_volume() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = MockVolumeBackend::new();
        backend.expect_create().times(1).returning(|_| Ok(String::new()));
        let manager = manager(dir.path(), backend);

        // Registered under the same name, but no device node, so the path
        // check passes and lvcreate runs.
        let existing = LogicalVolume::new(dir.path(), "x", "lvmvg", "1Gi");
        manager.registry().add(existing.clone()).await.unwrap();

        let err = manager.create_volume("x", "lvmvg", "5Gi").await.unwrap_err();
        assert!(matches!(err, LvmError::AlreadyExists(ref name) if name == "x"));
        assert_eq!(manager.registry().len().await, 1);
        assert_eq!(manager.get_volume("x").await.unwrap(), existing);
    }

    /// Removes the registry entry from under the manager while "lvremove" runs.
    struct RacingRemove {
        registry: Arc<VolumeRegistry>,
    }

    #[async_trait::async_trait]
    impl VolumeBackend for RacingRemove {
        async fn create(&self, _lv: &LogicalVolume) -> LvmResult<String> {
            Ok(String::new())
        }

        async fn remove(&self, lv: &LogicalVolume) -> LvmResult<String> {
            self.registry.remove(&lv.name).await?;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_delete_registry_divergence_is_inconsistent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("lvmvg")).unwrap();
        std::fs::write(dir.path().join("lvmvg/test"), "").unwrap();

        let registry = Arc::new(VolumeRegistry::new());
        let backend = RacingRemove { registry: registry.clone() };
        let manager = VolumeManager::new(dir.path(), Arc::new(backend), registry.clone());
        let lv = LogicalVolume::new(dir.path(), "test", "lvmvg", "5Gi");
        registry.add(lv).await.unwrap();

        let err = manager.delete_volume("test").await.unwrap_err();
        assert!(matches!(err, LvmError::Inconsistent(ref msg) if msg.starts_with("test: ")));
        assert!(registry.is_empty().await);
    }
}
