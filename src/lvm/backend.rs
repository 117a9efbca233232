use async_trait::async_trait;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use super::error::{LvmError, LvmResult};
use super::volume::LogicalVolume;

pub const LV_CREATE: &str = "lvcreate";
pub const LV_REMOVE: &str = "lvremove";

/// The side-effecting half of volume management.
///
/// Implementations return the tool's combined output on success. They must
/// not touch the registry.
#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    async fn create(&self, lv: &LogicalVolume) -> LvmResult<String>;
    async fn remove(&self, lv: &LogicalVolume) -> LvmResult<String>;
}

/// Runs the lvm2 command line tools.
#[derive(Debug, Clone)]
pub struct LvmCommand {
    lvcreate: String,
    lvremove: String,
}

impl LvmCommand {
    pub fn new() -> Self {
        Self::with_binaries(LV_CREATE, LV_REMOVE)
    }

    pub fn with_binaries(lvcreate: impl Into<String>, lvremove: impl Into<String>) -> Self {
        Self { lvcreate: lvcreate.into(), lvremove: lvremove.into() }
    }

    /// `lvcreate -n <name> -L <size> <vg>`
    pub fn create_args(lv: &LogicalVolume) -> Vec<String> {
        vec![
            "-n".to_string(),
            lv.name.clone(),
            "-L".to_string(),
            lv.size.clone(),
            lv.vg_name.clone(),
        ]
    }

    /// `lvremove <path> -f`
    pub fn remove_args(lv: &LogicalVolume) -> Vec<String> {
        vec![lv.path.to_string_lossy().into_owned(), "-f".to_string()]
    }

    async fn run(program: &str, args: &[String]) -> std::io::Result<Output> {
        debug!(%program, ?args, "running lvm command");
        Command::new(program).args(args).output().await
    }
}

impl Default for LvmCommand {
    fn default() -> Self {
        Self::new()
    }
}

fn combined_output(output: &Output) -> String {
    let mut out = String::from_utf8_lossy(&output.stdout).into_owned();
    out.push_str(&String::from_utf8_lossy(&output.stderr));
    out.trim().to_string()
}

#[async_trait]
impl VolumeBackend for LvmCommand {
    async fn create(&self, lv: &LogicalVolume) -> LvmResult<String> {
        let output = Self::run(&self.lvcreate, &Self::create_args(lv)).await.map_err(|e| {
            LvmError::CreationFailed { name: lv.name.clone(), output: e.to_string() }
        })?;

        let out = combined_output(&output);
        if !output.status.success() {
            return Err(LvmError::CreationFailed {
                name: lv.name.clone(),
                output: format!("{} ({})", out, output.status),
            });
        }
        Ok(out)
    }

    async fn remove(&self, lv: &LogicalVolume) -> LvmResult<String> {
        let path = lv.path.display().to_string();
        let output = Self::run(&self.lvremove, &Self::remove_args(lv))
            .await
            .map_err(|e| LvmError::DeletionFailed { path: path.clone(), output: e.to_string() })?;

        let out = combined_output(&output);
        if !output.status.success() {
            return Err(LvmError::DeletionFailed {
                path,
                output: format!("{} ({})", out, output.status),
            });
        }
        Ok(out)
    }
}
