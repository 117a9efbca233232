use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{LvmError, LvmResult};
use crate::helper;

/// Storage class parameter naming the backing volume group.
pub const PARAM_VG_NAME: &str = "vgname";

/// A logical volume created by this driver.
///
/// `name` doubles as the CSI volume id. Records are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub name: String,
    pub vg_name: String,
    /// Device path, `<volume_dir>/<vg_name>/<name>`.
    pub path: PathBuf,
    /// Size as passed to `lvcreate -L`, e.g. `"5Gi"` or `"1073741824b"`.
    pub size: String,
    pub capacity_bytes: i64,
}

impl LogicalVolume {
    pub fn new(
        volume_dir: &Path,
        name: impl Into<String>,
        vg_name: impl Into<String>,
        size: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let vg_name = vg_name.into();
        let path = Self::device_path(volume_dir, &vg_name, &name);
        Self { name, vg_name, path, size: size.into(), capacity_bytes: 0 }
    }

    /// Builds a record from the fields of a CreateVolume request.
    ///
    /// The volume group comes from the `vgname` parameter (any case). The
    /// size is the exact byte count with lvcreate's `b` unit suffix so the
    /// tool does not reinterpret it as megabytes.
    pub fn for_create(
        volume_dir: &Path,
        name: &str,
        parameters: &HashMap<String, String>,
        capacity_bytes: i64,
    ) -> LvmResult<Self> {
        let vg_name = helper::get_insensitive_parameter(parameters, PARAM_VG_NAME)
            .ok_or_else(|| {
                LvmError::InvalidArgument(format!("missing parameter {}", PARAM_VG_NAME))
            })?;

        if capacity_bytes <= 0 {
            return Err(LvmError::InvalidArgument(format!(
                "capacity must be positive, got {}",
                capacity_bytes
            )));
        }

        let mut lv = Self::new(volume_dir, name, vg_name, format!("{}b", capacity_bytes));
        lv.capacity_bytes = capacity_bytes;
        Ok(lv)
    }

    pub fn device_path(volume_dir: &Path, vg_name: &str, name: &str) -> PathBuf {
        volume_dir.join(vg_name).join(name)
    }
}
