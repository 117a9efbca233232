//! Per-pod block I/O throttling through the cgroup v2 `io.max` interface.
//!
//! A limit is one line per device in the pod's `io.max` file:
//!
//! ```text
//! 253:0 riops=1000 wiops=1000 rbps=1048576 wbps=1048576
//! ```
//!
//! Only cgroup v2 is supported.

pub mod error;
pub mod layout;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

pub use error::{IoLimitError, IoLimitResult};
pub use layout::{ContainerRuntime, QosClass};

use crate::helper;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Present only at the root of a cgroup v2 hierarchy.
const CGROUP_V2_MARKER: &str = "cgroup.controllers";
const IO_MAX_FILE: &str = "io.max";

/// IOPS and bandwidth ceilings. Zero leaves that limit unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoMax {
    pub riops: u64,
    pub wiops: u64,
    pub rbps: u64,
    pub wbps: u64,
}

impl IoMax {
    pub fn is_unlimited(&self) -> bool {
        *self == IoMax::default()
    }

    /// Reads `riops`, `wiops`, `rbps` and `wbps` (any case) from a volume
    /// context. Missing keys stay zero.
    pub fn from_context(context: &HashMap<String, String>) -> IoLimitResult<Self> {
        let read = |key: &str| -> IoLimitResult<u64> {
            match helper::get_insensitive_parameter(context, key) {
                None => Ok(0),
                Some(v) => v.trim().parse::<u64>().map_err(|e| {
                    IoLimitError::InvalidArgument(format!("{}={:?}: {}", key, v, e))
                }),
            }
        };

        Ok(IoMax {
            riops: read("riops")?,
            wiops: read("wiops")?,
            rbps: read("rbps")?,
            wbps: read("wbps")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNumber {
    pub major: u64,
    pub minor: u64,
}

impl DeviceNumber {
    /// `major:minor` of the block device behind `device`, following symlinks
    /// such as `/dev/<vg>/<lv>`.
    pub fn of(device: &Path) -> IoLimitResult<Self> {
        let stat = nix::sys::stat::stat(device).map_err(|source| {
            IoLimitError::DeviceResolutionFailed { device: device.display().to_string(), source }
        })?;
        let rdev = stat.st_rdev;
        Ok(DeviceNumber { major: nix::sys::stat::major(rdev), minor: nix::sys::stat::minor(rdev) })
    }
}

#[derive(Debug, Clone)]
pub struct IoLimitRequest {
    pub device_name: PathBuf,
    pub pod_uid: String,
    pub container_runtime: String,
    pub limits: IoMax,
}

/// A request whose pod cgroup and device have been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRequest {
    pub file_path: PathBuf,
    pub device: DeviceNumber,
    pub limits: IoMax,
}

/// Format an `io.max` line. Unset limits are left out; the order is fixed.
pub fn io_limits_line(device: &DeviceNumber, limits: &IoMax) -> String {
    let mut line = format!("{}:{}", device.major, device.minor);
    let fields = [
        ("riops", limits.riops),
        ("wiops", limits.wiops),
        ("rbps", limits.rbps),
        ("wbps", limits.wbps),
    ];
    for (key, value) in fields {
        if value != 0 {
            line.push_str(&format!(" {}={}", key, value));
        }
    }
    line
}

/// Applies [`IoMax`] limits to a pod's cgroup.
#[derive(Debug, Clone)]
pub struct IoLimiter {
    cgroup_root: PathBuf,
}

impl IoLimiter {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self { cgroup_root: cgroup_root.into() }
    }

    pub fn cgroup_root(&self) -> &Path {
        &self.cgroup_root
    }

    /// Resolve and write the limits. Overwrites whatever the pod's `io.max`
    /// held before; there is no merge with earlier limits and no retry.
    #[instrument(
        skip(self, request),
        fields(device = %request.device_name.display(), pod_uid = %request.pod_uid)
    )]
    pub fn set_io_limits(&self, request: &IoLimitRequest) -> IoLimitResult<()> {
        self.check_cgroup_v2()?;
        let valid = self.validate(request)?;
        self.apply(&valid)
    }

    fn check_cgroup_v2(&self) -> IoLimitResult<()> {
        if !helper::dir_exists(&self.cgroup_root) {
            return Err(IoLimitError::UnsupportedCgroup(format!(
                "{} does not exist",
                self.cgroup_root.display()
            )));
        }
        if !helper::file_exists(self.cgroup_root.join(CGROUP_V2_MARKER)) {
            return Err(IoLimitError::UnsupportedCgroup("CGroupV2 not enabled".to_string()));
        }
        Ok(())
    }

    /// Everything short of the write: UUID check, runtime, pod cgroup,
    /// `io.max` presence and device numbers.
    pub fn validate(&self, request: &IoLimitRequest) -> IoLimitResult<ValidRequest> {
        if !helper::is_valid_uuid(&request.pod_uid) {
            return Err(IoLimitError::InvalidArgument(format!(
                "Expected PodUid in UUID format, Got {}",
                request.pod_uid
            )));
        }

        let runtime: ContainerRuntime = request.container_runtime.parse()?;
        let pod_cgroup = runtime.resolve_pod_cgroup(&self.cgroup_root, &request.pod_uid)?;

        let file_path = pod_cgroup.join(IO_MAX_FILE);
        if !helper::file_exists(&file_path) {
            return Err(IoLimitError::NotFound(format!(
                "io.max file is not present in pod CGroup {}",
                pod_cgroup.display()
            )));
        }

        let device = DeviceNumber::of(&request.device_name)?;
        debug!(major = device.major, minor = device.minor, "resolved device");

        Ok(ValidRequest { file_path, device, limits: request.limits })
    }

    fn apply(&self, request: &ValidRequest) -> IoLimitResult<()> {
        let line = io_limits_line(&request.device, &request.limits);
        let apply_failed = |source| IoLimitError::ApplyFailed {
            path: request.file_path.display().to_string(),
            source,
        };

        // io.max is owned by the kernel; never create it.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&request.file_path)
            .map_err(apply_failed)?;
        file.write_all(line.as_bytes()).map_err(apply_failed)?;

        info!(path = %request.file_path.display(), %line, "io limits applied");
        Ok(())
    }
}

impl Default for IoLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CGROUP_ROOT)
    }
}
