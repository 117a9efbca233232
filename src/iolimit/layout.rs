//! Where the kubelet puts a pod's cgroup, per container runtime.
//!
//! With the systemd cgroup driver every pod gets a slice below
//! `kubepods.slice`. Guaranteed pods sit directly under it, best-effort and
//! burstable pods under a per-QoS child slice. Runtimes are described as an
//! ordered list of templates; the first candidate directory that exists wins.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use super::error::{IoLimitError, IoLimitResult};
use crate::helper;

/// Placeholder replaced with `pod<uid with '-' as '_'>`.
const POD_PLACEHOLDER: &str = "{pod}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosClass {
    Guaranteed,
    BestEffort,
    Burstable,
}

#[derive(Debug, Clone, Copy)]
pub struct SliceTemplate {
    pub qos: QosClass,
    pub template: &'static str,
}

const CONTAINERD_SLICES: &[SliceTemplate] = &[
    SliceTemplate { qos: QosClass::Guaranteed, template: "kubepods.slice/kubepods-{pod}.slice" },
    SliceTemplate {
        qos: QosClass::BestEffort,
        template: "kubepods.slice/kubepods-besteffort.slice/kubepods-besteffort-{pod}.slice",
    },
    SliceTemplate {
        qos: QosClass::Burstable,
        template: "kubepods.slice/kubepods-burstable.slice/kubepods-burstable-{pod}.slice",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRuntime {
    Containerd,
}

impl ContainerRuntime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerRuntime::Containerd => "containerd",
        }
    }

    /// Candidate slices in probe order.
    pub fn slice_templates(&self) -> &'static [SliceTemplate] {
        match self {
            ContainerRuntime::Containerd => CONTAINERD_SLICES,
        }
    }

    /// `pod5f4b1c3e_2a9d_...` for pod UID `5f4b1c3e-2a9d-...`.
    pub fn pod_slice_suffix(pod_uid: &str) -> String {
        format!("pod{}", pod_uid.replace('-', "_"))
    }

    pub fn candidate_paths(&self, cgroup_root: &Path, pod_uid: &str) -> Vec<(QosClass, PathBuf)> {
        let suffix = Self::pod_slice_suffix(pod_uid);
        self.slice_templates()
            .iter()
            .map(|t| (t.qos, cgroup_root.join(t.template.replace(POD_PLACEHOLDER, &suffix))))
            .collect()
    }

    /// First candidate slice directory that exists for this pod.
    pub fn resolve_pod_cgroup(&self, cgroup_root: &Path, pod_uid: &str) -> IoLimitResult<PathBuf> {
        for (qos, path) in self.candidate_paths(cgroup_root, pod_uid) {
            if helper::dir_exists(&path) {
                debug!(?qos, path = %path.display(), "resolved pod cgroup");
                return Ok(path);
            }
        }
        Err(IoLimitError::NotFound(format!("CGroup Path not found for pod with Uid: {}", pod_uid)))
    }
}

impl FromStr for ContainerRuntime {
    type Err = IoLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "containerd" => Ok(ContainerRuntime::Containerd),
            other => Err(IoLimitError::UnsupportedRuntime(other.to_string())),
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
