//! Node-local CSI plugin that provisions LVM logical volumes and throttles
//! per-pod block I/O through cgroup v2.

pub mod config;
pub mod csi;
pub mod helper;
pub mod iolimit;
pub mod lvm;
