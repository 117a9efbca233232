//! Logical volume lifecycle on top of lvm2.
//!
//! A volume group is a pool of physical extents built from one or more
//! physical volumes (`pvcreate /dev/loop10 && vgcreate lvmvg /dev/loop10`).
//! Logical volumes are carved out of a group with `lvcreate` and show up as
//! block devices under `/dev/<vg>/<lv>`. This module creates and removes
//! them and tracks what it created in a [`VolumeRegistry`].

pub mod backend;
pub mod error;
pub mod manager;
pub mod registry;
pub mod volume;

pub use backend::{LvmCommand, VolumeBackend};
pub use error::{LvmError, LvmResult};
pub use manager::VolumeManager;
pub use registry::VolumeRegistry;
pub use volume::LogicalVolume;
