//! AMD GPU inventory and checkpoint core of the DRA kubelet plugin.
//!
//! Discovery reads the amdgpu driver's sysfs tree and the KFD topology,
//! classifies every unit as a full GPU or a hardware partition and publishes
//! the result as an [`device::Inventory`]. Prepared claims are persisted in a
//! checksummed [`checkpoint::CheckpointStore`].

pub mod app;
pub mod checkpoint;
pub mod config;
pub mod device;
pub mod discovery;
pub mod platform;
