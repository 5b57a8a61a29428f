//! Kernel interfaces consulted during discovery.

pub mod drm;
pub mod pci;
pub mod sysfs;

pub use drm::DrmHardwareQuery;
pub use drm::GpuFamily;
pub use drm::HardwareQuery;
pub use drm::HardwareQueryError;
pub use pci::Locality;
pub use sysfs::SysfsLayout;
