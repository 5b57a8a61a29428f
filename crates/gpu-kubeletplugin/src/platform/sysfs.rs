//! Well-known kernel pseudo-filesystem locations used by discovery.
//!
//! All paths hang off a configurable root so that discovery can run against a
//! fixture tree in tests or a host mount inside a container.

use std::path::Path;
use std::path::PathBuf;

use tracing::warn;

/// AMD PCI vendor id as exposed in `device/vendor`
pub const AMD_VENDOR_ID: &str = "0x1002";

/// Layout of the sysfs/devfs trees consulted during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsLayout {
    root: PathBuf,
}

impl Default for SysfsLayout {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SysfsLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/sys/module/amdgpu/drivers`, present only when the driver is loaded
    pub fn driver_module_dir(&self) -> PathBuf {
        self.root.join("sys/module/amdgpu/drivers")
    }

    /// `/sys/module/amdgpu/drivers/pci:amdgpu`
    pub fn driver_bound_dir(&self) -> PathBuf {
        self.driver_module_dir().join("pci:amdgpu")
    }

    /// Glob matching driver-bound PCI devices, e.g. `.../pci:amdgpu/0000:19:00.0`
    pub fn driver_bound_pattern(&self) -> String {
        format!(
            "{}/[0-9a-fA-F][0-9a-fA-F][0-9a-fA-F][0-9a-fA-F]:*",
            escape(&self.driver_bound_dir())
        )
    }

    /// Glob matching partition pseudo-devices, e.g. `/sys/devices/platform/amdgpu_xcp_30`
    pub fn partition_pattern(&self) -> String {
        format!(
            "{}/amdgpu_xcp_*",
            escape(&self.root.join("sys/devices/platform"))
        )
    }

    /// `/sys/class/kfd/kfd/topology/nodes`
    pub fn topology_nodes_dir(&self) -> PathBuf {
        self.root.join("sys/class/kfd/kfd/topology/nodes")
    }

    /// `/sys/class/drm`
    pub fn drm_class_dir(&self) -> PathBuf {
        self.root.join("sys/class/drm")
    }

    /// Glob matching the driver module version file of every card
    pub fn driver_version_pattern(&self) -> String {
        format!(
            "{}/card*/device/driver/module/version",
            escape(&self.drm_class_dir())
        )
    }

    /// `/sys/class/drm/<card>/device/<attribute>`
    pub fn card_device_attribute(&self, card: &str, attribute: &str) -> PathBuf {
        self.drm_class_dir().join(card).join("device").join(attribute)
    }

    /// `/sys/bus/pci/devices/<pci_addr>`
    pub fn pci_device(&self, pci_addr: &str) -> PathBuf {
        self.root.join("sys/bus/pci/devices").join(pci_addr)
    }

    /// `/dev/dri/<card>`
    pub fn dri_node(&self, card: &str) -> PathBuf {
        self.root.join("dev/dri").join(card)
    }
}

fn escape(path: &Path) -> String {
    glob::Pattern::escape(&path.to_string_lossy())
}

/// Expand `pattern`, dropping unreadable entries, and return the matches sorted
/// so that every scan visits devices in the same order.
pub fn sorted_glob(pattern: &str) -> Vec<PathBuf> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!("Invalid glob pattern {}: {}", pattern, e);
            return Vec::new();
        }
    };

    let mut matches: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to read glob entry for {}: {}", pattern, e);
                None
            }
        })
        .collect();
    matches.sort();
    matches
}

/// DRM nodes found under a device's `drm/` directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrmNodes {
    pub card: Option<u32>,
    pub render: Option<u32>,
}

impl DrmNodes {
    /// Collect the `card<N>` and `renderD<N>` entries below `device_dir/drm`
    pub fn read(device_dir: &Path) -> Self {
        let pattern = format!("{}/drm/*", escape(device_dir));
        let mut nodes = DrmNodes::default();

        for path in sorted_glob(&pattern) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(index) = name.strip_prefix("renderD") {
                if let Ok(index) = index.parse() {
                    nodes.render = Some(index);
                }
            } else if let Some(index) = name.strip_prefix("card") {
                if let Ok(index) = index.parse() {
                    nodes.card = Some(index);
                }
            }
        }
        nodes
    }
}
