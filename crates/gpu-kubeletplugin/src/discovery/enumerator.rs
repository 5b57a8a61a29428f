//! Driver-bound device and partition pseudo-device enumeration.
//!
//! A GPU in single-partition mode (`spx`) shows up once, under the amdgpu PCI
//! driver directory. When the compute partition mode is anything else the PCI
//! device only holds what the slices have in common, and every slice is a
//! separate `amdgpu_xcp_<N>` platform device with its own DRM nodes. Slices are
//! tied to their PCI device through the KFD topology `unique_id`.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::topology::TopologyRecord;
use super::topology::TopologyScanner;
use crate::platform::sysfs::sorted_glob;
use crate::platform::sysfs::DrmNodes;
use crate::platform::HardwareQuery;
use crate::platform::Locality;
use crate::platform::SysfsLayout;

/// Compute partition mode in which the whole card is one device
pub const SINGLE_PARTITION_MODE: &str = "spx";

pub const DEFAULT_FULL_DEVICE_MEMORY: u64 = 80 << 30;
pub const DEFAULT_PARTITION_MEMORY: u64 = 20 << 30;

/// Memory reported when the topology has no VRAM figure for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityDefaults {
    pub full_device_memory: u64,
    pub partition_memory: u64,
}

impl Default for CapacityDefaults {
    fn default() -> Self {
        Self {
            full_device_memory: DEFAULT_FULL_DEVICE_MEMORY,
            partition_memory: DEFAULT_PARTITION_MEMORY,
        }
    }
}

/// Consumable resources of one allocatable unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    pub memory_bytes: u64,
    pub compute_units: u32,
    pub simd_units: u32,
}

/// `amdgpu` module version strings, identical for every card on the node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverVersion {
    pub version: String,
    pub src_version: String,
}

/// Compute and memory partition modes, rendered as `<compute>_<memory>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionProfile {
    pub compute: String,
    pub memory: String,
}

impl fmt::Display for PartitionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.compute, self.memory)
    }
}

/// Attributes a physical GPU shares with every partition carved from it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonAttributes {
    pub pci_addr: String,
    /// Topology `unique_id`, the key partitions use to find their parent
    pub device_id: String,
    pub family: String,
    pub product_name: String,
    pub driver: DriverVersion,
    pub locality: Option<Locality>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRole {
    /// Whole, unpartitioned GPU
    Full {
        common: CommonAttributes,
        capacity: Capacity,
    },
    /// Partitioned GPU; carries the shared attributes but is not allocatable
    PartitionParent { common: CommonAttributes },
    /// Hardware slice of the `PartitionParent` stored under raw key `parent`
    Partition {
        parent: String,
        device_id: String,
        capacity: Capacity,
    },
}

/// One unit found during enumeration, before names and identities are assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceRecord {
    pub card: u32,
    pub render: u32,
    /// KFD node, absent when the render device has no topology entry
    pub node_id: Option<u32>,
    pub partition_profile: PartitionProfile,
    pub role: DeviceRole,
}

impl RawDeviceRecord {
    pub fn common(&self) -> Option<&CommonAttributes> {
        match &self.role {
            DeviceRole::Full { common, .. } | DeviceRole::PartitionParent { common } => {
                Some(common)
            }
            DeviceRole::Partition { .. } => None,
        }
    }
}

/// Raw records keyed by PCI address (driver-bound devices) or platform device
/// name (partitions)
pub type RawDevices = BTreeMap<String, RawDeviceRecord>;

pub struct DeviceEnumerator<Q> {
    layout: SysfsLayout,
    query: Q,
    defaults: CapacityDefaults,
}

impl<Q: HardwareQuery> DeviceEnumerator<Q> {
    pub fn new(layout: SysfsLayout, query: Q, defaults: CapacityDefaults) -> Self {
        Self {
            layout,
            query,
            defaults,
        }
    }

    /// Walk the driver-bound devices and partition pseudo-devices.
    ///
    /// Units that cannot be classified are logged and left out; enumeration
    /// itself never fails.
    #[tracing::instrument(level = "debug", skip(self), fields(root = %self.layout.root().display()))]
    pub fn enumerate(&self) -> RawDevices {
        let mut devices = RawDevices::new();

        let module_dir = self.layout.driver_module_dir();
        if !module_dir.exists() {
            warn!(
                "amdgpu driver unavailable: {} does not exist",
                module_dir.display()
            );
            return devices;
        }

        let topology = TopologyScanner::new(self.layout.topology_nodes_dir()).scan();
        let driver = self.read_driver_version();

        for path in sorted_glob(&self.layout.driver_bound_pattern()) {
            let Some(key) = file_name(&path) else {
                continue;
            };
            if let Some(record) = self.driver_bound_record(&path, &key, &topology, &driver) {
                devices.insert(key, record);
            }
        }

        let parents: HashMap<String, String> = devices
            .iter()
            .filter_map(|(key, record)| match &record.role {
                DeviceRole::PartitionParent { common } if !common.device_id.is_empty() => {
                    Some((common.device_id.clone(), key.clone()))
                }
                _ => None,
            })
            .collect();

        let mut partitions = Vec::new();
        for path in sorted_glob(&self.layout.partition_pattern()) {
            let Some(key) = file_name(&path) else {
                continue;
            };
            if let Some(record) = self.partition_record(&path, &key, &topology, &parents, &devices)
            {
                partitions.push((key, record));
            }
        }
        devices.extend(partitions);

        info!("Enumerated {} AMD GPU units", devices.len());
        devices
    }

    fn driver_bound_record(
        &self,
        path: &Path,
        pci_addr: &str,
        topology: &BTreeMap<u32, TopologyRecord>,
        driver: &DriverVersion,
    ) -> Option<RawDeviceRecord> {
        debug!("Inspecting driver-bound device {}", path.display());

        let profile = PartitionProfile {
            compute: read_partition_mode(&path.join("current_compute_partition")),
            memory: read_partition_mode(&path.join("current_memory_partition")),
        };
        if profile.compute.is_empty() {
            warn!(
                "Unknown compute partition type for device {}, skipping",
                pci_addr
            );
            return None;
        }

        let nodes = DrmNodes::read(path);
        let (Some(card), Some(render)) = (nodes.card, nodes.render) else {
            warn!(
                "Device {} has no card/renderD node (card: {:?}, render: {:?}), skipping",
                pci_addr, nodes.card, nodes.render
            );
            return None;
        };

        let topo = topology.get(&render);
        let device_id = match topo {
            Some(record) => record.unique_id.clone(),
            None => {
                warn!(
                    "No topology node for renderD{} of device {}, device id unknown",
                    render, pci_addr
                );
                String::new()
            }
        };

        let common = CommonAttributes {
            pci_addr: pci_addr.to_string(),
            device_id,
            family: self.read_family(card),
            product_name: self.read_product_name(card),
            driver: driver.clone(),
            locality: self.resolve_locality(pci_addr),
        };

        let role = if profile.compute == SINGLE_PARTITION_MODE {
            info!(
                "Found full AMD GPU {} (card{}, renderD{}), compute type: {}, memory type: {}",
                pci_addr, card, render, profile.compute, profile.memory
            );
            DeviceRole::Full {
                common,
                capacity: capacity_of(topo, self.defaults.full_device_memory, "device", pci_addr),
            }
        } else {
            info!(
                "Found partitioned AMD GPU {} (card{}, renderD{}), compute type: {}, memory type: {}",
                pci_addr, card, render, profile.compute, profile.memory
            );
            DeviceRole::PartitionParent { common }
        };

        Some(RawDeviceRecord {
            card,
            render,
            node_id: topo.map(|t| t.node_id),
            partition_profile: profile,
            role,
        })
    }

    fn partition_record(
        &self,
        path: &Path,
        name: &str,
        topology: &BTreeMap<u32, TopologyRecord>,
        parents: &HashMap<String, String>,
        devices: &RawDevices,
    ) -> Option<RawDeviceRecord> {
        debug!("Inspecting partition device {}", path.display());

        let nodes = DrmNodes::read(path);
        let (Some(card), Some(render)) = (nodes.card, nodes.render) else {
            debug!("Partition device {} exposes no DRM nodes, skipping", name);
            return None;
        };

        // Only render devices known to KFD are usable partitions
        let Some(topo) = topology.get(&render) else {
            info!(
                "Partition device {} (renderD{}) has no topology node, discarding",
                name, render
            );
            return None;
        };

        let Some(parent_key) = parents.get(&topo.unique_id) else {
            warn!(
                "No partitioned parent GPU with device id {} for {}, discarding",
                topo.unique_id, name
            );
            return None;
        };
        let partition_profile = devices
            .get(parent_key)
            .map(|parent| parent.partition_profile.clone())
            .unwrap_or_default();

        info!(
            "Found AMD GPU partition {} (card{}, renderD{}) of {}",
            name, card, render, parent_key
        );
        Some(RawDeviceRecord {
            card,
            render,
            node_id: Some(topo.node_id),
            partition_profile,
            role: DeviceRole::Partition {
                parent: parent_key.clone(),
                device_id: topo.unique_id.clone(),
                capacity: capacity_of(Some(topo), self.defaults.partition_memory, "partition", name),
            },
        })
    }

    /// Version strings of the first card whose module exposes both files
    fn read_driver_version(&self) -> DriverVersion {
        let versions = sorted_glob(&self.layout.driver_version_pattern());
        if versions.is_empty() {
            warn!("No AMD GPU cards found for driver version reading");
            return DriverVersion::default();
        }

        for version_path in versions {
            let src_path = version_path.with_file_name("srcversion");
            match (
                utils::fs::read_trimmed(&version_path),
                utils::fs::read_trimmed(&src_path),
            ) {
                (Ok(version), Ok(src_version)) => {
                    debug!(%version, %src_version, "Read amdgpu driver version");
                    return DriverVersion {
                        version,
                        src_version,
                    };
                }
                (version, src_version) => debug!(
                    "Incomplete driver version at {}: version {:?}, srcversion {:?}",
                    version_path.display(),
                    version.err(),
                    src_version.err()
                ),
            }
        }

        warn!("Failed to read AMDGPU driver version or src version from any card");
        DriverVersion::default()
    }

    fn read_family(&self, card: u32) -> String {
        let card_name = format!("card{card}");
        match self.query.query_family_id(&card_name) {
            Ok(family) => family.to_string(),
            Err(e) => {
                warn!("Failed to get card family name for {}: {:?}", card_name, e);
                String::new()
            }
        }
    }

    fn read_product_name(&self, card: u32) -> String {
        let path = self
            .layout
            .card_device_attribute(&format!("card{card}"), "product_name");
        match utils::fs::read_trimmed(&path) {
            Ok(name) => normalize_product_name(&name),
            Err(e) => {
                warn!("Failed to read product name from {}: {}", path.display(), e);
                String::new()
            }
        }
    }

    fn resolve_locality(&self, pci_addr: &str) -> Option<Locality> {
        match Locality::resolve(&self.layout, pci_addr) {
            Ok(locality) => Some(locality),
            Err(e) => {
                warn!("Failed to get PCIe root for device {}: {:?}", pci_addr, e);
                None
            }
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn read_partition_mode(path: &Path) -> String {
    match utils::fs::read_trimmed(path) {
        Ok(mode) => mode.to_lowercase(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// `AMD Instinct MI300X (OAM)` becomes `AMD_Instinct_MI300X_OAM`
pub fn normalize_product_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '(' | ')'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

fn capacity_of(
    topology: Option<&TopologyRecord>,
    default_memory: u64,
    kind: &str,
    name: &str,
) -> Capacity {
    let memory_bytes = match topology {
        Some(record) if record.has_vram() => record.vram_bytes,
        _ => {
            warn!(
                "VRAM info not available for {} {}, using default {}GiB",
                kind,
                name,
                default_memory >> 30
            );
            default_memory
        }
    };

    Capacity {
        memory_bytes,
        compute_units: topology.map_or(0, |t| t.cu_count),
        simd_units: topology.map_or(0, |t| t.simd_count),
    }
}
