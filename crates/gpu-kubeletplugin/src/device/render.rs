//! Attribute and capacity representation published for each device.

use std::collections::BTreeMap;

use api_types::Device;
use api_types::DeviceAttribute;
use api_types::QualifiedName;
use api_types::Quantity;
use error_stack::Report;
use tracing::warn;

use super::error::ModelError;
use super::types::AllocatableDevice;
use super::types::ParentArena;
use crate::discovery::Capacity;
use crate::discovery::CommonAttributes;
use crate::platform::pci::PCIE_ROOT_ATTRIBUTE;

pub const ATTR_TYPE: &str = "type";
pub const ATTR_UUID: &str = "uuid";
pub const ATTR_PCI_ADDR: &str = "pciAddr";
pub const ATTR_PARENT_PCI_ADDR: &str = "parentPciAddr";
pub const ATTR_CARD_INDEX: &str = "cardIndex";
pub const ATTR_RENDER_INDEX: &str = "renderIndex";
pub const ATTR_DEVICE_ID: &str = "deviceID";
pub const ATTR_PARENT_DEVICE_ID: &str = "parentDeviceID";
pub const ATTR_FAMILY: &str = "family";
pub const ATTR_PRODUCT_NAME: &str = "productName";
pub const ATTR_DRIVER_VERSION: &str = "driverVersion";
pub const ATTR_DRIVER_SRC_VERSION: &str = "driverSrcVersion";
pub const ATTR_PARTITION_PROFILE: &str = "partitionProfile";

pub const CAPACITY_MEMORY: &str = "memory";
pub const CAPACITY_COMPUTE_UNITS: &str = "computeUnits";
pub const CAPACITY_SIMD_UNITS: &str = "simdUnits";

/// Render `device`, resolving a partition's parent through `parents`.
///
/// A partition whose parent is not in `parents` cannot be rendered and is
/// reported instead of being published with missing attributes.
pub fn render_device(
    device: &AllocatableDevice,
    parents: &ParentArena,
) -> Result<Device, Report<ModelError>> {
    let name = device.canonical_name();
    let mut attributes = BTreeMap::new();
    let mut put = |key: &str, value: DeviceAttribute| {
        attributes.insert(QualifiedName::from(key), value);
    };

    put(ATTR_TYPE, string(device.type_name()));
    put(ATTR_UUID, string(&device.uuid().to_string()));
    put(ATTR_CARD_INDEX, DeviceAttribute::Int(name.card.into()));
    put(ATTR_RENDER_INDEX, DeviceAttribute::Int(name.render.into()));

    let (common, partition_profile) = match device {
        AllocatableDevice::Full(full) => {
            put(ATTR_PCI_ADDR, string(&full.common.pci_addr));
            put(ATTR_DEVICE_ID, string(&full.common.device_id));
            (&full.common, &full.partition_profile)
        }
        AllocatableDevice::Partition(partition) => {
            let parent = parents.get(partition.parent).ok_or_else(|| {
                Report::new(ModelError::DanglingParent {
                    name: name.to_string(),
                    index: partition.parent.index(),
                })
            })?;
            put(ATTR_PARENT_PCI_ADDR, string(&parent.common.pci_addr));
            put(ATTR_PARENT_DEVICE_ID, string(&parent.common.device_id));
            (&parent.common, &partition.partition_profile)
        }
    };
    put(ATTR_PARTITION_PROFILE, string(&partition_profile.to_string()));
    put_common(&mut put, common);

    Ok(Device {
        name: name.to_string(),
        attributes,
        capacity: render_capacity(&name.to_string(), device.capacity()),
    })
}

fn put_common(put: &mut impl FnMut(&str, DeviceAttribute), common: &CommonAttributes) {
    put(ATTR_FAMILY, string(&common.family));
    put(ATTR_PRODUCT_NAME, string(&common.product_name));
    put(
        ATTR_DRIVER_VERSION,
        DeviceAttribute::Version(common.driver.version.clone()),
    );
    put(ATTR_DRIVER_SRC_VERSION, string(&common.driver.src_version));
    if let Some(locality) = &common.locality {
        put(PCIE_ROOT_ATTRIBUTE, string(&locality.pcie_root));
    }
}

fn render_capacity(name: &str, capacity: Capacity) -> BTreeMap<QualifiedName, Quantity> {
    let memory = i64::try_from(capacity.memory_bytes).unwrap_or_else(|_| {
        warn!(
            "Memory size {} of {} exceeds the quantity range, using {}",
            capacity.memory_bytes,
            name,
            i64::MAX
        );
        i64::MAX
    });
    BTreeMap::from([
        (CAPACITY_MEMORY.to_string(), Quantity::binary_si(memory)),
        (
            CAPACITY_COMPUTE_UNITS.to_string(),
            Quantity::binary_si(capacity.compute_units.into()),
        ),
        (
            CAPACITY_SIMD_UNITS.to_string(),
            Quantity::binary_si(capacity.simd_units.into()),
        ),
    ])
}

fn string(value: &str) -> DeviceAttribute {
    DeviceAttribute::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::device::types::device_uuid;
    use crate::device::types::DevicePartition;
    use crate::device::types::FullDevice;
    use crate::device::types::ParentDevice;
    use crate::device::types::ParentId;
    use crate::discovery::DriverVersion;
    use crate::discovery::PartitionProfile;
    use crate::platform::Locality;

    fn common() -> CommonAttributes {
        CommonAttributes {
            pci_addr: "0000:19:00.0".to_string(),
            device_id: "4242".to_string(),
            family: "AI".to_string(),
            product_name: "AMD_Instinct_MI300X_OAM".to_string(),
            driver: DriverVersion {
                version: "6.8.5".to_string(),
                src_version: "ABCDEF0123".to_string(),
            },
            locality: Some(Locality {
                pcie_root: "pci0000:00".to_string(),
            }),
        }
    }

    fn profile(compute: &str, memory: &str) -> PartitionProfile {
        PartitionProfile {
            compute: compute.to_string(),
            memory: memory.to_string(),
        }
    }

    #[test]
    fn test_render_full_device() {
        let device = AllocatableDevice::Full(FullDevice {
            card: 1,
            render: 128,
            uuid: device_uuid("4242", 1, 128),
            partition_profile: profile("spx", "nps1"),
            common: common(),
            capacity: Capacity {
                memory_bytes: 80 << 30,
                compute_units: 304,
                simd_units: 1216,
            },
        });

        let rendered = render_device(&device, &ParentArena::default()).unwrap();

        assert_eq!(rendered.name, "gpu-1-128");
        let keys: Vec<&str> = rendered.attributes.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "cardIndex",
                "deviceID",
                "driverSrcVersion",
                "driverVersion",
                "family",
                "partitionProfile",
                "pciAddr",
                "productName",
                "renderIndex",
                "resource.kubernetes.io/pcieRoot",
                "type",
                "uuid",
            ]
        );
        assert_eq!(rendered.attribute("type").unwrap().as_str(), Some("accelerator"));
        assert_eq!(rendered.attribute("renderIndex").unwrap().as_int(), Some(128));
        assert_eq!(
            rendered.attribute("driverVersion"),
            Some(&DeviceAttribute::Version("6.8.5".to_string()))
        );
        assert_eq!(
            rendered.attribute("partitionProfile").unwrap().as_str(),
            Some("spx_nps1")
        );
        assert_eq!(rendered.capacity("memory").unwrap().to_string(), "80Gi");
        assert_eq!(rendered.capacity("computeUnits").unwrap().to_string(), "304");
    }

    #[test]
    fn test_render_partition_inherits_parent() {
        let mut parents = ParentArena::default();
        let parent = parents.push(ParentDevice {
            card: 1,
            render: 128,
            partition_profile: profile("cpx", "nps4"),
            common: common(),
        });
        let device = AllocatableDevice::Partition(DevicePartition {
            parent,
            card: 9,
            render: 136,
            uuid: device_uuid("4242", 9, 136),
            partition_profile: profile("cpx", "nps4"),
            capacity: Capacity {
                memory_bytes: 20 << 30,
                compute_units: 38,
                simd_units: 152,
            },
        });

        let rendered = render_device(&device, &parents).unwrap();

        assert_eq!(rendered.name, "gpu-9-136");
        assert_eq!(
            rendered.attribute("type").unwrap().as_str(),
            Some("accelerator-partition")
        );
        assert_eq!(
            rendered.attribute("parentPciAddr").unwrap().as_str(),
            Some("0000:19:00.0")
        );
        assert_eq!(
            rendered.attribute("parentDeviceID").unwrap().as_str(),
            Some("4242")
        );
        assert!(rendered.attribute("pciAddr").is_none());
        assert!(rendered.attribute("deviceID").is_none());
        assert_eq!(rendered.attribute("family").unwrap().as_str(), Some("AI"));
        assert_eq!(
            rendered.attribute(PCIE_ROOT_ATTRIBUTE).unwrap().as_str(),
            Some("pci0000:00")
        );
        assert_eq!(rendered.capacity("memory").unwrap().to_string(), "20Gi");
    }

    #[test]
    fn test_render_without_locality_omits_pcie_root() {
        let mut attrs = common();
        attrs.locality = None;
        let device = AllocatableDevice::Full(FullDevice {
            card: 1,
            render: 128,
            uuid: device_uuid("4242", 1, 128),
            partition_profile: profile("spx", "nps1"),
            common: attrs,
            capacity: Capacity::default(),
        });

        let rendered = render_device(&device, &ParentArena::default()).unwrap();
        assert!(rendered.attribute(PCIE_ROOT_ATTRIBUTE).is_none());
        assert_eq!(rendered.capacity("memory").unwrap().to_string(), "0");
    }

    #[test]
    fn test_render_clamps_oversized_memory() {
        let device = AllocatableDevice::Full(FullDevice {
            card: 1,
            render: 128,
            uuid: device_uuid("4242", 1, 128),
            partition_profile: profile("spx", "nps1"),
            common: common(),
            capacity: Capacity {
                memory_bytes: u64::MAX,
                compute_units: 304,
                simd_units: 1216,
            },
        });

        let rendered = render_device(&device, &ParentArena::default()).unwrap();
        assert_eq!(rendered.capacity("memory").unwrap().value(), i64::MAX);
    }

    #[test]
    fn test_render_dangling_parent_fails() {
        let device = AllocatableDevice::Partition(DevicePartition {
            parent: ParentId(4),
            card: 9,
            render: 136,
            uuid: device_uuid("4242", 9, 136),
            partition_profile: profile("cpx", "nps4"),
            capacity: Capacity::default(),
        });

        let err = render_device(&device, &ParentArena::default()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ModelError::DanglingParent { index: 4, .. }
        ));
    }
}
