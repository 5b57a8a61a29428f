use std::collections::BTreeMap;
use std::collections::HashMap;

use error_stack::Report;
use tracing::error;
use tracing::info;

use super::error::ModelError;
use super::inventory::Inventory;
use super::types::device_uuid;
use super::types::AllocatableDevice;
use super::types::DevicePartition;
use super::types::FullDevice;
use super::types::ParentArena;
use super::types::ParentDevice;
use super::types::ParentId;
use crate::discovery::DeviceRole;
use crate::discovery::RawDevices;

/// Turns enumerated raw records into an [`Inventory`]
pub struct DeviceModelBuilder;

impl DeviceModelBuilder {
    /// Build the inventory for one scan.
    ///
    /// Raw records are visited in key order, so when two units end up with
    /// the same canonical name the first one is kept and the other is logged.
    /// A partition whose parent is not a partitioned GPU of the same raw map
    /// fails the whole build.
    pub fn build(raw: &RawDevices) -> Result<Inventory, Report<ModelError>> {
        let mut parents = ParentArena::default();
        let mut parent_ids: HashMap<&str, ParentId> = HashMap::new();

        for (key, record) in raw {
            if let DeviceRole::PartitionParent { common } = &record.role {
                let id = parents.push(ParentDevice {
                    card: record.card,
                    render: record.render,
                    partition_profile: record.partition_profile.clone(),
                    common: common.clone(),
                });
                parent_ids.insert(key.as_str(), id);
            }
        }

        let mut devices = BTreeMap::new();
        for (key, record) in raw {
            let device = match &record.role {
                DeviceRole::PartitionParent { .. } => continue,
                DeviceRole::Full { common, capacity } => AllocatableDevice::Full(FullDevice {
                    card: record.card,
                    render: record.render,
                    uuid: device_uuid(&common.device_id, record.card, record.render),
                    partition_profile: record.partition_profile.clone(),
                    common: common.clone(),
                    capacity: *capacity,
                }),
                DeviceRole::Partition {
                    parent,
                    device_id,
                    capacity,
                } => {
                    let Some(parent_id) = parent_ids.get(parent.as_str()) else {
                        let context = if raw.contains_key(parent) {
                            ModelError::NotAParent {
                                partition: key.clone(),
                                parent: parent.clone(),
                            }
                        } else {
                            ModelError::MissingParent {
                                partition: key.clone(),
                                parent: parent.clone(),
                            }
                        };
                        return Err(Report::new(context));
                    };
                    AllocatableDevice::Partition(DevicePartition {
                        parent: *parent_id,
                        card: record.card,
                        render: record.render,
                        uuid: device_uuid(device_id, record.card, record.render),
                        partition_profile: record.partition_profile.clone(),
                        capacity: *capacity,
                    })
                }
            };

            let name = device.canonical_name();
            if devices.contains_key(&name) {
                error!(
                    "Duplicate canonical name {} for {}, keeping the first device",
                    name, key
                );
                continue;
            }
            info!("Registered {} {} as {}", device.type_name(), key, name);
            devices.insert(name, device);
        }

        Ok(Inventory::new(devices, parents))
    }
}
