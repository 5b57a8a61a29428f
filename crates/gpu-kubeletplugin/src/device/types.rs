//! Entities of the device model.

use std::fmt;
use std::str::FromStr;

use error_stack::Report;
use uuid::Uuid;

use super::error::ModelError;
use crate::discovery::Capacity;
use crate::discovery::CommonAttributes;
use crate::discovery::PartitionProfile;

/// Namespace for device identities; changing it changes every published uuid
pub const DEVICE_UUID_NAMESPACE: Uuid = uuid::uuid!("12345678-1234-5678-9abc-123456789012");

/// Deterministic identity of the unit at `card`/`render` on device `device_id`
pub fn device_uuid(device_id: &str, card: u32, render: u32) -> Uuid {
    let key = format!("{device_id}-card{card}-render{render}");
    Uuid::new_v5(&DEVICE_UUID_NAMESPACE, key.as_bytes())
}

/// Inventory key of a device, `gpu-<card>-<render>`.
///
/// Stable for the lifetime of a boot only: the kernel may hand out different
/// card and render indices after a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalName {
    pub card: u32,
    pub render: u32,
}

impl CanonicalName {
    pub fn new(card: u32, render: u32) -> Self {
        Self { card, render }
    }

    pub fn parse(name: &str) -> Result<Self, Report<ModelError>> {
        let invalid = || {
            Report::new(ModelError::InvalidName {
                name: name.to_string(),
            })
        };
        let (card, render) = name
            .strip_prefix("gpu-")
            .and_then(|rest| rest.split_once('-'))
            .ok_or_else(invalid)?;
        Ok(Self {
            card: card.parse().map_err(|_| invalid())?,
            render: render.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu-{}-{}", self.card, self.render)
    }
}

impl FromStr for CanonicalName {
    type Err = Report<ModelError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Index of a [`ParentDevice`] in the [`ParentArena`] of the scan that
/// produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParentId(pub(crate) usize);

impl ParentId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Partitioned GPU holding the attributes its partitions inherit; never
/// allocatable itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentDevice {
    pub card: u32,
    pub render: u32,
    pub partition_profile: PartitionProfile,
    pub common: CommonAttributes,
}

/// Parents owned by one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentArena {
    parents: Vec<ParentDevice>,
}

impl ParentArena {
    pub fn push(&mut self, parent: ParentDevice) -> ParentId {
        self.parents.push(parent);
        ParentId(self.parents.len() - 1)
    }

    pub fn get(&self, id: ParentId) -> Option<&ParentDevice> {
        self.parents.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// A whole physical GPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullDevice {
    pub card: u32,
    pub render: u32,
    pub uuid: Uuid,
    pub partition_profile: PartitionProfile,
    pub common: CommonAttributes,
    pub capacity: Capacity,
}

/// Hardware partition of a GPU held in the [`ParentArena`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePartition {
    pub parent: ParentId,
    pub card: u32,
    pub render: u32,
    pub uuid: Uuid,
    pub partition_profile: PartitionProfile,
    pub capacity: Capacity,
}

pub const FULL_DEVICE_TYPE: &str = "accelerator";
pub const PARTITION_DEVICE_TYPE: &str = "accelerator-partition";

/// Unit handed out to claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatableDevice {
    Full(FullDevice),
    Partition(DevicePartition),
}

impl AllocatableDevice {
    pub fn canonical_name(&self) -> CanonicalName {
        match self {
            AllocatableDevice::Full(d) => CanonicalName::new(d.card, d.render),
            AllocatableDevice::Partition(p) => CanonicalName::new(p.card, p.render),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AllocatableDevice::Full(_) => FULL_DEVICE_TYPE,
            AllocatableDevice::Partition(_) => PARTITION_DEVICE_TYPE,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            AllocatableDevice::Full(d) => d.uuid,
            AllocatableDevice::Partition(p) => p.uuid,
        }
    }

    pub fn capacity(&self) -> Capacity {
        match self {
            AllocatableDevice::Full(d) => d.capacity,
            AllocatableDevice::Partition(p) => p.capacity,
        }
    }
}
