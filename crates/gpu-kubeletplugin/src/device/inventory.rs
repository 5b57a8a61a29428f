use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

use api_types::Device;
use error_stack::Report;

use super::error::ModelError;
use super::render::render_device;
use super::types::AllocatableDevice;
use super::types::CanonicalName;
use super::types::ParentArena;
use super::types::ParentDevice;

/// Devices found by one scan, keyed by canonical name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    devices: BTreeMap<CanonicalName, AllocatableDevice>,
    parents: ParentArena,
}

impl Inventory {
    pub fn new(devices: BTreeMap<CanonicalName, AllocatableDevice>, parents: ParentArena) -> Self {
        Self { devices, parents }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, name: &CanonicalName) -> Option<&AllocatableDevice> {
        self.devices.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &CanonicalName> {
        self.devices.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalName, &AllocatableDevice)> {
        self.devices.iter()
    }

    pub fn parents(&self) -> &ParentArena {
        &self.parents
    }

    /// Parent of `device` when it is a partition
    pub fn parent_of(&self, device: &AllocatableDevice) -> Option<&ParentDevice> {
        match device {
            AllocatableDevice::Full(_) => None,
            AllocatableDevice::Partition(p) => self.parents.get(p.parent),
        }
    }

    pub fn render(&self, name: &CanonicalName) -> Option<Result<Device, Report<ModelError>>> {
        self.devices
            .get(name)
            .map(|device| render_device(device, &self.parents))
    }

    /// Render every device in canonical name order, failing on the first
    /// device that cannot be rendered
    pub fn render_all(&self) -> Result<Vec<Device>, Report<ModelError>> {
        self.devices
            .values()
            .map(|device| render_device(device, &self.parents))
            .collect()
    }

    /// Names that appeared, disappeared or changed between `self` and `next`
    pub fn diff(&self, next: &Inventory) -> InventoryDiff {
        let mut diff = InventoryDiff::default();

        for (name, device) in &self.devices {
            match next.devices.get(name) {
                None => diff.removed.push(*name),
                Some(other) => {
                    let unchanged =
                        device == other && self.parent_of(device) == next.parent_of(other);
                    if !unchanged {
                        diff.changed.push(*name);
                    }
                }
            }
        }
        diff.added = next
            .devices
            .keys()
            .filter(|name| !self.devices.contains_key(name))
            .copied()
            .collect();

        diff
    }
}

/// Changes between two consecutive inventories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryDiff {
    pub added: Vec<CanonicalName>,
    pub removed: Vec<CanonicalName>,
    pub changed: Vec<CanonicalName>,
}

impl InventoryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Published inventory.
///
/// `replace` swaps in a complete inventory; readers holding an earlier
/// snapshot keep it alive until they drop it.
#[derive(Debug, Default)]
pub struct InventoryHandle {
    current: RwLock<Arc<Inventory>>,
}

impl InventoryHandle {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            current: RwLock::new(Arc::new(inventory)),
        }
    }

    pub fn snapshot(&self) -> Arc<Inventory> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Publish `inventory` and return the one it replaced
    pub fn replace(&self, inventory: Inventory) -> Arc<Inventory> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, Arc::new(inventory))
    }
}
