//! Device discovery: topology scan, enumeration and model construction.

pub mod enumerator;
pub mod topology;

#[cfg(test)]
pub(crate) mod fixture;

use error_stack::Report;
use tracing::info;

pub use self::enumerator::Capacity;
pub use self::enumerator::CapacityDefaults;
pub use self::enumerator::CommonAttributes;
pub use self::enumerator::DeviceEnumerator;
pub use self::enumerator::DeviceRole;
pub use self::enumerator::DriverVersion;
pub use self::enumerator::PartitionProfile;
pub use self::enumerator::RawDeviceRecord;
pub use self::enumerator::RawDevices;
pub use self::topology::TopologyRecord;
pub use self::topology::TopologyScanner;
use crate::device::DeviceModelBuilder;
use crate::device::Inventory;
use crate::device::ModelError;
use crate::platform::HardwareQuery;
use crate::platform::SysfsLayout;

/// One complete discovery pass producing an [`Inventory`]
pub struct Discovery<Q> {
    enumerator: DeviceEnumerator<Q>,
}

impl<Q: HardwareQuery> Discovery<Q> {
    pub fn new(layout: SysfsLayout, query: Q, defaults: CapacityDefaults) -> Self {
        Self {
            enumerator: DeviceEnumerator::new(layout, query, defaults),
        }
    }

    /// Scan the host and build a fresh inventory.
    ///
    /// Per-device problems are logged and skipped; only an inconsistent raw
    /// device map is an error.
    pub fn scan(&self) -> Result<Inventory, Report<ModelError>> {
        let raw = self.enumerator.enumerate();
        let inventory = DeviceModelBuilder::build(&raw)?;
        info!("Discovered {} AMD GPU devices", inventory.len());
        Ok(inventory)
    }
}
