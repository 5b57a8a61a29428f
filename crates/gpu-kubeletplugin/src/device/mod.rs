//! Device model: entities, identities and the published inventory.

mod builder;
mod error;
mod inventory;
pub mod render;
mod types;

pub use builder::DeviceModelBuilder;
pub use error::ModelError;
pub use inventory::Inventory;
pub use inventory::InventoryDiff;
pub use inventory::InventoryHandle;
pub use render::render_device;
pub use types::device_uuid;
pub use types::AllocatableDevice;
pub use types::CanonicalName;
pub use types::DevicePartition;
pub use types::FullDevice;
pub use types::ParentArena;
pub use types::ParentDevice;
pub use types::ParentId;
pub use types::DEVICE_UUID_NAMESPACE;
pub use types::FULL_DEVICE_TYPE;
pub use types::PARTITION_DEVICE_TYPE;
