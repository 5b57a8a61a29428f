use core::error::Error;

use derive_more::Display;

/// Inconsistencies found while building or rendering the device model.
///
/// These indicate a construction bug rather than a host problem and are never
/// skipped.
#[derive(Debug, Display)]
pub enum ModelError {
    #[display("Partition {partition} references missing parent {parent}")]
    MissingParent { partition: String, parent: String },
    #[display("Partition {partition} references {parent}, which is not a partitioned GPU")]
    NotAParent { partition: String, parent: String },
    #[display("Device {name} references parent slot {index} outside the device arena")]
    DanglingParent { name: String, index: usize },
    #[display("Invalid canonical device name: {name}")]
    InvalidName { name: String },
}

impl Error for ModelError {}
