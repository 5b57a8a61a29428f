use std::path::PathBuf;

use api_types::Quantity;
use clap::Parser;

use crate::discovery::CapacityDefaults;
use crate::platform::SysfsLayout;

/// Where and how to look for devices
#[derive(Parser, Debug, Clone)]
pub struct DiscoveryArgs {
    #[arg(
        long,
        env = "SYSFS_ROOT",
        default_value = "/",
        value_hint = clap::ValueHint::DirPath,
        help = "Root under which sys/ and dev/ are read, e.g. /host when the host filesystem is mounted there"
    )]
    pub sysfs_root: PathBuf,

    #[arg(
        long,
        default_value = "80Gi",
        value_parser = parse_bytes,
        help = "Memory reported for a full GPU whose VRAM size is unknown"
    )]
    pub full_device_memory: u64,

    #[arg(
        long,
        default_value = "20Gi",
        value_parser = parse_bytes,
        help = "Memory reported for a GPU partition whose VRAM size is unknown"
    )]
    pub partition_memory: u64,
}

impl DiscoveryArgs {
    pub fn layout(&self) -> SysfsLayout {
        SysfsLayout::new(&self.sysfs_root)
    }

    pub fn capacity_defaults(&self) -> CapacityDefaults {
        CapacityDefaults {
            full_device_memory: self.full_device_memory,
            partition_memory: self.partition_memory,
        }
    }
}

/// Parse a binary SI quantity such as `80Gi` into bytes
fn parse_bytes(s: &str) -> Result<u64, String> {
    let quantity: Quantity = s.parse().map_err(|e| format!("{e}"))?;
    u64::try_from(quantity.value()).map_err(|_| format!("quantity `{s}` must not be negative"))
}
