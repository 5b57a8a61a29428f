//! PCIe topology lookups used for placement affinity.

use core::error::Error;
use std::path::Component;
use std::path::Path;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;

use super::sysfs::SysfsLayout;

/// Attribute under which the PCIe root complex of a device is published
pub const PCIE_ROOT_ATTRIBUTE: &str = "resource.kubernetes.io/pcieRoot";

#[derive(Debug, Display)]
pub enum LocalityError {
    #[display("Failed to resolve sysfs path of PCI device {pci_addr}")]
    Unresolvable { pci_addr: String },
    #[display("No PCIe root found in sysfs path of PCI device {pci_addr}")]
    NoRootComplex { pci_addr: String },
}

impl Error for LocalityError {}

/// Topology grouping of a device, shared by every partition carved from it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locality {
    /// Root complex identifier such as `pci0000:00`
    pub pcie_root: String,
}

impl Locality {
    /// Resolve the PCIe root of `pci_addr` from the `/sys/bus/pci/devices`
    /// symlink, which points into `/sys/devices/pci<domain>:<bus>/...`.
    pub fn resolve(layout: &SysfsLayout, pci_addr: &str) -> Result<Self, Report<LocalityError>> {
        let link = layout.pci_device(pci_addr);
        let target = link
            .canonicalize()
            .change_context(LocalityError::Unresolvable {
                pci_addr: pci_addr.to_string(),
            })
            .attach_printable_lazy(|| format!("path: {}", link.display()))?;

        pcie_root_of(&target)
            .map(|pcie_root| Locality { pcie_root })
            .ok_or_else(|| {
                Report::new(LocalityError::NoRootComplex {
                    pci_addr: pci_addr.to_string(),
                })
                .attach_printable(format!("resolved: {}", target.display()))
            })
    }
}

fn pcie_root_of(path: &Path) -> Option<String> {
    path.components().find_map(|component| match component {
        Component::Normal(name) => {
            let name = name.to_str()?;
            let rest = name.strip_prefix("pci")?;
            let (domain, bus) = rest.split_once(':')?;
            let is_hex = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit());
            (is_hex(domain) && is_hex(bus)).then(|| name.to_string())
        }
        _ => None,
    })
}
