//! Fake sysfs trees for discovery tests.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use error_stack::Report;
use tempfile::TempDir;

use crate::platform::GpuFamily;
use crate::platform::HardwareQuery;
use crate::platform::HardwareQueryError;
use crate::platform::SysfsLayout;

pub struct SysfsFixture {
    dir: TempDir,
}

impl SysfsFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn layout(&self) -> SysfsLayout {
        SysfsLayout::new(self.dir.path())
    }

    pub fn topology_node(&self, node: u32, properties: &str, vram_bytes: Option<u64>) {
        let dir = self.layout().topology_nodes_dir().join(node.to_string());
        write(&dir.join("properties"), properties);
        if let Some(bytes) = vram_bytes {
            write(
                &dir.join("mem_banks/0/properties"),
                &format!("heap_type 1\nsize_in_bytes {bytes}\nflags 0\n"),
            );
        }
    }

    /// GPU topology node for `render` with the given unique id
    pub fn gpu_node(&self, node: u32, render: u32, unique_id: &str, simd_count: u32, vram: u64) {
        self.topology_node(
            node,
            &format!(
                "simd_count {simd_count}\nsimd_per_cu 4\ndrm_render_minor {render}\nunique_id {unique_id}\n"
            ),
            Some(vram),
        );
    }

    /// Driver-bound PCI device with its DRM nodes, PCIe path and card attributes
    pub fn driver_bound(
        &self,
        pci_addr: &str,
        compute: Option<&str>,
        memory: Option<&str>,
        card: u32,
        render: u32,
    ) {
        let layout = self.layout();
        let dir = layout.driver_bound_dir().join(pci_addr);
        fs::create_dir_all(&dir).unwrap();
        if let Some(compute) = compute {
            write(&dir.join("current_compute_partition"), &format!("{compute}\n"));
        }
        if let Some(memory) = memory {
            write(&dir.join("current_memory_partition"), &format!("{memory}\n"));
        }
        self.drm_nodes(&dir, card, render);

        let device = self
            .dir
            .path()
            .join("sys/devices/pci0000:00/0000:00:01.0")
            .join(pci_addr);
        fs::create_dir_all(&device).unwrap();
        let link = layout.pci_device(pci_addr);
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        symlink(&device, &link).unwrap();

        let card_name = format!("card{card}");
        write(&layout.card_device_attribute(&card_name, "vendor"), "0x1002\n");
        write(
            &layout.card_device_attribute(&card_name, "product_name"),
            "AMD Instinct MI300X (OAM)\n",
        );
    }

    pub fn pseudo_device(&self, name: &str, card: u32, render: u32) {
        let dir = self.dir.path().join("sys/devices/platform").join(name);
        fs::create_dir_all(&dir).unwrap();
        self.drm_nodes(&dir, card, render);
    }

    pub fn driver_version(&self, card: u32, version: &str, src_version: &str) {
        let module = self
            .layout()
            .card_device_attribute(&format!("card{card}"), "driver/module");
        write(&module.join("version"), &format!("{version}\n"));
        write(&module.join("srcversion"), &format!("{src_version}\n"));
    }

    fn drm_nodes(&self, device_dir: &Path, card: u32, render: u32) {
        fs::create_dir_all(device_dir.join(format!("drm/card{card}"))).unwrap();
        fs::create_dir_all(device_dir.join(format!("drm/renderD{render}"))).unwrap();
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Answers family queries from a fixed table instead of the kernel driver
#[derive(Debug, Default)]
pub struct StaticHardwareQuery {
    families: HashMap<String, GpuFamily>,
}

impl StaticHardwareQuery {
    pub fn with_family(mut self, card: &str, family: GpuFamily) -> Self {
        self.families.insert(card.to_string(), family);
        self
    }
}

impl HardwareQuery for StaticHardwareQuery {
    fn query_family_id(&self, card: &str) -> Result<GpuFamily, Report<HardwareQueryError>> {
        self.families.get(card).copied().ok_or_else(|| {
            Report::new(HardwareQueryError::OpenFailed {
                card: card.to_string(),
            })
        })
    }

    fn query_vendor_id(&self, _card: &str) -> Result<String, Report<HardwareQueryError>> {
        Ok(crate::platform::sysfs::AMD_VENDOR_ID.to_string())
    }
}
