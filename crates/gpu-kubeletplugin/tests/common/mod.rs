//! Fake host with AMD GPUs laid out the way the amdgpu driver exposes them.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use error_stack::Report;
use gpu_kubeletplugin::discovery::CapacityDefaults;
use gpu_kubeletplugin::discovery::Discovery;
use gpu_kubeletplugin::platform::GpuFamily;
use gpu_kubeletplugin::platform::HardwareQuery;
use gpu_kubeletplugin::platform::HardwareQueryError;
use gpu_kubeletplugin::platform::SysfsLayout;
use tempfile::TempDir;

pub const DRIVER_VERSION: &str = "6.10.5";
pub const DRIVER_SRC_VERSION: &str = "5B3E9F4C2A1D0E6F7A8B9C0";

/// Every card reports the MI300 family
pub struct Mi300Query;

impl HardwareQuery for Mi300Query {
    fn query_family_id(&self, _card: &str) -> Result<GpuFamily, Report<HardwareQueryError>> {
        GpuFamily::from_id(141)
    }

    fn query_vendor_id(&self, _card: &str) -> Result<String, Report<HardwareQueryError>> {
        Ok("0x1002".to_string())
    }
}

pub struct FakeHost {
    dir: TempDir,
    next_node: u32,
}

impl FakeHost {
    pub fn new() -> Self {
        let host = Self {
            dir: TempDir::new().unwrap(),
            next_node: 1,
        };
        // node 0 is the CPU
        host.write(
            &host.layout().topology_nodes_dir().join("0/properties"),
            "cpu_cores_count 96\nsimd_count 0\ndrm_render_minor 0\n",
        );
        fs::create_dir_all(host.layout().driver_module_dir()).unwrap();
        host
    }

    pub fn layout(&self) -> SysfsLayout {
        SysfsLayout::new(self.dir.path())
    }

    pub fn discovery(&self) -> Discovery<Mi300Query> {
        Discovery::new(self.layout(), Mi300Query, CapacityDefaults::default())
    }

    /// KFD topology node for `render`; `vram_bytes` of 0 leaves out the memory bank
    pub fn topology(&mut self, render: u32, unique_id: &str, simd_count: u32, vram_bytes: u64) {
        let dir = self
            .layout()
            .topology_nodes_dir()
            .join(self.next_node.to_string());
        self.next_node += 1;
        self.write(
            &dir.join("properties"),
            &format!(
                "cpu_cores_count 0\nsimd_count {simd_count}\nmem_banks_count 1\nsimd_per_cu 4\n\
                 drm_render_minor {render}\nunique_id {unique_id}\n"
            ),
        );
        if vram_bytes > 0 {
            self.write(
                &dir.join("mem_banks/0/properties"),
                &format!("heap_type 1\nsize_in_bytes {vram_bytes}\nflags 0\nwidth 8192\n"),
            );
        }
    }

    /// PCI device bound to amdgpu in `compute`/`memory` partition mode
    pub fn gpu(&self, pci_addr: &str, compute: &str, memory: &str, card: u32, render: u32) {
        let layout = self.layout();
        let bound = layout.driver_bound_dir().join(pci_addr);
        self.write(&bound.join("current_compute_partition"), &format!("{compute}\n"));
        self.write(&bound.join("current_memory_partition"), &format!("{memory}\n"));
        drm_nodes(&bound, card, render);

        let root_port = &pci_addr[..7];
        let device = self
            .dir
            .path()
            .join(format!("sys/devices/pci{root_port}/{root_port}:01.0"))
            .join(pci_addr);
        fs::create_dir_all(&device).unwrap();
        let link = layout.pci_device(pci_addr);
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        symlink(&device, &link).unwrap();

        let card_name = format!("card{card}");
        self.write(&layout.card_device_attribute(&card_name, "vendor"), "0x1002\n");
        self.write(
            &layout.card_device_attribute(&card_name, "product_name"),
            "AMD Instinct MI300X (OAM)\n",
        );
        let module = layout.card_device_attribute(&card_name, "driver/module");
        self.write(&module.join("version"), &format!("{DRIVER_VERSION}\n"));
        self.write(&module.join("srcversion"), &format!("{DRIVER_SRC_VERSION}\n"));
    }

    /// `amdgpu_xcp_<index>` platform device
    pub fn xcp(&self, index: u32, card: u32, render: u32) {
        let dir = self
            .dir
            .path()
            .join(format!("sys/devices/platform/amdgpu_xcp_{index}"));
        drm_nodes(&dir, card, render);
    }

    fn write(&self, path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn drm_nodes(device_dir: &Path, card: u32, render: u32) {
    fs::create_dir_all(device_dir.join(format!("drm/card{card}"))).unwrap();
    fs::create_dir_all(device_dir.join(format!("drm/renderD{render}"))).unwrap();
}
