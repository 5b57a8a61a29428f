//! Hardware queries answered by the amdgpu kernel driver.
//!
//! Only the GPU family needs the driver itself; everything else discovery
//! consumes is plain sysfs text.

use core::error::Error;
use std::fmt;
use std::fs::File;
use std::os::fd::AsRawFd;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;

use super::sysfs::SysfsLayout;
use super::sysfs::AMD_VENDOR_ID;

/// Errors raised by a [`HardwareQuery`] implementation.
#[derive(Debug, Display)]
pub enum HardwareQueryError {
    #[display("Failed to read vendor id of {card}")]
    VendorUnreadable { card: String },
    #[display("{card} is not an AMD GPU (vendor {vendor})")]
    NotAmdGpu { card: String, vendor: String },
    #[display("Failed to open DRM node for {card}")]
    OpenFailed { card: String },
    #[display("AMDGPU_INFO ioctl failed for {card}")]
    IoctlFailed { card: String },
    #[display("Unknown family id: {family_id}")]
    UnknownFamily { family_id: u32 },
}

impl Error for HardwareQueryError {}

/// AMDGPU_FAMILY_* identifiers from `include/uapi/drm/amdgpu_drm.h`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuFamily {
    Si,
    Ci,
    Kv,
    Vi,
    Cz,
    Ai,
    Rv,
    Nv,
    Vgh,
    Gc11_0_0,
    Yc,
    Gc11_0_1,
    Gc10_3_6,
    Gc11_5_0,
    Gc10_3_7,
    Gc12_0_0,
}

impl GpuFamily {
    pub fn from_id(family_id: u32) -> Result<Self, Report<HardwareQueryError>> {
        let family = match family_id {
            110 => GpuFamily::Si,
            120 => GpuFamily::Ci,
            125 => GpuFamily::Kv,
            130 => GpuFamily::Vi,
            135 => GpuFamily::Cz,
            141 => GpuFamily::Ai,
            142 => GpuFamily::Rv,
            143 => GpuFamily::Nv,
            144 => GpuFamily::Vgh,
            145 => GpuFamily::Gc11_0_0,
            146 => GpuFamily::Yc,
            148 => GpuFamily::Gc11_0_1,
            149 => GpuFamily::Gc10_3_6,
            150 => GpuFamily::Gc11_5_0,
            151 => GpuFamily::Gc10_3_7,
            152 => GpuFamily::Gc12_0_0,
            _ => return Err(Report::new(HardwareQueryError::UnknownFamily { family_id })),
        };
        Ok(family)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GpuFamily::Si => "SI",
            GpuFamily::Ci => "CI",
            GpuFamily::Kv => "KV",
            GpuFamily::Vi => "VI",
            GpuFamily::Cz => "CZ",
            GpuFamily::Ai => "AI",
            GpuFamily::Rv => "RV",
            GpuFamily::Nv => "NV",
            GpuFamily::Vgh => "VGH",
            GpuFamily::Gc11_0_0 => "GC_11_0_0",
            GpuFamily::Yc => "YC",
            GpuFamily::Gc11_0_1 => "GC_11_0_1",
            GpuFamily::Gc10_3_6 => "GC_10_3_6",
            GpuFamily::Gc11_5_0 => "GC_11_5_0",
            GpuFamily::Gc10_3_7 => "GC_10_3_7",
            GpuFamily::Gc12_0_0 => "GC_12_0_0",
        }
    }
}

impl fmt::Display for GpuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of the attributes that cannot be read from sysfs text files.
///
/// `card` is a DRM card name such as `card1`.
pub trait HardwareQuery {
    fn query_family_id(&self, card: &str) -> Result<GpuFamily, Report<HardwareQueryError>>;

    fn query_vendor_id(&self, card: &str) -> Result<String, Report<HardwareQueryError>>;
}

#[allow(
    non_camel_case_types,
    dead_code,
    reason = "FFI types must match the amdgpu uapi layout"
)]
mod ffi_types {
    /// `struct drm_amdgpu_info`, the query union is kept opaque
    #[repr(C)]
    #[derive(Debug, Default)]
    pub(super) struct drm_amdgpu_info {
        pub return_pointer: u64,
        pub return_size: u32,
        pub query: u32,
        pub params: [u32; 4],
    }

    /// Leading fields of `struct drm_amdgpu_info_device`; the kernel copies at
    /// most `return_size` bytes.
    #[repr(C)]
    #[derive(Debug, Default)]
    pub(super) struct drm_amdgpu_info_device {
        pub device_id: u32,
        pub chip_rev: u32,
        pub external_rev: u32,
        pub pci_rev: u32,
        pub family: u32,
    }

    pub(super) const AMDGPU_INFO_DEV_INFO: u32 = 0x16;

    const DRM_IOCTL_BASE: u64 = b'd' as u64;
    const DRM_COMMAND_BASE: u64 = 0x40;
    const DRM_AMDGPU_INFO: u64 = 0x05;
    const IOC_WRITE: u64 = 1;

    /// `DRM_IOW(DRM_COMMAND_BASE + DRM_AMDGPU_INFO, struct drm_amdgpu_info)`
    pub(super) const DRM_IOCTL_AMDGPU_INFO: u64 = (IOC_WRITE << 30)
        | ((std::mem::size_of::<drm_amdgpu_info>() as u64) << 16)
        | (DRM_IOCTL_BASE << 8)
        | (DRM_COMMAND_BASE + DRM_AMDGPU_INFO);
}

use ffi_types::*;

/// [`HardwareQuery`] backed by sysfs for the vendor and by the amdgpu
/// `AMDGPU_INFO` ioctl for the family.
#[derive(Debug, Clone, Default)]
pub struct DrmHardwareQuery {
    layout: SysfsLayout,
}

impl DrmHardwareQuery {
    pub fn new(layout: SysfsLayout) -> Self {
        Self { layout }
    }

    fn query_device_info(
        &self,
        card: &str,
    ) -> Result<drm_amdgpu_info_device, Report<HardwareQueryError>> {
        let node = self.layout.dri_node(card);
        let file = File::open(&node)
            .change_context(HardwareQueryError::OpenFailed {
                card: card.to_string(),
            })
            .attach_printable_lazy(|| format!("node: {}", node.display()))?;

        let mut device_info = drm_amdgpu_info_device::default();
        let mut request = drm_amdgpu_info {
            return_pointer: &mut device_info as *mut drm_amdgpu_info_device as u64,
            return_size: std::mem::size_of::<drm_amdgpu_info_device>() as u32,
            query: AMDGPU_INFO_DEV_INFO,
            ..Default::default()
        };

        // SAFETY: `request` matches the uapi layout and points at a live,
        // writable `device_info` no smaller than `return_size`.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                DRM_IOCTL_AMDGPU_INFO as _,
                &mut request as *mut drm_amdgpu_info,
            )
        };
        if rc < 0 {
            return Err(Report::new(std::io::Error::last_os_error()).change_context(
                HardwareQueryError::IoctlFailed {
                    card: card.to_string(),
                },
            ));
        }

        debug!(
            card = card,
            device_id = %format!("{:#x}", device_info.device_id),
            family_id = device_info.family,
            "Queried amdgpu device info"
        );
        Ok(device_info)
    }
}

impl HardwareQuery for DrmHardwareQuery {
    fn query_family_id(&self, card: &str) -> Result<GpuFamily, Report<HardwareQueryError>> {
        let vendor = self.query_vendor_id(card)?;
        if vendor != AMD_VENDOR_ID {
            return Err(Report::new(HardwareQueryError::NotAmdGpu {
                card: card.to_string(),
                vendor,
            }));
        }

        let device_info = self.query_device_info(card)?;
        GpuFamily::from_id(device_info.family)
    }

    fn query_vendor_id(&self, card: &str) -> Result<String, Report<HardwareQueryError>> {
        let path = self.layout.card_device_attribute(card, "vendor");
        utils::fs::read_trimmed(&path)
            .change_context(HardwareQueryError::VendorUnreadable {
                card: card.to_string(),
            })
            .attach_printable_lazy(|| format!("path: {}", path.display()))
    }
}
