//! Register-level userspace driver for AMD Navi GPUs.
//!
//! Finds the GPU on the PCI bus, maps its register, VRAM and doorbell BARs
//! into the process, and drives the command processor directly: PM4 packets
//! are encoded here, copied into a ring in VRAM and announced with a
//! doorbell. No kernel driver, no ROCm, no Mesa.
//!
//! # Layers
//!
//! ```text
//! GpuDevice (lifecycle)
//!   ├─ discovery      PCI scan, BAR decode
//!   ├─ window         bounds-checked BAR mappings
//!   ├─ registers      MMIO read/write/modify
//!   ├─ aperture       VRAM copy and zero-copy views
//!   ├─ ring           ring status, submit, doorbell
//!   ├─ dispatch       launch → PM4 stream → ring   (packet encoder below)
//!   └─ monitor        idle wait, compute status, soft reset
//!
//! Platform (privileged collaborator)
//!   LinuxPlatform     sysfs + /dev/mem
//!   SimPlatform       heap-backed simulated bus
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use navi_driver::{DeviceSelector, GpuDevice, LaunchDescriptor};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut gpu = GpuDevice::open(DeviceSelector::Auto)?;
//! println!("{gpu}");
//!
//! let launch = LaunchDescriptor::new(0x0010_0000, [64, 1, 1], [256, 1, 1]).with_args(0x0020_0000);
//! gpu.launch(&launch)?;
//! gpu.wait_for_idle(Duration::from_millis(100))?;
//! # Ok(())
//! # }
//! ```
//!
//! Requires root and a kernel that permits `/dev/mem` access to PCI BARs.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod aperture;
pub mod config;
mod device;
pub mod discovery;
pub mod dispatch;
mod error;
pub mod monitor;
pub mod packet;
pub mod platform;
pub mod power;
pub mod registers;
pub mod ring;
pub mod sim;
pub mod topology;
pub mod window;

/// Hardware identification constants (re-exported from navi-chip).
pub mod pcie_ids {
    pub use navi_chip::pcie::{
        device_id, display_name, ChipVariant, AMD_VENDOR_ID, CLASS_DISPLAY, KNOWN_DEVICE_IDS,
    };
}

pub use aperture::{Aperture, VramInfo};
pub use config::{DriverConfig, RegisterMap};
pub use device::GpuDevice;
pub use discovery::{BarInfo, DeviceSelector, PciDevice};
pub use dispatch::{CommandSink, DispatchReceipt, Dispatcher, LaunchDescriptor, ResourceDescriptor};
pub use error::{NaviError, Result};
pub use monitor::{ComputeStatus, GpuStatus, IdleWait, Monitor};
pub use packet::CommandStream;
pub use platform::{LinuxPlatform, MappedMemory, PciAddress, Platform};
pub use power::PerformanceLevel;
pub use registers::RegisterBlock;
pub use ring::{RingManager, RingState, RingStatus};
pub use sim::{SimLayout, SimPlatform};
pub use topology::PcieLink;
pub use window::{DoorbellWindow, MappedWindow, WindowKind};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        CommandSink, DeviceSelector, DriverConfig, GpuDevice, LaunchDescriptor, NaviError,
        PerformanceLevel, Platform, Result, RingStatus,
    };
}
