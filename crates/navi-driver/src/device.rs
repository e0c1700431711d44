//! GPU device handle and lifecycle
//!
//! [`GpuDevice::init`] runs discovery, maps the three BAR windows, checks
//! that register reads reach the device and snapshots the PCIe link. The
//! handle owns every mapping; dropping it (or calling [`GpuDevice::close`])
//! unmaps doorbell, aperture and registers in that order before the
//! platform itself is released.

use crate::aperture::{Aperture, VramInfo};
use crate::config::DriverConfig;
use crate::discovery::{self, DeviceSelector, PciDevice};
use crate::dispatch::{CommandSink, DispatchReceipt, Dispatcher, LaunchDescriptor};
use crate::error::{NaviError, Result};
use crate::monitor::{self, ComputeStatus, IdleWait, Monitor};
use crate::platform::{LinuxPlatform, PciAddress, Platform};
use crate::power::{self, PerformanceLevel};
use crate::registers::{RegisterBlock, SENTINEL};
use crate::ring::{self, RingManager, RingStatus, WritePointers};
use crate::topology::{self, PcieLink};
use crate::window::{DoorbellWindow, MappedWindow, WindowKind};
use navi_chip::{bar, pcie};
use std::fmt;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// An initialized GPU
#[derive(Debug)]
pub struct GpuDevice<P: Platform = LinuxPlatform> {
    // Field order is drop order after `Drop::drop` releases the doorbell.
    doorbell: Option<DoorbellWindow>,
    aperture: Aperture,
    registers: RegisterBlock,
    pointers: WritePointers,
    info: PciDevice,
    link: Option<PcieLink>,
    config: DriverConfig,
    platform: P,
}

impl GpuDevice<LinuxPlatform> {
    /// Open a device through sysfs and `/dev/mem`, configured from the environment
    ///
    /// # Errors
    ///
    /// As [`GpuDevice::init`].
    pub fn open(selector: DeviceSelector) -> Result<Self> {
        Self::init(LinuxPlatform::from_env(), selector, DriverConfig::from_env())
    }
}

impl<P: Platform> GpuDevice<P> {
    /// Find, map and check a device.
    ///
    /// # Errors
    ///
    /// - `DeviceNotFound` if no device matches `selector`
    /// - `ConfigRead` if its configuration space cannot be read
    /// - `AlignmentViolation` for a misaligned BAR in strict mode
    /// - `MappingFailed` if the register window or aperture cannot be mapped
    /// - `PoisonedRead` if the status register reads back all-ones
    ///
    /// Anything mapped before the failure is unmapped again.
    pub fn init(platform: P, selector: DeviceSelector, config: DriverConfig) -> Result<Self> {
        tracing::info!("Initializing GPU via {} platform ({selector:?})", platform.name());

        let info = discovery::select(&platform, selector)?;
        let addr = info.address;
        let strict = config.strict_alignment;

        let bar0 = discovery::read_bar(&platform, addr, WindowKind::Registers)?;
        let bar2 = discovery::read_bar(&platform, addr, WindowKind::Aperture)?;
        let registers_phys = bar0.map_base(strict)?;
        let aperture_phys = bar2.map_base(strict)?;

        // Locals unwind in reverse: doorbell, aperture, registers.
        let registers = RegisterBlock::new(MappedWindow::map(
            &platform,
            WindowKind::Registers,
            registers_phys,
            config.register_window_size,
        )?);
        let aperture = Aperture::new(
            MappedWindow::map(&platform, WindowKind::Aperture, aperture_phys, config.aperture_size)?,
            info.vram_bytes(),
        );
        let doorbell = map_doorbell(&platform, addr, &config);

        let status_offset = config.registers.status;
        let status = registers.read32(status_offset);
        if status == SENTINEL {
            // Heuristic: a live device can in principle report all-ones.
            return Err(NaviError::PoisonedRead {
                offset: status_offset,
                value: status,
            });
        }
        if status == 0 {
            tracing::warn!("Status register reads 0; GPU may be uninitialized or hung");
        }

        let link = topology::query_with_retry(&platform, addr, config.link_retries);

        tracing::info!(
            "Initialized {info}: registers {registers_phys:#x}, aperture {aperture_phys:#x}, doorbell {}",
            if doorbell.is_some() { "mapped" } else { "absent" }
        );

        Ok(Self {
            doorbell,
            aperture,
            registers,
            pointers: WritePointers::default(),
            info,
            link,
            config,
            platform,
        })
    }

    /// Unmap everything and release the platform
    pub fn close(self) {
        drop(self);
    }

    /// PCI identity
    #[must_use]
    pub const fn info(&self) -> &PciDevice {
        &self.info
    }

    /// Bus location
    #[must_use]
    pub const fn address(&self) -> PciAddress {
        self.info.address
    }

    /// Device name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Link snapshot taken at init, if the platform reported one
    #[must_use]
    pub const fn link(&self) -> Option<PcieLink> {
        self.link
    }

    /// Configuration in effect
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Platform the device was opened through
    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    // ── Register access ────────────────────────────────────────────────────

    /// Register window
    #[must_use]
    pub const fn registers(&self) -> &RegisterBlock {
        &self.registers
    }

    /// Register window, mutable
    pub fn registers_mut(&mut self) -> &mut RegisterBlock {
        &mut self.registers
    }

    /// Read a 32-bit register
    #[must_use]
    pub fn read32(&self, offset: usize) -> u32 {
        self.registers.read32(offset)
    }

    /// Write a 32-bit register
    pub fn write32(&mut self, offset: usize, value: u32) {
        self.registers.write32(offset, value);
    }

    /// Read a 64-bit register pair
    #[must_use]
    pub fn read64(&self, offset: usize) -> u64 {
        self.registers.read64(offset)
    }

    /// Write a 64-bit register pair
    pub fn write64(&mut self, offset: usize, value: u64) {
        self.registers.write64(offset, value);
    }

    /// Read-modify-write a register
    pub fn modify(&mut self, offset: usize, mask: u32, value: u32) {
        self.registers.modify(offset, mask, value);
    }

    /// Re-read the vendor id and the status register
    #[must_use]
    pub fn verify_access(&self) -> bool {
        let vendor_ok = match self.platform.read_config(self.info.address, pcie::config::VENDOR_DEVICE) {
            Ok(word) => pcie::split_id_word(word).0 == pcie::AMD_VENDOR_ID,
            Err(e) => {
                tracing::warn!("Config read failed during access check: {e}");
                false
            }
        };
        let status = self.registers.read32(self.config.registers.status);
        vendor_ok && status != SENTINEL
    }

    // ── VRAM ───────────────────────────────────────────────────────────────

    /// VRAM aperture
    #[must_use]
    pub const fn aperture(&self) -> &Aperture {
        &self.aperture
    }

    /// VRAM aperture, mutable
    pub fn aperture_mut(&mut self) -> &mut Aperture {
        &mut self.aperture
    }

    /// VRAM layout
    #[must_use]
    pub fn vram_info(&self) -> VramInfo {
        self.aperture.info()
    }

    /// Copy out of VRAM; returns bytes read
    pub fn read_vram(&self, offset: u64, buffer: &mut [u8]) -> usize {
        self.aperture.read(offset, buffer)
    }

    /// Copy into VRAM; returns bytes written
    pub fn write_vram(&mut self, offset: u64, data: &[u8]) -> usize {
        self.aperture.write(offset, data)
    }

    /// Zero-copy VRAM view
    pub fn map_vram(&mut self, offset: u64, len: usize) -> Option<&mut [u8]> {
        self.aperture.map(offset, len)
    }

    // ── Rings and dispatch ─────────────────────────────────────────────────

    /// True if the doorbell window is mapped
    #[must_use]
    pub const fn has_doorbell(&self) -> bool {
        self.doorbell.is_some()
    }

    /// Ring manager over this device's windows
    pub fn rings(&mut self) -> RingManager<'_> {
        RingManager::new(
            &mut self.registers,
            &mut self.aperture,
            self.doorbell.as_mut(),
            &mut self.pointers,
            &self.config.registers,
            self.config.ring_margin_bytes,
        )
    }

    /// Register snapshot of ring `id`
    ///
    /// # Errors
    ///
    /// Returns `InvalidRing` for an unknown id.
    pub fn ring_status(&self, id: u8) -> Result<RingStatus> {
        ring::read_status(&self.registers, &self.config.registers, id)
    }

    /// Dispatcher for the configured compute ring
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::from_config(&self.config)
    }

    /// Encode and submit one compute launch
    ///
    /// # Errors
    ///
    /// Validation, encoding or ring errors.
    pub fn launch(&mut self, launch: &LaunchDescriptor) -> Result<DispatchReceipt> {
        let dispatcher = self.dispatcher();
        dispatcher.launch(self, launch)
    }

    // ── State ──────────────────────────────────────────────────────────────

    /// Status monitor
    #[must_use]
    pub fn monitor(&self) -> Monitor<'_> {
        Monitor::new(&self.registers, &self.config.registers, self.config.poll_interval)
    }

    /// True when the GPU reports idle
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.monitor().is_idle()
    }

    /// Poll until idle; zero timeout waits forever
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` when `timeout` elapses first.
    pub fn wait_for_idle(&self, timeout: Duration) -> Result<IdleWait> {
        self.monitor().wait_for_idle(timeout)
    }

    /// Compute activity snapshot
    #[must_use]
    pub fn compute_status(&self) -> ComputeStatus {
        self.monitor().compute_status()
    }

    /// Pulse the soft-reset register
    pub fn soft_reset(&mut self) {
        monitor::soft_reset(&mut self.registers, &self.config.registers);
    }

    /// Best-effort performance level request
    pub fn set_performance_level(&self, level: PerformanceLevel) -> bool {
        power::request(&self.platform, self.info.address, level)
    }

    /// Multi-line diagnostic summary
    #[must_use]
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

// BAR5 is mapped at 64 KiB granularity whatever its own alignment; slots
// are addressed from the BAR, not from the granule.
fn map_doorbell<P: Platform>(platform: &P, addr: PciAddress, config: &DriverConfig) -> Option<DoorbellWindow> {
    let bar5 = match discovery::read_bar(platform, addr, WindowKind::Doorbell) {
        Ok(bar) if bar.base != 0 => bar,
        Ok(_) => {
            tracing::warn!("Doorbell BAR unassigned; ring notification via registers only");
            return None;
        }
        Err(e) => {
            tracing::warn!("Doorbell BAR unreadable ({e}); ring notification via registers only");
            return None;
        }
    };

    let granule = bar::align_down(bar5.base, WindowKind::Doorbell.alignment());
    let mapped = MappedWindow::map(platform, WindowKind::Doorbell, granule, config.doorbell_size)
        .and_then(|window| DoorbellWindow::new(window, bar5.base));
    match mapped {
        Ok(window) => Some(window),
        Err(e) => {
            tracing::warn!("Doorbell window unavailable ({e}); ring notification via registers only");
            None
        }
    }
}

impl<P: Platform> CommandSink for GpuDevice<P> {
    fn submit(&mut self, ring: u8, words: &[u32]) -> Result<u32> {
        self.rings().submit(ring, words)
    }

    fn doorbell(&mut self, ring: u8, write_ptr: u32) -> Result<()> {
        self.rings().doorbell(ring, write_ptr)
    }
}

impl<P: Platform> fmt::Display for GpuDevice<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.registers.window();
        let vram = self.aperture.info();
        writeln!(f, "GPU: {}", self.info.name)?;
        writeln!(
            f,
            "Vendor: 0x{:04X}, Device: 0x{:04X}",
            self.info.vendor_id, self.info.device_id
        )?;
        writeln!(f, "BAR0 (MMIO): {:#x}, Size: {} MB", regs.phys(), regs.len() / MIB)?;
        writeln!(
            f,
            "BAR2 (VRAM): {:#x}, Size: {} MB",
            vram.aperture_phys,
            vram.visible_bytes / MIB as u64
        )?;
        match self.link {
            Some(link) => write!(f, "PCIe: {link}"),
            None => write!(f, "PCIe: unknown"),
        }
    }
}

impl<P: Platform> Drop for GpuDevice<P> {
    fn drop(&mut self) {
        tracing::info!("Closing {}", self.info);
        drop(self.doorbell.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimLayout, SimPlatform};
    use navi_chip::pcie::device_id;

    fn sim_device() -> (SimPlatform, GpuDevice<SimPlatform>) {
        let sim = SimPlatform::with_gpu(3, 0, device_id::RX_5700_XT);
        let layout = SimLayout::default();
        sim.poke32(layout.registers + 0x8010, 0x0000_0001);
        let dev = GpuDevice::init(sim.clone(), DeviceSelector::Auto, layout.driver_config()).unwrap();
        (sim, dev)
    }

    #[test]
    fn init_maps_all_windows() {
        let (sim, dev) = sim_device();
        assert_eq!(dev.address(), PciAddress::new(3, 0));
        assert!(dev.has_doorbell());
        assert_eq!(sim.live_mappings(), 3);
        assert!(dev.verify_access());
        assert_eq!(dev.vram_info().total_bytes, 8 << 30);
    }

    #[test]
    fn poisoned_status_aborts_and_unmaps() {
        let sim = SimPlatform::with_gpu(3, 0, device_id::RX_5700_XT);
        let layout = SimLayout::default();
        sim.poke32(layout.registers + 0x8010, u32::MAX);

        let err = GpuDevice::init(sim.clone(), DeviceSelector::Auto, layout.driver_config()).unwrap_err();
        assert!(matches!(err, NaviError::PoisonedRead { offset: 0x8010, .. }));
        assert_eq!(sim.live_mappings(), 0);
        assert_eq!(
            sim.unmap_log(),
            vec![layout.doorbell, layout.aperture, layout.registers]
        );
    }

    #[test]
    fn zero_status_is_not_fatal() {
        let sim = SimPlatform::with_gpu(3, 0, device_id::RX_5700_XT);
        let dev = GpuDevice::init(sim, DeviceSelector::Auto, SimLayout::default().driver_config());
        assert!(dev.is_ok());
    }

    #[test]
    fn missing_doorbell_is_tolerated() {
        let sim = SimPlatform::with_gpu(3, 0, device_id::RX_5700_XT);
        let layout = SimLayout::default();
        sim.deny_mapping(layout.doorbell);
        let dev = GpuDevice::init(sim.clone(), DeviceSelector::Auto, layout.driver_config()).unwrap();
        assert!(!dev.has_doorbell());
        assert_eq!(sim.live_mappings(), 2);
    }

    #[test]
    fn summary_format() {
        let (sim, dev) = sim_device();
        drop(sim);
        let text = dev.summary();
        assert!(text.starts_with("GPU: AMD Radeon RX 5700 XT (Navi10)\n"));
        assert!(text.contains("Vendor: 0x1002, Device: 0x731F"));
        assert!(text.contains("BAR2 (VRAM): 0xe0000000, Size: 1 MB"));
        assert!(text.ends_with("PCIe: unknown"));
    }

    #[test]
    fn close_unmaps_in_order() {
        let (sim, dev) = sim_device();
        let layout = SimLayout::default();
        dev.close();
        assert_eq!(
            sim.unmap_log(),
            vec![layout.doorbell, layout.aperture, layout.registers]
        );
    }
}
