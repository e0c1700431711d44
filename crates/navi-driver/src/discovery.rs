//! PCI enumeration
//!
//! Walks configuration space through the [`Platform`] looking for AMD display
//! controllers, and decodes the three BARs of a chosen device. Absent slots
//! read back as all-ones (or zero on some bridges); both mean "no device".

use crate::error::{NaviError, Result};
use crate::platform::{PciAddress, Platform};
use crate::window::WindowKind;
use navi_chip::bar;
use navi_chip::pcie::{self, config, ChipVariant};
use std::fmt;

/// A function found in configuration space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    /// Bus location
    pub address: PciAddress,
    /// Vendor id
    pub vendor_id: u16,
    /// Device id
    pub device_id: u16,
    /// Raw class/revision word
    pub class_word: u32,
    /// Marketing name, or a generic label for unknown ids
    pub name: String,
}

impl PciDevice {
    /// Chip variant from the device id
    #[must_use]
    pub const fn chip(&self) -> ChipVariant {
        ChipVariant::from_device_id(self.device_id)
    }

    /// Total on-board VRAM from the device table
    #[must_use]
    pub const fn vram_bytes(&self) -> u64 {
        self.chip().vram_bytes()
    }

    /// AMD vendor id and display-controller base class
    #[must_use]
    pub const fn is_amd_display(&self) -> bool {
        self.vendor_id == pcie::AMD_VENDOR_ID && pcie::base_class(self.class_word) == pcie::CLASS_DISPLAY
    }
}

impl fmt::Display for PciDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] {}",
            self.address, self.vendor_id, self.device_id, self.name
        )
    }
}

/// Which device `init` should take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// First AMD display controller in bus/device order
    #[default]
    Auto,
    /// A fixed location; the scan is skipped
    At {
        /// Bus number
        bus: u8,
        /// Device number
        device: u8,
    },
}

impl DeviceSelector {
    /// Selector from optional CLI-style arguments; both must be given to pin a location
    #[must_use]
    pub const fn from_location(bus: Option<u8>, device: Option<u8>) -> Self {
        match (bus, device) {
            (Some(bus), Some(device)) => Self::At { bus, device },
            _ => Self::Auto,
        }
    }
}

fn read<P: Platform + ?Sized>(platform: &P, addr: PciAddress, offset: u16) -> Result<u32> {
    platform
        .read_config(addr, offset)
        .map_err(|e| NaviError::config_read(addr, offset, e.to_string()))
}

/// Identify whatever answers at `addr`.
///
/// Returns `None` if the id word is all-ones or zero.
///
/// # Errors
///
/// Returns `ConfigRead` if configuration space cannot be read.
pub fn identify<P: Platform + ?Sized>(platform: &P, addr: PciAddress) -> Result<Option<PciDevice>> {
    let id_word = read(platform, addr, config::VENDOR_DEVICE)?;
    if id_word == pcie::ABSENT || id_word == 0 {
        return Ok(None);
    }

    let (vendor_id, device_id) = pcie::split_id_word(id_word);
    let class_word = read(platform, addr, config::CLASS_REVISION)?;

    Ok(Some(PciDevice {
        address: addr,
        vendor_id,
        device_id,
        class_word,
        name: pcie::display_name(device_id),
    }))
}

/// Every AMD display controller, in bus/device order.
///
/// Slots whose configuration space cannot be read are skipped.
pub fn enumerate<P: Platform + ?Sized>(platform: &P) -> Vec<PciDevice> {
    let mut found = Vec::new();

    for bus in 0..=pcie::MAX_BUS {
        for device in 0..pcie::DEVICES_PER_BUS {
            let addr = PciAddress::new(bus, device);
            match identify(platform, addr) {
                Ok(Some(dev)) if dev.is_amd_display() => {
                    tracing::debug!("Found {dev}");
                    found.push(dev);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping {addr}: {e}"),
            }
        }
    }

    tracing::info!("Found {} AMD display controller(s) via {}", found.len(), platform.name());
    found
}

/// First AMD display controller on the bus.
///
/// # Errors
///
/// Returns `DeviceNotFound` if there is none.
pub fn scan_first<P: Platform + ?Sized>(platform: &P) -> Result<PciDevice> {
    for bus in 0..=pcie::MAX_BUS {
        for device in 0..pcie::DEVICES_PER_BUS {
            let addr = PciAddress::new(bus, device);
            match identify(platform, addr) {
                Ok(Some(dev)) if dev.is_amd_display() => {
                    tracing::info!("Selected {dev}");
                    return Ok(dev);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping {addr}: {e}"),
            }
        }
    }
    Err(NaviError::not_found())
}

/// Resolve a selector to a device.
///
/// An explicit location only needs something to answer there; a non-AMD or
/// non-display function is taken with a warning.
///
/// # Errors
///
/// - `DeviceNotFound` if nothing matches
/// - `ConfigRead` if an explicit location cannot be read
pub fn select<P: Platform + ?Sized>(platform: &P, selector: DeviceSelector) -> Result<PciDevice> {
    match selector {
        DeviceSelector::Auto => scan_first(platform),
        DeviceSelector::At { bus, device } => {
            let dev = identify(platform, PciAddress::new(bus, device))?
                .ok_or(NaviError::not_found_at(bus, device))?;
            if !dev.is_amd_display() {
                tracing::warn!("{dev} is not an AMD display controller; continuing as requested");
            }
            Ok(dev)
        }
    }
}

/// One decoded BAR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarInfo {
    /// Window the BAR backs
    pub kind: WindowKind,
    /// Raw value (both dwords for 64-bit BARs)
    pub raw: u64,
    /// Physical base with flag bits stripped
    pub base: u64,
}

impl BarInfo {
    /// Decode from the BAR dword(s)
    #[must_use]
    pub const fn decode(kind: WindowKind, low: u32, high: Option<u32>) -> Self {
        let raw = match high {
            Some(h) => (h as u64) << 32 | low as u64,
            None => low as u64,
        };
        Self {
            kind,
            raw,
            base: bar::bar_address(low, high),
        }
    }

    /// True if the base satisfies the window's alignment rule
    #[must_use]
    pub const fn is_aligned(&self) -> bool {
        bar::is_aligned(self.base, self.kind.alignment())
    }

    /// Base to hand to the region mapper.
    ///
    /// A misaligned base is rounded down to the window alignment with a
    /// warning, or rejected when `strict` is set.
    ///
    /// # Errors
    ///
    /// Returns `AlignmentViolation` for a misaligned base in strict mode.
    pub fn map_base(&self, strict: bool) -> Result<u64> {
        if self.is_aligned() {
            return Ok(self.base);
        }
        let alignment = self.kind.alignment();
        if strict {
            return Err(NaviError::misaligned(self.kind.to_string(), self.base, alignment));
        }
        let rounded = bar::align_down(self.base, alignment);
        tracing::warn!(
            "{} BAR base {:#x} not {alignment:#x}-aligned; mapping from {rounded:#x}",
            self.kind,
            self.base
        );
        Ok(rounded)
    }
}

/// Read and decode the BAR behind `kind`.
///
/// # Errors
///
/// Returns `ConfigRead` if configuration space cannot be read.
pub fn read_bar<P: Platform + ?Sized>(platform: &P, addr: PciAddress, kind: WindowKind) -> Result<BarInfo> {
    let bar = kind.bar();
    let offset = bar.config_offset();
    let low = read(platform, addr, offset)?;
    let high = if bar.is_64bit() {
        Some(read(platform, addr, offset + 4)?)
    } else {
        None
    };

    let info = BarInfo::decode(kind, low, high);
    tracing::debug!(
        "{addr} BAR{} ({kind}): raw {:#x} base {:#x}",
        bar.index(),
        info.raw,
        info.base
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimLayout, SimPlatform};
    use navi_chip::pcie::device_id;

    #[test]
    fn scanner_skips_non_display_function() {
        let sim = SimPlatform::new();
        // AMD audio function first, then a GPU further along
        sim.add_function(PciAddress::new(1, 0), 0xAB38_1002, 0x0403_0000);
        sim.add_function(PciAddress::new(2, 0), 0x1234_8086, 0x0300_0000);
        sim.add_gpu(PciAddress::new(3, 0), device_id::RX_5700_XT, &SimLayout::default());

        let dev = scan_first(&sim).unwrap();
        assert_eq!(dev.address, PciAddress::new(3, 0));
        assert_eq!(dev.vendor_id, pcie::AMD_VENDOR_ID);
        assert_eq!(dev.name, "AMD Radeon RX 5700 XT (Navi10)");
    }

    #[test]
    fn empty_bus_is_not_found() {
        let err = scan_first(&SimPlatform::new()).unwrap_err();
        assert!(matches!(err, NaviError::DeviceNotFound { bus: None, device: None }));
    }

    #[test]
    fn enumerate_lists_every_gpu_in_order() {
        let sim = SimPlatform::new();
        let second = SimLayout {
            registers: 0xD000_0000,
            aperture: 0xC000_0000,
            doorbell: 0xD010_0000,
            ..SimLayout::default()
        };
        sim.add_gpu(PciAddress::new(0x0A, 0), device_id::RX_6900_XT, &second);
        sim.add_gpu(PciAddress::new(0x03, 0), 0x7FFF, &SimLayout::default());

        let devs = enumerate(&sim);
        assert_eq!(devs.len(), 2);
        assert_eq!(devs[0].address.bus, 0x03);
        assert_eq!(devs[0].name, "AMD GPU (Device 0x7FFF)");
        assert_eq!(devs[1].vram_bytes(), 16 << 30);
    }

    #[test]
    fn explicit_location_bypasses_scan() {
        let sim = SimPlatform::with_gpu(5, 0, device_id::RX_5700);
        let dev = select(&sim, DeviceSelector::At { bus: 5, device: 0 }).unwrap();
        assert_eq!(dev.device_id, device_id::RX_5700);

        let err = select(&sim, DeviceSelector::At { bus: 6, device: 0 }).unwrap_err();
        assert_eq!(err.to_string(), "No AMD display controller found at 06:00.0");
    }

    #[test]
    fn zero_id_word_is_absent() {
        let sim = SimPlatform::new();
        sim.add_function(PciAddress::new(0, 1), 0, 0);
        assert!(identify(&sim, PciAddress::new(0, 1)).unwrap().is_none());
    }

    #[test]
    fn bars_decode_and_mask_flags() {
        let sim = SimPlatform::with_gpu(3, 0, device_id::RX_5700_XT);
        let addr = PciAddress::new(3, 0);
        let layout = SimLayout::default();

        let regs = read_bar(&sim, addr, WindowKind::Registers).unwrap();
        assert_eq!(regs.base, layout.registers);
        assert_eq!(regs.raw, layout.registers | 0x4);

        let aperture = read_bar(&sim, addr, WindowKind::Aperture).unwrap();
        assert_eq!(aperture.base % (256 << 20), 0);
        assert!(aperture.is_aligned());

        let doorbell = read_bar(&sim, addr, WindowKind::Doorbell).unwrap();
        assert_eq!(doorbell.base, layout.doorbell);
    }

    #[test]
    fn misaligned_bar_rounds_down_unless_strict() {
        let bar = BarInfo::decode(WindowKind::Aperture, 0xE800_000C, Some(0));
        assert!(!bar.is_aligned());
        assert_eq!(bar.map_base(false).unwrap(), 0xE000_0000);
        assert!(matches!(
            bar.map_base(true),
            Err(NaviError::AlignmentViolation { address: 0xE800_0000, .. })
        ));
    }

    #[test]
    fn selector_from_location() {
        assert_eq!(DeviceSelector::from_location(Some(3), None), DeviceSelector::Auto);
        assert_eq!(
            DeviceSelector::from_location(Some(3), Some(0)),
            DeviceSelector::At { bus: 3, device: 0 }
        );
    }
}
