//! Simulated platform for hardware-free development and tests.
//!
//! Configuration space is a table of 64-dword images; physical memory is a
//! set of heap regions. Mapping a range hands out a view into the region, so
//! the driver's volatile loads and stores land in ordinary memory that tests
//! can inspect with [`SimPlatform::peek32`] and script with
//! [`SimPlatform::poke32`].
//!
//! `SimPlatform` is a cheap handle (`Clone` shares state), so a test can keep
//! one copy while the device owns another.

use crate::config::DriverConfig;
use crate::platform::{MappedMemory, PciAddress, Platform};
use crate::power::PerformanceLevel;
use crate::topology::PcieLink;
use navi_chip::pcie::{self, config};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const CONFIG_DWORDS: usize = 64;

/// Physical placement of a simulated GPU's three windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimLayout {
    /// Register window base
    pub registers: u64,
    /// Register window size
    pub register_size: usize,
    /// Aperture base
    pub aperture: u64,
    /// Aperture size
    pub aperture_size: usize,
    /// Doorbell window base
    pub doorbell: u64,
    /// Doorbell window size
    pub doorbell_size: usize,
}

impl Default for SimLayout {
    /// Small windows that still cover every register the driver touches.
    fn default() -> Self {
        Self {
            registers: 0xF000_0000,
            register_size: 64 * 1024,
            aperture: 0xE000_0000,
            aperture_size: 1024 * 1024,
            doorbell: 0xF010_0000,
            doorbell_size: 64 * 1024,
        }
    }
}

impl SimLayout {
    /// Driver configuration whose window sizes match this layout
    #[must_use]
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig::default().with_window_sizes(
            self.register_size,
            self.aperture_size,
            self.doorbell_size,
        )
    }
}

#[derive(Debug)]
struct SimRegion {
    phys: u64,
    // u64 cells keep the base 8-byte aligned; atomics make shared mutation sound.
    words: Box<[AtomicU64]>,
}

impl SimRegion {
    fn new(phys: u64, len: usize) -> Self {
        let words = (0..len.div_ceil(8)).map(|_| AtomicU64::new(0)).collect();
        Self { phys, words }
    }

    fn len(&self) -> usize {
        self.words.len() * 8
    }

    fn base(&self) -> *mut u8 {
        self.words.as_ptr().cast::<u8>().cast_mut()
    }

    fn contains(&self, phys: u64, len: usize) -> bool {
        phys >= self.phys
            && usize::try_from(phys - self.phys)
                .ok()
                .and_then(|off| off.checked_add(len))
                .is_some_and(|end| end <= self.len())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn offset_of(&self, phys: u64) -> usize {
        (phys - self.phys) as usize
    }
}

#[derive(Debug)]
struct SimMapping {
    region: Arc<SimRegion>,
    offset: usize,
    len: usize,
    phys: u64,
    unmaps: Arc<Mutex<Vec<u64>>>,
}

// SAFETY: the region's buffer outlives the mapping (the Arc keeps it alive);
// offset + len is inside the buffer and offset is a multiple of 8 (checked in
// map_physical), so the base is 8-byte aligned.
unsafe impl MappedMemory for SimMapping {
    fn as_ptr(&self) -> NonNull<u8> {
        let ptr = self.region.base().wrapping_add(self.offset);
        NonNull::new(ptr).unwrap_or(NonNull::dangling())
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SimMapping {
    fn drop(&mut self) {
        tracing::debug!("sim: unmap {:#x} ({:#x} bytes)", self.phys, self.len);
        lock(&self.unmaps).push(self.phys);
    }
}

#[derive(Debug, Default)]
struct SimState {
    config: BTreeMap<PciAddress, [u32; CONFIG_DWORDS]>,
    regions: Vec<Arc<SimRegion>>,
    denied: HashSet<u64>,
    link: Option<PcieLink>,
    link_failures: u32,
    link_queries: u32,
    performance: Option<PerformanceLevel>,
}

/// In-process simulated PCI bus
#[derive(Debug, Clone, Default)]
pub struct SimPlatform {
    state: Arc<Mutex<SimState>>,
    unmaps: Arc<Mutex<Vec<u64>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimPlatform {
    /// Empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with one GPU at `bus:device` using the default layout
    #[must_use]
    pub fn with_gpu(bus: u8, device: u8, device_id: u16) -> Self {
        let sim = Self::new();
        sim.add_gpu(PciAddress::new(bus, device), device_id, &SimLayout::default());
        sim
    }

    /// Add a function with the given id and class words and no BARs
    pub fn add_function(&self, addr: PciAddress, id_word: u32, class_word: u32) {
        let mut state = lock(&self.state);
        let image = state.config.entry(addr).or_insert([0; CONFIG_DWORDS]);
        image[usize::from(config::VENDOR_DEVICE) / 4] = id_word;
        image[usize::from(config::CLASS_REVISION) / 4] = class_word;
    }

    /// Add an AMD display controller with BARs and backing memory per `layout`
    pub fn add_gpu(&self, addr: PciAddress, device_id: u16, layout: &SimLayout) {
        let id_word = u32::from(device_id) << 16 | u32::from(pcie::AMD_VENDOR_ID);
        let class_word = u32::from(pcie::CLASS_DISPLAY) << 24 | 0xC1;
        self.add_function(addr, id_word, class_word);

        // 64-bit memory BARs: type bits 0b10; BAR2 also prefetchable
        self.set_bar64(addr, config::BAR0, layout.registers | 0x4);
        self.set_bar64(addr, config::BAR2, layout.aperture | 0xC);
        #[allow(clippy::cast_possible_truncation)]
        let bar5 = layout.doorbell as u32;
        self.set_config(addr, config::BAR5, bar5);

        self.add_memory(layout.registers, layout.register_size);
        self.add_memory(layout.aperture, layout.aperture_size);
        self.add_memory(layout.doorbell, layout.doorbell_size);
    }

    /// Write a 64-bit BAR pair
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_bar64(&self, addr: PciAddress, offset: u16, value: u64) {
        self.set_config(addr, offset, value as u32);
        self.set_config(addr, offset + 4, (value >> 32) as u32);
    }

    /// Overwrite one configuration dword
    pub fn set_config(&self, addr: PciAddress, offset: u16, value: u32) {
        let mut state = lock(&self.state);
        let image = state.config.entry(addr).or_insert([0; CONFIG_DWORDS]);
        if let Some(slot) = image.get_mut(usize::from(offset) / 4) {
            *slot = value;
        }
    }

    /// Back `[phys, phys + len)` with zeroed memory
    pub fn add_memory(&self, phys: u64, len: usize) {
        lock(&self.state).regions.push(Arc::new(SimRegion::new(phys, len)));
    }

    /// Make every mapping request at `phys` fail
    pub fn deny_mapping(&self, phys: u64) {
        lock(&self.state).denied.insert(phys);
    }

    /// Link reported by `link_status` (`None` = unsupported)
    pub fn set_link(&self, link: Option<PcieLink>) {
        lock(&self.state).link = link;
    }

    /// Fail the next `count` link queries with a transient error
    pub fn fail_link_queries(&self, count: u32) {
        lock(&self.state).link_failures = count;
    }

    /// Number of link queries seen so far
    #[must_use]
    pub fn link_queries(&self) -> u32 {
        lock(&self.state).link_queries
    }

    /// Last performance level requested
    #[must_use]
    pub fn performance_level(&self) -> Option<PerformanceLevel> {
        lock(&self.state).performance
    }

    /// Physical bases in the order their mappings were dropped
    #[must_use]
    pub fn unmap_log(&self) -> Vec<u64> {
        lock(&self.unmaps).clone()
    }

    /// Number of mappings currently alive
    #[must_use]
    pub fn live_mappings(&self) -> usize {
        lock(&self.state)
            .regions
            .iter()
            .map(|r| Arc::strong_count(r) - 1)
            .sum()
    }

    fn region_for(&self, phys: u64, len: usize) -> Option<Arc<SimRegion>> {
        lock(&self.state)
            .regions
            .iter()
            .find(|r| r.contains(phys, len))
            .cloned()
    }

    /// Store a dword at a physical address (like a device-side write).
    ///
    /// # Panics
    ///
    /// Panics if no simulated memory backs `phys` or it is not 4-byte aligned.
    #[allow(clippy::cast_ptr_alignment)]
    pub fn poke32(&self, phys: u64, value: u32) {
        let region = self.region_or_panic(phys, 4);
        // SAFETY: range checked by region_or_panic; 4-byte aligned (asserted);
        // atomics underneath permit mutation through a shared reference.
        unsafe {
            region
                .base()
                .add(region.offset_of(phys))
                .cast::<u32>()
                .write_volatile(value);
        }
    }

    /// Load a dword from a physical address.
    ///
    /// # Panics
    ///
    /// Panics if no simulated memory backs `phys` or it is not 4-byte aligned.
    #[must_use]
    #[allow(clippy::cast_ptr_alignment)]
    pub fn peek32(&self, phys: u64) -> u32 {
        let region = self.region_or_panic(phys, 4);
        // SAFETY: as in poke32.
        unsafe {
            region
                .base()
                .add(region.offset_of(phys))
                .cast::<u32>()
                .read_volatile()
        }
    }

    /// Store a qword at an 8-byte aligned physical address.
    ///
    /// # Panics
    ///
    /// Panics if no simulated memory backs `phys` or it is not 8-byte aligned.
    #[allow(clippy::cast_possible_truncation)]
    pub fn poke64(&self, phys: u64, value: u64) {
        assert_eq!(phys % 8, 0, "unaligned qword poke at {phys:#x}");
        self.poke32(phys, value as u32);
        self.poke32(phys + 4, (value >> 32) as u32);
    }

    /// Read `len` dwords starting at `phys`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not backed.
    #[must_use]
    pub fn peek_words(&self, phys: u64, len: usize) -> Vec<u32> {
        (0..len as u64).map(|i| self.peek32(phys + i * 4)).collect()
    }

    fn region_or_panic(&self, phys: u64, len: usize) -> Arc<SimRegion> {
        assert_eq!(phys % 4, 0, "unaligned access at {phys:#x}");
        self.region_for(phys, len)
            .unwrap_or_else(|| panic!("no simulated memory at {phys:#x}"))
    }
}

impl Platform for SimPlatform {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn read_config(&self, addr: PciAddress, offset: u16) -> io::Result<u32> {
        if offset % 4 != 0 || usize::from(offset) / 4 >= CONFIG_DWORDS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bad config offset {offset:#x}"),
            ));
        }
        Ok(lock(&self.state)
            .config
            .get(&addr)
            .map_or(pcie::ABSENT, |image| image[usize::from(offset) / 4]))
    }

    fn map_physical(&self, phys: u64, len: usize) -> io::Result<Box<dyn MappedMemory>> {
        if lock(&self.state).denied.contains(&phys) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("mapping at {phys:#x} denied"),
            ));
        }
        let region = self.region_for(phys, len).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no simulated memory for {phys:#x}+{len:#x}"),
            )
        })?;
        let offset = region.offset_of(phys);
        if offset % 8 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("mapping base {phys:#x} not 8-byte aligned"),
            ));
        }

        tracing::debug!("sim: map {phys:#x} ({len:#x} bytes)");
        Ok(Box::new(SimMapping {
            region,
            offset,
            len,
            phys,
            unmaps: Arc::clone(&self.unmaps),
        }))
    }

    fn link_status(&self, _addr: PciAddress) -> io::Result<PcieLink> {
        let mut state = lock(&self.state);
        state.link_queries += 1;
        if state.link_failures > 0 {
            state.link_failures -= 1;
            return Err(io::Error::other("link training in progress"));
        }
        state.link.ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "no simulated link")
        })
    }

    fn set_performance_level(&self, addr: PciAddress, level: PerformanceLevel) -> io::Result<()> {
        let mut state = lock(&self.state);
        if !state.config.contains_key(&addr) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("no function at {addr}")));
        }
        state.performance = Some(level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_functions_read_all_ones() {
        let sim = SimPlatform::new();
        assert_eq!(sim.read_config(PciAddress::new(0, 0), 0).unwrap(), pcie::ABSENT);
    }

    #[test]
    fn gpu_config_image() {
        let sim = SimPlatform::with_gpu(3, 0, 0x731F);
        let addr = PciAddress::new(3, 0);
        assert_eq!(sim.read_config(addr, 0x00).unwrap(), 0x731F_1002);
        assert_eq!(sim.read_config(addr, 0x18).unwrap(), 0xE000_000C);
        assert_eq!(sim.read_config(addr, 0x1C).unwrap(), 0);
        assert_eq!(sim.read_config(addr, 0x24).unwrap(), 0xF010_0000);
    }

    #[test]
    fn mappings_alias_backing_memory() {
        let sim = SimPlatform::new();
        sim.add_memory(0x1000, 0x1000);
        let mem = sim.map_physical(0x1800, 0x100).unwrap();
        sim.poke32(0x1804, 0xCAFE_F00D);
        // SAFETY: 0x100-byte mapping; offset 4 is in bounds and aligned.
        let seen = unsafe { mem.as_ptr().as_ptr().add(4).cast::<u32>().read_volatile() };
        assert_eq!(seen, 0xCAFE_F00D);
        assert_eq!(sim.live_mappings(), 1);
        drop(mem);
        assert_eq!(sim.live_mappings(), 0);
        assert_eq!(sim.unmap_log(), vec![0x1800]);
    }

    #[test]
    fn out_of_range_and_denied_mappings_fail() {
        let sim = SimPlatform::new();
        sim.add_memory(0x1000, 0x1000);
        assert!(sim.map_physical(0x1800, 0x1000).is_err());
        sim.deny_mapping(0x1000);
        assert_eq!(
            sim.map_physical(0x1000, 0x10).unwrap_err().kind(),
            io::ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn scripted_link_failures() {
        let sim = SimPlatform::new();
        sim.set_link(Some(PcieLink::new(4, 16)));
        sim.fail_link_queries(1);
        let addr = PciAddress::new(0, 0);
        assert!(sim.link_status(addr).is_err());
        assert_eq!(sim.link_status(addr).unwrap().lanes, 16);
        assert_eq!(sim.link_queries(), 2);
    }
}
