//! Mapped windows onto device BARs.
//!
//! A [`MappedWindow`] owns one platform mapping and is the only place the
//! driver dereferences device memory. Every accessor is bounds-checked and
//! returns `None`/`false` instead of touching memory outside the mapping;
//! the register and aperture layers above decide how to degrade.

use crate::error::{NaviError, Result};
use crate::platform::{MappedMemory, Platform};
use navi_chip::bar::Bar;
use std::fmt;

/// The three regions a GPU exposes, each with its own alignment rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// BAR0 MMIO registers (4 KiB aligned)
    Registers,
    /// BAR2 VRAM aperture (256 MiB aligned)
    Aperture,
    /// BAR5 doorbells (64 KiB aligned)
    Doorbell,
}

impl WindowKind {
    /// BAR backing this window
    #[must_use]
    pub const fn bar(&self) -> Bar {
        match self {
            Self::Registers => Bar::Registers,
            Self::Aperture => Bar::Aperture,
            Self::Doorbell => Bar::Doorbell,
        }
    }

    /// Required alignment of the physical base
    #[must_use]
    pub const fn alignment(&self) -> u64 {
        self.bar().alignment()
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registers => "register",
            Self::Aperture => "aperture",
            Self::Doorbell => "doorbell",
        })
    }
}

/// One mapped BAR region
#[derive(Debug)]
pub struct MappedWindow {
    kind: WindowKind,
    phys: u64,
    mem: Box<dyn MappedMemory>,
}

impl MappedWindow {
    /// Map `len` bytes at `phys` through `platform`.
    ///
    /// # Errors
    ///
    /// - `AlignmentViolation` if `phys` breaks the window rule; nothing is mapped
    /// - `MappingFailed` if the platform refuses or returns a short mapping
    pub fn map<P: Platform + ?Sized>(
        platform: &P,
        kind: WindowKind,
        phys: u64,
        len: usize,
    ) -> Result<Self> {
        check_alignment(kind, phys)?;

        let mem = platform
            .map_physical(phys, len)
            .map_err(|e| NaviError::mapping_failed(kind, phys, len, e.to_string()))?;

        Self::new(kind, phys, mem)
    }

    /// Wrap an existing mapping.
    ///
    /// # Errors
    ///
    /// - `AlignmentViolation` if `phys` breaks the window rule
    /// - `MappingFailed` if the mapping is empty
    pub fn new(kind: WindowKind, phys: u64, mem: Box<dyn MappedMemory>) -> Result<Self> {
        check_alignment(kind, phys)?;
        if mem.is_empty() {
            return Err(NaviError::mapping_failed(kind, phys, 0, "empty mapping"));
        }

        tracing::info!(
            "Mapped {kind} window: phys {phys:#x}, {} KiB at {:p}",
            mem.len() / 1024,
            mem.as_ptr()
        );

        Ok(Self { kind, phys, mem })
    }

    /// Window kind
    #[must_use]
    pub const fn kind(&self) -> WindowKind {
        self.kind
    }

    /// Physical base
    #[must_use]
    pub const fn phys(&self) -> u64 {
        self.phys
    }

    /// Mapped length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// True if zero bytes are mapped (never, for a constructed window)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// True if `[offset, offset + len)` lies inside the window
    #[must_use]
    pub fn contains(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.mem.len())
    }

    // Callers check `contains(offset, _)` before dereferencing.
    fn ptr_at(&self, offset: usize) -> *mut u8 {
        self.mem.as_ptr().as_ptr().wrapping_add(offset)
    }

    /// Volatile 32-bit load; `None` if out of range or not 4-byte aligned
    #[must_use]
    #[allow(clippy::cast_ptr_alignment)]
    pub fn read32(&self, offset: usize) -> Option<u32> {
        if offset % 4 != 0 || !self.contains(offset, 4) {
            return None;
        }
        // SAFETY: in bounds (checked above); base is 8-byte aligned per the
        // MappedMemory contract and offset is a multiple of 4; volatile so the
        // load is neither elided nor merged.
        let value = unsafe { self.ptr_at(offset).cast::<u32>().read_volatile() };
        tracing::trace!("{} read32 @ {offset:#x} = {value:#x}", self.kind);
        Some(value)
    }

    /// Volatile 32-bit store; `false` if out of range or not 4-byte aligned
    #[allow(clippy::cast_ptr_alignment)]
    pub fn write32(&mut self, offset: usize, value: u32) -> bool {
        if offset % 4 != 0 || !self.contains(offset, 4) {
            return false;
        }
        tracing::trace!("{} write32 @ {offset:#x} = {value:#x}", self.kind);
        // SAFETY: in bounds and aligned (checked above); &mut self gives
        // exclusive access to the window.
        unsafe { self.ptr_at(offset).cast::<u32>().write_volatile(value) };
        true
    }

    /// Volatile 64-bit load; `None` if out of range or not 8-byte aligned
    #[must_use]
    #[allow(clippy::cast_ptr_alignment)]
    pub fn read64(&self, offset: usize) -> Option<u64> {
        if offset % 8 != 0 || !self.contains(offset, 8) {
            return None;
        }
        // SAFETY: in bounds and 8-byte aligned (checked above, base aligned
        // per the MappedMemory contract).
        let value = unsafe { self.ptr_at(offset).cast::<u64>().read_volatile() };
        tracing::trace!("{} read64 @ {offset:#x} = {value:#x}", self.kind);
        Some(value)
    }

    /// Volatile 64-bit store; `false` if out of range or not 8-byte aligned
    #[allow(clippy::cast_ptr_alignment)]
    pub fn write64(&mut self, offset: usize, value: u64) -> bool {
        if offset % 8 != 0 || !self.contains(offset, 8) {
            return false;
        }
        tracing::trace!("{} write64 @ {offset:#x} = {value:#x}", self.kind);
        // SAFETY: in bounds and 8-byte aligned (checked above).
        unsafe { self.ptr_at(offset).cast::<u64>().write_volatile(value) };
        true
    }

    /// Copy out of the window; `false` (nothing copied) if out of range
    pub fn read_bytes(&self, offset: usize, buffer: &mut [u8]) -> bool {
        if !self.contains(offset, buffer.len()) {
            return false;
        }
        // SAFETY: source range is inside the mapping (checked above); the
        // destination is a distinct user buffer, so the ranges cannot overlap;
        // u8 has alignment 1.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr_at(offset), buffer.as_mut_ptr(), buffer.len());
        }
        true
    }

    /// Copy into the window; `false` (nothing copied) if out of range
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> bool {
        if !self.contains(offset, data.len()) {
            return false;
        }
        // SAFETY: destination range is inside the mapping (checked above);
        // source is a distinct user slice; &mut self is exclusive.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr_at(offset), data.len());
        }
        true
    }

    /// Borrow part of the window as a byte slice; `None` if out of range
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        if !self.contains(offset, len) {
            return None;
        }
        // SAFETY: range is inside the mapping; the returned borrow is tied to
        // &mut self, so no other access to the window can alias it and it
        // cannot outlive the mapping.
        Some(unsafe { std::slice::from_raw_parts_mut(self.ptr_at(offset), len) })
    }
}

/// The doorbell BAR inside its mapping granule.
///
/// BAR5 is only 4-8 KiB, so its base is usually not 64 KiB aligned. The
/// granule containing it is mapped and every slot is addressed relative to
/// the BAR itself.
#[derive(Debug)]
pub struct DoorbellWindow {
    window: MappedWindow,
    bar_offset: usize,
}

impl DoorbellWindow {
    /// Wrap the granule mapping `window` holding the BAR at `bar_base`.
    ///
    /// # Errors
    ///
    /// Returns `MappingFailed` if `bar_base` does not fall inside `window`.
    pub fn new(window: MappedWindow, bar_base: u64) -> Result<Self> {
        let bar_offset = bar_base
            .checked_sub(window.phys())
            .and_then(|off| usize::try_from(off).ok())
            .filter(|&off| off < window.len());
        match bar_offset {
            Some(bar_offset) => {
                if bar_offset != 0 {
                    tracing::debug!(
                        "Doorbell BAR {bar_base:#x} at offset {bar_offset:#x} of granule {:#x}",
                        window.phys()
                    );
                }
                Ok(Self { window, bar_offset })
            }
            None => Err(NaviError::mapping_failed(
                WindowKind::Doorbell,
                window.phys(),
                window.len(),
                format!("BAR base {bar_base:#x} outside mapped granule"),
            )),
        }
    }

    /// Physical address of the BAR
    #[must_use]
    pub fn bar_base(&self) -> u64 {
        self.window.phys() + self.bar_offset as u64
    }

    /// Offset of the BAR within the mapping
    #[must_use]
    pub const fn bar_offset(&self) -> usize {
        self.bar_offset
    }

    /// Underlying granule mapping
    #[must_use]
    pub const fn window(&self) -> &MappedWindow {
        &self.window
    }

    /// Write `value` to the slot `slot` bytes into the BAR; `false` if out of range
    pub fn ring(&mut self, slot: usize, value: u32) -> bool {
        slot.checked_add(self.bar_offset)
            .is_some_and(|offset| self.window.write32(offset, value))
    }
}

fn check_alignment(kind: WindowKind, phys: u64) -> Result<()> {
    if navi_chip::bar::is_aligned(phys, kind.alignment()) {
        Ok(())
    } else {
        Err(NaviError::misaligned(kind.to_string(), phys, kind.alignment()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;

    const APERTURE_PHYS: u64 = 0x2000_0000;

    fn window(kind: WindowKind, phys: u64, len: usize) -> MappedWindow {
        let sim = SimPlatform::new();
        sim.add_memory(phys, len);
        MappedWindow::map(&sim, kind, phys, len).unwrap()
    }

    #[test]
    fn misaligned_base_is_refused() {
        let sim = SimPlatform::new();
        sim.add_memory(0x0800_0000, 4096);
        let err = MappedWindow::map(&sim, WindowKind::Aperture, 0x0800_0000, 4096).unwrap_err();
        assert!(matches!(err, NaviError::AlignmentViolation { alignment, .. } if alignment == 256 << 20));
    }

    #[test]
    fn unmapped_range_is_mapping_failure() {
        let sim = SimPlatform::new();
        let err = MappedWindow::map(&sim, WindowKind::Registers, 0xF000_0000, 4096).unwrap_err();
        assert!(matches!(err, NaviError::MappingFailed { kind: WindowKind::Registers, .. }));
    }

    #[test]
    fn bounds_and_alignment() {
        let mut w = window(WindowKind::Registers, 0xF000_0000, 4096);
        assert!(w.write32(0xFFC, 7));
        assert_eq!(w.read32(0xFFC), Some(7));
        assert_eq!(w.read32(0x1000), None);
        assert_eq!(w.read32(0x2), None);
        assert!(!w.write32(usize::MAX - 1, 1));
        assert_eq!(w.read64(0xFFC), None);
        assert!(w.write64(0xFF8, 0x1122_3344_5566_7788));
        assert_eq!(w.read64(0xFF8), Some(0x1122_3344_5566_7788));
    }

    #[test]
    fn doorbell_slots_follow_the_bar() {
        let sim = SimPlatform::new();
        sim.add_memory(0xF010_0000, 0x10000);
        let granule = MappedWindow::map(&sim, WindowKind::Doorbell, 0xF010_0000, 0x10000).unwrap();
        let mut bell = DoorbellWindow::new(granule, 0xF010_2000).unwrap();
        assert_eq!(bell.bar_offset(), 0x2000);
        assert_eq!(bell.bar_base(), 0xF010_2000);
        assert!(bell.ring(4, 9));
        assert_eq!(sim.peek32(0xF010_2004), 9);
        assert_eq!(sim.peek32(0xF010_0004), 0);
        assert!(!bell.ring(0xE000, 1));
    }

    #[test]
    fn doorbell_bar_outside_granule() {
        let sim = SimPlatform::new();
        sim.add_memory(0xF010_0000, 0x10000);
        let granule = MappedWindow::map(&sim, WindowKind::Doorbell, 0xF010_0000, 0x10000).unwrap();
        let err = DoorbellWindow::new(granule, 0xF012_0000).unwrap_err();
        assert!(matches!(err, NaviError::MappingFailed { kind: WindowKind::Doorbell, .. }));
    }

    #[test]
    fn byte_copies() {
        let mut w = window(WindowKind::Aperture, APERTURE_PHYS, 8192);
        assert!(w.write_bytes(100, b"navi"));
        let mut out = [0u8; 4];
        assert!(w.read_bytes(100, &mut out));
        assert_eq!(&out, b"navi");
        assert!(!w.write_bytes(8190, b"xyz"));
        assert!(w.slice_mut(8191, 2).is_none());
        assert_eq!(w.slice_mut(8190, 2).map(|s| s.len()), Some(2));
    }
}
