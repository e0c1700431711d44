//! VRAM aperture access over the BAR2 window.
//!
//! Only the CPU-visible part of VRAM is reachable; offsets are GPU-local
//! VRAM addresses, which start at 0 and coincide with aperture offsets.

use crate::window::MappedWindow;
use bytemuck::Pod;
use std::sync::atomic::{fence, Ordering};

/// VRAM layout as seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VramInfo {
    /// Total on-board VRAM (from the per-device table)
    pub total_bytes: u64,
    /// Bytes reachable through the aperture
    pub visible_bytes: u64,
    /// GPU address of the first aperture byte
    pub vram_base: u64,
    /// Physical address of the aperture
    pub aperture_phys: u64,
}

/// CPU-visible VRAM window
#[derive(Debug)]
pub struct Aperture {
    window: MappedWindow,
    total_bytes: u64,
}

impl Aperture {
    /// Wrap a mapped aperture window
    #[must_use]
    pub const fn new(window: MappedWindow, total_bytes: u64) -> Self {
        Self {
            window,
            total_bytes,
        }
    }

    /// VRAM layout
    #[must_use]
    pub fn info(&self) -> VramInfo {
        VramInfo {
            total_bytes: self.total_bytes,
            visible_bytes: self.window.len() as u64,
            vram_base: 0,
            aperture_phys: self.window.phys(),
        }
    }

    /// Visible size in bytes
    #[must_use]
    pub fn visible_len(&self) -> usize {
        self.window.len()
    }

    /// True if `[offset, offset + len)` is visible
    #[must_use]
    pub fn contains(&self, offset: u64, len: usize) -> bool {
        usize::try_from(offset).is_ok_and(|off| self.window.contains(off, len))
    }

    /// Copy VRAM into `buffer`; returns bytes read (0 if out of range)
    pub fn read(&self, offset: u64, buffer: &mut [u8]) -> usize {
        let Ok(off) = usize::try_from(offset) else {
            return 0;
        };
        if self.window.read_bytes(off, buffer) {
            buffer.len()
        } else {
            tracing::warn!(
                "VRAM read {offset:#x}+{:#x} outside aperture ({:#x} bytes)",
                buffer.len(),
                self.window.len()
            );
            0
        }
    }

    /// Copy `data` into VRAM; returns bytes written (0 if out of range)
    pub fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        let Ok(off) = usize::try_from(offset) else {
            return 0;
        };
        if self.window.write_bytes(off, data) {
            fence(Ordering::SeqCst);
            data.len()
        } else {
            tracing::warn!(
                "VRAM write {offset:#x}+{:#x} outside aperture ({:#x} bytes)",
                data.len(),
                self.window.len()
            );
            0
        }
    }

    /// Zero-copy view of `[offset, offset + len)`; `None` if out of range.
    ///
    /// The view borrows the aperture, so it cannot outlive the device.
    pub fn map(&mut self, offset: u64, len: usize) -> Option<&mut [u8]> {
        let off = usize::try_from(offset).ok()?;
        let view = self.window.slice_mut(off, len);
        if view.is_none() {
            tracing::warn!("VRAM map {offset:#x}+{len:#x} outside aperture");
        }
        view
    }

    /// Typed write; returns elements written (0 if out of range)
    pub fn write_pod<T: Pod>(&mut self, offset: u64, values: &[T]) -> usize {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.write(offset, bytes) / std::mem::size_of::<T>().max(1)
    }

    /// Typed read; returns elements read (0 if out of range)
    pub fn read_pod<T: Pod>(&self, offset: u64, values: &mut [T]) -> usize {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(values);
        self.read(offset, bytes) / std::mem::size_of::<T>().max(1)
    }

    /// Copy dwords at `offset`, wrapping within `[ring_base, ring_base + ring_len)`.
    ///
    /// Used by the ring manager; the caller guarantees the ring is visible.
    pub(crate) fn write_ring(&mut self, ring_base: u64, ring_len: usize, offset: usize, words: &[u32]) -> bool {
        let bytes: &[u8] = bytemuck::cast_slice(words);
        let first = bytes.len().min(ring_len - offset);
        let (head, tail) = bytes.split_at(first);
        self.write(ring_base + offset as u64, head) == head.len()
            && (tail.is_empty() || self.write(ring_base, tail) == tail.len())
    }
}
