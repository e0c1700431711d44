//! Register access layer over the BAR0 window.
//!
//! Out-of-range or misaligned accesses never fault: reads return
//! [`SENTINEL`] and writes are dropped, both with a warning. Every write is
//! followed by a `SeqCst` fence so it is ordered before whatever the caller
//! does next (typically a doorbell).

use crate::window::MappedWindow;
use std::sync::atomic::{fence, Ordering};

/// Value returned by a read the window cannot serve; also what a dead
/// mapping or a device that fell off the bus reads back.
pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// MMIO register window
#[derive(Debug)]
pub struct RegisterBlock {
    window: MappedWindow,
}

impl RegisterBlock {
    /// Wrap a mapped register window
    #[must_use]
    pub const fn new(window: MappedWindow) -> Self {
        Self { window }
    }

    /// Underlying window
    #[must_use]
    pub const fn window(&self) -> &MappedWindow {
        &self.window
    }

    /// Read a 32-bit register
    #[must_use]
    pub fn read32(&self, offset: usize) -> u32 {
        self.window.read32(offset).unwrap_or_else(|| {
            tracing::warn!(
                "Register read @ {offset:#x} outside window ({:#x} bytes)",
                self.window.len()
            );
            SENTINEL
        })
    }

    /// Write a 32-bit register
    pub fn write32(&mut self, offset: usize, value: u32) {
        if self.window.write32(offset, value) {
            fence(Ordering::SeqCst);
        } else {
            tracing::warn!(
                "Register write @ {offset:#x} = {value:#x} dropped (window {:#x} bytes)",
                self.window.len()
            );
        }
    }

    /// Read a 64-bit register pair
    #[must_use]
    pub fn read64(&self, offset: usize) -> u64 {
        self.window.read64(offset).unwrap_or_else(|| {
            tracing::warn!(
                "Register read64 @ {offset:#x} outside window ({:#x} bytes)",
                self.window.len()
            );
            u64::MAX
        })
    }

    /// Write a 64-bit register pair
    pub fn write64(&mut self, offset: usize, value: u64) {
        if self.window.write64(offset, value) {
            fence(Ordering::SeqCst);
        } else {
            tracing::warn!(
                "Register write64 @ {offset:#x} = {value:#x} dropped (window {:#x} bytes)",
                self.window.len()
            );
        }
    }

    /// Read-modify-write: bits in `mask` take `value`, the rest are kept.
    ///
    /// Not atomic with respect to the device or other handles.
    pub fn modify(&mut self, offset: usize, mask: u32, value: u32) {
        let old = self.read32(offset);
        self.write32(offset, (old & !mask) | (value & mask));
    }
}
