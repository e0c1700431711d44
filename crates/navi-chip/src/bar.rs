//! PCIe BAR layout for Navi GPUs.
//!
//! ```text
//! BAR  Config  Width   Mapped size  Alignment  Purpose
//! ──── ─────── ─────── ──────────── ────────── ───────────────────────────────
//!  0   0x10    64-bit  16 MB        4 KB       MMIO register window
//!  2   0x18    64-bit  256 MB       256 MB     VRAM aperture (CPU-visible part)
//!  5   0x24    32-bit  64 KB        64 KB      Doorbells (real size 4–8 KB)
//! ```
//!
//! The doorbell BAR is only 4–8 KB, but section mappings on some hosts are
//! granted in 64 KB units, so the window is mapped at 64 KB.

/// Low bits of a memory BAR that carry flags rather than address.
pub const FLAG_MASK: u64 = 0xF;

/// BAR0: MMIO register window.
pub mod bar0 {
    /// Mapped size in bytes.
    pub const SIZE: u64 = 16 * 1024 * 1024;
    /// Required physical alignment.
    pub const ALIGN: u64 = 4 * 1024;
}

/// BAR2: VRAM aperture.
pub mod bar2 {
    /// CPU-visible size in bytes (without resizable BAR).
    pub const SIZE: u64 = 256 * 1024 * 1024;
    /// Required physical alignment.
    pub const ALIGN: u64 = 256 * 1024 * 1024;
}

/// BAR5: doorbell window.
pub mod bar5 {
    /// Size actually decoded by the device.
    pub const REAL_SIZE: u64 = 8 * 1024;
    /// Mapping size (and granularity).
    pub const SIZE: u64 = 64 * 1024;
    /// Required physical alignment of the mapping.
    pub const ALIGN: u64 = 64 * 1024;
}

/// The three regions a Navi GPU exposes to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bar {
    /// BAR0: MMIO registers.
    Registers,
    /// BAR2: VRAM aperture.
    Aperture,
    /// BAR5: doorbells.
    Doorbell,
}

impl Bar {
    /// PCI BAR index.
    #[must_use]
    pub const fn index(&self) -> u8 {
        match self {
            Self::Registers => 0,
            Self::Aperture => 2,
            Self::Doorbell => 5,
        }
    }

    /// Config-space offset of the (low) BAR dword.
    #[must_use]
    pub const fn config_offset(&self) -> u16 {
        match self {
            Self::Registers => crate::pcie::config::BAR0,
            Self::Aperture => crate::pcie::config::BAR2,
            Self::Doorbell => crate::pcie::config::BAR5,
        }
    }

    /// True if the BAR spans two config dwords.
    #[must_use]
    pub const fn is_64bit(&self) -> bool {
        !matches!(self, Self::Doorbell)
    }

    /// Default mapping size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        match self {
            Self::Registers => bar0::SIZE,
            Self::Aperture => bar2::SIZE,
            Self::Doorbell => bar5::SIZE,
        }
    }

    /// Required physical alignment in bytes (a power of two).
    #[must_use]
    pub const fn alignment(&self) -> u64 {
        match self {
            Self::Registers => bar0::ALIGN,
            Self::Aperture => bar2::ALIGN,
            Self::Doorbell => bar5::ALIGN,
        }
    }
}

/// Physical address carried by a BAR, flag bits stripped.
#[must_use]
pub const fn bar_address(low: u32, high: Option<u32>) -> u64 {
    let high = match high {
        Some(h) => (h as u64) << 32,
        None => 0,
    };
    (high | low as u64) & !FLAG_MASK
}

/// True if `address` satisfies `alignment` (a power of two).
#[must_use]
pub const fn is_aligned(address: u64, alignment: u64) -> bool {
    address & (alignment - 1) == 0
}

/// Round `address` down to `alignment` (a power of two).
#[must_use]
pub const fn align_down(address: u64, alignment: u64) -> u64 {
    address & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_stripped() {
        // 64-bit prefetchable memory BAR: type bits 0b10, prefetch bit set
        assert_eq!(bar_address(0xE000_000C, Some(0x0000_0001)), 0x1_E000_0000);
        assert_eq!(bar_address(0xFCD0_0000, None), 0xFCD0_0000);
    }

    #[test]
    fn alignment_rules() {
        assert!(is_aligned(0xE000_0000, Bar::Aperture.alignment()));
        assert!(!is_aligned(0xE800_0000, Bar::Aperture.alignment()));
        assert_eq!(align_down(0xE800_0000, Bar::Aperture.alignment()), 0xE000_0000);
        assert!(is_aligned(0xFCD0_1000, Bar::Registers.alignment()));
    }

    #[test]
    fn doorbell_is_32bit_and_mapped_at_granularity() {
        assert!(!Bar::Doorbell.is_64bit());
        assert_eq!(Bar::Doorbell.size(), Bar::Doorbell.alignment());
        assert!(bar5::REAL_SIZE < bar5::SIZE);
    }
}
