//! PCI identifiers, class codes and configuration-space layout.
//!
//! Device names and VRAM sizes come from AMD product data; VRAM size is not
//! discoverable through the CPU-visible aperture, so it lives in a table.

/// AMD/ATI vendor ID (PCI-SIG assigned).
pub const AMD_VENDOR_ID: u16 = 0x1002;

/// Base class code for display controllers.
pub const CLASS_DISPLAY: u8 = 0x03;

/// Sub-class codes under [`CLASS_DISPLAY`].
pub mod subclass {
    /// VGA-compatible controller (`0x0300`).
    pub const VGA: u8 = 0x00;
    /// Other display controller (`0x0380`).
    pub const OTHER: u8 = 0x80;
}

/// Value read back from configuration space when no function responds.
pub const ABSENT: u32 = 0xFFFF_FFFF;

/// Highest bus number scanned.
pub const MAX_BUS: u8 = 255;
/// Devices per bus.
pub const DEVICES_PER_BUS: u8 = 32;

/// Configuration-space byte offsets used by the enumerator.
pub mod config {
    /// Vendor ID (low 16 bits) and device ID (high 16 bits).
    pub const VENDOR_DEVICE: u16 = 0x00;
    /// Revision (bits 0..8), prog-if, sub-class (bits 16..24), base class (bits 24..32).
    pub const CLASS_REVISION: u16 = 0x08;
    /// BAR0: register window, 64-bit (low dword; high dword at +4).
    pub const BAR0: u16 = 0x10;
    /// BAR2: VRAM aperture, 64-bit (low dword; high dword at +4).
    pub const BAR2: u16 = 0x18;
    /// BAR5: doorbell window, 32-bit.
    pub const BAR5: u16 = 0x24;
}

/// Device IDs for the supported Navi parts.
pub mod device_id {
    /// Radeon RX 5700 XT (Navi10).
    pub const RX_5700_XT: u16 = 0x731F;
    /// Radeon RX 5700 (Navi10).
    pub const RX_5700: u16 = 0x7310;
    /// Radeon RX 5500 XT (Navi14).
    pub const RX_5500_XT: u16 = 0x7340;
    /// Radeon RX 6900 XT (Navi21).
    pub const RX_6900_XT: u16 = 0x73BF;
    /// Radeon RX 6700 XT (Navi22).
    pub const RX_6700_XT: u16 = 0x73DF;
}

/// All device IDs with a table entry.
pub const KNOWN_DEVICE_IDS: &[u16] = &[
    device_id::RX_5700_XT,
    device_id::RX_5700,
    device_id::RX_5500_XT,
    device_id::RX_6900_XT,
    device_id::RX_6700_XT,
];

/// Split a config-space word at offset 0 into `(vendor, device)`.
#[must_use]
pub const fn split_id_word(word: u32) -> (u16, u16) {
    ((word & 0xFFFF) as u16, (word >> 16) as u16)
}

/// Base class code from the word at [`config::CLASS_REVISION`].
#[must_use]
pub const fn base_class(class_word: u32) -> u8 {
    (class_word >> 24) as u8
}

/// Sub-class code from the word at [`config::CLASS_REVISION`].
#[must_use]
pub const fn sub_class(class_word: u32) -> u8 {
    (class_word >> 16) as u8
}

/// Chip variant identified from the PCI device ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipVariant {
    /// Navi10: RX 5700 / 5700 XT.
    Navi10,
    /// Navi14: RX 5500 XT.
    Navi14,
    /// Navi21: RX 6900 XT.
    Navi21,
    /// Navi22: RX 6700 XT.
    Navi22,
    /// Anything else from the vendor.
    Unknown(u16),
}

impl ChipVariant {
    /// Identify variant from PCI device ID.
    #[must_use]
    pub const fn from_device_id(id: u16) -> Self {
        match id {
            device_id::RX_5700_XT | device_id::RX_5700 => Self::Navi10,
            device_id::RX_5500_XT => Self::Navi14,
            device_id::RX_6900_XT => Self::Navi21,
            device_id::RX_6700_XT => Self::Navi22,
            other => Self::Unknown(other),
        }
    }

    /// Total on-board VRAM in bytes.
    ///
    /// Unknown parts report the 8 GB Navi10 figure.
    #[must_use]
    pub const fn vram_bytes(&self) -> u64 {
        const GIB: u64 = 1024 * 1024 * 1024;
        match self {
            Self::Navi10 | Self::Navi14 | Self::Unknown(_) => 8 * GIB,
            Self::Navi21 => 16 * GIB,
            Self::Navi22 => 12 * GIB,
        }
    }
}

/// Marketing name for a device ID, if it is in the table.
#[must_use]
pub const fn device_name(id: u16) -> Option<&'static str> {
    match id {
        device_id::RX_5700_XT => Some("AMD Radeon RX 5700 XT (Navi10)"),
        device_id::RX_5700 => Some("AMD Radeon RX 5700 (Navi10)"),
        device_id::RX_5500_XT => Some("AMD Radeon RX 5500 XT (Navi14)"),
        device_id::RX_6900_XT => Some("AMD Radeon RX 6900 XT (Navi21)"),
        device_id::RX_6700_XT => Some("AMD Radeon RX 6700 XT (Navi22)"),
        _ => None,
    }
}

/// Human-readable label for a device ID; unknown IDs get a generic label.
#[must_use]
pub fn display_name(id: u16) -> String {
    device_name(id).map_or_else(|| format!("AMD GPU (Device 0x{id:04X})"), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_word_split() {
        let (vendor, device) = split_id_word(0x731F_1002);
        assert_eq!(vendor, AMD_VENDOR_ID);
        assert_eq!(device, device_id::RX_5700_XT);
    }

    #[test]
    fn class_word_decode() {
        // VGA controller, revision 0xC1
        let word = 0x0300_00C1;
        assert_eq!(base_class(word), CLASS_DISPLAY);
        assert_eq!(sub_class(word), subclass::VGA);
    }

    #[test]
    fn every_known_id_has_a_name() {
        for &id in KNOWN_DEVICE_IDS {
            assert!(device_name(id).is_some(), "missing name for {id:#06x}");
            assert!(!matches!(ChipVariant::from_device_id(id), ChipVariant::Unknown(_)));
        }
    }

    #[test]
    fn unknown_id_gets_generic_label() {
        assert_eq!(display_name(0x1234), "AMD GPU (Device 0x1234)");
        assert_eq!(ChipVariant::from_device_id(0x1234), ChipVariant::Unknown(0x1234));
    }
}
