//! Error types for Navi driver operations

use crate::window::WindowKind;
use thiserror::Error;

/// Result type alias for Navi operations
pub type Result<T> = std::result::Result<T, NaviError>;

/// Errors that can occur during Navi operations
#[derive(Debug, Error)]
pub enum NaviError {
    /// No matching display controller on the bus
    #[error("No AMD display controller found{}", location_suffix(.bus, .device))]
    DeviceNotFound {
        /// Requested bus, if a location was given
        bus: Option<u8>,
        /// Requested device, if a location was given
        device: Option<u8>,
    },

    /// A physical base or program address violates its alignment rule
    #[error("{what} address {address:#x} is not aligned to {alignment:#x}")]
    AlignmentViolation {
        /// What was being aligned (window kind or "program")
        what: String,
        /// Offending address
        address: u64,
        /// Required alignment in bytes
        alignment: u64,
    },

    /// The platform refused to map a physical range
    #[error("Failed to map {kind} window at {phys:#x} ({len:#x} bytes): {reason}")]
    MappingFailed {
        /// Window being mapped
        kind: WindowKind,
        /// Physical base
        phys: u64,
        /// Requested length
        len: usize,
        /// Reason for failure
        reason: String,
    },

    /// A status register read back as all-ones after mapping
    #[error("Register {offset:#x} read back {value:#010x}; mapping is not reaching the device")]
    PoisonedRead {
        /// Register offset
        offset: usize,
        /// Value read
        value: u32,
    },

    /// A command stream would exceed its fixed capacity
    #[error("Command stream overflow: {needed} words needed, capacity {capacity}")]
    EncodingOverflow {
        /// Words the stream would hold after the append
        needed: usize,
        /// Stream capacity in words
        capacity: usize,
    },

    /// Not enough free space in the ring
    #[error("Ring {ring} full: {requested} bytes requested, {free} free")]
    RingFull {
        /// Ring id
        ring: u8,
        /// Bytes requested
        requested: usize,
        /// Bytes free
        free: usize,
    },

    /// The ring's enable bit is clear
    #[error("Ring {ring} is disabled")]
    RingDisabled {
        /// Ring id
        ring: u8,
    },

    /// Bounded wait exceeded
    #[error("Operation timeout after {duration_ms}ms")]
    TimedOut {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Ring id outside the register block table
    #[error("Ring id {ring} out of range (have {count} rings)")]
    InvalidRing {
        /// Requested id
        ring: u8,
        /// Number of ring blocks
        count: u8,
    },

    /// Register offset cannot be expressed as an SH register index
    #[error("Register offset {offset:#x} is not a dword offset at or above {base:#x}")]
    InvalidRegister {
        /// Offending offset
        offset: usize,
        /// Register space base
        base: usize,
    },

    /// Launch descriptor failed validation
    #[error("Invalid launch: {reason}")]
    InvalidLaunch {
        /// Reason for rejection
        reason: String,
    },

    /// The ring's backing store lies outside the CPU-visible aperture
    #[error("Ring {ring} at GPU address {base:#x} ({size:#x} bytes) is outside the visible aperture")]
    RingUnreachable {
        /// Ring id
        ring: u8,
        /// Ring base (GPU address)
        base: u64,
        /// Ring size in bytes
        size: u32,
    },

    /// PCI configuration space read failed
    #[error("Config read at {address} offset {offset:#x} failed: {reason}")]
    ConfigRead {
        /// PCI location
        address: String,
        /// Config-space offset
        offset: u16,
        /// Reason for failure
        reason: String,
    },

    /// I/O error from the platform
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

fn location_suffix(bus: &Option<u8>, device: &Option<u8>) -> String {
    match (bus, device) {
        (Some(b), Some(d)) => format!(" at {b:02x}:{d:02x}.0"),
        _ => String::new(),
    }
}

impl NaviError {
    /// Create a device not found error for a full scan
    pub const fn not_found() -> Self {
        Self::DeviceNotFound {
            bus: None,
            device: None,
        }
    }

    /// Create a device not found error for an explicit location
    pub const fn not_found_at(bus: u8, device: u8) -> Self {
        Self::DeviceNotFound {
            bus: Some(bus),
            device: Some(device),
        }
    }

    /// Create an alignment violation error
    pub fn misaligned(what: impl Into<String>, address: u64, alignment: u64) -> Self {
        Self::AlignmentViolation {
            what: what.into(),
            address,
            alignment,
        }
    }

    /// Create a mapping failed error
    pub fn mapping_failed(kind: WindowKind, phys: u64, len: usize, reason: impl Into<String>) -> Self {
        Self::MappingFailed {
            kind,
            phys,
            len,
            reason: reason.into(),
        }
    }

    /// Create an invalid launch error
    pub fn invalid_launch(reason: impl Into<String>) -> Self {
        Self::InvalidLaunch {
            reason: reason.into(),
        }
    }

    /// Create a config read error
    pub fn config_read(address: impl ToString, offset: u16, reason: impl Into<String>) -> Self {
        Self::ConfigRead {
            address: address.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timed_out(timeout: std::time::Duration) -> Self {
        Self::TimedOut {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// True if the same call may succeed later without any other change
    /// (the ring drains, the device goes idle).
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RingFull { .. } | Self::TimedOut { .. })
    }
}
