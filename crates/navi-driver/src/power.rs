//! Best-effort power-mode request.
//!
//! There is no clock or power management here: one call asks the platform
//! to pin clocks high (or hand them back to firmware), and failure is only
//! logged.

use crate::platform::{PciAddress, Platform};
use std::fmt;
use std::str::FromStr;

/// Requested performance level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceLevel {
    /// Clocks pinned high
    High,
    /// Firmware-managed clocks
    Auto,
}

impl PerformanceLevel {
    /// Value written to the power attribute
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for PerformanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PerformanceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown performance level {other:?} (expected high or auto)")),
        }
    }
}

/// Ask the platform for `level`; returns whether it was applied.
pub fn request<P: Platform + ?Sized>(platform: &P, addr: PciAddress, level: PerformanceLevel) -> bool {
    match platform.set_performance_level(addr, level) {
        Ok(()) => {
            tracing::info!("Performance level {level} applied to {addr}");
            true
        }
        Err(e) => {
            tracing::warn!("Performance level {level} for {addr} not applied: {e}");
            false
        }
    }
}
