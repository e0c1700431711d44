//! PCIe link snapshot for diagnostics.
//!
//! Advisory only: nothing in the driver makes a correctness decision based
//! on the link. The query can race with the kernel driver bringing the link
//! up, so [`query_with_retry`] gives it a bounded number of extra attempts.

use crate::platform::{PciAddress, Platform};
use std::fmt;
use std::io;
use std::path::Path;

/// Negotiated PCIe link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PcieLink {
    /// PCIe generation (1..=5)
    pub generation: u8,
    /// Number of lanes (1, 2, 4, 8, 16)
    pub lanes: u8,
    /// Per-lane signalling rate in GT/s
    pub speed_gts: f32,
    /// Theoretical one-direction bandwidth in GB/s, after line coding
    pub bandwidth_gbps: f32,
}

impl PcieLink {
    /// Link from generation and lane count
    #[must_use]
    pub fn new(generation: u8, lanes: u8) -> Self {
        let speed_gts = generation_to_speed(generation);
        Self {
            generation,
            lanes,
            speed_gts,
            bandwidth_gbps: speed_gts * line_efficiency(generation) / 8.0 * f32::from(lanes),
        }
    }

    /// Read `current_link_speed` / `current_link_width` under a sysfs device
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns error if either attribute is missing or unparseable.
    pub fn from_sysfs(device_dir: &Path) -> io::Result<Self> {
        let speed = std::fs::read_to_string(device_dir.join("current_link_speed"))?;
        let width = std::fs::read_to_string(device_dir.join("current_link_width"))?;

        let generation = parse_generation(&speed).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unrecognised link speed {:?}", speed.trim()),
            )
        })?;
        let lanes = width.trim().parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad link width {:?}: {e}", width.trim()),
            )
        })?;

        Ok(Self::new(generation, lanes))
    }
}

impl fmt::Display for PcieLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "x{} Gen{} ({:.2} GB/s)",
            self.lanes, self.generation, self.bandwidth_gbps
        )
    }
}

const fn generation_to_speed(generation: u8) -> f32 {
    match generation {
        2 => 5.0,
        3 => 8.0,
        4 => 16.0,
        5 => 32.0,
        _ => 2.5,
    }
}

// Gen1/2 use 8b/10b, Gen3+ 128b/130b.
fn line_efficiency(generation: u8) -> f32 {
    if generation >= 3 {
        128.0 / 130.0
    } else {
        0.8
    }
}

// Strings like "2.5 GT/s PCIe", "8.0 GT/s", "16 GT/s".
fn parse_generation(speed: &str) -> Option<u8> {
    let gts: f32 = speed.split_whitespace().next()?.parse().ok()?;
    [(2.5, 1), (5.0, 2), (8.0, 3), (16.0, 4), (32.0, 5)]
        .iter()
        .find(|(rate, _)| (gts - rate).abs() < 0.01)
        .map(|&(_, generation)| generation)
}

/// Query the link, retrying `retries` extra times on failure.
///
/// Returns `None` (with a warning) if every attempt fails; the link is
/// advisory and never fails init.
pub fn query_with_retry<P: Platform + ?Sized>(
    platform: &P,
    addr: PciAddress,
    retries: u32,
) -> Option<PcieLink> {
    for attempt in 0..=retries {
        match platform.link_status(addr) {
            Ok(link) => {
                tracing::debug!("PCIe link for {addr}: {link}");
                return Some(link);
            }
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                tracing::debug!("PCIe link unavailable on {}: {e}", platform.name());
                return None;
            }
            Err(e) => {
                tracing::debug!("PCIe link query {} of {} failed: {e}", attempt + 1, retries + 1);
            }
        }
    }
    tracing::warn!("PCIe link for {addr} unavailable after {} attempts", retries + 1);
    None
}
