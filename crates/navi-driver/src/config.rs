//! Driver configuration.
//!
//! Defaults reproduce the fixed GFX10 layout. Every knob can be overridden
//! through `NAVI_*` environment variables via [`DriverConfig::from_env`].

use crate::ring::MIN_RING_MARGIN;
use navi_chip::{bar, regs};
use std::str::FromStr;
use std::time::Duration;

/// Register layout consumed by the driver.
///
/// The encoder and ring manager never hard-code offsets; they read them from
/// here, so another generation's layout is a different table, not a code
/// change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    /// Base of the SH register space (index 0 for `SET_SH_REG`).
    pub sh_base: usize,
    /// Primary status register.
    pub status: usize,
    /// Secondary status register.
    pub status2: usize,
    /// Soft-reset control register.
    pub soft_reset: usize,
    /// First ring register block.
    pub ring_base: usize,
    /// Distance between ring blocks.
    pub ring_stride: usize,
    /// Number of ring blocks.
    pub ring_count: u8,
    /// Ring layout inside one block.
    pub ring: RingLayout,
    /// Doorbell slot stride, bytes.
    pub doorbell_stride: usize,
    /// Compute dispatch registers.
    pub compute: ComputeLayout,
}

/// Register offsets inside one ring block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// Control register (bit 0 enable).
    pub cntl: usize,
    /// Read pointer, dwords.
    pub rptr: usize,
    /// Write pointer, dwords.
    pub wptr: usize,
    /// Size, bytes.
    pub size: usize,
    /// 64-bit base address.
    pub base: usize,
    /// Enable bit in `cntl`.
    pub enable_bit: u32,
}

/// Compute dispatch register offsets used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeLayout {
    /// Program address low (high follows at +4).
    pub pgm_lo: usize,
    /// Resource word 1 (word 2 follows at +4).
    pub pgm_rsrc1: usize,
    /// Threads per group X (Y, Z follow).
    pub num_thread_x: usize,
    /// First user-data register (argument pointer lo/hi).
    pub user_data_0: usize,
}

impl RegisterMap {
    /// GFX10 (Navi1x/2x) layout.
    #[must_use]
    pub const fn gfx10() -> Self {
        Self {
            sh_base: regs::SH_REG_BASE,
            status: regs::GRBM_STATUS,
            status2: regs::GRBM_STATUS2,
            soft_reset: regs::GRBM_SOFT_RESET,
            ring_base: regs::ring::BASE,
            ring_stride: regs::ring::STRIDE,
            ring_count: regs::ring::COUNT,
            ring: RingLayout {
                cntl: regs::ring::CNTL,
                rptr: regs::ring::RPTR,
                wptr: regs::ring::WPTR,
                size: regs::ring::SIZE,
                base: regs::ring::BASE_ADDR,
                enable_bit: regs::ring::CNTL_ENABLE,
            },
            doorbell_stride: regs::DOORBELL_STRIDE,
            compute: ComputeLayout {
                pgm_lo: regs::compute::PGM_LO,
                pgm_rsrc1: regs::compute::PGM_RSRC1,
                num_thread_x: regs::compute::NUM_THREAD_X,
                user_data_0: regs::compute::USER_DATA_0,
            },
        }
    }

    /// Byte offset of the register block for ring `id`.
    #[must_use]
    pub const fn ring_block(&self, id: u8) -> usize {
        self.ring_base + id as usize * self.ring_stride
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::gfx10()
    }
}

/// Driver-wide configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Ring used for compute dispatch (ring 0 carries graphics).
    pub compute_ring: u8,
    /// Bytes kept free in every ring so `rptr == wptr` always means empty.
    pub ring_margin_bytes: u32,
    /// Capacity of a dispatch command stream, words.
    pub max_stream_words: usize,
    /// Sleep between status polls in `wait_for_idle`.
    pub poll_interval: Duration,
    /// Extra attempts for the link-status query during init.
    pub link_retries: u32,
    /// Fail init on a misaligned BAR instead of mapping the masked base.
    pub strict_alignment: bool,
    /// Register window mapping size.
    pub register_window_size: usize,
    /// Aperture mapping size.
    pub aperture_size: usize,
    /// Doorbell window mapping size.
    pub doorbell_size: usize,
    /// Register layout.
    pub registers: RegisterMap,
}

impl Default for DriverConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            compute_ring: regs::ring::COMPUTE,
            ring_margin_bytes: 32,
            max_stream_words: 256,
            poll_interval: Duration::from_millis(1),
            link_retries: 1,
            strict_alignment: false,
            register_window_size: bar::bar0::SIZE as usize,
            aperture_size: bar::bar2::SIZE as usize,
            doorbell_size: bar::bar5::SIZE as usize,
            registers: RegisterMap::gfx10(),
        }
    }
}

impl DriverConfig {
    /// Build a configuration from `NAVI_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparseable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let get = |name: &str| lookup(name);

        if let Some(ring) = parse_var::<u8>("NAVI_COMPUTE_RING", get("NAVI_COMPUTE_RING")) {
            config.compute_ring = ring;
        }
        if let Some(margin) = parse_var("NAVI_RING_MARGIN", get("NAVI_RING_MARGIN")) {
            config.ring_margin_bytes = checked_margin(margin);
        }
        if let Some(words) = parse_var("NAVI_MAX_STREAM_WORDS", get("NAVI_MAX_STREAM_WORDS")) {
            config.max_stream_words = words;
        }
        if let Some(us) = parse_var("NAVI_POLL_INTERVAL_US", get("NAVI_POLL_INTERVAL_US")) {
            config.poll_interval = Duration::from_micros(us);
        }
        if let Some(retries) = parse_var("NAVI_LINK_RETRIES", get("NAVI_LINK_RETRIES")) {
            config.link_retries = retries;
        }
        if let Some(strict) = get("NAVI_STRICT_ALIGNMENT") {
            match strict.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.strict_alignment = true,
                "0" | "false" | "no" | "off" => config.strict_alignment = false,
                other => tracing::warn!("Ignoring NAVI_STRICT_ALIGNMENT={other:?}"),
            }
        }

        tracing::debug!("Driver config: {config:?}");
        config
    }

    /// Set the compute ring
    #[must_use]
    pub const fn with_compute_ring(mut self, ring: u8) -> Self {
        self.compute_ring = ring;
        self
    }

    /// Set the ring safety margin (at least one dword)
    #[must_use]
    pub fn with_ring_margin(mut self, bytes: u32) -> Self {
        self.ring_margin_bytes = checked_margin(bytes);
        self
    }

    /// Set the command stream capacity
    #[must_use]
    pub const fn with_max_stream_words(mut self, words: usize) -> Self {
        self.max_stream_words = words;
        self
    }

    /// Set the idle poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set link-status retries
    #[must_use]
    pub const fn with_link_retries(mut self, retries: u32) -> Self {
        self.link_retries = retries;
        self
    }

    /// Make BAR misalignment fatal
    #[must_use]
    pub const fn with_strict_alignment(mut self, strict: bool) -> Self {
        self.strict_alignment = strict;
        self
    }

    /// Override the three window mapping sizes
    #[must_use]
    pub const fn with_window_sizes(mut self, registers: usize, aperture: usize, doorbell: usize) -> Self {
        self.register_window_size = registers;
        self.aperture_size = aperture;
        self.doorbell_size = doorbell;
        self
    }

    /// Substitute the register layout
    #[must_use]
    pub fn with_registers(mut self, registers: RegisterMap) -> Self {
        self.registers = registers;
        self
    }
}

fn checked_margin(bytes: u32) -> u32 {
    if bytes < MIN_RING_MARGIN {
        tracing::warn!("Ring margin {bytes} below one dword; using {MIN_RING_MARGIN}");
        MIN_RING_MARGIN
    } else {
        bytes
    }
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring {name}={value:?} (unparseable)");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let c = DriverConfig::default();
        assert_eq!(c.compute_ring, 1);
        assert_eq!(c.ring_margin_bytes, 32);
        assert_eq!(c.max_stream_words, 256);
        assert_eq!(c.poll_interval, Duration::from_millis(1));
        assert_eq!(c.link_retries, 1);
        assert!(!c.strict_alignment);
        assert_eq!(c.register_window_size, 16 * 1024 * 1024);
        assert_eq!(c.registers, RegisterMap::gfx10());
    }

    #[test]
    fn env_overrides() {
        let c = DriverConfig::from_lookup(lookup(&[
            ("NAVI_COMPUTE_RING", "2"),
            ("NAVI_RING_MARGIN", "64"),
            ("NAVI_POLL_INTERVAL_US", "250"),
            ("NAVI_STRICT_ALIGNMENT", "yes"),
        ]));
        assert_eq!(c.compute_ring, 2);
        assert_eq!(c.ring_margin_bytes, 64);
        assert_eq!(c.poll_interval, Duration::from_micros(250));
        assert!(c.strict_alignment);
        assert_eq!(c.max_stream_words, 256);
    }

    #[test]
    fn ring_margin_has_a_floor() {
        assert_eq!(DriverConfig::default().with_ring_margin(0).ring_margin_bytes, 4);
        assert_eq!(DriverConfig::default().with_ring_margin(3).ring_margin_bytes, 4);
        assert_eq!(DriverConfig::default().with_ring_margin(4).ring_margin_bytes, 4);
        let c = DriverConfig::from_lookup(lookup(&[("NAVI_RING_MARGIN", "0")]));
        assert_eq!(c.ring_margin_bytes, 4);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let c = DriverConfig::from_lookup(lookup(&[
            ("NAVI_COMPUTE_RING", "compute"),
            ("NAVI_STRICT_ALIGNMENT", "maybe"),
        ]));
        assert_eq!(c, DriverConfig::default());
    }

    #[test]
    fn ring_block_offsets() {
        let map = RegisterMap::gfx10();
        assert_eq!(map.ring_block(0), 0xC100);
        assert_eq!(map.ring_block(1), 0xC200);
    }
}
