//! GPU state monitor.
//!
//! Completion is detected by polling, not interrupts: a wait adds up to one
//! poll interval of latency after the hardware actually goes idle.

use crate::config::RegisterMap;
use crate::error::{NaviError, Result};
use crate::registers::{RegisterBlock, SENTINEL};
use navi_chip::regs::{status, status2};
use std::fmt;
use std::time::{Duration, Instant};

/// Pause between the two soft-reset writes
pub const RESET_HOLD: Duration = Duration::from_millis(10);

/// Decoded primary status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuStatus(pub u32);

impl GpuStatus {
    /// Any graphics/compute block active
    #[must_use]
    pub const fn gui_active(&self) -> bool {
        self.0 & status::GUI_ACTIVE != 0
    }

    /// Colour backend busy
    #[must_use]
    pub const fn cb_busy(&self) -> bool {
        self.0 & status::CB_BUSY != 0
    }

    /// Command processor busy
    #[must_use]
    pub const fn cp_busy(&self) -> bool {
        self.0 & status::CP_BUSY != 0
    }

    /// Read back as all-ones (mapping not reaching the device)
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        self.0 == SENTINEL
    }
}

impl fmt::Display for GpuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x} (GUI_ACTIVE={} CB_BUSY={} CP_BUSY={})",
            self.0,
            u8::from(self.gui_active()),
            u8::from(self.cb_busy()),
            u8::from(self.cp_busy())
        )
    }
}

/// Compute activity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeStatus {
    /// Compute units with work
    pub compute_units: u8,
    /// Wavefronts in flight
    pub wavefronts: u8,
    /// 100 while GUI_ACTIVE is set, else 0
    pub utilization: u8,
}

/// Outcome of a successful idle wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleWait {
    /// Sleeps taken before the device reported idle
    pub polls: u32,
    /// Wall time spent waiting
    pub elapsed: Duration,
}

/// Read-only view of the status registers
#[derive(Debug, Clone, Copy)]
pub struct Monitor<'a> {
    regs: &'a RegisterBlock,
    map: &'a RegisterMap,
    poll_interval: Duration,
}

impl<'a> Monitor<'a> {
    /// Monitor over `regs`
    pub const fn new(regs: &'a RegisterBlock, map: &'a RegisterMap, poll_interval: Duration) -> Self {
        Self {
            regs,
            map,
            poll_interval,
        }
    }

    /// Primary status
    #[must_use]
    pub fn status(&self) -> GpuStatus {
        GpuStatus(self.regs.read32(self.map.status))
    }

    /// Raw secondary status
    #[must_use]
    pub fn status2(&self) -> u32 {
        self.regs.read32(self.map.status2)
    }

    /// True when GUI_ACTIVE is clear
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.status().gui_active()
    }

    /// Compute units, wavefronts and a coarse utilization figure
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn compute_status(&self) -> ComputeStatus {
        let s2 = self.status2();
        ComputeStatus {
            compute_units: ((s2 >> status2::CU_ACTIVE_SHIFT) & status2::COUNT_MASK) as u8,
            wavefronts: ((s2 >> status2::WAVES_ACTIVE_SHIFT) & status2::COUNT_MASK) as u8,
            utilization: if self.status().gui_active() { 100 } else { 0 },
        }
    }

    /// Poll until idle.
    ///
    /// A zero `timeout` waits forever. Returns at once, with zero polls, if
    /// the device is already idle.
    ///
    /// # Errors
    ///
    /// Returns `TimedOut` when `timeout` elapses first.
    pub fn wait_for_idle(&self, timeout: Duration) -> Result<IdleWait> {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            let current = self.status();
            if !current.gui_active() {
                let elapsed = start.elapsed();
                tracing::debug!("Idle after {polls} polls ({elapsed:?})");
                return Ok(IdleWait { polls, elapsed });
            }
            if polls == 0 && current.is_sentinel() {
                tracing::warn!("Status reads {current}; device may be gone");
            }
            if !timeout.is_zero() && start.elapsed() >= timeout {
                tracing::warn!("Still busy after {timeout:?}: {current}");
                return Err(NaviError::timed_out(timeout));
            }
            std::thread::sleep(self.poll_interval);
            polls = polls.saturating_add(1);
        }
    }
}

/// Pulse every soft-reset bit.
///
/// Never called automatically; in-flight work is lost.
pub fn soft_reset(regs: &mut RegisterBlock, map: &RegisterMap) {
    tracing::warn!("Soft reset via {:#x}", map.soft_reset);
    regs.write32(map.soft_reset, u32::MAX);
    std::thread::sleep(RESET_HOLD);
    regs.write32(map.soft_reset, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPlatform;
    use crate::window::{MappedWindow, WindowKind};

    const REGS: u64 = 0xF000_0000;

    fn block() -> (SimPlatform, RegisterBlock) {
        let sim = SimPlatform::new();
        sim.add_memory(REGS, 0x10000);
        let window = MappedWindow::map(&sim, WindowKind::Registers, REGS, 0x10000).unwrap();
        (sim, RegisterBlock::new(window))
    }

    #[test]
    fn status_bits() {
        let s = GpuStatus(status::GUI_ACTIVE | status::CP_BUSY);
        assert!(s.gui_active() && s.cp_busy() && !s.cb_busy());
        assert!(GpuStatus(u32::MAX).is_sentinel());
        assert_eq!(
            GpuStatus(0xA000_0000).to_string(),
            "0xa0000000 (GUI_ACTIVE=1 CB_BUSY=0 CP_BUSY=1)"
        );
    }

    #[test]
    fn compute_status_decode() {
        let (sim, regs) = block();
        let map = RegisterMap::gfx10();
        sim.poke32(REGS + 0x8014, 0x0028_2400);
        sim.poke32(REGS + 0x8010, status::GUI_ACTIVE);

        let monitor = Monitor::new(&regs, &map, Duration::from_millis(1));
        assert_eq!(
            monitor.compute_status(),
            ComputeStatus {
                compute_units: 0x24,
                wavefronts: 0x28,
                utilization: 100
            }
        );
        assert!(!monitor.is_idle());
    }

    #[test]
    fn idle_device_returns_without_polling() {
        let (_sim, regs) = block();
        let map = RegisterMap::gfx10();
        let monitor = Monitor::new(&regs, &map, Duration::from_millis(1));
        let wait = monitor.wait_for_idle(Duration::from_millis(1)).unwrap();
        assert_eq!(wait.polls, 0);
    }

    #[test]
    fn busy_device_times_out() {
        let (sim, regs) = block();
        let map = RegisterMap::gfx10();
        sim.poke32(REGS + 0x8010, status::GUI_ACTIVE);
        let monitor = Monitor::new(&regs, &map, Duration::from_millis(1));
        let err = monitor.wait_for_idle(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, NaviError::TimedOut { duration_ms: 5 }));
    }

    #[test]
    fn soft_reset_leaves_register_clear() {
        let (sim, mut regs) = block();
        sim.poke32(REGS + 0x8020, 0x1234);
        soft_reset(&mut regs, &RegisterMap::gfx10());
        assert_eq!(sim.peek32(REGS + 0x8020), 0);
    }
}
