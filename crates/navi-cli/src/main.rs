//! `navi`: diagnostics CLI for register-level AMD Navi GPU control.
//!
//! ```text
//! USAGE:
//!   navi scan                        List AMD display controllers on the bus
//!   navi info [--bus B --device D]   Initialize and print the device summary
//!   navi status                      GRBM status, compute activity, rings
//!   navi ring <id>                   One ring's pointers and state
//!   navi peek <offset>               Read one MMIO register (hex offset)
//!   navi wait-idle [--timeout-ms N]  Poll until the GPU reports idle
//!   navi reset --yes                 Pulse GRBM soft reset
//!   navi performance <high|auto>     Request a performance level
//!   navi vram-check                  Write/read a test pattern in VRAM
//! ```
//!
//! All commands other than `scan` map device memory and need root.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use navi_chip::regs;
use navi_driver::{discovery, DeviceSelector, GpuDevice, LinuxPlatform, PerformanceLevel};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// VRAM offset used by `vram-check`
const CHECK_OFFSET: u64 = 0x1000;
/// Words written by `vram-check`
const CHECK_WORDS: u32 = 256;
/// First pattern word
const CHECK_SEED: u32 = 0xDEAD_BEEF;

#[derive(Parser)]
#[command(name = "navi", about = "Register-level AMD Navi GPU diagnostics", version)]
struct Cli {
    /// PCI bus of the GPU (default: first AMD display controller found).
    #[arg(long, global = true, value_parser = parse_u8)]
    bus: Option<u8>,
    /// PCI device number on that bus.
    #[arg(long, global = true, value_parser = parse_u8)]
    device: Option<u8>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List AMD display controllers on the PCI bus.
    Scan,
    /// Initialize the GPU and print its summary.
    Info,
    /// Print GRBM status, compute activity and ring state.
    Status,
    /// Print one ring's pointers and state.
    Ring {
        /// Ring id (0 = graphics, 1 = first compute ring).
        id: u8,
    },
    /// Read one 32-bit MMIO register.
    Peek {
        /// Byte offset into the register window (hex, `0x` optional).
        #[arg(value_parser = parse_hex)]
        offset: usize,
    },
    /// Poll the status register until the GPU is idle.
    WaitIdle {
        /// Give up after this many milliseconds (0 waits forever).
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Pulse GRBM soft reset (aborts in-flight work).
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },
    /// Request a performance level (best effort).
    Performance {
        /// `high` or `auto`.
        level: PerformanceLevel,
    },
    /// Write a test pattern into VRAM and read it back.
    VramCheck,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let selector = DeviceSelector::from_location(cli.bus, cli.device);
    tracing::debug!("Device selector: {selector:?}");

    match cli.command {
        Cmd::Scan => cmd_scan(),
        Cmd::Info => cmd_info(selector),
        Cmd::Status => cmd_status(selector),
        Cmd::Ring { id } => cmd_ring(selector, id),
        Cmd::Peek { offset } => cmd_peek(selector, offset),
        Cmd::WaitIdle { timeout_ms } => cmd_wait_idle(selector, timeout_ms),
        Cmd::Reset { yes } => cmd_reset(selector, yes),
        Cmd::Performance { level } => cmd_performance(selector, level),
        Cmd::VramCheck => cmd_vram_check(selector),
    }
}

fn open(selector: DeviceSelector) -> Result<GpuDevice> {
    let gpu = GpuDevice::open(selector)
        .context("GPU initialization failed (root and /dev/mem access required)")?;
    tracing::debug!("Opened {} at {}", gpu.name(), gpu.address());
    Ok(gpu)
}

fn cmd_scan() -> Result<()> {
    let devices = discovery::enumerate(&LinuxPlatform::from_env());
    println!("AMD display controllers: {}", devices.len());
    for dev in &devices {
        println!("  {dev}");
        println!("     chip {:?}  VRAM {} MB", dev.chip(), dev.vram_bytes() >> 20);
    }
    Ok(())
}

fn cmd_info(selector: DeviceSelector) -> Result<()> {
    let gpu = open(selector)?;
    println!("{gpu}");
    let vram = gpu.vram_info();
    println!(
        "VRAM: {} MB total, {} MB visible",
        vram.total_bytes >> 20,
        vram.visible_bytes >> 20
    );
    println!("Doorbell: {}", if gpu.has_doorbell() { "mapped" } else { "not mapped" });
    println!("Access check: {}", if gpu.verify_access() { "ok" } else { "FAILED" });
    Ok(())
}

fn cmd_status(selector: DeviceSelector) -> Result<()> {
    let gpu = open(selector)?;
    let monitor = gpu.monitor();
    let compute = monitor.compute_status();
    println!("GRBM_STATUS : {}", monitor.status());
    println!("GRBM_STATUS2: {:#010x}", monitor.status2());
    println!(
        "Compute     : {} CUs, {} waves, {}% busy",
        compute.compute_units, compute.wavefronts, compute.utilization
    );
    for id in [regs::ring::GFX, regs::ring::COMPUTE] {
        println!("{}", gpu.ring_status(id)?);
    }
    Ok(())
}

fn cmd_ring(selector: DeviceSelector, id: u8) -> Result<()> {
    let gpu = open(selector)?;
    let status = gpu.ring_status(id)?;
    println!("Ring {id}");
    println!("  state   : {}", status.state());
    println!("  base    : {:#x}", status.base_address);
    println!("  size    : {} bytes", status.size_bytes);
    println!("  rptr    : {}", status.read_ptr);
    println!("  wptr    : {}", status.write_ptr);
    println!("  free    : {} bytes", status.free_bytes(gpu.config().ring_margin_bytes));
    Ok(())
}

fn cmd_peek(selector: DeviceSelector, offset: usize) -> Result<()> {
    if offset % 4 != 0 {
        bail!("register offset {offset:#x} is not dword aligned");
    }
    let gpu = open(selector)?;
    tracing::debug!("Peek register {offset:#x}");
    println!("[{offset:#06x}] = {:#010x}", gpu.read32(offset));
    Ok(())
}

fn cmd_wait_idle(selector: DeviceSelector, timeout_ms: u64) -> Result<()> {
    let gpu = open(selector)?;
    let wait = gpu.wait_for_idle(Duration::from_millis(timeout_ms))?;
    println!("Idle after {} polls ({:?})", wait.polls, wait.elapsed);
    Ok(())
}

fn cmd_reset(selector: DeviceSelector, yes: bool) -> Result<()> {
    if !yes {
        bail!("soft reset aborts all in-flight GPU work; pass --yes to confirm");
    }
    let mut gpu = open(selector)?;
    tracing::info!("Soft reset requested for {}", gpu.address());
    gpu.soft_reset();
    println!("Soft reset pulsed. Status now {}", gpu.monitor().status());
    Ok(())
}

fn cmd_performance(selector: DeviceSelector, level: PerformanceLevel) -> Result<()> {
    let gpu = open(selector)?;
    if gpu.set_performance_level(level) {
        println!("Performance level set to {level}");
    } else {
        println!("Performance level {level} not applied (see log with RUST_LOG=warn)");
    }
    Ok(())
}

fn cmd_vram_check(selector: DeviceSelector) -> Result<()> {
    let mut gpu = open(selector)?;
    let pattern: Vec<u32> = (0..CHECK_WORDS).map(|i| CHECK_SEED.wrapping_add(i)).collect();

    let written = gpu.aperture_mut().write_pod(CHECK_OFFSET, &pattern);
    if written != pattern.len() {
        bail!("VRAM write at {CHECK_OFFSET:#x} outside the visible aperture");
    }
    let mut back = vec![0u32; pattern.len()];
    gpu.aperture().read_pod(CHECK_OFFSET, &mut back);

    let mismatches: Vec<usize> = (0..pattern.len()).filter(|&i| back[i] != pattern[i]).collect();
    tracing::debug!("VRAM check at {CHECK_OFFSET:#x}: {} mismatches", mismatches.len());
    if let Some(&first) = mismatches.first() {
        bail!(
            "{} of {} words differ; first at word {first}: wrote {:#010x}, read {:#010x}",
            mismatches.len(),
            pattern.len(),
            pattern[first],
            back[first]
        );
    }
    println!("VRAM check passed: {CHECK_WORDS} words at {CHECK_OFFSET:#x}");
    Ok(())
}

fn parse_hex(s: &str) -> Result<usize, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    usize::from_str_radix(digits, 16).map_err(|e| format!("invalid hex offset {s:?}: {e}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_hex_offsets() {
        assert_eq!(parse_hex("0x8010"), Ok(0x8010));
        assert_eq!(parse_hex("C20C"), Ok(0xC20C));
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn parses_location() {
        let cli = Cli::try_parse_from(["navi", "--bus", "0x03", "--device", "0", "info"]).unwrap();
        assert_eq!(cli.bus, Some(3));
        assert_eq!(cli.device, Some(0));
        assert!(matches!(cli.command, Cmd::Info));
    }

    #[test]
    fn parses_performance_level() {
        let cli = Cli::try_parse_from(["navi", "performance", "high"]).unwrap();
        assert!(matches!(cli.command, Cmd::Performance { level: PerformanceLevel::High }));
        assert!(Cli::try_parse_from(["navi", "performance", "turbo"]).is_err());
    }
}
