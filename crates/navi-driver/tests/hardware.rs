//! Hardware validation tests
//!
//! Run as root on a machine with a Navi GPU and `/dev/mem` access to its
//! BARs: `cargo test -p navi-driver --test hardware -- --ignored`

use navi_driver::{discovery, DeviceSelector, GpuDevice, LinuxPlatform};
use std::time::Duration;

#[test]
#[ignore] // Requires hardware
fn test_scan_finds_gpu() {
    let devices = discovery::enumerate(&LinuxPlatform::from_env());
    assert!(!devices.is_empty(), "no AMD display controller on the bus");
    for dev in &devices {
        println!("{dev}");
    }
}

#[test]
#[ignore] // Requires hardware
fn test_init_and_verify() {
    let gpu = GpuDevice::open(DeviceSelector::Auto).expect("GPU init");
    println!("{gpu}");
    assert!(gpu.verify_access());
    let info = gpu.vram_info();
    assert!(info.visible_bytes > 0);
    assert!(info.total_bytes >= info.visible_bytes);
}

#[test]
#[ignore] // Requires hardware
fn test_vram_pattern() {
    let mut gpu = GpuDevice::open(DeviceSelector::Auto).expect("GPU init");
    let pattern: Vec<u32> = (0..256).map(|i| 0xDEAD_BEEF_u32.wrapping_add(i)).collect();
    assert_eq!(gpu.aperture_mut().write_pod(0x1000, &pattern), 256);
    let mut back = vec![0u32; 256];
    assert_eq!(gpu.aperture().read_pod(0x1000, &mut back), 256);
    assert_eq!(back, pattern, "VRAM readback mismatch");
}

#[test]
#[ignore] // Requires hardware
fn test_status_and_rings() {
    let gpu = GpuDevice::open(DeviceSelector::Auto).expect("GPU init");
    println!("status: {}", gpu.monitor().status());
    println!("compute: {:?}", gpu.compute_status());
    for id in 0..2 {
        println!("{}", gpu.ring_status(id).expect("ring status"));
    }
    match gpu.wait_for_idle(Duration::from_millis(100)) {
        Ok(wait) => println!("idle after {} polls", wait.polls),
        Err(e) => println!("ℹ️  GPU busy: {e}"),
    }
}
