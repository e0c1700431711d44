//! End-to-end tests against the simulated platform
//!
//! Everything here runs without a GPU: the simulated bus backs each BAR with
//! heap memory, so the driver's MMIO and VRAM traffic can be inspected.

use navi_driver::pcie_ids::{device_id, AMD_VENDOR_ID};
use navi_driver::{
    discovery, DeviceSelector, DriverConfig, GpuDevice, LaunchDescriptor, NaviError, PciAddress,
    PcieLink, SimLayout, SimPlatform,
};
use std::time::Duration;

const RING: u8 = 1;
const RING_BASE: u64 = 0x1000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("navi_driver=debug")
        .with_test_writer()
        .try_init();
}

fn sim() -> (SimPlatform, SimLayout) {
    init_tracing();
    let layout = SimLayout::default();
    let sim = SimPlatform::with_gpu(3, 0, device_id::RX_5700_XT);
    sim.poke32(layout.registers + 0x8010, 0x0000_0001);
    (sim, layout)
}

fn program_ring(sim: &SimPlatform, layout: &SimLayout, size: u32, rptr: u32) {
    let block = layout.registers + 0xC100 + u64::from(RING) * 0x100;
    sim.poke32(block + 0x04, 1);
    sim.poke32(block + 0x08, rptr);
    sim.poke32(block + 0x0C, rptr);
    sim.poke32(block + 0x10, size);
    sim.poke64(block + 0x18, RING_BASE);
}

fn open(sim: &SimPlatform, config: DriverConfig) -> GpuDevice<SimPlatform> {
    GpuDevice::init(sim.clone(), DeviceSelector::Auto, config).expect("init on simulated bus")
}

fn launch() -> LaunchDescriptor {
    LaunchDescriptor::new(0x0004_0000, [16, 1, 1], [64, 1, 1]).with_args(0x0008_0000)
}

#[test]
fn scan_finds_amd_display_controller() {
    let (sim, _) = sim();
    sim.add_function(PciAddress::new(0, 2), 0x1234_8086, 0x0600_0000);

    let devices = discovery::enumerate(&sim);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].vendor_id, AMD_VENDOR_ID);
    assert_eq!(devices[0].address, PciAddress::new(3, 0));
}

#[test]
fn wait_for_idle_on_idle_device_takes_no_polls() {
    let (sim, layout) = sim();
    let gpu = open(&sim, layout.driver_config());
    assert!(gpu.is_idle());
    let wait = gpu.wait_for_idle(Duration::from_millis(1)).unwrap();
    assert_eq!(wait.polls, 0);
}

#[test]
fn busy_device_times_out() {
    let (sim, layout) = sim();
    sim.poke32(layout.registers + 0x8010, 0x8000_0000);
    let gpu = open(&sim, layout.driver_config());
    let err = gpu.wait_for_idle(Duration::from_millis(3)).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(gpu.compute_status().utilization, 100);
}

#[test]
fn launch_lands_in_ring_and_rings_doorbell() {
    let (sim, layout) = sim();
    program_ring(&sim, &layout, 4096, 0);
    let mut gpu = open(&sim, layout.driver_config());

    let expected = gpu.dispatcher().encode(&launch()).unwrap();
    let receipt = gpu.launch(&launch()).unwrap();

    assert_eq!(receipt.ring, RING);
    assert_eq!(receipt.words, 38);
    assert_eq!(receipt.write_ptr, 38);
    assert_eq!(
        sim.peek_words(layout.aperture + RING_BASE, 38),
        expected.words().to_vec()
    );
    // WPTR register and doorbell slot
    assert_eq!(sim.peek32(layout.registers + 0xC20C), 38);
    assert_eq!(sim.peek32(layout.doorbell + 4), 38);
}

#[test]
fn back_to_back_launches_wrap_the_ring() {
    let (sim, layout) = sim();
    // 64 dwords; one launch is 38, so the second one wraps
    program_ring(&sim, &layout, 256, 0);
    let mut gpu = open(&sim, layout.driver_config());

    gpu.launch(&launch()).unwrap();

    // Hardware has not consumed anything yet: no room for another launch
    let err = gpu.launch(&launch()).unwrap_err();
    assert!(matches!(err, NaviError::RingFull { ring: RING, .. }));

    // Let the read pointer catch up, then submit again
    sim.poke32(layout.registers + 0xC208, 38);
    let receipt = gpu.launch(&launch()).unwrap();
    assert_eq!(receipt.write_ptr, (38 * 2) % 64);

    let stream = gpu.dispatcher().encode(&launch()).unwrap();
    let words = stream.words();
    assert_eq!(sim.peek_words(layout.aperture + RING_BASE + 38 * 4, 26), words[..26].to_vec());
    assert_eq!(sim.peek_words(layout.aperture + RING_BASE, 12), words[26..].to_vec());
}

#[test]
fn disabled_compute_ring_is_reported() {
    let (sim, layout) = sim();
    let mut gpu = open(&sim, layout.driver_config());
    let err = gpu.launch(&launch()).unwrap_err();
    assert!(matches!(err, NaviError::RingDisabled { ring: RING }));
}

#[test]
fn drop_unmaps_doorbell_aperture_registers() {
    let (sim, layout) = sim();
    {
        let _gpu = open(&sim, layout.driver_config());
        assert_eq!(sim.live_mappings(), 3);
    }
    assert_eq!(sim.live_mappings(), 0);
    assert_eq!(
        sim.unmap_log(),
        vec![layout.doorbell, layout.aperture, layout.registers]
    );
}

#[test]
fn misaligned_aperture_bar() {
    let (sim, layout) = sim();
    let addr = PciAddress::new(3, 0);
    sim.set_bar64(addr, 0x18, (layout.aperture + 0x0800_0000) | 0xC);

    let strict = layout.driver_config().with_strict_alignment(true);
    let err = GpuDevice::init(sim.clone(), DeviceSelector::Auto, strict).unwrap_err();
    assert!(matches!(err, NaviError::AlignmentViolation { .. }));
    assert_eq!(sim.live_mappings(), 0);

    let gpu = open(&sim, layout.driver_config());
    assert_eq!(gpu.vram_info().aperture_phys, layout.aperture);
}

#[test]
fn doorbell_bar_inside_its_granule() {
    let (sim, layout) = sim();
    // 8 KiB-aligned BAR5, 8 KiB into the 64 KiB granule
    let bar5 = layout.doorbell + 0x2000;
    sim.set_config(PciAddress::new(3, 0), 0x24, u32::try_from(bar5).unwrap());
    program_ring(&sim, &layout, 4096, 0);

    // Strict alignment covers BAR0/BAR2 only; the doorbell still maps
    let mut gpu = open(&sim, layout.driver_config().with_strict_alignment(true));
    assert!(gpu.has_doorbell());
    gpu.launch(&launch()).unwrap();

    assert_eq!(sim.peek32(bar5 + 4), 38);
    assert_eq!(sim.peek32(layout.doorbell + 4), 0);

    drop(gpu);
    assert_eq!(sim.unmap_log()[0], layout.doorbell);
}

#[test]
fn register_bar_rounded_to_its_granule() {
    let (sim, layout) = sim();
    let addr = PciAddress::new(3, 0);
    sim.set_bar64(addr, 0x10, (layout.registers + 0x800) | 0x4);

    let err = GpuDevice::init(
        sim.clone(),
        DeviceSelector::Auto,
        layout.driver_config().with_strict_alignment(true),
    )
    .unwrap_err();
    assert!(matches!(err, NaviError::AlignmentViolation { alignment: 0x1000, .. }));
    assert_eq!(sim.live_mappings(), 0);

    let gpu = open(&sim, layout.driver_config());
    assert_eq!(gpu.registers().window().phys(), layout.registers);
}

#[test]
fn explicit_location_and_missing_device() {
    let (sim, layout) = sim();
    let gpu = GpuDevice::init(
        sim.clone(),
        DeviceSelector::At { bus: 3, device: 0 },
        layout.driver_config(),
    )
    .unwrap();
    assert_eq!(gpu.info().device_id, device_id::RX_5700_XT);
    drop(gpu);

    let err = GpuDevice::init(sim, DeviceSelector::At { bus: 4, device: 0 }, layout.driver_config())
        .unwrap_err();
    assert!(matches!(err, NaviError::DeviceNotFound { bus: Some(4), device: Some(0) }));
}

#[test]
fn link_query_is_retried_once() {
    let (sim, layout) = sim();
    sim.set_link(Some(PcieLink::new(4, 16)));
    sim.fail_link_queries(1);
    let gpu = open(&sim, layout.driver_config());
    assert_eq!(gpu.link().map(|l| l.lanes), Some(16));
    assert_eq!(sim.link_queries(), 2);
    assert!(gpu.summary().ends_with("PCIe: x16 Gen4 (31.51 GB/s)"));
}

#[test]
fn link_failure_is_not_fatal() {
    let (sim, layout) = sim();
    sim.set_link(Some(PcieLink::new(4, 16)));
    sim.fail_link_queries(5);
    let gpu = open(&sim, layout.driver_config().with_link_retries(2));
    assert!(gpu.link().is_none());
    assert_eq!(sim.link_queries(), 3);
}

#[test]
fn vram_pattern_round_trip() {
    let (sim, layout) = sim();
    let mut gpu = open(&sim, layout.driver_config());

    let pattern: Vec<u32> = (0..256).map(|i| 0xDEAD_BEEF_u32.wrapping_add(i)).collect();
    assert_eq!(gpu.aperture_mut().write_pod(0x1000, &pattern), 256);
    let mut back = vec![0u32; 256];
    assert_eq!(gpu.aperture().read_pod(0x1000, &mut back), 256);
    assert_eq!(back, pattern);

    // Out of the visible window: nothing transferred
    let visible = gpu.vram_info().visible_bytes;
    assert_eq!(gpu.write_vram(visible - 2, &[0; 4]), 0);
}

#[test]
fn register_access_out_of_window() {
    let (sim, layout) = sim();
    let mut gpu = open(&sim, layout.driver_config());
    let beyond = layout.register_size;
    assert_eq!(gpu.read32(beyond), 0xFFFF_FFFF);
    gpu.write32(beyond, 1);
    gpu.modify(0x100, 0xF0, 0x30);
    assert_eq!(sim.peek32(layout.registers + 0x100), 0x30);
}
