//! Launch a compute dispatch on the simulated bus
//!
//! Programs compute ring 1 by hand, submits one launch and dumps the PM4
//! stream as it landed in "VRAM". Runs without a GPU.

use navi_driver::packet::decode_header;
use navi_driver::{DeviceSelector, GpuDevice, LaunchDescriptor, Result, SimLayout, SimPlatform};

const RING_BASE: u64 = 0x1000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("navi_driver=debug")
        .init();

    let layout = SimLayout::default();
    let sim = SimPlatform::with_gpu(3, 0, navi_driver::pcie_ids::device_id::RX_5700_XT);

    // Ring 1: enabled, 4 KiB at VRAM offset 0x1000
    let block = layout.registers + 0xC200;
    sim.poke32(block + 0x04, 1);
    sim.poke32(block + 0x10, 4096);
    sim.poke64(block + 0x18, RING_BASE);

    let mut gpu = GpuDevice::init(sim.clone(), DeviceSelector::Auto, layout.driver_config())?;
    println!("{gpu}\n");

    let launch = LaunchDescriptor::new(0x0004_0000, [16, 1, 1], [64, 1, 1]).with_args(0x0008_0000);
    let receipt = gpu.launch(&launch)?;
    println!(
        "🚀 {} words on ring {}, write pointer now {}\n",
        receipt.words, receipt.ring, receipt.write_ptr
    );

    let words = sim.peek_words(layout.aperture + RING_BASE, receipt.words);
    let mut at = 0;
    while at < words.len() {
        let header = decode_header(words[at]);
        let end = (at + header.count).min(words.len());
        println!("{at:3}: opcode {:#04x}  {:08x?}", header.opcode, &words[at + 1..end]);
        at = end;
    }
    println!("\n{}", gpu.ring_status(receipt.ring)?);
    Ok(())
}
