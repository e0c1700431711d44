//! Enumerate AMD display controllers on the PCI bus
//!
//! Reads configuration space only; no BARs are mapped.

use navi_driver::{discovery, BarInfo, LinuxPlatform, WindowKind};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("navi_driver=debug")
        .init();

    println!("🔍 AMD GPU Enumeration\n");

    let platform = LinuxPlatform::from_env();
    let devices = discovery::enumerate(&platform);

    println!("Found {} device(s):\n", devices.len());

    for dev in &devices {
        println!("📟 {}", dev.name);
        println!("   PCI:        {}", dev.address);
        println!("   Chip:       {:?}", dev.chip());
        println!("   VRAM:       {} MB", dev.vram_bytes() >> 20);
        for kind in [WindowKind::Registers, WindowKind::Aperture, WindowKind::Doorbell] {
            match discovery::read_bar(&platform, dev.address, kind) {
                Ok(bar) => print_bar(&bar),
                Err(e) => println!("   {kind:?}: unreadable ({e})"),
            }
        }
        println!();
    }

    println!("✅ Scan complete");
}

fn print_bar(bar: &BarInfo) {
    let aligned = if bar.is_aligned() { "" } else { " (misaligned)" };
    println!("   {:<11} {:#x}{aligned}", format!("{:?}:", bar.kind), bar.base);
}
