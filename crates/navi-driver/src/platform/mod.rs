//! Privileged platform seam.
//!
//! Everything that needs OS privilege goes through [`Platform`]: PCI
//! configuration reads, physical-to-virtual mapping and the advisory link
//! query. All protocol logic lives above this trait.
//!
//! ```text
//! Platform
//!   LinuxPlatform  sysfs config space + /dev/mem mmap
//!   SimPlatform    heap-backed simulated bus (tests, no hardware)
//! ```

pub mod linux;

use crate::power::PerformanceLevel;
use crate::topology::PcieLink;
use std::fmt;
use std::io;
use std::ptr::NonNull;

pub use linux::LinuxPlatform;

/// PCI location of one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    /// Bus number
    pub bus: u8,
    /// Device number (0..32)
    pub device: u8,
    /// Function number (0..8)
    pub function: u8,
}

impl PciAddress {
    /// Function 0 of `bus:device`
    #[must_use]
    pub const fn new(bus: u8, device: u8) -> Self {
        Self {
            bus,
            device,
            function: 0,
        }
    }

    /// Sysfs name in domain 0 (`0000:03:00.0`)
    #[must_use]
    pub fn sysfs_name(&self) -> String {
        format!("0000:{self}")
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// A live physical mapping handed out by a [`Platform`].
///
/// Dropping the value unmaps the range.
///
/// # Safety
///
/// Implementors guarantee that [`as_ptr`](Self::as_ptr) is valid for reads
/// and writes of [`len`](Self::len) bytes for as long as the value lives, and
/// that the pointer is at least 8-byte aligned.
pub unsafe trait MappedMemory: Send + Sync + fmt::Debug {
    /// Base of the mapping in process address space
    fn as_ptr(&self) -> NonNull<u8>;

    /// Length in bytes
    fn len(&self) -> usize;

    /// True if the mapping is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The privileged collaborator
pub trait Platform {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Read one configuration dword.
    ///
    /// An absent function reads back as all-ones, as on the bus itself.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration space cannot be accessed at all.
    fn read_config(&self, addr: PciAddress, offset: u16) -> io::Result<u32>;

    /// Map `len` bytes of physical address space at `phys`.
    ///
    /// # Errors
    ///
    /// Returns error if the range cannot be mapped.
    fn map_physical(&self, phys: u64, len: usize) -> io::Result<Box<dyn MappedMemory>>;

    /// Negotiated link width and generation.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` unless the platform can report the link.
    fn link_status(&self, addr: PciAddress) -> io::Result<PcieLink> {
        let _ = addr;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "link status not available on this platform",
        ))
    }

    /// Request a performance level.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` unless the platform exposes a power control.
    fn set_performance_level(&self, addr: PciAddress, level: PerformanceLevel) -> io::Result<()> {
        let _ = (addr, level);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "power control not available on this platform",
        ))
    }
}

impl<P: Platform + ?Sized> Platform for &P {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn read_config(&self, addr: PciAddress, offset: u16) -> io::Result<u32> {
        (**self).read_config(addr, offset)
    }

    fn map_physical(&self, phys: u64, len: usize) -> io::Result<Box<dyn MappedMemory>> {
        (**self).map_physical(phys, len)
    }

    fn link_status(&self, addr: PciAddress) -> io::Result<PcieLink> {
        (**self).link_status(addr)
    }

    fn set_performance_level(&self, addr: PciAddress, level: PerformanceLevel) -> io::Result<()> {
        (**self).set_performance_level(addr, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_formatting() {
        let addr = PciAddress::new(0x0a, 0x1f);
        assert_eq!(addr.to_string(), "0a:1f.0");
        assert_eq!(addr.sysfs_name(), "0000:0a:1f.0");
    }

    #[test]
    fn addresses_order_by_bus_then_device() {
        let mut v = vec![PciAddress::new(3, 0), PciAddress::new(1, 5), PciAddress::new(1, 2)];
        v.sort();
        assert_eq!(v, vec![PciAddress::new(1, 2), PciAddress::new(1, 5), PciAddress::new(3, 0)]);
    }
}
