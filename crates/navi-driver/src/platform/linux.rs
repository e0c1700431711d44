//! Linux platform: sysfs configuration space and `/dev/mem` mappings.
//!
//! Requires root (or `CAP_SYS_RAWIO`) and a kernel that allows `/dev/mem`
//! access to PCI BARs (`iomem=relaxed` when `STRICT_DEVMEM` is on).

use super::{MappedMemory, PciAddress, Platform};
use crate::power::PerformanceLevel;
use crate::topology::PcieLink;
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Platform backed by sysfs and `/dev/mem`
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    sysfs_root: PathBuf,
    mem_path: PathBuf,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxPlatform {
    /// Platform rooted at `/sys`
    #[must_use]
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            mem_path: PathBuf::from("/dev/mem"),
        }
    }

    /// Platform honouring `NAVI_SYSFS_ROOT`
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("NAVI_SYSFS_ROOT") {
            Ok(root) => Self::new().with_sysfs_root(root),
            Err(_) => Self::new(),
        }
    }

    /// Use a different sysfs root (fake trees in tests)
    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Use a different physical memory device
    #[must_use]
    pub fn with_mem_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.mem_path = path.into();
        self
    }

    /// Sysfs directory of a PCI function
    #[must_use]
    pub fn device_dir(&self, addr: PciAddress) -> PathBuf {
        self.sysfs_root
            .join("bus/pci/devices")
            .join(addr.sysfs_name())
    }
}

impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn read_config(&self, addr: PciAddress, offset: u16) -> io::Result<u32> {
        let path = self.device_dir(addr).join("config");
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(navi_chip::pcie::ABSENT);
            }
            Err(e) => return Err(e),
        };

        let mut word = [0u8; 4];
        match file.read_exact_at(&mut word, u64::from(offset)) {
            Ok(()) => Ok(u32::from_le_bytes(word)),
            // Unprivileged readers only see the first 64 bytes
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} truncated at {offset:#x} (not root?)", path.display()),
            )),
            Err(e) => Err(e),
        }
    }

    fn map_physical(&self, phys: u64, len: usize) -> io::Result<Box<dyn MappedMemory>> {
        Ok(Box::new(DevMemMapping::new(&self.mem_path, phys, len)?))
    }

    fn link_status(&self, addr: PciAddress) -> io::Result<PcieLink> {
        PcieLink::from_sysfs(&self.device_dir(addr))
    }

    fn set_performance_level(&self, addr: PciAddress, level: PerformanceLevel) -> io::Result<()> {
        let path = self
            .device_dir(addr)
            .join("power_dpm_force_performance_level");
        std::fs::write(&path, level.as_str())?;
        tracing::info!("{}: {level}", path.display());
        Ok(())
    }
}

/// Shared mapping of a physical range through `/dev/mem`
#[derive(Debug)]
struct DevMemMapping {
    ptr: NonNull<u8>,
    len: usize,
    phys: u64,
    _file: File,
}

impl DevMemMapping {
    fn new(mem: &Path, phys: u64, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-length mapping"));
        }

        // Uncached access for MMIO
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(mem)?;

        // SAFETY: mmap preconditions:
        // - fd is valid (just opened) and kept open in `_file` for the mapping's lifetime
        // - len is non-zero (checked above)
        // - phys is the caller's window base; every window rule is at least 4 KiB
        //   aligned so the offset is page aligned, and the kernel rejects it otherwise
        // - MAP_SHARED so stores reach the device rather than a private copy
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                phys,
            )
        }
        .map_err(io::Error::from)?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;

        tracing::debug!(
            "Mapped {len:#x} bytes of {} at phys {phys:#x} -> {ptr:p}",
            mem.display()
        );

        Ok(Self {
            ptr,
            len,
            phys,
            _file: file,
        })
    }
}

// SAFETY: ptr comes from a successful mmap of exactly `len` bytes and stays
// mapped until Drop; mmap returns page-aligned addresses (≥ 8-byte aligned).
unsafe impl MappedMemory for DevMemMapping {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }
}

// SAFETY: the mapping is owned exclusively by this value; moving it between
// threads does not invalidate it (mappings are process-wide).
unsafe impl Send for DevMemMapping {}

// SAFETY: this type exposes no accessors of its own; all access goes through
// MappedWindow, which requires &mut for writes.
unsafe impl Sync for DevMemMapping {}

impl Drop for DevMemMapping {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {:#x} bytes at phys {:#x}", self.len, self.phys);

        // SAFETY: ptr/len are exactly what mmap returned in new(); Drop runs
        // once, and no window borrowing this mapping can outlive it.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.len) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}
