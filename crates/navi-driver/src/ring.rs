//! Ring buffer manager.
//!
//! Each ring has a register block holding its control word, hardware read
//! pointer, write pointer, size and GPU base address. Pointers count dwords;
//! the size counts bytes. The ring's backing store is GPU-local VRAM, which
//! starts at GPU address 0, so a ring is reachable from the host when
//! `[base, base + size)` lies inside the visible aperture.
//!
//! ```text
//!   base                      rptr            wptr             base+size
//!    |  free  |///// pending (hardware) /////|      free          |
//! ```
//!
//! The write pointer is software-owned: the manager keeps a shadow copy per
//! ring so consecutive submits append after each other before a doorbell.

use crate::aperture::Aperture;
use crate::config::RegisterMap;
use crate::error::{NaviError, Result};
use crate::registers::RegisterBlock;
use crate::window::DoorbellWindow;
use std::fmt;

/// Coarse ring state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    /// Enable bit clear
    Disabled,
    /// Enabled, read pointer caught up with write pointer
    Idle,
    /// Enabled, commands pending
    Busy,
}

impl fmt::Display for RingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Idle => "idle",
            Self::Busy => "busy",
        })
    }
}

/// Snapshot of one ring's register block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    /// Ring id
    pub id: u8,
    /// GPU address of the backing store
    pub base_address: u64,
    /// Hardware read pointer (dwords)
    pub read_ptr: u32,
    /// Write pointer register (dwords)
    pub write_ptr: u32,
    /// Ring size (bytes)
    pub size_bytes: u32,
    /// Enable bit
    pub enabled: bool,
}

impl RingStatus {
    /// Classify the ring
    #[must_use]
    pub const fn state(&self) -> RingState {
        if !self.enabled {
            RingState::Disabled
        } else if self.read_ptr == self.write_ptr {
            RingState::Idle
        } else {
            RingState::Busy
        }
    }

    /// Free bytes per the register pointers, minus `margin`
    #[must_use]
    pub fn free_bytes(&self, margin: u32) -> u32 {
        free_space(self.read_ptr, self.write_ptr, self.size_bytes, margin)
    }
}

impl fmt::Display for RingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ring {}: {} base {:#x} size {:#x} rptr {:#x} wptr {:#x}",
            self.id,
            self.state(),
            self.base_address,
            self.size_bytes,
            self.read_ptr,
            self.write_ptr
        )
    }
}

#[allow(clippy::cast_possible_truncation)]
fn byte_offset(ptr: u32, size_bytes: u32) -> u32 {
    ((u64::from(ptr) * 4) % u64::from(size_bytes)) as u32
}

/// Smallest usable safety margin: one dword.
pub const MIN_RING_MARGIN: u32 = 4;

/// Free bytes in a ring of `size_bytes` given dword pointers.
///
/// `used = w >= r ? w - r : size - r + w`, `free = size - used - margin`,
/// saturating at zero. Equal pointers mean empty, so the writer must never
/// catch up with the reader from behind; margins below
/// [`MIN_RING_MARGIN`] are raised to it.
#[must_use]
pub fn free_space(read_ptr: u32, write_ptr: u32, size_bytes: u32, margin: u32) -> u32 {
    if size_bytes == 0 {
        return 0;
    }
    let r = byte_offset(read_ptr, size_bytes);
    let w = byte_offset(write_ptr, size_bytes);
    let used = if w >= r { w - r } else { size_bytes - r + w };
    size_bytes
        .saturating_sub(used)
        .saturating_sub(margin.max(MIN_RING_MARGIN))
}

fn check_id(map: &RegisterMap, id: u8) -> Result<()> {
    if id < map.ring_count {
        Ok(())
    } else {
        Err(NaviError::InvalidRing {
            ring: id,
            count: map.ring_count,
        })
    }
}

/// Read ring `id`'s register block.
///
/// # Errors
///
/// Returns `InvalidRing` if `id` has no register block.
pub fn read_status(regs: &RegisterBlock, map: &RegisterMap, id: u8) -> Result<RingStatus> {
    check_id(map, id)?;
    let block = map.ring_block(id);
    let layout = map.ring;
    Ok(RingStatus {
        id,
        base_address: regs.read64(block + layout.base),
        read_ptr: regs.read32(block + layout.rptr),
        write_ptr: regs.read32(block + layout.wptr),
        size_bytes: regs.read32(block + layout.size),
        enabled: regs.read32(block + layout.cntl) & layout.enable_bit != 0,
    })
}

/// Software-owned write pointers, one per ring
#[derive(Debug, Clone, Default)]
pub struct WritePointers {
    shadow: Vec<Option<u32>>,
}

impl WritePointers {
    /// Shadow pointer for `id`, if a submit or doorbell has set one
    #[must_use]
    pub fn get(&self, id: u8) -> Option<u32> {
        self.shadow.get(usize::from(id)).copied().flatten()
    }

    fn set(&mut self, id: u8, ptr: u32) {
        let idx = usize::from(id);
        if self.shadow.len() <= idx {
            self.shadow.resize(idx + 1, None);
        }
        self.shadow[idx] = Some(ptr);
    }
}

/// Ring operations over a device's windows
#[derive(Debug)]
pub struct RingManager<'a> {
    regs: &'a mut RegisterBlock,
    aperture: &'a mut Aperture,
    doorbell: Option<&'a mut DoorbellWindow>,
    pointers: &'a mut WritePointers,
    map: &'a RegisterMap,
    margin: u32,
}

impl<'a> RingManager<'a> {
    /// Borrow a device's windows and pointer state
    pub fn new(
        regs: &'a mut RegisterBlock,
        aperture: &'a mut Aperture,
        doorbell: Option<&'a mut DoorbellWindow>,
        pointers: &'a mut WritePointers,
        map: &'a RegisterMap,
        margin: u32,
    ) -> Self {
        Self {
            regs,
            aperture,
            doorbell,
            pointers,
            map,
            margin,
        }
    }

    /// Register snapshot of ring `id`
    ///
    /// # Errors
    ///
    /// Returns `InvalidRing` if `id` has no register block.
    pub fn status(&self, id: u8) -> Result<RingStatus> {
        read_status(&*self.regs, self.map, id)
    }

    /// Free bytes, counting words submitted but not yet rung
    ///
    /// # Errors
    ///
    /// Returns `InvalidRing` if `id` has no register block.
    pub fn free_bytes(&self, id: u8) -> Result<u32> {
        let status = self.status(id)?;
        let wptr = self.pointers.get(id).unwrap_or(status.write_ptr);
        Ok(free_space(status.read_ptr, wptr, status.size_bytes, self.margin))
    }

    /// Copy `words` into ring `id` at its write pointer.
    ///
    /// Returns the new write pointer (dwords); hand it to
    /// [`doorbell`](Self::doorbell) to make the hardware see the words.
    ///
    /// # Errors
    ///
    /// - `InvalidRing` for an unknown id
    /// - `RingDisabled` if the enable bit is clear
    /// - `RingUnreachable` if the backing store is not host-visible
    /// - `RingFull` if the words do not fit; nothing is written
    pub fn submit(&mut self, id: u8, words: &[u32]) -> Result<u32> {
        let status = self.status(id)?;
        if !status.enabled {
            return Err(NaviError::RingDisabled { ring: id });
        }

        let wptr = self.pointers.get(id).unwrap_or(status.write_ptr);
        if words.is_empty() {
            return Ok(wptr);
        }

        let size = status.size_bytes as usize;
        let reachable = size > 0
            && size % 4 == 0
            && self.aperture.contains(status.base_address, size);
        if !reachable {
            return Err(NaviError::RingUnreachable {
                ring: id,
                base: status.base_address,
                size: status.size_bytes,
            });
        }

        let free = free_space(status.read_ptr, wptr, status.size_bytes, self.margin) as usize;
        let requested = words.len() * 4;
        if requested > free {
            return Err(NaviError::RingFull {
                ring: id,
                requested,
                free,
            });
        }

        let offset = byte_offset(wptr, status.size_bytes) as usize;
        if !self
            .aperture
            .write_ring(status.base_address, size, offset, words)
        {
            return Err(NaviError::RingUnreachable {
                ring: id,
                base: status.base_address,
                size: status.size_bytes,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let new_wptr = (((offset + requested) % size) / 4) as u32;
        self.pointers.set(id, new_wptr);

        tracing::debug!(
            "Ring {id}: {} words at byte {offset:#x}, wptr {wptr:#x} -> {new_wptr:#x}, {} bytes free before",
            words.len(),
            free
        );
        Ok(new_wptr)
    }

    /// Publish `write_ptr` to the hardware.
    ///
    /// Always writes the ring's WPTR register; when the doorbell window is
    /// mapped the pointer is also written to the ring's doorbell slot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRing` for an unknown id.
    pub fn doorbell(&mut self, id: u8, write_ptr: u32) -> Result<()> {
        check_id(self.map, id)?;
        let block = self.map.ring_block(id);
        self.regs.write32(block + self.map.ring.wptr, write_ptr);

        if let Some(doorbell) = self.doorbell.as_deref_mut() {
            let slot = usize::from(id) * self.map.doorbell_stride;
            if !doorbell.ring(slot, write_ptr) {
                tracing::warn!("Doorbell slot {slot:#x} for ring {id} outside window");
            }
        }

        self.pointers.set(id, write_ptr);
        tracing::trace!("Ring {id}: doorbell wptr {write_ptr:#x}");
        Ok(())
    }
}
