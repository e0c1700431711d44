//! PM4 command-packet format.
//!
//! The command processor consumes a stream of 32-bit words. Every packet
//! this layer emits is a type-3 packet:
//!
//! ```text
//!  31 30 29              16 15       8 7        0
//! ┌─────┬──────────────────┬──────────┬──────────┐
//! │ 0b11│  count − 1       │  opcode  │ reserved │   header
//! └─────┴──────────────────┴──────────┴──────────┘
//!   payload word 0 … payload word count-2
//! ```
//!
//! `count` is the total number of words including the header.

/// Packet type emitted by this layer.
pub const PACKET_TYPE3: u32 = 3;

/// Shift of the packet type field.
pub const TYPE_SHIFT: u32 = 30;
/// Shift of the `count − 1` field.
pub const COUNT_SHIFT: u32 = 16;
/// Width mask of the `count − 1` field (14 bits).
pub const COUNT_MASK: u32 = 0x3FFF;
/// Shift of the opcode field.
pub const OPCODE_SHIFT: u32 = 8;

/// Largest packet the header can describe, in words.
pub const MAX_PACKET_WORDS: usize = COUNT_MASK as usize + 1;

/// Type-3 opcodes.
pub mod opcode {
    /// No-op; payload is ignored.
    pub const NOP: u8 = 0x10;
    /// Launch a compute grid with explicit workgroup counts.
    pub const DISPATCH_DIRECT: u8 = 0x15;
    /// Cache coherence / memory synchronisation.
    pub const ACQUIRE_MEM: u8 = 0x58;
    /// Write consecutive SH registers.
    pub const SET_SH_REG: u8 = 0x76;
}

/// `ACQUIRE_MEM` packet layout.
pub mod acquire_mem {
    /// Total words: header, flags, size, size-hi, base, base-hi, poll interval.
    pub const WORDS: usize = 7;
    /// Invalidate/flush caches before the next dispatch.
    pub const FLAGS_INVALIDATE: u32 = 0x8000_0000;
    /// Wait for prior work to drain (completion fence).
    pub const FLAGS_WAIT: u32 = 0;
    /// Size field covering the whole address space.
    pub const FULL_RANGE: u32 = 0xFFFF_FFFF;
    /// Poll interval, in command-processor clocks × 16.
    pub const POLL_INTERVAL: u32 = 0x0A;
}

/// `DISPATCH_DIRECT` packet layout.
pub mod dispatch_direct {
    /// Total words: header, x, y, z, initiator.
    pub const WORDS: usize = 5;
}

/// `SET_SH_REG` packet layout.
pub mod set_sh_reg {
    /// Header plus register index word.
    pub const OVERHEAD_WORDS: usize = 2;
}

/// Words of the no-op emitted at the head of a dispatch stream.
pub const ALIGNMENT_NOP_WORDS: usize = 2;

/// Shader programs must start on this byte boundary.
pub const PROGRAM_ALIGN: u64 = 256;
/// Shift applied to a program address for the low register.
pub const PROGRAM_LO_SHIFT: u32 = 8;
/// Shift applied to a program address for the high register.
pub const PROGRAM_HI_SHIFT: u32 = 40;

/// Build a type-3 header for a packet of `count` words (header included).
///
/// `count` must be in `1..=MAX_PACKET_WORDS`; callers validate before encoding.
#[must_use]
pub const fn type3_header(opcode: u8, count: usize) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    let field = (count as u32).wrapping_sub(1) & COUNT_MASK;
    (PACKET_TYPE3 << TYPE_SHIFT) | (field << COUNT_SHIFT) | ((opcode as u32) << OPCODE_SHIFT)
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type (3 for everything this layer emits).
    pub packet_type: u8,
    /// Total words including the header.
    pub count: usize,
    /// Opcode.
    pub opcode: u8,
}

impl PacketHeader {
    /// Decode a header word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn decode(word: u32) -> Self {
        Self {
            packet_type: (word >> TYPE_SHIFT) as u8,
            count: ((word >> COUNT_SHIFT) & COUNT_MASK) as usize + 1,
            opcode: (word >> OPCODE_SHIFT) as u8,
        }
    }
}
