//! PM4 command-packet encoder.
//!
//! The free functions append one packet into a caller-owned buffer at a
//! caller-supplied offset and return the offset after the packet. Nothing is
//! written unless the whole packet fits. [`CommandStream`] wraps them with
//! its own fixed-capacity buffer.

use crate::config::RegisterMap;
use crate::error::{NaviError, Result};
use navi_chip::pm4::{self, acquire_mem, dispatch_direct, opcode, set_sh_reg, PacketHeader};
use navi_chip::regs::initiator;

fn reserve(buf: &mut [u32], at: usize, words: usize) -> Result<&mut [u32]> {
    let capacity = buf.len();
    let end = at
        .checked_add(words)
        .filter(|&end| end <= capacity)
        .ok_or(NaviError::EncodingOverflow {
            needed: at.saturating_add(words),
            capacity,
        })?;
    Ok(&mut buf[at..end])
}

fn check_packet_len(words: usize) -> Result<()> {
    if words > pm4::MAX_PACKET_WORDS {
        return Err(NaviError::EncodingOverflow {
            needed: words,
            capacity: pm4::MAX_PACKET_WORDS,
        });
    }
    Ok(())
}

/// `NOP` of `words` total words (header plus zero payload).
///
/// `words == 0` emits nothing and returns `at`.
///
/// # Errors
///
/// Returns `EncodingOverflow` if the packet does not fit.
pub fn encode_nop(buf: &mut [u32], at: usize, words: usize) -> Result<usize> {
    if words == 0 {
        return Ok(at);
    }
    check_packet_len(words)?;
    let out = reserve(buf, at, words)?;
    out[0] = pm4::type3_header(opcode::NOP, words);
    out[1..].fill(0);
    Ok(at + words)
}

/// SH register index of a byte offset.
///
/// # Errors
///
/// Returns `InvalidRegister` if `offset` is below `sh_base` or not a
/// multiple of 4.
pub fn register_index(sh_base: usize, offset: usize) -> Result<u32> {
    if offset < sh_base || offset % 4 != 0 {
        return Err(NaviError::InvalidRegister {
            offset,
            base: sh_base,
        });
    }
    u32::try_from((offset - sh_base) >> 2).map_err(|_| NaviError::InvalidRegister {
        offset,
        base: sh_base,
    })
}

/// `SET_SH_REG` writing `values` to consecutive registers from `offset`.
///
/// # Errors
///
/// - `InvalidRegister` for an offset outside the SH register space
/// - `EncodingOverflow` if the packet does not fit
pub fn encode_set_register(
    buf: &mut [u32],
    at: usize,
    sh_base: usize,
    offset: usize,
    values: &[u32],
) -> Result<usize> {
    let index = register_index(sh_base, offset)?;
    let words = set_sh_reg::OVERHEAD_WORDS + values.len();
    check_packet_len(words)?;
    let out = reserve(buf, at, words)?;
    out[0] = pm4::type3_header(opcode::SET_SH_REG, words);
    out[1] = index;
    out[2..].copy_from_slice(values);
    Ok(at + words)
}

/// `DISPATCH_DIRECT` for an `x * y * z` workgroup grid.
///
/// The compute-shader-enable bit is always set in the initiator.
///
/// # Errors
///
/// Returns `EncodingOverflow` if the packet does not fit.
pub fn encode_dispatch_direct(
    buf: &mut [u32],
    at: usize,
    x: u32,
    y: u32,
    z: u32,
    initiator: u32,
) -> Result<usize> {
    let out = reserve(buf, at, dispatch_direct::WORDS)?;
    out.copy_from_slice(&[
        pm4::type3_header(opcode::DISPATCH_DIRECT, dispatch_direct::WORDS),
        x,
        y,
        z,
        initiator | initiator::COMPUTE_SHADER_EN,
    ]);
    Ok(at + dispatch_direct::WORDS)
}

/// `ACQUIRE_MEM` over the whole address space.
///
/// # Errors
///
/// Returns `EncodingOverflow` if the packet does not fit.
pub fn encode_acquire_mem(buf: &mut [u32], at: usize, flags: u32) -> Result<usize> {
    let out = reserve(buf, at, acquire_mem::WORDS)?;
    out.copy_from_slice(&[
        pm4::type3_header(opcode::ACQUIRE_MEM, acquire_mem::WORDS),
        flags,
        acquire_mem::FULL_RANGE,
        0,
        0,
        0,
        acquire_mem::POLL_INTERVAL,
    ]);
    Ok(at + acquire_mem::WORDS)
}

/// Decode a packet header word
#[must_use]
pub const fn decode_header(word: u32) -> PacketHeader {
    PacketHeader::decode(word)
}

/// Fixed-capacity command stream
#[derive(Debug, Clone)]
pub struct CommandStream {
    buf: Vec<u32>,
    len: usize,
    sh_base: usize,
}

impl CommandStream {
    /// Empty stream of `capacity` words
    #[must_use]
    pub fn new(capacity: usize, sh_base: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            len: 0,
            sh_base,
        }
    }

    /// Empty stream using `map`'s register space base
    #[must_use]
    pub fn for_registers(capacity: usize, map: &RegisterMap) -> Self {
        Self::new(capacity, map.sh_base)
    }

    /// Words encoded so far
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if nothing has been encoded
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity in words
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Words still available
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Encoded words
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.buf[..self.len]
    }

    /// Discard everything encoded
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append a `NOP` of `words` words
    ///
    /// # Errors
    ///
    /// Returns `EncodingOverflow` if it does not fit.
    pub fn nop(&mut self, words: usize) -> Result<()> {
        self.len = encode_nop(&mut self.buf, self.len, words)?;
        Ok(())
    }

    /// Append a single-register `SET_SH_REG`
    ///
    /// # Errors
    ///
    /// `InvalidRegister` or `EncodingOverflow`.
    pub fn set_register(&mut self, offset: usize, value: u32) -> Result<()> {
        self.set_registers(offset, &[value])
    }

    /// Append a multi-register `SET_SH_REG`
    ///
    /// # Errors
    ///
    /// `InvalidRegister` or `EncodingOverflow`.
    pub fn set_registers(&mut self, offset: usize, values: &[u32]) -> Result<()> {
        self.len = encode_set_register(&mut self.buf, self.len, self.sh_base, offset, values)?;
        Ok(())
    }

    /// Append a `DISPATCH_DIRECT`
    ///
    /// # Errors
    ///
    /// Returns `EncodingOverflow` if it does not fit.
    pub fn dispatch_direct(&mut self, x: u32, y: u32, z: u32, initiator: u32) -> Result<()> {
        self.len = encode_dispatch_direct(&mut self.buf, self.len, x, y, z, initiator)?;
        Ok(())
    }

    /// Append an `ACQUIRE_MEM`
    ///
    /// # Errors
    ///
    /// Returns `EncodingOverflow` if it does not fit.
    pub fn acquire_mem(&mut self, flags: u32) -> Result<()> {
        self.len = encode_acquire_mem(&mut self.buf, self.len, flags)?;
        Ok(())
    }

    /// Headers of the encoded packets, in order
    #[must_use]
    pub fn headers(&self) -> Vec<PacketHeader> {
        let words = self.words();
        let mut headers = Vec::new();
        let mut at = 0;
        while at < words.len() {
            let header = decode_header(words[at]);
            headers.push(header);
            at += header.count;
        }
        headers
    }
}
