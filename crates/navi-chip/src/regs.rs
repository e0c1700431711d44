//! BAR0 register map for GFX10.
//!
//! All offsets are byte offsets into the MMIO register window.
//!
//! ```text
//! 0x2C00         SH register space base (PM4 SET_SH_REG index 0)
//! 0x2E00..0x2F40 Compute dispatch block
//! 0x8010         GRBM_STATUS
//! 0x8014         GRBM_STATUS2
//! 0x8020         GRBM_SOFT_RESET
//! 0xC100 + n*0x100  Command-processor ring n
//! ```

// ── GRBM (graphics register bus manager) ─────────────────────────────────────

/// Primary status register.
pub const GRBM_STATUS: usize = 0x8010;
/// Secondary status register.
pub const GRBM_STATUS2: usize = 0x8014;
/// Soft-reset control register.
pub const GRBM_SOFT_RESET: usize = 0x8020;

/// `GRBM_STATUS` bit definitions.
pub mod status {
    /// Any graphics/compute block active.
    pub const GUI_ACTIVE: u32 = 1 << 31;
    /// Colour backend busy.
    pub const CB_BUSY: u32 = 1 << 30;
    /// Command processor busy.
    pub const CP_BUSY: u32 = 1 << 29;
}

/// `GRBM_STATUS2` bit fields.
pub mod status2 {
    /// Shift of the active compute-unit count.
    pub const CU_ACTIVE_SHIFT: u32 = 8;
    /// Shift of the active wavefront count.
    pub const WAVES_ACTIVE_SHIFT: u32 = 16;
    /// Width mask of both counts.
    pub const COUNT_MASK: u32 = 0xFF;
}

// ── CP ring buffers ──────────────────────────────────────────────────────────

/// Ring register block layout.
pub mod ring {
    /// Block of ring 0.
    pub const BASE: usize = 0xC100;
    /// Distance between consecutive ring blocks.
    pub const STRIDE: usize = 0x100;
    /// Number of ring blocks.
    pub const COUNT: u8 = 8;

    /// Control register; bit 0 enables the ring.
    pub const CNTL: usize = 0x04;
    /// Read pointer in dwords (hardware-owned).
    pub const RPTR: usize = 0x08;
    /// Write pointer in dwords (software-owned).
    pub const WPTR: usize = 0x0C;
    /// Ring size in bytes.
    pub const SIZE: usize = 0x10;
    /// Ring base, 64-bit GPU address.
    pub const BASE_ADDR: usize = 0x18;

    /// `CNTL` enable bit.
    pub const CNTL_ENABLE: u32 = 1 << 0;

    /// Ring 0 carries graphics traffic.
    pub const GFX: u8 = 0;
    /// Ring 1 is the compute ring used for direct dispatch.
    pub const COMPUTE: u8 = 1;

    /// Byte offset of the block for `id`.
    #[must_use]
    pub const fn block(id: u8) -> usize {
        BASE + id as usize * STRIDE
    }
}

// ── Doorbells (BAR5) ─────────────────────────────────────────────────────────

/// Doorbell slot stride per ring, bytes.
pub const DOORBELL_STRIDE: usize = 4;

// ── Compute dispatch block ───────────────────────────────────────────────────

/// Base of the SH register space; PM4 SET_SH_REG indices count dwords from here.
pub const SH_REG_BASE: usize = 0x2C00;

/// Compute dispatch registers.
///
/// Byte offsets: each register sits at `DISPATCH_INITIATOR + 4 * n`, where
/// `n` is its dword position in the GFX10 compute block (PGM_LO 0x0C,
/// PGM_RSRC1 0x12, USER_DATA_0 0x40).
pub mod compute {
    /// Dispatch initiator.
    pub const DISPATCH_INITIATOR: usize = 0x2E00;
    /// Workgroup count X (Y, Z follow).
    pub const DIM_X: usize = 0x2E04;
    /// Start workgroup X (Y, Z follow).
    pub const START_X: usize = 0x2E10;
    /// Threads per group X (Y, Z follow).
    pub const NUM_THREAD_X: usize = 0x2E1C;
    /// Threads per group Y.
    pub const NUM_THREAD_Y: usize = 0x2E20;
    /// Threads per group Z.
    pub const NUM_THREAD_Z: usize = 0x2E24;
    /// Program address bits 8..40.
    pub const PGM_LO: usize = 0x2E30;
    /// Program address bits 40..48.
    pub const PGM_HI: usize = 0x2E34;
    /// Resource descriptor word 1.
    pub const PGM_RSRC1: usize = 0x2E48;
    /// Resource descriptor word 2.
    pub const PGM_RSRC2: usize = 0x2E4C;
    /// Resource limits.
    pub const RESOURCE_LIMITS: usize = 0x2E54;
    /// Scratch ring size.
    pub const TMPRING_SIZE: usize = 0x2E60;
    /// First user-data register; kernel argument pointer goes here.
    pub const USER_DATA_0: usize = 0x2F00;
    /// Number of user-data registers.
    pub const USER_DATA_COUNT: usize = 16;
}

/// `COMPUTE_DISPATCH_INITIATOR` bits.
pub mod initiator {
    /// Compute shader enable; the CP also forces the start at workgroup (0,0,0).
    pub const COMPUTE_SHADER_EN: u32 = 1 << 0;
}
