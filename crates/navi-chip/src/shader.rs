//! Compute program resource descriptors (`COMPUTE_PGM_RSRC1/2`).
//!
//! ```text
//! RSRC1
//!   [5:0]   VGPR blocks         [9:6]   SGPR blocks
//!   [11:10] priority            [19:12] float mode
//!   [27:20] mode flags          [29]    WGP mode
//!
//! RSRC2
//!   [0]     scratch enable      [5:1]   user SGPR count
//!   [10]    TGID X enable       [11]    TGID Y enable
//!   [12]    TGID Z enable       [23:15] LDS size
//! ```

/// `COMPUTE_PGM_RSRC1` fields.
pub mod rsrc1 {
    /// VGPR block count shift.
    pub const VGPRS_SHIFT: u32 = 0;
    /// VGPR block count mask.
    pub const VGPRS_MASK: u32 = 0x3F;
    /// SGPR block count shift.
    pub const SGPRS_SHIFT: u32 = 6;
    /// SGPR block count mask.
    pub const SGPRS_MASK: u32 = 0xF;
    /// Wave priority shift.
    pub const PRIORITY_SHIFT: u32 = 10;
    /// Wave priority mask.
    pub const PRIORITY_MASK: u32 = 0x3;
    /// Float denorm/round mode shift.
    pub const FLOAT_MODE_SHIFT: u32 = 12;
    /// Float mode mask.
    pub const FLOAT_MODE_MASK: u32 = 0xFF;
    /// Mode flag byte shift.
    pub const MODE_SHIFT: u32 = 20;
    /// Mode flag byte mask.
    pub const MODE_MASK: u32 = 0xFF;
    /// Workgroup-processor mode bit.
    pub const WGP_MODE: u32 = 1 << 29;

    /// Default VGPR blocks.
    pub const DEFAULT_VGPRS: u8 = 8;
    /// Default SGPR blocks.
    pub const DEFAULT_SGPRS: u8 = 8;
    /// Default mode flag byte.
    pub const DEFAULT_MODE: u8 = 0xC0;
}

/// `COMPUTE_PGM_RSRC2` fields.
pub mod rsrc2 {
    /// Scratch (private memory) enable.
    pub const SCRATCH_EN: u32 = 1 << 0;
    /// User SGPR count shift.
    pub const USER_SGPR_SHIFT: u32 = 1;
    /// User SGPR count mask.
    pub const USER_SGPR_MASK: u32 = 0x1F;
    /// Workgroup id X in an SGPR.
    pub const TGID_X_EN: u32 = 1 << 10;
    /// Workgroup id Y in an SGPR.
    pub const TGID_Y_EN: u32 = 1 << 11;
    /// Workgroup id Z in an SGPR.
    pub const TGID_Z_EN: u32 = 1 << 12;
    /// LDS allocation shift (granularity blocks).
    pub const LDS_SIZE_SHIFT: u32 = 15;
    /// LDS allocation mask.
    pub const LDS_SIZE_MASK: u32 = 0x1FF;

    /// Default user SGPR count.
    pub const DEFAULT_USER_SGPRS: u8 = 8;
}

/// Default RSRC1 word.
pub const DEFAULT_RSRC1: u32 = (rsrc1::DEFAULT_VGPRS as u32) << rsrc1::VGPRS_SHIFT
    | (rsrc1::DEFAULT_SGPRS as u32) << rsrc1::SGPRS_SHIFT
    | (rsrc1::DEFAULT_MODE as u32) << rsrc1::MODE_SHIFT
    | rsrc1::WGP_MODE;

/// Default RSRC2 word.
pub const DEFAULT_RSRC2: u32 = (rsrc2::DEFAULT_USER_SGPRS as u32) << rsrc2::USER_SGPR_SHIFT
    | rsrc2::TGID_X_EN
    | rsrc2::TGID_Y_EN
    | rsrc2::TGID_Z_EN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_known_words() {
        assert_eq!(DEFAULT_RSRC1, 8 | 8 << 6 | 0xC0 << 20 | 1 << 29);
        assert_eq!(DEFAULT_RSRC2, 8 << 1 | 1 << 10 | 1 << 11 | 1 << 12);
    }
}
