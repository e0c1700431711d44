//! Compute dispatch orchestration.
//!
//! A launch becomes one command stream:
//!
//! ```text
//! NOP (2)                              alignment
//! SET_SH_REG PGM_LO, PGM_HI            program address >> 8, >> 40
//! SET_SH_REG PGM_RSRC1, PGM_RSRC2      resource descriptor
//! SET_SH_REG NUM_THREAD_X/Y/Z          workgroup shape
//! SET_SH_REG USER_DATA_0/1             argument pointer (only if present)
//! ACQUIRE_MEM 0x8000_0000              invalidate caches
//! DISPATCH_DIRECT x, y, z, initiator   launch
//! ACQUIRE_MEM 0                        completion fence
//! ```
//!
//! The stream is fully encoded before anything reaches the ring, so an
//! encoding error leaves the ring untouched.

use crate::config::{DriverConfig, RegisterMap};
use crate::error::{NaviError, Result};
use crate::packet::CommandStream;
use navi_chip::pm4::{self, acquire_mem};
use navi_chip::shader::{rsrc1, rsrc2};

/// Destination for encoded command streams
pub trait CommandSink {
    /// Copy words into a ring; returns the new write pointer.
    ///
    /// # Errors
    ///
    /// Returns error if the ring cannot take the words.
    fn submit(&mut self, ring: u8, words: &[u32]) -> Result<u32>;

    /// Publish a write pointer to the hardware.
    ///
    /// # Errors
    ///
    /// Returns error if the ring id is invalid.
    fn doorbell(&mut self, ring: u8, write_ptr: u32) -> Result<()>;
}

impl<S: CommandSink + ?Sized> CommandSink for &mut S {
    fn submit(&mut self, ring: u8, words: &[u32]) -> Result<u32> {
        (**self).submit(ring, words)
    }

    fn doorbell(&mut self, ring: u8, write_ptr: u32) -> Result<()> {
        (**self).doorbell(ring, write_ptr)
    }
}

/// Shader resource descriptor (`COMPUTE_PGM_RSRC1/2` fields)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// VGPR allocation in blocks
    pub vgpr_blocks: u8,
    /// SGPR allocation in blocks
    pub sgpr_blocks: u8,
    /// Wave priority (0..=3)
    pub priority: u8,
    /// Float denorm/round mode
    pub float_mode: u8,
    /// Mode flag byte (IEEE, DX10 clamp, ...)
    pub mode: u8,
    /// Run in workgroup-processor mode
    pub wgp_mode: bool,
    /// Enable scratch memory
    pub scratch: bool,
    /// User SGPRs preloaded from USER_DATA
    pub user_sgprs: u8,
    /// Workgroup id X/Y/Z delivered in SGPRs
    pub tgid: [bool; 3],
    /// LDS allocation in blocks
    pub lds_blocks: u16,
}

impl Default for ResourceDescriptor {
    fn default() -> Self {
        Self {
            vgpr_blocks: rsrc1::DEFAULT_VGPRS,
            sgpr_blocks: rsrc1::DEFAULT_SGPRS,
            priority: 0,
            float_mode: 0,
            mode: rsrc1::DEFAULT_MODE,
            wgp_mode: true,
            scratch: false,
            user_sgprs: rsrc2::DEFAULT_USER_SGPRS,
            tgid: [true; 3],
            lds_blocks: 0,
        }
    }
}

impl ResourceDescriptor {
    /// `COMPUTE_PGM_RSRC1` word
    #[must_use]
    pub fn rsrc1(&self) -> u32 {
        let mut word = (u32::from(self.vgpr_blocks) & rsrc1::VGPRS_MASK) << rsrc1::VGPRS_SHIFT
            | (u32::from(self.sgpr_blocks) & rsrc1::SGPRS_MASK) << rsrc1::SGPRS_SHIFT
            | (u32::from(self.priority) & rsrc1::PRIORITY_MASK) << rsrc1::PRIORITY_SHIFT
            | (u32::from(self.float_mode) & rsrc1::FLOAT_MODE_MASK) << rsrc1::FLOAT_MODE_SHIFT
            | (u32::from(self.mode) & rsrc1::MODE_MASK) << rsrc1::MODE_SHIFT;
        if self.wgp_mode {
            word |= rsrc1::WGP_MODE;
        }
        word
    }

    /// `COMPUTE_PGM_RSRC2` word
    #[must_use]
    pub fn rsrc2(&self) -> u32 {
        let mut word = (u32::from(self.user_sgprs) & rsrc2::USER_SGPR_MASK) << rsrc2::USER_SGPR_SHIFT
            | (u32::from(self.lds_blocks) & rsrc2::LDS_SIZE_MASK) << rsrc2::LDS_SIZE_SHIFT;
        if self.scratch {
            word |= rsrc2::SCRATCH_EN;
        }
        for (enabled, bit) in self
            .tgid
            .iter()
            .zip([rsrc2::TGID_X_EN, rsrc2::TGID_Y_EN, rsrc2::TGID_Z_EN])
        {
            if *enabled {
                word |= bit;
            }
        }
        word
    }
}

/// One compute launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDescriptor {
    /// GPU address of the shader program (256-byte aligned)
    pub program_address: u64,
    /// Resource descriptor
    pub resources: ResourceDescriptor,
    /// Threads per workgroup (x, y, z)
    pub threads: [u32; 3],
    /// Workgroup grid (x, y, z)
    pub workgroups: [u32; 3],
    /// GPU address of the kernel arguments
    pub args: Option<u64>,
}

impl LaunchDescriptor {
    /// Launch with default resources and no arguments
    #[must_use]
    pub fn new(program_address: u64, workgroups: [u32; 3], threads: [u32; 3]) -> Self {
        Self {
            program_address,
            resources: ResourceDescriptor::default(),
            threads,
            workgroups,
            args: None,
        }
    }

    /// Attach an argument pointer
    #[must_use]
    pub const fn with_args(mut self, args: u64) -> Self {
        self.args = Some(args);
        self
    }

    /// Replace the resource descriptor
    #[must_use]
    pub const fn with_resources(mut self, resources: ResourceDescriptor) -> Self {
        self.resources = resources;
        self
    }

    /// Check the launch before encoding.
    ///
    /// The hardware does not validate the program address; a misaligned one
    /// executes from the truncated address.
    ///
    /// # Errors
    ///
    /// - `AlignmentViolation` if the program address is not 256-byte aligned
    /// - `InvalidLaunch` if any thread or workgroup dimension is zero
    pub fn validate(&self) -> Result<()> {
        if !navi_chip::bar::is_aligned(self.program_address, pm4::PROGRAM_ALIGN) {
            return Err(NaviError::misaligned(
                "program",
                self.program_address,
                pm4::PROGRAM_ALIGN,
            ));
        }
        if self.threads.contains(&0) {
            return Err(NaviError::invalid_launch(format!(
                "zero thread dimension {:?}",
                self.threads
            )));
        }
        if self.workgroups.contains(&0) {
            return Err(NaviError::invalid_launch(format!(
                "zero workgroup dimension {:?}",
                self.workgroups
            )));
        }
        Ok(())
    }

    /// Total threads in the grid
    #[must_use]
    pub fn total_threads(&self) -> u64 {
        self.threads
            .iter()
            .chain(&self.workgroups)
            .map(|&n| u64::from(n))
            .product()
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn split_address(address: u64) -> [u32; 2] {
    [address as u32, (address >> 32) as u32]
}

/// Outcome of a successful submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Ring the stream went to
    pub ring: u8,
    /// Words submitted
    pub words: usize,
    /// Write pointer published by the doorbell
    pub write_ptr: u32,
}

/// Encodes launches and hands them to a [`CommandSink`]
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ring: u8,
    capacity: usize,
    map: RegisterMap,
}

impl Dispatcher {
    /// Dispatcher for `ring` with `capacity`-word streams
    #[must_use]
    pub const fn new(ring: u8, capacity: usize, map: RegisterMap) -> Self {
        Self { ring, capacity, map }
    }

    /// Dispatcher using the configured compute ring and stream capacity
    #[must_use]
    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(
            config.compute_ring,
            config.max_stream_words,
            config.registers.clone(),
        )
    }

    /// Target ring
    #[must_use]
    pub const fn ring(&self) -> u8 {
        self.ring
    }

    /// Stream capacity in words
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Empty stream sized for this dispatcher
    #[must_use]
    pub fn stream(&self) -> CommandStream {
        CommandStream::for_registers(self.capacity, &self.map)
    }

    /// Append the packets for `launch` to `stream`
    ///
    /// # Errors
    ///
    /// Validation errors, `InvalidRegister` or `EncodingOverflow`.
    pub fn encode_into(&self, stream: &mut CommandStream, launch: &LaunchDescriptor) -> Result<()> {
        launch.validate()?;
        let compute = &self.map.compute;

        #[allow(clippy::cast_possible_truncation)]
        let program = [
            (launch.program_address >> pm4::PROGRAM_LO_SHIFT) as u32,
            (launch.program_address >> pm4::PROGRAM_HI_SHIFT) as u32,
        ];

        stream.nop(pm4::ALIGNMENT_NOP_WORDS)?;
        stream.set_registers(compute.pgm_lo, &program)?;
        stream.set_registers(
            compute.pgm_rsrc1,
            &[launch.resources.rsrc1(), launch.resources.rsrc2()],
        )?;
        stream.set_registers(compute.num_thread_x, &launch.threads)?;
        if let Some(args) = launch.args {
            stream.set_registers(compute.user_data_0, &split_address(args))?;
        }
        stream.acquire_mem(acquire_mem::FLAGS_INVALIDATE)?;
        let [x, y, z] = launch.workgroups;
        stream.dispatch_direct(x, y, z, 0)?;
        stream.acquire_mem(acquire_mem::FLAGS_WAIT)?;
        Ok(())
    }

    /// Encode `launch` into a fresh stream
    ///
    /// # Errors
    ///
    /// As [`encode_into`](Self::encode_into).
    pub fn encode(&self, launch: &LaunchDescriptor) -> Result<CommandStream> {
        let mut stream = self.stream();
        self.encode_into(&mut stream, launch)?;
        Ok(stream)
    }

    /// Encode with `encode`, then submit and ring the doorbell.
    ///
    /// The sink is not touched unless encoding succeeds.
    ///
    /// # Errors
    ///
    /// Whatever `encode` returns, or the sink's submit/doorbell error.
    pub fn submit_with<S, F>(&self, sink: &mut S, encode: F) -> Result<DispatchReceipt>
    where
        S: CommandSink + ?Sized,
        F: FnOnce(&mut CommandStream) -> Result<()>,
    {
        let mut stream = self.stream();
        encode(&mut stream)?;

        let write_ptr = sink.submit(self.ring, stream.words())?;
        sink.doorbell(self.ring, write_ptr)?;

        tracing::debug!(
            "Submitted {} words to ring {}, wptr {write_ptr:#x}",
            stream.len(),
            self.ring
        );
        Ok(DispatchReceipt {
            ring: self.ring,
            words: stream.len(),
            write_ptr,
        })
    }

    /// Validate, encode and submit one launch
    ///
    /// # Errors
    ///
    /// Validation, encoding or ring errors; nothing is submitted on an
    /// encoding error.
    pub fn launch<S: CommandSink + ?Sized>(
        &self,
        sink: &mut S,
        launch: &LaunchDescriptor,
    ) -> Result<DispatchReceipt> {
        let receipt = self.submit_with(sink, |stream| self.encode_into(stream, launch))?;
        tracing::info!(
            "Launched {:?} x {:?} from {:#x} on ring {}",
            launch.workgroups,
            launch.threads,
            launch.program_address,
            receipt.ring
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navi_chip::pm4::opcode;
    use navi_chip::regs::compute;
    use navi_chip::shader::{DEFAULT_RSRC1, DEFAULT_RSRC2};

    #[derive(Debug, Default)]
    struct SpySink {
        submits: Vec<(u8, Vec<u32>)>,
        doorbells: Vec<(u8, u32)>,
    }

    impl CommandSink for SpySink {
        fn submit(&mut self, ring: u8, words: &[u32]) -> Result<u32> {
            self.submits.push((ring, words.to_vec()));
            Ok(u32::try_from(words.len()).unwrap())
        }

        fn doorbell(&mut self, ring: u8, write_ptr: u32) -> Result<()> {
            self.doorbells.push((ring, write_ptr));
            Ok(())
        }
    }

    fn launch() -> LaunchDescriptor {
        LaunchDescriptor::new(0x0010_0000, [4, 1, 1], [64, 1, 1])
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::from_config(&DriverConfig::default())
    }

    #[test]
    fn default_resources_match_known_words() {
        let resources = ResourceDescriptor::default();
        assert_eq!(resources.rsrc1(), DEFAULT_RSRC1);
        assert_eq!(resources.rsrc2(), DEFAULT_RSRC2);

        let custom = ResourceDescriptor {
            scratch: true,
            tgid: [true, false, false],
            lds_blocks: 2,
            ..ResourceDescriptor::default()
        };
        assert_eq!(custom.rsrc2(), 1 | 8 << 1 | 1 << 10 | 2 << 15);
    }

    #[test]
    fn argument_step_is_four_words() {
        let d = dispatcher();
        let without = d.encode(&launch()).unwrap();
        let with = d.encode(&launch().with_args(0x2000)).unwrap();
        assert_eq!(without.len(), 34);
        assert_eq!(with.len(), 38);
        assert_eq!(with.len() - without.len(), 4);
    }

    #[test]
    fn stream_sequence() {
        let stream = dispatcher()
            .encode(&launch().with_args(0x1_2345_6700))
            .unwrap();
        let opcodes: Vec<u8> = stream.headers().iter().map(|h| h.opcode).collect();
        assert_eq!(
            opcodes,
            [
                opcode::NOP,
                opcode::SET_SH_REG,
                opcode::SET_SH_REG,
                opcode::SET_SH_REG,
                opcode::SET_SH_REG,
                opcode::ACQUIRE_MEM,
                opcode::DISPATCH_DIRECT,
                opcode::ACQUIRE_MEM,
            ]
        );

        let w = stream.words();
        // Program address lo/hi
        assert_eq!(w[3], 0x8C);
        assert_eq!(w[4..6], [0x1000, 0]);
        // Threads
        assert_eq!(w[12..15], [64, 1, 1]);
        // Args lo/hi to USER_DATA_0
        assert_eq!(w[16], ((compute::USER_DATA_0 - 0x2C00) >> 2) as u32);
        assert_eq!(w[17..19], [0x2345_6700, 1]);
        // Pre-dispatch invalidate, dispatch, post-dispatch fence
        assert_eq!(w[20], acquire_mem::FLAGS_INVALIDATE);
        assert_eq!(w[27..31], [4, 1, 1, 1]);
        assert_eq!(w[32], acquire_mem::FLAGS_WAIT);
    }

    #[test]
    fn set_register_indices() {
        let stream = dispatcher().encode(&launch().with_args(0x8000)).unwrap();
        let w = stream.words();
        // Index words of the four SET_SH_REG packets, counted from 0x2C00
        assert_eq!([w[3], w[7], w[11], w[16]], [0x8C, 0x92, 0x87, 0xC0]);
        // Same spacing as the hardware compute block: initiator + 0x0C/0x12/0x07/0x40
        let initiator = ((compute::DISPATCH_INITIATOR - 0x2C00) >> 2) as u32;
        assert_eq!(
            [w[3], w[7], w[11], w[16]].map(|i| i - initiator),
            [0x0C, 0x12, 0x07, 0x40]
        );
    }

    #[test]
    fn program_address_must_be_aligned() {
        let mut spy = SpySink::default();
        let bad = LaunchDescriptor::new(0x0010_0080, [1, 1, 1], [1, 1, 1]);
        let err = dispatcher().launch(&mut spy, &bad).unwrap_err();
        assert!(matches!(err, NaviError::AlignmentViolation { alignment: 256, .. }));
        assert!(spy.submits.is_empty());
    }

    #[test]
    fn zero_dimensions_rejected() {
        let zero_threads = LaunchDescriptor::new(0x100, [1, 1, 1], [0, 1, 1]);
        let zero_groups = LaunchDescriptor::new(0x100, [1, 0, 1], [1, 1, 1]);
        assert!(matches!(zero_threads.validate(), Err(NaviError::InvalidLaunch { .. })));
        assert!(matches!(zero_groups.validate(), Err(NaviError::InvalidLaunch { .. })));
    }

    #[test]
    fn launch_submits_then_rings() {
        let mut spy = SpySink::default();
        let receipt = dispatcher().launch(&mut spy, &launch()).unwrap();
        assert_eq!(
            receipt,
            DispatchReceipt {
                ring: 1,
                words: 34,
                write_ptr: 34
            }
        );
        assert_eq!(spy.submits.len(), 1);
        assert_eq!(spy.submits[0].0, 1);
        assert_eq!(spy.doorbells, vec![(1, 34)]);
    }

    #[test]
    fn inflated_register_set_never_reaches_sink() {
        let mut spy = SpySink::default();
        let err = dispatcher()
            .submit_with(&mut spy, |s| s.set_registers(compute::USER_DATA_0, &[0; 300]))
            .unwrap_err();
        assert!(matches!(err, NaviError::EncodingOverflow { needed: 302, capacity: 256 }));
        assert!(spy.submits.is_empty());
        assert!(spy.doorbells.is_empty());
    }

    #[test]
    fn small_stream_overflows_before_submit() {
        let mut spy = SpySink::default();
        let d = Dispatcher::new(1, 30, RegisterMap::gfx10());
        let err = d.launch(&mut spy, &launch()).unwrap_err();
        assert!(matches!(err, NaviError::EncodingOverflow { capacity: 30, .. }));
        assert!(spy.submits.is_empty());
    }

    #[test]
    fn total_threads() {
        assert_eq!(launch().total_threads(), 256);
    }
}
