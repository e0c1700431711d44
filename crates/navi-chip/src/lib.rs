//! Silicon model for AMD Navi (GFX10) discrete GPUs.
//!
//! This crate has **no dependencies** and **no hardware access**; it is a
//! pure model of the silicon as seen from the host: PCI identifiers, BAR
//! layout, the MMIO register map, the PM4 command-packet format and the
//! compute shader resource-descriptor bit fields.
//!
//! Everything here applies to one register map (GFX10.1, Navi10/Navi14 and
//! the Navi2x parts that share its command-processor layout). Targeting a
//! different family means substituting these tables, not the protocol.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | Vendor/device IDs, class codes, config-space offsets, per-device table |
//! | [`bar`] | BAR layout (BAR0 16 MB registers, BAR2 256 MB VRAM aperture, BAR5 doorbells) |
//! | [`regs`] | MMIO register map: status, reset, ring blocks, compute block |
//! | [`pm4`] | PM4 type-3 packet header, opcodes, packet sizes and flag words |
//! | [`shader`] | `COMPUTE_PGM_RSRC1` / `COMPUTE_PGM_RSRC2` field layout |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bar;
pub mod pcie;
pub mod pm4;
pub mod regs;
pub mod shader;
