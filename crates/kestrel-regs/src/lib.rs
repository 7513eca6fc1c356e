//! FPGA motherboard register model for Kestrel SDR devices.
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the motherboard FPGA's register protocol: register offsets,
//! clock-control bit positions, link-type codes, and the bitfield codecs for
//! compatibility versioning, build provenance, and board-variant detection.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Motherboard register map — all offsets and bit definitions |
//! | [`codec`] | Bitfield encode/decode: compat, datestamp, git hash, link types |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod regs;

pub use codec::{
    decode_compat, decode_datestamp, decode_git_hash, decode_link_type, derive_board_variant,
    encode_compat, BoardVariant, BuildTimestamp, LinkType,
};
