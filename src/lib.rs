//! ## ROHC compressor core
//!
//! A pure-Rust implementation of the compressor half of RFC 3095's Robust
//! Header Compression: the per-flow IR/FO/SO state machine, W-LSB windowed
//! encoding, the CRC-3/7/8 engine, and three profiles (Uncompressed,
//! IP-only, UDP). Decompression, ROHCv2, and the link-layer segmentation
//! feature are out of scope -- this crate only ever emits compressed
//! packets and ingests feedback about them.
//!
//! ### Packet flow
//!
//! ```text
//! classify()  ->  find/create Context  ->  profile-specific encode()  ->  bytes
//!    (header.rs)     (context.rs)          (engine.rs / profile/*)
//! ```
//!
//! A [`Compressor`] owns one [`context::ContextTable`] and a set of
//! activated profiles; [`Compressor::compress`] is the entry point callers
//! drive per outgoing packet, and [`Compressor::deliver_feedback`] is how a
//! decompressor's FEEDBACK channel flows back in.

pub mod compressor;
pub mod config;
pub mod context;
pub mod crc;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod header;
pub mod packet;
pub mod profile;
pub mod wlsb;

pub use compressor::{Compressor, LastPacketInfo, RandomCb};
pub use config::CompressorConfig;
pub use context::{CidMode, Mode, ProfileId, State};
pub use error::{Error, Result};
