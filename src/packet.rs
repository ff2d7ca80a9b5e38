//! Wire-format constants and an allocation-free byte cursor over the
//! caller's output buffer (spec section 6.2).
//!
//! Grounded on `crates/codec/src/channel_data.rs`'s `encode`/`decode` pair,
//! which walks a cursor over a buffer writing big-endian fields -- adapted
//! from a `BytesMut` (which can grow, i.e. allocate) to a caller-owned
//! `&mut [u8]`, since spec section 5 requires the hot path not to allocate.

use crate::error::{Error, Result};

/// The concrete packet format chosen by the engine for one `compress` call
/// (spec sections 4.1.2 and 6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ir,
    IrDyn,
    Uo0,
    Uo1,
    Uor2,
    /// Uncompressed-profile IR packet (distinct discriminator byte from the
    /// generic-engine IR above).
    UncompressedIr,
    /// Uncompressed-profile Normal packet.
    UncompressedNormal,
}

/// UOR-2 extension selected to carry additional changed bits (spec section
/// 4.1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    None,
    Ext0,
    Ext1,
    Ext2,
    Ext3,
}

pub const ADD_CID_BASE: u8 = 0b1110_0000;
pub const IR_DISCRIMINATOR: u8 = 0b1111_1100;
pub const IR_DYN_DISCRIMINATOR: u8 = 0b1111_1000;
pub const UO0_TOP_BIT: u8 = 0b0000_0000;
pub const UO1_TOP_BITS: u8 = 0b1000_0000;
pub const UOR2_TOP_BITS: u8 = 0b1100_0000;
pub const UNCOMPRESSED_IR_DISCRIMINATOR: u8 = 0xFC;
pub const UNCOMPRESSED_PROFILE_BYTE: u8 = 0x00;

/// A cursor over a caller-owned output buffer. Every `put_*` call checks
/// remaining space up front and returns `Error::BufferTooSmall` rather than
/// panicking or growing the buffer -- per spec section 4.1.5, a failed
/// write must leave the context unmodified, so the engine always completes
/// a full `ByteWriter` pass into a scratch check before committing context
/// state (see `engine::Engine::encode`).
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::BufferTooSmall {
                needed: self.pos + n,
                available: self.buf.len(),
            })
        } else {
            Ok(())
        }
    }

    pub fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.require(1)?;
        self.buf[self.pos] = byte;
        self.pos += 1;
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.require(bytes.len())?;
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub fn put_u16_be(&mut self, value: u16) -> Result<()> {
        self.put_bytes(&value.to_be_bytes())
    }

    pub fn put_u32_be(&mut self, value: u32) -> Result<()> {
        self.put_bytes(&value.to_be_bytes())
    }

    /// Overwrite a single already-written byte (used to patch a CRC field
    /// after the rest of the packet has been emitted).
    pub fn patch_u8(&mut self, offset: usize, byte: u8) {
        self.buf[offset] = byte;
    }

    /// Bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}

/// Emit the Add-CID octet (small-CID mode, CID in 1..=15) or nothing for
/// CID 0 (spec section 6.2: "Add-CID octet (small CID, CID != 0)").
pub fn write_small_cid(writer: &mut ByteWriter<'_>, cid: u16) -> Result<()> {
    if cid == 0 {
        return Ok(());
    }
    writer.put_u8(ADD_CID_BASE | (cid as u8 & 0x0F))
}

/// Emit a large-CID as a self-delimiting variable-length value (RFC 3095
/// section 5.3.2's SDVL: 7 payload bits per byte, MSB set on every byte but
/// the last).
pub fn write_large_cid(writer: &mut ByteWriter<'_>, cid: u16) -> Result<()> {
    if cid < 128 {
        return writer.put_u8(cid as u8);
    }
    let hi = 0x80 | ((cid >> 7) as u8 & 0x7F);
    let lo = (cid & 0x7F) as u8;
    writer.put_u8(hi)?;
    writer.put_u8(lo)
}

/// Number of bytes `write_large_cid` would emit for `cid`.
pub fn large_cid_len(cid: u16) -> usize {
    if cid < 128 {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_cid_zero_is_omitted() {
        let mut buf = [0u8; 4];
        let mut w = ByteWriter::new(&mut buf);
        write_small_cid(&mut w, 0).unwrap();
        assert_eq!(w.position(), 0);
    }

    #[test]
    fn small_cid_nonzero_emits_add_cid_octet() {
        let mut buf = [0u8; 4];
        let mut w = ByteWriter::new(&mut buf);
        write_small_cid(&mut w, 5).unwrap();
        assert_eq!(w.written(), &[0b1110_0101]);
    }

    #[test]
    fn large_cid_round_trips_length() {
        let mut buf = [0u8; 4];
        let mut w = ByteWriter::new(&mut buf);
        write_large_cid(&mut w, 200).unwrap();
        assert_eq!(w.position(), large_cid_len(200));
        assert_eq!(large_cid_len(10), 1);
    }

    #[test]
    fn buffer_too_small_reports_needed_and_available() {
        let mut buf = [0u8; 1];
        let mut w = ByteWriter::new(&mut buf);
        w.put_u8(1).unwrap();
        let err = w.put_u8(2).unwrap_err();
        assert_eq!(
            err,
            Error::BufferTooSmall {
                needed: 2,
                available: 1
            }
        );
    }

    #[test]
    fn exact_fit_succeeds() {
        let mut buf = [0u8; 2];
        let mut w = ByteWriter::new(&mut buf);
        w.put_u16_be(0x1234).unwrap();
        assert_eq!(w.written(), &[0x12, 0x34]);
    }
}
