//! Uncompressed profile (spec section 4.4): a degenerate two-state machine
//! (IR / Normal, no SO) that passes the original packet through almost
//! unchanged. Does not implement the `Profile` trait above -- it tracks no
//! W-LSB windows and has no dynamic chain, so forcing it through the
//! generic-engine interface would mean stubbing most of that trait.

use crate::context::{CidMode, UncompressedState};
use crate::crc::{CrcKind, CrcTables};
use crate::error::{Error, Result};
use crate::packet::{
    write_large_cid, write_small_cid, ByteWriter, PacketType, UNCOMPRESSED_IR_DISCRIMINATOR,
    UNCOMPRESSED_PROFILE_BYTE,
};

/// Spec section 4.4: "Transitions: IR -> FO after MAX_IR_COUNT sends" (FO
/// here is this profile's "Normal" packet state).
pub const MAX_IR_COUNT: u32 = 3;

fn write_cid(writer: &mut ByteWriter<'_>, cid: u16, cid_mode: CidMode) -> Result<()> {
    match cid_mode {
        CidMode::Small => write_small_cid(writer, cid),
        CidMode::Large => write_large_cid(writer, cid),
    }
}

/// Force the next call back to IR, e.g. on a STATIC-NACK feedback (spec
/// section 4.7).
pub fn force_ir(state: &mut UncompressedState) {
    state.go_back_ir_count = state.go_back_ir_count.saturating_add(1);
    state.ir_count = 0;
}

/// Encode one packet under the Uncompressed profile. `ip_bytes` is the
/// entire original packet (headers + payload); the returned
/// `payload_offset` tells the caller where in `ip_bytes` the bytes not
/// written to `writer` begin (spec: "Payload = entire original IP packet,
/// copied by caller").
pub fn encode(
    state: &mut UncompressedState,
    cid: u16,
    cid_mode: CidMode,
    ir_timeout: u32,
    ip_bytes: &[u8],
    crc_tables: &CrcTables,
    writer: &mut ByteWriter<'_>,
) -> Result<(PacketType, usize)> {
    if ip_bytes.is_empty() {
        return Err(Error::Unsupported);
    }

    let periodic_refresh =
        ir_timeout > 0 && state.normal_count > 0 && state.normal_count % ir_timeout == 0;
    let send_ir = state.ir_count < MAX_IR_COUNT || periodic_refresh;

    if send_ir {
        write_cid(writer, cid, cid_mode)?;
        writer.put_u8(UNCOMPRESSED_IR_DISCRIMINATOR)?;
        writer.put_u8(UNCOMPRESSED_PROFILE_BYTE)?;
        let crc_offset = writer.position();
        writer.put_u8(0)?;
        let crc = crc_tables.compute(CrcKind::Crc8, writer.written());
        writer.patch_u8(crc_offset, crc);

        state.ir_count = state.ir_count.saturating_add(1);
        state.normal_count = 0;
        Ok((PacketType::UncompressedIr, 0))
    } else {
        write_cid(writer, cid, cid_mode)?;
        writer.put_u8(ip_bytes[0])?;

        state.normal_count = state.normal_count.saturating_add(1);
        Ok((PacketType::UncompressedNormal, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_packets_are_ir() {
        let mut state = UncompressedState::default();
        let mut buf = [0u8; 16];
        let mut w = ByteWriter::new(&mut buf);
        let crc = CrcTables::new();
        let (ty, offset) = encode(&mut state, 0, CidMode::Small, 0, &[0xAA, 0xBB], &crc, &mut w).unwrap();
        assert_eq!(ty, PacketType::UncompressedIr);
        assert_eq!(offset, 0);
    }

    #[test]
    fn fourth_packet_is_normal() {
        let mut state = UncompressedState::default();
        let crc = CrcTables::new();
        for _ in 0..MAX_IR_COUNT {
            let mut buf = [0u8; 16];
            let mut w = ByteWriter::new(&mut buf);
            encode(&mut state, 0, CidMode::Small, 0, &[0xAA, 0xBB], &crc, &mut w).unwrap();
        }
        let mut buf = [0u8; 16];
        let mut w = ByteWriter::new(&mut buf);
        let (ty, offset) = encode(&mut state, 0, CidMode::Small, 0, &[0xCC, 0xDD], &crc, &mut w).unwrap();
        assert_eq!(ty, PacketType::UncompressedNormal);
        assert_eq!(offset, 1);
        assert_eq!(w.written(), &[0xCC]);
    }

    #[test]
    fn periodic_refresh_forces_ir() {
        let mut state = UncompressedState::default();
        let crc = CrcTables::new();
        for _ in 0..MAX_IR_COUNT {
            let mut buf = [0u8; 16];
            let mut w = ByteWriter::new(&mut buf);
            encode(&mut state, 0, CidMode::Small, 2, &[0xAA], &crc, &mut w).unwrap();
        }
        // normal_count is now 0; two normal packets bring it to 2, hitting
        // the ir_timeout=2 refresh on the third call.
        let mut last = PacketType::UncompressedNormal;
        for _ in 0..3 {
            let mut buf = [0u8; 16];
            let mut w = ByteWriter::new(&mut buf);
            let (ty, _) = encode(&mut state, 0, CidMode::Small, 2, &[0xAA], &crc, &mut w).unwrap();
            last = ty;
        }
        assert_eq!(last, PacketType::UncompressedIr);
    }
}
