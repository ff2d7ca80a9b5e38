//! Feedback channel parsing (spec sections 4.7 and 6.3).
//!
//! Grounded on `stun::message`'s offset-walking attribute decode loop,
//! adapted from STUN's 20-byte-header-then-TLV-attributes shape to RFC
//! 3095's `1111 0 code` packet header followed by a FEEDBACK-2 payload and
//! its own TLV options.

use num_enum::TryFromPrimitive;

use crate::crc::{CrcKind, CrcTables};
use crate::error::{Error, Result};

pub const FEEDBACK_DISCRIMINATOR_MASK: u8 = 0b1111_1000;
pub const FEEDBACK_DISCRIMINATOR: u8 = 0b1111_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AckType {
    Ack = 0b00,
    Nack = 0b01,
    StaticNack = 0b10,
    Reserved = 0b11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FeedbackMode {
    Reserved = 0b00,
    UMode = 0b01,
    OMode = 0b10,
    RMode = 0b11,
}

/// Outcome of checking a FEEDBACK-2 packet's optional CRC-8 option (spec
/// section 4.7). Distinct from a plain `bool` so a caller can tell "no CRC
/// option was present" (mode change not honored, but the packet otherwise
/// processed) apart from "a CRC option was present and didn't match" (the
/// whole packet must be discarded silently, not just the mode field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    NotPresent,
    Valid,
    Invalid,
}

impl CrcStatus {
    pub fn is_invalid(self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// One parsed FEEDBACK-2 packet (spec section 6.3).
#[derive(Debug, Clone)]
pub struct Feedback2 {
    pub ack_type: AckType,
    pub mode: FeedbackMode,
    pub sn: u16,
    pub crc_status: CrcStatus,
    pub loss: Option<u8>,
}

/// Parse a FEEDBACK-1 packet: just the acknowledged SN (spec section 4.7:
/// "opportunity to purge W-LSB windows up to the acknowledged SN").
pub fn parse_feedback1(payload: &[u8]) -> Result<u16> {
    if payload.len() < 2 {
        return Err(Error::InvalidFeedback);
    }
    Ok(u16::from_be_bytes([payload[0], payload[1]]))
}

/// Parse a FEEDBACK-2 packet per spec section 6.3: `AT:2 Mode:2 SN-MSB:4`
/// followed by `SN-LSB:8`, then options TLVs (`Type:4 Len:4` + value).
///
/// A CRC option (opt 1) is validated against CRC-8 over the whole payload
/// with that byte zeroed; other options are walked for their declared
/// length and otherwise ignored (unknown options are logged and dropped
/// per spec section 4.7, not treated as malformed).
pub fn parse_feedback2(payload: &[u8], crc_tables: &CrcTables) -> Result<Feedback2> {
    if payload.len() < 2 {
        return Err(Error::InvalidFeedback);
    }

    let header = payload[0];
    let ack_type = AckType::try_from_primitive((header >> 6) & 0b11).unwrap_or(AckType::Reserved);
    let mode = FeedbackMode::try_from_primitive((header >> 4) & 0b11).unwrap_or(FeedbackMode::Reserved);
    let sn_msb = (header & 0x0F) as u16;
    let sn_lsb = payload[1] as u16;
    let sn = (sn_msb << 8) | sn_lsb;

    let mut crc_status = CrcStatus::NotPresent;
    let mut loss = None;
    let mut offset = 2usize;
    let mut crc_offset = None;

    while offset < payload.len() {
        let opt_byte = payload[offset];
        let opt_type = opt_byte >> 4;
        let opt_len = (opt_byte & 0x0F) as usize;
        let value_start = offset + 1;
        let value_end = value_start + opt_len;
        if value_end > payload.len() {
            return Err(Error::InvalidFeedback);
        }
        let value = &payload[value_start..value_end];

        match opt_type {
            1 if opt_len == 1 => crc_offset = Some(value_start),
            2 => log::debug!("feedback option 2 (Reject) present, handled per RFC"),
            3 => log::debug!("feedback option 3 (SN-Not-Valid) present, handled per RFC"),
            4 => log::debug!("feedback option 4 (SN) present, handled per RFC"),
            7 if opt_len == 1 => loss = Some(value[0]),
            _ => log::debug!("unknown feedback option type={opt_type} len={opt_len}, ignored"),
        }

        offset = value_end;
    }

    if let Some(crc_off) = crc_offset {
        let mut scratch = [0u8; 64];
        if payload.len() > scratch.len() {
            log::debug!("feedback payload too large to CRC-check, dropping");
            return Err(Error::InvalidFeedback);
        }
        scratch[..payload.len()].copy_from_slice(payload);
        let claimed = scratch[crc_off];
        scratch[crc_off] = 0;
        let computed = crc_tables.compute(CrcKind::Crc8, &scratch[..payload.len()]);
        crc_status = if claimed == computed {
            CrcStatus::Valid
        } else {
            log::debug!("feedback CRC mismatch, discarding feedback silently");
            CrcStatus::Invalid
        };
    }

    if ack_type == AckType::Reserved {
        log::warn!("RESERVED feedback ack-type received, dropping");
    }

    Ok(Feedback2 {
        ack_type,
        mode,
        sn,
        crc_status,
        loss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_feedback2(ack_type: u8, mode: u8, sn: u16, with_crc: bool, crc_tables: &CrcTables) -> Vec<u8> {
        let header = (ack_type << 6) | (mode << 4) | ((sn >> 8) as u8 & 0x0F);
        let mut out = vec![header, (sn & 0xFF) as u8];
        if with_crc {
            out.push(0x11); // option header: type=1 (CRC), len=1
            out.push(0); // placeholder CRC byte, patched below
            let crc_off = out.len() - 1;
            let computed = crc_tables.compute(CrcKind::Crc8, &out);
            out[crc_off] = computed;
        }
        out
    }

    #[test]
    fn parses_ack_type_and_sn() {
        let crc = CrcTables::new();
        let payload = build_feedback2(0b00, 0b01, 0x0123, false, &crc);
        let fb = parse_feedback2(&payload, &crc).unwrap();
        assert_eq!(fb.ack_type, AckType::Ack);
        assert_eq!(fb.mode, FeedbackMode::UMode);
        assert_eq!(fb.sn, 0x0123);
        assert_eq!(fb.crc_status, CrcStatus::NotPresent);
    }

    #[test]
    fn valid_crc_option_is_recognized() {
        let crc = CrcTables::new();
        let payload = build_feedback2(0b10, 0b01, 7, true, &crc);
        let fb = parse_feedback2(&payload, &crc).unwrap();
        assert_eq!(fb.ack_type, AckType::StaticNack);
        assert_eq!(fb.crc_status, CrcStatus::Valid);
    }

    #[test]
    fn tampered_crc_is_rejected() {
        let crc = CrcTables::new();
        let mut payload = build_feedback2(0b10, 0b01, 7, true, &crc);
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        let fb = parse_feedback2(&payload, &crc).unwrap();
        assert_eq!(fb.crc_status, CrcStatus::Invalid);
    }

    #[test]
    fn feedback1_extracts_sn() {
        let sn = parse_feedback1(&[0x01, 0x02]).unwrap();
        assert_eq!(sn, 0x0102);
    }

    #[test]
    fn truncated_feedback1_is_invalid() {
        assert!(matches!(parse_feedback1(&[0x01]), Err(Error::InvalidFeedback)));
    }
}
