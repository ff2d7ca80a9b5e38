//! The generic RFC 3095 engine (spec section 4.1): IR/FO/SO state machine,
//! packet-format and extension selection, and the encode pipeline.
//!
//! Grounded in structure (not content -- the teacher has no multi-state
//! protocol machine) on `stun::message`'s reader/writer split: a pure
//! "decide" pass with no side effects, followed by a "write" pass that
//! either fully succeeds or leaves the caller's buffer state irrelevant,
//! mirrored here by deciding everything and cloning tentative state before
//! a single write pass, only committing to the real `Context`/`GenericState`
//! on success (spec section 4.1.5's atomic-update requirement).

use crate::context::{GenericState, Mode, ProfileId, State};
use crate::crc::{CrcKind, CrcTables};
use crate::error::Result;
use crate::header::Classified;
use crate::packet::{
    write_large_cid, write_small_cid, ByteWriter, Extension, PacketType, ADD_CID_BASE,
    IR_DISCRIMINATOR, IR_DYN_DISCRIMINATOR, UO0_TOP_BIT, UO1_TOP_BITS, UOR2_TOP_BITS,
};
use crate::profile::{DynamicChange, Profile};

/// `CidMode`-independent CID-info writer shared by every generic-engine
/// packet format (spec section 6.2: Add-CID or large-CID varint).
fn write_cid(writer: &mut ByteWriter<'_>, cid: u16, large: bool) -> Result<()> {
    if large {
        write_large_cid(writer, cid)
    } else {
        write_small_cid(writer, cid)
    }
}

/// Spec section 4.1.1: decide the next state from the current one, given
/// whether a dynamic field changed unexpectedly, before any packet is
/// built. Static-field changes are handled by the caller (the compressor
/// re-creates the context under a fresh CID before calling into the
/// engine at all -- see `compressor::Compressor::compress`), so this
/// function never needs to signal "recreate".
///
/// Per `DESIGN.md`'s Open Question decision #2, O-mode/R-mode contexts run
/// this same U-mode transition table; no other table is specified. Takes
/// scalar `Context` fields rather than `&Context` so `encode` below can be
/// called with a context's fields copied out and its `specific` field
/// mutably borrowed at the same time (see `compressor::Compressor::compress`).
pub fn decide_state(
    state: State,
    mode: Mode,
    num_sent_in_current_state: u32,
    num_sent_packets: u32,
    dynamic_changed: bool,
    oa_repetitions_nr: u32,
    ir_timeout: u32,
    fo_timeout: u32,
) -> State {
    let _ = mode; // O/R-mode intentionally share this table.
    let sends_in_state = num_sent_in_current_state + 1;

    let mut state = match state {
        State::So if dynamic_changed => State::Fo,
        State::Ir if !dynamic_changed && sends_in_state >= oa_repetitions_nr => State::Fo,
        State::Fo if !dynamic_changed && sends_in_state >= oa_repetitions_nr => State::So,
        other => other,
    };

    let next_packet_no = num_sent_packets + 1;
    if ir_timeout > 0 && next_packet_no % ir_timeout == 0 {
        state = State::Ir;
    } else if fo_timeout > 0 && state == State::So && next_packet_no % fo_timeout == 0 {
        state = State::Fo;
    }

    state
}

/// Spec section 4.1.3: pick the lowest-numbered extension whose bit budget
/// covers the change set.
fn pick_extension(change: &DynamicChange) -> Extension {
    let ip_id_k = change.outer_ip_id_k.unwrap_or(0);
    if ip_id_k == 0 && change.sn_k <= 3 {
        Extension::Ext0
    } else if change.sn_k <= 8 && ip_id_k <= 8 {
        Extension::Ext1
    } else if ip_id_k <= 16 {
        Extension::Ext2
    } else {
        Extension::Ext3
    }
}

/// Spec section 4.1.2: pick the smallest packet format able to carry the
/// change set. `State::Ir` always yields `PacketType::Ir`; this is only
/// called for `Fo`/`So`.
fn pick_format(change: &DynamicChange) -> (PacketType, Extension) {
    // UO-0/UO-1 carry no explicit IP-ID bits at all (see their wire layout
    // below), so they're only viable while the IP-ID is still within the
    // same small-delta budget as the SN -- not merely "some k exists",
    // which `min_k_for` will report for almost any value given enough bits.
    let ip_id_k = change.outer_ip_id_k.unwrap_or(0);
    if !change.any_change && change.sn_k <= 4 && ip_id_k <= 4 {
        return (PacketType::Uo0, Extension::None);
    }
    if !change.any_change && change.sn_k <= 5 && ip_id_k <= 4 {
        return (PacketType::Uo1, Extension::None);
    }
    let ext = pick_extension(change);
    if matches!(ext, Extension::Ext3) && change.outer_ip_id_k.unwrap_or(0) > 16 {
        // Extension 3's flags byte is not flexible enough (spec section
        // 4.1.2: "IR-DYN used when the change set exceeds what UOR-2+EXT-3
        // can express").
        return (PacketType::IrDyn, Extension::None);
    }
    (PacketType::Uor2, ext)
}

fn write_extension(writer: &mut ByteWriter<'_>, ext: Extension, sn: u16, ip_id: u16) -> Result<()> {
    match ext {
        Extension::None => Ok(()),
        Extension::Ext0 => writer.put_u8((sn as u8) & 0x07),
        Extension::Ext1 => {
            writer.put_u8(sn as u8)?;
            writer.put_u8(ip_id as u8)
        }
        Extension::Ext2 => {
            writer.put_u8(sn as u8)?;
            writer.put_u8(ip_id as u8)?;
            writer.put_u8(0) // inner IP-ID: unused, no inner header in this crate's profiles.
        }
        Extension::Ext3 => {
            writer.put_u8(0b0000_0001)?; // flags: bit0 = IP-ID field present
            writer.put_u16_be(ip_id)
        }
    }
}

/// Result of one generic-engine encode call, everything `compressor`
/// needs to fill in `last_packet_info` (spec.md section 6.1 / SPEC_FULL.md
/// section F.1).
pub struct EncodeOutcome {
    pub packet_type: PacketType,
    pub header_size: usize,
    pub payload_offset: usize,
    pub sn: u16,
    pub state: State,
}

/// Encode one packet through the generic engine (spec sections 4.1 and
/// 4.1.4). Assumes the caller has already confirmed no static field
/// changed (a static change forces context re-creation at the
/// `compressor` layer, before this function is ever reached). Takes the
/// context's scalar fields by value and `gs` separately rather than a
/// single `&mut Context`, so the caller can hold `gs` as a mutable borrow
/// of `context.specific` at the same call site (see `decide_state`'s doc
/// comment).
pub fn encode(
    profile: &dyn Profile,
    cid: u16,
    profile_id: ProfileId,
    mode: Mode,
    state: State,
    num_sent_packets: u32,
    num_sent_in_current_state: u32,
    gs: &mut GenericState,
    classified: &Classified<'_>,
    large_cid: bool,
    oa_repetitions_nr: u32,
    ir_timeout: u32,
    fo_timeout: u32,
    crc_tables: &CrcTables,
    writer: &mut ByteWriter<'_>,
) -> Result<EncodeOutcome> {
    let mut trial = gs.clone();
    let change = profile.detect_dynamic_change(&mut trial, classified, oa_repetitions_nr);
    let new_sn = gs.sn.wrapping_add(1);

    // A behavioral change (e.g. a UDP checksum-usage flip) forces IR
    // outright; the ordinary state machine only ever demotes SO to FO on a
    // dynamic change, never jumps straight back to IR (spec section 4.6).
    let new_state = if change.force_ir {
        State::Ir
    } else {
        decide_state(
            state,
            mode,
            num_sent_in_current_state,
            num_sent_packets,
            change.any_change,
            oa_repetitions_nr,
            ir_timeout,
            fo_timeout,
        )
    };
    let (packet_type, extension) = match new_state {
        State::Ir => (PacketType::Ir, Extension::None),
        State::Fo if num_sent_in_current_state == 0 => (PacketType::IrDyn, Extension::None),
        _ => pick_format(&change),
    };

    write_cid(writer, cid, large_cid)?;

    match packet_type {
        PacketType::Ir => {
            writer.put_u8(IR_DISCRIMINATOR | 0x01)?; // D=1: dynamic chain present
            writer.put_u8(profile_id as u8)?;
            let crc_offset = writer.position();
            writer.put_u8(0)?;
            profile.code_static(&trial, writer)?;
            profile.code_dynamic(&trial, writer)?;
            patch_crc(writer, crc_offset, crc_tables, CrcKind::Crc8);
        }
        PacketType::IrDyn => {
            writer.put_u8(IR_DYN_DISCRIMINATOR)?;
            writer.put_u8(profile_id as u8)?;
            let crc_offset = writer.position();
            writer.put_u8(0)?;
            profile.code_dynamic(&trial, writer)?;
            patch_crc(writer, crc_offset, crc_tables, CrcKind::Crc8);
        }
        PacketType::Uo0 => {
            let crc = crc_tables.compute(CrcKind::Crc3, &new_sn.to_be_bytes());
            let byte = UO0_TOP_BIT | ((new_sn as u8 & 0x0F) << 3) | (crc & 0x07);
            writer.put_u8(byte)?;
        }
        PacketType::Uo1 => {
            let byte0 = UO1_TOP_BITS | (new_sn as u8 & 0x1F);
            writer.put_u8(byte0)?;
            let crc = crc_tables.compute(CrcKind::Crc3, &new_sn.to_be_bytes());
            writer.put_u8(crc & 0x07)?;
        }
        PacketType::Uor2 => {
            let x_bit = if extension == Extension::None { 0 } else { 0x20 };
            let byte0 = UOR2_TOP_BITS | (new_sn as u8 & 0x1F) | x_bit;
            writer.put_u8(byte0)?;
            let crc = crc_tables.compute(CrcKind::Crc7, &new_sn.to_be_bytes());
            writer.put_u8(crc & 0x7F)?;
            write_extension(writer, extension, new_sn, classified.ip_dynamic.identification)?;
        }
        PacketType::UncompressedIr | PacketType::UncompressedNormal => {
            unreachable!("uncompressed profile uses its own encode path")
        }
    }

    profile.code_uo_remainder(&trial, writer)?;

    // Everything above succeeded: commit. Atomicity is satisfied because
    // every `Result`-returning step ran against `writer`/`trial`, not
    // `gs`/`context`, until this point.
    *gs = trial;
    profile.confirm_sent(gs, classified, new_sn);

    Ok(EncodeOutcome {
        packet_type,
        header_size: writer.position(),
        payload_offset: classified.header_len,
        sn: new_sn,
        state: new_state,
    })
}

fn patch_crc(writer: &mut ByteWriter<'_>, crc_offset: usize, crc_tables: &CrcTables, kind: CrcKind) {
    let crc = crc_tables.compute(kind, writer.written());
    writer.patch_u8(crc_offset, crc);
}

/// Spec section 6.2: whether the leading byte of a ROHC packet carries an
/// Add-CID octet at all (small-CID mode, CID != 0).
pub fn has_add_cid(first_byte: u8) -> bool {
    first_byte & 0xF0 == ADD_CID_BASE
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn ir_advances_to_fo_after_repetitions() {
        let state = decide_state(State::Ir, Mode::U, 2, 2, false, 3, 0, 0);
        assert_eq!(state, State::Fo);
    }

    #[test]
    fn fo_advances_to_so_after_repetitions() {
        let state = decide_state(State::Fo, Mode::U, 2, 5, false, 3, 0, 0);
        assert_eq!(state, State::So);
    }

    #[test]
    fn so_falls_back_to_fo_on_unexpected_change() {
        let state = decide_state(State::So, Mode::U, 10, 20, true, 3, 0, 0);
        assert_eq!(state, State::Fo);
    }

    #[test]
    fn periodic_ir_refresh_overrides_so() {
        let state = decide_state(State::So, Mode::U, 10, 99, false, 3, 100, 0);
        assert_eq!(state, State::Ir);
    }

    #[test]
    fn small_change_picks_uo0() {
        let change = DynamicChange {
            any_change: false,
            sn_k: 2,
            outer_ip_id_k: None,
            force_ir: false,
        };
        assert_eq!(pick_format(&change), (PacketType::Uo0, Extension::None));
    }

    #[test]
    fn large_ip_id_jump_escalates_past_uo0() {
        let change = DynamicChange {
            any_change: true,
            sn_k: 4,
            outer_ip_id_k: Some(10),
            force_ir: false,
        };
        let (ty, _) = pick_format(&change);
        assert_ne!(ty, PacketType::Uo0);
    }
}
