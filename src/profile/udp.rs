//! UDP profile (spec section 4.6): IP-only plus UDP ports in the static
//! chain, checksum in the dynamic chain, and checksum-behavior change
//! detection that forces IR.

use crate::context::{GenericState, ProfileId, UdpState};
use crate::error::Result;
use crate::header::Classified;
use crate::packet::ByteWriter;
use crate::wlsb::{p_values, WlsbWindow};

use super::ip::{code_ip_dynamic, code_ip_static};
use super::{DynamicChange, Profile};

pub struct UdpProfile;

impl Profile for UdpProfile {
    fn profile_id(&self) -> ProfileId {
        ProfileId::Udp
    }

    fn applies(&self, classified: &Classified) -> bool {
        classified.udp.is_some()
    }

    fn init_generic(&self, classified: &Classified, window_width: usize, sn_seed: u16) -> GenericState {
        let (udp_static, udp_dynamic) = classified.udp.expect("applies() checked Some");
        let mut gs = GenericState::new(
            window_width,
            classified.ip_static.clone(),
            classified.ip_dynamic,
            sn_seed,
        );
        gs.sn_window.add(sn_seed as u32, sn_seed as u32);
        gs.outer_ip_id_window = WlsbWindow::new(window_width, p_values::IP_ID, 16);
        gs.outer_ip_id_window
            .add(sn_seed as u32, classified.ip_dynamic.identification as u32);
        gs.udp = Some(UdpState {
            static_fields: udp_static,
            last_dynamic: udp_dynamic,
            checksum_change_count: 0,
            send_udp_dynamic: true,
        });
        gs
    }

    fn static_changed(&self, gs: &GenericState, classified: &Classified) -> bool {
        if gs.outer_ip_static != classified.ip_static {
            return true;
        }
        let Some((udp_static, _)) = classified.udp else {
            return true;
        };
        match &gs.udp {
            Some(udp) => udp.static_fields != udp_static,
            None => true,
        }
    }

    fn detect_dynamic_change(
        &self,
        gs: &mut GenericState,
        classified: &Classified,
        oa_repetitions_nr: u32,
    ) -> DynamicChange {
        let next_sn = gs.sn.wrapping_add(1) as u32;
        let sn_k = gs.sn_window.min_k_for(next_sn).unwrap_or(16);
        let outer_ip_id_k = gs
            .outer_ip_id_window
            .min_k_for(classified.ip_dynamic.identification as u32);

        // See `ip::IpOnlyProfile::detect_dynamic_change`: the ID field's
        // routine increment is tracked by the IP-ID window, not treated as
        // an unexpected change, unless that window can no longer express it.
        let mut any_change = gs.outer_ip_dynamic.tos_tc != classified.ip_dynamic.tos_tc
            || gs.outer_ip_dynamic.ttl_hl != classified.ip_dynamic.ttl_hl
            || gs.outer_ip_dynamic.dont_fragment != classified.ip_dynamic.dont_fragment
            || outer_ip_id_k.is_none();
        let mut force_ir = false;

        if let (Some((_, udp_dynamic)), Some(udp)) = (classified.udp, gs.udp.as_mut()) {
            let flipped_to_nonzero = udp_dynamic.checksum != 0 && udp.last_dynamic.checksum == 0;
            let flipped_to_zero = udp_dynamic.checksum == 0 && udp.last_dynamic.checksum != 0;

            // Preserved verbatim per spec section 4.6 and section 9's open
            // question: the repetition-count branch is independent of the
            // flip branches, so the first `oa_repetitions_nr` dynamic sends
            // after any IR re-include the checksum even with no flip.
            if flipped_to_nonzero || flipped_to_zero || udp.checksum_change_count < oa_repetitions_nr {
                udp.send_udp_dynamic = true;
                if flipped_to_nonzero || flipped_to_zero {
                    udp.checksum_change_count = 0;
                    force_ir = true;
                }
                any_change = true;
            } else {
                udp.send_udp_dynamic = false;
            }
        }

        DynamicChange {
            any_change,
            sn_k,
            outer_ip_id_k,
            force_ir,
        }
    }

    fn code_static(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()> {
        code_ip_static(&gs.outer_ip_static, writer)?;
        let udp = gs.udp.as_ref().expect("UDP profile always has udp state");
        writer.put_u16_be(udp.static_fields.source_port)?;
        writer.put_u16_be(udp.static_fields.destination_port)
    }

    fn code_dynamic(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()> {
        code_ip_dynamic(&gs.outer_ip_dynamic, writer)?;
        let udp = gs.udp.as_ref().expect("UDP profile always has udp state");
        writer.put_u16_be(udp.last_dynamic.checksum)
    }

    fn code_uo_remainder(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()> {
        let udp = gs.udp.as_ref().expect("UDP profile always has udp state");
        // Spec section 4.6: "UO remainder carries the UDP checksum iff the
        // reference checksum is non-zero."
        if udp.last_dynamic.checksum != 0 {
            writer.put_u16_be(udp.last_dynamic.checksum)?;
        }
        Ok(())
    }

    fn confirm_sent(&self, gs: &mut GenericState, classified: &Classified, sn: u16) {
        gs.outer_ip_dynamic = classified.ip_dynamic;
        gs.sn = sn;
        gs.sn_window.add(sn as u32, sn as u32);
        gs.outer_ip_id_window
            .add(sn as u32, classified.ip_dynamic.identification as u32);
        if let (Some((_, udp_dynamic)), Some(udp)) = (classified.udp, gs.udp.as_mut()) {
            udp.last_dynamic = udp_dynamic;
            udp.checksum_change_count = udp.checksum_change_count.saturating_add(1);
        }
    }
}
