//! IP-only profile (spec section 4.5): the full generic engine with no
//! inner transport header.

use crate::context::{GenericState, ProfileId};
use crate::error::Result;
use crate::header::Classified;
use crate::packet::ByteWriter;
use crate::wlsb::{p_values, WlsbWindow};

use super::{DynamicChange, Profile};

pub struct IpOnlyProfile;

impl Profile for IpOnlyProfile {
    fn profile_id(&self) -> ProfileId {
        ProfileId::Ip
    }

    fn applies(&self, classified: &Classified) -> bool {
        classified.udp.is_none()
    }

    fn init_generic(&self, classified: &Classified, window_width: usize, sn_seed: u16) -> GenericState {
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
        gs
    }

    fn static_changed(&self, gs: &GenericState, classified: &Classified) -> bool {
        gs.outer_ip_static != classified.ip_static
    }

    fn detect_dynamic_change(
        &self,
        gs: &mut GenericState,
        classified: &Classified,
        _oa_repetitions_nr: u32,
    ) -> DynamicChange {
        let next_sn = gs.sn.wrapping_add(1) as u32;
        let sn_k = gs.sn_window.min_k_for(next_sn).unwrap_or(16);
        let outer_ip_id_k = gs
            .outer_ip_id_window
            .min_k_for(classified.ip_dynamic.identification as u32);

        // Spec section 4.1.1 rule 2: "changed unexpectedly" means NOT
        // tracked by a W-LSB window with sufficient confidence. The ID
        // field's routine per-packet increment is exactly what the IP-ID
        // window exists to track, so it only counts as a change here when
        // the window can no longer express it (`outer_ip_id_k` is `None`);
        // ToS/TTL/DF have no window of their own and any difference in
        // them always counts.
        let any_change = gs.outer_ip_dynamic.tos_tc != classified.ip_dynamic.tos_tc
            || gs.outer_ip_dynamic.ttl_hl != classified.ip_dynamic.ttl_hl
            || gs.outer_ip_dynamic.dont_fragment != classified.ip_dynamic.dont_fragment
            || outer_ip_id_k.is_none();

        DynamicChange {
            any_change,
            sn_k,
            outer_ip_id_k,
            force_ir: false,
        }
    }

    fn code_static(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()> {
        code_ip_static(&gs.outer_ip_static, writer)
    }

    fn code_dynamic(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()> {
        code_ip_dynamic(&gs.outer_ip_dynamic, writer)
    }

    fn code_uo_remainder(&self, _gs: &GenericState, _writer: &mut ByteWriter<'_>) -> Result<()> {
        Ok(())
    }

    fn confirm_sent(&self, gs: &mut GenericState, classified: &Classified, sn: u16) {
        gs.outer_ip_dynamic = classified.ip_dynamic;
        gs.sn = sn;
        gs.sn_window.add(sn as u32, sn as u32);
        gs.outer_ip_id_window
            .add(sn as u32, classified.ip_dynamic.identification as u32);
    }
}

/// Emit the static chain per RFC 3095 section 5.7.7.3/5.7.7.4: version,
/// protocol, source, destination, and (IPv6 only) flow label.
pub(super) fn code_ip_static(
    ip_static: &crate::header::IpStatic,
    writer: &mut ByteWriter<'_>,
) -> Result<()> {
    writer.put_u8(ip_static.version)?;
    writer.put_u8(ip_static.protocol)?;
    match ip_static.source {
        crate::header::IpAddrBytes::V4(bytes) => writer.put_bytes(&bytes)?,
        crate::header::IpAddrBytes::V6(bytes) => writer.put_bytes(&bytes)?,
    }
    match ip_static.destination {
        crate::header::IpAddrBytes::V4(bytes) => writer.put_bytes(&bytes)?,
        crate::header::IpAddrBytes::V6(bytes) => writer.put_bytes(&bytes)?,
    }
    if ip_static.version == 6 {
        writer.put_u32_be(ip_static.flow_label)?;
    }
    Ok(())
}

/// Emit the dynamic chain: TOS/TC, TTL/HL, ID (v4), DF (v4).
pub(super) fn code_ip_dynamic(
    ip_dynamic: &crate::header::IpDynamic,
    writer: &mut ByteWriter<'_>,
) -> Result<()> {
    writer.put_u8(ip_dynamic.tos_tc)?;
    writer.put_u8(ip_dynamic.ttl_hl)?;
    writer.put_u16_be(ip_dynamic.identification)?;
    writer.put_u8(ip_dynamic.dont_fragment as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{IpAddrBytes, IpDynamic, IpStatic};

    fn sample() -> IpStatic {
        IpStatic {
            version: 4,
            protocol: 17,
            source: IpAddrBytes::V4([1, 2, 3, 4]),
            destination: IpAddrBytes::V4([5, 6, 7, 8]),
            flow_label: 0,
        }
    }

    #[test]
    fn static_chain_round_trips_length() {
        let mut buf = [0u8; 16];
        let mut w = ByteWriter::new(&mut buf);
        code_ip_static(&sample(), &mut w).unwrap();
        // version + protocol + 4 + 4 = 10 bytes for IPv4
        assert_eq!(w.position(), 10);
    }

    #[test]
    fn dynamic_chain_is_five_bytes() {
        let mut buf = [0u8; 8];
        let mut w = ByteWriter::new(&mut buf);
        code_ip_dynamic(
            &IpDynamic {
                tos_tc: 0,
                ttl_hl: 64,
                identification: 7,
                dont_fragment: true,
            },
            &mut w,
        )
        .unwrap();
        assert_eq!(w.position(), 5);
    }
}
