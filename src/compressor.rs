//! The public `Compressor` API (spec section 6.1).
//!
//! Grounded on `turn::sessions::Sessions`: a struct that owns one table and
//! exposes a small set of public methods operating on it, with no interior
//! locking since (per spec section 5) a compressor instance is single-
//! threaded and non-reentrant.

use crate::context::{CidMode, Context, ContextTable, ProfileId, ProfileState, State, UncompressedState};
use crate::crc::CrcTables;
use crate::engine;
use crate::error::{Error, Result};
use crate::feedback::{self, AckType};
use crate::header::{self, Classified, FlowKey, IpAddrBytes};
use crate::packet::{ByteWriter, PacketType};
use crate::profile::{self, uncompressed, ProfileRegistry};
use crate::config::CompressorConfig;

/// Pluggable SN-seed source (spec section 3: "a pluggable random-number
/// source ... required because SN initialization must draw a 16-bit
/// unpredictable value per new context"). Boxed rather than generic so
/// `Compressor` stays a plain, non-generic struct, matching how
/// `turn::sessions::Sessions` takes its allocator pools by value rather
/// than as a type parameter.
pub type RandomCb = Box<dyn FnMut() -> u16>;

/// Everything a caller needs after one `compress` call (SPEC_FULL.md
/// section F.1, spec section 6.1's `last_packet_info`).
#[derive(Debug, Clone, Copy)]
pub struct LastPacketInfo {
    pub packet_type: PacketType,
    pub context_id: u16,
    pub profile_id: ProfileId,
    pub header_size: usize,
    pub payload_offset: usize,
    pub sn: u16,
}

pub struct Compressor {
    config: CompressorConfig,
    contexts: ContextTable,
    profiles: ProfileRegistry,
    crc_tables: CrcTables,
    random_cb: Option<RandomCb>,
    last_packet_info: Option<LastPacketInfo>,
}

impl Compressor {
    /// Spec section 6.1: `create(cid_type, max_cid, mrru, jam_use)`. Named
    /// `new` per Rust convention; `jam_use` (jamming detection) belongs to
    /// the link layer and is out of scope (spec section 1).
    pub fn new(config: CompressorConfig) -> Self {
        let contexts = ContextTable::new(config.cid_mode, config.max_cid);
        Self {
            config,
            contexts,
            profiles: ProfileRegistry::default(),
            crc_tables: CrcTables::new(),
            random_cb: None,
            last_packet_info: None,
        }
    }

    pub fn activate_profile(&mut self, profile_id: ProfileId) -> Result<()> {
        self.profiles.activate(profile_id)
    }

    pub fn set_random_cb(&mut self, cb: RandomCb) {
        self.random_cb = Some(cb);
    }

    pub fn set_wlsb_window_width(&mut self, width: usize) {
        self.config.window_width = width;
    }

    pub fn set_periodic_refreshes(&mut self, ir_timeout: u32, fo_timeout: u32) {
        self.config.ir_timeout = ir_timeout;
        self.config.fo_timeout = fo_timeout;
    }

    pub fn contexts_created(&self) -> u32 {
        self.contexts.contexts_created()
    }

    pub fn contexts_evicted(&self) -> u32 {
        self.contexts.contexts_evicted()
    }

    pub fn last_packet_info(&self) -> Option<&LastPacketInfo> {
        self.last_packet_info.as_ref()
    }

    /// Spec section 3: "destroyed on explicit reset" (SPEC_FULL.md section
    /// F.3).
    pub fn reset_context(&mut self, cid: u16) -> Result<()> {
        if self.contexts.get(cid).is_none() {
            return Err(Error::InvalidCid);
        }
        self.contexts.remove(cid);
        Ok(())
    }

    fn next_sn_seed(&mut self) -> u16 {
        match self.random_cb.as_mut() {
            Some(cb) => cb(),
            None => 0,
        }
    }

    fn large_cid(&self) -> bool {
        self.config.cid_mode == CidMode::Large
    }

    /// Spec section 6.1: `compress(comp, ip_bytes, ip_len, out_bytes, out_max)`.
    /// Returns the number of header bytes written to `out`; the caller is
    /// responsible for appending the payload starting at
    /// `last_packet_info().payload_offset` within `ip_bytes` (or, for the
    /// generic-engine profiles, `classified.payload`).
    pub fn compress(&mut self, ip_bytes: &[u8], out: &mut [u8]) -> Result<usize> {
        let classified = header::classify(ip_bytes);

        let (flow, profile_id_hint) = match &classified {
            Ok(c) => (c.flow.clone(), self.profiles.select(c)),
            Err(_) => (fallback_flow_key(ip_bytes), ProfileId::Uncompressed),
        };

        let cid = self.find_or_create_context(&flow, profile_id_hint, classified.as_ref().ok())?;

        // A static-field change forces re-creation under a fresh CID
        // (spec section 4.1.1 rule 1) before any encode is attempted.
        if let Ok(c) = &classified {
            self.recreate_if_static_changed(cid, &flow, c)?;
        }
        let cid = self.contexts.find_by_flow(&flow).ok_or(Error::InvalidCid)?;

        self.contexts.touch(cid);
        let large_cid = self.large_cid();
        let context = self.contexts.get_mut(cid).ok_or(Error::InvalidCid)?;

        let mut writer = ByteWriter::new(out);
        let outcome = match (&mut context.specific, &classified) {
            (ProfileState::Uncompressed(state), _) => {
                let (packet_type, payload_offset) = uncompressed::encode(
                    state,
                    context.cid,
                    self.config.cid_mode,
                    self.config.ir_timeout,
                    ip_bytes,
                    &self.crc_tables,
                    &mut writer,
                )?;
                context.record_sent();
                (packet_type, writer.position(), payload_offset, context.sn_or_zero())
            }
            (ProfileState::Generic(gs), Ok(c)) => {
                let profile = profile::generic_profile_for(context.profile_id).ok_or(Error::ProfileDisabled)?;
                let result = engine::encode(
                    profile,
                    context.cid,
                    context.profile_id,
                    context.mode,
                    context.state,
                    context.num_sent_packets,
                    context.num_sent_in_current_state,
                    gs,
                    c,
                    large_cid,
                    self.config.oa_repetitions_nr,
                    self.config.ir_timeout,
                    self.config.fo_timeout,
                    &self.crc_tables,
                    &mut writer,
                )?;
                context.transition_to(result.state);
                context.record_sent();
                (result.packet_type, result.header_size, result.payload_offset, result.sn)
            }
            (ProfileState::Generic(_), Err(_)) => return Err(Error::Unsupported),
        };

        self.last_packet_info = Some(LastPacketInfo {
            packet_type: outcome.0,
            context_id: context.cid,
            profile_id: context.profile_id,
            header_size: outcome.1,
            payload_offset: outcome.2,
            sn: outcome.3,
        });

        Ok(outcome.1)
    }

    fn find_or_create_context(
        &mut self,
        flow: &FlowKey,
        profile_id_hint: ProfileId,
        classified: Option<&Classified<'_>>,
    ) -> Result<u16> {
        if let Some(cid) = self.contexts.find_by_flow(flow) {
            return Ok(cid);
        }

        if !self.profiles.is_enabled(profile_id_hint) {
            return Err(Error::ProfileDisabled);
        }

        let sn_seed = self.next_sn_seed();
        let specific = match (profile_id_hint, classified) {
            (ProfileId::Uncompressed, _) | (_, None) => {
                ProfileState::Uncompressed(UncompressedState::default())
            }
            (profile_id, Some(c)) => {
                let profile = profile::generic_profile_for(profile_id).ok_or(Error::ProfileDisabled)?;
                ProfileState::Generic(profile.init_generic(c, self.config.window_width, sn_seed))
            }
        };

        self.contexts.allocate(flow.clone(), profile_id_hint, specific)
    }

    fn recreate_if_static_changed(&mut self, cid: u16, flow: &FlowKey, classified: &Classified<'_>) -> Result<()> {
        let Some(context) = self.contexts.get(cid) else {
            return Ok(());
        };

        let changed = match (&context.specific, context.profile_id) {
            (ProfileState::Generic(gs), profile_id) => profile::generic_profile_for(profile_id)
                .map(|p| p.static_changed(gs, classified))
                .unwrap_or(false),
            (ProfileState::Uncompressed(_), _) => false,
        };

        if !changed {
            return Ok(());
        }

        log::trace!("cid={cid} static field changed, re-creating context under a fresh CID");
        let profile_id = context.profile_id;
        let profile = profile::generic_profile_for(profile_id).ok_or(Error::ProfileDisabled)?;
        let sn_seed = self.next_sn_seed();
        let specific = ProfileState::Generic(profile.init_generic(classified, self.config.window_width, sn_seed));
        self.contexts.recreate(cid, flow.clone(), profile_id, specific)?;
        Ok(())
    }

    /// Spec section 6.1: `deliver_feedback(comp, feedback_bytes,
    /// feedback_len)`. `payload` is the FEEDBACK-2 body (after the
    /// `1111 0 code` packet header, per spec section 6.3); `cid` identifies
    /// which context the feedback concerns (callers demultiplex by CID
    /// before calling this, as the wire feedback format carries the CID
    /// separately when not implicit).
    pub fn deliver_feedback(&mut self, cid: u16, payload: &[u8]) -> Result<()> {
        let feedback = feedback::parse_feedback2(payload, &self.crc_tables)?;

        if feedback.ack_type == AckType::Reserved {
            return Ok(());
        }

        // A present-but-invalid CRC option discards the whole feedback
        // packet silently (spec section 4.7), not just the mode field.
        if feedback.crc_status.is_invalid() {
            return Ok(());
        }

        // A mode change is honored only with a valid CRC (spec section 4.7);
        // a packet with no CRC option at all still drives ack_type below.
        let honor_mode = feedback.crc_status.is_valid();

        let Some(context) = self.contexts.get_mut(cid) else {
            return Ok(());
        };

        match feedback.ack_type {
            AckType::Ack => {
                if let ProfileState::Generic(gs) = &mut context.specific {
                    gs.sn_window.purge(feedback.sn as u32);
                    gs.outer_ip_id_window.purge(feedback.sn as u32);
                }
            }
            AckType::Nack => {
                if context.state != State::Ir {
                    context.transition_to(State::Fo);
                }
            }
            AckType::StaticNack => {
                context.transition_to(State::Ir);
                if let ProfileState::Uncompressed(state) = &mut context.specific {
                    uncompressed::force_ir(state);
                }
            }
            AckType::Reserved => unreachable!(),
        }

        if honor_mode {
            context.mode = match feedback.mode {
                feedback::FeedbackMode::UMode => crate::context::Mode::U,
                feedback::FeedbackMode::OMode => crate::context::Mode::O,
                feedback::FeedbackMode::RMode => crate::context::Mode::R,
                feedback::FeedbackMode::Reserved => context.mode,
            };
        }

        Ok(())
    }
}

impl Context {
    fn sn_or_zero(&self) -> u16 {
        match &self.specific {
            ProfileState::Generic(gs) => gs.sn,
            ProfileState::Uncompressed(_) => 0,
        }
    }
}

/// Heuristic flow key for packets the classifier couldn't parse (spec
/// section 7: "Protocol impossibility ... classifier falls back to the
/// Uncompressed profile"). Groups by the packet's first four bytes so
/// distinct unparseable streams still land in distinct contexts rather
/// than colliding on one shared CID.
fn fallback_flow_key(ip_bytes: &[u8]) -> FlowKey {
    let mut prefix = [0u8; 4];
    let n = ip_bytes.len().min(4);
    prefix[..n].copy_from_slice(&ip_bytes[..n]);
    FlowKey {
        ip_version: 0,
        protocol: 0,
        source: IpAddrBytes::V4(prefix),
        destination: IpAddrBytes::V4([0; 4]),
        ports: None,
    }
}
