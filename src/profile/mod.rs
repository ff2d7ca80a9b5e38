//! The `Profile` trait: a polymorphic capability set replacing the source's
//! function-pointer vtable (spec section 9's re-architecture note).
//!
//! Grounded on `stun::attribute::Property` -- one trait, several small
//! implementations keyed by an enum discriminant (there, `AttrKind`; here,
//! `ProfileId`) -- generalized from per-attribute encode/decode to
//! per-profile static/dynamic/remainder encode. All state lives in
//! `context::GenericState`/`UncompressedState`, never inside the profile
//! implementations themselves, which are zero-sized and stateless.

pub mod ip;
pub mod udp;
pub mod uncompressed;

use crate::context::{GenericState, ProfileId};
use crate::error::{Error, Result};
use crate::header::Classified;
use crate::packet::ByteWriter;

/// Result of comparing the current packet's dynamic fields against a
/// context's tracked references (spec section 4.1.1 rule 2 and section
/// 4.1.2's change set).
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicChange {
    /// Any dynamic field differs from the last confirmed reference.
    pub any_change: bool,
    /// Minimum W-LSB width needed for the sequence number.
    pub sn_k: u32,
    /// Minimum W-LSB width needed for the outer IP-ID, if tracked.
    pub outer_ip_id_k: Option<u32>,
    /// A behavioral change severe enough to force a full IR rather than a
    /// mere demotion to FO (spec section 4.6: a UDP checksum-usage flip is
    /// treated this way, since the decompressor's interpretation of the
    /// checksum field itself just changed, not only its value).
    pub force_ir: bool,
}

/// The generic-engine profile capability set (spec section 3's "profile
/// vtable"). Implemented by `ip::IpOnlyProfile` and `udp::UdpProfile`; the
/// Uncompressed profile (section 4.4) runs its own degenerate state machine
/// and does not implement this trait (see `uncompressed` module).
pub trait Profile {
    fn profile_id(&self) -> ProfileId;

    /// Does this profile apply to a freshly classified packet (spec
    /// section 4.7 step 4's "best-matching enabled profile")?
    fn applies(&self, classified: &Classified) -> bool;

    /// Build fresh generic sub-state from the first packet of a flow (spec
    /// section 4.1's `init_at_IR`).
    fn init_generic(&self, classified: &Classified, window_width: usize, sn_seed: u16) -> GenericState;

    /// Has a static field changed since the context was created (spec
    /// section 4.1.1 rule 1)?
    fn static_changed(&self, gs: &GenericState, classified: &Classified) -> bool;

    /// Update dynamic-field tracking for this packet and report the change
    /// set the engine must encode (spec section 4.1.2). Does not advance
    /// `gs.sn`; the caller does that after deciding the packet format,
    /// since the W-LSB reference for `sn` must be the value actually sent.
    fn detect_dynamic_change(
        &self,
        gs: &mut GenericState,
        classified: &Classified,
        oa_repetitions_nr: u32,
    ) -> DynamicChange;

    /// Emit the static chain (IR only, spec section 4.5/4.6 "Static chain").
    fn code_static(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()>;

    /// Emit the dynamic chain (IR/IR-DYN, spec section 4.5/4.6 "Dynamic
    /// chain").
    fn code_dynamic(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()>;

    /// Emit whatever trailing bytes a UO-family packet carries beyond its
    /// head (spec section 4.6: "UO remainder carries the UDP checksum iff
    /// the reference checksum is non-zero").
    fn code_uo_remainder(&self, gs: &GenericState, writer: &mut ByteWriter<'_>) -> Result<()>;

    /// Commit the just-sent values as the new references (`old_*` fields,
    /// W-LSB window entries) once the engine confirms a full successful
    /// emit (spec section 4.1.5's atomic update).
    fn confirm_sent(&self, gs: &mut GenericState, classified: &Classified, sn: u16);
}

/// The set of profiles a compressor has enabled, matching spec section
/// 6.1's "all profiles disabled by default; `activate_profile` enables
/// one at a time".
#[derive(Default)]
pub struct ProfileRegistry {
    ip_only: bool,
    udp: bool,
}

impl ProfileRegistry {
    pub fn activate(&mut self, profile_id: ProfileId) -> Result<()> {
        match profile_id {
            ProfileId::Ip => self.ip_only = true,
            ProfileId::Udp => self.udp = true,
            ProfileId::Uncompressed => {}
            ProfileId::Rtp | ProfileId::Esp | ProfileId::UdpLite => {
                return Err(Error::ProfileDisabled)
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self, profile_id: ProfileId) -> bool {
        match profile_id {
            ProfileId::Uncompressed => true,
            ProfileId::Ip => self.ip_only,
            ProfileId::Udp => self.udp,
            _ => false,
        }
    }

    /// Pick the best-matching enabled profile for a classified packet
    /// (spec section 4.7 step 4), preferring the most specific match: UDP
    /// over IP-only over Uncompressed.
    pub fn select(&self, classified: &Classified) -> ProfileId {
        if self.udp && udp::UdpProfile.applies(classified) {
            return ProfileId::Udp;
        }
        if self.ip_only && ip::IpOnlyProfile.applies(classified) {
            return ProfileId::Ip;
        }
        ProfileId::Uncompressed
    }
}

/// Dispatch to the concrete `Profile` impl for a generic-engine profile.
/// Returns `None` for `Uncompressed`, which has no `Profile` impl.
pub fn generic_profile_for(profile_id: ProfileId) -> Option<&'static dyn Profile> {
    match profile_id {
        ProfileId::Ip => Some(&ip::IpOnlyProfile),
        ProfileId::Udp => Some(&udp::UdpProfile),
        _ => None,
    }
}
