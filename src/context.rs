//! Per-flow context and the context table (spec sections 3 and 4.7).
//!
//! The CID allocator is grounded on `turn::sessions::PortAllocatePools`: a
//! flat `Vec<bool>` used-bitmap searched from a rolling start index, here
//! sized by CID mode instead of the ephemeral port range. The table itself
//! mirrors `turn::sessions::Sessions`' `Table<K, V>` wrapper -- single
//! owner, no interior locking, since spec section 5 makes the whole
//! compressor single-threaded and non-reentrant.

use std::collections::HashMap;

use num_enum::TryFromPrimitive;

use crate::error::{Error, Result};
use crate::header::{FlowKey, IpDynamic, IpStatic, UdpDynamic, UdpStatic};
use crate::wlsb::{p_values, WlsbWindow};

/// RFC 3095 section 8 profile identifiers. Only Uncompressed/Ip/Udp have a
/// `Profile` implementation in this crate (spec section 1's explicit
/// scope); the others are listed so `Context::profile_id` and the IR
/// profile byte stay correct if a caller enables them once RTP/ESP/UDP-Lite
/// gain implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ProfileId {
    Uncompressed = 0x00,
    Rtp = 0x01,
    Udp = 0x02,
    Esp = 0x03,
    Ip = 0x04,
    UdpLite = 0x08,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ir,
    Fo,
    So,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    U,
    O,
    R,
}

/// CID addressing mode (spec section 6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidMode {
    Small,
    Large,
}

impl CidMode {
    pub fn max_allowed(self) -> u16 {
        match self {
            CidMode::Small => 15,
            CidMode::Large => 16383,
        }
    }
}

/// Uncompressed-profile sub-state (spec section 4.4).
#[derive(Debug, Clone, Default)]
pub struct UncompressedState {
    pub ir_count: u32,
    pub normal_count: u32,
    pub go_back_ir_count: u32,
}

/// UDP-specific sub-state layered on top of the generic engine (spec
/// section 4.6).
#[derive(Debug, Clone)]
pub struct UdpState {
    pub static_fields: UdpStatic,
    pub last_dynamic: UdpDynamic,
    pub checksum_change_count: u32,
    /// Set by `profile::udp`'s change-detection each call; consumed by the
    /// engine when assembling the dynamic chain / UO remainder.
    pub send_udp_dynamic: bool,
}

/// Shared sub-state for every profile built on the generic RFC 3095 engine
/// (IP-only, UDP, and by extension RTP/UDP-Lite/ESP -- spec section 3).
#[derive(Debug, Clone)]
pub struct GenericState {
    pub sn: u16,
    pub sn_window: WlsbWindow,
    pub outer_ip_id_window: WlsbWindow,
    pub inner_ip_id_window: Option<WlsbWindow>,
    pub ts_window: Option<WlsbWindow>,
    pub ip_header_count: u8,
    pub outer_ip_static: IpStatic,
    pub outer_ip_dynamic: IpDynamic,
    pub inner_ip_static: Option<IpStatic>,
    pub inner_ip_dynamic: Option<IpDynamic>,
    pub next_header_len: u8,
    pub udp: Option<UdpState>,
    /// Cached CRC-STATIC remainder; invalidated (recomputed) only when a
    /// static field changes (spec section 4.3).
    pub crc_static_cache: Option<u8>,
}

impl GenericState {
    pub fn new(window_width: usize, ip_static: IpStatic, ip_dynamic: IpDynamic, sn: u16) -> Self {
        Self {
            sn,
            sn_window: WlsbWindow::new(window_width, p_values::SN, 16),
            outer_ip_id_window: WlsbWindow::new(window_width, p_values::IP_ID, 16),
            inner_ip_id_window: None,
            ts_window: None,
            ip_header_count: 1,
            outer_ip_static: ip_static,
            outer_ip_dynamic: ip_dynamic,
            inner_ip_static: None,
            inner_ip_dynamic: None,
            next_header_len: 0,
            udp: None,
            crc_static_cache: None,
        }
    }
}

/// Per-profile sub-state, a typed sum type replacing the source's
/// void-pointer `specific` field (spec section 9's re-architecture note).
#[derive(Debug, Clone)]
pub enum ProfileState {
    Uncompressed(UncompressedState),
    Generic(GenericState),
}

/// One per-flow compression context (spec section 3).
#[derive(Debug, Clone)]
pub struct Context {
    pub cid: u16,
    pub profile_id: ProfileId,
    pub state: State,
    pub mode: Mode,
    pub num_sent_packets: u32,
    pub num_sent_in_current_state: u32,
    pub last_used_tick: u64,
    pub flow: FlowKey,
    pub specific: ProfileState,
}

impl Context {
    pub fn transition_to(&mut self, state: State) {
        if self.state != state {
            log::trace!(
                "cid={} profile={:?} transition {:?} -> {:?}",
                self.cid,
                self.profile_id,
                self.state,
                state
            );
            self.num_sent_in_current_state = 0;
        }
        self.state = state;
    }

    pub fn record_sent(&mut self) {
        self.num_sent_packets = self.num_sent_packets.saturating_add(1);
        self.num_sent_in_current_state = self.num_sent_in_current_state.saturating_add(1);
    }
}

/// CID allocation bitmap, grounded on
/// `turn::sessions::PortAllocatePools::alloc`'s "smallest free slot" scan,
/// specialized to a flat `Vec<bool>` since the CID range (<= 16383) is far
/// smaller than the ephemeral port range that motivated the original's
/// packed-bitset.
struct CidAllocator {
    used: Vec<bool>,
}

impl CidAllocator {
    fn new(max_cid: u16) -> Self {
        Self {
            used: vec![false; max_cid as usize + 1],
        }
    }

    fn alloc(&mut self) -> Option<u16> {
        self.used.iter().position(|&u| !u).map(|idx| {
            self.used[idx] = true;
            idx as u16
        })
    }

    fn free(&mut self, cid: u16) {
        if let Some(slot) = self.used.get_mut(cid as usize) {
            *slot = false;
        }
    }

    fn mark_used(&mut self, cid: u16) -> bool {
        match self.used.get_mut(cid as usize) {
            Some(slot) if !*slot => {
                *slot = true;
                true
            }
            _ => false,
        }
    }
}

/// Owns every context for one compressor instance (spec section 4.7).
pub struct ContextTable {
    cid_mode: CidMode,
    max_cid: u16,
    allocator: CidAllocator,
    contexts: HashMap<u16, Context>,
    flow_index: HashMap<FlowKey, u16>,
    tick: u64,
    contexts_created: u32,
    contexts_evicted: u32,
}

impl ContextTable {
    pub fn new(cid_mode: CidMode, max_cid: u16) -> Self {
        let max_cid = max_cid.min(cid_mode.max_allowed());
        Self {
            cid_mode,
            max_cid,
            allocator: CidAllocator::new(max_cid),
            contexts: HashMap::new(),
            flow_index: HashMap::new(),
            tick: 0,
            contexts_created: 0,
            contexts_evicted: 0,
        }
    }

    pub fn cid_mode(&self) -> CidMode {
        self.cid_mode
    }

    pub fn max_cid(&self) -> u16 {
        self.max_cid
    }

    pub fn contexts_created(&self) -> u32 {
        self.contexts_created
    }

    pub fn contexts_evicted(&self) -> u32 {
        self.contexts_evicted
    }

    pub fn tick(&mut self) -> u64 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    pub fn find_by_flow(&self, flow: &FlowKey) -> Option<u16> {
        self.flow_index.get(flow).copied()
    }

    pub fn get(&self, cid: u16) -> Option<&Context> {
        self.contexts.get(&cid)
    }

    pub fn get_mut(&mut self, cid: u16) -> Option<&mut Context> {
        self.contexts.get_mut(&cid)
    }

    pub fn touch(&mut self, cid: u16) {
        let tick = self.tick();
        if let Some(ctx) = self.contexts.get_mut(&cid) {
            ctx.last_used_tick = tick;
        }
    }

    /// Allocate a fresh CID for `flow`, evicting the least-recently-used
    /// context if the table is full (spec section 4.7 step 4). Returns
    /// `Error::InvalidCid` when every context is too recent to evict --
    /// spec section 7: "context table full is recoverable via LRU eviction
    /// -- only if *all* contexts are very recent is it surfaced" and spec
    /// section 8: "CID rollover at max_cid: allocation fails with
    /// `InvalidCid`, not silent overflow."
    pub fn allocate(&mut self, flow: FlowKey, profile_id: ProfileId, specific: ProfileState) -> Result<u16> {
        let cid = match self.allocator.alloc() {
            Some(cid) => cid,
            None => self.evict_lru()?,
        };

        let tick = self.tick();
        let ctx = Context {
            cid,
            profile_id,
            state: State::Ir,
            mode: Mode::U,
            num_sent_packets: 0,
            num_sent_in_current_state: 0,
            last_used_tick: tick,
            flow: flow.clone(),
            specific,
        };

        self.contexts.insert(cid, ctx);
        self.flow_index.insert(flow, cid);
        self.contexts_created = self.contexts_created.saturating_add(1);
        Ok(cid)
    }

    fn evict_lru(&mut self) -> Result<u16> {
        let Some((&victim_cid, victim)) = self
            .contexts
            .iter()
            .min_by_key(|(_, ctx)| ctx.last_used_tick)
        else {
            return Err(Error::InvalidCid);
        };

        // `self.tick` always holds the most recent tick handed out by
        // `touch`/`allocate`, so it's never more than `self.contexts.len()`
        // ticks ahead of the LRU victim unless that victim has genuinely
        // gone idle relative to the rest of the table -- every context
        // created in the same allocation burst differs from its neighbor by
        // exactly one tick, not by actual elapsed idle time. Refuse to evict
        // while the whole table is still within one lap of its own creation.
        let live = self.contexts.len() as u64;
        if self.tick.saturating_sub(victim.last_used_tick) < live {
            return Err(Error::InvalidCid);
        }

        self.remove(victim_cid);
        self.contexts_evicted = self.contexts_evicted.saturating_add(1);
        self.allocator.mark_used(victim_cid);
        Ok(victim_cid)
    }

    /// Destroy a context explicitly (spec section 3's lifecycle: "destroyed
    /// on explicit reset, LRU eviction, or compressor teardown").
    pub fn remove(&mut self, cid: u16) {
        if let Some(ctx) = self.contexts.remove(&cid) {
            self.flow_index.remove(&ctx.flow);
        }
        self.allocator.free(cid);
    }

    /// Re-create a context under a fresh CID, used when a static field
    /// change forces a profile to abandon its old CID (spec section
    /// 4.1.1's transition rule 1).
    pub fn recreate(
        &mut self,
        old_cid: u16,
        flow: FlowKey,
        profile_id: ProfileId,
        specific: ProfileState,
    ) -> Result<u16> {
        self.remove(old_cid);
        self.allocate(flow, profile_id, specific)
    }
}
