//! W-LSB sliding-window encoder (spec section 4.2, RFC 3095 section 4.5).
//!
//! Given a bounded history of previously-sent `(sn_ref, value)` pairs, find
//! the smallest bit width `k` such that transmitting only the `k` least
//! significant bits of `value` lets a decompressor holding any one of those
//! references reconstruct `value` unambiguously.

/// One tracked field's window of prior reference values.
///
/// `W` (the window width) is configurable per spec section 6.1
/// (`set_wlsb_window_width`, default 4); `p` is the interpretation-interval
/// offset from RFC 3095 section 4.5.2, fixed per field kind at construction.
#[derive(Debug, Clone)]
pub struct WlsbWindow {
    refs: Vec<(u32, u32)>,
    capacity: usize,
    p: i64,
    field_width: u32,
}

impl WlsbWindow {
    /// `field_width` is the full bit width of the value this window tracks
    /// (16 for SN, 32 for TS/IP-ID as stored here, though IP-ID is
    /// conventionally 16 bits wide on the wire).
    pub fn new(capacity: usize, p: i64, field_width: u32) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self {
            refs: Vec::with_capacity(capacity),
            capacity,
            p,
            field_width,
        }
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a new reference, evicting the oldest entry first if the
    /// window is already full. The spec requires the newest reference
    /// after `add` to be the value just added.
    pub fn add(&mut self, sn_ref: u32, value: u32) {
        if self.refs.len() >= self.capacity {
            self.refs.remove(0);
        }
        self.refs.push((sn_ref, value));
    }

    /// Remove every reference whose `sn_ref` is `<= up_to_sn`, used after
    /// feedback acknowledges that sequence number.
    pub fn purge(&mut self, up_to_sn: u32) {
        self.refs.retain(|&(sn_ref, _)| sn_ref > up_to_sn);
    }

    /// Smallest `k` in `1..=field_width` such that `value` falls inside the
    /// reconstructible interval `[v_ref - p, v_ref + 2^k - 1 - p]` for
    /// *every* reference currently in the window. Returns `None` if no `k`
    /// up to `field_width` works -- the caller must escalate to a larger
    /// packet format (or IR) that carries the value in full.
    pub fn min_k_for(&self, value: u32) -> Option<u32> {
        if self.refs.is_empty() {
            return Some(0);
        }

        for k in 0..=self.field_width {
            let span = (1u64 << k) - 1;
            if self
                .refs
                .iter()
                .all(|&(_, v_ref)| in_interval(v_ref as i64, value as i64, self.p, span))
            {
                return Some(k);
            }
        }

        None
    }
}

#[inline]
fn in_interval(v_ref: i64, value: i64, p: i64, span: u64) -> bool {
    let lower = v_ref - p;
    let upper = v_ref + span as i64 - p;
    value >= lower && value <= upper
}

/// RFC 3095 section 4.5.2's recommended `p` values by field kind. `p` is
/// allowed to be a function of `k` for some fields (notably TS); this crate
/// only needs the fixed per-field constants the spec names (SN, TS, IP-ID).
pub mod p_values {
    pub const SN: i64 = 1;
    pub const TS: i64 = 2;
    pub const IP_ID: i64 = 3;
}
