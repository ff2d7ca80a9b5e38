use std::fmt;

/// Error codes returned by the compressor's public API (spec section 6.4).
///
/// `OK` is represented by `Result::Ok` itself rather than as a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The caller's output buffer cannot hold the encoded packet.
    BufferTooSmall { needed: usize, available: usize },
    /// The classified header combination cannot be compressed by any
    /// active profile (the caller should not normally see this: the
    /// context table falls back to the Uncompressed profile first).
    Unsupported,
    /// Reserved for resource exhaustion outside the context table (spec
    /// section 6.4's error code list); the context table itself surfaces
    /// a full-and-nothing-evictable table as `InvalidCid` (spec section 8).
    NoMemory,
    /// CID allocation failed (including a full context table with nothing
    /// evictable) or an unknown CID was referenced.
    InvalidCid,
    /// The requested profile was never activated via `activate_profile`.
    ProfileDisabled,
    /// Feedback bytes were structurally malformed (not a bad CRC, which is
    /// silently dropped per RFC 3095 -- this is for a packet too short to
    /// even contain a feedback header).
    InvalidFeedback,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { needed, available } => write!(
                f,
                "output buffer too small: needed {needed} bytes, have {available}"
            ),
            Self::Unsupported => write!(f, "header combination not supported by any profile"),
            Self::NoMemory => write!(f, "context table full, no context evictable"),
            Self::InvalidCid => write!(f, "invalid or exhausted context id"),
            Self::ProfileDisabled => write!(f, "profile not activated"),
            Self::InvalidFeedback => write!(f, "malformed feedback packet"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
