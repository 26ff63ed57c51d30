//! Error types for the compositor's few genuinely fatal paths.
//!
//! Most error conditions (malformed messages, unknown window ids, peer
//! death, shm failures mid-request) are handled by
//! logging and returning early — it never produces a `Result` that climbs
//! out of the protocol loop. `CompositorError` only covers startup failures
//! and CLI/config parsing, where bailing out is the correct behavior.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    #[error("invalid geometry {0:?}: both dimensions must be positive")]
    InvalidGeometry((i64, i64)),

    #[error("invalid --geometry value {0:?}: expected WxH")]
    BadGeometryArg(String),
}

/// Display-only wrapper for logging a dropped message without bubbling an error.
#[derive(Debug)]
pub struct ProtocolViolation(pub String);

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
