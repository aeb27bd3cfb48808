//! grblHAL motion controller protocol
//!
//! Lines to and from the motion controller are forwarded verbatim; the
//! bridge only needs to know which single-byte realtime commands it may pass
//! through, and enough about responses to log them sensibly.

pub mod realtime;
pub mod response;

pub use realtime::{RealtimeCommand, SafetyGate};
pub use response::MotionResponse;

/// Status report request as sent by the poller
pub const STATUS_QUERY: u8 = b'?';

/// Soft reset, written as the opening handshake
pub const SOFT_RESET: u8 = 0x18;
