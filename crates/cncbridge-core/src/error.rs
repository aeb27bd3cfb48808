//! Error handling for the CNC bridge
//!
//! Provides the error taxonomy shared by every layer of the bridge:
//! - Link errors (serial transport failures, not-connected writes)
//! - Capacity errors (session admission refused)
//! - Validation errors (realtime safety whitelist rejections)
//! - Protocol decode errors (malformed inbound session messages)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::data::LinkRole;
use thiserror::Error;

/// Link error type
///
/// Represents failures on one of the serial links. Transport failures are
/// converted into link state transitions by the link itself; callers only
/// ever see them as the result of a single `write` or `open`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The link is not open, so nothing was written
    #[error("{role} link not connected")]
    NotConnected {
        /// The link that refused the operation.
        role: LinkRole,
    },

    /// I/O failure on an open link
    #[error("{role} link transport error: {reason}")]
    Transport {
        /// The link that failed.
        role: LinkRole,
        /// The underlying I/O failure.
        reason: String,
    },

    /// The transport could not be opened
    #[error("Failed to open {role} link on {address}: {reason}")]
    OpenFailed {
        /// The link being opened.
        role: LinkRole,
        /// The device address that was tried.
        address: String,
        /// Why opening failed.
        reason: String,
    },

    /// Rediscovery found no candidate device
    #[error("No device found for {role} link")]
    NoDevice {
        /// The link looking for a device.
        role: LinkRole,
    },

    /// The link has been shut down for good
    #[error("{role} link is shut down")]
    Shutdown {
        /// The link that was shut down.
        role: LinkRole,
    },
}

impl LinkError {
    /// The link this error belongs to
    pub fn role(&self) -> LinkRole {
        match self {
            Self::NotConnected { role }
            | Self::Transport { role, .. }
            | Self::OpenFailed { role, .. }
            | Self::NoDevice { role }
            | Self::Shutdown { role } => *role,
        }
    }
}

/// Session admission refused because the registry is full
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Session limit reached ({max} concurrent sessions)")]
pub struct CapacityError {
    /// The configured maximum number of sessions.
    pub max: usize,
}

/// Validation error type
///
/// Raised when an outbound realtime signal or command line does not pass
/// the safety gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Byte is not in the realtime whitelist
    #[error("Realtime byte 0x{byte:02X} is not permitted")]
    ForbiddenRealtime {
        /// The rejected byte.
        byte: u8,
    },

    /// The realtime payload is not a single byte-sized character
    #[error("Realtime payload {value:?} is not a single byte-sized character")]
    InvalidRealtimeChar {
        /// The rejected payload.
        value: String,
    },

    /// A command line carries a byte the controller would not treat as text
    #[error("Command contains unsafe character {value:?}")]
    UnsafeCommandChar {
        /// The first offending character.
        value: char,
    },
}

/// Protocol decode error type
///
/// Raised when an inbound session message claims to be structured but
/// cannot be decoded into a known frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolDecodeError {
    /// Not valid JSON, or JSON that does not match any known message
    #[error("Malformed message: {reason}")]
    Malformed {
        /// Decoder message, including unknown `type` values.
        reason: String,
    },

    /// Valid JSON object without a `type` discriminator
    #[error("Message has no type field")]
    MissingType,
}

/// Main error type for the bridge
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Link error
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Capacity error
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Validation error
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Protocol decode error
    #[error(transparent)]
    Decode(#[from] ProtocolDecodeError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a link error
    pub fn is_link_error(&self) -> bool {
        matches!(self, Error::Link(_))
    }

    /// Check if this error was caused by the safety gate
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
