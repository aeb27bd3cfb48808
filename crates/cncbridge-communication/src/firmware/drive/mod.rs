//! ESP32 spindle-drive controller protocol
//!
//! The drive controller speaks newline-terminated JSON, interleaved with
//! free-text diagnostics.

pub mod response_parser;

pub use response_parser::{DriveMessage, DriveResponseParser};

use cncbridge_core::ValidationError;

/// Status request written by the poller and on connect
pub const STATUS_REQUEST: &[u8] = b"STATUS\n";

/// Accept a drive command only if it holds no control characters
///
/// The controller reads one command per line, so an embedded line break
/// would smuggle a second command.
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    match command.chars().find(|c| c.is_control()) {
        Some(value) => Err(ValidationError::UnsafeCommandChar { value }),
        None => Ok(()),
    }
}
