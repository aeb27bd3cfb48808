//! Realtime commands and the safety gate
//!
//! grblHAL acts on these bytes the moment they arrive, outside the line
//! protocol. Anything not listed in [`RealtimeCommand`] must never reach the
//! controller as an unframed byte.

use cncbridge_core::ValidationError;
use std::fmt;

/// Single-byte realtime commands accepted from sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RealtimeCommand {
    /// Feed hold (`!`)
    FeedHold = b'!',
    /// Cycle start / resume (`~`)
    CycleStart = b'~',
    /// Status report query (`?`)
    StatusReport = b'?',
    /// Soft reset (Ctrl-X)
    SoftReset = 0x18,
    /// Cancel the active jog
    JogCancel = 0x85,
    /// Feed override to 100%
    FeedOverrideReset = 0x90,
    /// Feed override +10%
    FeedOverrideCoarsePlus = 0x91,
    /// Feed override -10%
    FeedOverrideCoarseMinus = 0x92,
    /// Feed override +1%
    FeedOverrideFinePlus = 0x93,
    /// Feed override -1%
    FeedOverrideFineMinus = 0x94,
    /// Rapid override to 100%
    RapidOverrideReset = 0x95,
    /// Rapid override to 50%
    RapidOverrideMedium = 0x96,
    /// Rapid override to 25%
    RapidOverrideLow = 0x97,
    /// Rapid override extra low (grblHAL)
    RapidOverrideExtraLow = 0x98,
    /// Spindle override to 100%
    SpindleOverrideReset = 0x99,
    /// Spindle override +10%
    SpindleOverrideCoarsePlus = 0x9A,
    /// Spindle override -10%
    SpindleOverrideCoarseMinus = 0x9B,
    /// Spindle override +1%
    SpindleOverrideFinePlus = 0x9C,
    /// Spindle override -1%
    SpindleOverrideFineMinus = 0x9D,
}

impl RealtimeCommand {
    /// Every permitted command
    pub const ALL: [RealtimeCommand; 19] = [
        Self::FeedHold,
        Self::CycleStart,
        Self::StatusReport,
        Self::SoftReset,
        Self::JogCancel,
        Self::FeedOverrideReset,
        Self::FeedOverrideCoarsePlus,
        Self::FeedOverrideCoarseMinus,
        Self::FeedOverrideFinePlus,
        Self::FeedOverrideFineMinus,
        Self::RapidOverrideReset,
        Self::RapidOverrideMedium,
        Self::RapidOverrideLow,
        Self::RapidOverrideExtraLow,
        Self::SpindleOverrideReset,
        Self::SpindleOverrideCoarsePlus,
        Self::SpindleOverrideCoarseMinus,
        Self::SpindleOverrideFinePlus,
        Self::SpindleOverrideFineMinus,
    ];

    /// Byte sent on the wire
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Look up the command for a byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|cmd| cmd.as_byte() == byte)
    }
}

impl TryFrom<u8> for RealtimeCommand {
    type Error = ValidationError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_byte(byte).ok_or(ValidationError::ForbiddenRealtime { byte })
    }
}

impl fmt::Display for RealtimeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, self.as_byte())
    }
}

/// Whitelist check for unframed bytes bound for the motion controller
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyGate;

impl SafetyGate {
    /// Accept `byte` only if it is a known realtime command
    pub fn validate(byte: u8) -> Result<RealtimeCommand, ValidationError> {
        RealtimeCommand::try_from(byte)
    }

    /// Check without building an error
    pub fn permits(byte: u8) -> bool {
        RealtimeCommand::from_byte(byte).is_some()
    }

    /// Byte carried by the `char` field of a session realtime message
    ///
    /// The payload must be exactly one character with a code point below
    /// 0x100; that code point is the byte sent.
    pub fn realtime_byte(value: &str) -> Result<u8, ValidationError> {
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => u8::try_from(u32::from(c)).ok(),
            _ => None,
        }
        .ok_or_else(|| ValidationError::InvalidRealtimeChar {
            value: value.to_string(),
        })
    }

    /// [`realtime_byte`](Self::realtime_byte) followed by [`validate`](Self::validate)
    pub fn validate_char(value: &str) -> Result<RealtimeCommand, ValidationError> {
        Self::validate(Self::realtime_byte(value)?)
    }

    /// Accept a command line only if every byte is printable ASCII
    ///
    /// grblHAL acts on bytes 0x80 and above as realtime commands wherever
    /// they appear in the stream, and an embedded line break would split
    /// the frame into two commands.
    pub fn validate_line(line: &str) -> Result<(), ValidationError> {
        match line.chars().find(|c| !matches!(c, ' '..='~')) {
            Some(value) => Err(ValidationError::UnsafeCommandChar { value }),
            None => Ok(()),
        }
    }
}
