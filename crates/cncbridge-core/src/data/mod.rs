//! Data models for the bridge
//!
//! Link identity and connection state, the client-facing serial status,
//! and the drive controller status snapshot.

pub mod drive_status;

pub use drive_status::{DriveStatus, DriveStatusCell};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Logical role of a serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkRole {
    /// Motion controller (grblHAL line protocol)
    Motion,
    /// Auxiliary spindle-drive controller (JSON lines)
    Drive,
}

impl std::fmt::Display for LinkRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Motion => write!(f, "motion"),
            Self::Drive => write!(f, "drive"),
        }
    }
}

/// Connection state of a link
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Never opened, or the last open attempt failed
    #[default]
    Closed,
    /// Transport acquired, running the settle/drain/handshake sequence
    Opening,
    /// Ready for traffic
    Open,
    /// An I/O error took the link down
    Degraded {
        /// Description of the failure.
        reason: String,
    },
    /// Waiting to retry after a failed rediscovery or open
    Reconnecting {
        /// 1-based attempt number since the last successful open.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Explicitly shut down; terminal
    Shutdown,
}

impl LinkState {
    /// Check if traffic can flow
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the link has been shut down for good
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Check if the recovery loop should be working on this link
    pub fn needs_recovery(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Degraded { .. } | Self::Reconnecting { .. }
        )
    }

    /// Status reported to sessions for this state
    ///
    /// `Opening` has no client-facing status of its own.
    pub fn serial_status(&self) -> Option<SerialStatus> {
        match self {
            Self::Open => Some(SerialStatus::Connected),
            Self::Reconnecting { .. } => Some(SerialStatus::Reconnecting),
            Self::Closed | Self::Degraded { .. } | Self::Shutdown => {
                Some(SerialStatus::Disconnected)
            }
            Self::Opening => None,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Opening => write!(f, "Opening"),
            Self::Open => write!(f, "Open"),
            Self::Degraded { reason } => write!(f, "Degraded({})", reason),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "Reconnecting(attempt {}, {:?})", attempt, delay)
            }
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Motion link status as reported in `bridge_status` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialStatus {
    /// Motion link open
    Connected,
    /// Motion link down and not currently retrying
    Disconnected,
    /// Motion link down, recovery in progress
    Reconnecting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_status_mapping() {
        assert_eq!(
            LinkState::Open.serial_status(),
            Some(SerialStatus::Connected)
        );
        assert_eq!(
            LinkState::Reconnecting {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
            .serial_status(),
            Some(SerialStatus::Reconnecting)
        );
        assert_eq!(
            LinkState::Degraded {
                reason: "unplugged".to_string()
            }
            .serial_status(),
            Some(SerialStatus::Disconnected)
        );
        assert_eq!(LinkState::Opening.serial_status(), None);
    }

    #[test]
    fn test_needs_recovery() {
        assert!(LinkState::Closed.needs_recovery());
        assert!(!LinkState::Open.needs_recovery());
        assert!(!LinkState::Opening.needs_recovery());
        assert!(!LinkState::Shutdown.needs_recovery());
    }

    #[test]
    fn test_role_and_status_serialization() {
        assert_eq!(LinkRole::Motion.to_string(), "motion");
        assert_eq!(
            serde_json::to_string(&SerialStatus::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
