//! Serial communication layer
//!
//! - [`transport`]: the seam between a link and the device it talks to
//! - [`serial`]: serialport-backed transport and USB port discovery
//! - [`link`]: managed connection with its reconnect state machine
//! - [`read_buffer`]: bounded line framing for inbound bytes
//! - [`backoff`]: reconnect delay schedule
//! - `mock`: in-memory devices for tests (`test-util` feature)

pub mod backoff;
pub mod link;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod read_buffer;
pub mod serial;
pub mod transport;

use serde::{Deserialize, Serialize};

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Serial line parameters for opening a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1-2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Read timeout in milliseconds; bounds how long a reader blocks
    pub timeout_ms: u64,
    /// How long one frame may take to drain into the device
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_write_timeout_ms() -> u64 {
    5000
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            timeout_ms: 50,
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl ConnectionParams {
    /// Default parameters at the given baud rate
    pub fn with_baud(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }
}
