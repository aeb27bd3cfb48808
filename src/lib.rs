//! # cncbridge
//!
//! Bridges browser control sessions to a CNC machine. Sessions speak JSON
//! over WebSocket; the bridge multiplexes them onto two serial links:
//!
//! - a motion controller running grblHAL (G-code and realtime bytes)
//! - an ESP32 spindle drive controller (newline-delimited JSON)
//!
//! ## Architecture
//!
//! 1. **cncbridge-core** - Link states, drive snapshot, error taxonomy
//! 2. **cncbridge-communication** - Serial transport, managed links, realtime safety gate
//! 3. **cncbridge-settings** - Configuration file handling
//! 4. **cncbridge-server** - Session registry, router, poller, supervisor, WebSocket server
//! 5. **cncbridge** - Main binary

pub use cncbridge_communication::{list_ports, SerialConnector, SerialPortInfo};
pub use cncbridge_core::{DriveStatus, Error, LinkRole, LinkState, Result, SerialStatus};
pub use cncbridge_server::{BridgeServer, BridgeSupervisor};
pub use cncbridge_settings::{default_config_path, BridgeConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// `RUST_LOG` overrides the default `info` filter. With `json` set, events
/// are written as one JSON object per line, otherwise pretty-printed.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_current_span(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
