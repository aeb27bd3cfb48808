//! # CNC Bridge Communication
//!
//! Serial link management and controller protocols for the CNC bridge.
//! A [`Link`] owns one serial device, reconnects on its own after I/O
//! failures, and hands out newline-framed lines. The realtime
//! [`SafetyGate`] guards every single-byte control signal sent to the
//! motion controller.

pub mod communication;
pub mod firmware;

pub use communication::{
    backoff::{Backoff, BackoffConfig},
    link::{LineReader, Link, LinkConfig},
    read_buffer::{ReadBuffer, MAX_BUFFER_SIZE},
    serial::{list_ports, SerialConnector, SerialPortInfo},
    transport::{Connector, Transport},
    ConnectionParams, SerialParity,
};

#[cfg(any(test, feature = "test-util"))]
pub use communication::mock::{MockConnector, MockDevice};

pub use firmware::{
    drive::{DriveMessage, DriveResponseParser},
    grbl::{MotionResponse, RealtimeCommand, SafetyGate},
};
