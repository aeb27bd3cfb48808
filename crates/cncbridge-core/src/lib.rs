//! # CNC Bridge Core
//!
//! Core types, errors, and shared state for the CNC bridge.
//! Provides the link identity and state machine vocabulary, the
//! client-facing serial status, and the drive status snapshot.

pub mod data;
pub mod error;

pub use data::{DriveStatus, DriveStatusCell, LinkRole, LinkState, SerialStatus};

pub use error::{CapacityError, Error, LinkError, ProtocolDecodeError, Result, ValidationError};
