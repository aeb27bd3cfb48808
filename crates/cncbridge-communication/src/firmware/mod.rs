//! Controller protocols
//!
//! - [`grbl`]: grblHAL realtime command set, the realtime safety gate, and
//!   response classification for the motion controller
//! - [`drive`]: JSON-line messages from the ESP32 spindle-drive controller

pub mod drive;
pub mod grbl;
