//! Session wire protocol
//!
//! Inbound text frames are either JSON objects tagged by `type` or plain
//! text, which is taken as a raw motion command. Outbound structured
//! messages are [`BridgeEvent`]s; motion controller lines go out as raw
//! text.

use cncbridge_communication::SafetyGate;
use cncbridge_core::{DriveStatus, Error, ProtocolDecodeError, SerialStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded session message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Line for the motion controller
    RawCommand(String),
    /// Single unframed realtime byte for the motion controller
    RealtimeSignal(u8),
    /// Line for the drive controller
    DriveCommand(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireCommand {
    Gcode {
        command: String,
    },
    Realtime {
        #[serde(rename = "char")]
        value: String,
    },
    Vfd {
        command: String,
    },
}

impl InboundFrame {
    /// Decode one session text frame
    ///
    /// Text whose trimmed form starts with `{` must be a known structured
    /// message. Anything else is a raw motion command.
    pub fn decode(text: &str) -> Result<Self, Error> {
        if !text.trim_start().starts_with('{') {
            return Ok(Self::RawCommand(text.to_string()));
        }

        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolDecodeError::Malformed {
                reason: e.to_string(),
            })?;
        if value.get("type").is_none() {
            return Err(ProtocolDecodeError::MissingType.into());
        }

        let command: WireCommand =
            serde_json::from_value(value).map_err(|e| ProtocolDecodeError::Malformed {
                reason: e.to_string(),
            })?;

        Ok(match command {
            WireCommand::Gcode { command } => Self::RawCommand(command),
            WireCommand::Realtime { value } => {
                Self::RealtimeSignal(SafetyGate::realtime_byte(&value)?)
            }
            WireCommand::Vfd { command } => Self::DriveCommand(command),
        })
    }
}

/// Structured message sent to sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Motion link status
    BridgeStatus {
        /// Client-facing link status
        serial: SerialStatus,
        /// Last failure, when not connected
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Current drive snapshot
    VfdStatus(DriveStatus),
    /// Drive controller command acknowledgement, passed through
    VfdResponse(Map<String, Value>),
}

impl BridgeEvent {
    /// Serialize to a text frame
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cncbridge_core::ValidationError;
    use serde_json::json;

    #[test]
    fn test_decode_structured_commands() {
        assert_eq!(
            InboundFrame::decode(r#"{"type":"gcode","command":"G0 X10"}"#).unwrap(),
            InboundFrame::RawCommand("G0 X10".to_string())
        );
        assert_eq!(
            InboundFrame::decode(r#"{"type":"realtime","char":"!"}"#).unwrap(),
            InboundFrame::RealtimeSignal(b'!')
        );
        assert_eq!(
            InboundFrame::decode(r#"{"type":"realtime","char":"\u0085"}"#).unwrap(),
            InboundFrame::RealtimeSignal(0x85)
        );
        assert_eq!(
            InboundFrame::decode(r#" {"type":"vfd","command":"RPM 12000"}"#).unwrap(),
            InboundFrame::DriveCommand("RPM 12000".to_string())
        );
    }

    #[test]
    fn test_plain_text_is_raw_command() {
        assert_eq!(
            InboundFrame::decode("$H").unwrap(),
            InboundFrame::RawCommand("$H".to_string())
        );
        assert_eq!(
            InboundFrame::decode("[1, 2]").unwrap(),
            InboundFrame::RawCommand("[1, 2]".to_string())
        );
    }

    #[test]
    fn test_decode_rejects_bad_structured_messages() {
        assert!(matches!(
            InboundFrame::decode("{not json"),
            Err(Error::Decode(ProtocolDecodeError::Malformed { .. }))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"command":"G0"}"#),
            Err(Error::Decode(ProtocolDecodeError::MissingType))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"type":"shutdown"}"#),
            Err(Error::Decode(ProtocolDecodeError::Malformed { .. }))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"type":"gcode"}"#),
            Err(Error::Decode(ProtocolDecodeError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_realtime_payload_must_be_one_byte_char() {
        assert!(matches!(
            InboundFrame::decode(r#"{"type":"realtime","char":"!?"}"#),
            Err(Error::Validation(ValidationError::InvalidRealtimeChar { .. }))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"type":"realtime","char":""}"#),
            Err(Error::Validation(ValidationError::InvalidRealtimeChar { .. }))
        ));
        // forbidden bytes still decode; the safety gate rejects them later
        assert_eq!(
            InboundFrame::decode(r#"{"type":"realtime","char":"A"}"#).unwrap(),
            InboundFrame::RealtimeSignal(b'A')
        );
    }

    #[test]
    fn test_bridge_status_json() {
        let event = BridgeEvent::BridgeStatus {
            serial: SerialStatus::Connected,
            error: None,
        };
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"type":"bridge_status","serial":"connected"}"#
        );

        let event = BridgeEvent::BridgeStatus {
            serial: SerialStatus::Disconnected,
            error: Some("motion link not connected".to_string()),
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["serial"], json!("disconnected"));
        assert_eq!(value["error"], json!("motion link not connected"));
    }

    #[test]
    fn test_vfd_events_are_flattened() {
        let value: Value = serde_json::from_str(
            &BridgeEvent::VfdStatus(DriveStatus::default())
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(value["type"], json!("vfd_status"));
        assert_eq!(value["online"], json!(false));
        assert_eq!(value["direction"], json!("FWD"));

        let mut echo = Map::new();
        echo.insert("cmd".to_string(), json!("FWD"));
        echo.insert("ok".to_string(), json!(true));
        let value: Value =
            serde_json::from_str(&BridgeEvent::VfdResponse(echo).to_json().unwrap()).unwrap();
        assert_eq!(value["type"], json!("vfd_response"));
        assert_eq!(value["cmd"], json!("FWD"));
    }
}
