//! Drive controller line decoder

use serde_json::{Map, Value};

/// One decoded line from the drive controller
#[derive(Debug, Clone, PartialEq)]
pub enum DriveMessage {
    /// `{"vfd": {...}}` status report; holds the inner object
    Status(Map<String, Value>),
    /// `{"cmd": ..., ...}` command acknowledgement; holds the whole object
    CommandEcho(Map<String, Value>),
    /// `{"error": ...}` report; holds the error value
    Error(Value),
    /// JSON object with none of the known keys
    Other(Map<String, Value>),
    /// Line looked like JSON but did not decode
    Unparsed {
        /// The raw line
        line: String,
        /// Decoder message
        reason: String,
    },
    /// Free-text diagnostic
    Text(String),
    /// Free-text line tagged `[DEBUG]`
    Debug(String),
}

/// Decoder for drive controller lines
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveResponseParser;

impl DriveResponseParser {
    /// Create a parser
    pub fn new() -> Self {
        Self
    }

    /// Decode one line
    ///
    /// A `vfd` key wins over `cmd`, which wins over `error`.
    pub fn parse(&self, line: &str) -> DriveMessage {
        let line = line.trim();

        if !line.starts_with('{') {
            if line.starts_with("[DEBUG]") {
                return DriveMessage::Debug(line.to_string());
            }
            return DriveMessage::Text(line.to_string());
        }

        let mut object = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return DriveMessage::Unparsed {
                    line: line.to_string(),
                    reason: "not a JSON object".to_string(),
                }
            }
            Err(e) => {
                return DriveMessage::Unparsed {
                    line: line.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        match object.get("vfd") {
            Some(Value::Object(status)) => return DriveMessage::Status(status.clone()),
            Some(other) => {
                return DriveMessage::Unparsed {
                    line: line.to_string(),
                    reason: format!("vfd is not an object: {}", other),
                }
            }
            None => {}
        }

        if object.contains_key("cmd") {
            return DriveMessage::CommandEcho(object);
        }

        if let Some(error) = object.remove("error") {
            return DriveMessage::Error(error);
        }

        DriveMessage::Other(object)
    }
}
