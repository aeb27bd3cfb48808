//! Motion controller response classification
//!
//! Responses are forwarded to sessions untouched. Classification only
//! decides how loudly the bridge logs a line.

/// Kind of line received from the motion controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionResponse {
    /// `ok`
    Ok,
    /// `error:<code>`
    Error(u16),
    /// `ALARM:<code>`
    Alarm(u16),
    /// `<State|...>` status report, carrying the machine state
    Status(String),
    /// Startup banner (`Grbl ...` / `GrblHAL ...`)
    Version(String),
    /// Anything else: `[MSG:...]`, settings, echoes
    Message(String),
}

impl MotionResponse {
    /// Classify one trimmed line
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if line == "ok" {
            return Self::Ok;
        }

        if let Some(code) = strip_prefix_ignore_case(line, "error:") {
            if let Ok(code) = code.trim().parse::<u16>() {
                return Self::Error(code);
            }
        }

        if let Some(code) = strip_prefix_ignore_case(line, "alarm:") {
            if let Ok(code) = code.trim().parse::<u16>() {
                return Self::Alarm(code);
            }
        }

        if line.len() > 2 && line.starts_with('<') && line.ends_with('>') {
            let body = &line[1..line.len() - 1];
            let state = body.split('|').next().unwrap_or_default();
            // substates such as Hold:0 are reported with a colon
            let state = state.split(':').next().unwrap_or_default();
            return Self::Status(state.to_string());
        }

        if line.starts_with("Grbl") {
            return Self::Version(line.to_string());
        }

        Self::Message(line.to_string())
    }

    /// Check if the line reports a failure
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Alarm(_))
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        line.get(prefix.len()..)
    } else {
        None
    }
}
