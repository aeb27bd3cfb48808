//! Message routing between sessions and links
//!
//! Session → link: decode, validate, frame, write.
//! Link → session: motion lines verbatim, drive lines decoded into
//! status snapshots and command echoes.

use crate::protocol::{BridgeEvent, InboundFrame};
use crate::registry::{ClientRegistry, SessionId};
use cncbridge_communication::firmware::drive;
use cncbridge_communication::{DriveMessage, DriveResponseParser, Link, MotionResponse, SafetyGate};
use cncbridge_core::{DriveStatusCell, Error, LinkRole, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Routes traffic between sessions and the two links
#[derive(Debug)]
pub struct MessageRouter {
    motion: Arc<Link>,
    drive: Option<Arc<Link>>,
    registry: Arc<ClientRegistry>,
    drive_status: Arc<DriveStatusCell>,
    parser: DriveResponseParser,
}

impl MessageRouter {
    /// Create a router
    pub fn new(
        motion: Arc<Link>,
        drive: Option<Arc<Link>>,
        registry: Arc<ClientRegistry>,
        drive_status: Arc<DriveStatusCell>,
    ) -> Self {
        Self {
            motion,
            drive,
            registry,
            drive_status,
            parser: DriveResponseParser::new(),
        }
    }

    /// Handle one text frame from a session
    ///
    /// Failures are logged; the session always stays connected.
    pub async fn handle_inbound(&self, session: SessionId, text: &str) {
        let result = match InboundFrame::decode(text) {
            Ok(frame) => self.route(frame).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {}
            Err(Error::Validation(e)) => {
                tracing::warn!("Rejected command from session {}: {}", session, e);
            }
            Err(Error::Decode(e)) => {
                tracing::warn!("Dropped message from session {}: {}", session, e);
            }
            Err(e) => {
                tracing::warn!("Command from session {} not delivered: {}", session, e);
            }
        }
    }

    /// Deliver a decoded frame to its link
    pub async fn route(&self, frame: InboundFrame) -> Result<()> {
        match frame {
            InboundFrame::RawCommand(command) => {
                let command = command.trim();
                if command.is_empty() {
                    return Ok(());
                }
                SafetyGate::validate_line(command)?;
                tracing::debug!("motion -> {}", command);
                self.motion.write(format!("{}\n", command).as_bytes()).await?;
            }
            InboundFrame::RealtimeSignal(byte) => {
                let command = SafetyGate::validate(byte)?;
                tracing::debug!("motion -> realtime {}", command);
                self.motion.write(&[command.as_byte()]).await?;
            }
            InboundFrame::DriveCommand(command) => {
                let command = command.trim();
                if command.is_empty() {
                    return Ok(());
                }
                drive::validate_command(command)?;
                let Some(drive) = &self.drive else {
                    tracing::info!("No drive controller, dropping command {:?}", command);
                    return Ok(());
                };
                tracing::debug!("drive -> {}", command);
                drive.write(format!("{}\n", command).as_bytes()).await?;
            }
        }
        Ok(())
    }

    /// Broadcast one motion controller line
    pub fn handle_motion_line(&self, line: &str) {
        match MotionResponse::parse(line) {
            MotionResponse::Ok | MotionResponse::Status(_) => {
                tracing::trace!("motion <- {}", line)
            }
            response if response.is_fault() => tracing::warn!("motion <- {}", line),
            _ => tracing::debug!("motion <- {}", line),
        }
        self.registry.broadcast(line);
    }

    /// Decode one drive controller line and publish what it carries
    pub fn handle_drive_line(&self, line: &str) {
        match self.parser.parse(line) {
            DriveMessage::Status(update) => match self.drive_status.apply_update(&update) {
                Ok(status) => self.publish(&BridgeEvent::VfdStatus((*status).clone())),
                Err(e) => tracing::warn!("Ignoring drive status {}: {}", line, e),
            },
            DriveMessage::CommandEcho(echo) => self.publish(&BridgeEvent::VfdResponse(echo)),
            DriveMessage::Error(error) => tracing::warn!("Drive controller error: {}", error),
            DriveMessage::Other(_) => tracing::debug!("Unhandled drive message: {}", line),
            DriveMessage::Unparsed { reason, .. } => {
                tracing::debug!("Unparsed drive line {}: {}", line, reason)
            }
            DriveMessage::Text(text) => tracing::info!("[drive] {}", text),
            DriveMessage::Debug(text) => tracing::trace!("[drive] {}", text),
        }
    }

    /// Serialize and broadcast an event
    pub fn publish(&self, event: &BridgeEvent) {
        match event.to_json() {
            Ok(text) => {
                self.registry.broadcast(&text);
            }
            Err(e) => tracing::error!("Failed to serialize {:?}: {}", event, e),
        }
    }

    /// Start forwarding link lines to sessions, one task per link
    pub fn spawn_forwarders(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let router = Arc::clone(self);
        let mut lines = self.motion.lines();
        tasks.push(tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                router.handle_motion_line(&line);
            }
            tracing::debug!("{} forwarder stopped", LinkRole::Motion);
        }));

        if let Some(drive) = &self.drive {
            let router = Arc::clone(self);
            let mut lines = drive.lines();
            tasks.push(tokio::spawn(async move {
                while let Some(line) = lines.next().await {
                    router.handle_drive_line(&line);
                }
                tracing::debug!("{} forwarder stopped", LinkRole::Drive);
            }));
        }

        tasks
    }
}
