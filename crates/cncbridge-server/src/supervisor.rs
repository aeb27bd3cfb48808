//! Bridge supervisor
//!
//! Owns every long-lived piece of the bridge. Construction order is motion
//! link, drive link, registry, poller, router; [`BridgeSupervisor::shutdown`]
//! tears them down in reverse.

use crate::poller::StatusPoller;
use crate::protocol::BridgeEvent;
use crate::registry::{ClientRegistry, SessionHandle, SessionId};
use crate::router::MessageRouter;
use cncbridge_communication::firmware::grbl::STATUS_QUERY;
use cncbridge_communication::{BackoffConfig, ConnectionParams, Connector, Link, LinkConfig};
use cncbridge_core::{CapacityError, DriveStatusCell, LinkRole, LinkState, SerialStatus};
use cncbridge_settings::{BridgeConfig, LinkSettings, ReconnectSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Smallest per-session queue; the greeting alone is two messages
const MIN_SESSION_QUEUE: usize = 4;

/// Build a link configuration from settings, on top of the role defaults
pub fn link_config(
    role: LinkRole,
    settings: &LinkSettings,
    reconnect: &ReconnectSettings,
) -> LinkConfig {
    let base = LinkConfig::for_role(role);
    LinkConfig {
        params: ConnectionParams {
            baud_rate: settings.baud_rate,
            timeout_ms: settings.read_timeout_ms,
            write_timeout_ms: settings.write_timeout_ms,
            ..ConnectionParams::default()
        },
        settle: settings.settle_or(base.settle),
        post_handshake_drain: settings
            .drain_delay_ms
            .map(std::time::Duration::from_millis)
            .or(base.post_handshake_drain),
        backoff: BackoffConfig {
            unit: reconnect.unit(),
            cap_units: reconnect.cap_units,
            max_attempts: reconnect.max_attempts,
            slow_retry_units: reconnect.slow_retry_units,
            ..BackoffConfig::default()
        },
        read_buffer_limit: settings.read_buffer_limit,
        ..base
    }
}

/// Owner of the links, sessions, poller, and router
#[derive(Debug)]
pub struct BridgeSupervisor {
    config: BridgeConfig,
    motion: Arc<Link>,
    drive: Option<Arc<Link>>,
    registry: Arc<ClientRegistry>,
    drive_status: Arc<DriveStatusCell>,
    router: Arc<MessageRouter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeSupervisor {
    /// Bring the bridge up
    ///
    /// The motion link is always created; if it cannot be opened now its
    /// recovery loop keeps looking. The drive link exists only when a
    /// drive port is configured or discovered at startup.
    pub async fn start(config: BridgeConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let mut tasks = Vec::new();

        // motion link
        let motion = Link::new(
            LinkRole::Motion,
            link_config(LinkRole::Motion, &config.motion, &config.reconnect),
            Arc::clone(&connector),
        );
        let motion_address = config
            .motion
            .port
            .clone()
            .or_else(|| connector.locate(LinkRole::Motion, &[]));
        match &motion_address {
            Some(address) => {
                tracing::info!("Motion controller on {}", address);
                if let Err(e) = motion.open(address).await {
                    tracing::warn!("Motion controller not available yet: {}", e);
                }
            }
            None => tracing::warn!("No motion controller found, will keep looking"),
        }
        motion.spawn_recovery();

        // drive link
        let excluded: Vec<String> = motion_address.iter().cloned().collect();
        let drive_address = config
            .drive
            .port
            .clone()
            .or_else(|| connector.locate(LinkRole::Drive, &excluded));
        let drive = match drive_address {
            Some(address) => {
                tracing::info!("Drive controller on {}", address);
                let drive = Link::new(
                    LinkRole::Drive,
                    link_config(LinkRole::Drive, &config.drive, &config.reconnect),
                    Arc::clone(&connector),
                );
                for other in &excluded {
                    drive.exclude_address(other.as_str());
                }
                motion.exclude_address(address.as_str());
                if let Err(e) = drive.open(&address).await {
                    tracing::warn!("Drive controller not available yet: {}", e);
                }
                drive.spawn_recovery();
                Some(drive)
            }
            None => {
                tracing::info!("No drive controller found, spindle drive disabled");
                None
            }
        };

        // registry
        let registry = Arc::new(ClientRegistry::new(config.server.max_clients));
        let drive_status = Arc::new(DriveStatusCell::new());

        // poller
        let poller = StatusPoller::new(
            Arc::clone(&motion),
            drive.clone(),
            Arc::clone(&registry),
            config.polling.motion_interval(),
            config.polling.drive_interval(),
        );
        tasks.extend(poller.spawn());

        // router
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&motion),
            drive.clone(),
            Arc::clone(&registry),
            Arc::clone(&drive_status),
        ));
        tasks.extend(router.spawn_forwarders());
        tasks.push(spawn_motion_watcher(&motion, &router));
        if let Some(drive) = &drive {
            tasks.push(spawn_drive_watcher(drive, &router, &drive_status));
        }

        Arc::new(Self {
            config,
            motion,
            drive,
            registry,
            drive_status,
            router,
            tasks: Mutex::new(tasks),
        })
    }

    /// Admit a new session
    ///
    /// The session's queue starts with the current `bridge_status`, then the
    /// drive snapshot when a drive link exists. If the motion link is open
    /// a status report is requested so the session gets one promptly.
    pub async fn connect_session(
        &self,
    ) -> Result<(SessionId, mpsc::Receiver<String>), CapacityError> {
        let (tx, rx) = mpsc::channel(self.config.server.session_queue.max(MIN_SESSION_QUEUE));
        let session = SessionHandle::new(tx);
        let id = session.id();

        let greeted = self.bridge_status();
        for event in self.greeting(&greeted) {
            match event.to_json() {
                Ok(text) => {
                    session.try_send(text);
                }
                Err(e) => tracing::error!("Failed to serialize {:?}: {}", event, e),
            }
        }

        self.admit(session, &greeted)?;

        if self.motion.is_open() {
            if let Err(e) = self.motion.write(&[STATUS_QUERY]).await {
                tracing::debug!("Status request for new session failed: {}", e);
            }
        }
        Ok((id, rx))
    }

    /// Register a greeted session
    ///
    /// A transition broadcast between building the greeting and registering
    /// never reaches the session, so the status is checked again once it
    /// is registered and resent if it moved.
    fn admit(&self, session: SessionHandle, greeted: &BridgeEvent) -> Result<(), CapacityError> {
        let id = session.id();
        self.registry.register(session)?;

        let current = self.bridge_status();
        if current != *greeted {
            match current.to_json() {
                Ok(text) => {
                    self.registry.send_to(id, &text);
                }
                Err(e) => tracing::error!("Failed to serialize {:?}: {}", current, e),
            }
        }
        Ok(())
    }

    /// Forget a session; safe to call more than once
    pub fn disconnect_session(&self, id: SessionId) {
        self.registry.unregister(id);
    }

    /// Route one text frame from a session
    pub async fn handle_inbound(&self, id: SessionId, text: &str) {
        self.router.handle_inbound(id, text).await;
    }

    /// Current motion status as sent to sessions
    pub fn bridge_status(&self) -> BridgeEvent {
        status_event(&self.motion, &self.motion.state())
    }

    fn greeting(&self, status: &BridgeEvent) -> Vec<BridgeEvent> {
        let mut events = vec![status.clone()];
        if self.drive.is_some() {
            events.push(BridgeEvent::VfdStatus((*self.drive_status.load()).clone()));
        }
        events
    }

    /// Configuration the bridge was started with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Motion controller link
    pub fn motion(&self) -> &Arc<Link> {
        &self.motion
    }

    /// Drive controller link, if one was found
    pub fn drive(&self) -> Option<&Arc<Link>> {
        self.drive.as_ref()
    }

    /// Connected sessions
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Last known drive snapshot
    pub fn drive_status(&self) -> &Arc<DriveStatusCell> {
        &self.drive_status
    }

    /// Stop background tasks, then close the drive and motion links
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks.into_iter().rev() {
            task.abort();
        }
        if let Some(drive) = &self.drive {
            drive.close().await;
        }
        self.motion.close().await;
        tracing::info!("Bridge shut down");
    }
}

fn status_event(motion: &Link, state: &LinkState) -> BridgeEvent {
    let serial = state.serial_status().unwrap_or(SerialStatus::Disconnected);
    let error = match (serial, state) {
        (SerialStatus::Connected, _) => None,
        (_, LinkState::Degraded { reason }) => Some(reason.clone()),
        _ => motion
            .last_error()
            .or_else(|| Some(format!("{} link not connected", motion.role()))),
    };
    BridgeEvent::BridgeStatus { serial, error }
}

/// Broadcast `bridge_status` on every client-visible motion transition
fn spawn_motion_watcher(motion: &Arc<Link>, router: &Arc<MessageRouter>) -> JoinHandle<()> {
    let mut states = motion.subscribe_state();
    let motion = Arc::clone(motion);
    let router = Arc::clone(router);
    tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(state) => {
                    if state.serial_status().is_some() {
                        router.publish(&status_event(&motion, &state));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Motion state watcher lagged by {} transitions", skipped);
                    router.publish(&status_event(&motion, &motion.state()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Mark the drive offline when its link goes down
fn spawn_drive_watcher(
    drive: &Arc<Link>,
    router: &Arc<MessageRouter>,
    drive_status: &Arc<DriveStatusCell>,
) -> JoinHandle<()> {
    let mut states = drive.subscribe_state();
    let router = Arc::clone(router);
    let drive_status = Arc::clone(drive_status);
    tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(LinkState::Degraded { reason }) => {
                    tracing::warn!("Drive controller lost: {}", reason);
                    let status = drive_status.mark_offline();
                    router.publish(&BridgeEvent::VfdStatus((*status).clone()));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}
