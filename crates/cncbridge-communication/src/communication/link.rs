//! Managed serial link
//!
//! A [`Link`] owns the connection to one controller. It runs the opening
//! sequence (DTR, settle, drain, handshake), reads on a blocking worker and
//! publishes complete lines, serializes writes, and recovers on its own
//! after an I/O failure:
//!
//! ```text
//! Closed -> Opening -> Open -> Degraded -> Reconnecting -> Open
//!                                                   \-> Reconnecting (backoff)
//! any -> Shutdown
//! ```
//!
//! Every transition is published on [`Link::subscribe_state`].

use super::backoff::{Backoff, BackoffConfig};
use super::read_buffer::{ReadBuffer, MAX_BUFFER_SIZE};
use super::transport::{Connector, Transport};
use super::ConnectionParams;
use cncbridge_core::{LinkError, LinkRole, LinkState};
use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const LINE_CHANNEL_CAPACITY: usize = 256;
const STATE_CHANNEL_CAPACITY: usize = 64;
const READ_CHUNK_SIZE: usize = 1024;

/// Opening sequence and recovery tuning for a link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial line parameters
    pub params: ConnectionParams,
    /// Wait after opening before the first drain
    pub settle: Duration,
    /// Assert DTR right after opening
    pub assert_dtr: bool,
    /// Bytes written once the input has been drained
    pub handshake: Vec<u8>,
    /// Wait after the handshake followed by a second drain
    pub post_handshake_drain: Option<Duration>,
    /// Reconnect delay schedule
    pub backoff: BackoffConfig,
    /// Bound on unterminated inbound bytes
    pub read_buffer_limit: usize,
}

impl LinkConfig {
    /// grblHAL motion controller: DTR, 1 s settle, soft reset, 300 ms, drain
    pub fn motion() -> Self {
        Self {
            params: ConnectionParams::default(),
            settle: Duration::from_millis(1000),
            assert_dtr: true,
            handshake: vec![0x18],
            post_handshake_drain: Some(Duration::from_millis(300)),
            backoff: BackoffConfig::default(),
            read_buffer_limit: MAX_BUFFER_SIZE,
        }
    }

    /// ESP32 drive controller: 500 ms settle, drain, status request
    pub fn drive() -> Self {
        Self {
            params: ConnectionParams::default(),
            settle: Duration::from_millis(500),
            assert_dtr: false,
            handshake: b"STATUS\n".to_vec(),
            post_handshake_drain: None,
            backoff: BackoffConfig::default(),
            read_buffer_limit: MAX_BUFFER_SIZE,
        }
    }

    /// Default configuration for a role
    pub fn for_role(role: LinkRole) -> Self {
        match role {
            LinkRole::Motion => Self::motion(),
            LinkRole::Drive => Self::drive(),
        }
    }
}

/// Managed connection to one controller
pub struct Link {
    role: LinkRole,
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    state: RwLock<LinkState>,
    state_tx: broadcast::Sender<LinkState>,
    writer: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    lines_tx: Mutex<Option<broadcast::Sender<String>>>,
    /// Bumped whenever the current transport is retired; readers of an
    /// older generation stop.
    generation: AtomicU64,
    address: RwLock<Option<String>>,
    excluded: RwLock<Vec<String>>,
    last_error: RwLock<Option<String>>,
    backoff: Mutex<Backoff>,
    fault_signal: Notify,
    recovery_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("role", &self.role)
            .field("state", &*self.state.read())
            .field("address", &*self.address.read())
            .finish()
    }
}

impl Link {
    /// Create a closed link
    pub fn new(role: LinkRole, config: LinkConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (lines_tx, _) = broadcast::channel(LINE_CHANNEL_CAPACITY);
        let backoff = Backoff::new(config.backoff.clone());
        Arc::new(Self {
            role,
            config,
            connector,
            state: RwLock::new(LinkState::Closed),
            state_tx,
            writer: tokio::sync::Mutex::new(None),
            lines_tx: Mutex::new(Some(lines_tx)),
            generation: AtomicU64::new(0),
            address: RwLock::new(None),
            excluded: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
            backoff: Mutex::new(backoff),
            fault_signal: Notify::new(),
            recovery_task: Mutex::new(None),
        })
    }

    /// Which controller this link talks to
    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state.read().clone()
    }

    /// Check if the link is ready for traffic
    pub fn is_open(&self) -> bool {
        self.state.read().is_open()
    }

    /// Receive every subsequent state transition
    pub fn subscribe_state(&self) -> broadcast::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Description of the most recent failure, cleared on a successful open
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Last address the link opened or tried to open
    pub fn address(&self) -> Option<String> {
        self.address.read().clone()
    }

    /// Never pick `address` during rediscovery
    pub fn exclude_address(&self, address: impl Into<String>) {
        let address = address.into();
        let mut excluded = self.excluded.write();
        if !excluded.contains(&address) {
            excluded.push(address);
        }
    }

    /// Open the device at `address`
    ///
    /// Does nothing if the link is already open. On failure the link is
    /// left `Closed` and the recovery loop, if running, takes over.
    pub async fn open(self: &Arc<Self>, address: &str) -> Result<(), LinkError> {
        let mut slot = self.writer.lock().await;
        if self.state.read().is_shutdown() {
            return Err(LinkError::Shutdown { role: self.role });
        }
        if slot.is_some() && self.is_open() {
            return Ok(());
        }

        self.transition(LinkState::Opening);
        match self.establish(&mut slot, address).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("{}", e);
                *self.address.write() = Some(address.to_string());
                *self.last_error.write() = Some(e.to_string());
                self.transition(LinkState::Closed);
                self.fault_signal.notify_one();
                Err(e)
            }
        }
    }

    /// Write one complete frame
    ///
    /// Writers are serialized; a frame is handed to the transport whole or
    /// not at all. A transport error degrades the link, except a write
    /// timeout: the device is still there, and reconnecting would reset the
    /// controller.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::NotConnected { role: self.role });
        }

        let mut slot = self.writer.lock().await;
        if !self.is_open() {
            return Err(LinkError::NotConnected { role: self.role });
        }
        let Some(transport) = slot.as_mut() else {
            return Err(LinkError::NotConnected { role: self.role });
        };

        if let Err(e) = transport.write_all(bytes) {
            if e.kind() == io::ErrorKind::TimedOut {
                tracing::warn!("{} link write timed out: {}", self.role, e);
                return Err(LinkError::Transport {
                    role: self.role,
                    reason: e.to_string(),
                });
            }
            let generation = self.generation.load(Ordering::SeqCst);
            slot.take();
            drop(slot);
            self.fault(generation, e.to_string());
            return Err(LinkError::Transport {
                role: self.role,
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Subscribe to lines arriving from now on
    pub fn lines(&self) -> LineReader {
        let rx = match self.lines_tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            // shut down: a receiver whose sender is already gone
            None => broadcast::channel(1).1,
        };
        LineReader {
            role: self.role,
            rx,
        }
    }

    /// Start the background loop that reopens the link whenever it is down
    pub fn spawn_recovery(self: &Arc<Self>) {
        let mut task = self.recovery_task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let link = Arc::clone(self);
        *task = Some(tokio::spawn(async move { link.recovery_loop().await }));
    }

    /// Shut the link down for good
    pub async fn close(&self) {
        self.transition(LinkState::Shutdown);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.recovery_task.lock().take() {
            task.abort();
        }
        self.writer.lock().await.take();
        self.lines_tx.lock().take();
        tracing::info!("{} link shut down", self.role);
    }

    async fn establish(
        self: &Arc<Self>,
        slot: &mut Option<Box<dyn Transport>>,
        address: &str,
    ) -> Result<(), LinkError> {
        let fail = |e: io::Error| LinkError::OpenFailed {
            role: self.role,
            address: address.to_string(),
            reason: e.to_string(),
        };

        let mut transport = self.connector.open(address, &self.config.params).map_err(fail)?;
        if self.config.assert_dtr {
            transport.set_dtr(true).map_err(fail)?;
        }
        if !self.config.settle.is_zero() {
            tokio::time::sleep(self.config.settle).await;
        }
        transport.clear_input().map_err(fail)?;
        if !self.config.handshake.is_empty() {
            transport.write_all(&self.config.handshake).map_err(fail)?;
        }
        if let Some(drain_after) = self.config.post_handshake_drain {
            tokio::time::sleep(drain_after).await;
            transport.clear_input().map_err(fail)?;
        }
        let reader = transport.try_clone().map_err(fail)?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(transport);
        *self.address.write() = Some(address.to_string());
        self.last_error.write().take();
        self.backoff.lock().reset();

        if !self.transition(LinkState::Open) {
            slot.take();
            return Err(LinkError::Shutdown { role: self.role });
        }
        self.spawn_reader(reader, generation);
        tracing::info!("{} link open on {}", self.role, address);
        Ok(())
    }

    fn spawn_reader(self: &Arc<Self>, mut reader: Box<dyn Transport>, generation: u64) {
        let link = Arc::downgrade(self);
        let role = self.role;
        let lines = self.lines_tx.lock().clone();
        let limit = self.config.read_buffer_limit;

        tokio::task::spawn_blocking(move || {
            let mut buffer = ReadBuffer::new(limit);
            let mut chunk = [0u8; READ_CHUNK_SIZE];

            // the reader must not keep a dropped link alive
            while let Some(link) = link.upgrade() {
                if link.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        link.fault(generation, "device closed the connection".to_string());
                        break;
                    }
                    Ok(n) => {
                        for line in buffer.push(&chunk[..n]) {
                            tracing::trace!("{} <- {}", role, line);
                            if let Some(tx) = &lines {
                                // no subscribers is fine
                                let _ = tx.send(line);
                            }
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut
                                | io::ErrorKind::WouldBlock
                                | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        link.fault(generation, e.to_string());
                        break;
                    }
                }
            }
            tracing::debug!("{} reader for generation {} stopped", role, generation);
        });
    }

    /// Take the link down after an I/O failure on `generation`
    ///
    /// Only the first report for a generation counts.
    fn fault(&self, generation: u64, reason: String) {
        if self
            .generation
            .compare_exchange(
                generation,
                generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        if !self.state.read().is_open() {
            return;
        }
        tracing::warn!("{} link degraded: {}", self.role, reason);
        *self.last_error.write() = Some(reason.clone());
        if self.transition_if(LinkState::is_open, LinkState::Degraded { reason }) {
            self.fault_signal.notify_one();
        }
    }

    async fn recovery_loop(self: Arc<Self>) {
        loop {
            let state = self.state();
            if state.is_shutdown() {
                break;
            }
            if state.needs_recovery() {
                self.reconnect().await;
            } else {
                self.fault_signal.notified().await;
            }
        }
    }

    async fn reconnect(self: &Arc<Self>) {
        {
            let mut slot = self.writer.lock().await;
            if !self.is_open() {
                slot.take();
            }
        }

        loop {
            let state = self.state();
            if state.is_shutdown() || state.is_open() {
                return;
            }

            let (attempt, delay) = {
                let mut backoff = self.backoff.lock();
                let delay = backoff.next_delay();
                (backoff.attempt(), delay)
            };
            self.transition_if(LinkState::needs_recovery, LinkState::Reconnecting {
                attempt,
                delay,
            });

            let located = {
                let excluded = self.excluded.read().clone();
                self.connector.locate(self.role, &excluded)
            };
            let candidate = located.or_else(|| self.address());

            match candidate {
                Some(address) => {
                    let mut slot = self.writer.lock().await;
                    if !self.state.read().needs_recovery() {
                        return;
                    }
                    match self.establish(&mut slot, &address).await {
                        Ok(()) => {
                            tracing::info!(
                                "{} link recovered after {} attempt(s)",
                                self.role,
                                attempt
                            );
                            return;
                        }
                        Err(e) => {
                            tracing::debug!("{} reconnect attempt {}: {}", self.role, attempt, e);
                            *self.last_error.write() = Some(e.to_string());
                        }
                    }
                }
                None => {
                    let e = LinkError::NoDevice { role: self.role };
                    tracing::debug!("{} reconnect attempt {}: {}", self.role, attempt, e);
                    *self.last_error.write() = Some(e.to_string());
                }
            }

            tokio::time::sleep(delay).await;
        }
    }

    fn transition(&self, next: LinkState) -> bool {
        self.transition_if(|_| true, next)
    }

    /// Move to `next` if the current state passes `allowed`
    ///
    /// `Shutdown` is terminal. The new state is published while the state
    /// lock is held so subscribers see transitions in order.
    fn transition_if(&self, allowed: impl FnOnce(&LinkState) -> bool, next: LinkState) -> bool {
        let mut state = self.state.write();
        if state.is_shutdown() || !allowed(&state) || *state == next {
            return false;
        }
        tracing::debug!("{} link: {} -> {}", self.role, *state, next);
        *state = next.clone();
        // no subscribers is fine
        let _ = self.state_tx.send(next);
        true
    }
}

/// Lines received on a link
///
/// Keeps yielding across reconnections; ends once the link is shut down.
#[derive(Debug)]
pub struct LineReader {
    role: LinkRole,
    rx: broadcast::Receiver<String>,
}

impl LineReader {
    /// Next complete line, or `None` after shutdown
    pub async fn next(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} line reader lagged, {} line(s) dropped", self.role, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
