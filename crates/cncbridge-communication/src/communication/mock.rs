//! In-memory devices
//!
//! [`MockDevice`] stands in for a controller on the far end of a serial
//! cable: it records every write as one call, serves bytes pushed with
//! [`MockDevice::push_input`], and can be unplugged and plugged back in.
//! [`MockConnector`] maps addresses to devices.

use super::transport::{Connector, Transport};
use super::ConnectionParams;
use cncbridge_core::LinkRole;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long an idle mock read blocks before reporting a timeout
const IDLE_READ: Duration = Duration::from_millis(2);

#[derive(Debug, Default)]
struct DeviceState {
    writes: Mutex<Vec<Vec<u8>>>,
    stream: Mutex<Vec<u8>>,
    inbound: Mutex<VecDeque<u8>>,
    unplugged: AtomicBool,
    epoch: AtomicU64,
    opens: AtomicUsize,
    drains: AtomicUsize,
    dtr: AtomicBool,
    stalled: AtomicBool,
}

/// Simulated controller
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<DeviceState>,
}

impl MockDevice {
    /// Create a plugged-in device
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the link to read
    pub fn push_input(&self, bytes: &[u8]) {
        self.state.inbound.lock().extend(bytes.iter().copied());
    }

    /// Every `write_all` call, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.writes.lock().clone()
    }

    /// All written bytes as one stream
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.stream.lock().clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.state.writes.lock().clear();
        self.state.stream.lock().clear();
    }

    /// Pull the cable: open handles fail and new opens are refused
    pub fn unplug(&self) {
        self.state.unplugged.store(true, Ordering::SeqCst);
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Plug the cable back in
    pub fn plug_in(&self) {
        self.state.unplugged.store(false, Ordering::SeqCst);
    }

    /// Make writes time out without accepting any bytes, like a device
    /// that stopped draining its input
    pub fn stall_writes(&self, stalled: bool) {
        self.state.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Check if the device accepts opens
    pub fn is_present(&self) -> bool {
        !self.state.unplugged.load(Ordering::SeqCst)
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of input drains
    pub fn drain_count(&self) -> usize {
        self.state.drains.load(Ordering::SeqCst)
    }

    /// Current DTR level
    pub fn dtr(&self) -> bool {
        self.state.dtr.load(Ordering::SeqCst)
    }

    fn connect(&self, name: &str) -> io::Result<MockTransport> {
        if !self.is_present() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not present", name),
            ));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransport {
            device: self.clone(),
            epoch: self.state.epoch.load(Ordering::SeqCst),
            name: name.to_string(),
        })
    }
}

/// Transport handle onto a [`MockDevice`]
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    epoch: u64,
    name: String,
}

impl MockTransport {
    fn check(&self) -> io::Result<()> {
        let state = &self.device.state;
        if state.unplugged.load(Ordering::SeqCst) || state.epoch.load(Ordering::SeqCst) != self.epoch
        {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{} disconnected", self.name),
            ));
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.check()?;
        if self.device.state.stalled.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "write stalled"));
        }
        // one byte per lock so concurrent unserialized writers interleave
        for byte in data {
            self.device.state.stream.lock().push(*byte);
            std::thread::yield_now();
        }
        self.device.state.writes.lock().push(data.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        let n = {
            let mut inbound = self.device.state.inbound.lock();
            let n = inbound.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n == 0 {
            std::thread::sleep(IDLE_READ);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.check()?;
        self.device.state.inbound.lock().clear();
        self.device.state.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.check()?;
        self.device.state.dtr.store(level, Ordering::SeqCst);
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        self.check()?;
        Ok(Box::new(MockTransport {
            device: self.device.clone(),
            epoch: self.epoch,
            name: self.name.clone(),
        }))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Connector over a fixed set of mock devices
#[derive(Debug, Default)]
pub struct MockConnector {
    devices: Mutex<Vec<(String, LinkRole, MockDevice)>>,
}

impl MockConnector {
    /// Create a connector with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device at `address`, discoverable for `role`
    pub fn attach(&self, address: impl Into<String>, role: LinkRole, device: MockDevice) {
        self.devices.lock().push((address.into(), role, device));
    }
}

impl Connector for MockConnector {
    fn open(&self, address: &str, _params: &ConnectionParams) -> io::Result<Box<dyn Transport>> {
        let device = self
            .devices
            .lock()
            .iter()
            .find(|(addr, _, _)| addr == address)
            .map(|(_, _, device)| device.clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no device at {}", address))
            })?;
        Ok(Box::new(device.connect(address)?))
    }

    fn locate(&self, role: LinkRole, exclude: &[String]) -> Option<String> {
        self.devices
            .lock()
            .iter()
            .find(|(addr, r, device)| *r == role && device.is_present() && !exclude.contains(addr))
            .map(|(addr, _, _)| addr.clone())
    }
}
