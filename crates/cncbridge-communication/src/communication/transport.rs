//! Transport seam
//!
//! A [`Link`](super::link::Link) never touches a serial port directly. It
//! asks a [`Connector`] to open an address and then talks to the returned
//! [`Transport`]. The real implementation is
//! [`SerialConnector`](super::serial::SerialConnector); tests use the
//! in-memory `MockConnector` behind the `test-util` feature.

use super::ConnectionParams;
use cncbridge_core::LinkRole;
use std::io;

/// Low-level byte transport to one device
pub trait Transport: Send {
    /// Write the whole buffer or fail
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read available bytes
    ///
    /// Blocks for at most the configured read timeout. An idle timeout is
    /// reported as `ErrorKind::TimedOut`; `Ok(0)` means the device is gone.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard everything the device has sent but nobody has read yet
    fn clear_input(&mut self) -> io::Result<()>;

    /// Drive the DTR line
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Independent handle to the same device, used by the reader
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;

    /// Device name for logging
    fn name(&self) -> String;
}

/// Opens transports and finds candidate devices
pub trait Connector: Send + Sync {
    /// Open the device at `address`
    fn open(&self, address: &str, params: &ConnectionParams) -> io::Result<Box<dyn Transport>>;

    /// Find a device address that looks like the controller for `role`
    ///
    /// Addresses in `exclude` belong to other links and must not be returned.
    fn locate(&self, role: LinkRole, exclude: &[String]) -> Option<String>;
}
