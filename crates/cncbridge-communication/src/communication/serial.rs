//! Serial port communication implementation
//!
//! Provides low-level serial port operations for the two controllers the
//! bridge talks to over USB.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Picking the likely motion controller and drive controller ports
//! - Baud rate, parity, stop bit, and flow control configuration
//! - Timed blocking reads for the link reader

use super::transport::{Connector, Transport};
use super::{ConnectionParams, SerialParity};
use cncbridge_core::{Error, LinkRole, Result};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Description fragments of USB bridges used by motion controller boards
const MOTION_PORT_HINTS: &[&str] = &["ch340", "stm", "usb-serial"];

/// STMicroelectronics vendor ID (native USB on STM32 grblHAL boards)
const MOTION_PORT_VIDS: &[u16] = &[0x0483];

/// Description fragments of USB bridges used by ESP32 drive controllers
const DRIVE_PORT_HINTS: &[&str] = &["cp210", "ch340", "ftdi", "usb serial"];

/// Silicon Labs vendor ID (CP210x)
const DRIVE_PORT_VIDS: &[u16] = &[0x10C4];

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB QinHeng USB Serial")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    fn matches(&self, hints: &[&str], vids: &[u16]) -> bool {
        let description = self.description.to_lowercase();
        hints.iter().any(|hint| description.contains(hint))
            || self.vid.is_some_and(|vid| vids.contains(&vid))
    }
}

/// List available serial ports on the system
///
/// Filters ports to include only USB controller patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*, /dev/cu.SLAB_USBtoUART*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => {
            let port_infos: Vec<SerialPortInfo> = ports
                .iter()
                .filter(|port| is_controller_port(&port.port_name))
                .map(|port| {
                    let info = SerialPortInfo::new(&port.port_name, get_port_description(port));

                    match &port.port_type {
                        serialport::SerialPortType::UsbPort(usb_info) => {
                            let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                            if let Some(ref mfg) = usb_info.manufacturer {
                                info = info.with_manufacturer(mfg);
                            }
                            if let Some(ref serial) = usb_info.serial_number {
                                info = info.with_serial_number(serial);
                            }
                            info
                        }
                        _ => info,
                    }
                })
                .collect();

            Ok(port_infos)
        }
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

/// Pick the port most likely to be the motion controller
///
/// Prefers known USB bridge chips and falls back to the first port that is
/// not excluded.
pub fn find_motion_port(ports: &[SerialPortInfo], exclude: &[String]) -> Option<String> {
    let candidates: Vec<&SerialPortInfo> = ports
        .iter()
        .filter(|p| !exclude.contains(&p.port_name))
        .collect();

    candidates
        .iter()
        .find(|p| p.matches(MOTION_PORT_HINTS, MOTION_PORT_VIDS))
        .or_else(|| candidates.first())
        .map(|p| p.port_name.clone())
}

/// All ports that look like an ESP32 drive controller
pub fn find_drive_ports(ports: &[SerialPortInfo], exclude: &[String]) -> Vec<String> {
    ports
        .iter()
        .filter(|p| !exclude.contains(&p.port_name))
        .filter(|p| p.matches(DRIVE_PORT_HINTS, DRIVE_PORT_VIDS))
        .map(|p| p.port_name.clone())
        .collect()
}

/// Check if a port name matches USB controller patterns
fn is_controller_port(port_name: &str) -> bool {
    // Windows COM ports
    if let Some(number) = port_name.strip_prefix("COM") {
        return !number.is_empty() && number.chars().all(|c| c.is_ascii_digit());
    }

    // Linux USB and ACM devices
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    // macOS serial and modem devices
    port_name.starts_with("/dev/cu.usbserial")
        || port_name.starts_with("/dev/cu.usbmodem")
        || port_name.starts_with("/dev/cu.SLAB_USBtoUART")
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Convert a parity setting to serialport format
fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

fn invalid_input(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

/// Serial transport backed by the serialport crate
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    write_timeout: Duration,
}

impl SerialTransport {
    /// Open a serial port with the given parameters
    pub fn open(address: &str, params: &ConnectionParams) -> io::Result<Self> {
        let data_bits = match params.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => return Err(invalid_input(format!("Invalid data bits: {}", other))),
        };
        let stop_bits = match params.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => return Err(invalid_input(format!("Invalid stop bits: {}", other))),
        };

        let port = serialport::new(address, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            })
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", address, e);
                io::Error::from(e)
            })?;

        Ok(Self {
            port,
            write_timeout: Duration::from_millis(params.write_timeout_ms),
        })
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Write one whole frame, riding out port timeouts until `limit` elapses
///
/// The port timeout is shared with reads and is short, so a single stalled
/// `write` must not abandon a frame halfway. Bytes already accepted are
/// never resent.
fn write_frame<W: Write + ?Sized>(port: &mut W, data: &[u8], limit: Duration) -> io::Result<()> {
    let deadline = Instant::now() + limit;
    let mut pending = data;
    while !pending.is_empty() {
        match port.write(pending) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => pending = &pending[n..],
            Err(e) if is_transient(&e) && Instant::now() < deadline => {}
            Err(e) => return Err(e),
        }
    }
    loop {
        match port.flush() {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) && Instant::now() < deadline => {}
            Err(e) => return Err(e),
        }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        write_frame(&mut *self.port, data, self.write_timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(io::Error::from)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialTransport {
            port,
            write_timeout: self.write_timeout,
        }))
    }

    fn name(&self) -> String {
        self.port.name().unwrap_or_else(|| "serial_port".to_string())
    }
}

/// Connector for real USB serial devices
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl SerialConnector {
    /// Create a new serial connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SerialConnector {
    fn open(&self, address: &str, params: &ConnectionParams) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(SerialTransport::open(address, params)?))
    }

    fn locate(&self, role: LinkRole, exclude: &[String]) -> Option<String> {
        let ports = list_ports().ok()?;
        match role {
            LinkRole::Motion => find_motion_port(&ports, exclude),
            LinkRole::Drive => find_drive_ports(&ports, exclude).into_iter().next(),
        }
    }
}
