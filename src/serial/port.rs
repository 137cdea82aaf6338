//! Serial port configuration and connection management
//!
//! Opens the device the monitor reads from and exposes it to the read loop
//! through the [`SerialLink`] trait.

use crate::error::{MonitorError, Result};
use anyhow::Context;
use colored::Colorize;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read};
use std::time::Duration;

/// Default serial port on Windows hosts
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM6";

/// Default serial port on Unix hosts (first USB-to-serial adapter)
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate for ESP32 boot logs
pub const DEFAULT_BAUD: u32 = 115200;

/// Read timeout used by the monitor so a read never blocks for long
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for serial port connection
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyUSB0, COM6)
    pub port_path: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Data bits (default: 8)
    pub data_bits: DataBits,
    /// Parity (default: None)
    pub parity: Parity,
    /// Stop bits (default: 1)
    pub stop_bits: StopBits,
    /// Flow control (default: None)
    pub flow_control: FlowControl,
    /// Read timeout
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from(DEFAULT_PORT),
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl PortConfig {
    /// Create a new configuration with 8N1 settings for the given port
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What the read loop needs from an open serial device.
///
/// Line-control failures are reported as [`io::Error`] so they share the
/// connection-level failure path with reads.
pub trait SerialLink {
    /// Number of bytes waiting in the input buffer
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read into `buf`, waiting at most the configured timeout
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Set DTR (Data Terminal Ready) signal
    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    /// Set RTS (Request To Send) signal
    fn set_rts(&mut self, level: bool) -> io::Result<()>;

    /// Release the device. Returns `true` only on the call that released it.
    fn close(&mut self) -> bool;
}

impl<L: SerialLink + ?Sized> SerialLink for &mut L {
    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        (**self).set_dtr(level)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        (**self).set_rts(level)
    }

    fn close(&mut self) -> bool {
        (**self).close()
    }
}

/// An open serial device
pub struct SerialConnection {
    port: Option<Box<dyn SerialPort>>,
    config: PortConfig,
}

impl SerialConnection {
    /// Open a serial connection with the given configuration
    pub fn open(config: PortConfig) -> Result<Self> {
        log::debug!(
            "opening {} at {} baud (timeout {:?})",
            config.port_path,
            config.baud_rate,
            config.timeout
        );

        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()
            .map_err(|source| MonitorError::PortUnavailable {
                port: config.port_path.clone(),
                source,
            })?;

        Ok(Self::from_port(port, config))
    }

    pub(crate) fn from_port(port: Box<dyn SerialPort>, config: PortConfig) -> Self {
        Self {
            port: Some(port),
            config,
        }
    }

    /// Get the port configuration
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl SerialLink for SerialConnection {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let waiting = self.port_mut()?.bytes_to_read().map_err(io::Error::from)?;
        Ok(waiting as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port_mut()?.read(buf)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port_mut()?
            .write_data_terminal_ready(level)
            .map_err(io::Error::from)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.port_mut()?
            .write_request_to_send(level)
            .map_err(io::Error::from)
    }

    fn close(&mut self) -> bool {
        match self.port.take() {
            Some(port) => {
                drop(port);
                log::debug!("released {}", self.config.port_path);
                true
            }
            None => false,
        }
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Information about a detected serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(p: serialport::SerialPortInfo) -> Self {
        let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
            serialport::SerialPortType::UsbPort(info) => (
                PortType::UsbSerial,
                info.manufacturer,
                info.product,
                info.serial_number,
                Some(info.vid),
                Some(info.pid),
            ),
            serialport::SerialPortType::PciPort => {
                (PortType::PciSerial, None, None, None, None, None)
            }
            serialport::SerialPortType::BluetoothPort => {
                (PortType::Bluetooth, None, None, None, None, None)
            }
            serialport::SerialPortType::Unknown => {
                (PortType::Unknown, None, None, None, None, None)
            }
        };

        PortInfo {
            path: p.port_name,
            port_type,
            manufacturer,
            product,
            serial_number,
            vid,
            pid,
        }
    }
}

/// List all available serial ports
pub fn list_ports() -> anyhow::Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports.into_iter().map(PortInfo::from).collect())
}

/// Print formatted list of available serial ports
pub fn print_ports() -> anyhow::Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Connect the board or a USB-to-serial adapter");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        println!("  4. On Windows, check Device Manager under 'Ports (COM & LPT)'");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let Some(ref sn) = port.serial_number {
            println!("  Serial: {}", sn);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("{}", "Use: monitor <PORT> [BAUD_RATE] [--reset]".yellow());

    Ok(())
}
