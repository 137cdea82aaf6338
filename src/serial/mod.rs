//! Serial port access for the monitor
//!
//! This module provides:
//! - Opening and closing the serial device
//! - The DTR/RTS reset sequence for ESP32-style boards
//! - The polling read loop that streams decoded text to the console

pub mod monitor;
pub mod port;
pub mod reset;

pub use monitor::MonitorConfig;
pub use port::{PortConfig, SerialConnection, SerialLink};
pub use reset::ResetSequence;
