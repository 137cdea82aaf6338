//! Serial Monitor
//!
//! A minimal serial terminal for ESP32-style boards: opens a port, optionally
//! pulses DTR/RTS to reset the board, and streams whatever it prints to the
//! console until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Monitor the default port at 115200 baud
//! monitor
//!
//! # Monitor a specific port and baud rate, resetting the board first
//! monitor /dev/ttyUSB0 115200 --reset
//!
//! # List available serial ports
//! monitor --list-ports
//! ```

mod error;
mod serial;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use error::MonitorError;
use serial::port::{DEFAULT_BAUD, DEFAULT_PORT};
use serial::MonitorConfig;

/// Serial Monitor
///
/// Streams serial output from a device to the console
#[derive(Parser, Debug)]
#[command(name = "monitor")]
#[command(version)]
#[command(about = "Minimal serial terminal with optional ESP32 reset")]
struct Cli {
    /// Serial port (e.g., COM6, /dev/ttyUSB0)
    #[arg(default_value = DEFAULT_PORT)]
    port: String,

    /// Baud rate
    #[arg(default_value_t = DEFAULT_BAUD, value_parser = parse_baud_rate)]
    baud_rate: u32,

    /// Reset the board via DTR/RTS after connecting
    #[arg(long)]
    reset: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Baud rates must be positive integers
fn parse_baud_rate(value: &str) -> std::result::Result<u32, MonitorError> {
    match value.trim().parse::<u32>() {
        Ok(0) => Err(MonitorError::InvalidArgument(
            "baud rate must be greater than zero".to_string(),
        )),
        Ok(baud) => Ok(baud),
        Err(_) => Err(MonitorError::InvalidArgument(format!(
            "baud rate must be an integer, got '{}'",
            value
        ))),
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(err) = run(cli) {
        let monitor_err = err.downcast_ref::<MonitorError>();

        eprintln!("{} {}", "[ERROR]".red().bold(), err);
        if let Some(hint) = monitor_err.and_then(MonitorError::hint) {
            eprintln!("{} {}", "HINT:".yellow().bold(), hint);
        }

        std::process::exit(monitor_err.map_or(1, MonitorError::exit_code));
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_ports {
        return serial::port::print_ports();
    }

    let config = MonitorConfig::new(&cli.port, cli.baud_rate, cli.reset);

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(Arc::clone(&running))?;

    let stats = serial::monitor::run_monitor(config, running)?;
    log::info!("received {} bytes", stats.bytes_read);

    Ok(())
}

/// Setup Ctrl+C signal handler
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")
}
