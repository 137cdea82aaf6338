//! Serial output monitor
//!
//! Polls the port for available bytes, decodes them lossily as UTF-8, and
//! streams the text to the console until Ctrl+C or an I/O failure. The port
//! is closed exactly once on every exit path.

use crate::error::{MonitorError, Result};
use crate::serial::port::DEFAULT_READ_TIMEOUT;
use crate::serial::{PortConfig, ResetSequence, SerialConnection, SerialLink};
use colored::Colorize;
use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sleep between polls when no bytes are waiting
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for serial monitoring
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Port configuration
    pub port_config: PortConfig,
    /// Pulse DTR/RTS to reset the board after connecting
    pub reset_on_connect: bool,
    /// Idle sleep between polls
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port_config: PortConfig::default(),
            reset_on_connect: false,
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl MonitorConfig {
    pub fn new(port: &str, baud_rate: u32, reset_on_connect: bool) -> Self {
        Self {
            port_config: PortConfig::new(port)
                .with_baud_rate(baud_rate)
                .with_timeout(DEFAULT_READ_TIMEOUT),
            reset_on_connect,
            ..Default::default()
        }
    }
}

/// Why the read loop stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Ctrl+C
    Interrupted,
}

/// Counters for one monitoring session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub bytes_read: usize,
    pub chunks: usize,
    pub warnings: usize,
}

/// Decode a chunk as UTF-8, replacing malformed sequences with U+FFFD.
pub fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = text {
        log::debug!("replaced invalid UTF-8 in {}-byte chunk", bytes.len());
    }
    text
}

/// Read loop over a [`SerialLink`], writing decoded text to `out`
pub struct SerialMonitor<L: SerialLink, W: Write> {
    link: L,
    out: W,
    config: MonitorConfig,
    running: Arc<AtomicBool>,
    stats: MonitorStats,
}

impl<L: SerialLink, W: Write> SerialMonitor<L, W> {
    pub fn new(link: L, out: W, config: MonitorConfig, running: Arc<AtomicBool>) -> Self {
        Self {
            link,
            out,
            config,
            running,
            stats: MonitorStats::default(),
        }
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Run the optional reset, then poll until stopped.
    pub fn start(&mut self) -> Result<StopReason> {
        if self.config.reset_on_connect {
            self.reset()?;
        }

        writeln!(self.out, "{}", "Press Ctrl+C to exit.".yellow())?;
        self.out.flush()?;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(StopReason::Interrupted);
            }

            match self.poll_once() {
                Ok(true) => {}
                Ok(false) => thread::sleep(self.config.poll_interval),
                Err(e) if e.is_recoverable() => {
                    self.stats.warnings += 1;
                    log::warn!("{}", e);
                    writeln!(self.out, "\n[Read Error: {}]", e)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pulse DTR/RTS to reset the attached board
    fn reset(&mut self) -> Result<()> {
        writeln!(self.out, "{} Resetting...", "[*]".cyan().bold())?;
        self.out.flush()?;

        ResetSequence::hard_reset().run(&mut self.link)?;

        writeln!(self.out, "{} Reset complete. Listening...", "[OK]".green().bold())?;
        Ok(())
    }

    /// One iteration: returns whether any bytes were handled.
    fn poll_once(&mut self) -> Result<bool> {
        let available = self.link.bytes_available()?;
        if available == 0 {
            return Ok(false);
        }

        let mut buf = vec![0u8; available];
        let n = match self.link.read(&mut buf) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => return Err(MonitorError::ReadWarning(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        let text = decode_lossy(&buf[..n]);
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;

        self.stats.bytes_read += n;
        self.stats.chunks += 1;
        Ok(true)
    }

    /// Release the port, announcing it the one time it actually closes.
    pub fn close(&mut self) -> bool {
        let closed = self.link.close();
        if closed {
            // The port is already released; a failing stdout changes nothing.
            let _ = writeln!(self.out, "Serial port closed.");
            let _ = self.out.flush();
        }
        closed
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Drive a session on an already-open link and close it on every path.
pub fn run_session<L: SerialLink, W: Write>(
    link: L,
    out: W,
    config: MonitorConfig,
    running: Arc<AtomicBool>,
) -> Result<MonitorStats> {
    let mut monitor = SerialMonitor::new(link, out, config, running);

    let outcome = monitor.start();
    if let Ok(StopReason::Interrupted) = outcome {
        let _ = writeln!(monitor.out, "\nExiting...");
    }
    monitor.close();

    let stats = monitor.stats().clone();
    log::debug!(
        "session ended: {} bytes in {} chunks, {} read warnings",
        stats.bytes_read,
        stats.chunks,
        stats.warnings
    );

    outcome.map(|_| stats)
}

/// Open the configured port and monitor it on stdout.
pub fn run_monitor(config: MonitorConfig, running: Arc<AtomicBool>) -> Result<MonitorStats> {
    let connection = SerialConnection::open(config.port_config.clone())?;

    println!(
        "{} Connected to {} at {} baud.",
        "[OK]".green().bold(),
        connection.config().port_path.white().bold(),
        connection.config().baud_rate
    );

    run_session(connection, io::stdout(), config, running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::reset::LineState;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    enum Event {
        Data(&'static [u8]),
        Idle,
        ReadFails(io::ErrorKind),
        PollFails(io::ErrorKind),
    }

    /// Plays back a script of events, then behaves like Ctrl+C was pressed.
    struct ScriptedLink {
        events: VecDeque<Event>,
        pending: Option<io::Result<&'static [u8]>>,
        running: Arc<AtomicBool>,
        closes: Rc<Cell<usize>>,
        open: bool,
        lines: Vec<LineState>,
        dtr: bool,
        bytes_handed_out: Rc<Cell<usize>>,
    }

    impl ScriptedLink {
        fn new(events: Vec<Event>, running: Arc<AtomicBool>) -> Self {
            Self {
                events: events.into(),
                pending: None,
                running,
                closes: Rc::new(Cell::new(0)),
                open: true,
                lines: Vec::new(),
                dtr: false,
                bytes_handed_out: Rc::new(Cell::new(0)),
            }
        }
    }

    impl SerialLink for ScriptedLink {
        fn bytes_available(&mut self) -> io::Result<usize> {
            match self.events.pop_front() {
                Some(Event::Data(bytes)) => {
                    self.pending = Some(Ok(bytes));
                    Ok(bytes.len())
                }
                Some(Event::ReadFails(kind)) => {
                    self.pending = Some(Err(io::Error::new(kind, "scripted read failure")));
                    Ok(1)
                }
                Some(Event::PollFails(kind)) => Err(io::Error::new(kind, "scripted poll failure")),
                Some(Event::Idle) => Ok(0),
                None => {
                    self.running.store(false, Ordering::SeqCst);
                    Ok(0)
                }
            }
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.pending.take() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    self.bytes_handed_out.set(self.bytes_handed_out.get() + bytes.len());
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        fn set_dtr(&mut self, level: bool) -> io::Result<()> {
            self.dtr = level;
            Ok(())
        }

        fn set_rts(&mut self, level: bool) -> io::Result<()> {
            self.lines.push(LineState { dtr: self.dtr, rts: level });
            Ok(())
        }

        fn close(&mut self) -> bool {
            self.closes.set(self.closes.get() + 1);
            std::mem::replace(&mut self.open, false)
        }
    }

    fn session(events: Vec<Event>, reset: bool) -> (Result<MonitorStats>, String, usize) {
        let running = Arc::new(AtomicBool::new(true));
        let link = ScriptedLink::new(events, Arc::clone(&running));
        let closes = Rc::clone(&link.closes);
        let mut out = Vec::new();
        let config = MonitorConfig {
            reset_on_connect: reset,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };

        let result = run_session(link, &mut out, config, running);
        (result, String::from_utf8_lossy(&out).into_owned(), closes.get())
    }

    #[test]
    fn test_decode_lossy_replaces_invalid_sequences() {
        assert_eq!(decode_lossy(b"boot\xffok"), "boot\u{FFFD}ok");
        assert!(matches!(decode_lossy(b"ets Jun  8 2016"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_text_is_streamed_without_added_line_breaks() {
        let (result, out, _) = session(
            vec![Event::Data(b"rst:0x1 (POWERON"), Event::Idle, Event::Data(b"_RESET)\r\n")],
            false,
        );

        let stats = result.unwrap();
        assert!(out.contains("rst:0x1 (POWERON_RESET)\r\n"));
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.bytes_read, 25);
    }

    #[test]
    fn test_invalid_bytes_do_not_stop_the_loop() {
        let (result, out, _) = session(
            vec![Event::Data(b"\xe2\x28\xa1 garbage"), Event::Data(b"ready")],
            false,
        );

        assert!(result.is_ok());
        assert!(out.contains('\u{FFFD}'));
        assert!(out.contains(" garbage"));
        assert!(out.contains("ready"));
    }

    #[test]
    fn test_interrupt_closes_once_and_exits_cleanly() {
        let (result, out, closes) = session(vec![Event::Data(b"hello")], false);

        assert!(result.is_ok());
        assert_eq!(closes, 1);
        assert!(out.contains("Exiting..."));
        assert!(out.contains("Serial port closed."));
        assert!(out.find("Exiting...") < out.find("Serial port closed."));
    }

    #[test]
    fn test_fatal_read_error_stops_loop_and_closes() {
        let (result, out, closes) = session(
            vec![
                Event::Data(b"before"),
                Event::ReadFails(io::ErrorKind::BrokenPipe),
                Event::Data(b"after"),
            ],
            false,
        );

        let err = result.unwrap_err();
        assert!(matches!(err, MonitorError::Io(_)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(closes, 1);
        assert!(out.contains("before"));
        assert!(!out.contains("after"));
        assert!(!out.contains("Exiting..."));
        assert!(out.contains("Serial port closed."));
    }

    #[test]
    fn test_poll_failure_is_fatal() {
        let (result, _, closes) = session(vec![Event::PollFails(io::ErrorKind::Other)], false);

        assert!(matches!(result, Err(MonitorError::Io(_))));
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_transient_read_error_is_reported_inline() {
        let (result, out, closes) = session(
            vec![Event::ReadFails(io::ErrorKind::TimedOut), Event::Data(b"still here")],
            false,
        );

        let stats = result.unwrap();
        assert_eq!(stats.warnings, 1);
        assert!(out.contains("[Read Error: scripted read failure]"));
        assert!(out.contains("still here"));
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_reset_on_connect_pulses_lines_before_reading() {
        let running = Arc::new(AtomicBool::new(true));
        let mut link = ScriptedLink::new(vec![Event::Data(b"boot")], Arc::clone(&running));
        let mut out = Vec::new();
        let config = MonitorConfig {
            reset_on_connect: true,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };

        let mut monitor = SerialMonitor::new(&mut link, &mut out, config, running);
        assert_eq!(monitor.start().unwrap(), StopReason::Interrupted);
        drop(monitor);

        assert_eq!(
            link.lines,
            vec![LineState::IDLE, LineState::RESET, LineState::IDLE]
        );
        let out = String::from_utf8_lossy(&out);
        let reset_done = out.find("Reset complete. Listening...").unwrap();
        assert!(out.find("Resetting...").unwrap() < reset_done);
        assert!(reset_done < out.find("boot").unwrap());
    }

    #[test]
    fn test_no_reset_without_flag() {
        let running = Arc::new(AtomicBool::new(true));
        let mut link = ScriptedLink::new(vec![], Arc::clone(&running));
        let mut monitor =
            SerialMonitor::new(&mut link, Vec::new(), MonitorConfig::default(), running);

        monitor.start().unwrap();
        drop(monitor);
        assert!(link.lines.is_empty());
    }

    #[test]
    fn test_stopped_before_start_reads_nothing() {
        let running = Arc::new(AtomicBool::new(false));
        let link = ScriptedLink::new(vec![Event::Data(b"never")], Arc::clone(&running));
        let handed_out = Rc::clone(&link.bytes_handed_out);
        let closes = Rc::clone(&link.closes);
        let mut out = Vec::new();

        let stats = run_session(link, &mut out, MonitorConfig::default(), running).unwrap();

        assert_eq!(stats, MonitorStats::default());
        assert_eq!(handed_out.get(), 0);
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn test_close_is_announced_once() {
        let running = Arc::new(AtomicBool::new(true));
        let mut out = Vec::new();
        let link = ScriptedLink::new(vec![], Arc::clone(&running));
        let mut monitor = SerialMonitor::new(link, &mut out, MonitorConfig::default(), running);

        assert!(monitor.close());
        assert!(!monitor.close());
        drop(monitor);

        let out = String::from_utf8_lossy(&out);
        assert_eq!(out.matches("Serial port closed.").count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_connection_close_is_idempotent() {
        let (master, _slave) = serialport::TTYPort::pair().expect("pty pair");
        let mut conn = SerialConnection::from_port(Box::new(master), PortConfig::new("pty"));

        assert!(conn.close());
        assert!(!conn.close());
        assert_eq!(
            conn.bytes_available().unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_session_reads_from_pty() {
        let (master, mut slave) = serialport::TTYPort::pair().expect("pty pair");
        slave.write_all(b"I (31) boot: ESP-IDF v5.1\n").unwrap();
        slave.flush().unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let conn = SerialConnection::from_port(Box::new(master), PortConfig::new("pty"));
        let mut out = Vec::new();
        let mut monitor =
            SerialMonitor::new(conn, &mut out, MonitorConfig::default(), Arc::clone(&running));

        for _ in 0..100 {
            if monitor.poll_once().unwrap() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(monitor.close());
        drop(monitor);

        assert!(String::from_utf8_lossy(&out).contains("boot: ESP-IDF"));
    }
}
