//! DTR/RTS reset sequence
//!
//! ESP32 dev boards wire RTS (through a transistor) to the chip's EN pin and
//! DTR to IO0. Driving RTS while DTR stays low holds EN low, which resets the
//! chip into its normal boot path.

use crate::serial::SerialLink;
use std::io;
use std::thread;
use std::time::Duration;

/// Delay between line-state transitions
pub const RESET_SETTLE: Duration = Duration::from_millis(100);

/// Levels of the two control lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineState {
    pub dtr: bool,
    pub rts: bool,
}

impl LineState {
    /// Both lines deasserted
    pub const IDLE: LineState = LineState { dtr: false, rts: false };
    /// EN held low
    pub const RESET: LineState = LineState { dtr: false, rts: true };

    /// Drive both lines on `link`
    pub fn apply<L: SerialLink + ?Sized>(self, link: &mut L) -> io::Result<()> {
        link.set_dtr(self.dtr)?;
        link.set_rts(self.rts)
    }
}

/// A fixed, timed series of line states
#[derive(Debug, Clone)]
pub struct ResetSequence {
    steps: Vec<LineState>,
    settle: Duration,
}

impl ResetSequence {
    /// Hard reset into run mode: idle, EN low, release
    pub fn hard_reset() -> Self {
        Self {
            steps: vec![LineState::IDLE, LineState::RESET, LineState::IDLE],
            settle: RESET_SETTLE,
        }
    }

    /// Apply each step in order, sleeping `settle` between steps.
    ///
    /// There is no retry and no check that the target actually reset.
    pub fn run<L: SerialLink + ?Sized>(&self, link: &mut L) -> io::Result<()> {
        for (i, state) in self.steps.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.settle);
            }
            log::debug!("reset step {}: dtr={} rts={}", i + 1, state.dtr, state.rts);
            state.apply(link)?;
        }
        Ok(())
    }
}
