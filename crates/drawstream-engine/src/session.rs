//! Pre-roll countdown and the legal session transitions.

use std::time::{Duration, Instant};

use drawstream_ipc::SessionState;

/// What the countdown did on a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// A new value is shown.
    Tick(u8),

    /// The settle delay after zero has passed; recording may begin.
    Settled,
}

/// Visible pre-roll: `from`, `from - 1`, ... `0`, then the settle delay.
///
/// Deadlines are chained from the previous deadline, not from the poll
/// time, so a late poll does not stretch the countdown.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: u8,
    step: Duration,
    settle: Duration,
    deadline: Instant,
    settled: bool,
}

impl Countdown {
    /// Begin showing `from` at `now`.
    pub fn new(from: u8, step: Duration, settle: Duration, now: Instant) -> Self {
        let deadline = if from == 0 { now + settle } else { now + step };
        Self {
            remaining: from,
            step,
            settle,
            deadline,
            settled: false,
        }
    }

    /// Value currently shown.
    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    /// When the next step is due, unless already settled.
    pub fn deadline(&self) -> Option<Instant> {
        (!self.settled).then_some(self.deadline)
    }

    /// Advance by at most one step if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<CountdownStep> {
        if self.settled || now < self.deadline {
            return None;
        }

        if self.remaining == 0 {
            self.settled = true;
            return Some(CountdownStep::Settled);
        }

        self.remaining -= 1;
        self.deadline += if self.remaining == 0 {
            self.settle
        } else {
            self.step
        };
        Some(CountdownStep::Tick(self.remaining))
    }
}

/// Whether the session may move from `from` to `to`.
pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    match (from, to) {
        (Idle, CountingDown { .. }) => true,
        (CountingDown { remaining: a }, CountingDown { remaining: b }) => b < a,
        (CountingDown { .. }, Recording) => true,
        // Rollback after a failed resume/start, or shutdown during pre-roll.
        (CountingDown { .. }, Idle) => true,
        (Recording, Finalizing) => true,
        (Finalizing, Idle) => true,
        _ => false,
    }
}
