//! # Energy Accounting
//!
//! Side-effect-only collaborator notified by the driver whenever the receiver starts
//! or stops listening and whenever a transmission starts or ends.
//!
//! - [`NoEnergyAccounting`]: discards every notification
//! - [`EnergyTracker`]: accumulates time spent in each state and produces an [`EnergyReport`]

use embassy_time::{Duration, Instant};
use log::{Level, log};

/// Radio activity that is accounted separately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyState {
    Listen,
    Transmit,
}

pub trait EnergyAccounting {
    fn on(&mut self, state: EnergyState);
    fn off(&mut self, state: EnergyState);

    /// Accumulated times, if this collaborator keeps any
    fn snapshot(&self) -> Option<EnergyReport> {
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoEnergyAccounting;

impl EnergyAccounting for NoEnergyAccounting {
    fn on(&mut self, _state: EnergyState) {}
    fn off(&mut self, _state: EnergyState) {}
}

/// Accumulated time per radio state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyReport {
    pub listen: Duration,
    pub transmit: Duration,
    pub total: Duration,
}

impl EnergyReport {
    /// Time neither listening nor transmitting
    pub fn off(&self) -> Duration {
        let active = self.listen + self.transmit;
        if active >= self.total {
            Duration::from_ticks(0)
        } else {
            self.total - active
        }
    }

    pub fn log(&self) {
        log!(
            Level::Info,
            "Energy: listen {} ms, transmit {} ms, off {} ms, total {} ms",
            self.listen.as_millis(),
            self.transmit.as_millis(),
            self.off().as_millis(),
            self.total.as_millis()
        );
    }
}

#[derive(Clone, Copy)]
struct StateTimer {
    accumulated: Duration,
    since: Option<Instant>,
}

impl StateTimer {
    const fn new() -> Self {
        StateTimer {
            accumulated: Duration::from_ticks(0),
            since: None,
        }
    }

    fn start(&mut self, now: Instant) {
        if self.since.is_none() {
            self.since = Some(now);
        }
    }

    fn stop(&mut self, now: Instant) {
        if let Some(since) = self.since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
    }

    fn elapsed(&self, now: Instant) -> Duration {
        match self.since {
            Some(since) => self.accumulated + now.saturating_duration_since(since),
            None => self.accumulated,
        }
    }
}

/// Energy tracker driven by a monotonic clock
///
/// The clock is injectable so the accounting can be exercised without waiting on
/// real time; [`EnergyTracker::new`] uses `embassy_time::Instant::now`.
/// Switching off a state that was not on is ignored.
pub struct EnergyTracker<C = fn() -> Instant>
where
    C: Fn() -> Instant,
{
    clock: C,
    created: Instant,
    listen: StateTimer,
    transmit: StateTimer,
}

impl EnergyTracker {
    pub fn new() -> Self {
        Self::with_clock(Instant::now as fn() -> Instant)
    }
}

impl Default for EnergyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EnergyTracker<C>
where
    C: Fn() -> Instant,
{
    pub fn with_clock(clock: C) -> Self {
        let created = clock();
        EnergyTracker {
            clock,
            created,
            listen: StateTimer::new(),
            transmit: StateTimer::new(),
        }
    }

    pub fn report(&self) -> EnergyReport {
        let now = (self.clock)();
        EnergyReport {
            listen: self.listen.elapsed(now),
            transmit: self.transmit.elapsed(now),
            total: now.saturating_duration_since(self.created),
        }
    }

    /// Logs the current report at info level
    pub fn log_report(&self) {
        self.report().log();
    }

    fn timer(&mut self, state: EnergyState) -> &mut StateTimer {
        match state {
            EnergyState::Listen => &mut self.listen,
            EnergyState::Transmit => &mut self.transmit,
        }
    }
}

impl<C> EnergyAccounting for EnergyTracker<C>
where
    C: Fn() -> Instant,
{
    fn on(&mut self, state: EnergyState) {
        let now = (self.clock)();
        self.timer(state).start(now);
    }

    fn off(&mut self, state: EnergyState) {
        let now = (self.clock)();
        self.timer(state).stop(now);
    }

    fn snapshot(&self) -> Option<EnergyReport> {
        Some(self.report())
    }
}
