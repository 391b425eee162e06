use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

/// Source of wall time for the event clock.
pub trait WallClock: Send + Sync {
    /// Wall time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Real wall time, backed by tokio's timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for TokioClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Wall clock that only moves when slept on or advanced. Sleeping yields to the runtime once.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl WallClock for ManualClock {
    fn elapsed(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        tokio::task::yield_now()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ClockError {
    #[error("time factor must be finite and > 0 (got {0})")]
    InvalidFactor(f64),
    #[error("clock interval must be finite and > 0 seconds (got {0})")]
    InvalidInterval(f64),
    #[error("time limit must be finite and >= 0 (got {0})")]
    InvalidUntil(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSettings {
    /// Simulated seconds per wall second.
    pub factor: f64,
    /// Wall seconds between polls.
    pub interval: f64,
    /// Simulated-time ceiling.
    pub until: Option<f64>,
}

impl ClockSettings {
    pub fn validate(&self) -> Result<(), ClockError> {
        if !self.factor.is_finite() || self.factor <= 0.0 {
            return Err(ClockError::InvalidFactor(self.factor));
        }
        if !self.interval.is_finite() || self.interval <= 0.0 {
            return Err(ClockError::InvalidInterval(self.interval));
        }
        if let Some(u) = self.until {
            if !u.is_finite() || u < 0.0 {
                return Err(ClockError::InvalidUntil(u));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub index: u64,
    /// Simulated seconds since start.
    pub simulated: f64,
    /// Set on the tick that reaches the time limit; no tick follows it.
    pub last: bool,
}

/// Turns wall time into a sequence of simulated-time ticks.
///
/// The first tick is immediate; each later one waits `interval` wall seconds. With a time
/// limit the sequence ends on a tick clamped to that limit, otherwise it never ends.
#[derive(Debug)]
pub struct EventClock<C: WallClock> {
    clock: C,
    start: Duration,
    factor: f64,
    interval: Duration,
    until: Option<f64>,
    ticks: u64,
    finished: bool,
}

impl<C: WallClock> EventClock<C> {
    pub fn new(clock: C, settings: ClockSettings) -> Result<Self, ClockError> {
        settings.validate()?;
        let start = clock.elapsed();
        Ok(Self {
            clock,
            start,
            factor: settings.factor,
            interval: Duration::from_secs_f64(settings.interval),
            until: settings.until,
            ticks: 0,
            finished: false,
        })
    }

    pub fn simulated_now(&self) -> f64 {
        self.clock.elapsed().saturating_sub(self.start).as_secs_f64() * self.factor
    }

    pub async fn next_tick(&mut self) -> Option<Tick> {
        if self.finished {
            return None;
        }
        if self.ticks > 0 {
            self.clock.sleep(self.interval).await;
        }

        let mut simulated = self.simulated_now();
        let mut last = false;
        if let Some(until) = self.until {
            if simulated >= until {
                simulated = until;
                last = true;
                self.finished = true;
            }
        }

        let tick = Tick {
            index: self.ticks,
            simulated,
            last,
        };
        self.ticks += 1;
        Some(tick)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn until(&self) -> Option<f64> {
        self.until
    }
}
