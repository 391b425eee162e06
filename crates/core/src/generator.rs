use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::clock::Tick;
use crate::model::{ArtifactId, ProducedArtifact};
use crate::schedule::ScheduleSource;

#[derive(Debug, Error, PartialEq)]
pub enum GeneratorError {
    #[error("production delay bounds must satisfy 0 <= low <= high (got low={low}, high={high})")]
    InvalidWindow { low: f64, high: f64 },
}

/// Bounds, in simulated seconds, of the time it takes to produce one artifact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductionWindow {
    low: f64,
    high: f64,
}

impl ProductionWindow {
    pub fn new(low: f64, high: f64) -> Result<Self, GeneratorError> {
        if !low.is_finite() || !high.is_finite() || low < 0.0 || low > high {
            return Err(GeneratorError::InvalidWindow { low, high });
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.low == self.high {
            return self.low;
        }
        rng.random_range(self.low..=self.high)
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    ready_at: f64,
    event_index: usize,
}

/// Fires schedule events as simulated time passes and turns them into artifacts.
///
/// An event fires on the first tick whose window `[previous, current)` covers its offset
/// (`[previous, current]` on the final tick). Its artifact is ready `delay` simulated seconds
/// later and is emitted by the first tick at or past that point.
pub struct ArtifactGenerator<R: Rng> {
    schedule: ScheduleSource,
    window: ProductionWindow,
    rng: R,
    cursor: usize,
    pending: Vec<Pending>,
    sequence: u64,
}

impl<R: Rng> ArtifactGenerator<R> {
    pub fn new(schedule: ScheduleSource, window: ProductionWindow, rng: R) -> Self {
        Self {
            schedule,
            window,
            rng,
            cursor: 0,
            pending: Vec::new(),
            sequence: 0,
        }
    }

    pub fn on_tick(&mut self, tick: &Tick) -> Vec<ProducedArtifact> {
        let events = self.schedule.events();
        while let Some(ev) = events.get(self.cursor) {
            let due = if tick.last {
                ev.at <= tick.simulated
            } else {
                ev.at < tick.simulated
            };
            if !due {
                break;
            }
            let delay = self.window.sample(&mut self.rng);
            debug!(
                event = self.cursor,
                at = ev.at,
                delay,
                sim_time = tick.simulated,
                "schedule event fired"
            );
            self.pending.push(Pending {
                ready_at: ev.at + delay,
                event_index: self.cursor,
            });
            self.cursor += 1;
        }

        self.pending.sort_by(|a, b| {
            a.ready_at
                .total_cmp(&b.ready_at)
                .then(a.event_index.cmp(&b.event_index))
        });
        let split = self
            .pending
            .partition_point(|p| p.ready_at <= tick.simulated);
        let ready: Vec<Pending> = self.pending.drain(..split).collect();

        ready.into_iter().map(|p| self.produce(p)).collect()
    }

    fn produce(&mut self, p: Pending) -> ProducedArtifact {
        self.sequence += 1;
        let ev = &self.schedule.events()[p.event_index];
        let artifact = ProducedArtifact {
            id: ArtifactId::new(p.event_index, self.sequence),
            event_index: p.event_index,
            sequence: self.sequence,
            filename: format!("{}_{:06}", ev.stem(), self.sequence),
            produced_at: p.ready_at,
            location: None,
            payload: ev.payload.clone(),
        };

        debug!(
            artifact = %artifact.id,
            filename = %artifact.filename,
            produced_at = artifact.produced_at,
            "artifact produced"
        );
        artifact
    }

    /// Artifacts produced so far.
    pub fn produced(&self) -> u64 {
        self.sequence
    }

    /// Events fired so far.
    pub fn fired(&self) -> usize {
        self.cursor
    }

    /// Events fired whose artifact is not ready yet.
    pub fn in_production(&self) -> usize {
        self.pending.len()
    }

    pub fn remaining_events(&self) -> usize {
        self.schedule.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_events() == 0 && self.pending.is_empty()
    }
}
