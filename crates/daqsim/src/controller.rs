use std::fmt;
use std::future::Future;
use std::sync::Arc;

use daqsim_comms::{ChannelError, Dispatcher, MemoryBroker, SubmissionListener, Transport};
use daqsim_core::{
    ArtifactGenerator, ArtifactSink, ClockError, DirectorySink, EventClock, RunCounters,
    ScheduleError, ScheduleSource, SinkError, TokioClock, WallClock,
};
use daqsim_panda::{CommandService, JobSubmitter, SubmissionService};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RunConfig;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("output directory: {0}")]
    Sink(#[from] SinkError),
    #[error("subscribing to the message channel: {0}")]
    Subscribe(#[from] ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Simulated time of the last tick.
    pub completed_at: f64,
    pub artifacts_generated: u64,
    /// Fired events whose production delay ran past the end of the run.
    pub artifacts_unfinished: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub submissions_succeeded: u64,
    pub submissions_failed: u64,
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Simulation {} at {:.2} simulated seconds",
            if self.interrupted { "interrupted" } else { "completed" },
            self.completed_at
        )?;
        writeln!(f, "Total STFs generated: {}", self.artifacts_generated)?;
        writeln!(
            f,
            "STFs still in production at end: {}",
            self.artifacts_unfinished
        )?;
        writeln!(
            f,
            "Messages dispatched: {} (failed: {})",
            self.dispatched, self.dispatch_failures
        )?;
        write!(
            f,
            "PanDA submissions: {} succeeded, {} failed",
            self.submissions_succeeded, self.submissions_failed
        )
    }
}

/// One process lifetime: generation loop, optional dispatch and the receive side.
pub struct RunController<C = TokioClock, S = CommandService, T = MemoryBroker> {
    config: RunConfig,
    clock: C,
    service: S,
    transport: Arc<T>,
    counters: Arc<RunCounters>,
}

impl RunController {
    pub fn new(config: RunConfig) -> Self {
        let service = match &config.submission {
            Some(sub) => {
                let service = CommandService::new(sub.program.clone());
                match sub.timeout {
                    Some(limit) => service.with_timeout(limit),
                    None => service,
                }
            }
            None => CommandService::default(),
        };
        Self {
            config,
            clock: TokioClock::new(),
            service,
            transport: Arc::new(MemoryBroker::new()),
            counters: Arc::new(RunCounters::new()),
        }
    }
}

impl<C: WallClock, S: SubmissionService, T: Transport> RunController<C, S, T> {
    pub fn with_clock<C2: WallClock>(self, clock: C2) -> RunController<C2, S, T> {
        RunController {
            config: self.config,
            clock,
            service: self.service,
            transport: self.transport,
            counters: self.counters,
        }
    }

    pub fn with_service<S2: SubmissionService>(self, service: S2) -> RunController<C, S2, T> {
        RunController {
            config: self.config,
            clock: self.clock,
            service,
            transport: self.transport,
            counters: self.counters,
        }
    }

    /// Carries the run's messages when `--mq` is set. Defaults to an in-process [`MemoryBroker`].
    pub fn with_transport<T2: Transport>(self, transport: Arc<T2>) -> RunController<C, S, T2> {
        RunController {
            config: self.config,
            clock: self.clock,
            service: self.service,
            transport,
            counters: self.counters,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn counters(&self) -> &Arc<RunCounters> {
        &self.counters
    }

    /// Runs until the time limit or until `shutdown` resolves, whichever comes first.
    pub async fn run<F>(self, shutdown: F) -> Result<RunSummary, RunError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            clock,
            service,
            transport,
            counters,
        } = self;

        let schedule = ScheduleSource::load(&config.schedule)?;
        info!(
            path = %config.schedule.display(),
            events = schedule.len(),
            "schedule loaded"
        );
        let mut event_clock = EventClock::new(clock, config.clock)?;

        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        let mut generator = ArtifactGenerator::new(schedule, config.window, rng);
        let sink = match &config.dest {
            Some(dir) => {
                let sink = DirectorySink::create(dir).await?;
                info!(dir = %dir.display(), "writing STFs to disk");
                Some(sink)
            }
            None => None,
        };

        let (mut dispatcher, listener) = match &config.messaging {
            Some(mq) => {
                let listener = SubmissionListener::new(&mq.destination, mq.binding.clone());
                let listener = match &config.submission {
                    Some(sub) => {
                        let submitter = JobSubmitter::new(
                            service,
                            sub.template.clone(),
                            Arc::clone(&counters),
                        )
                        .with_monitor_url(sub.monitor_url.clone());
                        listener.with_handler(Arc::new(submitter))
                    }
                    None => listener,
                };
                let handle = listener.start(transport.as_ref())?;
                (
                    Dispatcher::new(Arc::clone(&transport), &mq.destination),
                    Some(handle),
                )
            }
            None => (Dispatcher::disabled(), None),
        };

        info!(
            factor = config.clock.factor,
            interval = config.clock.interval,
            until = ?config.clock.until,
            "simulation started"
        );
        let mut completed_at = 0.0;
        let mut interrupted = false;
        tokio::pin!(shutdown);
        loop {
            let tick = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(sim_time = completed_at, "interrupted, shutting down");
                    interrupted = true;
                    break;
                }
                tick = event_clock.next_tick() => tick,
            };
            let Some(tick) = tick else { break };
            completed_at = tick.simulated;
            for mut artifact in generator.on_tick(&tick) {
                if let Some(sink) = &sink {
                    sink.store(&mut artifact).await;
                }
                info!(
                    filename = %artifact.filename,
                    sim_time = artifact.produced_at,
                    "STF produced"
                );
                dispatcher.publish(&artifact);
            }
        }
        debug!(
            fired = generator.fired(),
            remaining = generator.remaining_events(),
            "generation loop ended"
        );
        let unfinished = generator.in_production() as u64;
        if unfinished > 0 {
            warn!(
                unfinished,
                sim_time = completed_at,
                "run ended before these STFs finished production; they are not emitted"
            );
        }

        // on a normal end the receive side catches up with everything this run dispatched
        if let Some(handle) = listener {
            let grace = config.shutdown_grace;
            if interrupted {
                handle.shutdown_within(grace).await;
            } else if !handle.drain_until(shutdown.as_mut(), grace).await {
                info!("interrupted while draining received messages");
                interrupted = true;
            }
        }
        dispatcher.close();

        let submissions = counters.snapshot();
        Ok(RunSummary {
            completed_at,
            artifacts_generated: generator.produced(),
            artifacts_unfinished: unfinished,
            dispatched: dispatcher.sent(),
            dispatch_failures: dispatcher.failed(),
            submissions_succeeded: submissions.success,
            submissions_failed: submissions.failure,
            interrupted,
        })
    }
}

/// Resolves on the first Ctrl-C. If the signal handler cannot be installed, never resolves.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
