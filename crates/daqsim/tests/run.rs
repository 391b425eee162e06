//! End-to-end runs of the controller on a manual clock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use daqsim::{MessagingConfig, RunConfig, RunController, RunError, SubmissionConfig};
use daqsim_comms::{ChannelError, DurableBinding, Inbox, MemoryBroker, Transport};
use daqsim_core::{ArtifactDescriptor, ClockSettings, ManualClock, ProductionWindow, WallClock};
use daqsim_panda::{ServiceError, SubmissionService, SubmissionTemplate, SubmitReply};
use tokio::sync::mpsc;

/// Accepts everything with increasing task ids, or rejects everything.
struct FakePanda {
    accept: bool,
    next_id: AtomicU64,
}

impl FakePanda {
    fn accepting() -> Self {
        Self {
            accept: true,
            next_id: AtomicU64::new(9001),
        }
    }

    fn rejecting() -> Self {
        Self {
            accept: false,
            next_id: AtomicU64::new(0),
        }
    }
}

impl SubmissionService for FakePanda {
    type Params = String;

    fn build_parameters(&self, _raw_args: &[String], task_name: &str) -> Result<String, ServiceError> {
        Ok(task_name.to_string())
    }

    async fn submit(&self, _params: String) -> Result<SubmitReply, ServiceError> {
        if self.accept {
            Ok(SubmitReply::accepted(self.next_id.fetch_add(1, Ordering::Relaxed)))
        } else {
            Ok(SubmitReply::rejected(1, "task rejected by JEDI"))
        }
    }
}

/// Takes every submission and never answers.
struct HungPanda;

impl SubmissionService for HungPanda {
    type Params = String;

    fn build_parameters(&self, _raw_args: &[String], task_name: &str) -> Result<String, ServiceError> {
        Ok(task_name.to_string())
    }

    async fn submit(&self, _params: String) -> Result<SubmitReply, ServiceError> {
        std::future::pending().await
    }
}

/// A broker connection that has gone bad: sends fail, and subscribing fails too when
/// `refuse_subscribe` is set.
#[derive(Default)]
struct BrokenBroker {
    refuse_subscribe: bool,
    inboxes: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl Transport for BrokenBroker {
    fn send(&self, _destination: &str, _body: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Unavailable("connection reset".into()))
    }

    fn subscribe(&self, _destination: &str, _binding: &DurableBinding) -> Result<Inbox, ChannelError> {
        if self.refuse_subscribe {
            return Err(ChannelError::Unavailable("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().unwrap().push(tx);
        Ok(Inbox::new(rx))
    }

    fn disconnect(&self) {
        self.inboxes.lock().unwrap().clear();
    }
}

fn write_schedule(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("schedule-rt.yml");
    std::fs::write(&path, yaml).unwrap();
    path
}

fn config(schedule: PathBuf, factor: f64, interval: f64, until: Option<f64>) -> RunConfig {
    RunConfig {
        verbose: false,
        schedule,
        clock: ClockSettings {
            factor,
            interval,
            until,
        },
        window: ProductionWindow::new(0.0, 0.0).unwrap(),
        dest: None,
        seed: Some(7),
        messaging: None,
        submission: None,
        shutdown_grace: Duration::from_secs(5),
    }
}

fn with_messaging(mut cfg: RunConfig) -> RunConfig {
    cfg.messaging = Some(MessagingConfig {
        destination: "epictopic".into(),
        binding: DurableBinding::new("test-client", "test-durable-sub"),
    });
    cfg
}

fn with_submission(cfg: RunConfig) -> RunConfig {
    let mut cfg = with_messaging(cfg);
    cfg.submission = Some(SubmissionConfig {
        template: SubmissionTemplate {
            working_group: "EIC".into(),
            ..SubmissionTemplate::default()
        },
        monitor_url: "https://mon.example".into(),
        program: "prun".into(),
        timeout: None,
    });
    cfg
}

#[tokio::test]
async fn single_event_run_ends_at_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0.0\n");
    let broker = Arc::new(MemoryBroker::new());
    let mut observer = broker
        .subscribe("epictopic", &DurableBinding::new("observer", "observer-sub"))
        .unwrap();
    let summary = RunController::new(with_messaging(config(schedule, 1.0, 0.1, Some(1.0))))
        .with_clock(ManualClock::new())
        .with_transport(Arc::clone(&broker))
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.artifacts_generated, 1);
    assert_eq!(summary.artifacts_unfinished, 0);
    assert_eq!(summary.completed_at, 1.0);
    assert!(!summary.interrupted);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.submissions_succeeded + summary.submissions_failed, 0);

    let body = observer.recv().await.unwrap();
    let descriptor = ArtifactDescriptor::decode(&body).unwrap();
    assert_eq!(descriptor.get("produced_at").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(descriptor.filename(), Some("stf_000001"));
    assert_eq!(observer.recv().await, None);
}

#[tokio::test]
async fn artifacts_still_in_production_at_the_limit_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0.0\n  - at: 0.5\n");
    let mut cfg = config(schedule, 1.0, 0.4, Some(1.2));
    cfg.window = ProductionWindow::new(1.0, 1.0).unwrap();
    let summary = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.completed_at, 1.2);
    assert_eq!(summary.artifacts_generated, 1);
    assert_eq!(summary.artifacts_unfinished, 1);
    assert!(summary
        .to_string()
        .contains("STFs still in production at end: 1"));
}

#[tokio::test]
async fn loopback_run_submits_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(
        dir.path(),
        "events:\n  - at: 0\n    label: physics\n  - at: 10\n  - at: 20\n  - at: 500\n",
    );
    let cfg = with_submission(config(schedule, 60.0, 0.25, Some(60.0)));
    let summary = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .with_service(FakePanda::accepting())
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.artifacts_generated, 3);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.dispatch_failures, 0);
    assert_eq!(summary.submissions_succeeded, 3);
    assert_eq!(summary.submissions_failed, 0);
}

#[tokio::test]
async fn rejected_submissions_are_counted_as_failures() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0\n  - at: 0.5\n");
    let cfg = with_submission(config(schedule, 1.0, 0.5, Some(2.0)));
    let summary = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .with_service(FakePanda::rejecting())
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.artifacts_generated, 2);
    assert_eq!(summary.submissions_succeeded, 0);
    assert_eq!(summary.submissions_failed, 2);
}

#[tokio::test]
async fn messaging_without_submission_only_dispatches() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0\n");
    let mut cfg = with_submission(config(schedule, 1.0, 0.5, Some(1.0)));
    cfg.submission = None;
    let summary = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.submissions_succeeded + summary.submissions_failed, 0);
}

#[tokio::test]
async fn dispatch_failures_do_not_stop_generation() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0\n  - at: 0.5\n");
    let cfg = with_messaging(config(schedule, 1.0, 0.5, Some(2.0)));
    let summary = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .with_transport(Arc::new(BrokenBroker::default()))
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.completed_at, 2.0);
    assert!(!summary.interrupted);
    assert_eq!(summary.artifacts_generated, 2);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(summary.dispatch_failures, 2);
}

#[tokio::test]
async fn failed_subscription_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0\n");
    let cfg = with_messaging(config(schedule, 1.0, 0.5, Some(1.0)));
    let err = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .with_transport(Arc::new(BrokenBroker {
            refuse_subscribe: true,
            ..BrokenBroker::default()
        }))
        .run(std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Subscribe(ChannelError::Unavailable(_))));
}

#[tokio::test]
async fn interrupt_during_the_final_drain_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0\n");
    let mut cfg = with_submission(config(schedule, 1.0, 0.5, Some(1.0)));
    cfg.shutdown_grace = Duration::from_millis(100);
    let run = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .with_service(HungPanda)
        .run(tokio::time::sleep(Duration::from_millis(200)));

    let summary = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("run should end soon after the interrupt")
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.completed_at, 1.0);
    assert_eq!(summary.artifacts_generated, 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.submissions_succeeded + summary.submissions_failed, 0);
}

#[tokio::test]
async fn interrupt_ends_an_unbounded_run() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 1\n  - at: 2\n  - at: 1000\n");
    let clock = ManualClock::new();
    let watch = clock.clone();
    let shutdown = async move {
        while watch.elapsed() < Duration::from_secs(5) {
            tokio::task::yield_now().await;
        }
    };

    let summary = RunController::new(config(schedule, 1.0, 1.0, None))
        .with_clock(clock)
        .run(shutdown)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.artifacts_generated, 2);
    assert!(summary.completed_at >= 4.0 && summary.completed_at <= 5.0);
}

#[tokio::test]
async fn artifacts_are_written_to_the_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let schedule = write_schedule(dir.path(), "events:\n  - at: 0\n    label: calib\n");
    let out = dir.path().join("stf");
    let mut cfg = config(schedule, 1.0, 1.0, Some(1.0));
    cfg.dest = Some(out.clone());
    let summary = RunController::new(cfg)
        .with_clock(ManualClock::new())
        .run(std::future::pending())
        .await
        .unwrap();

    assert_eq!(summary.artifacts_generated, 1);
    let written = std::fs::read_to_string(out.join("calib_000001.stf")).unwrap();
    let body: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(body["filename"], "calib_000001");
}

#[tokio::test]
async fn missing_schedule_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = RunController::new(config(dir.path().join("absent.yml"), 1.0, 1.0, Some(1.0)))
        .with_clock(ManualClock::new())
        .run(std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::Schedule(_)));
}

#[test]
fn summary_reports_every_counter() {
    let summary = daqsim::RunSummary {
        completed_at: 120.0,
        artifacts_generated: 3,
        artifacts_unfinished: 0,
        dispatched: 3,
        dispatch_failures: 0,
        submissions_succeeded: 2,
        submissions_failed: 1,
        interrupted: false,
    };
    let text = summary.to_string();
    assert!(text.contains("completed at 120.00"));
    assert!(text.contains("Total STFs generated: 3"));
    assert!(text.contains("STFs still in production at end: 0"));
    assert!(text.contains("2 succeeded, 1 failed"));
}
