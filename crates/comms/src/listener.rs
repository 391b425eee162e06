use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use daqsim_core::ArtifactDescriptor;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::transport::{ChannelError, DurableBinding, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
}

/// Receives every decoded descriptor, one at a time, on the receive task.
pub trait DescriptorHandler: Send + Sync + 'static {
    fn handle(&self, descriptor: ArtifactDescriptor) -> impl Future<Output = ()> + Send;
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Not a descriptor; logged and dropped.
    Discarded,
    /// Decoded, but no handler is attached.
    Received,
    Forwarded,
}

pub struct SubmissionListener<H> {
    destination: String,
    binding: DurableBinding,
    handler: Option<Arc<H>>,
    state: watch::Sender<ListenerState>,
}

impl<H: DescriptorHandler> SubmissionListener<H> {
    pub fn new(destination: impl Into<String>, binding: DurableBinding) -> Self {
        let (state, _) = watch::channel(ListenerState::Disconnected);
        Self {
            destination: destination.into(),
            binding,
            handler: None,
            state,
        }
    }

    /// Forward decoded descriptors to `handler`. Without one, messages are only logged.
    pub fn with_handler(mut self, handler: Arc<H>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub async fn process(&self, body: &str) -> Processed {
        let descriptor = match ArtifactDescriptor::decode(body) {
            Ok(d) => d,
            Err(e) => {
                error!(destination = %self.destination, "discarding undecodable message: {e}");
                return Processed::Discarded;
            }
        };
        info!(
            filename = descriptor.filename().unwrap_or("<none>"),
            "descriptor received"
        );
        match &self.handler {
            Some(handler) => {
                handler.handle(descriptor).await;
                Processed::Forwarded
            }
            None => Processed::Received,
        }
    }

    /// Subscribes and spawns the receive loop. A failed subscription is returned, not retried.
    pub fn start<T: Transport>(self, transport: &T) -> Result<ListenerHandle, ChannelError> {
        self.state.send_replace(ListenerState::Connecting);
        let mut inbox = match transport.subscribe(&self.destination, &self.binding) {
            Ok(inbox) => inbox,
            Err(e) => {
                self.state.send_replace(ListenerState::Disconnected);
                return Err(e);
            }
        };
        self.state.send_replace(ListenerState::Subscribed);
        info!(
            destination = %self.destination,
            client_id = %self.binding.client_id,
            subscription = %self.binding.subscription_name,
            "listener subscribed"
        );

        let state_rx = self.state.subscribe();
        let (stop_tx, mut stop_rx) = watch::channel(Stop::Running);
        let task = tokio::spawn(async move {
            self.state.send_replace(ListenerState::Receiving);
            loop {
                // A message already taken from the inbox is always processed to the end.
                let body = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    msg = inbox.recv() => match msg {
                        Some(body) => body,
                        None => {
                            warn!(destination = %self.destination, "inbound channel closed");
                            break;
                        }
                    },
                };
                self.process(&body).await;
            }
            inbox.close();
            let drain = *stop_rx.borrow() == Stop::Drain;
            if drain {
                let mut drained = 0usize;
                loop {
                    // a later stop request ends the drain early
                    let body = tokio::select! {
                        biased;
                        _ = stop_rx.changed() => break,
                        msg = inbox.recv() => match msg {
                            Some(body) => body,
                            None => break,
                        },
                    };
                    self.process(&body).await;
                    drained += 1;
                }
                debug!(destination = %self.destination, drained, "inbox drained");
            }
            self.state.send_replace(ListenerState::Disconnected);
            debug!(destination = %self.destination, "listener stopped");
        });

        Ok(ListenerHandle {
            stop_tx,
            task,
            state_rx,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Running,
    Now,
    Drain,
}

/// Running receive loop. Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct ListenerHandle {
    stop_tx: watch::Sender<Stop>,
    task: JoinHandle<()>,
    state_rx: watch::Receiver<ListenerState>,
}

impl ListenerHandle {
    pub fn state(&self) -> ListenerState {
        *self.state_rx.borrow()
    }

    /// Waits until the listener reaches `state`. Returns `false` if the loop is gone first.
    pub async fn wait_for(&mut self, state: ListenerState) -> bool {
        self.state_rx.wait_for(|s| *s == state).await.is_ok()
    }

    /// Stops accepting messages and waits for the in-flight one to finish. Messages already
    /// delivered but not yet taken are dropped.
    pub async fn shutdown(self) {
        self.stop(Stop::Now).await
    }

    /// Stops accepting messages, then processes everything already delivered before returning.
    pub async fn drain(self) {
        self.stop(Stop::Drain).await
    }

    /// Like [`shutdown`](Self::shutdown), but an in-flight message that has not finished after
    /// `grace` is abandoned and the loop aborted.
    pub async fn shutdown_within(self, grace: Duration) {
        self.stop_tx.send_replace(Stop::Now);
        self.join_within(grace).await
    }

    /// Drains like [`drain`](Self::drain) unless `interrupt` resolves first, in which case the
    /// rest of the inbox is dropped and the loop is stopped as by
    /// [`shutdown_within`](Self::shutdown_within). Returns `false` when the drain was cut short.
    pub async fn drain_until<F>(mut self, interrupt: F, grace: Duration) -> bool
    where
        F: Future<Output = ()>,
    {
        self.stop_tx.send_replace(Stop::Drain);
        let interrupted = tokio::select! {
            biased;
            joined = &mut self.task => {
                report(joined);
                false
            }
            _ = interrupt => true,
        };
        if !interrupted {
            return true;
        }
        info!("drain interrupted, dropping the remaining messages");
        self.shutdown_within(grace).await;
        false
    }

    async fn stop(self, how: Stop) {
        self.stop_tx.send_replace(how);
        report(self.task.await);
    }

    async fn join_within(mut self, grace: Duration) {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(joined) => report(joined),
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "listener did not stop in time, abandoning the in-flight message"
                );
                self.task.abort();
                // the aborted task's future is dropped before this resolves
                let _ = self.task.await;
            }
        }
    }
}

fn report(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!("listener task ended abnormally: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ArtifactDescriptor>>,
    }

    impl DescriptorHandler for Recorder {
        async fn handle(&self, descriptor: ArtifactDescriptor) {
            self.seen.lock().unwrap().push(descriptor);
        }
    }

    fn listener() -> SubmissionListener<Recorder> {
        SubmissionListener::new("epictopic", DurableBinding::new("c", "s"))
    }

    #[tokio::test]
    async fn malformed_message_is_discarded() {
        let rec = Arc::new(Recorder::default());
        let l = listener().with_handler(Arc::clone(&rec));
        assert_eq!(l.process("not json").await, Processed::Discarded);
        assert_eq!(l.process("[1, 2]").await, Processed::Discarded);
        assert!(rec.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn descriptor_is_forwarded_to_handler() {
        let rec = Arc::new(Recorder::default());
        let l = listener().with_handler(Arc::clone(&rec));
        assert_eq!(
            l.process(r#"{"filename": "run42"}"#).await,
            Processed::Forwarded
        );
        assert_eq!(rec.seen.lock().unwrap()[0].filename(), Some("run42"));
    }

    #[tokio::test]
    async fn without_handler_messages_are_only_received() {
        let l = listener();
        assert_eq!(l.process(r#"{"filename": "x"}"#).await, Processed::Received);
    }

    #[test]
    fn failed_subscription_leaves_listener_disconnected() {
        let broker = MemoryBroker::new();
        let _busy = broker
            .subscribe("epictopic", &DurableBinding::new("c", "s"))
            .unwrap();
        let err = listener().start(&broker).unwrap_err();
        assert!(matches!(err, ChannelError::SubscriptionBusy { .. }));
    }

    /// Never finishes handling a message.
    struct Stuck;

    impl DescriptorHandler for Stuck {
        async fn handle(&self, _descriptor: ArtifactDescriptor) {
            std::future::pending::<()>().await
        }
    }

    #[tokio::test]
    async fn interrupted_drain_gives_up_after_the_grace_period() {
        let broker = MemoryBroker::new();
        let stuck = SubmissionListener::new("epictopic", DurableBinding::new("c", "s"))
            .with_handler(Arc::new(Stuck));
        let mut handle = stuck.start(&broker).unwrap();
        assert!(handle.wait_for(ListenerState::Receiving).await);
        broker.send("epictopic", r#"{"filename": "a"}"#).unwrap();

        let interrupt = tokio::time::sleep(Duration::from_millis(50));
        let finished = tokio::time::timeout(
            Duration::from_secs(2),
            handle.drain_until(interrupt, Duration::from_millis(50)),
        )
        .await
        .expect("drain should give up once interrupted");
        assert!(!finished);
    }

    #[tokio::test]
    async fn uninterrupted_drain_completes() {
        let broker = MemoryBroker::new();
        let rec = Arc::new(Recorder::default());
        let mut handle = listener()
            .with_handler(Arc::clone(&rec))
            .start(&broker)
            .unwrap();
        assert!(handle.wait_for(ListenerState::Receiving).await);
        broker.send("epictopic", r#"{"filename": "a"}"#).unwrap();
        assert!(
            handle
                .drain_until(std::future::pending(), Duration::from_millis(50))
                .await
        );
        assert_eq!(rec.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_moves_to_disconnected() {
        let broker = MemoryBroker::new();
        let mut handle = listener().start(&broker).unwrap();
        assert!(handle.wait_for(ListenerState::Receiving).await);
        let mut state_rx = handle.state_rx.clone();
        handle.shutdown().await;
        assert_eq!(*state_rx.borrow_and_update(), ListenerState::Disconnected);
    }
}
