use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{ChannelError, DurableBinding, Inbox, Transport};

/// In-process broker with durable topic subscriptions. Not persistent across restarts.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    disconnected: bool,
    durable: HashMap<DurableBinding, DurableQueue>,
}

#[derive(Debug)]
struct DurableQueue {
    destination: String,
    live: Option<mpsc::UnboundedSender<String>>,
    backlog: VecDeque<String>,
}

impl DurableQueue {
    fn deliver(&mut self, body: String) {
        if let Some(tx) = &self.live {
            match tx.send(body) {
                Ok(()) => return,
                Err(mpsc::error::SendError(body)) => {
                    self.live = None;
                    self.backlog.push_back(body);
                }
            }
        } else {
            self.backlog.push_back(body);
        }
    }

    fn has_consumer(&self) -> bool {
        self.live.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-opens the connection after [`Transport::disconnect`]. Durable backlogs survive.
    pub fn reconnect(&self) {
        self.inner().disconnected = false;
    }

    pub fn is_connected(&self) -> bool {
        !self.inner().disconnected
    }

    /// Messages held for a durable subscription with no attached consumer.
    pub fn backlog_len(&self, binding: &DurableBinding) -> usize {
        self.inner()
            .durable
            .get(binding)
            .map(|q| q.backlog.len())
            .unwrap_or(0)
    }

    /// Drops a durable subscription together with its backlog.
    pub fn unsubscribe(&self, binding: &DurableBinding) {
        self.inner().durable.remove(binding);
    }
}

impl Transport for MemoryBroker {
    fn send(&self, destination: &str, body: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner();
        if inner.disconnected {
            return Err(ChannelError::NotConnected);
        }
        for q in inner
            .durable
            .values_mut()
            .filter(|q| q.destination == destination)
        {
            q.deliver(body.to_string());
        }
        Ok(())
    }

    fn subscribe(&self, destination: &str, binding: &DurableBinding) -> Result<Inbox, ChannelError> {
        let mut inner = self.inner();
        if inner.disconnected {
            return Err(ChannelError::NotConnected);
        }
        let q = inner
            .durable
            .entry(binding.clone())
            .or_insert_with(|| DurableQueue {
                destination: destination.to_string(),
                live: None,
                backlog: VecDeque::new(),
            });
        if q.destination != destination {
            return Err(ChannelError::DestinationMismatch {
                client_id: binding.client_id.clone(),
                subscription_name: binding.subscription_name.clone(),
                bound: q.destination.clone(),
                requested: destination.to_string(),
            });
        }
        if q.has_consumer() {
            return Err(ChannelError::SubscriptionBusy {
                client_id: binding.client_id.clone(),
                subscription_name: binding.subscription_name.clone(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let redelivered = q.backlog.len();
        for body in q.backlog.drain(..) {
            // rx is alive, cannot fail
            let _ = tx.send(body);
        }
        q.live = Some(tx);
        debug!(
            client_id = %binding.client_id,
            subscription = %binding.subscription_name,
            destination,
            redelivered,
            "durable subscription attached"
        );
        Ok(Inbox::new(rx))
    }

    fn disconnect(&self) {
        let mut inner = self.inner();
        inner.disconnected = true;
        for q in inner.durable.values_mut() {
            q.live = None;
        }
    }
}
