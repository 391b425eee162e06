use std::sync::Arc;

use daqsim_core::ProducedArtifact;
use tracing::{debug, warn};

use crate::transport::Transport;

/// Best-effort publisher of produced artifacts. Nothing is retried or buffered.
pub struct Dispatcher<T: Transport> {
    channel: Option<(Arc<T>, String)>,
    sent: u64,
    failed: u64,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, destination: impl Into<String>) -> Self {
        Self {
            channel: Some((transport, destination.into())),
            sent: 0,
            failed: 0,
        }
    }

    /// A dispatcher with no outbound channel; every publish is a successful no-op.
    pub fn disabled() -> Self {
        Self {
            channel: None,
            sent: 0,
            failed: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.channel.is_some()
    }

    pub fn publish(&mut self, artifact: &ProducedArtifact) -> bool {
        let Some((transport, destination)) = &self.channel else {
            return true;
        };
        let body = artifact.descriptor().encode();
        match transport.send(destination, &body) {
            Ok(()) => {
                self.sent += 1;
                debug!(artifact = %artifact.id, destination = %destination, "artifact dispatched");
                true
            }
            Err(e) => {
                self.failed += 1;
                warn!(artifact = %artifact.id, destination = %destination, "dispatch failed: {e}");
                false
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Closes the outbound connection. Later publishes are no-ops.
    pub fn close(&mut self) {
        if let Some((transport, _)) = self.channel.take() {
            transport.disconnect();
        }
    }
}
