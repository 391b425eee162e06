use thiserror::Error;
use tokio::sync::mpsc;

/// Topic used by both sides when nothing else is configured.
pub const DEFAULT_DESTINATION: &str = "epictopic";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("not connected to the message broker")]
    NotConnected,
    #[error("durable subscription {client_id}.{subscription_name} already has an active consumer")]
    SubscriptionBusy {
        client_id: String,
        subscription_name: String,
    },
    #[error("durable subscription {client_id}.{subscription_name} is bound to {bound}, not {requested}")]
    DestinationMismatch {
        client_id: String,
        subscription_name: String,
        bound: String,
        requested: String,
    },
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Stable identity of a durable subscription. The broker keeps undelivered messages for it
/// while no consumer is attached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DurableBinding {
    pub client_id: String,
    pub subscription_name: String,
}

impl DurableBinding {
    pub fn new(client_id: impl Into<String>, subscription_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            subscription_name: subscription_name.into(),
        }
    }
}

/// Receiving end of a subscription. Messages are acknowledged on hand-off (auto-ack).
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Inbox {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Next message body; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Message broker connection.
pub trait Transport: Send + Sync + 'static {
    /// Fire-and-forget publish.
    fn send(&self, destination: &str, body: &str) -> Result<(), ChannelError>;

    fn subscribe(&self, destination: &str, binding: &DurableBinding) -> Result<Inbox, ChannelError>;

    fn disconnect(&self);
}
