//! # Message bus
//!
//! Transaction batches leave the importer as JSON messages sent to a named address and
//! are acknowledged with a [`Reply`]. An empty reply is success; a reply carrying an error
//! means the handler refused the batch.
//!
//! [`LocalBus`] delivers messages to handlers running in the same process. Handlers
//! register an address and receive [`Envelope`]s on a bounded channel.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::errors::{IngestError, Result};

pub mod tx_handler;

/// Address of the handler that stores transaction batches.
pub const TX_ADDR: &str = "importer.transactions";

/// Acknowledgement for a bus message. `None` means the handler accepted it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub error: Option<String>,
}

impl Reply {
    #[must_use]
    pub const fn ok() -> Self {
        Self { error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Turns a refusal into a dispatch error for `address`.
    pub fn into_result(self, address: &str) -> Result<()> {
        match self.error {
            None => Ok(()),
            Some(message) => Err(IngestError::bus_dispatch(address, message)),
        }
    }
}

/// A message on its way to a handler, with the channel its reply goes back on.
#[derive(Debug)]
pub struct Envelope {
    pub payload: Value,
    pub reply: oneshot::Sender<Reply>,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Delivers `payload` to the handler at `address` and waits for its reply.
    async fn send(&self, address: &str, payload: Value) -> Result<Reply>;

    /// Like [`MessageBus::send`], failing with a timeout error when no reply arrives in time
    /// and with a dispatch error when the handler refuses the message.
    async fn send_with_timeout(&self, address: &str, payload: Value, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.send(address, payload)).await {
            Ok(reply) => reply?.into_result(address),
            Err(_) => Err(IngestError::bus_timeout(
                address,
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

#[async_trait]
impl<B: MessageBus + ?Sized> MessageBus for std::sync::Arc<B> {
    async fn send(&self, address: &str, payload: Value) -> Result<Reply> {
        (**self).send(address, payload).await
    }
}

/// In-process bus: every address is a bounded channel read by one handler task.
#[derive(Default)]
pub struct LocalBus {
    handlers: RwLock<HashMap<String, mpsc::Sender<Envelope>>>,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `address` and returns the receiving end for its handler.
    ///
    /// Registering an address again replaces the previous handler.
    pub fn register(&self, address: &str, capacity: usize) -> Result<mpsc::Receiver<Envelope>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.handlers
            .write()
            .map_err(|_| IngestError::internal("bus registry lock poisoned"))?
            .insert(address.to_string(), tx);
        debug!("[bus] registered handler at {address}");
        Ok(rx)
    }

    fn sender(&self, address: &str) -> Result<mpsc::Sender<Envelope>> {
        self.handlers
            .read()
            .map_err(|_| IngestError::internal("bus registry lock poisoned"))?
            .get(address)
            .cloned()
            .ok_or_else(|| IngestError::bus_dispatch(address, "no handler registered"))
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn send(&self, address: &str, payload: Value) -> Result<Reply> {
        let sender = self.sender(address)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        sender
            .send(Envelope {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| IngestError::bus_dispatch(address, "handler is gone"))?;

        reply_rx
            .await
            .map_err(|_| IngestError::bus_dispatch(address, "handler dropped the reply"))
    }
}
