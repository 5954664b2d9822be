use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{Envelope, Reply};
use crate::errors::Result;
use crate::records::{TransactionBatch, TransactionRecord};
use crate::repositories::AsyncStorage;

/// Stores the transaction batches sent to [`super::TX_ADDR`].
///
/// Every batch is split into records stamped with the batch timestamp and written in one
/// `put_all`. The reply is empty on success and carries the failure otherwise.
pub struct TransactionStoreHandler<T> {
    storage: Arc<T>,
}

impl<T> TransactionStoreHandler<T>
where
    T: AsyncStorage<TransactionRecord> + 'static,
{
    pub const fn new(storage: Arc<T>) -> Self {
        Self { storage }
    }

    /// Handles one batch message.
    pub async fn handle(&self, payload: serde_json::Value) -> Result<usize> {
        let batch: TransactionBatch = serde_json::from_value(payload)?;
        let records = batch.into_records();
        let count = records.len();
        self.storage.put_all(records).await?;
        Ok(count)
    }

    /// Serves envelopes until every sender is gone.
    pub fn spawn(self, mut rx: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(Envelope { payload, reply }) = rx.recv().await {
                let response = match self.handle(payload).await {
                    Ok(count) => {
                        debug!("[tx_handler] stored {count} transactions");
                        Reply::ok()
                    }
                    Err(e) => {
                        error!("[tx_handler] batch refused: {e}");
                        Reply::error(e.to_string())
                    }
                };
                // The sender may have timed out and gone away.
                let _ = reply.send(response);
            }
            info!("[tx_handler] bus closed, shutting down");
        })
    }
}
