//! # Mock Implementations for Testing
//!
//! mockall doubles for the importer's async seams, for tests that want call-count
//! expectations instead of the recording stubs in `importer::test_utils`.
//!
//! ## Available Mocks
//!
//! - [`MockBlockStorage`] - block storage ([`crate::repositories::AsyncStorage`] of [`BlockRecord`])
//! - [`MockMessageBus`] - transaction bus ([`crate::bus::MessageBus`])

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(dead_code)]

use async_trait::async_trait;
use mockall::mock;
use serde_json::Value;

use crate::bus::{MessageBus, Reply};
use crate::errors::Result;
use crate::records::BlockRecord;
use crate::repositories::AsyncStorage;

mock! {
    /// Block storage whose writes are scripted per test.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let mut storage = MockBlockStorage::new();
    /// storage.expect_put().times(3).returning(|_| Ok(()));
    /// ```
    pub BlockStorage {}

    #[async_trait]
    impl AsyncStorage<BlockRecord> for BlockStorage {
        async fn put(&self, record: BlockRecord) -> Result<()>;
    }
}

mock! {
    /// Bus whose replies are scripted per test. `send_with_timeout` keeps its default.
    pub MessageBus {}

    #[async_trait]
    impl MessageBus for MessageBus {
        async fn send(&self, address: &str, payload: Value) -> Result<Reply>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TX_ADDR;
    use crate::errors::{ErrorKind, IngestError};
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_bus_refusal_maps_to_dispatch_error() {
        let mut bus = MockMessageBus::new();
        bus.expect_send()
            .withf(|address, _| address == TX_ADDR)
            .times(1)
            .returning(|_, _| Ok(Reply::error("no space")));

        let err = bus
            .send_with_timeout(TX_ADDR, Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BusDispatch);
        assert!(err.to_string().contains("no space"));
    }

    #[tokio::test]
    async fn test_mock_storage_put_all_goes_through_put() {
        let mut storage = MockBlockStorage::new();
        storage
            .expect_put()
            .times(2)
            .returning(|record| {
                if record.timestamp() > 10 {
                    Err(IngestError::storage_write("late block"))
                } else {
                    Ok(())
                }
            });

        let records = [(1, 10), (2, 20)]
            .iter()
            .map(|(height, ts)| {
                BlockRecord::from_raw(&crate::test_utils::test_data::raw_block(*height, *ts, 0))
                    .unwrap()
            })
            .collect();

        let err = storage.put_all(records).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageWrite);
    }
}
