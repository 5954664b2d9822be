use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::AsyncStorage;
use crate::errors::Result;
use crate::records::Storable;

/// Storage that keeps records in a map keyed by id. Re-inserting an id overwrites it.
pub struct InMemoryStorage<T> {
    records: RwLock<HashMap<String, T>>,
}

impl<T: Storable> InMemoryStorage<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &str) -> Option<T> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.records.read().await.keys().cloned().collect()
    }
}

impl<T: Storable> Default for InMemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Storable> AsyncStorage<T> for InMemoryStorage<T> {
    async fn put(&self, record: T) -> Result<()> {
        let id = record.id().to_string();
        self.records.write().await.insert(id, record);
        Ok(())
    }

    async fn put_all(&self, records: Vec<T>) -> Result<()> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.id().to_string(), record);
        }
        Ok(())
    }
}
