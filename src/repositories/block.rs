use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use tracing::debug;

use super::AsyncStorage;
use crate::db::DbConnection;
use crate::errors::Result;
use crate::records::BlockRecord;

/// Row of the `blocks` table as read back.
#[doc(hidden)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BlockDto {
    pub hash: String,
    pub number: String,
    pub timestamp: i64,
    pub body: Json<Value>,
}

pub struct PgBlockStorage {
    db: Arc<DbConnection>,
}

impl PgBlockStorage {
    #[must_use]
    pub const fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<BlockDto>> {
        let row = sqlx::query_as::<_, BlockDto>(
            r"
            SELECT hash, number::TEXT AS number, timestamp, body
            FROM blocks
            WHERE hash = $1
            ",
        )
        .bind(hash)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blocks")
            .fetch_one(&self.db.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl AsyncStorage<BlockRecord> for PgBlockStorage {
    async fn put(&self, record: BlockRecord) -> Result<()> {
        let result = sqlx::query(
            r"
            INSERT INTO blocks (hash, number, timestamp, body)
            VALUES ($1, $2::NUMERIC, $3, $4)
            ON CONFLICT (hash)
            DO UPDATE SET
                number = EXCLUDED.number,
                timestamp = EXCLUDED.timestamp,
                body = EXCLUDED.body
            ",
        )
        .bind(record.hash())
        .bind(record.number().to_string())
        .bind(record.timestamp())
        .bind(Json(record.to_document()))
        .execute(&self.db.pool)
        .await?;

        debug!(
            "[storage] block {} written ({} rows)",
            record.hash(),
            result.rows_affected()
        );
        Ok(())
    }
}
