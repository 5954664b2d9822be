use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use tracing::debug;

use super::AsyncStorage;
use crate::db::DbConnection;
use crate::errors::Result;
use crate::records::TransactionRecord;

/// Rows per INSERT. Twelve binds a row keeps a chunk well under the bind limit.
const INSERT_CHUNK_SIZE: usize = 1000;

/// Row of the `transactions` table as read back.
#[doc(hidden)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionDto {
    pub hash: String,
    pub block_hash: Option<String>,
    pub block_number: String,
    pub transaction_index: String,
    pub nonce: String,
    pub gas: String,
    pub gas_price: String,
    pub value: String,
    pub from_addr: Option<String>,
    pub to_addr: Option<String>,
    pub timestamp: i64,
    pub body: Json<Value>,
}

pub struct PgTransactionStorage {
    db: Arc<DbConnection>,
}

impl PgTransactionStorage {
    #[must_use]
    pub const fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_block_hash(&self, block_hash: &str) -> Result<Vec<TransactionDto>> {
        let rows = sqlx::query_as::<_, TransactionDto>(
            r"
            SELECT hash, block_hash,
                   block_number::TEXT AS block_number,
                   transaction_index::TEXT AS transaction_index,
                   nonce::TEXT AS nonce, gas::TEXT AS gas,
                   gas_price::TEXT AS gas_price, value::TEXT AS value,
                   from_addr, to_addr, timestamp, body
            FROM transactions
            WHERE block_hash = $1
            ORDER BY transactions.transaction_index ASC
            ",
        )
        .bind(block_hash)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows)
    }

    async fn insert_chunk(&self, chunk: &[TransactionRecord]) -> Result<u64> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO transactions (
                hash, block_hash, block_number, transaction_index,
                nonce, gas, gas_price, value,
                from_addr, to_addr, timestamp, body
            ) ",
        );

        query_builder.push_values(chunk.iter(), |mut b, tx| {
            b.push_bind(tx.hash())
                .push_bind(tx.block_hash())
                .push_bind(tx.block_number().to_string())
                .push_unseparated("::NUMERIC")
                .push_bind(tx.transaction_index().to_string())
                .push_unseparated("::NUMERIC")
                .push_bind(tx.nonce().to_string())
                .push_unseparated("::NUMERIC")
                .push_bind(tx.gas().to_string())
                .push_unseparated("::NUMERIC")
                .push_bind(tx.gas_price().to_string())
                .push_unseparated("::NUMERIC")
                .push_bind(tx.value().to_string())
                .push_unseparated("::NUMERIC")
                .push_bind(tx.from())
                .push_bind(tx.to())
                .push_bind(tx.timestamp())
                .push_bind(Json(tx.to_document()));
        });

        query_builder.push(" ON CONFLICT (hash) DO NOTHING");

        let result = query_builder.build().execute(&self.db.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AsyncStorage<TransactionRecord> for PgTransactionStorage {
    async fn put(&self, record: TransactionRecord) -> Result<()> {
        self.insert_chunk(std::slice::from_ref(&record)).await?;
        Ok(())
    }

    async fn put_all(&self, records: Vec<TransactionRecord>) -> Result<()> {
        let mut inserted = 0;
        for chunk in records.chunks(INSERT_CHUNK_SIZE) {
            inserted += self.insert_chunk(chunk).await?;
        }
        debug!(
            "[storage] inserted {inserted} of {} transactions",
            records.len()
        );
        Ok(())
    }
}
