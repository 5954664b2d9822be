//! # Storable records
//!
//! Records are built from the node's raw JSON once a block has been fetched. A block
//! becomes one [`BlockRecord`]; its transactions travel to the transaction handler as a
//! [`TransactionBatch`] and are stored there as [`TransactionRecord`]s stamped with the
//! block's timestamp.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::ipc::{RawBlock, RawTransaction};
use crate::types::BlockHash;
use crate::utils::{decode_i64, decode_quantity};

/// Field name carrying the block timestamp in a transaction batch.
pub const BATCH_TIMESTAMP_FIELD: &str = "timestamp";

/// A record with a stable identity that storage is keyed by.
pub trait Storable: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct BlockRecord {
    hash: BlockHash,
    number: U256,
    timestamp: i64,
    transaction_count: usize,
    fields: Map<String, Value>,
}

impl BlockRecord {
    /// Builds the record for `raw`, rejecting blocks whose hash is not a 32-byte hex string.
    pub fn from_raw(raw: &RawBlock) -> Result<Self> {
        let hash = BlockHash::new(raw.hash.clone())?;
        Ok(Self {
            hash,
            number: decode_quantity(Some(&raw.number)),
            timestamp: decode_i64(Some(&raw.timestamp)),
            transaction_count: raw.transactions.len(),
            fields: raw.fields.clone(),
        })
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        self.hash.value()
    }

    #[must_use]
    pub const fn number(&self) -> U256 {
        self.number
    }

    /// Block timestamp in seconds.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub const fn transaction_count(&self) -> usize {
        self.transaction_count
    }

    /// Node fields stored verbatim next to the decoded ones.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The document written to storage: every node field plus the decoded identity columns.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut document = self.fields.clone();
        document.insert("hash".to_string(), Value::from(self.hash()));
        document.insert("number".to_string(), Value::from(self.number.to_string()));
        document.insert("timestamp".to_string(), Value::from(self.timestamp));
        document.insert(
            "transactionCount".to_string(),
            Value::from(self.transaction_count),
        );
        Value::Object(document)
    }
}

impl PartialEq for BlockRecord {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for BlockRecord {}

impl Storable for BlockRecord {
    fn id(&self) -> &str {
        self.hash()
    }
}

/// A transaction as stored, with the enclosing block's timestamp.
///
/// The node reports numeric fields as hex strings; the getters decode them on access.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    raw: RawTransaction,
    timestamp: i64,
}

impl TransactionRecord {
    #[must_use]
    pub const fn new(raw: RawTransaction, timestamp: i64) -> Self {
        Self { raw, timestamp }
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.raw.hash
    }

    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn nonce(&self) -> U256 {
        decode_quantity(self.raw.nonce.as_deref())
    }

    #[must_use]
    pub fn block_number(&self) -> U256 {
        decode_quantity(self.raw.block_number.as_deref())
    }

    #[must_use]
    pub fn transaction_index(&self) -> U256 {
        decode_quantity(self.raw.transaction_index.as_deref())
    }

    #[must_use]
    pub fn gas(&self) -> U256 {
        decode_quantity(self.raw.gas.as_deref())
    }

    #[must_use]
    pub fn gas_price(&self) -> U256 {
        decode_quantity(self.raw.gas_price.as_deref())
    }

    #[must_use]
    pub fn value(&self) -> U256 {
        decode_quantity(self.raw.value.as_deref())
    }

    #[must_use]
    pub fn block_hash(&self) -> Option<&str> {
        self.raw.block_hash.as_deref()
    }

    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.raw.from.as_deref()
    }

    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.raw.to.as_deref()
    }

    #[must_use]
    pub const fn raw(&self) -> &RawTransaction {
        &self.raw
    }

    /// The node's transaction object with the block timestamp added.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut document = match serde_json::to_value(&self.raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        document.insert(
            BATCH_TIMESTAMP_FIELD.to_string(),
            Value::from(self.timestamp),
        );
        Value::Object(document)
    }
}

impl PartialEq for TransactionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.raw.hash == other.raw.hash
    }
}

impl Eq for TransactionRecord {}

impl Storable for TransactionRecord {
    fn id(&self) -> &str {
        self.hash()
    }
}

/// The transactions of one block, sent to the transaction handler as a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionBatch {
    #[serde(rename = "timestamp")]
    pub timestamp: i64,
    pub transactions: Vec<RawTransaction>,
}

impl TransactionBatch {
    #[must_use]
    pub fn from_block(raw: &RawBlock) -> Self {
        Self {
            timestamp: decode_i64(Some(&raw.timestamp)),
            transactions: raw.full_transactions().cloned().collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Splits the batch into records, each carrying the batch timestamp.
    #[must_use]
    pub fn into_records(self) -> Vec<TransactionRecord> {
        let timestamp = self.timestamp;
        self.transactions
            .into_iter()
            .map(|raw| TransactionRecord::new(raw, timestamp))
            .collect()
    }
}
