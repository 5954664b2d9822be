//! # Node access over IPC
//!
//! Blocks are read from a local Ethereum node with `eth_getBlockByNumber`. The node's IPC
//! socket carries every request and response on one byte stream, and interleaved requests
//! corrupt its JSON framing, so all fetches in the process go through [`SingleFlight`].
//!
//! - [`BlockSource`] - the fetch contract; `Ok(None)` means the node does not have the height yet
//! - [`client::IpcClient`] - JSON-RPC over a Unix domain socket
//! - [`RawBlock`] / [`RawTransaction`] - the node's JSON, kept field-for-field

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Mutex;

use crate::errors::{IngestError, Result};
use crate::types::BlockNumber;

pub mod client;


/// A block as returned by `eth_getBlockByNumber`.
///
/// Fields the importer does not interpret are kept in `fields` so they reach storage untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub hash: String,
    pub number: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawBlock {
    /// Full transaction bodies of the block, skipping hash-only entries.
    pub fn full_transactions(&self) -> impl Iterator<Item = &RawTransaction> {
        self.transactions.iter().filter_map(|tx| match tx {
            BlockTransaction::Full(tx) => Some(tx.as_ref()),
            BlockTransaction::Hash(_) => None,
        })
    }
}

/// Transactions come back as hashes or as full bodies depending on the request flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockTransaction {
    Full(Box<RawTransaction>),
    Hash(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a, T> {
    pub jsonrpc: &'a str,
    pub id: u64,
    pub method: &'a str,
    pub params: T,
}

#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default)]
    pub id: Option<Value>,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl<T> RpcResponse<T> {
    /// Checks the response belongs to `request_id` and unwraps its result.
    pub fn into_result(self, request_id: u64) -> Result<Option<T>> {
        if self.id.as_ref().and_then(Value::as_u64) != Some(request_id) {
            return Err(IngestError::transport(format!(
                "response id {:?} does not match request id {request_id}",
                self.id
            )));
        }
        if let Some(error) = self.error {
            return Err(IngestError::transport(format!(
                "node returned error {}: {}",
                error.code, error.message
            )));
        }
        Ok(self.result)
    }
}

/// Builds the `eth_getBlockByNumber` request for `number`.
#[must_use]
pub fn get_block_by_number_request(
    id: u64,
    number: BlockNumber,
    include_transactions: bool,
) -> RpcRequest<'static, (String, bool)> {
    RpcRequest {
        jsonrpc: "2.0",
        id,
        method: "eth_getBlockByNumber",
        params: (number.to_hex(), include_transactions),
    }
}

/// Synchronous access to blocks by height.
///
/// Takes `&mut self`: a source handles one request at a time, and sharing one between
/// workers goes through [`SingleFlight`].
pub trait BlockSource: Send {
    /// Fetches the block at `number`, or `None` when the node has not seen it yet.
    fn get_block_by_number(
        &mut self,
        number: BlockNumber,
        include_transactions: bool,
    ) -> Result<Option<RawBlock>>;
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn get_block_by_number(
        &mut self,
        number: BlockNumber,
        include_transactions: bool,
    ) -> Result<Option<RawBlock>> {
        (**self).get_block_by_number(number, include_transactions)
    }
}

/// Process-wide serialization point for block fetches.
///
/// The lock is held for exactly one request/response round-trip and is only ever taken on
/// a blocking worker.
pub struct SingleFlight<S> {
    source: Mutex<S>,
}

impl<S: BlockSource> SingleFlight<S> {
    pub const fn new(source: S) -> Self {
        Self {
            source: Mutex::new(source),
        }
    }

    pub fn fetch(&self, number: BlockNumber, include_transactions: bool) -> Result<Option<RawBlock>> {
        let mut source = self
            .source
            .lock()
            .map_err(|_| IngestError::internal("IPC lock poisoned by a panicked fetch"))?;
        source.get_block_by_number(number, include_transactions)
    }
}
