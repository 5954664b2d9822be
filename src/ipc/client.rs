use std::io::{BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{get_block_by_number_request, BlockSource, RawBlock, RpcResponse};
use crate::errors::{IngestError, Result};
use crate::types::BlockNumber;

/// JSON-RPC client over a node's IPC socket (`geth.ipc`, `reth.ipc`, ...).
///
/// The connection is opened lazily and dropped on any transport error, so the next call
/// starts from a clean stream instead of reading the tail of a broken response.
pub struct IpcClient {
    path: PathBuf,
    timeout: Option<Duration>,
    connection: Option<BufReader<UnixStream>>,
    next_id: u64,
}

impl IpcClient {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout: None,
            connection: None,
            next_id: 1,
        }
    }

    /// Read and write timeout applied to the socket on connect.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&mut self) -> Result<&mut BufReader<UnixStream>> {
        if self.connection.is_none() {
            let stream = UnixStream::connect(&self.path).map_err(|e| {
                IngestError::transport(format!(
                    "Failed to connect to {}: {e}",
                    self.path.display()
                ))
            })?;
            stream.set_read_timeout(self.timeout)?;
            stream.set_write_timeout(self.timeout)?;
            debug!("[ipc] connected to {}", self.path.display());
            self.connection = Some(BufReader::new(stream));
        }

        self.connection
            .as_mut()
            .ok_or_else(|| IngestError::internal("IPC connection missing after connect"))
    }

    fn round_trip<P, R>(&mut self, method: &str, id: u64, request: &P) -> Result<Option<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let connection = self.connection()?;

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        connection.get_mut().write_all(&payload)?;
        connection.get_mut().flush()?;

        // The node does not delimit responses reliably, so read exactly one JSON value.
        let mut deserializer = serde_json::Deserializer::from_reader(&mut *connection);
        let response = RpcResponse::<R>::deserialize(&mut deserializer)?;
        debug!("[ipc] {method} #{id} answered");
        response.into_result(id)
    }

    /// Sends one JSON-RPC request and waits for its response.
    pub fn request<P, R>(&mut self, method: &str, params: P) -> Result<Option<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id();
        let request = super::RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        self.send(method, id, &request)
    }

    fn send<P, R>(&mut self, method: &str, id: u64, request: &P) -> Result<Option<R>>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let result = self.round_trip(method, id, request);
        if let Err(e) = &result {
            warn!("[ipc] {method} #{id} failed, dropping connection: {e}");
            self.connection = None;
        }
        result
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }
}

impl BlockSource for IpcClient {
    fn get_block_by_number(
        &mut self,
        number: BlockNumber,
        include_transactions: bool,
    ) -> Result<Option<RawBlock>> {
        let id = self.next_request_id();
        let request = get_block_by_number_request(id, number, include_transactions);
        self.send(request.method, id, &request)
    }
}
