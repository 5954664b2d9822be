#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::bus::{MessageBus, Reply};
use crate::errors::{ErrorKind, IngestError, Result};
use crate::importer::block_service::{BlockImporter, ImportHandle};
use crate::importer::lib::ImportConfigBuilder;
use crate::importer::listener::ImportListener;
use crate::ipc::{BlockSource, RawBlock};
use crate::records::{BlockRecord, TransactionBatch};
use crate::repositories::AsyncStorage;
use crate::test_utils::test_data::raw_block;
use crate::types::BlockNumber;
use crate::utils::decode_quantity;

#[derive(Default)]
struct NodeState {
    tx_count: usize,
    timestamps: HashMap<u64, u64>,
    missing: Mutex<HashMap<u64, usize>>,
    unavailable_from: Option<u64>,
    fail_at: HashSet<u64>,
    fetch_delay: Duration,
    stop_at: Option<u64>,
    handle: OnceLock<ImportHandle>,
    fetches: Mutex<Vec<(u64, bool, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Scripted node. Clones share their script and fetch log.
#[derive(Clone)]
pub struct StubNode {
    state: Arc<NodeState>,
}

impl StubNode {
    /// Node serving every height with `tx_count` transactions and timestamp `height * 10`.
    pub fn new(tx_count: usize) -> Self {
        Self {
            state: Arc::new(NodeState {
                tx_count,
                ..NodeState::default()
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut NodeState)) -> Self {
        f(Arc::get_mut(&mut self.state).expect("configure before cloning"));
        self
    }

    pub fn with_timestamps(self, timestamps: &[(u64, u64)]) -> Self {
        self.configure(|state| state.timestamps.extend(timestamps.iter().copied()))
    }

    /// The first `times` fetches of `height` find nothing.
    pub fn missing_times(self, height: u64, times: usize) -> Self {
        self.configure(|state| {
            state.missing.get_mut().unwrap().insert(height, times);
        })
    }

    /// Heights from `height` on are never available.
    pub fn unavailable_from(self, height: u64) -> Self {
        self.configure(|state| state.unavailable_from = Some(height))
    }

    pub fn fail_at(self, height: u64) -> Self {
        self.configure(|state| {
            state.fail_at.insert(height);
        })
    }

    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        self.configure(|state| state.fetch_delay = delay)
    }

    /// Stops the attached importer while it fetches `height`.
    pub fn stop_when_fetching(self, height: u64) -> Self {
        self.configure(|state| state.stop_at = Some(height))
    }

    pub fn attach(&self, handle: ImportHandle) {
        let _ = self.state.handle.set(handle);
    }

    /// Every fetch so far as `(height, include_transactions)`.
    pub fn fetches(&self) -> Vec<(u64, bool)> {
        self.state
            .fetches
            .lock()
            .unwrap()
            .iter()
            .map(|(height, include, _)| (*height, *include))
            .collect()
    }

    pub fn fetch_times(&self) -> Vec<(u64, Instant)> {
        self.state
            .fetches
            .lock()
            .unwrap()
            .iter()
            .map(|(height, _, at)| (*height, *at))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, height: u64) -> Result<Option<RawBlock>> {
        let state = &self.state;
        if state.fail_at.contains(&height) {
            return Err(IngestError::transport(format!("broken pipe at {height}")));
        }
        if state.unavailable_from.is_some_and(|from| height >= from) {
            return Ok(None);
        }
        if let Some(remaining) = state.missing.lock().unwrap().get_mut(&height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        let timestamp = state
            .timestamps
            .get(&height)
            .copied()
            .unwrap_or(height * 10);
        Ok(Some(raw_block(height, timestamp, state.tx_count)))
    }
}

impl BlockSource for StubNode {
    fn get_block_by_number(
        &mut self,
        number: BlockNumber,
        include_transactions: bool,
    ) -> Result<Option<RawBlock>> {
        let state = &self.state;
        let in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        state
            .fetches
            .lock()
            .unwrap()
            .push((number.value(), include_transactions, Instant::now()));

        if !state.fetch_delay.is_zero() {
            std::thread::sleep(state.fetch_delay);
        }
        let response = self.respond(number.value());
        if state.stop_at == Some(number.value()) {
            if let Some(handle) = state.handle.get() {
                handle.stop();
            }
        }

        state.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

#[derive(Default)]
struct StorageState {
    puts: Mutex<Vec<BlockRecord>>,
    fail_on: HashSet<u64>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
}

/// Block storage that records puts and fails on chosen heights.
#[derive(Clone, Default)]
pub struct StubStorage {
    state: Arc<StorageState>,
}

impl StubStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, f: impl FnOnce(&mut StorageState)) -> Self {
        f(Arc::get_mut(&mut self.state).expect("configure before cloning"));
        self
    }

    pub fn fail_on_height(self, height: u64) -> Self {
        self.configure(|state| {
            state.fail_on.insert(height);
        })
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.configure(|state| state.delay = delay)
    }

    pub fn puts(&self) -> Vec<BlockRecord> {
        self.state.puts.lock().unwrap().clone()
    }

    pub fn max_concurrent(&self) -> usize {
        self.state.max_concurrent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AsyncStorage<BlockRecord> for StubStorage {
    async fn put(&self, record: BlockRecord) -> Result<()> {
        let state = &self.state;
        let in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_concurrent.fetch_max(in_flight, Ordering::SeqCst);

        if !state.delay.is_zero() {
            tokio::time::sleep(state.delay).await;
        }
        state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let height = u64::try_from(record.number()).unwrap();
        if state.fail_on.contains(&height) {
            return Err(IngestError::storage_write(format!(
                "disk full at block {height}"
            )));
        }
        state.puts.lock().unwrap().push(record);
        Ok(())
    }
}

#[derive(Default)]
struct BusState {
    batches: Mutex<Vec<TransactionBatch>>,
    silent_on: HashSet<u64>,
    refuse_on: HashSet<u64>,
}

/// Transaction bus that records batches. Heights are read from the first transaction.
#[derive(Clone, Default)]
pub struct StubBus {
    state: Arc<BusState>,
}

impl StubBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, f: impl FnOnce(&mut BusState)) -> Self {
        f(Arc::get_mut(&mut self.state).expect("configure before cloning"));
        self
    }

    /// Never replies to the batch of `height`.
    pub fn silent_on_height(self, height: u64) -> Self {
        self.configure(|state| {
            state.silent_on.insert(height);
        })
    }

    pub fn refuse_on_height(self, height: u64) -> Self {
        self.configure(|state| {
            state.refuse_on.insert(height);
        })
    }

    pub fn batches(&self) -> Vec<TransactionBatch> {
        self.state.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for StubBus {
    async fn send(&self, _address: &str, payload: Value) -> Result<Reply> {
        let batch: TransactionBatch = serde_json::from_value(payload)?;
        let height = batch
            .transactions
            .first()
            .map(|tx| decode_quantity(tx.block_number.as_deref()))
            .and_then(|number| u64::try_from(number).ok());

        if let Some(height) = height {
            if self.state.silent_on.contains(&height) {
                std::future::pending::<()>().await;
            }
            if self.state.refuse_on.contains(&height) {
                return Ok(Reply::error(format!("batch {height} refused")));
            }
        }
        self.state.batches.lock().unwrap().push(batch);
        Ok(Reply::ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    Started { hash: String, height: u64 },
    QueueChanged(usize),
    Imported { hash: String, height: u64 },
    SourceDepleted,
    Finished,
    Cancelled,
    Error {
        kind: ErrorKind,
        message: String,
        last_hash: Option<String>,
    },
}

/// Listener that records every event, and whether a retry timer was live at each start.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ImportEvent>>,
    handle: OnceLock<ImportHandle>,
    timer_at_start: Mutex<Vec<(u64, bool)>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, handle: ImportHandle) {
        let _ = self.handle.set(handle);
    }

    fn record(&self, event: ImportEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<ImportEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ImportEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }

    pub fn started_heights(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ImportEvent::Started { height, .. } => Some(height),
                _ => None,
            })
            .collect()
    }

    pub fn imported_heights(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ImportEvent::Imported { height, .. } => Some(height),
                _ => None,
            })
            .collect()
    }

    pub fn max_queue_depth(&self) -> usize {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ImportEvent::QueueChanged(depth) => Some(depth),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// `(kind, last_hash, message)` of every reported error.
    pub fn errors(&self) -> Vec<(ErrorKind, Option<String>, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ImportEvent::Error {
                    kind,
                    message,
                    last_hash,
                } => Some((kind, last_hash, message)),
                _ => None,
            })
            .collect()
    }

    pub fn timer_at_start(&self) -> Vec<(u64, bool)> {
        self.timer_at_start.lock().unwrap().clone()
    }
}

impl ImportListener for RecordingListener {
    fn on_import_started(&self, hash: &str, height: u64) {
        if let Some(handle) = self.handle.get() {
            self.timer_at_start
                .lock()
                .unwrap()
                .push((height, handle.has_retry_timer()));
        }
        self.record(ImportEvent::Started {
            hash: hash.to_string(),
            height,
        });
    }

    fn on_queue_changed(&self, depth: usize) {
        self.record(ImportEvent::QueueChanged(depth));
    }

    fn on_imported(&self, hash: &str, height: u64) {
        self.record(ImportEvent::Imported {
            hash: hash.to_string(),
            height,
        });
    }

    fn on_source_depleted(&self) {
        self.record(ImportEvent::SourceDepleted);
    }

    fn on_finished(&self) {
        self.record(ImportEvent::Finished);
    }

    fn on_cancelled(&self) {
        self.record(ImportEvent::Cancelled);
    }

    fn on_error(&self, cause: &IngestError, last_hash: Option<&str>) {
        self.record(ImportEvent::Error {
            kind: cause.kind(),
            message: cause.to_string(),
            last_hash: last_hash.map(str::to_string),
        });
    }
}

/// Importer over `[start, end)` with both legs enabled and a recording listener.
pub fn stub_importer(
    start: u64,
    end: u64,
    node: StubNode,
    storage: StubStorage,
) -> BlockImporter<StubNode, StubStorage, StubBus> {
    let config = ImportConfigBuilder::testing()
        .start_block(start)
        .end_block(end)
        .build()
        .unwrap();
    BlockImporter::new(
        config,
        node,
        storage,
        StubBus::new(),
        Arc::new(RecordingListener::new()),
    )
    .unwrap()
}
