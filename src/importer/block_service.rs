use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bus::{MessageBus, TX_ADDR},
    errors::{IngestError, Result},
    importer::{
        executor::{Scheduler, TimerHandle},
        lib::ImportConfig,
        listener::ImportListener,
    },
    ipc::{BlockSource, RawBlock, SingleFlight},
    records::{BlockRecord, TransactionBatch},
    repositories::AsyncStorage,
    types::BlockNumber,
};

/// Name of the timer polling for a height the node does not have yet.
pub const BLOCK_RETRY_TIMER: &str = "block-retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ImportState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Errored = 3,
    Terminated = 4,
}

impl ImportState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Errored,
            _ => Self::Terminated,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Every height in the range was imported.
    Finished { imported: u64 },
    /// The run stopped at its first failure.
    Errored { last_hash: Option<String> },
    /// The run was stopped from outside.
    Cancelled,
}

/// State shared between the producer, the fan-outs and every [`ImportHandle`].
struct ImportControl {
    stopping: AtomicBool,
    errored: AtomicBool,
    state: AtomicU8,
    queue_depth: AtomicUsize,
    imported: AtomicU64,
    last_hash: Mutex<Option<String>>,
    retry_timer: Mutex<Option<TimerHandle>>,
    shutdown: CancellationToken,
    credits: Arc<Semaphore>,
}

impl ImportControl {
    fn new(credits: usize) -> Self {
        Self {
            stopping: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            state: AtomicU8::new(ImportState::Idle as u8),
            queue_depth: AtomicUsize::new(0),
            imported: AtomicU64::new(0),
            last_hash: Mutex::new(None),
            retry_timer: Mutex::new(None),
            shutdown: CancellationToken::new(),
            credits: Arc::new(Semaphore::new(credits)),
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn state(&self) -> ImportState {
        ImportState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ImportState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Moves a running import to `Draining`. Any other state is kept.
    fn begin_draining(&self) -> bool {
        self.state
            .compare_exchange(
                ImportState::Running as u8,
                ImportState::Draining as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn last_hash(&self) -> Option<String> {
        self.last_hash.lock().ok().and_then(|hash| hash.clone())
    }

    fn set_last_hash(&self, hash: &str) {
        if let Ok(mut last) = self.last_hash.lock() {
            *last = Some(hash.to_string());
        }
    }

    fn set_retry_timer(&self, timer: Option<TimerHandle>) {
        if let Ok(mut slot) = self.retry_timer.lock() {
            *slot = timer;
        }
    }

    fn has_retry_timer(&self) -> bool {
        self.retry_timer
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    fn cancel_retry_timer(&self) {
        if let Some(timer) = self.retry_timer.lock().ok().and_then(|mut slot| slot.take()) {
            debug!("[importer] cancelling {} timer #{}", timer.name(), timer.id());
            timer.cancel();
        }
    }
}

/// Cloneable view of a running import, used to stop it and to report its progress.
#[derive(Clone)]
pub struct ImportHandle {
    control: Arc<ImportControl>,
}

impl ImportHandle {
    /// Stops the import: no new heights are requested, the tip poll is cancelled and
    /// fan-outs still in flight are abandoned. Returns immediately.
    pub fn stop(&self) {
        let control = &self.control;
        control.stopping.store(true, Ordering::SeqCst);
        if control.shutdown.is_cancelled() {
            return;
        }
        info!("[importer] stop requested");
        control.shutdown.cancel();
        control.cancel_retry_timer();
        control.credits.close();
    }

    #[must_use]
    pub fn state(&self) -> ImportState {
        self.control.state()
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.control.is_stopping()
    }

    /// Whether the run hit a failure. Stays set after the run terminated.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.control.errored.load(Ordering::SeqCst)
    }

    /// Blocks whose storage write has started and not yet finished.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.control.queue_depth.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn imported(&self) -> u64 {
        self.control.imported.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_hash(&self) -> Option<String> {
        self.control.last_hash()
    }

    #[must_use]
    pub fn has_retry_timer(&self) -> bool {
        self.control.has_retry_timer()
    }
}

/// Counts one block write in the queue depth for as long as it lives.
struct QueueSlot {
    control: Arc<ImportControl>,
    listener: Arc<dyn ImportListener>,
}

impl QueueSlot {
    fn enter(control: Arc<ImportControl>, listener: Arc<dyn ImportListener>) -> Self {
        let depth = control.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        listener.on_queue_changed(depth);
        Self { control, listener }
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        let depth = self
            .control
            .queue_depth
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        self.listener.on_queue_changed(depth);
    }
}

struct Inner<S, B, M> {
    config: ImportConfig,
    source: SingleFlight<S>,
    storage: B,
    bus: M,
    listener: Arc<dyn ImportListener>,
    scheduler: Scheduler,
    control: Arc<ImportControl>,
}

/// Imports the blocks of a height range from a node into storage and the transaction bus.
///
/// Heights are requested in ascending order. At most `backpressure_blocks` blocks are
/// between fetch and fully imported at any time: a credit is taken before each fetch and
/// handed back only once both the block write and the transaction dispatch succeeded.
/// The first failure stops the run and is reported once.
pub struct BlockImporter<S, B, M> {
    inner: Arc<Inner<S, B, M>>,
}

impl<S, B, M> Clone for BlockImporter<S, B, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, B, M> BlockImporter<S, B, M>
where
    S: BlockSource + 'static,
    B: AsyncStorage<BlockRecord> + 'static,
    M: MessageBus + 'static,
{
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: ImportConfig,
        source: S,
        storage: B,
        bus: M,
        listener: Arc<dyn ImportListener>,
    ) -> Result<Self> {
        let control = Arc::new(ImportControl::new(config.backpressure_blocks));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                source: SingleFlight::new(source),
                storage,
                bus,
                listener,
                scheduler: Scheduler::current()?,
                control,
            }),
        })
    }

    #[must_use]
    pub fn handle(&self) -> ImportHandle {
        ImportHandle {
            control: self.inner.control.clone(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ImportConfig {
        &self.inner.config
    }

    /// Runs the import until it finishes, fails or is stopped. An importer runs once.
    pub async fn run(&self) -> Result<ImportOutcome> {
        let control = &self.inner.control;
        control
            .state
            .compare_exchange(
                ImportState::Idle as u8,
                ImportState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| IngestError::internal("importer has already been started"))?;

        let config = &self.inner.config;
        info!(
            "[importer] importing heights [{}, {}) (blocks: {}, transactions: {}, backpressure: {})",
            config.start_block,
            config.end_block,
            config.import_blocks,
            config.import_transactions,
            config.backpressure_blocks
        );

        let mut fan_outs = JoinSet::new();
        self.produce(&mut fan_outs).await;
        self.drain(&mut fan_outs).await;

        let outcome = if control.errored.load(Ordering::SeqCst) {
            ImportOutcome::Errored {
                last_hash: control.last_hash(),
            }
        } else if control.shutdown.is_cancelled() {
            self.inner.listener.on_cancelled();
            ImportOutcome::Cancelled
        } else {
            self.inner.listener.on_finished();
            ImportOutcome::Finished {
                imported: control.imported.load(Ordering::SeqCst),
            }
        };

        control.cancel_retry_timer();
        control.set_state(ImportState::Terminated);
        info!("[importer] terminated: {outcome:?}");
        Ok(outcome)
    }

    /// Requests heights in order, one credit each, until the range is exhausted or the
    /// run is stopping.
    async fn produce(&self, fan_outs: &mut JoinSet<()>) {
        let control = &self.inner.control;
        let end = self.inner.config.end_block.value();
        let mut height = self.inner.config.start_block.value();

        while height < end {
            let permit = tokio::select! {
                biased;
                () = control.shutdown.cancelled() => break,
                permit = control.credits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if control.is_stopping() {
                break;
            }
            while let Some(joined) = fan_outs.try_join_next() {
                self.reap(joined);
            }

            let block = match self.fetch(BlockNumber::new(height)).await {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    self.fail(e);
                    break;
                }
            };
            if control.is_stopping() {
                break;
            }

            control.set_last_hash(&block.hash);
            self.inner.listener.on_import_started(&block.hash, height);
            fan_outs.spawn(self.clone().import(block, height, permit));
            height += 1;
        }
    }

    /// Waits for outstanding fan-outs. A stop abandons them instead.
    async fn drain(&self, fan_outs: &mut JoinSet<()>) {
        let control = &self.inner.control;
        if !control.is_stopping() {
            control.begin_draining();
        }

        loop {
            tokio::select! {
                biased;
                () = control.shutdown.cancelled() => {
                    if !fan_outs.is_empty() {
                        debug!("[importer] abandoning {} fan-outs", fan_outs.len());
                    }
                    fan_outs.shutdown().await;
                    break;
                }
                next = fan_outs.join_next() => match next {
                    None => break,
                    Some(joined) => self.reap(joined),
                },
            }
        }
    }

    fn reap(&self, joined: std::result::Result<(), JoinError>) {
        if let Err(e) = joined {
            if e.is_panic() {
                self.fail(IngestError::internal(format!("block import panicked: {e}")));
            }
        }
    }

    /// Fetches `height`, polling every `tip_poll_ms` while the node does not have it.
    ///
    /// `Ok(None)` means the run started stopping while waiting.
    async fn fetch(&self, height: BlockNumber) -> Result<Option<RawBlock>> {
        if let Some(block) = self.fetch_once(height).await? {
            return Ok(Some(block));
        }
        if self.inner.control.is_stopping() {
            return Ok(None);
        }
        debug!("[importer] block {height} not available yet");
        self.inner.listener.on_source_depleted();
        self.wait_for_block(height).await
    }

    async fn fetch_once(&self, height: BlockNumber) -> Result<Option<RawBlock>> {
        let inner = self.inner.clone();
        let include_transactions = inner.config.import_transactions;
        self.inner
            .scheduler
            .blocking(move || inner.source.fetch(height, include_transactions))
            .await?
    }

    async fn wait_for_block(&self, height: BlockNumber) -> Result<Option<RawBlock>> {
        let (tx, rx) = oneshot::channel::<Result<RawBlock>>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let this = self.clone();
        let timer = self.inner.scheduler.periodic(
            self.inner.config.tip_poll(),
            BLOCK_RETRY_TIMER,
            move |timer| {
                let this = this.clone();
                let tx = tx.clone();
                async move {
                    if this.inner.control.is_stopping() {
                        timer.cancel();
                        return;
                    }
                    let found = match this.fetch_once(height).await {
                        Ok(None) => return,
                        Ok(Some(block)) => Ok(block),
                        Err(e) => Err(e),
                    };
                    timer.cancel();
                    if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                        let _ = tx.send(found);
                    }
                }
            },
        );
        self.inner.control.set_retry_timer(Some(timer.clone()));

        let result = tokio::select! {
            biased;
            () = self.inner.control.shutdown.cancelled() => Ok(None),
            found = rx => match found {
                Ok(found) => found.map(Some),
                // The timer went away without an answer: it was cancelled by a stop or a failure.
                Err(_) => Ok(None),
            },
        };

        timer.cancel();
        self.inner.control.set_retry_timer(None);
        if let Ok(Some(_)) = &result {
            debug!("[importer] block {height} became available");
        }
        result
    }

    async fn import(self, block: RawBlock, height: u64, permit: OwnedSemaphorePermit) {
        match self.fan_out(&block).await {
            Ok(()) => {
                let control = &self.inner.control;
                if control.is_stopping() {
                    return;
                }
                control.imported.fetch_add(1, Ordering::SeqCst);
                self.inner.listener.on_imported(&block.hash, height);
                drop(permit);
            }
            Err(e) => {
                warn!("[importer] block {height} ({}) failed: {e}", block.hash);
                self.fail(e);
            }
        }
    }

    /// Block write and transaction dispatch, joined. A disabled leg succeeds at once.
    async fn fan_out(&self, block: &RawBlock) -> Result<()> {
        let (stored, dispatched) =
            tokio::join!(self.write_block(block), self.dispatch_transactions(block));
        stored.and(dispatched)
    }

    async fn write_block(&self, block: &RawBlock) -> Result<()> {
        if !self.inner.config.import_blocks {
            return Ok(());
        }
        let record = BlockRecord::from_raw(block)?;
        let _slot = QueueSlot::enter(self.inner.control.clone(), self.inner.listener.clone());
        self.inner.storage.put(record).await
    }

    async fn dispatch_transactions(&self, block: &RawBlock) -> Result<()> {
        if !self.inner.config.import_transactions {
            return Ok(());
        }
        let batch = TransactionBatch::from_block(block);
        let payload = serde_json::to_value(&batch)?;
        self.inner
            .bus
            .send_with_timeout(TX_ADDR, payload, self.inner.config.bus_send_timeout())
            .await
    }

    /// Stops the run on its first failure and reports it once.
    fn fail(&self, cause: IngestError) {
        let control = &self.inner.control;
        control.stopping.store(true, Ordering::SeqCst);
        if control.shutdown.is_cancelled() || control.errored.swap(true, Ordering::SeqCst) {
            debug!("[importer] suppressed failure after stop: {cause}");
            return;
        }

        control.set_state(ImportState::Errored);
        control.cancel_retry_timer();
        control.credits.close();
        let last_hash = control.last_hash();
        self.inner.listener.on_error(&cause, last_hash.as_deref());
    }
}
