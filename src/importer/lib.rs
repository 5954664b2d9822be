use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    bus::{tx_handler::TransactionStoreHandler, LocalBus, TX_ADDR},
    db::DbConnection,
    errors::{IngestError, Result},
    importer::{
        block_service::{BlockImporter, ImportHandle, ImportOutcome},
        listener::LogListener,
    },
    ipc::client::IpcClient,
    records::{BlockRecord, TransactionRecord},
    repositories::{
        block::PgBlockStorage, memory::InMemoryStorage, transaction::PgTransactionStorage,
        AsyncStorage,
    },
    router,
    types::BlockNumber,
};

pub const DEFAULT_BACKPRESSURE_BLOCKS: usize = 8;
pub const DEFAULT_TIP_POLL_MS: u64 = 1000;
pub const DEFAULT_BUS_SEND_TIMEOUT_MS: u64 = 60_000;

/// How often the service checks the termination flag.
const TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Validated configuration of one import run over `[start_block, end_block)`.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    pub import_blocks: bool,
    pub import_transactions: bool,
    pub backpressure_blocks: usize,
    pub tip_poll_ms: u64,
    pub bus_send_timeout_ms: u64,
}

impl ImportConfig {
    #[must_use]
    pub const fn builder() -> ImportConfigBuilder {
        ImportConfigBuilder::new()
    }

    #[must_use]
    pub const fn tip_poll(&self) -> Duration {
        Duration::from_millis(self.tip_poll_ms)
    }

    #[must_use]
    pub const fn bus_send_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_send_timeout_ms)
    }

    /// Number of heights in the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end_block.value().saturating_sub(self.start_block.value())
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfigBuilder {
    start_block: u64,
    end_block: Option<u64>,
    import_blocks: bool,
    import_transactions: bool,
    backpressure_blocks: usize,
    tip_poll_ms: u64,
    bus_send_timeout_ms: u64,
}

impl ImportConfigBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_block: 0,
            end_block: None,
            import_blocks: true,
            import_transactions: true,
            backpressure_blocks: DEFAULT_BACKPRESSURE_BLOCKS,
            tip_poll_ms: DEFAULT_TIP_POLL_MS,
            bus_send_timeout_ms: DEFAULT_BUS_SEND_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub const fn testing() -> Self {
        Self::new()
            .backpressure_blocks(4)
            .tip_poll_ms(10)
            .bus_send_timeout_ms(1000)
    }

    #[must_use]
    pub const fn start_block(mut self, start_block: u64) -> Self {
        self.start_block = start_block;
        self
    }

    #[must_use]
    pub const fn end_block(mut self, end_block: u64) -> Self {
        self.end_block = Some(end_block);
        self
    }

    #[must_use]
    pub const fn import_blocks(mut self, import_blocks: bool) -> Self {
        self.import_blocks = import_blocks;
        self
    }

    #[must_use]
    pub const fn import_transactions(mut self, import_transactions: bool) -> Self {
        self.import_transactions = import_transactions;
        self
    }

    #[must_use]
    pub const fn backpressure_blocks(mut self, backpressure_blocks: usize) -> Self {
        self.backpressure_blocks = backpressure_blocks;
        self
    }

    #[must_use]
    pub const fn tip_poll_ms(mut self, tip_poll_ms: u64) -> Self {
        self.tip_poll_ms = tip_poll_ms;
        self
    }

    #[must_use]
    pub const fn bus_send_timeout_ms(mut self, bus_send_timeout_ms: u64) -> Self {
        self.bus_send_timeout_ms = bus_send_timeout_ms;
        self
    }

    pub fn build(self) -> Result<ImportConfig> {
        let end_block = self.end_block.ok_or_else(|| {
            IngestError::configuration("end_block", "End block is required")
        })?;

        if self.start_block >= end_block {
            return Err(IngestError::configuration(
                "start_block",
                format!(
                    "Start block {} must be lower than end block {end_block}",
                    self.start_block
                ),
            ));
        }

        if self.backpressure_blocks == 0 {
            return Err(IngestError::configuration(
                "backpressure_blocks",
                "Backpressure blocks must be greater than 0",
            ));
        }

        if self.tip_poll_ms == 0 {
            return Err(IngestError::configuration(
                "tip_poll_ms",
                "Tip poll interval must be greater than 0",
            ));
        }

        if self.bus_send_timeout_ms == 0 {
            return Err(IngestError::configuration(
                "bus_send_timeout_ms",
                "Bus send timeout must be greater than 0",
            ));
        }

        if !self.import_blocks && !self.import_transactions {
            return Err(IngestError::configuration(
                "import",
                "At least one of block import and transaction import must be enabled",
            ));
        }

        Ok(ImportConfig {
            start_block: BlockNumber::new(self.start_block),
            end_block: BlockNumber::new(end_block),
            import_blocks: self.import_blocks,
            import_transactions: self.import_transactions,
            backpressure_blocks: self.backpressure_blocks,
            tip_poll_ms: self.tip_poll_ms,
            bus_send_timeout_ms: self.bus_send_timeout_ms,
        })
    }
}

impl Default for ImportConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

const fn default_true() -> bool {
    true
}

const fn default_backpressure() -> usize {
    DEFAULT_BACKPRESSURE_BLOCKS
}

/// Where records go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Postgres { connection: String },
}

/// The JSON configuration file.
///
/// ```json
/// {
///   "startBlock": "1000000",
///   "blockEnd": "1001000",
///   "txImport": true,
///   "blockImport": true,
///   "backpressureBlocks": 8,
///   "ipcPath": "/data/geth.ipc",
///   "storage": { "kind": "postgres", "connection": "postgresql://..." }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    pub start_block: String,
    pub block_end: String,
    #[serde(default = "default_true")]
    pub tx_import: bool,
    #[serde(default = "default_true")]
    pub block_import: bool,
    #[serde(default = "default_backpressure")]
    pub backpressure_blocks: usize,
    #[serde(default)]
    pub tip_poll_ms: Option<u64>,
    #[serde(default)]
    pub bus_send_timeout_ms: Option<u64>,
    #[serde(default)]
    pub ipc_path: Option<PathBuf>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

impl ApplicationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            IngestError::configuration(
                "config",
                format!("Failed to read {}: {e}", path.display()),
            )
        })?;
        Self::from_str(&contents)
    }

    /// Builder preloaded with the file's values.
    pub fn builder(&self) -> Result<ImportConfigBuilder> {
        let start = parse_height("startBlock", &self.start_block)?;
        let end = parse_height("blockEnd", &self.block_end)?;

        let mut builder = ImportConfigBuilder::new()
            .start_block(start)
            .end_block(end)
            .import_transactions(self.tx_import)
            .import_blocks(self.block_import)
            .backpressure_blocks(self.backpressure_blocks);
        if let Some(tip_poll_ms) = self.tip_poll_ms {
            builder = builder.tip_poll_ms(tip_poll_ms);
        }
        if let Some(bus_send_timeout_ms) = self.bus_send_timeout_ms {
            builder = builder.bus_send_timeout_ms(bus_send_timeout_ms);
        }
        Ok(builder)
    }
}

impl FromStr for ApplicationConfig {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| {
            IngestError::configuration("config", format!("Invalid configuration: {e}"))
        })
    }
}

fn parse_height(parameter: &str, raw: &str) -> Result<u64> {
    BlockNumber::from_str(raw)
        .map(|number| number.value())
        .map_err(|e| IngestError::configuration(parameter, e.to_string()))
}

/// Process-level collaborators of the import service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub ipc_path: PathBuf,
    /// Postgres connection string; records are kept in memory without one.
    pub db_conn_string: Option<String>,
    pub router_endpoint: Option<String>,
}

impl ServiceConfig {
    /// Resolves each setting from the command line, then the file, then the environment
    /// (`NODE_IPC_PATH`, `DB_CONNECTION_STRING`, `ROUTER_ENDPOINT`).
    pub fn resolve(
        file: Option<&ApplicationConfig>,
        ipc_path: Option<PathBuf>,
        db_conn_string: Option<String>,
        router_endpoint: Option<String>,
    ) -> Result<Self> {
        let ipc_path = ipc_path
            .or_else(|| file.and_then(|f| f.ipc_path.clone()))
            .or_else(|| dotenvy::var("NODE_IPC_PATH").ok().map(PathBuf::from))
            .ok_or_else(|| {
                IngestError::configuration("ipc_path", "Node IPC path must be set")
            })?;

        let db_conn_string = match (db_conn_string, file.and_then(|f| f.storage.clone())) {
            (Some(conn), _) => Some(conn),
            (None, Some(StorageConfig::Postgres { connection })) => Some(connection),
            (None, Some(StorageConfig::Memory)) => None,
            (None, None) => dotenvy::var("DB_CONNECTION_STRING").ok(),
        };

        let router_endpoint = router_endpoint.or_else(|| dotenvy::var("ROUTER_ENDPOINT").ok());

        Ok(Self {
            ipc_path,
            db_conn_string,
            router_endpoint,
        })
    }
}

/// Runs one import with the node, storage and router described by `service_config`.
///
/// Setting `should_terminate` stops the import. Resolves once the import is over and the
/// transaction handler has drained.
pub async fn start_import_service(
    import_config: ImportConfig,
    service_config: ServiceConfig,
    should_terminate: Arc<AtomicBool>,
) -> Result<ImportOutcome> {
    let source = IpcClient::new(&service_config.ipc_path);

    if let Some(db_conn_string) = &service_config.db_conn_string {
        let db = setup_database(db_conn_string).await?;
        run_import(
            import_config,
            &service_config,
            source,
            PgBlockStorage::new(db.clone()),
            Arc::new(PgTransactionStorage::new(db)),
            should_terminate,
        )
        .await
    } else {
        info!("No database configured, keeping records in memory");
        run_import(
            import_config,
            &service_config,
            source,
            InMemoryStorage::<BlockRecord>::new(),
            Arc::new(InMemoryStorage::<TransactionRecord>::new()),
            should_terminate,
        )
        .await
    }
}

async fn setup_database(db_conn_string: &str) -> Result<Arc<DbConnection>> {
    info!("Connecting to DB");
    let db = DbConnection::new(db_conn_string).await?;
    db.check_connection().await?;

    info!("Run migrations");
    db.migrate().await?;

    Ok(db)
}

async fn run_import<B, T>(
    import_config: ImportConfig,
    service_config: &ServiceConfig,
    source: IpcClient,
    blocks: B,
    transactions: Arc<T>,
    should_terminate: Arc<AtomicBool>,
) -> Result<ImportOutcome>
where
    B: AsyncStorage<BlockRecord> + 'static,
    T: AsyncStorage<TransactionRecord> + 'static,
{
    let bus = Arc::new(LocalBus::new());
    let rx = bus.register(TX_ADDR, import_config.backpressure_blocks)?;
    let tx_handler = TransactionStoreHandler::new(transactions).spawn(rx);

    let importer = BlockImporter::new(
        import_config,
        source,
        blocks,
        bus,
        Arc::new(LogListener::new()),
    )?;
    let handle = importer.handle();

    let service_done = CancellationToken::new();
    let router_handle = service_config
        .router_endpoint
        .clone()
        .map(|endpoint| spawn_router_service(endpoint, handle.clone(), service_done.clone()));
    let watcher = spawn_termination_watcher(should_terminate, handle, service_done.clone());

    let outcome = importer.run().await;

    service_done.cancel();
    let _ = watcher.await;
    if let Some(router_handle) = router_handle {
        let _ = router_handle.await;
    }

    // Dropping the importer drops the bus and with it the handler's last sender.
    drop(importer);
    if let Err(e) = tx_handler.await {
        error!("[tx_handler] task failed: {e}");
    }

    outcome
}

fn spawn_router_service(
    endpoint: String,
    handle: ImportHandle,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = router::initialize_router(&endpoint, handle, shutdown).await {
            error!("[router] unexpected error {}", e);
        }
        info!("[router] shutting down");
    })
}

fn spawn_termination_watcher(
    should_terminate: Arc<AtomicBool>,
    handle: ImportHandle,
    service_done: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = service_done.cancelled() => break,
                () = tokio::time::sleep(TERMINATION_POLL_INTERVAL) => {
                    if should_terminate.load(Ordering::SeqCst) {
                        info!("[importer] termination requested");
                        handle.stop();
                        break;
                    }
                }
            }
        }
    })
}
