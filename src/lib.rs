//! # Eth Ingest
//!
//! Imports a fixed range of Ethereum blocks from a local node's IPC socket into storage.
//! Every block is written to the block store, and its transactions are handed to the
//! transaction store over an in-process message bus.
//!
//! ## Architecture Overview
//!
//! ### Public API Modules
//! - [`importer`] - the import run, its configuration and the service around it
//! - [`errors`] - error types shared by every layer
//! - [`records`] - block and transaction records as they are stored
//! - [`types`] - `BlockNumber` and `BlockHash`
//!
//! ### Facade Modules (Simplified Interfaces)
//! - [`node`] - IPC access to the node
//! - [`storage`] - storage sinks and the database connection
//! - [`numeric`] - decoding of the node's hex quantities
//!
//! ### Internal Modules (Implementation Details)
//! - `bus` - in-process message bus and the transaction handler
//! - `db` - Postgres pool and migrations
//! - `ipc` - JSON-RPC over a Unix socket
//! - `repositories` - the storage sinks
//! - `router` - HTTP health and status endpoints
//! - `utils` - hex quantity decoding
//!
//! ```text
//! ┌──────────────┐  fetch   ┌────────────────┐  put    ┌──────────────────┐
//! │  IpcClient   │ ───────> │  BlockImporter │ ──────> │  block storage   │
//! └──────────────┘          └────────────────┘         └──────────────────┘
//!                                   │ send
//!                                   v
//!                           ┌────────────────┐  put_all ┌──────────────────┐
//!                           │    LocalBus    │ ───────> │ transaction store│
//!                           └────────────────┘          └──────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use eth_ingest::importer::lib::{start_import_service, ApplicationConfig, ServiceConfig};
//! use std::sync::{Arc, atomic::AtomicBool};
//!
//! # async fn example() -> eyre::Result<()> {
//! let file = ApplicationConfig::load("config.json".as_ref())?;
//! let import_config = file.builder()?.build()?;
//! let service_config = ServiceConfig::resolve(Some(&file), None, None, None)?;
//!
//! start_import_service(import_config, service_config, Arc::new(AtomicBool::new(false))).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Core public modules
pub mod errors;
pub mod importer;
pub mod records;
pub mod types;

// Internal modules (not part of public API)
pub mod bus;
pub mod db;
pub mod ipc;
pub mod repositories;
pub mod router;
mod utils;

#[cfg(test)]
mod mocks;
#[cfg(test)]
mod test_utils;

// Public re-exports for simplified API
pub use errors::{ErrorKind, IngestError, Result};
pub use importer::block_service::{BlockImporter, ImportHandle, ImportOutcome, ImportState};
pub use types::{BlockHash, BlockNumber};

pub mod node {
    //! Node access facade
    //!
    //! The IPC client and the block shapes it returns.

    pub use crate::ipc::{client::IpcClient, BlockSource, BlockTransaction, RawBlock, RawTransaction};
}

pub mod storage {
    //! Storage facade
    //!
    //! The storage trait, its backends and the database connection they share.

    pub use crate::db::{DbConnection, DB_MAX_CONNECTIONS};
    pub use crate::repositories::{
        block::PgBlockStorage, memory::InMemoryStorage, transaction::PgTransactionStorage,
        AsyncStorage,
    };
}

pub mod numeric {
    //! Hex quantity decoding facade

    pub use crate::utils::{decode_i64, decode_quantity};
}
