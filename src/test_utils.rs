//! # Test Utilities
//!
//! This module provides common utilities and helper functions for testing across the codebase.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::arithmetic_side_effects)]
#![allow(dead_code)]

#[cfg(test)]
pub mod test_data {
    use crate::ipc::{BlockTransaction, RawBlock, RawTransaction};
    use crate::types::BlockNumber;
    use serde_json::{Map, Value};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic 32-byte block hash for `height`
    pub fn block_hash(height: u64) -> String {
        format!("0x{height:064x}")
    }

    /// Deterministic transaction hash for the `index`-th transaction of `height`
    pub fn tx_hash(height: u64, index: usize) -> String {
        format!("0x{:032x}{:032x}", height, index)
    }

    /// Creates a full transaction body as the node reports it
    pub fn raw_tx(height: u64, index: usize) -> RawTransaction {
        RawTransaction {
            hash: tx_hash(height, index),
            nonce: Some(format!("0x{index:x}")),
            block_hash: Some(block_hash(height)),
            block_number: Some(BlockNumber::new(height).to_hex()),
            transaction_index: Some(format!("0x{index:x}")),
            from: Some("0x742d35cc6969c0532b5f52aa3d3f4d7b4a4f8c7e".to_string()),
            to: Some("0x8ba1f109551bd432803012645aac136c1235a67d".to_string()),
            value: Some("0xde0b6b3a7640000".to_string()), // 1 ETH in wei
            gas: Some("0x5208".to_string()),              // 21000 gas
            gas_price: Some("0x4a817c800".to_string()),   // 20 Gwei
            fields: Map::new(),
        }
    }

    /// Creates a block at `height` with `tx_count` full transactions
    pub fn raw_block(height: u64, timestamp: u64, tx_count: usize) -> RawBlock {
        let mut fields = Map::new();
        fields.insert(
            "parentHash".to_string(),
            Value::from(block_hash(height.saturating_sub(1))),
        );
        fields.insert("gasLimit".to_string(), Value::from("0x1c9c380"));

        RawBlock {
            hash: block_hash(height),
            number: BlockNumber::new(height).to_hex(),
            timestamp: format!("0x{timestamp:x}"),
            transactions: (0..tx_count)
                .map(|index| BlockTransaction::Full(Box::new(raw_tx(height, index))))
                .collect(),
            fields,
        }
    }

    /// Unique socket path under the temp dir; nothing exists at it yet
    pub fn socket_path(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "ingest-{name}-{}-{n}.ipc",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }
}

#[cfg(test)]
pub mod assertions {
    use crate::types::BlockNumber;

    /// Asserts that block numbers are in ascending order
    pub fn assert_blocks_ascending(blocks: &[BlockNumber]) {
        for window in blocks.windows(2) {
            assert!(
                window[0].value() < window[1].value(),
                "Blocks not in ascending order: {} >= {}",
                window[0].value(),
                window[1].value()
            );
        }
    }

    /// Asserts that block numbers are within the half-open range `[min, max)`
    pub fn assert_blocks_in_range(blocks: &[BlockNumber], min: u64, max: u64) {
        for block in blocks {
            assert!(
                block.value() >= min && block.value() < max,
                "Block {} is outside range [{}, {})",
                block.value(),
                min,
                max
            );
        }
    }
}
