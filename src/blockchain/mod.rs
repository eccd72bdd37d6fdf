// Blockchain module
//
// This module contains the ledger core of the emulator:
// - Storage backend with atomic multi-table commits
// - Wallet ledger
// - Chunk store
// - Transaction pool and validator
// - Block chain manager (mining)
// - Network status view

pub mod block;
pub mod chain;
pub mod chunk;
pub mod crypto;
pub mod mempool;
pub mod network;
pub mod storage;
pub mod transaction;
pub mod wallet;

use serde::Serialize;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError};
pub use chunk::Chunk;
pub use crypto::Address;
pub use network::NetworkStatus;
pub use storage::Storage;
pub use transaction::{NewTransaction, Transaction, TransactionProjection};
pub use wallet::Wallet;

/// Caller-facing classification of ledger failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    DuplicateTransaction,
    InsufficientFunds,
    OverlapError,
    IncompleteData,
    CorruptState,
    InvalidInput,
    Forbidden,
    Storage,
}
