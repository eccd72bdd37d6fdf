use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::sync::Arc;

use super::storage::{u64_key, Storage, StorageError, StorageTransaction, Table};
use super::transaction::Transaction;
use super::ErrorKind;

/// Errors that can occur during chunk operations
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("No chunk starts at offset {0}")]
    NotFound(u64),

    #[error("Chunk at offset {offset} overlaps chunk at {existing} of transaction {existing_transaction}")]
    Overlap {
        offset: u64,
        existing: u64,
        existing_transaction: String,
    },

    #[error("Data of transaction {transaction_id} is incomplete: missing bytes from {missing_from}")]
    IncompleteData {
        transaction_id: String,
        missing_from: u64,
    },

    #[error("Chunk [{offset}, {end}) lies outside the {data_size} bytes of transaction {transaction_id}")]
    OutOfBounds {
        transaction_id: String,
        offset: u64,
        end: u64,
        data_size: u64,
    },

    #[error("Chunk is empty")]
    Empty,

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl ChunkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkError::NotFound(_) | ChunkError::UnknownTransaction(_) => ErrorKind::NotFound,
            ChunkError::Overlap { .. } => ErrorKind::OverlapError,
            ChunkError::IncompleteData { .. } => ErrorKind::IncompleteData,
            ChunkError::OutOfBounds { .. } | ChunkError::Empty => ErrorKind::InvalidInput,
            ChunkError::StorageError(e) => e.kind(),
        }
    }
}

/// A fragment of a transaction's data, stored at its absolute weave offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub transaction_id: String,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    /// One past the last absolute offset covered by this chunk
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Offset-addressed storage for transaction data.
///
/// Offsets form one global address space. Each transaction owns the range
/// `[weave_start, weave_start + data_size)` reserved when it was submitted,
/// and callers address chunks relative to that start.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    storage: Arc<Storage>,
}

impl ChunkStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        ChunkStore { storage }
    }

    fn transaction(&self, transaction_id: &str) -> Result<Transaction, ChunkError> {
        self.storage
            .find(Table::Transactions, transaction_id)?
            .ok_or_else(|| ChunkError::UnknownTransaction(transaction_id.to_string()))
    }

    /// Stores `data` at `offset` bytes into the transaction's data.
    ///
    /// Re-posting an identical chunk is a no-op.
    pub fn put_chunk(
        &self,
        transaction_id: &str,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Chunk, ChunkError> {
        if data.is_empty() {
            return Err(ChunkError::Empty);
        }

        let transaction = self.transaction(transaction_id)?;
        let end = offset.saturating_add(data.len() as u64);
        if end > transaction.data_size {
            return Err(ChunkError::OutOfBounds {
                transaction_id: transaction_id.to_string(),
                offset,
                end,
                data_size: transaction.data_size,
            });
        }

        let chunk = Chunk {
            transaction_id: transaction.id.clone(),
            offset: transaction.weave_start + offset,
            data,
        };

        if let Some(existing) = self.storage.find::<Chunk>(Table::Chunks, u64_key(chunk.offset))? {
            if existing == chunk {
                debug!("Chunk at {} already stored", chunk.offset);
                return Ok(chunk);
            }
        }

        // Stored chunks never overlap each other, so only the closest one
        // starting before our end can collide.
        if let Some((start, existing)) = self.storage.last_before::<Chunk>(Table::Chunks, chunk.end())? {
            if existing.end() > chunk.offset {
                return Err(ChunkError::Overlap {
                    offset: chunk.offset,
                    existing: start,
                    existing_transaction: existing.transaction_id,
                });
            }
        }

        self.storage.put(Table::Chunks, u64_key(chunk.offset), &chunk)?;
        debug!(
            "Stored {} bytes at offset {} for transaction {}",
            chunk.data.len(),
            chunk.offset,
            chunk.transaction_id
        );
        Ok(chunk)
    }

    /// Gets the chunk starting exactly at the absolute `offset`
    pub fn get_chunk_at_offset(&self, offset: u64) -> Result<Chunk, ChunkError> {
        self.storage
            .find(Table::Chunks, u64_key(offset))?
            .ok_or(ChunkError::NotFound(offset))
    }

    /// Concatenates the chunks of a transaction in offset order
    pub fn reassemble(&self, transaction_id: &str) -> Result<Vec<u8>, ChunkError> {
        let transaction = self.transaction(transaction_id)?;
        self.reassemble_transaction(&transaction)
    }

    pub fn reassemble_transaction(&self, transaction: &Transaction) -> Result<Vec<u8>, ChunkError> {
        let (chunks, covered) = self.leading_chunks(transaction)?;
        if covered != transaction.weave_end() {
            return Err(ChunkError::IncompleteData {
                transaction_id: transaction.id.clone(),
                missing_from: covered - transaction.weave_start,
            });
        }

        let mut data = Vec::new();
        for chunk in chunks {
            data.extend_from_slice(&chunk.data);
        }
        Ok(data)
    }

    /// Whether stored chunks cover the transaction's whole data range
    pub fn is_complete(&self, transaction: &Transaction) -> Result<bool, ChunkError> {
        let (_, covered) = self.leading_chunks(transaction)?;
        Ok(covered == transaction.weave_end())
    }

    /// The gap-free run of chunks from the start of the transaction's
    /// range, and the absolute offset where that run ends
    fn leading_chunks(&self, transaction: &Transaction) -> Result<(Vec<Chunk>, u64), ChunkError> {
        let stored = self.storage.scan_range::<Chunk>(
            Table::Chunks,
            transaction.weave_start,
            transaction.weave_end(),
        )?;

        let mut chunks = Vec::new();
        let mut cursor = transaction.weave_start;
        for (start, chunk) in stored {
            if start != cursor {
                break;
            }
            cursor = chunk.end();
            chunks.push(chunk);
        }
        Ok((chunks, cursor))
    }

    /// Stages the deletion of every chunk owned by `transaction`
    pub fn delete_for_transaction(
        &self,
        txn: &mut StorageTransaction<'_>,
        transaction: &Transaction,
    ) -> Result<usize, ChunkError> {
        let chunks = self.storage.scan_range::<Chunk>(
            Table::Chunks,
            transaction.weave_start,
            transaction.weave_end(),
        )?;
        for (start, _) in &chunks {
            txn.delete(Table::Chunks, u64_key(*start));
        }
        Ok(chunks.len())
    }
}
