use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use thiserror::Error;

use super::ErrorKind;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Item not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::CorruptState(_) => ErrorKind::CorruptState,
            StorageError::DatabaseError(_) | StorageError::SerializationError(_) => {
                ErrorKind::Storage
            }
        }
    }
}

/// The independently addressable tables of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// Block id -> Block
    Blocks,
    /// Height (u64 big endian) -> block id
    BlockHeights,
    /// Transaction id -> Transaction, pending and confirmed alike
    Transactions,
    /// Submission sequence (u64 big endian) -> transaction id
    Pending,
    /// Absolute weave offset (u64 big endian) -> Chunk
    Chunks,
    /// Address -> Wallet
    Wallets,
    /// Chain tip and counters
    Metadata,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Blocks,
        Table::BlockHeights,
        Table::Transactions,
        Table::Pending,
        Table::Chunks,
        Table::Wallets,
        Table::Metadata,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Blocks => "blocks",
            Table::BlockHeights => "block_heights",
            Table::Transactions => "transactions",
            Table::Pending => "pending",
            Table::Chunks => "chunks",
            Table::Wallets => "wallets",
            Table::Metadata => "metadata",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Well-known keys of the metadata table
pub mod meta {
    pub const CURRENT_BLOCK: &str = "current_block";
    pub const NEXT_SEQUENCE: &str = "next_sequence";
    pub const WEAVE_SIZE: &str = "weave_size";
}

/// Encodes a numeric key so that sled's lexicographic order matches numeric order
pub fn u64_key(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decodes a key written by [`u64_key`]
pub fn decode_u64_key(table: Table, key: &[u8]) -> Result<u64, StorageError> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| {
        StorageError::CorruptState(format!(
            "{} key {} is not an 8 byte integer",
            table.name(),
            describe_key(key)
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}

fn describe_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(text) if text.chars().all(|c| !c.is_control()) => text.to_string(),
        _ => hex::encode(key),
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(record).map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(table: Table, key: &[u8], bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes).map_err(|e| {
        StorageError::CorruptState(format!(
            "{} record {} could not be decoded: {}",
            table.name(),
            describe_key(key),
            e
        ))
    })
}

fn not_found(table: Table, key: &[u8]) -> StorageError {
    StorageError::NotFound(format!("{} {}", table.name(), describe_key(key)))
}

/// Durable storage for ledger data
pub struct Storage {
    /// The database instance
    db: Db,

    /// One tree per table, indexed by `Table::index`
    trees: Vec<Tree>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("tables", &Table::ALL.len())
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Opens (or creates) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        info!("Opened ledger storage at {}", path.as_ref().display());
        Self::from_db(db)
    }

    /// Opens a database that is removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let trees = Table::ALL
            .iter()
            .map(|table| db.open_tree(table.name()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { db, trees })
    }

    fn tree(&self, table: Table) -> &Tree {
        &self.trees[table.index()]
    }

    /// Gets a record, failing with `NotFound` when the key is absent
    pub fn get<T: DeserializeOwned>(
        &self,
        table: Table,
        key: impl AsRef<[u8]>,
    ) -> Result<T, StorageError> {
        let key = key.as_ref();
        self.find(table, key)?.ok_or_else(|| not_found(table, key))
    }

    /// Gets a record if present
    pub fn find<T: DeserializeOwned>(
        &self,
        table: Table,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<T>, StorageError> {
        let key = key.as_ref();
        match self.tree(table).get(key)? {
            Some(value) => Ok(Some(decode(table, key, &value)?)),
            None => Ok(None),
        }
    }

    /// Writes a single record
    pub fn put<T: Serialize>(
        &self,
        table: Table,
        key: impl AsRef<[u8]>,
        record: &T,
    ) -> Result<(), StorageError> {
        let value = encode(record)?;
        self.tree(table).insert(key.as_ref(), value)?;
        self.db.flush()?;
        Ok(())
    }

    /// Removes a single record; absent keys are ignored
    pub fn delete(&self, table: Table, key: impl AsRef<[u8]>) -> Result<(), StorageError> {
        self.tree(table).remove(key.as_ref())?;
        self.db.flush()?;
        Ok(())
    }

    /// Returns every record of `table` matching `predicate`, in key order
    pub fn scan<T, F>(&self, table: Table, mut predicate: F) -> Result<Vec<T>, StorageError>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        let mut records = Vec::new();
        for entry in self.tree(table).iter() {
            let (key, value) = entry?;
            let record: T = decode(table, &key, &value)?;
            if predicate(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Returns the records keyed by integers in `[start, end)`, in key order
    pub fn scan_range<T: DeserializeOwned>(
        &self,
        table: Table,
        start: u64,
        end: u64,
    ) -> Result<Vec<(u64, T)>, StorageError> {
        let mut records = Vec::new();
        if start >= end {
            return Ok(records);
        }
        for entry in self.tree(table).range(u64_key(start)..u64_key(end)) {
            let (key, value) = entry?;
            records.push((decode_u64_key(table, &key)?, decode(table, &key, &value)?));
        }
        Ok(records)
    }

    /// Returns the record with the greatest integer key strictly below `end`
    pub fn last_before<T: DeserializeOwned>(
        &self,
        table: Table,
        end: u64,
    ) -> Result<Option<(u64, T)>, StorageError> {
        match self.tree(table).range(..u64_key(end)).next_back() {
            Some(entry) => {
                let (key, value) = entry?;
                Ok(Some((decode_u64_key(table, &key)?, decode(table, &key, &value)?)))
            }
            None => Ok(None),
        }
    }

    /// Number of records in `table`
    pub fn len(&self, table: Table) -> usize {
        self.tree(table).len()
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.tree(table).is_empty()
    }

    /// Starts an atomic unit of work over all tables
    pub fn begin_transaction(&self) -> StorageTransaction<'_> {
        StorageTransaction {
            storage: self,
            writes: BTreeMap::new(),
        }
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

/// A buffered set of writes that is applied to all tables at once.
///
/// Reads through the transaction observe its own uncommitted writes. Nothing
/// reaches the database until [`StorageTransaction::commit`]; dropping the
/// transaction (or calling [`StorageTransaction::rollback`]) discards it.
pub struct StorageTransaction<'a> {
    storage: &'a Storage,

    /// `None` marks a deletion
    writes: BTreeMap<(Table, Vec<u8>), Option<Vec<u8>>>,
}

impl<'a> StorageTransaction<'a> {
    pub fn get<T: DeserializeOwned>(
        &self,
        table: Table,
        key: impl AsRef<[u8]>,
    ) -> Result<T, StorageError> {
        let key = key.as_ref();
        self.find(table, key)?.ok_or_else(|| not_found(table, key))
    }

    pub fn find<T: DeserializeOwned>(
        &self,
        table: Table,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<T>, StorageError> {
        let key = key.as_ref();
        match self.writes.get(&(table, key.to_vec())) {
            Some(Some(value)) => Ok(Some(decode(table, key, value)?)),
            Some(None) => Ok(None),
            None => self.storage.find(table, key),
        }
    }

    pub fn put<T: Serialize>(
        &mut self,
        table: Table,
        key: impl AsRef<[u8]>,
        record: &T,
    ) -> Result<(), StorageError> {
        let value = encode(record)?;
        self.writes.insert((table, key.as_ref().to_vec()), Some(value));
        Ok(())
    }

    pub fn delete(&mut self, table: Table, key: impl AsRef<[u8]>) {
        self.writes.insert((table, key.as_ref().to_vec()), None);
    }

    /// Marks every record of `table` for deletion
    pub fn clear(&mut self, table: Table) -> Result<(), StorageError> {
        for key in self.storage.tree(table).iter().keys() {
            self.writes.insert((table, key?.to_vec()), None);
        }
        for ((pending_table, _), value) in self.writes.iter_mut() {
            if *pending_table == table {
                *value = None;
            }
        }
        Ok(())
    }

    /// Reads a metadata counter, zero when unset
    pub fn counter(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.find(Table::Metadata, key)?.unwrap_or(0))
    }

    pub fn set_counter(&mut self, key: &str, value: u64) -> Result<(), StorageError> {
        self.put(Table::Metadata, key, &value)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies every buffered write in one sled transaction and flushes it
    pub fn commit(self) -> Result<(), StorageError> {
        if self.writes.is_empty() {
            return Ok(());
        }

        let writes = &self.writes;
        let result: TransactionResult<(), ()> =
            self.storage.trees.as_slice().transaction(|trees| {
                for ((table, key), value) in writes.iter() {
                    let tree = &trees[table.index()];
                    match value {
                        Some(bytes) => {
                            tree.insert(key.as_slice(), bytes.as_slice())?;
                        }
                        None => {
                            tree.remove(key.as_slice())?;
                        }
                    }
                }
                Ok(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Storage(e)) => return Err(StorageError::DatabaseError(e)),
            Err(TransactionError::Abort(())) => {
                return Err(StorageError::CorruptState(
                    "storage transaction aborted".to_string(),
                ))
            }
        }

        self.storage.flush()?;
        debug!("Committed {} storage writes", self.writes.len());
        Ok(())
    }

    /// Discards every buffered write
    pub fn rollback(self) {
        debug!("Rolled back {} storage writes", self.writes.len());
    }
}
