use log::{info, warn};

use std::sync::Arc;

use super::chunk::ChunkStore;
use super::storage::{meta, u64_key, Storage, StorageError, StorageTransaction, Table};
use super::transaction::{NewTransaction, Transaction, TransactionError, TransactionStatus};
use super::wallet::WalletLedger;

/// Accepts, validates and holds transactions until they are mined.
///
/// Pending transactions are indexed by submission sequence in the
/// `Pending` table; the full record (pending or confirmed) lives in
/// `Transactions`, so an id can never be in both sets at once.
#[derive(Debug, Clone)]
pub struct TransactionPool {
    storage: Arc<Storage>,
    wallets: WalletLedger,
    chunks: ChunkStore,

    /// Largest `data_size` a single transaction may announce
    max_data_size: u64,
}

impl TransactionPool {
    pub fn new(
        storage: Arc<Storage>,
        wallets: WalletLedger,
        chunks: ChunkStore,
        max_data_size: u64,
    ) -> Self {
        TransactionPool {
            storage,
            wallets,
            chunks,
            max_data_size,
        }
    }

    /// Validates a transaction and stores it as pending
    ///
    /// # Returns
    ///
    /// The id of the accepted transaction
    pub fn submit(&self, request: NewTransaction) -> Result<String, TransactionError> {
        let owner = request.validate(self.max_data_size)?.clone();
        let id = request.resolved_id();

        if self
            .storage
            .find::<Transaction>(Table::Transactions, &id)?
            .is_some()
        {
            return Err(TransactionError::DuplicateTransaction(id));
        }

        // Advisory only: several pending transactions may still overdraw
        // together, which mining resolves by deferring the late ones.
        let required = request.quantity + request.fee;
        let available = self.wallets.get_balance(&owner)?;
        if available < required {
            return Err(TransactionError::InsufficientFunds {
                required,
                available,
            });
        }

        let mut txn = self.storage.begin_transaction();
        let sequence = txn.counter(meta::NEXT_SEQUENCE)?;
        txn.set_counter(meta::NEXT_SEQUENCE, sequence + 1)?;

        let weave_start = txn.counter(meta::WEAVE_SIZE)?;
        let data_size = request.effective_data_size();
        let weave_size = weave_start.checked_add(data_size).ok_or_else(|| {
            TransactionError::Invalid(format!("data_size {} exhausts the weave", data_size))
        })?;
        txn.set_counter(meta::WEAVE_SIZE, weave_size)?;

        let transaction = Transaction::from_submission(request, id.clone(), owner, sequence, weave_start);
        txn.put(Table::Transactions, &id, &transaction)?;
        txn.put(Table::Pending, u64_key(sequence), &id)?;
        txn.commit()?;

        info!(
            "Accepted transaction {} from {} (quantity {}, fee {}, {} bytes)",
            id, transaction.owner, transaction.quantity, transaction.fee, transaction.data_size
        );
        Ok(id)
    }

    /// Gets a transaction whatever its status
    pub fn get(&self, id: &str) -> Result<Transaction, TransactionError> {
        self.storage
            .find(Table::Transactions, id)?
            .ok_or_else(|| TransactionError::NotFound(id.to_string()))
    }

    /// Finds the transaction announcing `data_root`
    pub fn find_by_data_root(&self, data_root: &str) -> Result<Transaction, TransactionError> {
        self.storage
            .scan(Table::Transactions, |tx: &Transaction| {
                tx.data_root.as_deref() == Some(data_root)
            })?
            .into_iter()
            .min_by_key(|tx| tx.sequence)
            .ok_or_else(|| TransactionError::NotFound(format!("data root {}", data_root)))
    }

    /// Pending transactions in submission order
    pub fn list_pending(&self) -> Result<Vec<Transaction>, TransactionError> {
        let ids = self.storage.scan(Table::Pending, |_: &String| true)?;
        let mut pending = Vec::with_capacity(ids.len());
        for id in ids {
            let transaction = self
                .storage
                .find::<Transaction>(Table::Transactions, &id)?
                .ok_or_else(|| {
                    StorageError::CorruptState(format!("pending transaction {} has no record", id))
                })?;
            pending.push(transaction);
        }
        Ok(pending)
    }

    pub fn pending_count(&self) -> usize {
        self.storage.len(Table::Pending)
    }

    /// Stages the confirmation of `transaction` into `block_id`
    pub fn confirm(
        &self,
        txn: &mut StorageTransaction<'_>,
        transaction: &mut Transaction,
        block_id: &str,
    ) -> Result<(), TransactionError> {
        transaction.status = TransactionStatus::Confirmed;
        transaction.block_id = Some(block_id.to_string());
        txn.put(Table::Transactions, &transaction.id, transaction)?;
        txn.delete(Table::Pending, u64_key(transaction.sequence));
        Ok(())
    }

    /// Deletes a transaction and its chunks.
    ///
    /// Allowed on confirmed transactions as a test affordance. Balances moved
    /// by a confirmed transaction stay as they are, and the block that
    /// includes it keeps listing its id.
    pub fn remove(&self, id: &str) -> Result<Transaction, TransactionError> {
        let transaction = self.get(id)?;

        let mut txn = self.storage.begin_transaction();
        txn.delete(Table::Transactions, id);
        if transaction.is_pending() {
            txn.delete(Table::Pending, u64_key(transaction.sequence));
        } else {
            warn!(
                "Removing confirmed transaction {}; balances are not rolled back",
                id
            );
        }
        let chunk_count = self.chunks.delete_for_transaction(&mut txn, &transaction)?;
        txn.commit()?;

        info!("Removed transaction {} and {} chunks", id, chunk_count);
        Ok(transaction)
    }
}
