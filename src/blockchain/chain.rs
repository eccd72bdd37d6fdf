use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use thiserror::Error;

use std::sync::Arc;

use super::block::Block;
use super::chunk::{Chunk, ChunkError, ChunkStore};
use super::crypto::Address;
use super::mempool::TransactionPool;
use super::network::NetworkStatus;
use super::storage::{meta, u64_key, Storage, StorageError, Table};
use super::transaction::{
    content_type_for_extension, default_content_type, NewTransaction, ProjectionValue,
    Transaction, TransactionError, TransactionOffset, TransactionProjection, TransactionStatusView,
};
use super::wallet::{Wallet, WalletError, WalletLedger};
use super::ErrorKind;
use crate::config::{Capabilities, LedgerConfig};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Wallet error: {0}")]
    WalletError(#[from] WalletError),

    #[error("Chunk error: {0}")]
    ChunkError(#[from] ChunkError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Chain has no genesis block yet")]
    Uninitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),
}

impl BlockchainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockchainError::TransactionError(e) => e.kind(),
            BlockchainError::WalletError(e) => e.kind(),
            BlockchainError::ChunkError(e) => e.kind(),
            BlockchainError::StorageError(e) => e.kind(),
            BlockchainError::BlockNotFound(_) => ErrorKind::NotFound,
            BlockchainError::Uninitialized | BlockchainError::InvalidArgument(_) => {
                ErrorKind::InvalidInput
            }
            BlockchainError::CorruptState(_) => ErrorKind::CorruptState,
        }
    }
}

/// Authoritative chain tip, guarded by the global write lock
#[derive(Debug, Clone, Default)]
struct ChainState {
    /// `None` until genesis
    height: Option<u64>,
    current_block_id: Option<String>,
}

/// The ledger: chain manager plus the components it drives.
///
/// Every mutating operation holds the write side of `state` for its whole
/// atomic unit; reads hold the read side, so they only wait behind an
/// in-flight write.
pub struct Blockchain {
    storage: Arc<Storage>,

    /// Chain tip; doubles as the global write lock
    state: RwLock<ChainState>,

    wallets: WalletLedger,

    chunks: ChunkStore,

    pool: TransactionPool,

    config: LedgerConfig,

    /// Random source for simulated mining failures
    rng: Mutex<StdRng>,

    /// Process start, used as the genesis timestamp
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Blockchain")
            .field("height", &state.height)
            .field("current_block_id", &state.current_block_id)
            .finish_non_exhaustive()
    }
}

impl Blockchain {
    /// Creates a ledger on a throwaway database
    pub fn new(config: LedgerConfig) -> Result<Self, BlockchainError> {
        Self::from_storage(Arc::new(Storage::temporary()?), config)
    }

    pub fn from_storage(storage: Arc<Storage>, config: LedgerConfig) -> Result<Self, BlockchainError> {
        let state = Self::load_state(&storage)?;
        match &state.current_block_id {
            Some(id) => info!("Resumed chain at height {:?} ({})", state.height, id),
            None => info!("No chain found in storage"),
        }

        let wallets = WalletLedger::new(storage.clone());
        let chunks = ChunkStore::new(storage.clone());
        let pool = TransactionPool::new(
            storage.clone(),
            wallets.clone(),
            chunks.clone(),
            config.max_data_size,
        );
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Blockchain {
            storage,
            state: RwLock::new(state),
            wallets,
            chunks,
            pool,
            config,
            rng: Mutex::new(rng),
            started_at: Utc::now(),
        })
    }

    fn load_state(storage: &Storage) -> Result<ChainState, BlockchainError> {
        let current: Option<String> = storage.find(Table::Metadata, meta::CURRENT_BLOCK)?;

        match current {
            Some(id) => {
                let block: Block = storage.find(Table::Blocks, &id)?.ok_or_else(|| {
                    BlockchainError::CorruptState(format!("chain tip {} has no block record", id))
                })?;
                Ok(ChainState {
                    height: Some(block.height),
                    current_block_id: Some(id),
                })
            }
            None if storage.is_empty(Table::Blocks) => Ok(ChainState::default()),
            None => Err(BlockchainError::CorruptState(
                "blocks are stored but no chain tip is recorded".to_string(),
            )),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.config.capabilities
    }

    /// Creates the height-0 block unless the chain already has one
    ///
    /// # Returns
    ///
    /// The id of the genesis block, or of the current tip when it already exists
    pub fn mine_genesis_block(&self) -> Result<String, BlockchainError> {
        let mut state = self.state.write();
        if let Some(id) = &state.current_block_id {
            debug!("Genesis skipped, chain already at {}", id);
            return Ok(id.clone());
        }

        let genesis = Block::genesis(self.started_at, self.config.reward_address.clone());

        let mut txn = self.storage.begin_transaction();
        txn.put(Table::Blocks, &genesis.id, &genesis)?;
        txn.put(Table::BlockHeights, u64_key(0), &genesis.id)?;
        txn.put(Table::Metadata, meta::CURRENT_BLOCK, &genesis.id)?;
        txn.commit()?;

        state.height = Some(0);
        state.current_block_id = Some(genesis.id.clone());
        info!("Created genesis block {}", genesis.id);
        Ok(genesis.id)
    }

    /// Mines `quantity` blocks from the pending pool
    pub fn mine(&self, quantity: u64) -> Result<Vec<Block>, BlockchainError> {
        self.mine_blocks(quantity, &mut |_: &Transaction| false)
    }

    /// Mines like [`Blockchain::mine`], but every otherwise accepted
    /// transaction is left pending with probability `failure_rate`
    pub fn mine_with_failures(
        &self,
        quantity: u64,
        failure_rate: f64,
    ) -> Result<Vec<Block>, BlockchainError> {
        let mut rng = self.rng.lock();
        self.mine_with_failures_using(quantity, failure_rate, &mut *rng)
    }

    /// [`Blockchain::mine_with_failures`] with a caller-supplied random source
    pub fn mine_with_failures_using<R: Rng + ?Sized>(
        &self,
        quantity: u64,
        failure_rate: f64,
        rng: &mut R,
    ) -> Result<Vec<Block>, BlockchainError> {
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(BlockchainError::InvalidArgument(format!(
                "failure rate {} is outside [0, 1]",
                failure_rate
            )));
        }

        self.mine_blocks(quantity, &mut |_: &Transaction| rng.gen_bool(failure_rate))
    }

    fn mine_blocks(
        &self,
        quantity: u64,
        fails: &mut dyn FnMut(&Transaction) -> bool,
    ) -> Result<Vec<Block>, BlockchainError> {
        if quantity == 0 {
            return Err(BlockchainError::InvalidArgument(
                "mining quantity must be at least 1".to_string(),
            ));
        }

        let mut state = self.state.write();
        let mut blocks = Vec::new();
        for _ in 0..quantity {
            blocks.push(self.mine_single_block(&mut state, fails)?);
        }
        Ok(blocks)
    }

    /// One atomic mining step; `state` only advances once the commit succeeded
    fn mine_single_block(
        &self,
        state: &mut ChainState,
        fails: &mut dyn FnMut(&Transaction) -> bool,
    ) -> Result<Block, BlockchainError> {
        let previous = state
            .current_block_id
            .clone()
            .ok_or(BlockchainError::Uninitialized)?;
        let height = state.height.map_or(0, |h| h + 1);
        let reward_address = &self.config.reward_address;

        let mut txn = self.storage.begin_transaction();
        let mut accepted = Vec::new();
        for transaction in self.pool.list_pending()? {
            let cost = transaction.total_cost().ok_or_else(|| {
                BlockchainError::CorruptState(format!("transaction {} cost overflows", transaction.id))
            })?;

            let mut credits = Vec::with_capacity(2);
            if let Some(target) = &transaction.target {
                credits.push((target, transaction.quantity));
            }
            credits.push((reward_address, transaction.fee));
            let wallets = match self
                .wallets
                .plan_transfer(&txn, &transaction.owner, cost, &credits)
            {
                Ok(wallets) => wallets,
                Err(e @ (WalletError::InsufficientFunds { .. } | WalletError::Overflow(_))) => {
                    debug!("Deferring {}: {}", transaction.id, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if transaction.data.is_empty()
                && transaction.data_size > 0
                && !self.chunks.is_complete(&transaction)?
            {
                debug!("Deferring {}: chunked data is incomplete", transaction.id);
                continue;
            }
            if fails(&transaction) {
                debug!("Simulated failure left {} pending", transaction.id);
                continue;
            }

            self.wallets.stage(&mut txn, &wallets)?;
            accepted.push(transaction);
        }

        if self.config.reward_per_block > 0 {
            let reward = self.config.reward_per_block;
            match self.wallets.credit(&mut txn, reward_address, reward) {
                Ok(_) => {}
                Err(WalletError::Overflow(_)) => {
                    warn!("Block reward skipped, {} would overflow", reward_address);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let block = Block::new(
            height,
            Some(previous),
            Utc::now(),
            accepted.iter().map(|tx| tx.id.clone()).collect(),
            txn.counter(meta::WEAVE_SIZE)?,
            reward_address.clone(),
        );

        for transaction in accepted.iter_mut() {
            self.wallets
                .record_last_tx(&mut txn, &transaction.owner, &transaction.id)?;
            if let Some(target) = &transaction.target {
                self.wallets.record_last_tx(&mut txn, target, &transaction.id)?;
            }
            self.pool.confirm(&mut txn, transaction, &block.id)?;
        }

        txn.put(Table::Blocks, &block.id, &block)?;
        txn.put(Table::BlockHeights, u64_key(height), &block.id)?;
        txn.put(Table::Metadata, meta::CURRENT_BLOCK, &block.id)?;
        txn.commit()?;

        state.height = Some(height);
        state.current_block_id = Some(block.id.clone());
        info!(
            "Mined block {} at height {} with {} transactions",
            block.id,
            height,
            block.transaction_ids.len()
        );
        Ok(block)
    }

    /// Gets the chain tip
    pub fn get_last_block(&self) -> Result<Option<Block>, BlockchainError> {
        let state = self.state.read();
        match &state.current_block_id {
            Some(id) => Ok(Some(self.load_block(id)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_hash(&self, id: &str) -> Result<Block, BlockchainError> {
        let _state = self.state.read();
        self.storage
            .find(Table::Blocks, id)?
            .ok_or_else(|| BlockchainError::BlockNotFound(id.to_string()))
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Block, BlockchainError> {
        let state = self.state.read();
        match state.height {
            Some(current) if height <= current => {}
            _ => return Err(BlockchainError::BlockNotFound(format!("height {}", height))),
        }

        let id: String = self
            .storage
            .find(Table::BlockHeights, u64_key(height))?
            .ok_or_else(|| {
                BlockchainError::CorruptState(format!("height {} has no block id", height))
            })?;
        self.load_block(&id)
    }

    /// Loads a block that the chain is known to reference
    fn load_block(&self, id: &str) -> Result<Block, BlockchainError> {
        self.storage.find(Table::Blocks, id)?.ok_or_else(|| {
            BlockchainError::CorruptState(format!("referenced block {} is missing", id))
        })
    }

    /// Walks the chain from genesis, checking heights, links and ids
    pub fn verify_chain(&self) -> Result<bool, BlockchainError> {
        let state = self.state.read();
        let Some(tip) = state.height else {
            return Ok(true);
        };

        let mut previous: Option<String> = None;
        for height in 0..=tip {
            let id: String = self
                .storage
                .find(Table::BlockHeights, u64_key(height))?
                .ok_or_else(|| {
                    BlockchainError::CorruptState(format!("height {} has no block id", height))
                })?;
            let block = self.load_block(&id)?;

            if block.height != height || block.previous != previous || block.id != block.calculate_hash() {
                warn!("Chain verification failed at height {}", height);
                return Ok(false);
            }
            previous = Some(block.id);
        }

        Ok(previous == state.current_block_id)
    }

    /// Clears every table and returns to the uninitialized state
    pub fn reset(&self) -> Result<(), BlockchainError> {
        let mut state = self.state.write();

        let mut txn = self.storage.begin_transaction();
        for table in Table::ALL {
            txn.clear(table)?;
        }
        txn.commit()?;

        *state = ChainState::default();
        info!("Chain reset");
        Ok(())
    }

    /// Current network status, recomputed from the chain tip
    pub fn network_status(&self) -> NetworkStatus {
        let state = self.state.read();
        NetworkStatus::project(
            state.height,
            state.current_block_id.clone(),
            self.pool.pending_count(),
            &self.config,
        )
    }

    pub fn submit_transaction(&self, request: NewTransaction) -> Result<String, BlockchainError> {
        let _state = self.state.write();
        Ok(self.pool.submit(request)?)
    }

    pub fn get_transaction(&self, id: &str) -> Result<Transaction, BlockchainError> {
        let _state = self.state.read();
        Ok(self.pool.get(id)?)
    }

    pub fn list_pending(&self) -> Result<Vec<Transaction>, BlockchainError> {
        let _state = self.state.read();
        Ok(self.pool.list_pending()?)
    }

    /// Administrative deletion; see [`TransactionPool::remove`]
    pub fn remove_transaction(&self, id: &str) -> Result<Transaction, BlockchainError> {
        let _state = self.state.write();
        Ok(self.pool.remove(id)?)
    }

    /// Resolves one projection of a transaction
    pub fn project_transaction(
        &self,
        id: &str,
        projection: &TransactionProjection,
    ) -> Result<ProjectionValue, BlockchainError> {
        let state = self.state.read();
        let transaction = self.pool.get(id)?;

        let value = match projection {
            TransactionProjection::Field(field) => ProjectionValue::Json(transaction.field(*field)),
            TransactionProjection::Status => {
                let view = self.status_view(&state, &transaction)?;
                ProjectionValue::Json(json!(view))
            }
            TransactionProjection::Offset => {
                ProjectionValue::Json(json!(TransactionOffset::of(&transaction)))
            }
            TransactionProjection::Data => ProjectionValue::Bytes {
                content_type: transaction
                    .content_type()
                    .unwrap_or(default_content_type())
                    .to_string(),
                data: self.transaction_data(&transaction)?,
            },
            TransactionProjection::File(extension) => ProjectionValue::Bytes {
                content_type: transaction
                    .content_type()
                    .unwrap_or(content_type_for_extension(extension))
                    .to_string(),
                data: self.transaction_data(&transaction)?,
            },
        };
        Ok(value)
    }

    fn status_view(
        &self,
        state: &ChainState,
        transaction: &Transaction,
    ) -> Result<TransactionStatusView, BlockchainError> {
        let block = match &transaction.block_id {
            Some(id) => Some(self.load_block(id)?),
            None => None,
        };
        let confirmations = match (&block, state.height) {
            (Some(block), Some(tip)) => tip.saturating_sub(block.height) + 1,
            _ => 0,
        };

        Ok(TransactionStatusView {
            status: transaction.status,
            block_height: block.as_ref().map(|b| b.height),
            block_indep_hash: block.map(|b| b.id),
            number_of_confirmations: confirmations,
        })
    }

    /// Inline data when present, otherwise the reassembled chunks
    fn transaction_data(&self, transaction: &Transaction) -> Result<Vec<u8>, BlockchainError> {
        if !transaction.data.is_empty() {
            return Ok(transaction.data.clone());
        }
        Ok(self.chunks.reassemble_transaction(transaction)?)
    }

    /// Stores a chunk for the transaction named by id or, failing that, by data root
    pub fn post_chunk(
        &self,
        transaction_id: Option<&str>,
        data_root: Option<&str>,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Chunk, BlockchainError> {
        let _state = self.state.write();
        let transaction_id = match (transaction_id, data_root) {
            (Some(id), _) => id.to_string(),
            (None, Some(root)) => self.pool.find_by_data_root(root)?.id,
            (None, None) => {
                return Err(BlockchainError::InvalidArgument(
                    "a chunk needs a transaction id or a data root".to_string(),
                ))
            }
        };
        Ok(self.chunks.put_chunk(&transaction_id, offset, data)?)
    }

    pub fn get_chunk(&self, offset: u64) -> Result<Chunk, BlockchainError> {
        let _state = self.state.read();
        Ok(self.chunks.get_chunk_at_offset(offset)?)
    }

    pub fn reassemble(&self, transaction_id: &str) -> Result<Vec<u8>, BlockchainError> {
        let _state = self.state.read();
        Ok(self.chunks.reassemble(transaction_id)?)
    }

    pub fn get_wallet(&self, address: &Address) -> Result<Wallet, BlockchainError> {
        let _state = self.state.read();
        Ok(self.wallets.get_wallet(address)?)
    }

    pub fn get_balance(&self, address: &Address) -> Result<u64, BlockchainError> {
        let _state = self.state.read();
        Ok(self.wallets.get_balance(address)?)
    }

    pub fn get_last_tx(&self, address: &Address) -> Result<Option<String>, BlockchainError> {
        let _state = self.state.read();
        Ok(self.wallets.get_last_tx(address)?)
    }

    pub fn all_wallets(&self) -> Result<Vec<Wallet>, BlockchainError> {
        let _state = self.state.read();
        Ok(self.wallets.all_wallets()?)
    }

    /// Overwrites a balance (test affordance, no conservation)
    pub fn set_balance(&self, address: &Address, amount: u64) -> Result<Wallet, BlockchainError> {
        let _state = self.state.write();
        let mut txn = self.storage.begin_transaction();
        let wallet = self.wallets.set_balance(&mut txn, address, amount)?;
        txn.commit()?;
        info!("Set balance of {} to {}", address, amount);
        Ok(wallet)
    }

    /// Credits `amount` out of thin air (test affordance, no conservation)
    pub fn mint(&self, address: &Address, amount: u64) -> Result<Wallet, BlockchainError> {
        let _state = self.state.write();
        let mut txn = self.storage.begin_transaction();
        let wallet = self.wallets.credit(&mut txn, address, amount)?;
        txn.commit()?;
        info!("Minted {} to {}", amount, address);
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::transaction::{TransactionField, TransactionStatus};
    use std::thread;

    fn address(name: &str) -> Address {
        Address(name.to_string())
    }

    fn chain_with_config(config: LedgerConfig) -> Blockchain {
        let blockchain = Blockchain::new(config).unwrap();
        blockchain.mine_genesis_block().unwrap();
        blockchain
    }

    fn chain() -> Blockchain {
        chain_with_config(LedgerConfig::default())
    }

    fn total_balance(blockchain: &Blockchain) -> u64 {
        blockchain
            .all_wallets()
            .unwrap()
            .iter()
            .map(|wallet| wallet.balance)
            .sum()
    }

    #[test]
    fn test_new_chain_is_uninitialized() {
        let blockchain = Blockchain::new(LedgerConfig::default()).unwrap();

        assert!(blockchain.get_last_block().unwrap().is_none());
        assert_eq!(blockchain.network_status().height, -1);
        assert!(matches!(blockchain.mine(1), Err(BlockchainError::Uninitialized)));
    }

    #[test]
    fn test_genesis_is_idempotent() {
        let blockchain = Blockchain::new(LedgerConfig::default()).unwrap();
        let first = blockchain.mine_genesis_block().unwrap();
        let second = blockchain.mine_genesis_block().unwrap();
        assert_eq!(first, second);

        let genesis = blockchain.get_block_by_height(0).unwrap();
        assert_eq!(genesis.id, first);
        assert!(genesis.is_genesis());
        assert!(genesis.transaction_ids.is_empty());
    }

    #[test]
    fn test_mine_links_blocks() {
        let blockchain = chain();
        let mut previous = blockchain.get_last_block().unwrap().unwrap();

        for expected_height in 1..=5 {
            let block = blockchain.mine(1).unwrap().remove(0);
            assert_eq!(block.height, expected_height);
            assert_eq!(block.previous.as_deref(), Some(previous.id.as_str()));
            previous = block;
        }

        assert!(blockchain.verify_chain().unwrap());
    }

    #[test]
    fn test_mine_empty_pool_advances_height() {
        let blockchain = chain();
        let blocks = blockchain.mine(4).unwrap();

        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|block| block.transaction_ids.is_empty()));

        let status = blockchain.network_status();
        assert_eq!(status.height, 4);
        assert_eq!(status.blocks, 5);
        assert_eq!(status.current.as_deref(), Some(blocks[3].id.as_str()));
    }

    #[test]
    fn test_mine_rejects_zero_quantity() {
        let blockchain = chain();
        assert!(matches!(blockchain.mine(0), Err(BlockchainError::InvalidArgument(_))));
    }

    #[test]
    fn test_transfer_scenario() {
        let blockchain = chain();
        let a = address("A");
        let b = address("B");
        let miner = blockchain.config().reward_address.clone();
        blockchain.set_balance(&a, 100).unwrap();

        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a.clone(), Some(b.clone()), 10, 1))
            .unwrap();
        assert_eq!(blockchain.network_status().queue_length, 1);

        let block = blockchain.mine(1).unwrap().remove(0);

        assert_eq!(block.height, 1);
        assert_eq!(block.transaction_ids, vec!["t1".to_string()]);
        assert_eq!(blockchain.get_balance(&a).unwrap(), 89);
        assert_eq!(blockchain.get_balance(&b).unwrap(), 10);
        assert_eq!(blockchain.get_balance(&miner).unwrap(), 1);
        assert_eq!(blockchain.get_last_tx(&a).unwrap().as_deref(), Some("t1"));
        assert_eq!(blockchain.get_last_tx(&b).unwrap().as_deref(), Some("t1"));

        let tx = blockchain.get_transaction("t1").unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(tx.block_id, Some(block.id));
        assert_eq!(blockchain.network_status().queue_length, 0);
    }

    #[test]
    fn test_balance_conservation_with_reward() {
        let config = LedgerConfig {
            reward_per_block: 7,
            ..LedgerConfig::default()
        };
        let blockchain = chain_with_config(config);
        blockchain.set_balance(&address("A"), 500).unwrap();
        blockchain.set_balance(&address("B"), 50).unwrap();

        blockchain
            .submit_transaction(NewTransaction::transfer("t1", address("A"), Some(address("B")), 40, 3))
            .unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t2", address("B"), Some(address("C")), 20, 2))
            .unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t3", address("A"), Some(address("A")), 5, 1))
            .unwrap();

        for _ in 0..3 {
            let before = total_balance(&blockchain);
            blockchain.mine(1).unwrap();
            assert_eq!(total_balance(&blockchain) - before, 7);
        }
    }

    #[test]
    fn test_overdraw_is_deferred_in_submission_order() {
        let blockchain = chain();
        let a = address("A");
        blockchain.set_balance(&a, 20).unwrap();

        for id in ["t1", "t2", "t3"] {
            blockchain
                .submit_transaction(NewTransaction::transfer(id, a.clone(), Some(address("B")), 9, 1))
                .unwrap();
        }

        let block = blockchain.mine(1).unwrap().remove(0);
        assert_eq!(block.transaction_ids, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(blockchain.get_balance(&a).unwrap(), 0);

        let pending = blockchain.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "t3");

        // Funding the owner lets the deferred transaction through
        blockchain.mint(&a, 10).unwrap();
        let block = blockchain.mine(1).unwrap().remove(0);
        assert_eq!(block.transaction_ids, vec!["t3".to_string()]);
    }

    #[test]
    fn test_overflowing_credit_is_deferred() {
        let blockchain = chain();
        let a = address("A");
        let b = address("B");
        blockchain.set_balance(&a, 10).unwrap();
        blockchain.set_balance(&b, u64::MAX).unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a.clone(), Some(b.clone()), 1, 0))
            .unwrap();

        for expected_height in 1..=3 {
            let block = blockchain.mine(1).unwrap().remove(0);
            assert_eq!(block.height, expected_height);
            assert!(block.transaction_ids.is_empty());
        }
        assert_eq!(blockchain.list_pending().unwrap()[0].id, "t1");
        assert_eq!(blockchain.get_balance(&a).unwrap(), 10);
        assert_eq!(blockchain.get_balance(&b).unwrap(), u64::MAX);

        blockchain.set_balance(&b, 0).unwrap();
        let block = blockchain.mine(1).unwrap().remove(0);
        assert_eq!(block.transaction_ids, vec!["t1".to_string()]);
        assert_eq!(blockchain.get_balance(&a).unwrap(), 9);
        assert_eq!(blockchain.get_balance(&b).unwrap(), 1);
    }

    #[test]
    fn test_overflowing_fee_and_reward_keep_mining() {
        let config = LedgerConfig {
            reward_per_block: 5,
            ..LedgerConfig::default()
        };
        let blockchain = chain_with_config(config);
        let a = address("A");
        let miner = blockchain.config().reward_address.clone();
        blockchain.set_balance(&a, 10).unwrap();
        blockchain.set_balance(&miner, u64::MAX - 1).unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a.clone(), None, 0, 2))
            .unwrap();

        let block = blockchain.mine(1).unwrap().remove(0);
        assert!(block.transaction_ids.is_empty());
        assert_eq!(blockchain.get_balance(&miner).unwrap(), u64::MAX - 1);
        assert_eq!(blockchain.get_balance(&a).unwrap(), 10);
        assert_eq!(blockchain.network_status().height, 1);
    }

    #[test]
    fn test_chunked_transaction_waits_for_its_data() {
        let blockchain = chain();
        let mut request = NewTransaction::transfer("doc", address("A"), None, 0, 0);
        request.data_size = 8;
        request.data_root = Some("root".to_string());
        blockchain.submit_transaction(request).unwrap();

        let block = blockchain.mine(1).unwrap().remove(0);
        assert!(block.transaction_ids.is_empty());

        blockchain.post_chunk(Some("doc"), None, 0, b"weav".to_vec()).unwrap();
        let block = blockchain.mine(1).unwrap().remove(0);
        assert!(block.transaction_ids.is_empty());
        assert!(blockchain.get_transaction("doc").unwrap().is_pending());

        blockchain.post_chunk(Some("doc"), None, 4, b"e!!!".to_vec()).unwrap();
        let block = blockchain.mine(1).unwrap().remove(0);
        assert_eq!(block.transaction_ids, vec!["doc".to_string()]);

        let tx = blockchain.get_transaction("doc").unwrap();
        assert_eq!(tx.status, TransactionStatus::Confirmed);
        assert_eq!(blockchain.reassemble("doc").unwrap(), b"weave!!!");
    }

    #[test]
    fn test_concurrent_submissions_and_mining() {
        const SUBMITTERS: usize = 4;
        const TRANSFERS: usize = 10;
        const MINERS: usize = 2;
        const ROUNDS: usize = 5;
        const MINTED: u64 = 1_000;
        const REWARD: u64 = 3;

        let config = LedgerConfig {
            reward_per_block: REWARD,
            ..LedgerConfig::default()
        };
        let blockchain = Arc::new(chain_with_config(config));
        for index in 0..SUBMITTERS {
            blockchain
                .mint(&address(&format!("owner{}", index)), MINTED)
                .unwrap();
        }

        let mut handles = Vec::new();
        for index in 0..SUBMITTERS {
            let blockchain = Arc::clone(&blockchain);
            handles.push(thread::spawn(move || {
                let owner = address(&format!("owner{}", index));
                for n in 0..TRANSFERS {
                    let id = format!("t{}_{}", index, n);
                    blockchain
                        .submit_transaction(NewTransaction::transfer(
                            &id,
                            owner.clone(),
                            Some(address("sink")),
                            5,
                            1,
                        ))
                        .unwrap();
                }
            }));
        }
        for _ in 0..MINERS {
            let blockchain = Arc::clone(&blockchain);
            handles.push(thread::spawn(move || {
                for _ in 0..ROUNDS {
                    blockchain.mine(1).unwrap();
                }
            }));
        }
        {
            let blockchain = Arc::clone(&blockchain);
            handles.push(thread::spawn(move || {
                let sink = address("sink");
                let mut last = 0;
                for _ in 0..MINERS * ROUNDS {
                    let balance = blockchain.get_balance(&sink).unwrap();
                    assert!(balance >= last);
                    last = balance;
                    assert!(blockchain.verify_chain().unwrap());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Picks up whatever was submitted after the last concurrent block
        blockchain.mine(1).unwrap();
        let mined = (MINERS * ROUNDS + 1) as u64;

        assert_eq!(blockchain.network_status().height, mined as i64);
        let mut previous = None;
        for height in 0..=mined {
            let block = blockchain.get_block_by_height(height).unwrap();
            assert_eq!(block.height, height);
            assert_eq!(block.previous, previous);
            previous = Some(block.id);
        }
        assert!(blockchain.verify_chain().unwrap());
        assert!(blockchain.list_pending().unwrap().is_empty());
        assert_eq!(
            blockchain.get_balance(&address("sink")).unwrap(),
            (SUBMITTERS * TRANSFERS) as u64 * 5
        );
        assert_eq!(
            total_balance(&blockchain),
            MINTED * SUBMITTERS as u64 + REWARD * mined
        );
    }

    #[test]
    fn test_duplicate_after_confirmation() {
        let blockchain = chain();
        let a = address("A");
        blockchain.set_balance(&a, 10).unwrap();

        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a.clone(), None, 0, 1))
            .unwrap();
        blockchain.mine(1).unwrap();

        let result = blockchain.submit_transaction(NewTransaction::transfer("t1", a, None, 0, 1));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::DuplicateTransaction);
    }

    #[test]
    fn test_mine_with_failures_is_reproducible() {
        let run = |seed: u64| {
            let blockchain = chain();
            let a = address("A");
            blockchain.set_balance(&a, 1_000).unwrap();
            for index in 0..20 {
                blockchain
                    .submit_transaction(NewTransaction::transfer(&format!("t{}", index), a.clone(), None, 0, 1))
                    .unwrap();
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let block = blockchain
                .mine_with_failures_using(1, 0.5, &mut rng)
                .unwrap()
                .remove(0);
            (block.transaction_ids, blockchain.list_pending().unwrap().len())
        };

        let (first, first_pending) = run(7);
        let (second, second_pending) = run(7);
        assert_eq!(first, second);
        assert_eq!(first.len() + first_pending, 20);
        assert_eq!(first_pending, second_pending);
    }

    #[test]
    fn test_mine_with_failures_extremes() {
        let blockchain = chain();
        let a = address("A");
        blockchain.set_balance(&a, 100).unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a.clone(), None, 0, 1))
            .unwrap();

        let block = blockchain.mine_with_failures(1, 1.0).unwrap().remove(0);
        assert!(block.transaction_ids.is_empty());
        assert_eq!(blockchain.list_pending().unwrap().len(), 1);

        let block = blockchain.mine_with_failures(1, 0.0).unwrap().remove(0);
        assert_eq!(block.transaction_ids, vec!["t1".to_string()]);

        assert!(matches!(
            blockchain.mine_with_failures(1, 1.5),
            Err(BlockchainError::InvalidArgument(_))
        ));
        assert!(blockchain.mine_with_failures(1, f64::NAN).is_err());
    }

    #[test]
    fn test_block_lookups() {
        let blockchain = chain();
        let mined = blockchain.mine(2).unwrap();

        assert_eq!(blockchain.get_block_by_hash(&mined[1].id).unwrap(), mined[1]);
        assert_eq!(blockchain.get_block_by_height(1).unwrap(), mined[0]);
        assert_eq!(
            blockchain.get_block_by_height(3).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(matches!(
            blockchain.get_block_by_hash("missing"),
            Err(BlockchainError::BlockNotFound(_))
        ));
    }

    #[test]
    fn test_reset_then_genesis() {
        let blockchain = chain();
        let a = address("A");
        blockchain.set_balance(&a, 100).unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a.clone(), Some(address("B")), 10, 1))
            .unwrap();
        blockchain.mine(3).unwrap();

        blockchain.reset().unwrap();
        assert!(blockchain.get_last_block().unwrap().is_none());
        assert_eq!(blockchain.network_status().blocks, 0);

        blockchain.mine_genesis_block().unwrap();
        let genesis = blockchain.get_last_block().unwrap().unwrap();
        assert_eq!(genesis.height, 0);
        assert!(genesis.transaction_ids.is_empty());
        assert_eq!(blockchain.get_balance(&a).unwrap(), 0);
        assert_eq!(blockchain.get_balance(&address("B")).unwrap(), 0);
        assert!(blockchain.get_transaction("t1").is_err());
        assert!(blockchain.all_wallets().unwrap().is_empty());
    }

    #[test]
    fn test_remove_confirmed_keeps_balances() {
        let blockchain = chain();
        let a = address("A");
        blockchain.set_balance(&a, 100).unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a.clone(), Some(address("B")), 10, 1))
            .unwrap();
        let block = blockchain.mine(1).unwrap().remove(0);

        blockchain.remove_transaction("t1").unwrap();

        assert!(blockchain.get_transaction("t1").is_err());
        assert_eq!(blockchain.get_balance(&a).unwrap(), 89);
        assert_eq!(blockchain.get_block_by_hash(&block.id).unwrap().transaction_ids.len(), 1);
    }

    #[test]
    fn test_chunked_data_projection() {
        let blockchain = chain();
        let a = address("A");
        let mut request = NewTransaction::transfer("t1", a, None, 0, 0);
        request.data_size = 8;
        request.data_root = Some("root".to_string());
        request.tags = vec![crate::blockchain::transaction::Tag {
            name: "Content-Type".to_string(),
            value: "text/plain".to_string(),
        }];
        blockchain.submit_transaction(request).unwrap();

        let incomplete = blockchain.project_transaction("t1", &TransactionProjection::Data);
        assert_eq!(incomplete.unwrap_err().kind(), ErrorKind::IncompleteData);

        blockchain.post_chunk(Some("t1"), None, 0, b"weav".to_vec()).unwrap();
        blockchain.post_chunk(None, Some("root"), 4, b"e!!!".to_vec()).unwrap();

        let data = blockchain.project_transaction("t1", &TransactionProjection::Data).unwrap();
        assert_eq!(
            data,
            ProjectionValue::Bytes {
                content_type: "text/plain".to_string(),
                data: b"weave!!!".to_vec(),
            }
        );
        assert_eq!(blockchain.reassemble("t1").unwrap(), b"weave!!!");
        assert_eq!(blockchain.get_chunk(4).unwrap().data, b"e!!!");
    }

    #[test]
    fn test_status_projection_counts_confirmations() {
        let blockchain = chain();
        let a = address("A");
        blockchain.set_balance(&a, 10).unwrap();
        blockchain
            .submit_transaction(NewTransaction::transfer("t1", a, None, 0, 1))
            .unwrap();

        let pending = blockchain.project_transaction("t1", &TransactionProjection::Status).unwrap();
        assert_eq!(
            pending,
            ProjectionValue::Json(json!({
                "status": "pending",
                "block_height": null,
                "block_indep_hash": null,
                "number_of_confirmations": 0,
            }))
        );

        let block = blockchain.mine(3).unwrap().remove(0);
        let ProjectionValue::Json(confirmed) =
            blockchain.project_transaction("t1", &TransactionProjection::Status).unwrap()
        else {
            panic!("status projection must be JSON");
        };
        assert_eq!(confirmed["status"], "confirmed");
        assert_eq!(confirmed["block_height"], 1);
        assert_eq!(confirmed["block_indep_hash"], block.id.as_str());
        assert_eq!(confirmed["number_of_confirmations"], 3);

        let fee = blockchain
            .project_transaction("t1", &TransactionProjection::Field(TransactionField::Reward))
            .unwrap();
        assert_eq!(fee, ProjectionValue::Json(json!("1")));
    }

    #[test]
    fn test_chain_survives_reopen() {
        let storage = Arc::new(Storage::temporary().unwrap());
        let tip = {
            let blockchain = Blockchain::from_storage(storage.clone(), LedgerConfig::default()).unwrap();
            blockchain.mine_genesis_block().unwrap();
            blockchain.mine(2).unwrap().remove(1).id
        };

        let reopened = Blockchain::from_storage(storage, LedgerConfig::default()).unwrap();
        let status = reopened.network_status();
        assert_eq!(status.height, 2);
        assert_eq!(status.current.as_deref(), Some(tip.as_str()));
        assert_eq!(reopened.mine_genesis_block().unwrap(), tip);
        assert!(reopened.verify_chain().unwrap());
    }

    #[test]
    fn test_missing_tip_is_corrupt_state() {
        let storage = Arc::new(Storage::temporary().unwrap());
        storage
            .put(Table::Metadata, meta::CURRENT_BLOCK, &"ghost".to_string())
            .unwrap();

        let result = Blockchain::from_storage(storage, LedgerConfig::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::CorruptState);
    }
}
