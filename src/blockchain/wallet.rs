use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::sync::Arc;

use super::crypto::Address;
use super::storage::{Storage, StorageError, StorageTransaction, Table};
use super::ErrorKind;

/// Errors that can occur during wallet operations
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Insufficient funds in {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: Address,
        required: u64,
        available: u64,
    },

    #[error("Balance overflow for {0}")]
    Overflow(Address),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            WalletError::Overflow(_) => ErrorKind::InvalidInput,
            WalletError::StorageError(e) => e.kind(),
        }
    }
}

/// Represents a wallet in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Wallet {
    /// The wallet's address
    pub address: Address,

    /// The wallet's balance in winston
    pub balance: u64,

    /// Id of the most recent confirmed transaction touching this wallet
    pub last_tx: Option<String>,
}

impl Wallet {
    /// Creates an empty wallet
    pub fn new(address: Address) -> Self {
        Wallet {
            address,
            balance: 0,
            last_tx: None,
        }
    }

    /// Increases the wallet's balance
    pub fn deposit(&mut self, amount: u64) -> Result<(), WalletError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| WalletError::Overflow(self.address.clone()))?;
        Ok(())
    }

    /// Decreases the wallet's balance, refusing to go negative
    pub fn withdraw(&mut self, amount: u64) -> Result<(), WalletError> {
        if !self.has_sufficient_funds(amount) {
            return Err(WalletError::InsufficientFunds {
                address: self.address.clone(),
                required: amount,
                available: self.balance,
            });
        }

        self.balance -= amount;
        Ok(())
    }

    pub fn has_sufficient_funds(&self, amount: u64) -> bool {
        self.balance >= amount
    }
}

/// Address -> (balance, last transaction) bookkeeping.
///
/// Reads go straight to committed storage. Every mutation is staged on a
/// [`StorageTransaction`] owned by the caller, so a mining step or an
/// administrative update lands in one atomic unit.
#[derive(Debug, Clone)]
pub struct WalletLedger {
    storage: Arc<Storage>,
}

impl WalletLedger {
    pub fn new(storage: Arc<Storage>) -> Self {
        WalletLedger { storage }
    }

    /// Gets a wallet; unknown addresses yield an empty wallet
    pub fn get_wallet(&self, address: &Address) -> Result<Wallet, WalletError> {
        Ok(self
            .storage
            .find(Table::Wallets, address.as_bytes())?
            .unwrap_or_else(|| Wallet::new(address.clone())))
    }

    pub fn get_balance(&self, address: &Address) -> Result<u64, WalletError> {
        Ok(self.get_wallet(address)?.balance)
    }

    pub fn get_last_tx(&self, address: &Address) -> Result<Option<String>, WalletError> {
        Ok(self.get_wallet(address)?.last_tx)
    }

    /// Every wallet that has been written at least once
    pub fn all_wallets(&self) -> Result<Vec<Wallet>, WalletError> {
        Ok(self.storage.scan(Table::Wallets, |_: &Wallet| true)?)
    }

    /// Gets a wallet as seen from inside `txn`
    pub fn load(&self, txn: &StorageTransaction<'_>, address: &Address) -> Result<Wallet, WalletError> {
        Ok(txn
            .find(Table::Wallets, address.as_bytes())?
            .unwrap_or_else(|| Wallet::new(address.clone())))
    }

    fn store(&self, txn: &mut StorageTransaction<'_>, wallet: &Wallet) -> Result<(), WalletError> {
        txn.put(Table::Wallets, wallet.address.as_bytes(), wallet)?;
        Ok(())
    }

    pub fn credit(
        &self,
        txn: &mut StorageTransaction<'_>,
        address: &Address,
        amount: u64,
    ) -> Result<Wallet, WalletError> {
        let mut wallet = self.load(txn, address)?;
        wallet.deposit(amount)?;
        self.store(txn, &wallet)?;
        Ok(wallet)
    }

    /// Wallets as they would look after withdrawing `cost` from `owner`
    /// and applying every credit in order, as seen from `txn`.
    ///
    /// Nothing is staged; an overdraw or an overflowing credit fails the
    /// whole plan. The same address may appear more than once.
    pub fn plan_transfer(
        &self,
        txn: &StorageTransaction<'_>,
        owner: &Address,
        cost: u64,
        credits: &[(&Address, u64)],
    ) -> Result<Vec<Wallet>, WalletError> {
        let mut touched = Vec::new();
        self.touch(txn, &mut touched, owner)?.withdraw(cost)?;
        for (address, amount) in credits {
            self.touch(txn, &mut touched, address)?.deposit(*amount)?;
        }
        Ok(touched)
    }

    fn touch<'a>(
        &self,
        txn: &StorageTransaction<'_>,
        touched: &'a mut Vec<Wallet>,
        address: &Address,
    ) -> Result<&'a mut Wallet, WalletError> {
        let index = match touched.iter().position(|wallet| &wallet.address == address) {
            Some(index) => index,
            None => {
                touched.push(self.load(txn, address)?);
                touched.len() - 1
            }
        };
        Ok(&mut touched[index])
    }

    /// Stages wallets produced by [`WalletLedger::plan_transfer`]
    pub fn stage(&self, txn: &mut StorageTransaction<'_>, wallets: &[Wallet]) -> Result<(), WalletError> {
        for wallet in wallets {
            self.store(txn, wallet)?;
        }
        Ok(())
    }

    pub fn record_last_tx(
        &self,
        txn: &mut StorageTransaction<'_>,
        address: &Address,
        transaction_id: &str,
    ) -> Result<(), WalletError> {
        let mut wallet = self.load(txn, address)?;
        wallet.last_tx = Some(transaction_id.to_string());
        self.store(txn, &wallet)
    }

    /// Overwrites a balance without any conservation check.
    ///
    /// Test affordance for administrative endpoints; a real chain has no
    /// equivalent.
    pub fn set_balance(
        &self,
        txn: &mut StorageTransaction<'_>,
        address: &Address,
        amount: u64,
    ) -> Result<Wallet, WalletError> {
        let mut wallet = self.load(txn, address)?;
        wallet.balance = amount;
        self.store(txn, &wallet)?;
        Ok(wallet)
    }
}
