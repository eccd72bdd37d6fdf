use clap::Parser;
use std::path::PathBuf;

use crate::blockchain::crypto::{Address, CryptoError};

/// Default cap on the data a single transaction may carry (256 MiB)
pub const DEFAULT_MAX_DATA_SIZE: u64 = 256 * 1024 * 1024;

/// Operations the node is allowed to expose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Mining, resets, deletions and balance overrides
    pub admin: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities { admin: true }
    }
}

/// Ledger-level settings
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Receives transaction fees and the block reward
    pub reward_address: Address,

    /// Credited to `reward_address` for every mined block
    pub reward_per_block: u64,

    /// Network name reported by `/info`
    pub network: String,

    pub version: u32,

    pub release: u32,

    pub capabilities: Capabilities,

    /// Seed for the failure-simulation random source; entropy when absent
    pub rng_seed: Option<u64>,

    /// Submissions announcing more data than this are rejected
    pub max_data_size: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            reward_address: Address("MINER".to_string()),
            reward_per_block: 0,
            network: "weave.local.N.1".to_string(),
            version: 5,
            release: 1,
            capabilities: Capabilities::default(),
            rng_seed: None,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
        }
    }
}

/// Command line arguments of the emulator node
#[derive(Debug, Parser)]
#[command(name = "weave-emulator", version, about = "Single-node Arweave-like ledger emulator")]
pub struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1", env = "WEAVE_HOST")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(short, long, default_value_t = 1984, env = "WEAVE_PORT")]
    pub port: u16,

    /// Directory of the ledger database
    #[arg(long, default_value = "data/weave", env = "WEAVE_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Keep the ledger on disk instead of a throwaway database
    #[arg(long, env = "WEAVE_PERSIST")]
    pub persist: bool,

    /// Address credited with fees and block rewards
    #[arg(long, default_value = "MINER", env = "WEAVE_REWARD_ADDRESS")]
    pub reward_address: String,

    /// Reward credited per mined block
    #[arg(long, default_value_t = 0, env = "WEAVE_REWARD_PER_BLOCK")]
    pub reward_per_block: u64,

    /// Seed for simulated mining failures
    #[arg(long, env = "WEAVE_SEED")]
    pub seed: Option<u64>,

    /// Largest data size, in bytes, a transaction may announce
    #[arg(long, default_value_t = DEFAULT_MAX_DATA_SIZE, env = "WEAVE_MAX_DATA_SIZE")]
    pub max_data_size: u64,

    /// Constrained mode: refuse every admin operation
    #[arg(long, env = "WEAVE_DISABLE_ADMIN")]
    pub disable_admin: bool,
}

impl Args {
    pub fn ledger_config(&self) -> Result<LedgerConfig, CryptoError> {
        Ok(LedgerConfig {
            reward_address: self.reward_address.parse()?,
            reward_per_block: self.reward_per_block,
            capabilities: Capabilities {
                admin: !self.disable_admin,
            },
            rng_seed: self.seed,
            max_data_size: self.max_data_size,
            ..LedgerConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["weave-emulator"]);
        assert_eq!(args.port, 1984);
        assert!(!args.persist);

        let config = args.ledger_config().unwrap();
        assert!(config.capabilities.admin);
        assert_eq!(config.reward_address, Address("MINER".to_string()));
        assert_eq!(config.max_data_size, DEFAULT_MAX_DATA_SIZE);
    }

    #[test]
    fn test_constrained_mode() {
        let args = Args::parse_from([
            "weave-emulator",
            "--disable-admin",
            "--reward-address",
            "pool_1",
            "--reward-per-block",
            "5",
            "--seed",
            "42",
            "--max-data-size",
            "2048",
        ]);
        let config = args.ledger_config().unwrap();

        assert!(!config.capabilities.admin);
        assert_eq!(config.reward_per_block, 5);
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(config.max_data_size, 2048);
        assert_eq!(config.reward_address.as_str(), "pool_1");
    }

    #[test]
    fn test_invalid_reward_address() {
        let args = Args::parse_from(["weave-emulator", "--reward-address", "not valid"]);
        assert!(args.ledger_config().is_err());
    }
}
