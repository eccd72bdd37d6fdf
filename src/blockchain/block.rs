use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::{content_hash, Address};

/// Represents a block in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Content hash of the block header
    pub id: String,

    /// Height of the block, genesis is 0
    pub height: u64,

    /// Id of the previous block, none for genesis
    pub previous: Option<String>,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Ids of the transactions confirmed by this block, in mining order
    pub transaction_ids: Vec<String>,

    /// Weave bytes reserved when the block was mined
    pub weave_size: u64,

    /// Address credited with fees and the block reward
    pub reward_address: Address,
}

impl Block {
    /// Creates a new block and computes its id
    pub fn new(
        height: u64,
        previous: Option<String>,
        timestamp: DateTime<Utc>,
        transaction_ids: Vec<String>,
        weave_size: u64,
        reward_address: Address,
    ) -> Self {
        let block = Block {
            id: String::new(),
            height,
            previous,
            timestamp,
            transaction_ids,
            weave_size,
            reward_address,
        };

        let id = block.calculate_hash();

        Block { id, ..block }
    }

    /// Creates the height-0 block
    pub fn genesis(timestamp: DateTime<Utc>, reward_address: Address) -> Self {
        Block::new(0, None, timestamp, Vec::new(), 0, reward_address)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.previous.is_none()
    }

    /// Calculates the content hash of the block
    pub fn calculate_hash(&self) -> String {
        let block_data = serde_json::json!({
            "height": self.height,
            "previous": self.previous,
            "timestamp": self.timestamp,
            "transaction_ids": self.transaction_ids,
            "weave_size": self.weave_size,
            "reward_address": self.reward_address,
        });

        content_hash([block_data.to_string()])
    }
}
