use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::blockchain::crypto::{decode_b64url, encode_b64url, Address, CryptoError};
use crate::blockchain::transaction::{Tag, TransactionStatus};
use crate::blockchain::{Block, Chunk, NewTransaction, Transaction};

/// A tag as it travels over the wire, name and value base64url encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TagDto {
    pub name: String,
    pub value: String,
}

impl TagDto {
    fn encode(tag: &Tag) -> Self {
        TagDto {
            name: encode_b64url(&tag.name),
            value: encode_b64url(&tag.value),
        }
    }

    fn decode(&self) -> Result<Tag, CryptoError> {
        Ok(Tag {
            name: decode_utf8(&self.name)?,
            value: decode_utf8(&self.value)?,
        })
    }
}

fn decode_utf8(text: &str) -> Result<String, CryptoError> {
    String::from_utf8(decode_b64url(text)?).map_err(|e| CryptoError::DecodingError(e.to_string()))
}

/// Request body of `POST /tx`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct TransactionRequest {
    /// Leave empty to derive the id from the content
    pub id: String,

    pub format: Option<u8>,

    pub last_tx: String,

    /// Address of the paying wallet
    pub owner: String,

    /// Empty for data-only transactions
    pub target: String,

    pub quantity: u64,

    #[serde(alias = "fee")]
    pub reward: u64,

    pub tags: Vec<TagDto>,

    /// Inline data, base64url encoded
    pub data: String,

    pub data_size: u64,

    pub data_root: String,

    pub signature: String,
}

impl TransactionRequest {
    /// Decodes the wire representation into a ledger submission
    pub fn into_submission(self) -> Result<NewTransaction, CryptoError> {
        let target = if self.target.is_empty() {
            None
        } else {
            Some(self.target.parse::<Address>()?)
        };
        let tags = self
            .tags
            .iter()
            .map(TagDto::decode)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NewTransaction {
            id: non_empty(self.id),
            format: self.format,
            last_tx: self.last_tx,
            owner: Some(self.owner.parse()?),
            target,
            quantity: self.quantity,
            fee: self.reward,
            tags,
            data: decode_b64url(&self.data)?,
            data_size: self.data_size,
            data_root: non_empty(self.data_root),
            signature: non_empty(self.signature),
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Response of `POST /tx`
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub id: String,
}

/// A transaction in its wire representation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    pub format: u8,
    pub id: String,
    pub last_tx: String,
    pub owner: String,
    pub target: String,
    /// Decimal string, as Arweave reports amounts
    pub quantity: String,
    pub reward: String,
    pub tags: Vec<TagDto>,
    pub data: String,
    pub data_size: String,
    pub data_root: String,
    pub signature: String,
    pub status: TransactionStatus,
    pub block_id: Option<String>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        TransactionView {
            format: tx.format,
            id: tx.id.clone(),
            last_tx: tx.last_tx.clone(),
            owner: tx.owner.to_string(),
            target: tx.target.as_ref().map(Address::to_string).unwrap_or_default(),
            quantity: tx.quantity.to_string(),
            reward: tx.fee.to_string(),
            tags: tx.tags.iter().map(TagDto::encode).collect(),
            data: encode_b64url(&tx.data),
            data_size: tx.data_size.to_string(),
            data_root: tx.data_root.clone().unwrap_or_default(),
            signature: tx.signature.clone().unwrap_or_default(),
            status: tx.status,
            block_id: tx.block_id.clone(),
        }
    }
}

/// Request body of `POST /chunk`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ChunkRequest {
    /// Owning transaction; may be left empty when `data_root` is given
    pub transaction_id: String,

    pub data_root: String,

    /// Offset relative to the start of the transaction's data
    pub offset: u64,

    /// Chunk bytes, base64url encoded
    pub chunk: String,
}

/// A stored chunk
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChunkView {
    pub transaction_id: String,
    /// Absolute weave offset of the first byte
    pub offset: u64,
    pub size: u64,
    pub chunk: String,
}

impl From<&Chunk> for ChunkView {
    fn from(chunk: &Chunk) -> Self {
        ChunkView {
            transaction_id: chunk.transaction_id.clone(),
            offset: chunk.offset,
            size: chunk.data.len() as u64,
            chunk: encode_b64url(&chunk.data),
        }
    }
}

/// Request body of `POST /wallet`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletRequest {
    pub address: String,
    #[serde(default)]
    pub balance: u64,
}

/// Request body of `PATCH /wallet/{address}/balance`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceUpdate {
    pub balance: u64,
}

/// Response of the mining endpoints
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// Height of the chain tip after mining
    pub height: u64,

    /// The newly mined blocks, oldest first
    pub blocks: Vec<Block>,
}

/// Query of `GET /mine_with_fails/{qty}`
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FailQuery {
    /// Probability in `[0, 1]` that an accepted transaction stays pending
    pub fail_rate: f64,
}
