use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

use super::chunk::ChunkError;
use super::crypto::{content_hash, encode_b64url, Address};
use super::storage::StorageError;
use super::wallet::WalletError;
use super::ErrorKind;

/// Current transaction format
const DEFAULT_FORMAT: u8 = 2;

const OCTET_STREAM: &str = "application/octet-stream";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid transaction: {0}")]
    Invalid(String),

    #[error("Unknown transaction projection: {0}")]
    UnknownProjection(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Wallet error: {0}")]
    WalletError(#[from] WalletError),

    #[error("Chunk error: {0}")]
    ChunkError(#[from] ChunkError),
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::NotFound(_) => ErrorKind::NotFound,
            TransactionError::DuplicateTransaction(_) => ErrorKind::DuplicateTransaction,
            TransactionError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            TransactionError::Invalid(_) | TransactionError::UnknownProjection(_) => {
                ErrorKind::InvalidInput
            }
            TransactionError::StorageError(e) => e.kind(),
            TransactionError::WalletError(e) => e.kind(),
            TransactionError::ChunkError(e) => e.kind(),
        }
    }
}

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
}

/// A name/value tag attached to a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

/// A transaction as submitted by a client, before the pool accepts it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTransaction {
    /// Client-chosen id; derived from the content when empty
    pub id: Option<String>,
    pub format: Option<u8>,
    pub last_tx: String,
    pub owner: Option<Address>,
    pub target: Option<Address>,
    pub quantity: u64,
    pub fee: u64,
    pub tags: Vec<Tag>,
    pub data: Vec<u8>,
    pub data_size: u64,
    pub data_root: Option<String>,
    pub signature: Option<String>,
}

impl NewTransaction {
    /// A plain transfer, mostly useful in tests and tooling
    pub fn transfer(id: &str, owner: Address, target: Option<Address>, quantity: u64, fee: u64) -> Self {
        NewTransaction {
            id: Some(id.to_string()),
            owner: Some(owner),
            target,
            quantity,
            fee,
            ..Default::default()
        }
    }

    /// Checks that the fields describe a well-formed transaction carrying
    /// at most `max_data_size` bytes
    pub fn validate(&self, max_data_size: u64) -> Result<&Address, TransactionError> {
        let owner = self
            .owner
            .as_ref()
            .ok_or_else(|| TransactionError::Invalid("owner is missing".to_string()))?;

        if self.quantity > 0 && self.target.is_none() {
            return Err(TransactionError::Invalid(
                "a non-zero quantity requires a target".to_string(),
            ));
        }
        if self.quantity.checked_add(self.fee).is_none() {
            return Err(TransactionError::Invalid(
                "quantity plus fee overflows".to_string(),
            ));
        }
        if !self.data.is_empty() && self.data_size != 0 && self.data_size != self.data.len() as u64 {
            return Err(TransactionError::Invalid(format!(
                "data_size {} does not match {} bytes of inline data",
                self.data_size,
                self.data.len()
            )));
        }
        if self.effective_data_size() > max_data_size {
            return Err(TransactionError::Invalid(format!(
                "data_size {} exceeds the limit of {} bytes",
                self.effective_data_size(),
                max_data_size
            )));
        }
        if self.data_size > 0 && self.data.is_empty() && self.data_root.is_none() {
            return Err(TransactionError::Invalid(
                "data_size without inline data requires a data_root".to_string(),
            ));
        }
        if let Some(id) = &self.id {
            if id.chars().any(|c| c.is_whitespace() || c == '/') {
                return Err(TransactionError::Invalid(format!("malformed id {:?}", id)));
            }
        }

        Ok(owner)
    }

    /// Size of the data this transaction carries or announces
    pub fn effective_data_size(&self) -> u64 {
        if self.data.is_empty() {
            self.data_size
        } else {
            self.data.len() as u64
        }
    }

    /// Data root declared by the client, or the hash of the inline data
    pub fn effective_data_root(&self) -> Option<String> {
        match &self.data_root {
            Some(root) => Some(root.clone()),
            None if !self.data.is_empty() => Some(content_hash([&self.data])),
            None => None,
        }
    }

    /// Content-derived identifier used when the client supplies none
    pub fn content_id(&self) -> String {
        let owner = self.owner.as_ref().map(Address::as_str).unwrap_or_default();
        let target = self.target.as_ref().map(Address::as_str).unwrap_or_default();
        let tags = self
            .tags
            .iter()
            .map(|tag| format!("{}={}", tag.name, tag.value))
            .collect::<Vec<_>>()
            .join("\n");
        let data_root = self.effective_data_root().unwrap_or_default();

        content_hash([
            owner.as_bytes(),
            target.as_bytes(),
            self.last_tx.as_bytes(),
            &self.quantity.to_be_bytes()[..],
            &self.fee.to_be_bytes()[..],
            tags.as_bytes(),
            data_root.as_bytes(),
            &self.effective_data_size().to_be_bytes()[..],
            self.signature.as_deref().unwrap_or_default().as_bytes(),
        ])
    }

    pub fn resolved_id(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.content_id(),
        }
    }
}

/// Represents a transaction held by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub format: u8,
    pub id: String,
    /// Anchor chosen by the client
    pub last_tx: String,
    pub owner: Address,
    pub target: Option<Address>,
    pub quantity: u64,
    pub fee: u64,
    pub tags: Vec<Tag>,
    /// Inline data; large payloads arrive as chunks instead
    pub data: Vec<u8>,
    pub data_size: u64,
    pub data_root: Option<String>,
    pub signature: Option<String>,
    pub status: TransactionStatus,
    pub block_id: Option<String>,
    /// Submission order
    pub sequence: u64,
    /// First absolute weave offset reserved for this transaction's chunks
    pub weave_start: u64,
}

impl Transaction {
    /// Builds the pending record for an accepted submission
    pub fn from_submission(
        request: NewTransaction,
        id: String,
        owner: Address,
        sequence: u64,
        weave_start: u64,
    ) -> Self {
        let data_size = request.effective_data_size();
        let data_root = request.effective_data_root();

        Transaction {
            format: request.format.unwrap_or(DEFAULT_FORMAT),
            id,
            last_tx: request.last_tx,
            owner,
            target: request.target,
            quantity: request.quantity,
            fee: request.fee,
            tags: request.tags,
            data: request.data,
            data_size,
            data_root,
            signature: request.signature,
            status: TransactionStatus::Pending,
            block_id: None,
            sequence,
            weave_start,
        }
    }

    /// Amount debited from the owner when mined
    pub fn total_cost(&self) -> Option<u64> {
        self.quantity.checked_add(self.fee)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// One past the last absolute weave offset of this transaction
    pub fn weave_end(&self) -> u64 {
        self.weave_start.saturating_add(self.data_size)
    }

    /// Value of the first tag named `name`, compared case-insensitively
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.name.eq_ignore_ascii_case(name))
            .map(|tag| tag.value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.tag("Content-Type")
    }

    /// Reads a single field as JSON
    pub fn field(&self, field: TransactionField) -> Value {
        match field {
            TransactionField::Id => json!(self.id),
            TransactionField::LastTx => json!(self.last_tx),
            TransactionField::Owner => json!(self.owner),
            TransactionField::Target => json!(self.target.as_ref().map(Address::as_str).unwrap_or_default()),
            TransactionField::Quantity => json!(self.quantity.to_string()),
            TransactionField::Reward => json!(self.fee.to_string()),
            TransactionField::DataRoot => json!(self.data_root.clone().unwrap_or_default()),
            TransactionField::DataSize => json!(self.data_size.to_string()),
            TransactionField::Tags => json!(self
                .tags
                .iter()
                .map(|tag| json!({
                    "name": encode_b64url(&tag.name),
                    "value": encode_b64url(&tag.value),
                }))
                .collect::<Vec<_>>()),
            TransactionField::Signature => json!(self.signature.clone().unwrap_or_default()),
            TransactionField::Format => json!(self.format),
            TransactionField::BlockId => json!(self.block_id),
        }
    }
}

/// Fields addressable through `/tx/{id}/{field}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionField {
    Id,
    LastTx,
    Owner,
    Target,
    Quantity,
    Reward,
    DataRoot,
    DataSize,
    Tags,
    Signature,
    Format,
    BlockId,
}

impl FromStr for TransactionField {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s {
            "id" => TransactionField::Id,
            "last_tx" => TransactionField::LastTx,
            "owner" => TransactionField::Owner,
            "target" => TransactionField::Target,
            "quantity" => TransactionField::Quantity,
            "reward" | "fee" => TransactionField::Reward,
            "data_root" => TransactionField::DataRoot,
            "data_size" => TransactionField::DataSize,
            "tags" => TransactionField::Tags,
            "signature" => TransactionField::Signature,
            "format" => TransactionField::Format,
            "block_id" | "block" => TransactionField::BlockId,
            other => return Err(TransactionError::UnknownProjection(other.to_string())),
        };
        Ok(field)
    }
}

/// A typed view of one aspect of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionProjection {
    Field(TransactionField),
    Status,
    Offset,
    Data,
    /// Data served as a file with the given extension
    File(String),
}

impl FromStr for TransactionProjection {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(TransactionProjection::Status),
            "offset" => Ok(TransactionProjection::Offset),
            "data" => Ok(TransactionProjection::Data),
            other => match other.strip_prefix("data.") {
                Some(extension) if !extension.is_empty() => {
                    Ok(TransactionProjection::File(extension.to_ascii_lowercase()))
                }
                Some(_) => Err(TransactionError::UnknownProjection(other.to_string())),
                None => other.parse().map(TransactionProjection::Field),
            },
        }
    }
}

impl fmt::Display for TransactionProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionProjection::Field(field) => write!(f, "{:?}", field),
            TransactionProjection::Status => write!(f, "status"),
            TransactionProjection::Offset => write!(f, "offset"),
            TransactionProjection::Data => write!(f, "data"),
            TransactionProjection::File(extension) => write!(f, "data.{}", extension),
        }
    }
}

/// Confirmation state returned by the `status` projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionStatusView {
    pub status: TransactionStatus,
    pub block_height: Option<u64>,
    pub block_indep_hash: Option<String>,
    pub number_of_confirmations: u64,
}

/// Weave position returned by the `offset` projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionOffset {
    /// Absolute offset of the last byte
    pub offset: String,
    pub size: String,
}

impl TransactionOffset {
    pub fn of(transaction: &Transaction) -> Self {
        TransactionOffset {
            offset: transaction.weave_end().saturating_sub(1).to_string(),
            size: transaction.data_size.to_string(),
        }
    }
}

/// Resolved value of a [`TransactionProjection`]
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionValue {
    Json(Value),
    Bytes { content_type: String, data: Vec<u8> },
}

/// Content type implied by a file extension
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => OCTET_STREAM,
    }
}

pub fn default_content_type() -> &'static str {
    OCTET_STREAM
}
