use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::str::FromStr;

/// Longest address accepted by the structural check
const MAX_ADDRESS_LEN: usize = 128;

/// Errors that can occur while decoding identifiers and payloads
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Represents a wallet address.
///
/// Only the shape is checked: a non-empty base64url string. No key material
/// is attached to an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(CryptoError::InvalidAddress("address is empty".to_string()));
        }
        if s.len() > MAX_ADDRESS_LEN {
            return Err(CryptoError::InvalidAddress(format!(
                "address is longer than {} characters",
                MAX_ADDRESS_LEN
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(CryptoError::InvalidAddress(format!(
                "{} is not a base64url string",
                s
            )));
        }

        Ok(Address(s.to_string()))
    }
}

/// Hashes the given parts into a 43 character base64url identifier
pub fn content_hash<I, B>(parts: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let part = part.as_ref();
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    encode_b64url(hasher.finalize())
}

pub fn encode_b64url(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_b64url(text: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(text.trim_end_matches('='))
        .map_err(|e| CryptoError::DecodingError(e.to_string()))
}
