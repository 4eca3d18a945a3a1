//! Session identity values — public key, auth token, payloads, signatures.
//!
//! Wallets report account addresses as base64-encoded public key bytes. The
//! app displays them in base58, usually shortened to `ABCD...WXYZ`.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Length of an account public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Errors from decoding an account address.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("account address is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("account address is not valid base58: {0}")]
    InvalidBase58(String),

    #[error("account address is empty")]
    Empty,

    #[error("account address is {0} bytes, maximum is 32")]
    TooLong(usize),
}

/// The public identity of the connected wallet account.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicIdentity([u8; PUBLIC_KEY_LEN]);

impl PublicIdentity {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a wallet account address (base64 public key bytes).
    ///
    /// Addresses shorter than 32 bytes are left-padded with zeros, the same
    /// big-endian widening wallets apply to short keys. The address is
    /// decoded exactly as received; surrounding whitespace is an error.
    pub fn from_address(address: &str) -> Result<Self, IdentityError> {
        let raw = STANDARD
            .decode(address)
            .map_err(|e| IdentityError::InvalidBase64(e.to_string()))?;
        Self::from_slice(&raw)
    }

    /// Parse the base58 form produced by [`Display`](fmt::Display).
    pub fn from_base58(s: &str) -> Result<Self, IdentityError> {
        let raw = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| IdentityError::InvalidBase58(e.to_string()))?;
        Self::from_slice(&raw)
    }

    fn from_slice(raw: &[u8]) -> Result<Self, IdentityError> {
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        if raw.len() > PUBLIC_KEY_LEN {
            return Err(IdentityError::TooLong(raw.len()));
        }
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes[PUBLIC_KEY_LEN - raw.len()..].copy_from_slice(raw);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// First and last `n` characters of the base58 form, joined by `...`.
    ///
    /// Returns the full string when it is not longer than `2 * n`.
    pub fn short(&self, n: usize) -> String {
        let full = self.to_base58();
        if full.len() <= n * 2 {
            return full;
        }
        format!("{}...{}", &full[..n], &full[full.len() - n..])
    }
}

impl fmt::Display for PublicIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicIdentity({})", self.to_base58())
    }
}

impl Serialize for PublicIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

/// Opaque credential returned by `authorize`. Never leaves this crate.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct AuthToken(String);

impl AuthToken {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// A caller-built transaction, signed and submitted without inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPayload(Vec<u8>);

impl TransactionPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl From<Vec<u8>> for TransactionPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for TransactionPayload {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// The signature the wallet returned for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    pub(crate) fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
