//! Transaction primitives
//!
//! Self-contained codecs and checks the core treats as black boxes: hashing,
//! raw transaction encoding, scripts, BUMP Merkle paths, BEEF bundles and P2PKH
//! script verification.

pub mod beef;
pub mod bump;
pub mod hash;
pub mod script;
pub mod transaction;
pub mod verify;

use thiserror::Error;

pub use beef::{decode_beef_hex, encode_beef_hex, Beef};
pub use bump::MerklePath;
pub use transaction::{Outpoint, Transaction, TxId, TxInput, TxOutput};
pub use verify::{P2pkhScriptVerifier, ScriptVerifier};

/// Errors raised by the primitive codecs and checks
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("unexpected end of data: {0}")]
    Io(String),
    #[error("non-canonical varint")]
    InvalidVarInt,
    #[error("declared length {declared} exceeds remaining {remaining} bytes")]
    LengthOverflow { declared: u64, remaining: u64 },
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("unsupported BEEF version {0:#010x}")]
    InvalidBeefVersion(u32),
    #[error("invalid BEEF transaction flag {0}")]
    InvalidBeefFlag(u8),
    #[error("BUMP index {0} out of range")]
    BumpIndexOutOfRange(usize),
    #[error("atomic BEEF subject {0} is not the last transaction")]
    AtomicMismatch(String),
    #[error("BEEF contains no transactions")]
    EmptyBeef,
    #[error("BEEF has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("invalid tree height {0}")]
    InvalidTreeHeight(u8),
    #[error("invalid BUMP leaf flag {0}")]
    InvalidBumpFlag(u8),
    #[error("transaction {0} not found in merkle path")]
    LeafNotFound(String),
    #[error("missing sibling at offset {offset} on level {level}")]
    MissingSibling { level: usize, offset: u64 },
    #[error("merkle paths for block {0} do not share a root")]
    MerklePathMismatch(u64),
    #[error("invalid merkle path json: {0}")]
    InvalidMerklePathJson(String),
    #[error("push data truncated at byte {0}")]
    TruncatedPush(usize),
    #[error("push data of {0} bytes exceeds maximum push size")]
    PushDataTooLarge(usize),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("input {0} has no source output")]
    MissingSourceOutput(usize),
    #[error("script verification failed for input {index}: {reason}")]
    Verification { index: usize, reason: String },
}

impl From<std::io::Error> for PrimitiveError {
    fn from(err: std::io::Error) -> Self {
        PrimitiveError::Io(err.to_string())
    }
}

impl From<hex::FromHexError> for PrimitiveError {
    fn from(err: hex::FromHexError) -> Self {
        PrimitiveError::InvalidHex(err.to_string())
    }
}

pub type PrimitiveResult<T> = Result<T, PrimitiveError>;
