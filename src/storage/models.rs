//! Persistent entities of the wallet core
//!
//! Everything here is plain data shared by the repository traits, the SQLite
//! backend and the transaction flows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::primitives::Outpoint;

/// UTXO bucket. `data` outputs are never spendable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Bsv,
    Data,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Bsv => "bsv",
            Bucket::Data => "data",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bsv" => Ok(Bucket::Bsv),
            "data" => Ok(Bucket::Data),
            other => Err(format!("unknown bucket: {other}")),
        }
    }
}

/// Lifecycle of a tracked transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Created,
    Broadcasted,
    Mined,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Created => "created",
            TxStatus::Broadcasted => "broadcasted",
            TxStatus::Mined => "mined",
        }
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TxStatus::Created),
            "broadcasted" => Ok(TxStatus::Broadcasted),
            "mined" => Ok(TxStatus::Mined),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Kind of balance change an operation describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Incoming,
    Outgoing,
    Data,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Incoming => "incoming",
            OperationType::Outgoing => "outgoing",
            OperationType::Data => "data",
        }
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(OperationType::Incoming),
            "outgoing" => Ok(OperationType::Outgoing),
            "data" => Ok(OperationType::Data),
            other => Err(format!("unknown operation type: {other}")),
        }
    }
}

/// Opaque key-derivation hint attached to an address or UTXO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomInstruction {
    #[serde(rename = "type")]
    pub instruction_type: String,
    pub instruction: String,
}

pub type CustomInstructions = Vec<CustomInstruction>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// P2PKH address of `public_key`
    pub id: String,
    /// Compressed public key, hex
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paymail {
    pub id: i64,
    pub alias: String,
    pub domain: String,
    pub public_name: String,
    pub avatar: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Paymail {
    /// `alias@domain`
    pub fn address(&self) -> String {
        format!("{}@{}", self.alias, self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymail {
    pub alias: String,
    pub domain: String,
    pub public_name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserWithPaymails {
    pub user: User,
    /// Oldest first; the first entry is the default paymail
    pub paymails: Vec<Paymail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub user_id: String,
    pub custom_instructions: CustomInstructions,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddress {
    pub address: String,
    pub custom_instructions: CustomInstructions,
}

/// Output of a transaction the engine tracks, spent or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOutput {
    pub tx_id: String,
    pub vout: u32,
    pub spending_tx_id: Option<String>,
    pub user_id: Option<String>,
    pub satoshis: u64,
    pub bucket: Bucket,
    pub created_at: DateTime<Utc>,
}

impl TrackedOutput {
    pub fn outpoint(&self) -> Outpoint {
        Outpoint::new(self.tx_id.clone(), self.vout)
    }

    pub fn is_spent(&self) -> bool {
        self.spending_tx_id.is_some()
    }
}

/// Spendable coin of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUtxo {
    pub user_id: String,
    pub tx_id: String,
    pub vout: u32,
    pub satoshis: u64,
    pub unlocking_script_estimated_size: u64,
    pub bucket: Bucket,
    pub custom_instructions: CustomInstructions,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
}

impl UserUtxo {
    pub fn outpoint(&self) -> Outpoint {
        Outpoint::new(self.tx_id.clone(), self.vout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTransaction {
    pub id: String,
    pub status: TxStatus,
    pub beef_hex: Option<String>,
    pub raw_hex: Option<String>,
    /// BUMP in its JSON form, set once mined
    pub merkle_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bytes carried by an OP_RETURN output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub tx_id: String,
    pub vout: u32,
    pub user_id: String,
    pub blob: Vec<u8>,
}

/// Per-user balance change caused by one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub tx_id: String,
    pub user_id: String,
    pub op_type: OperationType,
    pub value: i64,
    pub counterparty: String,
    pub tx_status: TxStatus,
    pub created_at: DateTime<Utc>,
}

/// Output to record for a newly seen transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewOutput {
    /// P2PKH output paying a tracked address
    Spendable {
        vout: u32,
        user_id: String,
        satoshis: u64,
        unlocking_script_estimated_size: u64,
        custom_instructions: CustomInstructions,
    },
    /// OP_RETURN output kept for a user
    Data {
        vout: u32,
        user_id: String,
        blob: Vec<u8>,
    },
}

impl NewOutput {
    pub fn vout(&self) -> u32 {
        match self {
            NewOutput::Spendable { vout, .. } | NewOutput::Data { vout, .. } => *vout,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            NewOutput::Spendable { user_id, .. } | NewOutput::Data { user_id, .. } => user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub user_id: String,
    pub op_type: OperationType,
    pub value: i64,
    pub counterparty: String,
}

/// Everything `record` persists in one atomic write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub id: String,
    pub status: TxStatus,
    pub beef_hex: Option<String>,
    pub raw_hex: Option<String>,
    /// Outpoints this transaction spends
    pub spent_outpoints: Vec<Outpoint>,
    pub outputs: Vec<NewOutput>,
    pub operations: Vec<NewOperation>,
}

/// Inputs of a transaction split by what the engine knows about them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoundOutputs {
    pub tracked: Vec<TrackedOutput>,
    pub utxos: Vec<UserUtxo>,
}

impl FoundOutputs {
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty() && self.utxos.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based
    pub page: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, size: 50 }
    }
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}
