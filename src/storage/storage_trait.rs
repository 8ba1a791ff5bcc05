//! Repository traits consumed by the wallet core
//!
//! Each trait is a narrow capability so that flows only depend on the storage
//! surface they use. The SQLite backend implements all of them on a single
//! [`SqliteStorage`](super::SqliteStorage); tests may substitute any subset.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::WalletResult;
use crate::primitives::Outpoint;

use super::models::{
    Address, Bucket, FoundOutputs, NewAddress, NewPaymail, NewTransaction, Operation, Page,
    PageRequest, Paymail, TrackedTransaction, User, UserUtxo, UserWithPaymails,
};

/// Stored encoding of a tracked transaction
///
/// At most one of `raw_hex` and `beef_hex` is expected to be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxQueryResult {
    pub source_tx_id: String,
    pub raw_hex: Option<String>,
    pub beef_hex: Option<String>,
    /// BUMP JSON for a mined transaction stored as raw hex
    pub merkle_path: Option<String>,
}

impl TxQueryResult {
    pub fn is_beef(&self) -> bool {
        self.beef_hex.is_some()
    }

    pub fn is_raw(&self) -> bool {
        self.raw_hex.is_some()
    }
}

#[async_trait]
pub trait UsersRepository: Send + Sync {
    async fn get_by_public_key(&self, public_key: &str) -> WalletResult<Option<User>>;

    async fn get_with_paymails(&self, user_id: &str) -> WalletResult<Option<UserWithPaymails>>;

    /// Insert a user whose id was already derived from its public key
    ///
    /// The id is the user's P2PKH address and is tracked for the user in the
    /// same write. Repeating the call restores a missing address row.
    async fn create(&self, user_id: &str, public_key: &str) -> WalletResult<User>;

    async fn append_address(&self, user_id: &str, address: NewAddress) -> WalletResult<Address>;

    /// Fails with `PaymailAlreadyExists` when `(alias, domain)` is taken
    async fn append_paymail(&self, user_id: &str, paymail: NewPaymail) -> WalletResult<Paymail>;

    /// Sum of the user's UTXOs in `bucket`
    async fn balance(&self, user_id: &str, bucket: Bucket) -> WalletResult<u64>;
}

#[async_trait]
pub trait PaymailsRepository: Send + Sync {
    async fn get(&self, alias: &str, domain: &str) -> WalletResult<Option<Paymail>>;

    /// Oldest paymail of the user
    async fn get_default(&self, user_id: &str) -> WalletResult<Option<Paymail>>;
}

#[async_trait]
pub trait AddressesRepository: Send + Sync {
    async fn find_by_addresses(&self, addresses: &[String]) -> WalletResult<Vec<Address>>;
}

#[async_trait]
pub trait UtxosRepository: Send + Sync {
    /// Pick the coins funding `target` satoshis and mark them touched
    async fn select(
        &self,
        user_id: &str,
        target: u64,
        tx_bytes_without_inputs: u64,
    ) -> WalletResult<Vec<UserUtxo>>;

    /// Rejects the `data` bucket
    async fn insert_utxo(&self, utxo: &UserUtxo) -> WalletResult<()>;

    async fn get_utxo(&self, user_id: &str, outpoint: &Outpoint) -> WalletResult<Option<UserUtxo>>;

    async fn list_utxos(&self, user_id: &str) -> WalletResult<Vec<UserUtxo>>;

    async fn delete_utxo(&self, user_id: &str, outpoint: &Outpoint) -> WalletResult<bool>;
}

#[async_trait]
pub trait TrackedOutputsRepository: Send + Sync {
    /// Tracked outputs and user UTXOs matching `outpoints`, read together
    async fn find_by_outpoints(&self, outpoints: &[Outpoint]) -> WalletResult<FoundOutputs>;

    /// Persist a recorded transaction with its outputs, data, operations and
    /// spent inputs in one atomic write. Fails with `UtxoSpent` if any spent
    /// outpoint was taken by another transaction in the meantime.
    async fn save_transaction(&self, tx: &NewTransaction) -> WalletResult<()>;
}

#[async_trait]
pub trait TransactionsRepository: Send + Sync {
    /// True when every id is a tracked transaction
    async fn has_input_sources(&self, source_tx_ids: &[String]) -> WalletResult<bool>;

    async fn find_by_ids(&self, tx_ids: &[String]) -> WalletResult<Vec<TxQueryResult>>;

    async fn get(&self, tx_id: &str) -> WalletResult<Option<TrackedTransaction>>;

    async fn mark_mined(&self, tx_id: &str, merkle_path_json: &str) -> WalletResult<bool>;
}

#[async_trait]
pub trait OperationsRepository: Send + Sync {
    /// Upsert by `(tx_id, user_id)`
    async fn save_all(&self, operations: &[Operation]) -> WalletResult<()>;

    /// Newest first
    async fn page_for_user(&self, user_id: &str, page: PageRequest) -> WalletResult<Page<Operation>>;
}

/// Every capability the engine needs from one backend
pub trait WalletStorage:
    UsersRepository
    + PaymailsRepository
    + AddressesRepository
    + UtxosRepository
    + TrackedOutputsRepository
    + TransactionsRepository
    + OperationsRepository
{
}

impl<T> WalletStorage for T where
    T: UsersRepository
        + PaymailsRepository
        + AddressesRepository
        + UtxosRepository
        + TrackedOutputsRepository
        + TransactionsRepository
        + OperationsRepository
{
}
