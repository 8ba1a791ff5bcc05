//! SQLite storage backend for the wallet core
//!
//! One [`SqliteStorage`] implements every repository trait over eight tables.
//! Timestamps are stored as microseconds since the Unix epoch so that the
//! selection ordering `(touched_at, created_at, tx_id, vout)` is a plain
//! integer comparison.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::config::{FeeRate, ESTIMATED_CHANGE_OUTPUT_SIZE};
use crate::errors::{WalletError, WalletResult};
use crate::primitives::Outpoint;
use crate::storage::{
    Address, AddressesRepository, Bucket, CustomInstructions, FoundOutputs, NewAddress,
    NewOutput, NewPaymail, NewTransaction, Operation, OperationsRepository, Page, PageRequest,
    Paymail, PaymailsRepository, SqliteConnectionOptions, TrackedOutput,
    TrackedOutputsRepository, TrackedTransaction, TransactionsRepository, TxQueryResult, User,
    UserUtxo, UsersRepository, UserWithPaymails, UtxosRepository,
};

/// Raised inside a write when a spent outpoint belongs to another transaction
#[derive(Debug, thiserror::Error)]
#[error("outpoint {0} is already spent")]
struct OutpointAlreadySpent(String);

/// Raised inside a write when `(alias, domain)` is already registered
#[derive(Debug, thiserror::Error)]
#[error("paymail {0} is already registered")]
struct PaymailTaken(String);

/// Raised inside a write when a user's identity address is owned by someone else
#[derive(Debug, thiserror::Error)]
#[error("address {0} is tracked for another user")]
struct AddressTaken(String);

/// SQLite storage backend
pub struct SqliteStorage {
    connection: Connection,
    options: SqliteConnectionOptions,
    fee_rate: FeeRate,
}

impl SqliteStorage {
    /// Open (or create) a database file with durable connection options
    pub async fn new<P: AsRef<Path>>(database_path: P) -> WalletResult<Self> {
        Self::new_with_options(
            database_path,
            SqliteConnectionOptions::durable(),
            FeeRate::default(),
        )
        .await
    }

    pub async fn new_with_options<P: AsRef<Path>>(
        database_path: P,
        options: SqliteConnectionOptions,
        fee_rate: FeeRate,
    ) -> WalletResult<Self> {
        let connection = Connection::open(database_path).await.map_err(|e| {
            WalletError::StorageError(format!("Failed to open SQLite database: {e}"))
        })?;
        Self::from_connection(connection, options, fee_rate).await
    }

    /// In-memory database, used by tests
    pub async fn new_in_memory() -> WalletResult<Self> {
        Self::new_in_memory_with_fee_rate(FeeRate::default()).await
    }

    pub async fn new_in_memory_with_fee_rate(fee_rate: FeeRate) -> WalletResult<Self> {
        let connection = Connection::open_in_memory().await.map_err(|e| {
            WalletError::StorageError(format!("Failed to open in-memory database: {e}"))
        })?;
        Self::from_connection(connection, SqliteConnectionOptions::in_memory(), fee_rate).await
    }

    async fn from_connection(
        connection: Connection,
        options: SqliteConnectionOptions,
        fee_rate: FeeRate,
    ) -> WalletResult<Self> {
        let storage = Self {
            connection,
            options,
            fee_rate,
        };
        storage.options.apply_to_connection(&storage.connection).await?;
        storage.create_schema().await?;
        Ok(storage)
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    async fn create_schema(&self) -> WalletResult<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                public_key TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paymails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alias TEXT NOT NULL,
                domain TEXT NOT NULL,
                public_name TEXT NOT NULL DEFAULT '',
                avatar TEXT NOT NULL DEFAULT '',
                user_id TEXT NOT NULL REFERENCES users(id),
                created_at INTEGER NOT NULL,
                UNIQUE (alias, domain)
            );

            CREATE TABLE IF NOT EXISTS addresses (
                address TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                custom_instructions TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracked_transactions (
                id TEXT PRIMARY KEY,
                tx_status TEXT NOT NULL,
                beef_hex TEXT,
                raw_hex TEXT,
                merkle_path TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracked_outputs (
                tx_id TEXT NOT NULL,
                vout INTEGER NOT NULL,
                spending_tx_id TEXT REFERENCES tracked_transactions(id),
                user_id TEXT,
                satoshis INTEGER NOT NULL DEFAULT 0,
                bucket TEXT NOT NULL DEFAULT 'bsv',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (tx_id, vout)
            );

            CREATE TABLE IF NOT EXISTS user_utxos (
                user_id TEXT NOT NULL REFERENCES users(id),
                tx_id TEXT NOT NULL,
                vout INTEGER NOT NULL,
                satoshis INTEGER NOT NULL,
                unlocking_script_estimated_size INTEGER NOT NULL,
                bucket TEXT NOT NULL CHECK (bucket <> 'data'),
                custom_instructions TEXT NOT NULL DEFAULT '[]',
                created_at INTEGER NOT NULL,
                touched_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, tx_id, vout)
            );

            CREATE TABLE IF NOT EXISTS operations (
                tx_id TEXT NOT NULL REFERENCES tracked_transactions(id),
                user_id TEXT NOT NULL REFERENCES users(id),
                type TEXT NOT NULL,
                value INTEGER NOT NULL,
                counterparty TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                PRIMARY KEY (tx_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS data (
                tx_id TEXT NOT NULL,
                vout INTEGER NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id),
                blob BLOB NOT NULL,
                PRIMARY KEY (tx_id, vout)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_user_utxos_selection
                ON user_utxos(user_id, touched_at, created_at, tx_id, vout);
            CREATE INDEX IF NOT EXISTS idx_user_utxos_outpoint ON user_utxos(tx_id, vout);
            CREATE INDEX IF NOT EXISTS idx_tracked_outputs_spending ON tracked_outputs(spending_tx_id);
            CREATE INDEX IF NOT EXISTS idx_paymails_user ON paymails(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_operations_user ON operations(user_id, created_at);
        "#;

        self.connection
            .call(move |conn| Ok(conn.execute_batch(sql)?))
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to create schema: {e}")))
    }
}

fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn parse_column<T: std::str::FromStr<Err = String>>(row: &Row, column: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e| conversion_error(column, e))
}

fn instructions_column(row: &Row, column: usize) -> rusqlite::Result<CustomInstructions> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(column, e.to_string()))
}

fn instructions_to_json(instructions: &CustomInstructions) -> tokio_rusqlite::Result<String> {
    serde_json::to_string(instructions).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        public_key: row.get(1)?,
        created_at: from_micros(row.get(2)?),
        updated_at: from_micros(row.get(3)?),
    })
}

fn row_to_paymail(row: &Row) -> rusqlite::Result<Paymail> {
    Ok(Paymail {
        id: row.get(0)?,
        alias: row.get(1)?,
        domain: row.get(2)?,
        public_name: row.get(3)?,
        avatar: row.get(4)?,
        user_id: row.get(5)?,
        created_at: from_micros(row.get(6)?),
    })
}

fn row_to_address(row: &Row) -> rusqlite::Result<Address> {
    Ok(Address {
        address: row.get(0)?,
        user_id: row.get(1)?,
        custom_instructions: instructions_column(row, 2)?,
        created_at: from_micros(row.get(3)?),
    })
}

fn row_to_tracked_output(row: &Row) -> rusqlite::Result<TrackedOutput> {
    Ok(TrackedOutput {
        tx_id: row.get(0)?,
        vout: row.get(1)?,
        spending_tx_id: row.get(2)?,
        user_id: row.get(3)?,
        satoshis: row.get::<_, i64>(4)? as u64,
        bucket: parse_column(row, 5)?,
        created_at: from_micros(row.get(6)?),
    })
}

fn row_to_utxo(row: &Row) -> rusqlite::Result<UserUtxo> {
    Ok(UserUtxo {
        user_id: row.get(0)?,
        tx_id: row.get(1)?,
        vout: row.get(2)?,
        satoshis: row.get::<_, i64>(3)? as u64,
        unlocking_script_estimated_size: row.get::<_, i64>(4)? as u64,
        bucket: parse_column(row, 5)?,
        custom_instructions: instructions_column(row, 6)?,
        created_at: from_micros(row.get(7)?),
        touched_at: from_micros(row.get(8)?),
    })
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<TrackedTransaction> {
    Ok(TrackedTransaction {
        id: row.get(0)?,
        status: parse_column(row, 1)?,
        beef_hex: row.get(2)?,
        raw_hex: row.get(3)?,
        merkle_path: row.get(4)?,
        created_at: from_micros(row.get(5)?),
        updated_at: from_micros(row.get(6)?),
    })
}

fn row_to_operation(row: &Row) -> rusqlite::Result<Operation> {
    Ok(Operation {
        tx_id: row.get(0)?,
        user_id: row.get(1)?,
        op_type: parse_column(row, 2)?,
        value: row.get(3)?,
        counterparty: row.get(4)?,
        tx_status: parse_column(row, 5)?,
        created_at: from_micros(row.get(6)?),
    })
}

const USER_COLUMNS: &str = "id, public_key, created_at, updated_at";
const PAYMAIL_COLUMNS: &str = "id, alias, domain, public_name, avatar, user_id, created_at";
const UTXO_COLUMNS: &str = "user_id, tx_id, vout, satoshis, unlocking_script_estimated_size, \
                            bucket, custom_instructions, created_at, touched_at";
const TRACKED_OUTPUT_COLUMNS: &str =
    "tx_id, vout, spending_tx_id, user_id, satoshis, bucket, created_at";

/// Window query picking the shortest prefix, in rotation order, that covers
/// the target plus fee with the smallest non-negative change.
///
/// Parameters: user id, target, tx bytes without inputs, fee unit bytes,
/// fee unit satoshis, change output size.
const SELECT_INPUTS_SQL: &str = r#"
    SELECT user_id, tx_id, vout, satoshis, unlocking_script_estimated_size,
           bucket, custom_instructions, created_at, touched_at
    FROM user_utxos
    WHERE user_id = ?1 AND (tx_id, vout) IN (
        SELECT tx_id, vout FROM (
            SELECT tx_id, vout, change,
                   MIN(CASE WHEN change >= 0 THEN change END) OVER () AS min_change
            FROM (
                SELECT tx_id, vout,
                       CASE WHEN remaining_value - fee_no_change_output <= 0
                            THEN remaining_value - fee_no_change_output
                            ELSE remaining_value - fee_with_change_output
                       END AS change
                FROM (
                    SELECT tx_id, vout,
                           SUM(satoshis) OVER w - ?2 AS remaining_value,
                           ((SUM(unlocking_script_estimated_size) OVER w + ?3 + ?4 - 1) / ?4) * ?5
                               AS fee_no_change_output,
                           ((SUM(unlocking_script_estimated_size) OVER w + ?3 + ?6 + ?4 - 1) / ?4) * ?5
                               AS fee_with_change_output
                    FROM user_utxos
                    WHERE user_id = ?1 AND bucket = 'bsv'
                    WINDOW w AS (ORDER BY touched_at ASC, created_at ASC, tx_id ASC, vout ASC)
                )
            )
        )
        WHERE min_change IS NOT NULL AND change <= min_change
    )
    ORDER BY touched_at ASC, created_at ASC, tx_id ASC, vout ASC
"#;

#[async_trait]
impl UsersRepository for SqliteStorage {
    async fn get_by_public_key(&self, public_key: &str) -> WalletResult<Option<User>> {
        let public_key = public_key.to_string();
        self.connection
            .call(move |conn| {
                let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE public_key = ?");
                Ok(conn
                    .query_row(&sql, params![public_key], row_to_user)
                    .optional()?)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to get user: {e}")))
    }

    async fn get_with_paymails(&self, user_id: &str) -> WalletResult<Option<UserWithPaymails>> {
        let user_id = user_id.to_string();
        self.connection
            .call(move |conn| {
                let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
                let Some(user) = conn.query_row(&sql, params![user_id], row_to_user).optional()?
                else {
                    return Ok(None);
                };

                let sql = format!(
                    "SELECT {PAYMAIL_COLUMNS} FROM paymails WHERE user_id = ? ORDER BY created_at ASC, id ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let paymails = stmt
                    .query_map(params![user_id], row_to_paymail)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Some(UserWithPaymails { user, paymails }))
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to get user with paymails: {e}")))
    }

    async fn create(&self, user_id: &str, public_key: &str) -> WalletResult<User> {
        let user_id = user_id.to_string();
        let public_key = public_key.to_string();
        self.connection
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = now_micros();
                tx.execute(
                    "INSERT INTO users (id, public_key, created_at, updated_at) VALUES (?, ?, ?, ?)
                     ON CONFLICT(id) DO NOTHING",
                    params![user_id, public_key, now, now],
                )?;
                tx.execute(
                    "INSERT INTO addresses (address, user_id, custom_instructions, created_at)
                     VALUES (?1, ?1, ?2, ?3)
                     ON CONFLICT(address) DO NOTHING",
                    params![user_id, instructions_to_json(&CustomInstructions::new())?, now],
                )?;
                let owner: String = tx.query_row(
                    "SELECT user_id FROM addresses WHERE address = ?",
                    params![user_id],
                    |row| row.get(0),
                )?;
                if owner != user_id {
                    return Err(tokio_rusqlite::Error::Other(Box::new(AddressTaken(user_id))));
                }

                let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
                let user = tx.query_row(&sql, params![user_id], row_to_user)?;
                tx.commit()?;
                Ok(user)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to create user: {e}")))
    }

    async fn append_address(&self, user_id: &str, address: NewAddress) -> WalletResult<Address> {
        let user_id = user_id.to_string();
        self.connection
            .call(move |conn| {
                let now = now_micros();
                let instructions = instructions_to_json(&address.custom_instructions)?;
                conn.execute(
                    "INSERT INTO addresses (address, user_id, custom_instructions, created_at)
                     VALUES (?, ?, ?, ?)",
                    params![address.address, user_id, instructions, now],
                )?;
                Ok(Address {
                    address: address.address,
                    user_id,
                    custom_instructions: address.custom_instructions,
                    created_at: from_micros(now),
                })
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to append address: {e}")))
    }

    async fn append_paymail(&self, user_id: &str, paymail: NewPaymail) -> WalletResult<Paymail> {
        let user_id = user_id.to_string();
        self.connection
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM paymails WHERE alias = ? AND domain = ?)",
                    params![paymail.alias, paymail.domain],
                    |row| row.get(0),
                )?;
                if taken {
                    return Err(tokio_rusqlite::Error::Other(Box::new(PaymailTaken(format!(
                        "{}@{}",
                        paymail.alias, paymail.domain
                    )))));
                }

                let now = now_micros();
                tx.execute(
                    "INSERT INTO paymails (alias, domain, public_name, avatar, user_id, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        paymail.alias,
                        paymail.domain,
                        paymail.public_name,
                        paymail.avatar,
                        user_id,
                        now
                    ],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;

                Ok(Paymail {
                    id,
                    alias: paymail.alias,
                    domain: paymail.domain,
                    public_name: paymail.public_name,
                    avatar: paymail.avatar,
                    user_id,
                    created_at: from_micros(now),
                })
            })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Other(inner) if inner.is::<PaymailTaken>() => {
                    WalletError::PaymailAlreadyExists(inner.to_string())
                }
                e => WalletError::StorageError(format!("Failed to append paymail: {e}")),
            })
    }

    async fn balance(&self, user_id: &str, bucket: Bucket) -> WalletResult<u64> {
        let user_id = user_id.to_string();
        self.connection
            .call(move |conn| {
                let total: i64 = conn.query_row(
                    "SELECT COALESCE(SUM(satoshis), 0) FROM user_utxos WHERE user_id = ? AND bucket = ?",
                    params![user_id, bucket.as_str()],
                    |row| row.get(0),
                )?;
                Ok(total as u64)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to get balance: {e}")))
    }
}

#[async_trait]
impl PaymailsRepository for SqliteStorage {
    async fn get(&self, alias: &str, domain: &str) -> WalletResult<Option<Paymail>> {
        let alias = alias.to_string();
        let domain = domain.to_string();
        self.connection
            .call(move |conn| {
                let sql = format!("SELECT {PAYMAIL_COLUMNS} FROM paymails WHERE alias = ? AND domain = ?");
                Ok(conn
                    .query_row(&sql, params![alias, domain], row_to_paymail)
                    .optional()?)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to get paymail: {e}")))
    }

    async fn get_default(&self, user_id: &str) -> WalletResult<Option<Paymail>> {
        let user_id = user_id.to_string();
        self.connection
            .call(move |conn| {
                let sql = format!(
                    "SELECT {PAYMAIL_COLUMNS} FROM paymails WHERE user_id = ?
                     ORDER BY created_at ASC, id ASC LIMIT 1"
                );
                Ok(conn
                    .query_row(&sql, params![user_id], row_to_paymail)
                    .optional()?)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to get default paymail: {e}")))
    }
}

#[async_trait]
impl AddressesRepository for SqliteStorage {
    async fn find_by_addresses(&self, addresses: &[String]) -> WalletResult<Vec<Address>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let addresses = addresses.to_vec();
        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT address, user_id, custom_instructions, created_at FROM addresses WHERE address = ?",
                )?;
                let mut found = Vec::new();
                let mut seen = HashSet::new();
                for address in addresses.iter().filter(|a| seen.insert(a.as_str())) {
                    if let Some(row) = stmt.query_row(params![address], row_to_address).optional()? {
                        found.push(row);
                    }
                }
                Ok(found)
            })
            .await
            .map_err(|e| WalletError::GettingAddresses(e.to_string()))
    }
}

#[async_trait]
impl UtxosRepository for SqliteStorage {
    async fn select(
        &self,
        user_id: &str,
        target: u64,
        tx_bytes_without_inputs: u64,
    ) -> WalletResult<Vec<UserUtxo>> {
        let user_id = user_id.to_string();
        let fee_rate = self.fee_rate;
        if fee_rate.per_bytes == 0 {
            return Err(WalletError::InvalidConfig(
                "fee rate per_bytes must be positive".to_string(),
            ));
        }

        // No stored balance can reach amounts beyond the SQLite integer range
        let (Ok(target_sats), Ok(tx_bytes)) = (
            i64::try_from(target),
            i64::try_from(tx_bytes_without_inputs),
        ) else {
            debug!(target_sats = target, "selection target out of range");
            return Ok(Vec::new());
        };

        let selected = self
            .connection
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let selected = {
                    let mut stmt = tx.prepare(SELECT_INPUTS_SQL)?;
                    let rows = stmt.query_map(
                        params![
                            user_id,
                            target_sats,
                            tx_bytes,
                            fee_rate.per_bytes as i64,
                            fee_rate.sats as i64,
                            ESTIMATED_CHANGE_OUTPUT_SIZE as i64
                        ],
                        row_to_utxo,
                    )?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                if selected.is_empty() {
                    return Ok(selected);
                }

                // Strictly after every earlier touch so the selected coins rotate to the tail
                let latest: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(touched_at), 0) FROM user_utxos WHERE user_id = ?",
                    params![user_id],
                    |row| row.get(0),
                )?;
                let touched_at = now_micros().max(latest + 1);
                {
                    let mut update = tx.prepare(
                        "UPDATE user_utxos SET touched_at = ? WHERE user_id = ? AND tx_id = ? AND vout = ?",
                    )?;
                    for utxo in &selected {
                        update.execute(params![touched_at, user_id, utxo.tx_id, utxo.vout])?;
                    }
                }
                tx.commit()?;

                Ok(selected
                    .into_iter()
                    .map(|utxo| UserUtxo {
                        touched_at: from_micros(touched_at),
                        ..utxo
                    })
                    .collect())
            })
            .await
            .map_err(|e| WalletError::UnexpectedErrorDuringInputsSelection(e.to_string()))?;

        debug!(count = selected.len(), target_sats = target, "selected inputs");
        Ok(selected)
    }

    async fn insert_utxo(&self, utxo: &UserUtxo) -> WalletResult<()> {
        if utxo.bucket == Bucket::Data {
            return Err(WalletError::ForbiddenBucket(utxo.bucket.to_string()));
        }
        let utxo = utxo.clone();
        self.connection
            .call(move |conn| {
                let instructions = instructions_to_json(&utxo.custom_instructions)?;
                conn.execute(
                    "INSERT INTO user_utxos (user_id, tx_id, vout, satoshis, unlocking_script_estimated_size,
                                             bucket, custom_instructions, created_at, touched_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        utxo.user_id,
                        utxo.tx_id,
                        utxo.vout,
                        utxo.satoshis as i64,
                        utxo.unlocking_script_estimated_size as i64,
                        utxo.bucket.as_str(),
                        instructions,
                        utxo.created_at.timestamp_micros(),
                        utxo.touched_at.timestamp_micros(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to insert utxo: {e}")))
    }

    async fn get_utxo(&self, user_id: &str, outpoint: &Outpoint) -> WalletResult<Option<UserUtxo>> {
        let user_id = user_id.to_string();
        let outpoint = outpoint.clone();
        self.connection
            .call(move |conn| {
                let sql = format!(
                    "SELECT {UTXO_COLUMNS} FROM user_utxos WHERE user_id = ? AND tx_id = ? AND vout = ?"
                );
                Ok(conn
                    .query_row(&sql, params![user_id, outpoint.tx_id, outpoint.vout], row_to_utxo)
                    .optional()?)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to get utxo: {e}")))
    }

    async fn list_utxos(&self, user_id: &str) -> WalletResult<Vec<UserUtxo>> {
        let user_id = user_id.to_string();
        self.connection
            .call(move |conn| {
                let sql = format!(
                    "SELECT {UTXO_COLUMNS} FROM user_utxos WHERE user_id = ?
                     ORDER BY touched_at ASC, created_at ASC, tx_id ASC, vout ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![user_id], row_to_utxo)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to list utxos: {e}")))
    }

    async fn delete_utxo(&self, user_id: &str, outpoint: &Outpoint) -> WalletResult<bool> {
        let user_id = user_id.to_string();
        let outpoint = outpoint.clone();
        self.connection
            .call(move |conn| {
                let rows = conn.execute(
                    "DELETE FROM user_utxos WHERE user_id = ? AND tx_id = ? AND vout = ?",
                    params![user_id, outpoint.tx_id, outpoint.vout],
                )?;
                Ok(rows > 0)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to delete utxo: {e}")))
    }
}

#[async_trait]
impl TrackedOutputsRepository for SqliteStorage {
    async fn find_by_outpoints(&self, outpoints: &[Outpoint]) -> WalletResult<FoundOutputs> {
        if outpoints.is_empty() {
            return Ok(FoundOutputs::default());
        }
        let outpoints = outpoints.to_vec();
        self.connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut found = FoundOutputs::default();
                {
                    let sql = format!(
                        "SELECT {TRACKED_OUTPUT_COLUMNS} FROM tracked_outputs WHERE tx_id = ? AND vout = ?"
                    );
                    let mut outputs_stmt = tx.prepare(&sql)?;
                    let sql = format!("SELECT {UTXO_COLUMNS} FROM user_utxos WHERE tx_id = ? AND vout = ?");
                    let mut utxos_stmt = tx.prepare(&sql)?;

                    for outpoint in &outpoints {
                        if let Some(output) = outputs_stmt
                            .query_row(params![outpoint.tx_id, outpoint.vout], row_to_tracked_output)
                            .optional()?
                        {
                            found.tracked.push(output);
                        }
                        let utxos = utxos_stmt
                            .query_map(params![outpoint.tx_id, outpoint.vout], row_to_utxo)?
                            .collect::<Result<Vec<_>, _>>()?;
                        found.utxos.extend(utxos);
                    }
                }
                tx.commit()?;
                Ok(found)
            })
            .await
            .map_err(|e| WalletError::GettingOutputs(e.to_string()))
    }

    async fn save_transaction(&self, new_tx: &NewTransaction) -> WalletResult<()> {
        let new_tx = new_tx.clone();
        let tx_id = new_tx.id.clone();
        self.connection
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = now_micros();

                tx.execute(
                    "INSERT INTO tracked_transactions (id, tx_status, beef_hex, raw_hex, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET tx_status = excluded.tx_status, updated_at = excluded.updated_at",
                    params![
                        new_tx.id,
                        new_tx.status.as_str(),
                        new_tx.beef_hex,
                        new_tx.raw_hex,
                        now,
                        now
                    ],
                )?;

                for outpoint in &new_tx.spent_outpoints {
                    let marked = tx.execute(
                        "UPDATE tracked_outputs SET spending_tx_id = ?1, updated_at = ?2
                         WHERE tx_id = ?3 AND vout = ?4
                           AND (spending_tx_id IS NULL OR spending_tx_id = ?1)",
                        params![new_tx.id, now, outpoint.tx_id, outpoint.vout],
                    )?;
                    if marked == 0 {
                        let tracked: bool = tx.query_row(
                            "SELECT EXISTS(SELECT 1 FROM tracked_outputs WHERE tx_id = ? AND vout = ?)",
                            params![outpoint.tx_id, outpoint.vout],
                            |row| row.get(0),
                        )?;
                        if tracked {
                            return Err(tokio_rusqlite::Error::Other(Box::new(
                                OutpointAlreadySpent(outpoint.to_string()),
                            )));
                        }
                    }
                    tx.execute(
                        "DELETE FROM user_utxos WHERE tx_id = ? AND vout = ?",
                        params![outpoint.tx_id, outpoint.vout],
                    )?;
                }

                for output in &new_tx.outputs {
                    match output {
                        NewOutput::Spendable {
                            vout,
                            user_id,
                            satoshis,
                            unlocking_script_estimated_size,
                            custom_instructions,
                        } => {
                            tx.execute(
                                "INSERT INTO tracked_outputs (tx_id, vout, user_id, satoshis, bucket, created_at, updated_at)
                                 VALUES (?, ?, ?, ?, 'bsv', ?, ?)
                                 ON CONFLICT(tx_id, vout) DO NOTHING",
                                params![new_tx.id, vout, user_id, *satoshis as i64, now, now],
                            )?;
                            let instructions = instructions_to_json(custom_instructions)?;
                            tx.execute(
                                "INSERT INTO user_utxos (user_id, tx_id, vout, satoshis, unlocking_script_estimated_size,
                                                         bucket, custom_instructions, created_at, touched_at)
                                 SELECT ?1, ?2, ?3, ?4, ?5, 'bsv', ?6, ?7, ?7
                                 WHERE NOT EXISTS (
                                     SELECT 1 FROM tracked_outputs
                                     WHERE tx_id = ?2 AND vout = ?3 AND spending_tx_id IS NOT NULL
                                 )
                                 ON CONFLICT(user_id, tx_id, vout) DO NOTHING",
                                params![
                                    user_id,
                                    new_tx.id,
                                    vout,
                                    *satoshis as i64,
                                    *unlocking_script_estimated_size as i64,
                                    instructions,
                                    now
                                ],
                            )?;
                        }
                        NewOutput::Data { vout, user_id, blob } => {
                            tx.execute(
                                "INSERT INTO tracked_outputs (tx_id, vout, user_id, satoshis, bucket, created_at, updated_at)
                                 VALUES (?, ?, ?, 0, 'data', ?, ?)
                                 ON CONFLICT(tx_id, vout) DO NOTHING",
                                params![new_tx.id, vout, user_id, now, now],
                            )?;
                            tx.execute(
                                "INSERT INTO data (tx_id, vout, user_id, blob) VALUES (?, ?, ?, ?)
                                 ON CONFLICT(tx_id, vout) DO NOTHING",
                                params![new_tx.id, vout, user_id, blob],
                            )?;
                        }
                    }
                }

                for operation in &new_tx.operations {
                    tx.execute(
                        "INSERT INTO operations (tx_id, user_id, type, value, counterparty, created_at)
                         VALUES (?, ?, ?, ?, ?, ?)
                         ON CONFLICT(tx_id, user_id) DO UPDATE SET
                             type = excluded.type, value = excluded.value, counterparty = excluded.counterparty",
                        params![
                            new_tx.id,
                            operation.user_id,
                            operation.op_type.as_str(),
                            operation.value,
                            operation.counterparty,
                            now
                        ],
                    )?;
                }

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Other(inner) if inner.is::<OutpointAlreadySpent>() => {
                    warn!(tx_id = %tx_id, reason = %inner, "input spent concurrently");
                    WalletError::UtxoSpent
                }
                e => WalletError::SavingData(e.to_string()),
            })
    }
}

#[async_trait]
impl TransactionsRepository for SqliteStorage {
    async fn has_input_sources(&self, source_tx_ids: &[String]) -> WalletResult<bool> {
        let unique: HashSet<String> = source_tx_ids.iter().cloned().collect();
        if unique.is_empty() {
            return Ok(true);
        }
        self.connection
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT EXISTS(SELECT 1 FROM tracked_transactions WHERE id = ?)")?;
                for id in &unique {
                    let exists: bool = stmt.query_row(params![id], |row| row.get(0))?;
                    if !exists {
                        return Ok(false);
                    }
                }
                Ok(true)
            })
            .await
            .map_err(|e| {
                WalletError::StorageError(format!("Failed to check input source transactions: {e}"))
            })
    }

    async fn find_by_ids(&self, tx_ids: &[String]) -> WalletResult<Vec<TxQueryResult>> {
        let tx_ids = tx_ids.to_vec();
        self.connection
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, raw_hex, beef_hex, merkle_path FROM tracked_transactions WHERE id = ?",
                )?;
                let mut results = Vec::new();
                for id in &tx_ids {
                    let row = stmt
                        .query_row(params![id], |row| {
                            Ok(TxQueryResult {
                                source_tx_id: row.get(0)?,
                                raw_hex: row.get(1)?,
                                beef_hex: row.get(2)?,
                                merkle_path: row.get(3)?,
                            })
                        })
                        .optional()?;
                    results.extend(row);
                }
                Ok(results)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to query transactions: {e}")))
    }

    async fn get(&self, tx_id: &str) -> WalletResult<Option<TrackedTransaction>> {
        let tx_id = tx_id.to_string();
        self.connection
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, tx_status, beef_hex, raw_hex, merkle_path, created_at, updated_at
                         FROM tracked_transactions WHERE id = ?",
                        params![tx_id],
                        row_to_transaction,
                    )
                    .optional()?)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to get transaction: {e}")))
    }

    async fn mark_mined(&self, tx_id: &str, merkle_path_json: &str) -> WalletResult<bool> {
        let tx_id = tx_id.to_string();
        let merkle_path_json = merkle_path_json.to_string();
        self.connection
            .call(move |conn| {
                let rows = conn.execute(
                    "UPDATE tracked_transactions SET tx_status = 'mined', merkle_path = ?, updated_at = ?
                     WHERE id = ?",
                    params![merkle_path_json, now_micros(), tx_id],
                )?;
                Ok(rows > 0)
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to mark transaction mined: {e}")))
    }
}

#[async_trait]
impl OperationsRepository for SqliteStorage {
    async fn save_all(&self, operations: &[Operation]) -> WalletResult<()> {
        let operations = operations.to_vec();
        self.connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO operations (tx_id, user_id, type, value, counterparty, created_at)
                         VALUES (?, ?, ?, ?, ?, ?)
                         ON CONFLICT(tx_id, user_id) DO UPDATE SET
                             type = excluded.type, value = excluded.value, counterparty = excluded.counterparty",
                    )?;
                    for op in &operations {
                        stmt.execute(params![
                            op.tx_id,
                            op.user_id,
                            op.op_type.as_str(),
                            op.value,
                            op.counterparty,
                            op.created_at.timestamp_micros()
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| WalletError::SavingData(e.to_string()))
    }

    async fn page_for_user(&self, user_id: &str, page: PageRequest) -> WalletResult<Page<Operation>> {
        let user_id = user_id.to_string();
        self.connection
            .call(move |conn| {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM operations WHERE user_id = ?",
                    params![user_id],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare(
                    "SELECT o.tx_id, o.user_id, o.type, o.value, o.counterparty, t.tx_status, o.created_at
                     FROM operations o JOIN tracked_transactions t ON t.id = o.tx_id
                     WHERE o.user_id = ?
                     ORDER BY o.created_at DESC, o.tx_id ASC
                     LIMIT ? OFFSET ?",
                )?;
                let items = stmt
                    .query_map(
                        params![user_id, page.size as i64, page.offset() as i64],
                        row_to_operation,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Page {
                    items,
                    page: page.page.max(1),
                    size: page.size,
                    total: total as u64,
                })
            })
            .await
            .map_err(|e| WalletError::StorageError(format!("Failed to page operations: {e}")))
    }
}
