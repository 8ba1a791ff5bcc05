//! SQLite connection options applied when a store is opened

use tokio_rusqlite::Connection;

use crate::errors::{WalletError, WalletResult};

/// Pragmas set on every connection before the schema is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnectionOptions {
    /// WAL lets readers proceed while a writer holds the lock
    pub enable_wal_mode: bool,
    /// 0=OFF, 1=NORMAL, 2=FULL
    pub synchronous_mode: u8,
    pub busy_timeout_ms: u32,
    /// Required for the spending_tx_id reference to be enforced
    pub enforce_foreign_keys: bool,
}

impl Default for SqliteConnectionOptions {
    fn default() -> Self {
        Self::durable()
    }
}

impl SqliteConnectionOptions {
    /// Settings for file databases holding real funds
    pub fn durable() -> Self {
        Self {
            enable_wal_mode: true,
            synchronous_mode: 2,
            busy_timeout_ms: 8000,
            enforce_foreign_keys: true,
        }
    }

    /// Settings for throwaway in-memory databases
    pub fn in_memory() -> Self {
        Self {
            enable_wal_mode: false,
            synchronous_mode: 0,
            busy_timeout_ms: 1000,
            enforce_foreign_keys: true,
        }
    }

    pub async fn apply_to_connection(&self, connection: &Connection) -> WalletResult<()> {
        if self.enable_wal_mode {
            connection
                .call(|conn| {
                    conn.pragma_update(None, "journal_mode", "WAL")?;
                    Ok(())
                })
                .await
                .map_err(|e| WalletError::StorageError(format!("Failed to enable WAL mode: {e}")))?;
        }

        let options = self.clone();
        connection
            .call(move |conn| {
                conn.pragma_update(None, "synchronous", options.synchronous_mode)?;
                conn.pragma_update(None, "busy_timeout", options.busy_timeout_ms)?;
                conn.pragma_update(None, "foreign_keys", options.enforce_foreign_keys)?;
                Ok(())
            })
            .await
            .map_err(|e| {
                WalletError::StorageError(format!("Failed to apply connection options: {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let connection = Connection::open_in_memory().await.unwrap();
        SqliteConnectionOptions::in_memory()
            .apply_to_connection(&connection)
            .await
            .unwrap();

        let enabled: i64 = connection
            .call(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
