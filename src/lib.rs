//! Custodial BSV wallet core
//!
//! This crate holds the transaction engine of a custodial wallet: it builds
//! unsigned transaction outlines from high level output specifications, funds
//! them from the user's UTXOs, and records signed transactions by debiting and
//! crediting the tracked outputs of the users involved.
//!
//! ## Features
//!
//! - `storage`: SQLite persistence of users, UTXOs, tracked transactions and operations
//! - `http`: reqwest paymail client with SRV discovery and an ARC broadcaster
//!
//! Both are enabled by default. Without them the engine can still be built
//! from any implementation of the repository, [`PaymailClient`] and
//! [`Broadcaster`] traits.
//!
//! ```toml
//! [dependencies]
//! spv_wallet_core = { version = "0.1", default-features = false, features = ["storage"] }
//! ```

pub mod broadcaster;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod paymail;
pub mod primitives;
pub mod storage;
pub mod transaction;
pub mod users;

pub use broadcaster::{BroadcastError, BroadcastStatus, Broadcaster, TxInfo};
pub use config::{EngineConfig, FeeRate};
pub use context::{CancellationHandle, RequestContext};
pub use engine::{Engine, EngineBuilder};
pub use errors::*;
pub use paymail::{PaymailAddress, PaymailClient, PaymailService};
pub use transaction::{
    Annotations, Outline, OutlineFormat, OutputSpec, RecordedTransaction, TransactionSpec,
};
pub use users::UsersService;

#[cfg(feature = "storage")]
pub use storage::SqliteStorage;
