//! Storage abstraction layer for the wallet core
//!
//! The flows depend only on the repository traits in [`storage_trait`]. The
//! SQLite backend is available with the `storage` feature; the models are
//! always compiled so that other backends and test doubles can share them.

#[cfg(feature = "storage")]
pub mod connection_options;
pub mod models;
#[cfg(feature = "storage")]
pub mod sqlite;
pub mod storage_trait;

#[cfg(feature = "storage")]
pub use connection_options::*;
pub use models::*;
#[cfg(feature = "storage")]
pub use sqlite::*;
pub use storage_trait::*;
