//! Transaction broadcasting
//!
//! The recording flow submits through the [`Broadcaster`] trait. [`ArcBroadcaster`]
//! talks to an ARC endpoint and is available with the `http` feature.

#[cfg(feature = "http")]
pub mod arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::primitives::Transaction;

#[cfg(feature = "http")]
pub use arc::ArcBroadcaster;

/// Status reported by the broadcaster for an accepted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastStatus {
    Received,
    Stored,
    AnnouncedToNetwork,
    SentToNetwork,
    AcceptedByNetwork,
    SeenOnNetwork,
    Mined,
    #[serde(other)]
    Unknown,
}

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub tx_id: String,
    pub status: BroadcastStatus,
    /// BUMP JSON when the broadcaster already knows the block
    pub merkle_path: Option<String>,
}

impl TxInfo {
    pub fn is_mined(&self) -> bool {
        self.status == BroadcastStatus::Mined
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("broadcaster rejected credentials (HTTP {0})")]
    Unauthorized(u16),
    #[error("broadcaster reported a generic error: {0}")]
    Generic(String),
    #[error("transaction is not in extended format")]
    NotExtendedFormat,
    #[error("fee too low (HTTP {0})")]
    FeeTooLow(u16),
    #[error("transaction unprocessable (HTTP {status}): {detail}")]
    Unprocessable { status: u16, detail: String },
    #[error("broadcaster unreachable: {0}")]
    Transport(String),
}

impl BroadcastError {
    /// Map an ARC HTTP status that is not 200
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            401 | 403 | 404 => Self::Unauthorized(status),
            409 => Self::Generic(detail.into()),
            460 => Self::NotExtendedFormat,
            465 | 473 => Self::FeeTooLow(status),
            _ => Self::Unprocessable {
                status,
                detail: detail.into(),
            },
        }
    }
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, tx: &Transaction) -> Result<TxInfo, BroadcastError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(BroadcastError::from_status(401, ""), BroadcastError::Unauthorized(401));
        assert_eq!(BroadcastError::from_status(460, ""), BroadcastError::NotExtendedFormat);
        assert_eq!(BroadcastError::from_status(473, ""), BroadcastError::FeeTooLow(473));
        assert!(matches!(
            BroadcastError::from_status(500, "boom"),
            BroadcastError::Unprocessable { status: 500, .. }
        ));
    }

    #[test]
    fn test_unknown_status_deserializes() {
        let status: BroadcastStatus = serde_json::from_str("\"DOUBLE_SPEND_ATTEMPTED\"").unwrap();
        assert_eq!(status, BroadcastStatus::Unknown);
        let mined: BroadcastStatus = serde_json::from_str("\"MINED\"").unwrap();
        assert_eq!(mined, BroadcastStatus::Mined);
    }
}
