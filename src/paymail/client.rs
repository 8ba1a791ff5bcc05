//! Paymail wire types and the client trait
//!
//! [`PaymailClient`] performs single protocol round-trips and nothing else.
//! Caching, capability checks and response validation live in
//! [`PaymailService`](super::PaymailService).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::WalletResult;

pub const BRFC_P2P_PAYMENT_DESTINATION: &str = "2a40af698840";
pub const BRFC_P2P_TRANSACTIONS: &str = "5f1323cddf31";
pub const BRFC_BEEF_TRANSACTION: &str = "5c55a7fdb7bb";
pub const BRFC_PKI: &str = "pki";
pub const BRFC_PKI_ALTERNATE: &str = "0c4339ef99c2";

pub const DEFAULT_SERVICE_NAME: &str = "bsvalias";
pub const DEFAULT_PROTOCOL: &str = "tcp";
pub const DEFAULT_PORT: u16 = 443;

/// `/.well-known/bsvalias` document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub bsvalias: String,
    #[serde(default)]
    pub capabilities: HashMap<String, serde_json::Value>,
}

impl Capabilities {
    /// URL (or other string value) of a capability, trying `alternate` second
    pub fn get_string(&self, brfc: &str, alternate: Option<&str>) -> Option<&str> {
        let lookup = |key: &str| {
            self.capabilities
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        };
        lookup(brfc).or_else(|| alternate.and_then(lookup))
    }

    pub fn has(&self, brfc: &str, alternate: Option<&str>) -> bool {
        self.capabilities.contains_key(brfc)
            || alternate.is_some_and(|alt| self.capabilities.contains_key(alt))
    }

    /// P2P endpoints, preferring BEEF submission when advertised
    pub fn p2p(&self) -> Option<P2pCapabilities> {
        let destination_url = self.get_string(BRFC_P2P_PAYMENT_DESTINATION, None)?;
        let (submit_tx_url, format) = match self.get_string(BRFC_BEEF_TRANSACTION, None) {
            Some(url) => (url, PayloadFormat::Beef),
            None => (
                self.get_string(BRFC_P2P_TRANSACTIONS, None)?,
                PayloadFormat::Basic,
            ),
        };
        Some(P2pCapabilities {
            destination_url: destination_url.to_string(),
            submit_tx_url: submit_tx_url.to_string(),
            format,
        })
    }
}

/// Encoding used when submitting a transaction to a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    Basic,
    Beef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pCapabilities {
    pub destination_url: String,
    pub submit_tx_url: String,
    pub format: PayloadFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub satoshis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutput {
    /// Locking script, hex
    pub script: String,
    pub satoshis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDestination {
    pub outputs: Vec<PaymentOutput>,
    pub reference: String,
}

impl PaymentDestination {
    /// `None` when the outputs overflow a satoshi amount
    pub fn total_satoshis(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, o| total.checked_add(o.satoshis))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkiResponse {
    pub bsvalias: String,
    pub handle: String,
    pub pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pMetadata {
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Body of a P2P transaction submission; exactly one of `hex`/`beef` is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pTransaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beef: Option<String>,
    pub reference: String,
    pub metadata: P2pMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pTransactionResponse {
    pub txid: String,
    #[serde(default)]
    pub note: String,
}

/// Substitute `{alias}` and `{domain.tld}` in a capability URL template
pub fn fill_template(template: &str, alias: &str, domain: &str) -> String {
    template
        .replace("{alias}", alias)
        .replace("{domain.tld}", domain)
}

/// One protocol round-trip per method
#[async_trait]
pub trait PaymailClient: Send + Sync {
    /// Discover the host for `domain` and fetch its capability document
    async fn get_capabilities(&self, domain: &str) -> WalletResult<Capabilities>;

    async fn get_p2p_payment_destination(
        &self,
        url: &str,
        alias: &str,
        domain: &str,
        request: &PaymentRequest,
    ) -> WalletResult<PaymentDestination>;

    async fn get_pki(&self, url: &str, alias: &str, domain: &str) -> WalletResult<PkiResponse>;

    async fn send_p2p_transaction(
        &self,
        url: &str,
        alias: &str,
        domain: &str,
        transaction: &P2pTransaction,
    ) -> WalletResult<P2pTransactionResponse>;
}
