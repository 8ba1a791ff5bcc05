//! ARC broadcaster client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{WalletError, WalletResult};
use crate::primitives::Transaction;

use super::{BroadcastError, BroadcastStatus, Broadcaster, TxInfo};

#[derive(Debug, Serialize)]
struct SubmitRequest {
    #[serde(rename = "rawTx")]
    raw_tx: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    txid: String,
    tx_status: BroadcastStatus,
    #[serde(default)]
    merkle_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

pub struct ArcBroadcaster {
    client: Client,
    endpoint: String,
    token: Option<String>,
    callback_url: Option<String>,
    callback_token: Option<String>,
}

impl ArcBroadcaster {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::InvalidConfig(format!("Failed to create ARC client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: None,
            callback_url: None,
            callback_token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_callback(mut self, url: Option<String>, token: Option<String>) -> Self {
        self.callback_url = url;
        self.callback_token = token;
        self
    }

    /// EF when every input carries its source output, raw otherwise
    fn payload(tx: &Transaction) -> String {
        match tx.to_ef_bytes() {
            Some(ef) => hex::encode(ef),
            None => tx.to_hex(),
        }
    }
}

#[async_trait]
impl Broadcaster for ArcBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<TxInfo, BroadcastError> {
        let url = format!("{}/v1/tx", self.endpoint);
        let mut request = self.client.post(&url).json(&SubmitRequest {
            raw_tx: Self::payload(tx),
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(callback_url) = &self.callback_url {
            request = request.header("X-CallbackUrl", callback_url);
        }
        if let Some(callback_token) = &self.callback_token {
            request = request.header("X-CallbackToken", callback_token);
        }

        debug!(tx_id = %tx.txid(), url = %url, "submitting transaction to ARC");
        let response = request
            .send()
            .await
            .map_err(|e| BroadcastError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            return Err(BroadcastError::from_status(
                status,
                format!("{} {}", body.title, body.detail).trim().to_string(),
            ));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| BroadcastError::Transport(format!("Malformed ARC response: {e}")))?;
        info!(tx_id = %body.txid, status = ?body.tx_status, "transaction accepted by ARC");

        Ok(TxInfo {
            tx_id: body.txid,
            status: body.tx_status,
            merkle_path: body.merkle_path.filter(|p| !p.is_empty()),
        })
    }
}
