//! reqwest-backed paymail client with DNS SRV host discovery

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::{WalletError, WalletResult};

use super::client::{
    fill_template, Capabilities, P2pTransaction, P2pTransactionResponse, PaymailClient,
    PaymentDestination, PaymentRequest, PkiResponse, DEFAULT_PORT, DEFAULT_PROTOCOL,
    DEFAULT_SERVICE_NAME,
};

/// Host and port serving the paymail endpoints of a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymailHost {
    pub host: String,
    pub port: u16,
}

impl PaymailHost {
    pub fn capabilities_url(&self) -> String {
        if self.port == DEFAULT_PORT {
            format!("https://{}/.well-known/{DEFAULT_SERVICE_NAME}", self.host)
        } else {
            format!(
                "https://{}:{}/.well-known/{DEFAULT_SERVICE_NAME}",
                self.host, self.port
            )
        }
    }
}

/// Production [`PaymailClient`]
pub struct HttpPaymailClient {
    client: Client,
    resolver: Option<TokioAsyncResolver>,
}

impl HttpPaymailClient {
    pub fn new(timeout: Duration) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("spv-wallet-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WalletError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;

        // Without a usable system resolver every domain falls back to itself:443
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => Some(resolver),
            Err(e) => {
                warn!(error = %e, "system DNS configuration unavailable, SRV discovery disabled");
                None
            }
        };

        Ok(Self { client, resolver })
    }

    /// Resolve `_bsvalias._tcp.<domain>`, falling back to `<domain>:443`
    pub async fn resolve_host(&self, domain: &str) -> PaymailHost {
        let fallback = PaymailHost {
            host: domain.to_string(),
            port: DEFAULT_PORT,
        };
        let Some(resolver) = &self.resolver else {
            return fallback;
        };

        let name = format!("_{DEFAULT_SERVICE_NAME}._{DEFAULT_PROTOCOL}.{domain}.");
        match resolver.srv_lookup(name.as_str()).await {
            Ok(lookup) => {
                let best = lookup
                    .iter()
                    .min_by_key(|srv| (srv.priority(), std::cmp::Reverse(srv.weight())));
                match best {
                    Some(srv) => {
                        let target = srv.target().to_utf8();
                        let host = PaymailHost {
                            host: target.trim_end_matches('.').to_string(),
                            port: srv.port(),
                        };
                        debug!(domain = %domain, host = %host.host, port = host.port, "paymail SRV record found");
                        host
                    }
                    None => fallback,
                }
            }
            Err(e) => {
                debug!(domain = %domain, error = %e, "no paymail SRV record, using domain");
                fallback
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> WalletResult<T> {
        if !response.status().is_success() {
            return Err(WalletError::PaymailHostResponseError(format!(
                "{what} returned HTTP {}",
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| WalletError::PaymailHostResponseError(format!("Malformed {what} response: {e}")))
    }
}

#[async_trait]
impl PaymailClient for HttpPaymailClient {
    async fn get_capabilities(&self, domain: &str) -> WalletResult<Capabilities> {
        let url = self.resolve_host(domain).await.capabilities_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::PaymailHostResponseError(format!("GET {url} failed: {e}")))?;
        Self::read_json(response, "capabilities").await
    }

    async fn get_p2p_payment_destination(
        &self,
        url: &str,
        alias: &str,
        domain: &str,
        request: &PaymentRequest,
    ) -> WalletResult<PaymentDestination> {
        let url = fill_template(url, alias, domain);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| WalletError::PaymailHostResponseError(format!("POST {url} failed: {e}")))?;
        Self::read_json(response, "payment destination").await
    }

    async fn get_pki(&self, url: &str, alias: &str, domain: &str) -> WalletResult<PkiResponse> {
        let url = fill_template(url, alias, domain);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WalletError::PaymailHostResponseError(format!("GET {url} failed: {e}")))?;
        Self::read_json(response, "pki").await
    }

    async fn send_p2p_transaction(
        &self,
        url: &str,
        alias: &str,
        domain: &str,
        transaction: &P2pTransaction,
    ) -> WalletResult<P2pTransactionResponse> {
        let url = fill_template(url, alias, domain);
        let response = self
            .client
            .post(&url)
            .json(transaction)
            .send()
            .await
            .map_err(|e| WalletError::PaymailHostResponseError(format!("POST {url} failed: {e}")))?;
        Self::read_json(response, "p2p transaction").await
    }
}
