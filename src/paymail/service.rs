//! Paymail resolution with capability caching
//!
//! Capability documents are cached per domain for a fixed TTL. The cache is a
//! plain `RwLock<HashMap>`; a poisoned lock only disables caching, it never
//! fails a request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::primitives::{encode_beef_hex, Transaction};

use super::address::PaymailAddress;
use super::client::{
    Capabilities, P2pMetadata, P2pTransaction, P2pTransactionResponse, PayloadFormat,
    PaymailClient, PaymentDestination, PaymentRequest, PkiResponse, BRFC_PKI, BRFC_PKI_ALTERNATE,
};

struct CachedCapabilities {
    fetched_at: Instant,
    capabilities: Capabilities,
}

/// Paymail operations used by the transaction flows
pub struct PaymailService {
    client: Arc<dyn PaymailClient>,
    cache: RwLock<HashMap<String, CachedCapabilities>>,
    cache_ttl: Duration,
    request_timeout: Duration,
}

impl PaymailService {
    pub fn new(client: Arc<dyn PaymailClient>, cache_ttl: Duration, request_timeout: Duration) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
            request_timeout,
        }
    }

    /// Run one client call under the request deadline and the per-call timeout
    async fn bounded<T, F>(&self, ctx: &RequestContext, step: &str, call: F) -> WalletResult<T>
    where
        F: std::future::Future<Output = WalletResult<T>>,
    {
        ctx.check(step)?;
        match tokio::time::timeout(ctx.bounded(self.request_timeout), call).await {
            Ok(result) => result,
            Err(_) if ctx.is_cancelled() => Err(WalletError::RequestCancelled(step.to_string())),
            Err(_) => Err(WalletError::PaymailHostResponseError(format!("{step} timed out"))),
        }
    }

    fn cached(&self, domain: &str) -> Option<Capabilities> {
        let cache = self.cache.read().ok()?;
        cache
            .get(domain)
            .filter(|entry| entry.fetched_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.capabilities.clone())
    }

    fn store(&self, domain: &str, capabilities: &Capabilities) {
        match self.cache.write() {
            Ok(mut cache) => {
                cache.retain(|_, entry| entry.fetched_at.elapsed() < self.cache_ttl);
                cache.insert(
                    domain.to_string(),
                    CachedCapabilities {
                        fetched_at: Instant::now(),
                        capabilities: capabilities.clone(),
                    },
                );
            }
            Err(e) => warn!(domain = %domain, error = %e, "failed to cache paymail capabilities"),
        }
    }

    pub async fn capabilities(&self, ctx: &RequestContext, domain: &str) -> WalletResult<Capabilities> {
        if let Some(capabilities) = self.cached(domain) {
            debug!(domain = %domain, "paymail capabilities cache hit");
            return Ok(capabilities);
        }
        debug!(domain = %domain, "paymail capabilities cache miss");

        let capabilities = self
            .bounded(ctx, "paymail capabilities", self.client.get_capabilities(domain))
            .await?;
        self.store(domain, &capabilities);
        Ok(capabilities)
    }

    /// Ask the receiver's host where to pay `satoshis`
    ///
    /// The returned outputs always sum to the requested amount and carry
    /// decodable locking scripts.
    pub async fn get_p2p_destinations(
        &self,
        ctx: &RequestContext,
        receiver: &PaymailAddress,
        satoshis: u64,
    ) -> WalletResult<PaymentDestination> {
        let capabilities = self.capabilities(ctx, &receiver.domain).await?;
        let p2p = capabilities
            .p2p()
            .ok_or_else(|| WalletError::PaymailHostNotSupportingP2P(receiver.domain.clone()))?;

        let destination = self
            .bounded(
                ctx,
                "paymail destination",
                self.client.get_p2p_payment_destination(
                    &p2p.destination_url,
                    &receiver.alias,
                    &receiver.domain,
                    &PaymentRequest { satoshis },
                ),
            )
            .await?;

        let total = destination.total_satoshis().ok_or_else(|| {
            WalletError::PaymailHostInvalidResponse(format!(
                "{receiver} returned outputs overflowing the satoshi range"
            ))
        })?;
        if total != satoshis {
            return Err(WalletError::PaymailHostInvalidResponse(format!(
                "{receiver} returned outputs worth {total} satoshis, requested {satoshis}"
            )));
        }
        if let Some(bad) = destination.outputs.iter().find(|o| hex::decode(&o.script).is_err()) {
            return Err(WalletError::PaymailHostInvalidResponse(format!(
                "{receiver} returned invalid locking script {}",
                bad.script
            )));
        }

        info!(
            receiver = %receiver,
            outputs = destination.outputs.len(),
            reference = %destination.reference,
            "resolved paymail destination"
        );
        Ok(destination)
    }

    /// Receiver's identity key
    pub async fn get_pki(&self, ctx: &RequestContext, paymail: &PaymailAddress) -> WalletResult<PkiResponse> {
        let capabilities = self.capabilities(ctx, &paymail.domain).await?;
        let url = capabilities
            .get_string(BRFC_PKI, Some(BRFC_PKI_ALTERNATE))
            .ok_or_else(|| {
                WalletError::PaymailHostResponseError(format!(
                    "{} does not advertise the pki capability",
                    paymail.domain
                ))
            })?
            .to_string();

        let pki = self
            .bounded(
                ctx,
                "paymail pki",
                self.client.get_pki(&url, &paymail.alias, &paymail.domain),
            )
            .await?;

        if !pki.handle.eq_ignore_ascii_case(&paymail.address()) {
            return Err(WalletError::PaymailHostInvalidResponse(format!(
                "pki handle {} does not match {paymail}",
                pki.handle
            )));
        }
        Ok(pki)
    }

    /// Deliver a broadcast transaction to the receiver's host
    pub async fn notify(
        &self,
        ctx: &RequestContext,
        receiver: &PaymailAddress,
        sender: &str,
        reference: &str,
        tx: &Transaction,
    ) -> WalletResult<P2pTransactionResponse> {
        let capabilities = self.capabilities(ctx, &receiver.domain).await?;
        let p2p = capabilities
            .p2p()
            .ok_or_else(|| WalletError::PaymailHostNotSupportingP2P(receiver.domain.clone()))?;

        let (hex, beef) = match p2p.format {
            PayloadFormat::Beef => {
                let beef = encode_beef_hex(tx).map_err(|e| WalletError::Unexpected(e.to_string()))?;
                (None, Some(beef))
            }
            PayloadFormat::Basic => (Some(tx.to_hex()), None),
        };
        let payload = P2pTransaction {
            hex,
            beef,
            reference: reference.to_string(),
            metadata: P2pMetadata {
                sender: sender.to_string(),
                note: None,
            },
        };

        self.bounded(
            ctx,
            "paymail notification",
            self.client.send_p2p_transaction(
                &p2p.submit_tx_url,
                &receiver.alias,
                &receiver.domain,
                &payload,
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paymail::client::{
        PaymentOutput, BRFC_BEEF_TRANSACTION, BRFC_P2P_PAYMENT_DESTINATION,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockClient {
        capability_calls: AtomicUsize,
        outputs: Vec<PaymentOutput>,
        submitted: Mutex<Vec<P2pTransaction>>,
    }

    impl MockClient {
        fn paying(outputs: Vec<PaymentOutput>) -> Self {
            Self {
                capability_calls: AtomicUsize::new(0),
                outputs,
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PaymailClient for MockClient {
        async fn get_capabilities(&self, _domain: &str) -> WalletResult<Capabilities> {
            self.capability_calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::from_value(json!({
                "bsvalias": "1.0",
                "capabilities": {
                    BRFC_P2P_PAYMENT_DESTINATION: "https://h/dest/{alias}@{domain.tld}",
                    BRFC_BEEF_TRANSACTION: "https://h/beef/{alias}@{domain.tld}",
                    BRFC_PKI: "https://h/id/{alias}@{domain.tld}",
                }
            }))
            .unwrap())
        }

        async fn get_p2p_payment_destination(
            &self,
            _url: &str,
            _alias: &str,
            _domain: &str,
            _request: &PaymentRequest,
        ) -> WalletResult<PaymentDestination> {
            Ok(PaymentDestination {
                outputs: self.outputs.clone(),
                reference: "ref-1".to_string(),
            })
        }

        async fn get_pki(&self, _url: &str, alias: &str, domain: &str) -> WalletResult<PkiResponse> {
            Ok(PkiResponse {
                bsvalias: "1.0".to_string(),
                handle: format!("{alias}@{domain}"),
                pubkey: "02aa".to_string(),
            })
        }

        async fn send_p2p_transaction(
            &self,
            _url: &str,
            _alias: &str,
            _domain: &str,
            transaction: &P2pTransaction,
        ) -> WalletResult<P2pTransactionResponse> {
            self.submitted.lock().unwrap().push(transaction.clone());
            Ok(P2pTransactionResponse {
                txid: "abc".to_string(),
                note: String::new(),
            })
        }
    }

    fn output(satoshis: u64) -> PaymentOutput {
        PaymentOutput {
            script: "76a914000000000000000000000000000000000000000088ac".to_string(),
            satoshis,
            address: None,
        }
    }

    fn service(client: Arc<MockClient>) -> PaymailService {
        PaymailService::new(client, Duration::from_secs(120), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_capabilities_are_cached() {
        let client = Arc::new(MockClient::paying(vec![output(10)]));
        let service = service(client.clone());
        let ctx = RequestContext::new();
        let receiver = PaymailAddress::parse("bob@example.com").unwrap();

        service.get_p2p_destinations(&ctx, &receiver, 10).await.unwrap();
        service.get_p2p_destinations(&ctx, &receiver, 10).await.unwrap();
        assert_eq!(client.capability_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_split_destination_sums_to_request() {
        let client = Arc::new(MockClient::paying(vec![output(4), output(6)]));
        let destination = service(client)
            .get_p2p_destinations(
                &RequestContext::new(),
                &PaymailAddress::parse("bob@example.com").unwrap(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(destination.outputs.len(), 2);
        assert_eq!(destination.reference, "ref-1");
    }

    #[tokio::test]
    async fn test_sum_mismatch_is_invalid_response() {
        let client = Arc::new(MockClient::paying(vec![output(9)]));
        let result = service(client)
            .get_p2p_destinations(
                &RequestContext::new(),
                &PaymailAddress::parse("bob@example.com").unwrap(),
                10,
            )
            .await;
        assert!(matches!(result, Err(WalletError::PaymailHostInvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_overflowing_destination_is_invalid_response() {
        // Wraps to exactly the requested amount without checked addition
        let client = Arc::new(MockClient::paying(vec![output(u64::MAX), output(1001)]));
        let result = service(client)
            .get_p2p_destinations(
                &RequestContext::new(),
                &PaymailAddress::parse("bob@example.com").unwrap(),
                1000,
            )
            .await;
        assert!(matches!(result, Err(WalletError::PaymailHostInvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_cancelled_context_skips_network() {
        let client = Arc::new(MockClient::paying(vec![output(10)]));
        let service = service(client.clone());
        let (ctx, handle) = RequestContext::create_pair();
        handle.cancel();

        let result = service.capabilities(&ctx, "example.com").await;
        assert!(matches!(result, Err(WalletError::RequestCancelled(_))));
        assert_eq!(client.capability_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notify_sends_beef_when_supported() {
        let client = Arc::new(MockClient::paying(vec![]));
        let service = service(client.clone());
        let mut tx = Transaction::new();
        tx.add_output(crate::primitives::TxOutput::new(1, vec![0x51]));

        service
            .notify(
                &RequestContext::new(),
                &PaymailAddress::parse("bob@example.com").unwrap(),
                "alice@example.com",
                "ref-1",
                &tx,
            )
            .await
            .unwrap();

        let submitted = client.submitted.lock().unwrap();
        assert!(submitted[0].beef.is_some());
        assert!(submitted[0].hex.is_none());
        assert_eq!(submitted[0].metadata.sender, "alice@example.com");
    }

    #[tokio::test]
    async fn test_pki_handle_checked() {
        let client = Arc::new(MockClient::paying(vec![]));
        let pki = service(client)
            .get_pki(
                &RequestContext::new(),
                &PaymailAddress::parse("bob@example.com").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(pki.pubkey, "02aa");
    }
}
