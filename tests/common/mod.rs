//! Shared fixtures for the integration tests
//!
//! Keys are small scalars so that addresses are stable across runs: key 1 is
//! the wallet user, key 2 funds deposits and key 3 is an outside party.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secp256k1::{PublicKey, SecretKey};
use serde_json::json;

use spv_wallet_core::broadcaster::{BroadcastError, BroadcastStatus, Broadcaster, TxInfo};
use spv_wallet_core::paymail::{
    Capabilities, P2pTransaction, P2pTransactionResponse, PaymailClient, PaymentDestination,
    PaymentOutput, PaymentRequest, PkiResponse, BRFC_BEEF_TRANSACTION, BRFC_P2P_PAYMENT_DESTINATION,
    BRFC_PKI,
};
use spv_wallet_core::primitives::bump::PathElement;
use spv_wallet_core::primitives::hash::hash160;
use spv_wallet_core::primitives::script::{address_from_public_key, p2pkh_locking_script};
use spv_wallet_core::primitives::verify::sign_p2pkh_input;
use spv_wallet_core::primitives::{decode_beef_hex, encode_beef_hex, MerklePath, Transaction, TxId, TxInput, TxOutput};
use spv_wallet_core::storage::{NewPaymail, SqliteStorage, User};
use spv_wallet_core::{Engine, EngineConfig, Outline, OutlineFormat, RequestContext, WalletResult};

pub const USER_KEY: u8 = 1;
pub const FUNDER_KEY: u8 = 2;
pub const OUTSIDER_KEY: u8 = 3;

pub fn secret(index: u8) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[31] = index;
    SecretKey::from_slice(&bytes).unwrap()
}

pub fn public_key(index: u8) -> [u8; 33] {
    PublicKey::from_secret_key_global(&secret(index)).serialize()
}

pub fn address(index: u8) -> String {
    address_from_public_key(&public_key(index))
}

pub fn locking_script(index: u8) -> Vec<u8> {
    p2pkh_locking_script(&hash160(&public_key(index)))
}

/// Mined transaction paying `satoshis` to the P2PKH of `index`
pub fn mined_coin(index: u8, satoshis: u64) -> Transaction {
    let mut tx = Transaction::new();
    tx.add_input(TxInput::new(TxId::from_wire_bytes([0; 32]), u32::MAX));
    tx.add_output(TxOutput::new(satoshis, locking_script(index)));
    let txid = tx.txid();
    tx.merkle_path = Some(MerklePath {
        block_height: 800_000,
        path: vec![vec![
            PathElement {
                offset: 0,
                hash: Some(*txid.wire_bytes()),
                txid: true,
                duplicate: false,
            },
            PathElement {
                offset: 1,
                hash: None,
                txid: false,
                duplicate: true,
            },
        ]],
    });
    tx
}

/// Signed spend of output 0 of `parent`, owned by `key`
pub fn spend(parent: Transaction, key: u8, outputs: Vec<TxOutput>) -> Transaction {
    let mut tx = Transaction::new();
    let mut input = TxInput::new(parent.txid(), 0);
    input.source_transaction = Some(Arc::new(parent));
    tx.add_input(input);
    for output in outputs {
        tx.add_output(output);
    }
    sign_p2pkh_input(&mut tx, 0, &secret(key)).unwrap();
    tx
}

/// Deposit of `satoshis` from the funder to the wallet user
pub fn deposit(satoshis: u64) -> Transaction {
    spend(
        mined_coin(FUNDER_KEY, satoshis + 1),
        FUNDER_KEY,
        vec![TxOutput::new(satoshis, locking_script(USER_KEY))],
    )
}

/// Sign every input of an outline with the user key
pub fn sign_outline(outline: &Outline) -> Outline {
    let mut tx = match outline.format {
        OutlineFormat::Beef => decode_beef_hex(&outline.hex).unwrap(),
        OutlineFormat::Raw => Transaction::from_hex(&outline.hex).unwrap(),
    };
    for index in 0..tx.inputs.len() {
        sign_p2pkh_input(&mut tx, index, &secret(USER_KEY)).unwrap();
    }
    Outline {
        hex: encode_beef_hex(&tx).unwrap(),
        format: OutlineFormat::Beef,
        annotations: outline.annotations.clone(),
    }
}

pub struct MockPaymailClient {
    pub destination_script: String,
    pub reference: String,
    pub supports_p2p: bool,
    pub destination_calls: AtomicUsize,
    pub submitted: Mutex<Vec<P2pTransaction>>,
}

impl MockPaymailClient {
    pub fn paying_to(script: &[u8]) -> Self {
        Self {
            destination_script: hex::encode(script),
            reference: "z0bac4ec-6f15-42de-9ef4-e60bfdabf4f7".to_string(),
            supports_p2p: true,
            destination_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Host advertising only PKI
    pub fn without_p2p() -> Self {
        Self {
            supports_p2p: false,
            ..Self::paying_to(&[])
        }
    }

    pub fn submitted(&self) -> Vec<P2pTransaction> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymailClient for MockPaymailClient {
    async fn get_capabilities(&self, _domain: &str) -> WalletResult<Capabilities> {
        let capabilities = if self.supports_p2p {
            json!({
                BRFC_P2P_PAYMENT_DESTINATION: "https://paymail.test/p2p-destination/{alias}@{domain.tld}",
                BRFC_BEEF_TRANSACTION: "https://paymail.test/beef/{alias}@{domain.tld}",
                BRFC_PKI: "https://paymail.test/id/{alias}@{domain.tld}",
            })
        } else {
            json!({ BRFC_PKI: "https://paymail.test/id/{alias}@{domain.tld}" })
        };
        Ok(serde_json::from_value(json!({
            "bsvalias": "1.0",
            "capabilities": capabilities,
        }))
        .unwrap())
    }

    async fn get_p2p_payment_destination(
        &self,
        _url: &str,
        _alias: &str,
        _domain: &str,
        request: &PaymentRequest,
    ) -> WalletResult<PaymentDestination> {
        self.destination_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PaymentDestination {
            outputs: vec![PaymentOutput {
                script: self.destination_script.clone(),
                satoshis: request.satoshis,
                address: None,
            }],
            reference: self.reference.clone(),
        })
    }

    async fn get_pki(&self, _url: &str, alias: &str, domain: &str) -> WalletResult<PkiResponse> {
        Ok(PkiResponse {
            bsvalias: "1.0".to_string(),
            handle: format!("{alias}@{domain}"),
            pubkey: hex::encode(public_key(OUTSIDER_KEY)),
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
            txid: String::new(),
            note: "accepted".to_string(),
        })
    }
}

pub struct MockBroadcaster {
    status: BroadcastStatus,
    merkle_path: Option<String>,
    rejection: Option<BroadcastError>,
    pub submitted: Mutex<Vec<String>>,
}

impl MockBroadcaster {
    pub fn seen() -> Self {
        Self {
            status: BroadcastStatus::SeenOnNetwork,
            merkle_path: None,
            rejection: None,
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn mined(merkle_path_json: String) -> Self {
        Self {
            status: BroadcastStatus::Mined,
            merkle_path: Some(merkle_path_json),
            ..Self::seen()
        }
    }

    pub fn rejecting(error: BroadcastError) -> Self {
        Self {
            rejection: Some(error),
            ..Self::seen()
        }
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn broadcast(&self, tx: &Transaction) -> Result<TxInfo, BroadcastError> {
        if let Some(error) = &self.rejection {
            return Err(error.clone());
        }
        let tx_id = tx.txid().to_hex();
        self.submitted.lock().unwrap().push(tx_id.clone());
        Ok(TxInfo {
            tx_id,
            status: self.status,
            merkle_path: self.merkle_path.clone(),
        })
    }
}

/// Route engine logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct TestWallet {
    pub engine: Engine,
    pub storage: Arc<SqliteStorage>,
    pub paymail_client: Arc<MockPaymailClient>,
    pub broadcaster: Arc<MockBroadcaster>,
    pub user: User,
}

impl TestWallet {
    pub async fn new() -> Self {
        Self::with_broadcaster(MockBroadcaster::seen()).await
    }

    pub async fn with_broadcaster(broadcaster: MockBroadcaster) -> Self {
        Self::with_mocks(MockPaymailClient::paying_to(&locking_script(OUTSIDER_KEY)), broadcaster).await
    }

    pub async fn with_mocks(paymail_client: MockPaymailClient, broadcaster: MockBroadcaster) -> Self {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        Self::assemble(storage, paymail_client, broadcaster).await
    }

    /// Wallet backed by a database file that other connections can open
    pub async fn on_disk(path: &Path) -> Self {
        let storage = SqliteStorage::new(path).await.unwrap();
        Self::assemble(
            storage,
            MockPaymailClient::paying_to(&locking_script(OUTSIDER_KEY)),
            MockBroadcaster::seen(),
        )
        .await
    }

    async fn assemble(storage: SqliteStorage, paymail_client: MockPaymailClient, broadcaster: MockBroadcaster) -> Self {
        init_tracing();
        let storage = Arc::new(storage);
        let paymail_client = Arc::new(paymail_client);
        let broadcaster = Arc::new(broadcaster);
        let engine = Engine::builder()
            .with_config(EngineConfig::new("https://arc.test"))
            .with_storage(storage.clone())
            .with_paymail_client(paymail_client.clone())
            .with_broadcaster(broadcaster.clone())
            .build()
            .unwrap();
        let user = engine
            .users()
            .create(&RequestContext::new(), &hex::encode(public_key(USER_KEY)))
            .await
            .unwrap();
        engine
            .users()
            .append_paymail(
                &RequestContext::new(),
                &user.id,
                NewPaymail {
                    alias: "sender".to_string(),
                    domain: "wallet.test".to_string(),
                    public_name: "Sender".to_string(),
                    avatar: String::new(),
                },
            )
            .await
            .unwrap();
        Self {
            engine,
            storage,
            paymail_client,
            broadcaster,
            user,
        }
    }

    /// Record an incoming deposit and return its txid
    pub async fn fund(&self, satoshis: u64) -> String {
        let tx = deposit(satoshis);
        let recorded = self
            .engine
            .record(
                &RequestContext::new(),
                &self.user.id,
                &encode_beef_hex(&tx).unwrap(),
                false,
            )
            .await
            .unwrap();
        recorded.tx_id
    }
}
