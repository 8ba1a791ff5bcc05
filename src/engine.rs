//! Engine wiring
//!
//! [`EngineBuilder`] collects the configuration and every external capability
//! (storage, paymail client, broadcaster, script verifier) and refuses to build
//! while one is missing.

use std::sync::Arc;

use tracing::info;

use crate::broadcaster::Broadcaster;
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::paymail::{PaymailClient, PaymailService};
use crate::primitives::{P2pkhScriptVerifier, ScriptVerifier};
use crate::storage::{
    AddressesRepository, OperationsRepository, PaymailsRepository, TrackedOutputsRepository,
    TransactionsRepository, UsersRepository, UtxosRepository, WalletStorage,
};
use crate::transaction::{
    BeefService, Outline, OutlinesService, RecordService, RecordedTransaction, TransactionSpec,
};
use crate::users::UsersService;

/// One backend viewed through each repository trait
#[derive(Clone)]
struct StorageHandles {
    users: Arc<dyn UsersRepository>,
    paymails: Arc<dyn PaymailsRepository>,
    addresses: Arc<dyn AddressesRepository>,
    utxos: Arc<dyn UtxosRepository>,
    outputs: Arc<dyn TrackedOutputsRepository>,
    transactions: Arc<dyn TransactionsRepository>,
    operations: Arc<dyn OperationsRepository>,
}

impl StorageHandles {
    fn from_storage<S: WalletStorage + 'static>(storage: Arc<S>) -> Self {
        Self {
            users: storage.clone(),
            paymails: storage.clone(),
            addresses: storage.clone(),
            utxos: storage.clone(),
            outputs: storage.clone(),
            transactions: storage.clone(),
            operations: storage,
        }
    }
}

#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    storage: Option<StorageHandles>,
    paymail_client: Option<Arc<dyn PaymailClient>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    verifier: Option<Arc<dyn ScriptVerifier>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_storage<S: WalletStorage + 'static>(mut self, storage: Arc<S>) -> Self {
        self.storage = Some(StorageHandles::from_storage(storage));
        self
    }

    pub fn with_paymail_client(mut self, client: Arc<dyn PaymailClient>) -> Self {
        self.paymail_client = Some(client);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Defaults to P2PKH verification
    pub fn with_script_verifier(mut self, verifier: Arc<dyn ScriptVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// reqwest paymail client and ARC broadcaster built from the config
    #[cfg(feature = "http")]
    pub fn with_http_capabilities(mut self) -> WalletResult<Self> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| WalletError::InvalidConfig("config is required".to_string()))?;
        let client = crate::paymail::HttpPaymailClient::new(config.paymail_http_timeout())?;
        let broadcaster = crate::broadcaster::ArcBroadcaster::new(
            config.broadcaster_endpoint.clone(),
            config.broadcaster_timeout(),
        )?
        .with_token(config.broadcaster_token.clone())
        .with_callback(config.broadcaster_callback_url.clone(), None);
        self.paymail_client = Some(Arc::new(client));
        self.broadcaster = Some(Arc::new(broadcaster));
        Ok(self)
    }

    /// SQLite storage at `database_path`, in memory when unset
    #[cfg(feature = "storage")]
    pub async fn with_sqlite_storage(self) -> WalletResult<Self> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| WalletError::InvalidConfig("config is required".to_string()))?;
        let storage = match &config.database_path {
            Some(path) => {
                crate::storage::SqliteStorage::new_with_options(
                    path,
                    crate::storage::SqliteConnectionOptions::durable(),
                    config.fee_rate,
                )
                .await?
            }
            None => crate::storage::SqliteStorage::new_in_memory_with_fee_rate(config.fee_rate).await?,
        };
        Ok(self.with_storage(Arc::new(storage)))
    }

    pub fn build(self) -> WalletResult<Engine> {
        let missing = |name: &str| WalletError::InvalidConfig(format!("{name} is required"));
        let config = self.config.ok_or_else(|| missing("config"))?;
        config.validate()?;
        let storage = self.storage.ok_or_else(|| missing("storage"))?;
        let paymail_client = self.paymail_client.ok_or_else(|| missing("paymail client"))?;
        let broadcaster = self.broadcaster.ok_or_else(|| missing("broadcaster"))?;
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(P2pkhScriptVerifier::new()));

        let paymail = Arc::new(PaymailService::new(
            paymail_client,
            config.paymail_cache_ttl(),
            config.paymail_http_timeout(),
        ));
        let beef = Arc::new(BeefService::new(storage.transactions.clone(), verifier.clone()));
        let outlines = OutlinesService::new(
            paymail.clone(),
            storage.paymails.clone(),
            storage.utxos.clone(),
            beef.clone(),
            config.fee_rate,
        );
        let record = RecordService::new(
            storage.outputs.clone(),
            storage.addresses.clone(),
            storage.transactions.clone(),
            beef.clone(),
            broadcaster,
            paymail.clone(),
            verifier,
            config.broadcaster_timeout(),
        );
        let users = UsersService::new(storage.users.clone(), storage.operations.clone());

        info!(
            fee_sats = config.fee_rate.sats,
            fee_per_bytes = config.fee_rate.per_bytes,
            broadcaster = %config.broadcaster_endpoint,
            "wallet engine ready"
        );
        Ok(Engine {
            config,
            paymail,
            beef,
            outlines,
            record,
            users,
        })
    }
}

pub struct Engine {
    config: EngineConfig,
    paymail: Arc<PaymailService>,
    beef: Arc<BeefService>,
    outlines: OutlinesService,
    record: RecordService,
    users: UsersService,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine with SQLite storage, reqwest paymail client and ARC broadcaster
    #[cfg(all(feature = "http", feature = "storage"))]
    pub async fn from_config(config: EngineConfig) -> WalletResult<Self> {
        EngineBuilder::new()
            .with_config(config)
            .with_http_capabilities()?
            .with_sqlite_storage()
            .await?
            .build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn users(&self) -> &UsersService {
        &self.users
    }

    pub fn paymail(&self) -> &PaymailService {
        &self.paymail
    }

    pub fn beef(&self) -> &BeefService {
        &self.beef
    }

    pub async fn create_outline(&self, ctx: &RequestContext, spec: Option<&TransactionSpec>) -> WalletResult<Outline> {
        self.outlines.create_beef(ctx, spec).await
    }

    pub async fn create_raw_outline(
        &self,
        ctx: &RequestContext,
        spec: Option<&TransactionSpec>,
    ) -> WalletResult<Outline> {
        self.outlines.create_raw_tx(ctx, spec).await
    }

    pub async fn record(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        signed_beef: &str,
        verify_scripts: bool,
    ) -> WalletResult<RecordedTransaction> {
        self.record.record(ctx, user_id, signed_beef, verify_scripts).await
    }

    pub async fn record_outline(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        outline: &Outline,
    ) -> WalletResult<RecordedTransaction> {
        self.record.record_outline(ctx, user_id, outline).await
    }
}
