//! Recording signed transactions
//!
//! Recording validates a signed transaction, debits the owners of its inputs,
//! credits tracked addresses among its outputs, broadcasts it and persists the
//! whole effect in one write. Everything before the broadcast is local; a
//! failure there leaves no trace.

pub mod data;
pub mod flow;
pub mod paymail_info;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::paymail::{PaymailAddress, PaymailService};
use crate::primitives::{decode_beef_hex, encode_beef_hex, ScriptVerifier, Transaction};
use crate::storage::{
    AddressesRepository, NewOperation, TrackedOutputsRepository, TransactionsRepository, TxStatus,
};
use crate::transaction::annotations::Annotations;
use crate::transaction::outlines::{Outline, OutlineFormat};
use crate::transaction::source_tx::BeefService;

use flow::TxFlow;
use paymail_info::PaymailInfo;

pub use data::extract_data;
pub use flow::P2PKH_ESTIMATED_INPUT_SIZE;

/// Outcome of a successful recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedTransaction {
    pub tx_id: String,
    pub status: TxStatus,
    #[serde(skip)]
    pub operations: Vec<NewOperation>,
}

pub struct RecordService {
    outputs: Arc<dyn TrackedOutputsRepository>,
    addresses: Arc<dyn AddressesRepository>,
    transactions: Arc<dyn TransactionsRepository>,
    beef: Arc<BeefService>,
    broadcaster: Arc<dyn Broadcaster>,
    paymail: Arc<PaymailService>,
    verifier: Arc<dyn ScriptVerifier>,
    broadcast_timeout: Duration,
}

impl RecordService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        outputs: Arc<dyn TrackedOutputsRepository>,
        addresses: Arc<dyn AddressesRepository>,
        transactions: Arc<dyn TransactionsRepository>,
        beef: Arc<BeefService>,
        broadcaster: Arc<dyn Broadcaster>,
        paymail: Arc<PaymailService>,
        verifier: Arc<dyn ScriptVerifier>,
        broadcast_timeout: Duration,
    ) -> Self {
        Self {
            outputs,
            addresses,
            transactions,
            beef,
            broadcaster,
            paymail,
            verifier,
            broadcast_timeout,
        }
    }

    /// Record a signed BEEF without annotations
    ///
    /// Scripts are verified when `verify_scripts` is set and, regardless of the
    /// flag, whenever an input spends a user's UTXO.
    pub async fn record(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        signed_beef: &str,
        verify_scripts: bool,
    ) -> WalletResult<RecordedTransaction> {
        let tx = decode_beef_hex(signed_beef).map_err(|e| WalletError::TxValidation(e.to_string()))?;
        self.record_transaction(ctx, user_id, tx, &Annotations::default(), verify_scripts)
            .await
    }

    /// Record a signed outline returned by the client, annotations included
    pub async fn record_outline(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        outline: &Outline,
    ) -> WalletResult<RecordedTransaction> {
        let tx = match outline.format {
            OutlineFormat::Beef => decode_beef_hex(&outline.hex),
            OutlineFormat::Raw => Transaction::from_hex(&outline.hex),
        }
        .map_err(|e| WalletError::TxValidation(e.to_string()))?;
        self.record_transaction(ctx, user_id, tx, &outline.annotations, true)
            .await
    }

    async fn record_transaction(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        mut tx: Transaction,
        annotations: &Annotations,
        verify_scripts: bool,
    ) -> WalletResult<RecordedTransaction> {
        annotations.check_output_range(tx.outputs.len())?;
        self.beef.attach_sources(ctx, &mut tx).await?;

        let mut flow = TxFlow::new(&tx);
        info!(tx_id = %flow.tx_id, user_id = %user_id, "recording transaction");

        let mut verified = false;
        if verify_scripts {
            self.verify_scripts(&tx)?;
            verified = true;
        }

        let mut pm_info = PaymailInfo::from_annotations(annotations)?;

        ctx.check("loading inputs")?;
        let found = self.outputs.find_by_outpoints(&flow.input_outpoints()).await?;
        if !verified && !found.utxos.is_empty() {
            debug!(tx_id = %flow.tx_id, "input spends a user UTXO, verifying scripts");
            self.verify_scripts(&tx)?;
        }
        flow.process_inputs(&found, pm_info.receiver())?;

        let candidates = flow.p2pkh_addresses(annotations);
        if !candidates.is_empty() {
            ctx.check("loading addresses")?;
            let keys: Vec<String> = candidates.keys().cloned().collect();
            let tracked = self.addresses.find_by_addresses(&keys).await?;
            for address in tracked {
                let Some(vouts) = candidates.get(&address.address) else {
                    warn!(address = %address.address, "storage returned an address that was not requested");
                    continue;
                };
                for vout in vouts {
                    if pm_info.has_vout(*vout) {
                        pm_info.skip_notification = true;
                    }
                    flow.add_p2pkh_output(
                        *vout,
                        &address.user_id,
                        &address.custom_instructions,
                        pm_info.sender(),
                    );
                }
            }
        }

        flow.process_data_outputs(annotations, user_id, pm_info.sender())?;

        if !flow.has_operations() {
            return Err(WalletError::NoOperations);
        }

        ctx.check("checking input sources")?;
        let (beef_hex, raw_hex) = if self
            .transactions
            .has_input_sources(&flow.input_source_ids())
            .await?
        {
            (None, Some(tx.to_hex()))
        } else {
            let beef = encode_beef_hex(&tx)
                .map_err(|e| WalletError::Unexpected(format!("Failed to encode BEEF: {e}")))?;
            (Some(beef), None)
        };

        let merkle_path = self.broadcast(ctx, &mut flow).await?;

        // The broadcast cannot be undone; persistence runs even if the caller gave up
        let tx_id = flow.tx_id.clone();
        let status = flow.status;
        let operations = flow.operations();
        let new_tx = flow.into_new_transaction(beef_hex, raw_hex);
        if let Err(e) = self.outputs.save_transaction(&new_tx).await {
            error!(
                tx_id = %tx_id,
                error = %e,
                "transaction broadcast but not saved, manual reconciliation required"
            );
            return Err(e);
        }

        if let Some(json) = merkle_path {
            if let Err(e) = self.transactions.mark_mined(&tx_id, &json).await {
                warn!(tx_id = %tx_id, error = %e, "failed to store merkle path from broadcaster");
            }
        }

        self.notify(ctx, &pm_info, &tx).await;

        info!(tx_id = %tx_id, status = %status.as_str(), operations = operations.len(), "transaction recorded");
        Ok(RecordedTransaction {
            tx_id,
            status,
            operations,
        })
    }

    fn verify_scripts(&self, tx: &Transaction) -> WalletResult<()> {
        self.verifier
            .verify(tx)
            .map_err(|e| WalletError::TxValidation(e.to_string()))
    }

    /// Submit and set the flow status; returns the Merkle path when already mined
    async fn broadcast(&self, ctx: &RequestContext, flow: &mut TxFlow<'_>) -> WalletResult<Option<String>> {
        ctx.check("broadcasting")?;
        let info = match tokio::time::timeout(
            ctx.bounded(self.broadcast_timeout),
            self.broadcaster.broadcast(flow.tx),
        )
        .await
        {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!(tx_id = %flow.tx_id, error = %e, "broadcast rejected");
                return Err(WalletError::TxBroadcast(e.to_string()));
            }
            Err(_) if ctx.is_cancelled() => {
                return Err(WalletError::RequestCancelled("broadcasting".to_string()))
            }
            Err(_) => return Err(WalletError::TxBroadcast("broadcast timed out".to_string())),
        };

        if info.is_mined() {
            flow.status = TxStatus::Mined;
            Ok(info.merkle_path)
        } else {
            flow.status = TxStatus::Broadcasted;
            Ok(None)
        }
    }

    async fn notify(&self, ctx: &RequestContext, pm_info: &PaymailInfo, tx: &Transaction) {
        if pm_info.skip_notification {
            if !pm_info.is_empty() {
                debug!(
                    sender = %pm_info.sender(),
                    receiver = %pm_info.receiver(),
                    "skipping paymail notification (internal receiver)"
                );
            }
            return;
        }

        let receiver = match PaymailAddress::parse(pm_info.receiver()) {
            Ok(receiver) => receiver,
            Err(e) => {
                warn!(receiver = %pm_info.receiver(), error = %e, "cannot notify invalid paymail receiver");
                return;
            }
        };
        info!(sender = %pm_info.sender(), receiver = %receiver, "notifying paymail external recipient");
        if let Err(e) = self
            .paymail
            .notify(ctx, &receiver, pm_info.sender(), pm_info.reference(), tx)
            .await
        {
            warn!(receiver = %receiver, error = %e, "paymail notification failed");
        }
    }
}
