//! Transaction outlines
//!
//! An outline is an unsigned transaction built from a list of [`OutputSpec`]s
//! together with the [`Annotations`] the signing client needs. Without funding
//! the outline has no inputs; with funding the user's coins are selected and a
//! change output is added when worthwhile.

pub mod funding;
pub mod output_spec;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::FeeRate;
use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::paymail::PaymailService;
use crate::primitives::{encode_beef_hex, Transaction};
use crate::storage::{PaymailsRepository, UtxosRepository};
use crate::transaction::annotations::Annotations;
use crate::transaction::source_tx::BeefService;

pub use funding::{compute_change, Funding};
pub use output_spec::{AnnotatedOutput, DataType, EvaluationContext, OutputSpec};

/// Request to build an outline for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSpec {
    #[serde(default)]
    pub user_id: String,
    pub outputs: Vec<OutputSpec>,
    /// Select inputs and add change
    #[serde(default)]
    pub fund: bool,
}

impl TransactionSpec {
    pub fn new(user_id: impl Into<String>, outputs: Vec<OutputSpec>) -> Self {
        Self {
            user_id: user_id.into(),
            outputs,
            fund: false,
        }
    }

    pub fn funded(mut self) -> Self {
        self.fund = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlineFormat {
    Beef,
    Raw,
}

/// Unsigned transaction plus annotations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub hex: String,
    pub format: OutlineFormat,
    pub annotations: Annotations,
}

pub struct OutlinesService {
    paymail: Arc<PaymailService>,
    paymails: Arc<dyn PaymailsRepository>,
    utxos: Arc<dyn UtxosRepository>,
    beef: Arc<BeefService>,
    fee_rate: FeeRate,
}

impl OutlinesService {
    pub fn new(
        paymail: Arc<PaymailService>,
        paymails: Arc<dyn PaymailsRepository>,
        utxos: Arc<dyn UtxosRepository>,
        beef: Arc<BeefService>,
        fee_rate: FeeRate,
    ) -> Self {
        Self {
            paymail,
            paymails,
            utxos,
            beef,
            fee_rate,
        }
    }

    /// Outline encoded as BEEF
    pub async fn create_beef(
        &self,
        ctx: &RequestContext,
        spec: Option<&TransactionSpec>,
    ) -> WalletResult<Outline> {
        let (mut tx, annotations) = self.evaluate_spec(ctx, spec).await?;
        if !tx.inputs.is_empty() {
            self.beef.attach_sources(ctx, &mut tx).await?;
        }
        let hex = encode_beef_hex(&tx)
            .map_err(|e| WalletError::Unexpected(format!("Failed to make BEEF for outline: {e}")))?;
        Ok(Outline {
            hex,
            format: OutlineFormat::Beef,
            annotations,
        })
    }

    /// Outline encoded as a raw transaction
    pub async fn create_raw_tx(
        &self,
        ctx: &RequestContext,
        spec: Option<&TransactionSpec>,
    ) -> WalletResult<Outline> {
        let (tx, annotations) = self.evaluate_spec(ctx, spec).await?;
        Ok(Outline {
            hex: tx.to_hex(),
            format: OutlineFormat::Raw,
            annotations,
        })
    }

    async fn evaluate_spec(
        &self,
        ctx: &RequestContext,
        spec: Option<&TransactionSpec>,
    ) -> WalletResult<(Transaction, Annotations)> {
        let spec = spec.ok_or(WalletError::TxOutlineSpecificationRequired)?;
        if spec.user_id.is_empty() {
            return Err(WalletError::TxOutlineSpecificationUserIdRequired);
        }

        let ec = EvaluationContext {
            ctx,
            user_id: &spec.user_id,
            paymail: self.paymail.as_ref(),
            paymails: self.paymails.as_ref(),
        };
        let outputs = output_spec::evaluate_outputs(&ec, &spec.outputs).await?;

        let mut tx = Transaction::new();
        let mut annotations = Annotations::default();
        for (index, annotated) in outputs.into_iter().enumerate() {
            if let Some(annotation) = annotated.annotation {
                annotations.outputs.insert(index as u32, annotation);
            }
            tx.add_output(annotated.output);
        }

        if spec.fund {
            funding::fund_outline(
                ctx,
                self.utxos.as_ref(),
                self.fee_rate,
                &spec.user_id,
                &spec.user_id,
                &mut tx,
                &mut annotations,
            )
            .await?;
        }

        info!(
            user_id = %spec.user_id,
            outputs = tx.outputs.len(),
            inputs = tx.inputs.len(),
            "created transaction outline"
        );
        Ok((tx, annotations))
    }
}
