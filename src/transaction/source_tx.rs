//! Source-transaction graph building and BEEF preparation
//!
//! Stored ancestors arrive either as raw hex or as BEEF. A BEEF entry already
//! carries its own proof subgraph, as does a raw entry with a Merkle path, so the
//! walk stops there. Raw entries without a proof are expanded through their own
//! inputs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::primitives::{decode_beef_hex, encode_beef_hex, MerklePath, ScriptVerifier, Transaction};
use crate::storage::{TransactionsRepository, TxQueryResult};

/// Parsed ancestor plus whether the walk must stop at it
#[derive(Debug, Clone)]
pub struct SourceTx {
    pub tx: Transaction,
    pub proven: bool,
}

/// Ancestors keyed by transaction ID
#[derive(Debug, Clone, Default)]
pub struct SourceTxMap {
    entries: HashMap<String, SourceTx>,
}

impl SourceTxMap {
    pub fn from_query_results(results: &[TxQueryResult]) -> WalletResult<Self> {
        let mut map = Self::default();
        for result in results {
            map.add(result)?;
        }
        Ok(map)
    }

    pub fn add(&mut self, result: &TxQueryResult) -> WalletResult<()> {
        let id = &result.source_tx_id;
        let entry = match (&result.raw_hex, &result.beef_hex) {
            (Some(_), Some(_)) => return Err(WalletError::MutuallyExclusiveTxQueryResult(id.clone())),
            (None, Some(beef)) => SourceTx {
                tx: decode_beef_hex(beef)
                    .map_err(|e| WalletError::TxValidation(format!("Failed to parse BEEF of {id}: {e}")))?,
                proven: true,
            },
            (Some(raw), None) => {
                let mut tx = Transaction::from_hex(raw)
                    .map_err(|e| WalletError::TxValidation(format!("Failed to parse raw transaction {id}: {e}")))?;
                if let Some(json) = &result.merkle_path {
                    tx.merkle_path = Some(MerklePath::from_json(json).map_err(|e| {
                        WalletError::TxValidation(format!("Failed to parse merkle path of {id}: {e}"))
                    })?);
                }
                let proven = tx.merkle_path.is_some();
                SourceTx { tx, proven }
            }
            (None, None) => return Ok(()),
        };
        self.entries.insert(id.clone(), entry);
        Ok(())
    }

    pub fn contains(&self, tx_id: &str) -> bool {
        self.entries.contains_key(tx_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Attaches ancestors from a [`SourceTxMap`] to a root transaction
pub struct SourceTransactionBuilder<'a> {
    sources: &'a SourceTxMap,
    resolved: HashMap<String, Arc<Transaction>>,
    visiting: HashSet<String>,
}

impl<'a> SourceTransactionBuilder<'a> {
    pub fn new(sources: &'a SourceTxMap) -> Self {
        Self {
            sources,
            resolved: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    /// Attach a source to every input of `root` that lacks one and is known
    ///
    /// Unknown inputs are left untouched.
    pub fn attach(&mut self, root: &mut Transaction) {
        for input in &mut root.inputs {
            if input.source_transaction.is_none() {
                input.source_transaction = self.resolve(&input.source_txid.to_hex());
            }
        }
    }

    fn resolve(&mut self, tx_id: &str) -> Option<Arc<Transaction>> {
        if let Some(done) = self.resolved.get(tx_id) {
            return Some(Arc::clone(done));
        }
        let source = self.sources.entries.get(tx_id)?;
        if !self.visiting.insert(tx_id.to_string()) {
            return None;
        }

        let mut tx = source.tx.clone();
        if !source.proven {
            for input in &mut tx.inputs {
                if input.source_transaction.is_none() {
                    input.source_transaction = self.resolve(&input.source_txid.to_hex());
                }
            }
        }

        self.visiting.remove(tx_id);
        let tx = Arc::new(tx);
        self.resolved.insert(tx_id.to_string(), Arc::clone(&tx));
        Some(tx)
    }
}

/// Require a source on every input of `root` and verify each unmined source
pub fn verify_sources(root: &Transaction, verifier: &dyn ScriptVerifier) -> WalletResult<()> {
    for (index, input) in root.inputs.iter().enumerate() {
        let source = input.source_transaction.as_deref().ok_or_else(|| {
            WalletError::TxValidation(format!("input {index} has no source transaction"))
        })?;
        if source.merkle_path.is_none() {
            verifier.verify(source).map_err(|e| {
                WalletError::TxValidation(format!("source of input {index} failed verification: {e}"))
            })?;
        }
    }
    Ok(())
}

fn missing_source_ids(tx: &Transaction) -> Vec<String> {
    let mut ids: Vec<String> = tx
        .inputs
        .iter()
        .filter(|input| input.source_transaction.is_none())
        .map(|input| input.source_txid.to_hex())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Resolves stored ancestors of transactions
pub struct BeefService {
    transactions: Arc<dyn TransactionsRepository>,
    verifier: Arc<dyn ScriptVerifier>,
}

impl BeefService {
    pub fn new(transactions: Arc<dyn TransactionsRepository>, verifier: Arc<dyn ScriptVerifier>) -> Self {
        Self {
            transactions,
            verifier,
        }
    }

    /// Load every stored ancestor reachable from the unsourced inputs of `tx`
    pub async fn query_input_sources(
        &self,
        ctx: &RequestContext,
        tx: &Transaction,
    ) -> WalletResult<Vec<TxQueryResult>> {
        let mut results = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pending = missing_source_ids(tx);

        while !pending.is_empty() {
            pending.retain(|id| seen.insert(id.clone()));
            if pending.is_empty() {
                break;
            }
            ctx.check("querying input sources")?;
            let batch = self.transactions.find_by_ids(&pending).await?;

            let mut next = Vec::new();
            for row in &batch {
                if row.merkle_path.is_some() {
                    continue;
                }
                if let Some(raw) = &row.raw_hex {
                    let parsed = Transaction::from_hex(raw).map_err(|e| {
                        WalletError::TxValidation(format!(
                            "Failed to parse stored transaction {}: {e}",
                            row.source_tx_id
                        ))
                    })?;
                    next.extend(parsed.inputs.iter().map(|input| input.source_txid.to_hex()));
                }
            }
            results.extend(batch);
            next.sort();
            next.dedup();
            pending = next;
        }

        debug!(tx_id = %tx.txid(), ancestors = results.len(), "loaded stored input sources");
        Ok(results)
    }

    /// Attach stored ancestors to the inputs of `tx` that lack one
    pub async fn attach_sources(&self, ctx: &RequestContext, tx: &mut Transaction) -> WalletResult<()> {
        if missing_source_ids(tx).is_empty() {
            return Ok(());
        }
        let results = self.query_input_sources(ctx, tx).await?;
        let sources = SourceTxMap::from_query_results(&results)?;
        SourceTransactionBuilder::new(&sources).attach(tx);
        Ok(())
    }

    /// BEEF of `tx` with every stored ancestor down to the mined ones
    pub async fn prepare_beef(&self, ctx: &RequestContext, tx: &Transaction) -> WalletResult<String> {
        let mut tx = tx.clone();
        self.attach_sources(ctx, &mut tx).await?;
        verify_sources(&tx, self.verifier.as_ref())?;
        encode_beef_hex(&tx)
            .map_err(|e| WalletError::Unexpected(format!("Failed to encode BEEF of {}: {e}", tx.txid())))
    }
}
