//! State accumulated while recording one transaction

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::errors::{WalletError, WalletResult};
use crate::primitives::script::address_from_locking_script;
use crate::primitives::{Outpoint, Transaction};
use crate::storage::{
    Bucket, FoundOutputs, NewOperation, NewOutput, NewTransaction, OperationType, TxStatus,
};
use crate::transaction::annotations::Annotations;

use super::data::extract_data;

/// Estimated unlocking script size of a P2PKH input, signature and key included
pub const P2PKH_ESTIMATED_INPUT_SIZE: u64 = 148;

pub(crate) struct TxFlow<'a> {
    pub tx: &'a Transaction,
    pub tx_id: String,
    pub status: TxStatus,
    spent: Vec<Outpoint>,
    outputs: Vec<NewOutput>,
    operations: BTreeMap<String, NewOperation>,
}

impl<'a> TxFlow<'a> {
    pub fn new(tx: &'a Transaction) -> Self {
        Self {
            tx,
            tx_id: tx.txid().to_hex(),
            status: TxStatus::Created,
            spent: Vec::new(),
            outputs: Vec::new(),
            operations: BTreeMap::new(),
        }
    }

    pub fn input_outpoints(&self) -> Vec<Outpoint> {
        self.tx.inputs.iter().map(|input| input.outpoint()).collect()
    }

    pub fn input_source_ids(&self) -> Vec<String> {
        self.tx.inputs.iter().map(|input| input.source_txid.to_hex()).collect()
    }

    fn operation_of_user(
        &mut self,
        user_id: &str,
        op_type: OperationType,
        counterparty: &str,
    ) -> &mut NewOperation {
        self.operations
            .entry(user_id.to_string())
            .or_insert_with(|| NewOperation {
                user_id: user_id.to_string(),
                op_type,
                value: 0,
                counterparty: counterparty.to_string(),
            })
    }

    /// Debit the owners of the spent outputs
    ///
    /// Outputs already spent by this very transaction are accepted so that a
    /// re-submission is idempotent.
    pub fn process_inputs(&mut self, found: &FoundOutputs, receiver: &str) -> WalletResult<()> {
        if let Some(spent) = found
            .tracked
            .iter()
            .find(|o| o.spending_tx_id.as_deref().is_some_and(|id| id != self.tx_id))
        {
            warn!(
                tx_id = %self.tx_id,
                outpoint = %spent.outpoint(),
                "input already spent by another transaction"
            );
            return Err(WalletError::UtxoSpent);
        }

        for output in &found.tracked {
            self.spent.push(output.outpoint());
            if output.bucket != Bucket::Bsv {
                continue;
            }
            if let Some(user_id) = &output.user_id {
                let operation = self.operation_of_user(user_id, OperationType::Outgoing, receiver);
                operation.value -= output.satoshis as i64;
            }
        }
        Ok(())
    }

    /// Unique P2PKH addresses paid by the transaction with their vouts
    pub fn p2pkh_addresses(&self, annotations: &Annotations) -> HashMap<String, Vec<u32>> {
        let mut addresses: HashMap<String, Vec<u32>> = HashMap::new();
        for (vout, output) in self.tx.outputs.iter().enumerate() {
            let vout = vout as u32;
            if annotations
                .outputs
                .get(&vout)
                .is_some_and(|a| a.bucket == Bucket::Data)
            {
                continue;
            }
            if let Some(address) = address_from_locking_script(&output.locking_script) {
                addresses.entry(address).or_default().push(vout);
            }
        }
        addresses
    }

    /// Credit a tracked address
    pub fn add_p2pkh_output(
        &mut self,
        vout: u32,
        user_id: &str,
        custom_instructions: &crate::storage::CustomInstructions,
        sender: &str,
    ) {
        let satoshis = self.tx.outputs[vout as usize].satoshis;
        let operation = self.operation_of_user(user_id, OperationType::Incoming, sender);
        operation.value += satoshis as i64;
        self.outputs.push(NewOutput::Spendable {
            vout,
            user_id: user_id.to_string(),
            satoshis,
            unlocking_script_estimated_size: P2PKH_ESTIMATED_INPUT_SIZE,
            custom_instructions: custom_instructions.clone(),
        });
    }

    /// Keep the payload of every `data` annotated output for the acting user
    pub fn process_data_outputs(
        &mut self,
        annotations: &Annotations,
        user_id: &str,
        sender: &str,
    ) -> WalletResult<()> {
        let mut found = false;
        for (vout, annotation) in &annotations.outputs {
            if annotation.bucket != Bucket::Data {
                continue;
            }
            let output = self.tx.outputs.get(*vout as usize).ok_or(
                WalletError::AnnotationIndexOutOfRange {
                    index: *vout,
                    outputs: self.tx.outputs.len(),
                },
            )?;
            let blob = extract_data(&output.locking_script)?;
            debug!(tx_id = %self.tx_id, vout = *vout, bytes = blob.len(), "data output");
            self.outputs.push(NewOutput::Data {
                vout: *vout,
                user_id: user_id.to_string(),
                blob,
            });
            found = true;
        }
        if found {
            self.operation_of_user(user_id, OperationType::Data, sender);
        }
        Ok(())
    }

    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }

    pub fn operations(&self) -> Vec<NewOperation> {
        self.operations.values().cloned().collect()
    }

    pub fn into_new_transaction(self, beef_hex: Option<String>, raw_hex: Option<String>) -> NewTransaction {
        NewTransaction {
            id: self.tx_id,
            status: self.status,
            beef_hex,
            raw_hex,
            spent_outpoints: self.spent,
            outputs: self.outputs,
            operations: self.operations.into_values().collect(),
        }
    }
}
