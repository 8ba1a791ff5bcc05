//! Attaching selected user coins and change to an outline

use tracing::debug;

use crate::config::{FeeRate, ESTIMATED_CHANGE_OUTPUT_SIZE};
use crate::context::RequestContext;
use crate::errors::{WalletError, WalletResult};
use crate::primitives::script::locking_script_from_address;
use crate::primitives::{Transaction, TxId, TxInput, TxOutput};
use crate::storage::{UserUtxo, UtxosRepository};
use crate::transaction::annotations::{Annotations, InputAnnotation, OutputAnnotation};

/// Inputs and change chosen for an outline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Funding {
    pub utxos: Vec<UserUtxo>,
    /// Zero when no change output is added
    pub change: u64,
    pub fee: u64,
}

/// Split the selected coins' value into fee and change
///
/// A change output is only worth adding when it leaves something after paying
/// for its own bytes.
pub fn compute_change(
    fee_rate: FeeRate,
    tx_bytes_without_inputs: u64,
    target: u64,
    utxos: &[UserUtxo],
) -> WalletResult<(u64, u64)> {
    let insufficient = || WalletError::TxOutlineInsufficientFunds;
    let inputs_value = utxos
        .iter()
        .try_fold(0u64, |total, u| total.checked_add(u.satoshis))
        .ok_or_else(insufficient)?;
    let size = utxos
        .iter()
        .try_fold(tx_bytes_without_inputs, |total, u| {
            total.checked_add(u.unlocking_script_estimated_size)
        })
        .ok_or_else(insufficient)?;

    let fee_with_change = fee_rate.fee_for_size(size.saturating_add(ESTIMATED_CHANGE_OUTPUT_SIZE));
    if let Some(change) = target
        .checked_add(fee_with_change)
        .and_then(|needed| inputs_value.checked_sub(needed))
        .filter(|change| *change > 0)
    {
        return Ok((change, fee_with_change));
    }

    let needed = target
        .checked_add(fee_rate.fee_for_size(size))
        .ok_or_else(insufficient)?;
    if inputs_value < needed {
        return Err(insufficient());
    }
    Ok((0, inputs_value - target))
}

/// Select coins for `tx`, add them as inputs and pay any change to `change_address`
pub async fn fund_outline(
    ctx: &RequestContext,
    utxos: &dyn UtxosRepository,
    fee_rate: FeeRate,
    user_id: &str,
    change_address: &str,
    tx: &mut Transaction,
    annotations: &mut Annotations,
) -> WalletResult<Funding> {
    let target = tx
        .total_output_satoshis()
        .ok_or(WalletError::TxOutlineInsufficientFunds)?;
    let tx_bytes_without_inputs = tx.size() as u64;

    ctx.check("selecting inputs")?;
    let selected = utxos.select(user_id, target, tx_bytes_without_inputs).await?;
    if selected.is_empty() {
        return Err(WalletError::TxOutlineInsufficientFunds);
    }

    let (change, fee) = compute_change(fee_rate, tx_bytes_without_inputs, target, &selected)?;

    for utxo in &selected {
        let source_txid = TxId::from_hex(&utxo.tx_id)
            .map_err(|e| WalletError::Unexpected(format!("stored UTXO {} has bad txid: {e}", utxo.tx_id)))?;
        let index = tx.inputs.len() as u32;
        tx.add_input(TxInput::new(source_txid, utxo.vout));
        annotations.inputs.insert(
            index,
            InputAnnotation {
                custom_instructions: utxo.custom_instructions.clone(),
            },
        );
    }

    if change > 0 {
        let script = locking_script_from_address(change_address)
            .map_err(|e| WalletError::Unexpected(format!("invalid change address: {e}")))?;
        let index = tx.outputs.len() as u32;
        tx.add_output(TxOutput::new(change, script));
        annotations.outputs.insert(index, OutputAnnotation::bsv());
    }

    debug!(
        user_id = %user_id,
        inputs = selected.len(),
        change,
        fee,
        "funded outline"
    );
    Ok(Funding {
        utxos: selected,
        change,
        fee,
    })
}
