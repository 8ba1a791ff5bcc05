//! Script verification
//!
//! The engine only spends P2PKH coins, so verification evaluates the P2PKH
//! template directly: the unlocking script must push a signature and a public
//! key, the key must hash to the locked public key hash, and the signature must
//! validate against the BIP143 FORKID sighash. Unmined ancestors are verified
//! the same way, down to the first transaction carrying a Merkle path.

use std::collections::HashSet;

use secp256k1::{ecdsa::Signature, Message, PublicKey, SecretKey, SECP256K1};

use super::hash::{double_sha256, hash160};
use super::script::{append_push_data, p2pkh_public_key_hash, parse_chunks, ScriptChunk};
use super::transaction::{write_varint, Transaction, TxId};
use super::{PrimitiveError, PrimitiveResult};

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

/// Verifies the unlocking scripts of a transaction against attached sources
pub trait ScriptVerifier: Send + Sync {
    /// Verify a single input of `tx`
    fn verify_input(&self, tx: &Transaction, input_index: usize) -> PrimitiveResult<()>;

    /// Verify every input, then every unmined ancestor reachable through the inputs
    fn verify(&self, tx: &Transaction) -> PrimitiveResult<()> {
        let mut seen: HashSet<TxId> = HashSet::new();
        let mut pending: Vec<&Transaction> = vec![tx];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.txid()) {
                continue;
            }
            for index in 0..current.inputs.len() {
                self.verify_input(current, index)?;
            }
            for input in &current.inputs {
                if let Some(parent) = input.source_transaction.as_deref() {
                    if parent.merkle_path.is_none() {
                        pending.push(parent);
                    }
                }
            }
        }
        Ok(())
    }
}

/// BIP143 sighash with the BSV FORKID flag
pub fn sighash(
    tx: &Transaction,
    input_index: usize,
    locking_script: &[u8],
    satoshis: u64,
    sighash_type: u32,
) -> PrimitiveResult<[u8; 32]> {
    let input = tx
        .inputs
        .get(input_index)
        .ok_or(PrimitiveError::MissingSourceOutput(input_index))?;
    let base_type = sighash_type & 0x1f;
    let anyone_can_pay = sighash_type & SIGHASH_ANYONECANPAY != 0;

    let hash_prevouts = if anyone_can_pay {
        [0u8; 32]
    } else {
        let mut buf = Vec::with_capacity(tx.inputs.len() * 36);
        for i in &tx.inputs {
            buf.extend_from_slice(i.source_txid.wire_bytes());
            buf.extend_from_slice(&i.source_vout.to_le_bytes());
        }
        double_sha256(&buf)
    };

    let hash_sequence =
        if anyone_can_pay || base_type == SIGHASH_SINGLE || base_type == SIGHASH_NONE {
            [0u8; 32]
        } else {
            let mut buf = Vec::with_capacity(tx.inputs.len() * 4);
            for i in &tx.inputs {
                buf.extend_from_slice(&i.sequence.to_le_bytes());
            }
            double_sha256(&buf)
        };

    let hash_outputs = if base_type != SIGHASH_SINGLE && base_type != SIGHASH_NONE {
        let mut buf = Vec::new();
        for output in &tx.outputs {
            buf.extend_from_slice(&output.satoshis.to_le_bytes());
            write_varint(&mut buf, output.locking_script.len() as u64);
            buf.extend_from_slice(&output.locking_script);
        }
        double_sha256(&buf)
    } else if base_type == SIGHASH_SINGLE && input_index < tx.outputs.len() {
        let output = &tx.outputs[input_index];
        let mut buf = Vec::new();
        buf.extend_from_slice(&output.satoshis.to_le_bytes());
        write_varint(&mut buf, output.locking_script.len() as u64);
        buf.extend_from_slice(&output.locking_script);
        double_sha256(&buf)
    } else {
        [0u8; 32]
    };

    let mut preimage = Vec::with_capacity(160 + locking_script.len());
    preimage.extend_from_slice(&tx.version.to_le_bytes());
    preimage.extend_from_slice(&hash_prevouts);
    preimage.extend_from_slice(&hash_sequence);
    preimage.extend_from_slice(input.source_txid.wire_bytes());
    preimage.extend_from_slice(&input.source_vout.to_le_bytes());
    write_varint(&mut preimage, locking_script.len() as u64);
    preimage.extend_from_slice(locking_script);
    preimage.extend_from_slice(&satoshis.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());
    preimage.extend_from_slice(&hash_outputs);
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    preimage.extend_from_slice(&sighash_type.to_le_bytes());

    Ok(double_sha256(&preimage))
}

/// P2PKH-only verifier backed by secp256k1
#[derive(Debug, Clone, Default)]
pub struct P2pkhScriptVerifier;

impl P2pkhScriptVerifier {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptVerifier for P2pkhScriptVerifier {
    fn verify_input(&self, tx: &Transaction, input_index: usize) -> PrimitiveResult<()> {
        let fail = |reason: &str| PrimitiveError::Verification {
            index: input_index,
            reason: reason.to_string(),
        };

        let input = tx
            .inputs
            .get(input_index)
            .ok_or_else(|| fail("input index out of range"))?;
        let source = input
            .source_output()
            .ok_or(PrimitiveError::MissingSourceOutput(input_index))?;
        let expected_pkh = p2pkh_public_key_hash(&source.locking_script)
            .ok_or_else(|| fail("unsupported locking script template"))?;

        let chunks = parse_chunks(&input.unlocking_script).map_err(|e| fail(&e.to_string()))?;
        let (sig_bytes, pubkey_bytes) = match chunks.as_slice() {
            [ScriptChunk::Push { data: sig, .. }, ScriptChunk::Push { data: key, .. }] => {
                (*sig, *key)
            }
            _ => return Err(fail("unlocking script must push a signature and a public key")),
        };

        if hash160(pubkey_bytes) != expected_pkh {
            return Err(fail("public key does not match locking script"));
        }

        let (sighash_byte, der) = sig_bytes
            .split_last()
            .ok_or_else(|| fail("empty signature"))?;
        let sighash_type = *sighash_byte as u32;
        if sighash_type & SIGHASH_FORKID == 0 {
            return Err(fail("signature is missing SIGHASH_FORKID"));
        }

        let digest = sighash(tx, input_index, &source.locking_script, source.satoshis, sighash_type)?;
        let message = Message::from_digest(digest);
        let mut signature =
            Signature::from_der_lax(der).map_err(|e| fail(&format!("bad signature: {e}")))?;
        signature.normalize_s();
        let public_key =
            PublicKey::from_slice(pubkey_bytes).map_err(|e| fail(&format!("bad public key: {e}")))?;

        SECP256K1
            .verify_ecdsa(&message, &signature, &public_key)
            .map_err(|_| fail("signature does not verify"))
    }
}

/// Sign a P2PKH input with SIGHASH_ALL|FORKID, replacing its unlocking script
pub fn sign_p2pkh_input(
    tx: &mut Transaction,
    input_index: usize,
    secret_key: &SecretKey,
) -> PrimitiveResult<()> {
    let source = tx
        .inputs
        .get(input_index)
        .and_then(|input| input.source_output())
        .cloned()
        .ok_or(PrimitiveError::MissingSourceOutput(input_index))?;
    let sighash_type = SIGHASH_ALL | SIGHASH_FORKID;
    let digest = sighash(tx, input_index, &source.locking_script, source.satoshis, sighash_type)?;
    let signature = SECP256K1.sign_ecdsa(&Message::from_digest(digest), secret_key);

    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(sighash_type as u8);
    let public_key = PublicKey::from_secret_key_global(secret_key).serialize();

    let mut unlocking = Vec::with_capacity(sig_bytes.len() + 35);
    append_push_data(&mut unlocking, &sig_bytes)?;
    append_push_data(&mut unlocking, &public_key)?;
    tx.inputs[input_index].unlocking_script = unlocking;
    Ok(())
}
