//! BEEF bundles (BRC-62, BRC-96 V2, BRC-95 atomic)
//!
//! Decoding turns a bundle into the subject transaction with every ancestor
//! attached to the inputs that spend it. Encoding walks those attachments back
//! out, stopping at transactions that carry a Merkle path.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};

use super::bump::MerklePath;
use super::transaction::{read_varint, write_varint, Transaction, TxId};
use super::{PrimitiveError, PrimitiveResult};

/// `0100BEEF` read as a little-endian u32
pub const BEEF_V1: u32 = 4_022_206_465;
/// `0200BEEF` read as a little-endian u32
pub const BEEF_V2: u32 = 4_022_206_466;
pub const ATOMIC_BEEF_PREFIX: [u8; 4] = [0x01, 0x01, 0x01, 0x01];

const V2_RAW_TX: u8 = 0x00;
const V2_RAW_TX_WITH_BUMP: u8 = 0x01;
const V2_TXID_ONLY: u8 = 0x02;

#[derive(Debug, Clone)]
pub enum BeefEntry {
    Transaction {
        tx: Transaction,
        bump_index: Option<usize>,
    },
    /// V2 entry the recipient is assumed to already know
    TxIdOnly(TxId),
}

/// Parsed BEEF bundle, transactions in parent-first order
#[derive(Debug, Clone)]
pub struct Beef {
    pub version: u32,
    pub atomic_txid: Option<TxId>,
    pub bumps: Vec<MerklePath>,
    pub entries: Vec<BeefEntry>,
}

impl Beef {
    pub fn from_hex(hex_str: &str) -> PrimitiveResult<Self> {
        let bytes = hex::decode(hex_str)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> PrimitiveResult<Self> {
        let mut cursor = Cursor::new(bytes);

        let mut atomic_txid = None;
        if bytes.len() >= 4 && bytes[..4] == ATOMIC_BEEF_PREFIX {
            cursor.set_position(4);
            let mut txid = [0u8; 32];
            cursor.read_exact(&mut txid)?;
            atomic_txid = Some(TxId::from_wire_bytes(txid));
        }

        let version = cursor.read_u32::<LittleEndian>()?;
        if version != BEEF_V1 && version != BEEF_V2 {
            return Err(PrimitiveError::InvalidBeefVersion(version));
        }

        let bump_count = read_varint(&mut cursor)?;
        let mut bumps = Vec::new();
        for _ in 0..bump_count {
            bumps.push(MerklePath::read_from(&mut cursor)?);
        }

        let tx_count = read_varint(&mut cursor)?;
        let mut entries = Vec::new();
        for _ in 0..tx_count {
            let entry = if version == BEEF_V1 {
                let tx = Transaction::read_from(&mut cursor)?;
                let bump_index = match cursor.read_u8()? {
                    0x00 => None,
                    0x01 => Some(read_varint(&mut cursor)? as usize),
                    flag => return Err(PrimitiveError::InvalidBeefFlag(flag)),
                };
                BeefEntry::Transaction { tx, bump_index }
            } else {
                match cursor.read_u8()? {
                    V2_RAW_TX => BeefEntry::Transaction {
                        tx: Transaction::read_from(&mut cursor)?,
                        bump_index: None,
                    },
                    V2_RAW_TX_WITH_BUMP => {
                        let bump_index = read_varint(&mut cursor)? as usize;
                        BeefEntry::Transaction {
                            tx: Transaction::read_from(&mut cursor)?,
                            bump_index: Some(bump_index),
                        }
                    }
                    V2_TXID_ONLY => {
                        let mut txid = [0u8; 32];
                        cursor.read_exact(&mut txid)?;
                        BeefEntry::TxIdOnly(TxId::from_wire_bytes(txid))
                    }
                    flag => return Err(PrimitiveError::InvalidBeefFlag(flag)),
                }
            };
            if let BeefEntry::Transaction {
                bump_index: Some(idx),
                ..
            } = &entry
            {
                if *idx >= bumps.len() {
                    return Err(PrimitiveError::BumpIndexOutOfRange(*idx));
                }
            }
            entries.push(entry);
        }

        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(PrimitiveError::TrailingBytes(bytes.len() - consumed));
        }

        Ok(Self {
            version,
            atomic_txid,
            bumps,
            entries,
        })
    }

    /// Subject transaction with ancestors attached to its inputs
    pub fn into_transaction(self) -> PrimitiveResult<Transaction> {
        let mut known: HashMap<TxId, Arc<Transaction>> = HashMap::new();
        let mut last = None;

        for entry in self.entries {
            let BeefEntry::Transaction { mut tx, bump_index } = entry else {
                continue;
            };
            if let Some(idx) = bump_index {
                tx.merkle_path = self.bumps.get(idx).cloned();
            }
            for input in &mut tx.inputs {
                if let Some(parent) = known.get(&input.source_txid) {
                    input.source_transaction = Some(Arc::clone(parent));
                }
            }
            let txid = tx.txid();
            known.insert(txid, Arc::new(tx));
            last = Some(txid);
        }

        let subject = match self.atomic_txid {
            Some(atomic) => {
                if last != Some(atomic) {
                    return Err(PrimitiveError::AtomicMismatch(atomic.to_hex()));
                }
                atomic
            }
            None => last.ok_or(PrimitiveError::EmptyBeef)?,
        };

        let root = known.remove(&subject).ok_or(PrimitiveError::EmptyBeef)?;
        Ok(Arc::try_unwrap(root).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Bundle a transaction and the ancestors attached to it
    pub fn from_transaction(tx: &Transaction) -> PrimitiveResult<Self> {
        let mut ordered: Vec<&Transaction> = Vec::new();
        let mut seen = HashSet::new();
        collect_ancestors(tx, &mut seen, &mut ordered);
        ordered.push(tx);

        let mut bumps: Vec<MerklePath> = Vec::new();
        let mut entries = Vec::with_capacity(ordered.len());
        for ancestor in ordered {
            let bump_index = match &ancestor.merkle_path {
                Some(path) => Some(add_bump(&mut bumps, path)?),
                None => None,
            };
            let mut stripped = ancestor.clone();
            stripped.merkle_path = None;
            for input in &mut stripped.inputs {
                input.source_transaction = None;
            }
            entries.push(BeefEntry::Transaction {
                tx: stripped,
                bump_index,
            });
        }

        Ok(Self {
            version: BEEF_V1,
            atomic_txid: None,
            bumps,
            entries,
        })
    }

    /// V1 encoding, or V2 when the bundle holds txid-only entries
    pub fn to_bytes(&self) -> Vec<u8> {
        let has_txid_only = self
            .entries
            .iter()
            .any(|e| matches!(e, BeefEntry::TxIdOnly(_)));
        let version = if has_txid_only { BEEF_V2 } else { self.version };

        let mut buf = Vec::new();
        if let Some(txid) = &self.atomic_txid {
            buf.extend_from_slice(&ATOMIC_BEEF_PREFIX);
            buf.extend_from_slice(txid.wire_bytes());
        }
        buf.extend_from_slice(&version.to_le_bytes());
        write_varint(&mut buf, self.bumps.len() as u64);
        for bump in &self.bumps {
            bump.write_to(&mut buf);
        }
        write_varint(&mut buf, self.entries.len() as u64);
        for entry in &self.entries {
            match entry {
                BeefEntry::Transaction { tx, bump_index } if version == BEEF_V1 => {
                    buf.extend_from_slice(&tx.to_bytes());
                    match bump_index {
                        Some(idx) => {
                            buf.push(0x01);
                            write_varint(&mut buf, *idx as u64);
                        }
                        None => buf.push(0x00),
                    }
                }
                BeefEntry::Transaction { tx, bump_index } => {
                    match bump_index {
                        Some(idx) => {
                            buf.push(V2_RAW_TX_WITH_BUMP);
                            write_varint(&mut buf, *idx as u64);
                        }
                        None => buf.push(V2_RAW_TX),
                    }
                    buf.extend_from_slice(&tx.to_bytes());
                }
                BeefEntry::TxIdOnly(txid) => {
                    buf.push(V2_TXID_ONLY);
                    buf.extend_from_slice(txid.wire_bytes());
                }
            }
        }
        buf
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

fn collect_ancestors<'a>(
    tx: &'a Transaction,
    seen: &mut HashSet<TxId>,
    ordered: &mut Vec<&'a Transaction>,
) {
    if tx.merkle_path.is_some() {
        return;
    }
    for input in &tx.inputs {
        if let Some(parent) = input.source_transaction.as_deref() {
            if seen.insert(parent.txid()) {
                collect_ancestors(parent, seen, ordered);
                ordered.push(parent);
            }
        }
    }
}

fn add_bump(bumps: &mut Vec<MerklePath>, path: &MerklePath) -> PrimitiveResult<usize> {
    for (idx, existing) in bumps.iter_mut().enumerate() {
        if existing == path {
            return Ok(idx);
        }
        if existing.block_height == path.block_height && existing.root()? == path.root()? {
            existing.combine(path)?;
            return Ok(idx);
        }
    }
    bumps.push(path.clone());
    Ok(bumps.len() - 1)
}

/// Decode a BEEF hex string into its subject transaction
pub fn decode_beef_hex(beef_hex: &str) -> PrimitiveResult<Transaction> {
    Beef::from_hex(beef_hex)?.into_transaction()
}

/// Encode a transaction and its attached ancestors as BEEF hex
pub fn encode_beef_hex(tx: &Transaction) -> PrimitiveResult<String> {
    Ok(Beef::from_transaction(tx)?.to_hex())
}
