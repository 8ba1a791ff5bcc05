//! Raw transaction encoding
//!
//! Inputs may carry the transaction they spend from (`source_transaction`). The
//! resulting ancestor graph is what BEEF encodes and what script verification
//! walks. Ancestors are shared through `Arc` since one parent can fund several
//! inputs.

use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use super::bump::MerklePath;
use super::hash::double_sha256;
use super::{PrimitiveError, PrimitiveResult};

pub const DEFAULT_SEQUENCE: u32 = 0xFFFF_FFFF;

/// Transaction hash stored in wire (internal) byte order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId([u8; 32]);

impl TxId {
    pub fn from_wire_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn wire_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse the display form (byte-reversed hex)
    pub fn from_hex(hex_str: &str) -> PrimitiveResult<Self> {
        let mut bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(PrimitiveError::InvalidHex(format!(
                "txid must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        bytes.reverse();
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// 64-char lowercase display hex
    pub fn to_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Output reference in display form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub tx_id: String,
    pub vout: u32,
}

impl Outpoint {
    pub fn new(tx_id: impl Into<String>, vout: u32) -> Self {
        Self {
            tx_id: tx_id.into(),
            vout,
        }
    }
}

/// Canonical `"<tx_id>-<vout>"` form
impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.tx_id, self.vout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub satoshis: u64,
    pub locking_script: Vec<u8>,
}

impl TxOutput {
    pub fn new(satoshis: u64, locking_script: Vec<u8>) -> Self {
        Self {
            satoshis,
            locking_script,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxInput {
    pub source_txid: TxId,
    pub source_vout: u32,
    pub unlocking_script: Vec<u8>,
    pub sequence: u32,
    /// Ancestor spent by this input, when known
    pub source_transaction: Option<Arc<Transaction>>,
}

impl TxInput {
    pub fn new(source_txid: TxId, source_vout: u32) -> Self {
        Self {
            source_txid,
            source_vout,
            unlocking_script: Vec::new(),
            sequence: DEFAULT_SEQUENCE,
            source_transaction: None,
        }
    }

    /// Output of the attached source transaction this input spends
    pub fn source_output(&self) -> Option<&TxOutput> {
        self.source_transaction
            .as_ref()
            .and_then(|tx| tx.outputs.get(self.source_vout as usize))
    }

    pub fn outpoint(&self) -> Outpoint {
        Outpoint::new(self.source_txid.to_hex(), self.source_vout)
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    /// Inclusion proof when this transaction is mined
    pub merkle_path: Option<MerklePath>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a Bitcoin varint
pub fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Read a Bitcoin varint, rejecting non-canonical encodings
pub fn read_varint<R: Read>(reader: &mut R) -> PrimitiveResult<u64> {
    let first = reader.read_u8()?;
    match first {
        0..=0xfc => Ok(first as u64),
        0xfd => {
            let val = reader.read_u16::<LittleEndian>()? as u64;
            if val < 0xfd {
                return Err(PrimitiveError::InvalidVarInt);
            }
            Ok(val)
        }
        0xfe => {
            let val = reader.read_u32::<LittleEndian>()? as u64;
            if val < 0x10000 {
                return Err(PrimitiveError::InvalidVarInt);
            }
            Ok(val)
        }
        0xff => {
            let val = reader.read_u64::<LittleEndian>()?;
            if val < 0x1_0000_0000 {
                return Err(PrimitiveError::InvalidVarInt);
            }
            Ok(val)
        }
    }
}

pub(crate) fn varint_size(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Read `len` bytes, refusing lengths larger than what is left
pub(crate) fn read_bytes(cursor: &mut Cursor<&[u8]>, len: u64) -> PrimitiveResult<Vec<u8>> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position().min(cursor.get_ref().len() as u64);
    if len > remaining {
        return Err(PrimitiveError::LengthOverflow {
            declared: len,
            remaining,
        });
    }
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            merkle_path: None,
        }
    }

    pub fn from_hex(hex_str: &str) -> PrimitiveResult<Self> {
        let bytes = hex::decode(hex_str)?;
        Self::from_bytes(&bytes)
    }

    /// Decode a complete raw transaction, trailing bytes are an error
    pub fn from_bytes(bytes: &[u8]) -> PrimitiveResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let tx = Self::read_from(&mut cursor)?;
        let consumed = cursor.position() as usize;
        if consumed != bytes.len() {
            return Err(PrimitiveError::TrailingBytes(bytes.len() - consumed));
        }
        Ok(tx)
    }

    /// Decode one transaction from the cursor position
    pub fn read_from(cursor: &mut Cursor<&[u8]>) -> PrimitiveResult<Self> {
        let version = cursor.read_u32::<LittleEndian>()?;

        let input_count = read_varint(cursor)?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let mut txid = [0u8; 32];
            cursor.read_exact(&mut txid)?;
            let source_vout = cursor.read_u32::<LittleEndian>()?;
            let script_len = read_varint(cursor)?;
            let unlocking_script = read_bytes(cursor, script_len)?;
            let sequence = cursor.read_u32::<LittleEndian>()?;
            inputs.push(TxInput {
                source_txid: TxId::from_wire_bytes(txid),
                source_vout,
                unlocking_script,
                sequence,
                source_transaction: None,
            });
        }

        let output_count = read_varint(cursor)?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            let satoshis = cursor.read_u64::<LittleEndian>()?;
            let script_len = read_varint(cursor)?;
            let locking_script = read_bytes(cursor, script_len)?;
            outputs.push(TxOutput {
                satoshis,
                locking_script,
            });
        }

        let lock_time = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
            merkle_path: None,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(input.source_txid.wire_bytes());
            buf.extend_from_slice(&input.source_vout.to_le_bytes());
            write_varint(&mut buf, input.unlocking_script.len() as u64);
            buf.extend_from_slice(&input.unlocking_script);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        self.write_outputs(&mut buf);
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub(crate) fn write_outputs(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.satoshis.to_le_bytes());
            write_varint(buf, output.locking_script.len() as u64);
            buf.extend_from_slice(&output.locking_script);
        }
    }

    /// Extended format (BRC-30): every input also carries its source satoshis and
    /// locking script. `None` when any input lacks a source transaction.
    pub fn to_ef_bytes(&self) -> Option<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size() + self.inputs.len() * 34);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0xEF]);
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            let source = input.source_output()?;
            buf.extend_from_slice(input.source_txid.wire_bytes());
            buf.extend_from_slice(&input.source_vout.to_le_bytes());
            write_varint(&mut buf, input.unlocking_script.len() as u64);
            buf.extend_from_slice(&input.unlocking_script);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
            buf.extend_from_slice(&source.satoshis.to_le_bytes());
            write_varint(&mut buf, source.locking_script.len() as u64);
            buf.extend_from_slice(&source.locking_script);
        }
        self.write_outputs(&mut buf);
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        Some(buf)
    }

    pub fn txid(&self) -> TxId {
        TxId::from_wire_bytes(double_sha256(&self.to_bytes()))
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        let mut size = 4 + varint_size(self.inputs.len() as u64);
        for input in &self.inputs {
            let script_len = input.unlocking_script.len() as u64;
            size += 32 + 4 + varint_size(script_len) + script_len + 4;
        }
        size += self.outputs_size();
        size += 4;
        size as usize
    }

    /// Size of the output section including its count
    pub fn outputs_size(&self) -> u64 {
        let mut size = varint_size(self.outputs.len() as u64);
        for output in &self.outputs {
            let script_len = output.locking_script.len() as u64;
            size += 8 + varint_size(script_len) + script_len;
        }
        size
    }

    /// `None` when the outputs overflow a satoshi amount
    pub fn total_output_satoshis(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, o| total.checked_add(o.satoshis))
    }

    pub fn add_output(&mut self, output: TxOutput) {
        self.outputs.push(output);
    }

    pub fn add_input(&mut self, input: TxInput) {
        self.inputs.push(input);
    }
}
