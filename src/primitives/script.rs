//! Script helpers: P2PKH templates, addresses and push-data handling.

use super::hash::hash160;
use super::{PrimitiveError, PrimitiveResult};

pub const OP_0: u8 = 0x00;
pub const OP_FALSE: u8 = OP_0;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// Largest payload a single PUSHDATA4 can carry
pub const MAX_PUSH_DATA_SIZE: u64 = 0xFFFF_FFFF;

/// Mainnet P2PKH address version byte
pub const P2PKH_ADDRESS_PREFIX: u8 = 0x00;

/// Length of a P2PKH locking script
pub const P2PKH_SCRIPT_LEN: usize = 25;

/// A single parsed script element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptChunk<'a> {
    /// Non-push opcode (or OP_0, which pushes nothing)
    Op(u8),
    /// Push opcode with its payload
    Push { opcode: u8, data: &'a [u8] },
}

/// Check a payload can be pushed with a single push opcode
pub fn check_push_size(len: usize) -> PrimitiveResult<()> {
    if len as u64 > MAX_PUSH_DATA_SIZE {
        return Err(PrimitiveError::PushDataTooLarge(len));
    }
    Ok(())
}

/// Append `data` with the smallest push-length prefix
pub fn append_push_data(script: &mut Vec<u8>, data: &[u8]) -> PrimitiveResult<()> {
    check_push_size(data.len())?;
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= u8::MAX as usize {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= u16::MAX as usize {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
    Ok(())
}

/// Build `OP_FALSE OP_RETURN <push>...<push>`
pub fn data_script<D: AsRef<[u8]>>(pushes: &[D]) -> PrimitiveResult<Vec<u8>> {
    let mut script = vec![OP_FALSE, OP_RETURN];
    for data in pushes {
        append_push_data(&mut script, data.as_ref())?;
    }
    Ok(script)
}

/// Script starts with `OP_RETURN` or `OP_FALSE OP_RETURN`
pub fn is_data_script(script: &[u8]) -> bool {
    matches!(script, [OP_RETURN, ..] | [OP_FALSE, OP_RETURN, ..])
}

fn read_len(script: &[u8], pos: usize, width: usize) -> PrimitiveResult<usize> {
    let bytes = script
        .get(pos..pos + width)
        .ok_or(PrimitiveError::TruncatedPush(pos))?;
    let mut buf = [0u8; 4];
    buf[..width].copy_from_slice(bytes);
    Ok(u32::from_le_bytes(buf) as usize)
}

/// Split a script into opcodes and pushes
pub fn parse_chunks(script: &[u8]) -> PrimitiveResult<Vec<ScriptChunk<'_>>> {
    let mut chunks = Vec::new();
    let mut pos = 0usize;
    while pos < script.len() {
        let opcode = script[pos];
        pos += 1;
        let len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                let len = read_len(script, pos, 1)?;
                pos += 1;
                len
            }
            OP_PUSHDATA2 => {
                let len = read_len(script, pos, 2)?;
                pos += 2;
                len
            }
            OP_PUSHDATA4 => {
                let len = read_len(script, pos, 4)?;
                pos += 4;
                len
            }
            _ => {
                chunks.push(ScriptChunk::Op(opcode));
                continue;
            }
        };
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= script.len())
            .ok_or(PrimitiveError::TruncatedPush(pos))?;
        chunks.push(ScriptChunk::Push {
            opcode,
            data: &script[pos..end],
        });
        pos = end;
    }
    Ok(chunks)
}

/// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`
pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == P2PKH_SCRIPT_LEN
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub fn p2pkh_public_key_hash(script: &[u8]) -> Option<[u8; 20]> {
    if !is_p2pkh(script) {
        return None;
    }
    let mut pkh = [0u8; 20];
    pkh.copy_from_slice(&script[3..23]);
    Some(pkh)
}

pub fn p2pkh_locking_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(P2PKH_SCRIPT_LEN);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn address_from_public_key_hash(pubkey_hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(P2PKH_ADDRESS_PREFIX);
    payload.extend_from_slice(pubkey_hash);
    bs58::encode(payload).with_check().into_string()
}

/// P2PKH address of a serialized public key
pub fn address_from_public_key(public_key: &[u8]) -> String {
    address_from_public_key_hash(&hash160(public_key))
}

/// Address of a P2PKH locking script, `None` for any other template
pub fn address_from_locking_script(script: &[u8]) -> Option<String> {
    p2pkh_public_key_hash(script).map(|pkh| address_from_public_key_hash(&pkh))
}

pub fn public_key_hash_from_address(address: &str) -> PrimitiveResult<[u8; 20]> {
    let decoded = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| PrimitiveError::InvalidAddress(format!("{address}: {e}")))?;
    if decoded.len() != 21 || decoded[0] != P2PKH_ADDRESS_PREFIX {
        return Err(PrimitiveError::InvalidAddress(format!(
            "{address}: not a mainnet P2PKH address"
        )));
    }
    let mut pkh = [0u8; 20];
    pkh.copy_from_slice(&decoded[1..21]);
    Ok(pkh)
}

pub fn locking_script_from_address(address: &str) -> PrimitiveResult<Vec<u8>> {
    Ok(p2pkh_locking_script(&public_key_hash_from_address(address)?))
}
