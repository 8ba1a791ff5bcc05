//! BSV Unified Merkle Paths (BUMP, BRC-74)
//!
//! Binary layout: block height (varint), tree height (u8), then per level a
//! leaf count followed by `offset (varint) | flags (u8) | hash?`. Flag bit `1`
//! marks a duplicate (no hash follows), bit `2` marks a client transaction id.
//! Hashes are kept in wire byte order; the JSON form used for storage shows
//! them in display order.

use std::io::{Cursor, Read};

use byteorder::ReadBytesExt;
use serde::{Deserialize, Serialize};

use super::hash::double_sha256;
use super::transaction::{read_varint, write_varint, TxId};
use super::{PrimitiveError, PrimitiveResult};

const FLAG_DUPLICATE: u8 = 0x01;
const FLAG_TXID: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathElement {
    pub offset: u64,
    pub hash: Option<[u8; 32]>,
    pub txid: bool,
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    pub block_height: u64,
    /// Levels bottom-up, level 0 holds the leaves
    pub path: Vec<Vec<PathElement>>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathElementJson {
    offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    txid: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    duplicate: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MerklePathJson {
    block_height: u64,
    path: Vec<Vec<PathElementJson>>,
}

impl MerklePath {
    pub fn read_from(cursor: &mut Cursor<&[u8]>) -> PrimitiveResult<Self> {
        let block_height = read_varint(cursor)?;
        let tree_height = cursor.read_u8()?;
        if tree_height > 64 {
            return Err(PrimitiveError::InvalidTreeHeight(tree_height));
        }
        let mut path = Vec::with_capacity(tree_height as usize);
        for _ in 0..tree_height {
            let leaf_count = read_varint(cursor)?;
            let mut level = Vec::new();
            for _ in 0..leaf_count {
                let offset = read_varint(cursor)?;
                let flags = cursor.read_u8()?;
                if flags > (FLAG_DUPLICATE | FLAG_TXID) {
                    return Err(PrimitiveError::InvalidBumpFlag(flags));
                }
                let duplicate = flags & FLAG_DUPLICATE != 0;
                let hash = if duplicate {
                    None
                } else {
                    let mut h = [0u8; 32];
                    cursor.read_exact(&mut h)?;
                    Some(h)
                };
                level.push(PathElement {
                    offset,
                    hash,
                    txid: flags & FLAG_TXID != 0,
                    duplicate,
                });
            }
            level.sort_by_key(|e| e.offset);
            path.push(level);
        }
        Ok(Self { block_height, path })
    }

    pub fn from_bytes(bytes: &[u8]) -> PrimitiveResult<Self> {
        let mut cursor = Cursor::new(bytes);
        Self::read_from(&mut cursor)
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.block_height);
        buf.push(self.path.len() as u8);
        for level in &self.path {
            write_varint(buf, level.len() as u64);
            for element in level {
                write_varint(buf, element.offset);
                let mut flags = 0u8;
                if element.duplicate {
                    flags |= FLAG_DUPLICATE;
                }
                if element.txid {
                    flags |= FLAG_TXID;
                }
                buf.push(flags);
                if let Some(hash) = element.hash.filter(|_| !element.duplicate) {
                    buf.extend_from_slice(&hash);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Level-0 element for `txid`
    fn find_leaf(&self, txid: &TxId) -> Option<&PathElement> {
        self.path
            .first()?
            .iter()
            .find(|e| e.hash.as_ref() == Some(txid.wire_bytes()))
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.find_leaf(txid).is_some()
    }

    /// Merkle root (wire order) reached from `txid`
    pub fn compute_root(&self, txid: &TxId) -> PrimitiveResult<[u8; 32]> {
        if self.path.is_empty() {
            return Ok(*txid.wire_bytes());
        }
        let leaf = self
            .find_leaf(txid)
            .ok_or_else(|| PrimitiveError::LeafNotFound(txid.to_hex()))?;
        let mut offset = leaf.offset;
        let mut working = *txid.wire_bytes();
        for (level_idx, level) in self.path.iter().enumerate() {
            let sibling_offset = offset ^ 1;
            let sibling = level
                .iter()
                .find(|e| e.offset == sibling_offset)
                .ok_or(PrimitiveError::MissingSibling {
                    level: level_idx,
                    offset: sibling_offset,
                })?;
            let sibling_hash = if sibling.duplicate {
                working
            } else {
                sibling.hash.ok_or(PrimitiveError::MissingSibling {
                    level: level_idx,
                    offset: sibling_offset,
                })?
            };
            let mut concat = Vec::with_capacity(64);
            if offset % 2 == 0 {
                concat.extend_from_slice(&working);
                concat.extend_from_slice(&sibling_hash);
            } else {
                concat.extend_from_slice(&sibling_hash);
                concat.extend_from_slice(&working);
            }
            working = double_sha256(&concat);
            offset /= 2;
        }
        Ok(working)
    }

    /// Root computed from the first client txid leaf
    pub fn root(&self) -> PrimitiveResult<[u8; 32]> {
        let leaf = self
            .path
            .first()
            .and_then(|level| level.iter().find(|e| e.txid))
            .and_then(|e| e.hash)
            .ok_or_else(|| PrimitiveError::LeafNotFound("any".to_string()))?;
        self.compute_root(&TxId::from_wire_bytes(leaf))
    }

    /// Merge another path of the same block into this one
    pub fn combine(&mut self, other: &MerklePath) -> PrimitiveResult<()> {
        if self.block_height != other.block_height
            || self.path.len() != other.path.len()
            || self.root()? != other.root()?
        {
            return Err(PrimitiveError::MerklePathMismatch(self.block_height));
        }
        for (level, other_level) in self.path.iter_mut().zip(other.path.iter()) {
            for element in other_level {
                match level.iter_mut().find(|e| e.offset == element.offset) {
                    Some(existing) => existing.txid |= element.txid,
                    None => level.push(element.clone()),
                }
            }
            level.sort_by_key(|e| e.offset);
        }
        Ok(())
    }

    pub fn to_json(&self) -> PrimitiveResult<String> {
        let json = MerklePathJson {
            block_height: self.block_height,
            path: self
                .path
                .iter()
                .map(|level| {
                    level
                        .iter()
                        .map(|e| PathElementJson {
                            offset: e.offset,
                            hash: e.hash.map(|h| TxId::from_wire_bytes(h).to_hex()),
                            txid: e.txid,
                            duplicate: e.duplicate,
                        })
                        .collect()
                })
                .collect(),
        };
        serde_json::to_string(&json).map_err(|e| PrimitiveError::InvalidMerklePathJson(e.to_string()))
    }

    pub fn from_json(json: &str) -> PrimitiveResult<Self> {
        let parsed: MerklePathJson = serde_json::from_str(json)
            .map_err(|e| PrimitiveError::InvalidMerklePathJson(e.to_string()))?;
        let mut path = Vec::with_capacity(parsed.path.len());
        for level in parsed.path {
            let mut elements = Vec::with_capacity(level.len());
            for e in level {
                let hash = match e.hash {
                    Some(h) => Some(*TxId::from_hex(&h)?.wire_bytes()),
                    None => None,
                };
                elements.push(PathElement {
                    offset: e.offset,
                    hash,
                    txid: e.txid,
                    duplicate: e.duplicate,
                });
            }
            path.push(elements);
        }
        Ok(Self {
            block_height: parsed.block_height,
            path,
        })
    }
}
