//! OP_RETURN payload extraction

use crate::errors::{WalletError, WalletResult};
use crate::primitives::script::{is_data_script, parse_chunks, ScriptChunk, OP_FALSE, OP_RETURN};

/// Concatenated push payloads of a data script
pub fn extract_data(locking_script: &[u8]) -> WalletResult<Vec<u8>> {
    if !is_data_script(locking_script) {
        return Err(WalletError::ParsingScript("not an OP_RETURN script".to_string()));
    }
    let chunks = parse_chunks(locking_script).map_err(|e| WalletError::ParsingScript(e.to_string()))?;

    let skip = match chunks.as_slice() {
        [ScriptChunk::Op(OP_FALSE), ScriptChunk::Op(OP_RETURN), ..] => 2,
        _ => 1,
    };

    let mut blob = Vec::new();
    for chunk in &chunks[skip..] {
        match chunk {
            ScriptChunk::Push { data, .. } => blob.extend_from_slice(data),
            ScriptChunk::Op(_) => return Err(WalletError::OnlyPushDataAllowed),
        }
    }
    Ok(blob)
}
