//! Response framing: strip per-line header bytes and pull data bytes out of
//! the remaining hex text.

use crate::error::ObdError;

/// Remove the first `bytes` data bytes (two hex characters each) from every
/// line of a normalised response and concatenate what is left.
///
/// A line shorter than the header yields nothing.
pub fn prune_data(response: &str, bytes: usize) -> String {
    let skip = bytes * 2;
    response
        .split('\n')
        .map(|line| line.get(skip..).unwrap_or(""))
        .collect()
}

/// Decode the first `count` bytes of a pruned hex payload.
pub fn data_bytes(payload: &str, count: usize) -> Result<Vec<u8>, ObdError> {
    let digits = count * 2;
    let head = payload.get(..digits).ok_or_else(|| {
        ObdError::Decode(format!(
            "expected {} data bytes, got {:?}",
            count,
            payload.trim()
        ))
    })?;
    Ok(hex::decode(head)?)
}

/// Last non-empty line of a response, used to check `OK` acknowledgements.
pub fn last_line(response: &str) -> &str {
    response
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("")
}
