//! Session snapshot framing: a fixed header with the window counters
//! followed by the engine's opaque state blob.
//!
//! ```text
//! "LSES" | version u32 LE | num_past u64 LE | num_keep u64 LE | ga_index u64 LE | engine bytes
//! ```

use super::window::ContextWindow;
use crate::types::SessionError;

const MAGIC: &[u8; 4] = b"LSES";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 * 3;

/// Counters restored from a snapshot header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SnapshotHeader {
    pub num_past: usize,
    pub num_keep: usize,
    pub ga_index: usize,
}

pub(crate) fn encode(window: &ContextWindow, engine_state: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + engine_state.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    for counter in [window.num_past, window.num_keep, window.ga_index] {
        bytes.extend_from_slice(&(counter as u64).to_le_bytes());
    }
    bytes.extend_from_slice(engine_state);
    bytes
}

pub(crate) fn decode(bytes: &[u8]) -> Result<(SnapshotHeader, &[u8]), SessionError> {
    if bytes.len() < HEADER_LEN {
        return Err(SessionError::invalid_argument(format!(
            "session snapshot too short: {} bytes",
            bytes.len()
        )));
    }
    let (header, engine_state) = bytes.split_at(HEADER_LEN);
    if &header[..4] != MAGIC {
        return Err(SessionError::invalid_argument(
            "not a session snapshot (bad magic)",
        ));
    }

    let version = u32::from_le_bytes(fixed(&header[4..8]));
    if version != VERSION {
        return Err(SessionError::invalid_argument(format!(
            "unsupported session snapshot version {}",
            version
        )));
    }

    let counter = |offset: usize| -> Result<usize, SessionError> {
        let value = u64::from_le_bytes(fixed(&header[offset..offset + 8]));
        usize::try_from(value)
            .map_err(|_| SessionError::invalid_argument("snapshot counter out of range"))
    };

    Ok((
        SnapshotHeader {
            num_past: counter(8)?,
            num_keep: counter(16)?,
            ga_index: counter(24)?,
        },
        engine_state,
    ))
}

fn fixed<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}
