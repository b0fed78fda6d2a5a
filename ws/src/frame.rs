//! Record framing and structural validation
//!
//! ```text
//! WSR1 <payload-len> <blake3-hex>\n<payload bytes>
//! ```

use crate::error::{StoreError, StoreResult};

const MAGIC: &str = "WSR1";

/// Compute the BLAKE3 checksum of a payload as hex
pub fn checksum(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Wrap a payload in a checksummed frame
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let header = format!("{} {} {}\n", MAGIC, payload.len(), checksum(payload));
    let mut framed = Vec::with_capacity(header.len() + payload.len());
    framed.extend_from_slice(header.as_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Validate a frame and return its payload
pub fn decode(key: &str, framed: &[u8]) -> StoreResult<Vec<u8>> {
    let newline = framed
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| StoreError::corrupted(key, "missing frame header"))?;

    let header = std::str::from_utf8(&framed[..newline])
        .map_err(|_| StoreError::corrupted(key, "frame header is not utf-8"))?;
    let payload = &framed[newline + 1..];

    let mut parts = header.split(' ');
    let (Some(magic), Some(len), Some(sum), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(StoreError::corrupted(key, "malformed frame header"));
    };

    if magic != MAGIC {
        return Err(StoreError::corrupted(key, format!("unknown frame magic {:?}", magic)));
    }

    let len: usize = len
        .parse()
        .map_err(|_| StoreError::corrupted(key, "frame length is not a number"))?;
    if len != payload.len() {
        return Err(StoreError::corrupted(
            key,
            format!("truncated record: expected {} bytes, found {}", len, payload.len()),
        ));
    }

    if checksum(payload) != sum {
        return Err(StoreError::corrupted(key, "checksum mismatch"));
    }

    Ok(payload.to_vec())
}
