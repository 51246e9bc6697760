//! On-disk container for the identity store.
//!
//! ```text
//! [magic "FGID": 4][version: 1][payload length: 4 LE][payload: JSON][sha256(payload): 32]
//! ```
//!
//! The payload is `{"saved_at": RFC3339, "records": [IdentityRecord, ...]}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::IdentityRecord;

pub const MAGIC: [u8; 4] = *b"FGID";
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1 + 4;
const DIGEST_LEN: usize = 32;
const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("not an identity store (bad magic bytes)")]
    BadMagic,
    #[error("unsupported format version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u8),
    #[error("truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("payload length {0} exceeds maximum")]
    TooLarge(usize),
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
    #[error("checksum mismatch (data corrupted)")]
    ChecksumMismatch,
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    saved_at: DateTime<Utc>,
    records: &'a [IdentityRecord],
}

/// Decoded contents of a store file.
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub records: Vec<IdentityRecord>,
}

pub fn encode(records: &[IdentityRecord], saved_at: DateTime<Utc>) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(&PayloadRef { saved_at, records })?;
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::TooLarge(payload.len()));
    }
    let digest = Sha256::digest(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + DIGEST_LEN);
    out.extend_from_slice(&MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(digest.as_slice());
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    if bytes.len() < HEADER_LEN {
        if !bytes.is_empty() && !MAGIC.starts_with(&bytes[..bytes.len().min(MAGIC.len())]) {
            return Err(CodecError::BadMagic);
        }
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[MAGIC.len() + 1..HEADER_LEN]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(CodecError::TooLarge(len));
    }

    let expected = HEADER_LEN + len + DIGEST_LEN;
    if bytes.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(CodecError::TrailingBytes(bytes.len() - expected));
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + len];
    let stored_digest = &bytes[HEADER_LEN + len..];
    if Sha256::digest(payload).as_slice() != stored_digest {
        return Err(CodecError::ChecksumMismatch);
    }

    Ok(serde_json::from_slice(payload)?)
}
