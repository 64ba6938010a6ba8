//! Shared hex-field decoding for request bodies carrying a raw 32-byte hash
//! (nullifiers, leaf commitments, Merkle roots).

use crate::error::ApiError;

pub fn decode_hash(field: &str, name: &str) -> Result<[u8; 32], ApiError> {
    votecore::hash::from_hex_32(field)
        .ok_or_else(|| ApiError::BadRequest(format!("{name} must be 64 hex characters")))
}
