//! Ballot ciphertext assembly for the decryption ceremony (C5 support).
//!
//! A ballot's `encrypted_ballot` blob (opaque to the ledger, which only
//! ever hashes it) is, for the question kinds this core tallies, a
//! one-hot vector of per-candidate ElGamal ciphertexts: `Enc(1)` at the
//! selected candidate's index, `Enc(0)` everywhere else. Additive ElGamal
//! is homomorphic under componentwise addition, so summing every ballot's
//! ciphertext at candidate index *i* yields an encryption of the total
//! vote count for that candidate; [`crate::ledger::LedgerManager`] hands
//! this module the raw blobs it fetched back from the blob store, and
//! this module is the only place that actually parses them as curve
//! points.
//!
//! Grounded on `ceremony::decryption::Ciphertext`'s `(C1, C2)` shape and on
//! `curve25519-dalek`'s `CompressedRistretto` for the wire encoding, same
//! as the rest of this crate's point serialization (`ceremony::threshold`,
//! `routes::tally` upstream).

use crate::ceremony::decryption::Ciphertext;
use curve25519_dalek::ristretto::CompressedRistretto;
use thiserror::Error;

const POINT_LEN: usize = 32;
const CIPHERTEXT_LEN: usize = POINT_LEN * 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TallyError {
    #[error("ballot has {got} bytes, expected {expected} for {candidates} candidates")]
    WrongLength {
        got: usize,
        expected: usize,
        candidates: usize,
    },
    #[error("ballot contains a byte sequence that is not a valid curve point")]
    InvalidPoint,
}

/// Decode a ballot blob into one ciphertext per candidate, in candidate
/// display order.
pub fn decode_ballot(bytes: &[u8], num_candidates: usize) -> Result<Vec<Ciphertext>, TallyError> {
    let expected = num_candidates * CIPHERTEXT_LEN;
    if bytes.len() != expected {
        return Err(TallyError::WrongLength {
            got: bytes.len(),
            expected,
            candidates: num_candidates,
        });
    }
    bytes
        .chunks_exact(CIPHERTEXT_LEN)
        .map(|chunk| {
            let c1 = decode_point(&chunk[..POINT_LEN])?;
            let c2 = decode_point(&chunk[POINT_LEN..])?;
            Ok(Ciphertext { c1, c2 })
        })
        .collect()
}

/// Encode one ciphertext per candidate into the wire shape [`decode_ballot`]
/// expects. Used by tests and by any caller constructing a well-formed
/// ballot rather than accepting one over the wire.
pub fn encode_ballot(ciphertexts: &[Ciphertext]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ciphertexts.len() * CIPHERTEXT_LEN);
    for ct in ciphertexts {
        out.extend_from_slice(ct.c1.compress().as_bytes());
        out.extend_from_slice(ct.c2.compress().as_bytes());
    }
    out
}

fn decode_point(bytes: &[u8]) -> Result<curve25519_dalek::ristretto::RistrettoPoint, TallyError> {
    let arr: [u8; POINT_LEN] = bytes.try_into().expect("chunk is exactly POINT_LEN bytes");
    CompressedRistretto(arr).decompress().ok_or(TallyError::InvalidPoint)
}

/// Homomorphically sum every ballot's per-candidate ciphertexts into one
/// aggregate ciphertext per candidate. `num_candidates` fixes the output
/// width even if `ballots` is empty (an untallied question still has one
/// all-identity ciphertext per candidate).
pub fn aggregate(
    ballots: impl IntoIterator<Item = Vec<Ciphertext>>,
    num_candidates: usize,
) -> Result<Vec<Ciphertext>, TallyError> {
    use curve25519_dalek::ristretto::RistrettoPoint;

    let mut totals = vec![
        Ciphertext {
            c1: RistrettoPoint::default(),
            c2: RistrettoPoint::default(),
        };
        num_candidates
    ];
    for ballot in ballots {
        if ballot.len() != num_candidates {
            return Err(TallyError::WrongLength {
                got: ballot.len() * CIPHERTEXT_LEN,
                expected: num_candidates * CIPHERTEXT_LEN,
                candidates: num_candidates,
            });
        }
        for (slot, ct) in totals.iter_mut().zip(ballot) {
            slot.c1 += ct.c1;
            slot.c2 += ct.c2;
        }
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
    use curve25519_dalek::scalar::Scalar;

    fn ct(c1: curve25519_dalek::ristretto::RistrettoPoint, c2: curve25519_dalek::ristretto::RistrettoPoint) -> Ciphertext {
        Ciphertext { c1, c2 }
    }

    #[test]
    fn encode_then_decode_roundtrips() {
        let ciphertexts = vec![ct(G * Scalar::from(2u64), G * Scalar::from(3u64)), ct(G, G)];
        let bytes = encode_ballot(&ciphertexts);
        let decoded = decode_ballot(&bytes, 2).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].c1, ciphertexts[0].c1);
        assert_eq!(decoded[1].c2, ciphertexts[1].c2);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = decode_ballot(&[0u8; 10], 2).unwrap_err();
        assert_eq!(
            err,
            TallyError::WrongLength {
                got: 10,
                expected: 128,
                candidates: 2
            }
        );
    }

    #[test]
    fn aggregate_sums_componentwise() {
        let identity = curve25519_dalek::ristretto::RistrettoPoint::default();
        let zero = ct(identity, identity);
        let one = ct(G, G * Scalar::from(7u64));

        // Ballot 1 selects candidate 0, ballot 2 selects candidate 1.
        let ballots = vec![vec![one, zero], vec![zero, one]];
        let totals = aggregate(ballots, 2).unwrap();

        assert_eq!(totals[0].c1, G);
        assert_eq!(totals[1].c1, G);
    }
}
