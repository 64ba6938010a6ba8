//! Tally decryption ceremony (C5): combine t-of-n decryption shares.
//!
//! Grounded on `programs/cloakcraft/src/instructions/governance/
//! submit_decryption_share.rs` for the state-machine shape (deadline check,
//! committee-membership check, no-double-submit, threshold-reached flip)
//! and `osst::lagrange::compute_lagrange_coefficients` for the actual
//! combiner math: given any `threshold` trustees' shares `d_i = sk_i * C1`,
//! the plaintext point is `C2 - sum_i(lambda_i * d_i)` where `lambda_i` is
//! that trustee's Lagrange coefficient at x=0 over the participating set.
//!
//! A question's aggregated ballots are one ciphertext *per candidate*
//! (`crate::tally::aggregate`'s output), not a single ciphertext, so this
//! ceremony combines at every position in lockstep: a trustee submits one
//! share per candidate in the same call, and `combine` recovers one
//! plaintext point per candidate before turning each into a vote count via
//! brute-force discrete log, bounded by the question's known ballot count.

use crate::ceremony::threshold::TrusteeId;
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionPhase {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("decryption ceremony {0} already completed")]
    AlreadyCompleted(Uuid),
    #[error("trustee {0:?} is not a member of this committee")]
    NotACommitteeMember(TrusteeId),
    #[error("trustee {0:?} already submitted a decryption share")]
    AlreadySubmitted(TrusteeId),
    #[error("need {threshold} shares to combine, have {got}")]
    InsufficientShares { got: usize, threshold: u16 },
    #[error("submitted {got} shares, ceremony has {expected} ciphertext positions")]
    ShareCountMismatch { expected: usize, got: usize },
    #[error("ciphertext position {0} does not exist in this ceremony")]
    UnknownCiphertextIndex(usize),
    #[error("candidate {index} received {point:?}, which does not decode to a vote count within [0, {max}]")]
    UndecodableTally { index: usize, point: String, max: u64 },
}

/// A single ElGamal ciphertext over the Ristretto255 group: `(C1, C2)`
/// where `C1 = g^r` and `C2 = m + pk^r`.
#[derive(Debug, Clone, Copy)]
pub struct Ciphertext {
    pub c1: RistrettoPoint,
    pub c2: RistrettoPoint,
}

/// One trustee's partial decryption of a single ciphertext position's `C1`
/// component.
#[derive(Debug, Clone, Copy)]
pub struct DecryptionShare {
    pub trustee: TrusteeId,
    pub value: RistrettoPoint,
}

/// Recovered per-candidate vote totals, once every ciphertext position has
/// decoded to a small enough integer to brute-force.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyResult {
    pub totals: Vec<u64>,
    pub total_votes: u64,
}

pub struct DecryptionCeremony {
    pub id: Uuid,
    pub threshold: u16,
    committee: Vec<TrusteeId>,
    ciphertexts: Vec<Ciphertext>,
    /// Known ledger size for the question; bounds the discrete-log search
    /// and is the value every candidate's recovered count cannot exceed.
    total_votes: u64,
    phase: DecryptionPhase,
    /// Index-aligned with `ciphertexts`: `shares[trustee][i]` is that
    /// trustee's partial decryption of `ciphertexts[i]`.
    shares: BTreeMap<TrusteeId, Vec<RistrettoPoint>>,
    tally: Option<TallyResult>,
}

impl DecryptionCeremony {
    pub fn new(
        id: Uuid,
        threshold: u16,
        committee: Vec<TrusteeId>,
        ciphertexts: Vec<Ciphertext>,
        total_votes: u64,
    ) -> Self {
        Self {
            id,
            threshold,
            committee,
            ciphertexts,
            total_votes,
            phase: DecryptionPhase::Pending,
            shares: BTreeMap::new(),
            tally: None,
        }
    }

    pub fn phase(&self) -> DecryptionPhase {
        self.phase
    }

    pub fn num_positions(&self) -> usize {
        self.ciphertexts.len()
    }

    pub fn start(&mut self) {
        if matches!(self.phase, DecryptionPhase::Pending) {
            self.phase = DecryptionPhase::InProgress;
        }
    }

    /// Submit one trustee's partial decryption of every ciphertext
    /// position, `(index, value)` pairs in any order. Every position must
    /// be present exactly once.
    pub fn submit_shares(
        &mut self,
        trustee: TrusteeId,
        shares: Vec<(usize, RistrettoPoint)>,
    ) -> Result<(), DecryptionError> {
        if matches!(self.phase, DecryptionPhase::Completed) {
            return Err(DecryptionError::AlreadyCompleted(self.id));
        }
        if !self.committee.contains(&trustee) {
            return Err(DecryptionError::NotACommitteeMember(trustee));
        }
        if self.shares.contains_key(&trustee) {
            return Err(DecryptionError::AlreadySubmitted(trustee));
        }
        if shares.len() != self.ciphertexts.len() {
            return Err(DecryptionError::ShareCountMismatch {
                expected: self.ciphertexts.len(),
                got: shares.len(),
            });
        }

        let mut aligned = vec![RistrettoPoint::default(); self.ciphertexts.len()];
        let mut filled = vec![false; self.ciphertexts.len()];
        for (index, value) in shares {
            if index >= self.ciphertexts.len() {
                return Err(DecryptionError::UnknownCiphertextIndex(index));
            }
            aligned[index] = value;
            filled[index] = true;
        }
        if filled.iter().any(|f| !f) {
            let missing = filled.iter().position(|f| !f).unwrap();
            return Err(DecryptionError::UnknownCiphertextIndex(missing));
        }

        self.phase = DecryptionPhase::InProgress;
        self.shares.insert(trustee, aligned);

        if self.shares.len() >= self.threshold as usize {
            self.combine()?;
        }
        Ok(())
    }

    fn combine(&mut self) -> Result<(), DecryptionError> {
        if self.shares.len() < self.threshold as usize {
            return Err(DecryptionError::InsufficientShares {
                got: self.shares.len(),
                threshold: self.threshold,
            });
        }
        // Only the first `threshold` submissions (in trustee-id order) are
        // used; any later shares are redundant and ignored rather than
        // rejected, since the ceremony flips to Completed on first reach.
        let participating: Vec<TrusteeId> = self.shares.keys().take(self.threshold as usize).copied().collect();
        let xs: Vec<i64> = participating.iter().map(|t| t.0 as i64).collect();
        let coefficients = lagrange_coefficients_at_zero(&xs);

        let mut totals = Vec::with_capacity(self.ciphertexts.len());
        for (position, ciphertext) in self.ciphertexts.iter().enumerate() {
            let mut weighted_sum = RistrettoPoint::default();
            for (lambda, trustee) in coefficients.iter().zip(&participating) {
                let d_i = self.shares[trustee][position];
                weighted_sum += d_i * lambda;
            }
            let plaintext_point = ciphertext.c2 - weighted_sum;
            let count = decode_count(plaintext_point, self.total_votes).ok_or_else(|| {
                DecryptionError::UndecodableTally {
                    index: position,
                    point: hex::encode(plaintext_point.compress().as_bytes()),
                    max: self.total_votes,
                }
            })?;
            totals.push(count);
        }

        self.tally = Some(TallyResult {
            totals,
            total_votes: self.total_votes,
        });
        self.phase = DecryptionPhase::Completed;
        Ok(())
    }

    pub fn tally(&self) -> Option<&TallyResult> {
        self.tally.as_ref()
    }
}

/// Recover `m` such that `m * G == point`, for `m` in `0..=max`. One-hot
/// per-candidate ElGamal ciphertexts sum to small plaintexts (bounded by
/// the question's ballot count), so brute force is cheap and exact; there
/// is no general discrete-log shortcut over Ristretto255 and none is
/// needed at these magnitudes.
fn decode_count(point: RistrettoPoint, max: u64) -> Option<u64> {
    let mut acc = RistrettoPoint::default();
    if point == acc {
        return Some(0);
    }
    for m in 1..=max {
        acc += G;
        if acc == point {
            return Some(m);
        }
    }
    None
}

/// Lagrange coefficients `lambda_i = prod_{j != i}(x_j / (x_j - x_i))`
/// evaluated at `x = 0`, matching `osst::lagrange::compute_lagrange_
/// coefficients`'s common-denominator technique but over the Ristretto255
/// scalar field instead of osst's generic field parameter.
fn lagrange_coefficients_at_zero(xs: &[i64]) -> Vec<Scalar> {
    xs.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let mut numerator = Scalar::ONE;
            let mut denominator = Scalar::ONE;
            for (j, &xj) in xs.iter().enumerate() {
                if i == j {
                    continue;
                }
                numerator *= scalar_from_i64(xj);
                denominator *= scalar_from_i64(xj - xi);
            }
            numerator * denominator.invert()
        })
        .collect()
}

fn scalar_from_i64(v: i64) -> Scalar {
    if v >= 0 {
        Scalar::from(v as u64)
    } else {
        -Scalar::from((-v) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committee(ids: &[u16]) -> Vec<TrusteeId> {
        ids.iter().map(|&i| TrusteeId(i)).collect()
    }

    fn eval(coeffs: &[Scalar], x: i64) -> Scalar {
        let x = scalar_from_i64(x);
        let mut acc = Scalar::ZERO;
        let mut power = Scalar::ONE;
        for c in coeffs {
            acc += c * power;
            power *= x;
        }
        acc
    }

    /// Build a degree-(t-1) polynomial and the ElGamal ciphertext of a
    /// small integer `message` (as `message * G`) under its constant term.
    fn setup(secret_coeffs: &[Scalar], message: u64, r: Scalar) -> Ciphertext {
        let pk = G * secret_coeffs[0];
        let c1 = G * r;
        let c2 = G * Scalar::from(message) + pk * r;
        Ciphertext { c1, c2 }
    }

    #[test]
    fn threshold_shares_recover_per_candidate_totals() {
        let secret_coeffs = vec![Scalar::from(42u64), Scalar::from(17u64)]; // t=2
        let r = Scalar::from(99u64);
        let ciphertexts = vec![setup(&secret_coeffs, 3, r), setup(&secret_coeffs, 5, r)];

        let mut ceremony = DecryptionCeremony::new(Uuid::nil(), 2, committee(&[1, 2, 3]), ciphertexts.clone(), 8);
        ceremony.start();
        assert_eq!(ceremony.phase(), DecryptionPhase::InProgress);

        for id in [1i64, 2] {
            let shares: Vec<(usize, RistrettoPoint)> = ciphertexts
                .iter()
                .map(|ct| ct.c1 * eval(&secret_coeffs, id))
                .enumerate()
                .collect();
            ceremony.submit_shares(TrusteeId(id as u16), shares).unwrap();
        }

        assert_eq!(ceremony.phase(), DecryptionPhase::Completed);
        let tally = ceremony.tally().unwrap();
        assert_eq!(tally.totals, vec![3, 5]);
        assert_eq!(tally.total_votes, 8);
    }

    #[test]
    fn non_member_share_rejected() {
        let mut ceremony = DecryptionCeremony::new(
            Uuid::nil(),
            2,
            committee(&[1, 2]),
            vec![Ciphertext {
                c1: RistrettoPoint::default(),
                c2: RistrettoPoint::default(),
            }],
            10,
        );
        let err = ceremony
            .submit_shares(TrusteeId(99), vec![(0, RistrettoPoint::default())])
            .unwrap_err();
        assert_eq!(err, DecryptionError::NotACommitteeMember(TrusteeId(99)));
    }

    #[test]
    fn double_submit_rejected() {
        let mut ceremony = DecryptionCeremony::new(
            Uuid::nil(),
            2,
            committee(&[1, 2, 3]),
            vec![Ciphertext {
                c1: RistrettoPoint::default(),
                c2: RistrettoPoint::default(),
            }],
            10,
        );
        ceremony
            .submit_shares(TrusteeId(1), vec![(0, RistrettoPoint::default())])
            .unwrap();
        let err = ceremony
            .submit_shares(TrusteeId(1), vec![(0, RistrettoPoint::default())])
            .unwrap_err();
        assert_eq!(err, DecryptionError::AlreadySubmitted(TrusteeId(1)));
    }

    #[test]
    fn share_count_mismatch_rejected() {
        let mut ceremony = DecryptionCeremony::new(
            Uuid::nil(),
            2,
            committee(&[1, 2]),
            vec![
                Ciphertext { c1: RistrettoPoint::default(), c2: RistrettoPoint::default() },
                Ciphertext { c1: RistrettoPoint::default(), c2: RistrettoPoint::default() },
            ],
            10,
        );
        let err = ceremony
            .submit_shares(TrusteeId(1), vec![(0, RistrettoPoint::default())])
            .unwrap_err();
        assert_eq!(err, DecryptionError::ShareCountMismatch { expected: 2, got: 1 });
    }
}
