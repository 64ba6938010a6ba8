//! Trustee key-generation ceremony (C4): t-of-n Feldman VSS.
//!
//! Grounded on `programs/cloakcraft/src/state/committee.rs`'s
//! `ThresholdCommittee` for the state-machine shape and field naming, and
//! on the `osst` crate's commitment/share verification (`osst::verify`) for
//! the actual Feldman check: a trustee's secret share `s_i` is valid
//! against their public commitment vector `[C_0 .. C_{t-1}]` iff
//! `g^{s_i} == sum_k(C_k ^ (i^k))`. The teacher's own `ElGamalCiphertext`/
//! commitment fields are opaque `[u8; 32]` placeholders with no real group
//! law, so the point arithmetic here uses `curve25519-dalek`'s Ristretto255
//! group the way `osst` does.

use crate::hash::{sha256, Hash};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrusteeId(pub u16);

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum CeremonyPhase {
    Created,
    Registration,
    Commitment,
    Finalized,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("ceremony is in phase {0:?}, operation requires {1:?}")]
    WrongPhase(CeremonyPhaseDebug, CeremonyPhaseDebug),
    #[error("trustee {0:?} is not registered")]
    UnknownTrustee(TrusteeId),
    #[error("trustee {0:?} already submitted a commitment")]
    AlreadyCommitted(TrusteeId),
    #[error("commitment vector has {got} entries, expected threshold {expected}")]
    WrongCommitmentLength { got: usize, expected: u16 },
    #[error("commitment hash does not match the submitted point list")]
    CommitmentHashMismatch,
    #[error("registry is full: {registered}/{n} trustees already registered")]
    RegistryFull { registered: usize, n: u16 },
    #[error("threshold {threshold} exceeds trustee count {n}")]
    InvalidThreshold { threshold: u16, n: u16 },
}

/// Debug-friendly copy of `CeremonyPhase` so it can be embedded in an error
/// without fighting `thiserror`'s `Display` derive over a non-`Display` enum.
pub type CeremonyPhaseDebug = CeremonyPhase;

impl std::fmt::Debug for CeremonyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CeremonyPhase::Created => "Created",
            CeremonyPhase::Registration => "Registration",
            CeremonyPhase::Commitment => "Commitment",
            CeremonyPhase::Finalized => "Finalized",
        };
        f.write_str(s)
    }
}

struct TrusteeCommitment {
    points: Vec<RistrettoPoint>,
}

#[derive(Debug, Clone)]
pub struct RegisteredTrustee {
    pub id: TrusteeId,
    pub display_name: String,
    pub enrollment_pubkey: Vec<u8>,
}

/// One trustee's t-of-n key-generation ceremony.
pub struct ThresholdCeremony {
    pub id: Uuid,
    pub n: u16,
    pub threshold: u16,
    phase: CeremonyPhase,
    registered: Vec<RegisteredTrustee>,
    commitments: BTreeMap<TrusteeId, TrusteeCommitment>,
    public_key: Option<RistrettoPoint>,
}

impl ThresholdCeremony {
    pub fn new(id: Uuid, n: u16, threshold: u16) -> Result<Self, ThresholdError> {
        if threshold == 0 || threshold > n {
            return Err(ThresholdError::InvalidThreshold { threshold, n });
        }
        Ok(Self {
            id,
            n,
            threshold,
            phase: CeremonyPhase::Created,
            registered: Vec::new(),
            commitments: BTreeMap::new(),
            public_key: None,
        })
    }

    pub fn phase(&self) -> CeremonyPhase {
        self.phase
    }

    pub fn open_registration(&mut self) -> Result<(), ThresholdError> {
        self.require_phase(CeremonyPhase::Created)?;
        self.phase = CeremonyPhase::Registration;
        Ok(())
    }

    /// Registers a trustee and assigns it the next share index in
    /// registration order (`current count + 1`).
    pub fn register_trustee(
        &mut self,
        display_name: impl Into<String>,
        enrollment_pubkey: Vec<u8>,
    ) -> Result<TrusteeId, ThresholdError> {
        self.require_phase(CeremonyPhase::Registration)?;
        if self.registered.len() >= self.n as usize {
            return Err(ThresholdError::RegistryFull {
                registered: self.registered.len(),
                n: self.n,
            });
        }
        let id = TrusteeId(self.registered.len() as u16 + 1);
        self.registered.push(RegisteredTrustee {
            id,
            display_name: display_name.into(),
            enrollment_pubkey,
        });
        if self.registered.len() == self.n as usize {
            self.phase = CeremonyPhase::Commitment;
        }
        Ok(id)
    }

    pub fn trustees(&self) -> &[RegisteredTrustee] {
        &self.registered
    }

    fn is_registered(&self, trustee: TrusteeId) -> bool {
        self.registered.iter().any(|t| t.id == trustee)
    }

    /// Submit a trustee's Feldman commitment vector: `threshold` Ristretto
    /// points, `points[0]` being the commitment to that trustee's share of
    /// the secret (`g^{a_0}`). `commitment_hash` must equal the SHA-256 of
    /// the points' compressed bytes concatenated in order.
    pub fn submit_commitment(
        &mut self,
        trustee: TrusteeId,
        commitment_hash: Hash,
        points: Vec<RistrettoPoint>,
    ) -> Result<(), ThresholdError> {
        self.require_phase(CeremonyPhase::Commitment)?;
        if !self.is_registered(trustee) {
            return Err(ThresholdError::UnknownTrustee(trustee));
        }
        if self.commitments.contains_key(&trustee) {
            return Err(ThresholdError::AlreadyCommitted(trustee));
        }
        if points.len() != self.threshold as usize {
            return Err(ThresholdError::WrongCommitmentLength {
                got: points.len(),
                expected: self.threshold,
            });
        }
        let mut serialized = Vec::with_capacity(points.len() * 32);
        for point in &points {
            serialized.extend_from_slice(point.compress().as_bytes());
        }
        if sha256(&serialized) != commitment_hash {
            return Err(ThresholdError::CommitmentHashMismatch);
        }
        self.commitments.insert(trustee, TrusteeCommitment { points });

        if self.commitments.len() == self.n as usize {
            self.finalize();
        }
        Ok(())
    }

    fn finalize(&mut self) {
        let sum = self
            .commitments
            .values()
            .map(|c| c.points[0])
            .fold(RistrettoPoint::default(), |acc, p| acc + p);
        self.public_key = Some(sum);
        self.phase = CeremonyPhase::Finalized;
    }

    /// The combined election public key, once finalized.
    pub fn public_key(&self) -> Option<&RistrettoPoint> {
        self.public_key.as_ref()
    }

    /// Verify a trustee's secret share against their published commitment:
    /// `g^{s_i} == sum_k(C_k ^ (i^k mod order))`.
    pub fn verify_share(
        &self,
        trustee: TrusteeId,
        share: &Scalar,
        basepoint: &RistrettoPoint,
    ) -> Result<bool, ThresholdError> {
        let commitment = self
            .commitments
            .get(&trustee)
            .ok_or(ThresholdError::UnknownTrustee(trustee))?;

        let x = Scalar::from(trustee.0 as u64);
        let mut expected = RistrettoPoint::default();
        let mut x_power = Scalar::ONE;
        for point in &commitment.points {
            expected += point * x_power;
            x_power *= x;
        }

        Ok(basepoint * share == expected)
    }

    fn require_phase(&self, expected: CeremonyPhase) -> Result<(), ThresholdError> {
        if self.phase != expected {
            return Err(ThresholdError::WrongPhase(self.phase, expected));
        }
        Ok(())
    }
}

/// Placeholder until the decryption ceremony needs it too; kept distinct
/// from a raw `RistrettoPoint` so call sites read as "a ledger hash of the
/// finalized key", not the key material itself.
pub fn public_key_fingerprint(point: &RistrettoPoint) -> Hash {
    crate::hash::sha256(point.compress().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
    use rand::rngs::OsRng;

    fn sample_ceremony(n: u16, threshold: u16) -> ThresholdCeremony {
        let mut c = ThresholdCeremony::new(Uuid::nil(), n, threshold).unwrap();
        c.open_registration().unwrap();
        for i in 1..=n {
            let id = c.register_trustee(format!("trustee {i}"), vec![]).unwrap();
            assert_eq!(id, TrusteeId(i));
        }
        c
    }

    fn commit(coeffs: &[Scalar]) -> Vec<RistrettoPoint> {
        coeffs.iter().map(|c| G * c).collect()
    }

    fn commitment_hash(points: &[RistrettoPoint]) -> Hash {
        let mut serialized = Vec::with_capacity(points.len() * 32);
        for point in points {
            serialized.extend_from_slice(point.compress().as_bytes());
        }
        sha256(&serialized)
    }

    fn eval(coeffs: &[Scalar], x: u16) -> Scalar {
        let x = Scalar::from(x as u64);
        let mut acc = Scalar::ZERO;
        let mut power = Scalar::ONE;
        for c in coeffs {
            acc += c * power;
            power *= x;
        }
        acc
    }

    #[test]
    fn rejects_invalid_threshold() {
        assert!(ThresholdCeremony::new(Uuid::nil(), 3, 0).is_err());
        assert!(ThresholdCeremony::new(Uuid::nil(), 3, 4).is_err());
    }

    #[test]
    fn full_ceremony_reaches_finalized_with_summed_public_key() {
        let mut ceremony = sample_ceremony(3, 2);
        assert_eq!(ceremony.phase(), CeremonyPhase::Commitment);

        let mut rng = OsRng;
        let mut expected_pk = RistrettoPoint::default();
        for i in 1..=3u16 {
            let coeffs = vec![Scalar::random(&mut rng), Scalar::random(&mut rng)];
            expected_pk += G * coeffs[0];
            let points = commit(&coeffs);
            let hash = commitment_hash(&points);
            ceremony
                .submit_commitment(TrusteeId(i), hash, points)
                .unwrap();
        }

        assert_eq!(ceremony.phase(), CeremonyPhase::Finalized);
        assert_eq!(ceremony.public_key(), Some(&expected_pk));
    }

    #[test]
    fn share_verifies_against_its_own_commitment() {
        let mut ceremony = sample_ceremony(3, 2);
        let coeffs = vec![Scalar::from(7u64), Scalar::from(3u64)];
        let points = commit(&coeffs);
        let hash = commitment_hash(&points);
        ceremony
            .submit_commitment(TrusteeId(1), hash, points)
            .unwrap();

        let share = eval(&coeffs, 1);
        assert!(ceremony.verify_share(TrusteeId(1), &share, &G).unwrap());

        let wrong_share = share + Scalar::ONE;
        assert!(!ceremony.verify_share(TrusteeId(1), &wrong_share, &G).unwrap());
    }

    #[test]
    fn wrong_commitment_length_rejected() {
        let mut ceremony = sample_ceremony(2, 2);
        let points = commit(&[Scalar::ONE]);
        let hash = commitment_hash(&points);
        let err = ceremony
            .submit_commitment(TrusteeId(1), hash, points)
            .unwrap_err();
        assert_eq!(
            err,
            ThresholdError::WrongCommitmentLength { got: 1, expected: 2 }
        );
    }

    #[test]
    fn wrong_commitment_hash_rejected() {
        let mut ceremony = sample_ceremony(2, 2);
        let points = commit(&[Scalar::ONE, Scalar::from(2u64)]);
        let err = ceremony
            .submit_commitment(TrusteeId(1), [0u8; 32], points)
            .unwrap_err();
        assert_eq!(err, ThresholdError::CommitmentHashMismatch);
    }

    #[test]
    fn share_indices_are_assigned_in_registration_order() {
        let mut ceremony = ThresholdCeremony::new(Uuid::nil(), 3, 2).unwrap();
        ceremony.open_registration().unwrap();
        assert_eq!(
            ceremony.register_trustee("alice", vec![]).unwrap(),
            TrusteeId(1)
        );
        assert_eq!(
            ceremony.register_trustee("bob", vec![]).unwrap(),
            TrusteeId(2)
        );
    }

    #[test]
    fn registry_full_once_n_trustees_registered() {
        let mut ceremony = ThresholdCeremony::new(Uuid::nil(), 1, 1).unwrap();
        ceremony.open_registration().unwrap();
        ceremony.register_trustee("alice", vec![]).unwrap();
        assert_eq!(ceremony.phase(), CeremonyPhase::Commitment);
        assert_eq!(
            ceremony.register_trustee("bob", vec![]).unwrap_err(),
            ThresholdError::RegistryFull { registered: 1, n: 1 }
        );
    }
}
