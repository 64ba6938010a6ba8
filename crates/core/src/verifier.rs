//! Proof verification seam.
//!
//! Ballot validity (range proofs on the encrypted vote, credential
//! blind-signature checks) is delegated to pluggable verifiers rather than
//! hard-wired to one proof system, mirroring how `programs/cloakcraft`
//! keeps its verification-key state (`state/verification_key.rs`) separate
//! from the instruction that consumes it. This crate only defines the
//! narrow interface; the actual SNARK/range-proof/signature math lives
//! behind whichever implementation a deployment wires in.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofKind {
    /// Proves the encrypted ballot encodes exactly one of the question's
    /// valid options, without revealing which.
    BallotWellFormedness,
    /// Proves the voter holds a valid, unused credential for this
    /// election without revealing which credential.
    CredentialBlindSignature,
}

pub trait ProofVerifier: Send + Sync {
    fn kind(&self) -> ProofKind;

    /// `public_inputs` and `proof` are opaque, serialized forms; this
    /// crate never interprets their contents, only routes them to the
    /// matching verifier.
    fn verify(&self, public_inputs: &[u8], proof: &[u8]) -> bool;
}

/// Verifier that accepts anything, for tests and for question types whose
/// Non-goals (write-in questions, see spec notes on open questions) exclude
/// a well-formedness proof entirely.
pub struct AcceptAllVerifier(pub ProofKind);

impl ProofVerifier for AcceptAllVerifier {
    fn kind(&self) -> ProofKind {
        self.0
    }

    fn verify(&self, _public_inputs: &[u8], _proof: &[u8]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_all_verifier_always_passes() {
        let v = AcceptAllVerifier(ProofKind::BallotWellFormedness);
        assert!(v.verify(b"anything", b"anything"));
        assert_eq!(v.kind(), ProofKind::BallotWellFormedness);
    }
}
