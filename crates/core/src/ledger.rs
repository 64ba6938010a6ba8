//! Ledger manager (C7): the append path every accepted ballot goes
//! through.
//!
//! Enforces the one ordering rule that keeps the nullifier set and the
//! Merkle tree from drifting apart: the nullifier is checked and consumed
//! *before* the leaf is appended, never after. Checking the tree first
//! would let two concurrent double-votes both pass the nullifier check
//! against stale state and both get appended; consuming the nullifier
//! first makes the second caller fail atomically with no partial leaf
//! ever written for it.
//!
//! The blob write is the opposite story: once the nullifier is consumed
//! and the leaf is in the tree, the vote is durable — a blob-store outage
//! must not unwind either of those. The blob write therefore happens
//! after the leaf append and is fire-and-forget (`tokio::spawn`), logged
//! on failure rather than propagated.

use crate::batch::{BatchConfig, BatchQueue};
use crate::blob::{BlobError, BlobWriter};
use crate::ceremony::decryption::Ciphertext;
use crate::hash::{leaf_hash, Hash};
use crate::merkle::{InclusionProof, MerkleError, MerkleTree};
use crate::nullifier::{NullifierSet, SpendLocation};
use crate::tally::{self, TallyError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("nullifier already spent")]
    DoubleVote,
    #[error("unknown question {0}")]
    UnknownQuestion(Uuid),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("stored ballot could not be decoded: {0}")]
    BallotDecode(String),
}

impl From<TallyError> for LedgerError {
    fn from(err: TallyError) -> Self {
        LedgerError::BallotDecode(err.to_string())
    }
}

#[derive(Clone)]
pub struct AcceptedBallot {
    pub position: u64,
    pub proof: InclusionProof,
}

/// One ballot queued for the batch flush worker (C6). Carries everything
/// [`LedgerManager::append`] would otherwise take as separate arguments,
/// since the worker groups a flushed batch by `question_id` and needs each
/// item self-describing.
pub struct VoteJob {
    pub question_id: Uuid,
    pub nullifier: Hash,
    pub commitment: Hash,
    pub encrypted_ballot: Vec<u8>,
}

/// Owns one Merkle tree per ballot question plus the election-wide
/// nullifier set and blob writer. One instance per election.
pub struct LedgerManager {
    election_id: Uuid,
    trees: Mutex<HashMap<Uuid, MerkleTree>>,
    nullifiers: Arc<NullifierSet>,
    blobs: Arc<dyn BlobWriter>,
    /// Blob keys for every accepted ballot, in append order, per question.
    /// Populated alongside the Merkle leaf so the decryption ceremony can
    /// later read every ballot back in the same order the tree holds them.
    blob_keys: Mutex<HashMap<Uuid, Vec<String>>>,
}

impl LedgerManager {
    pub fn new(election_id: Uuid, blobs: Arc<dyn BlobWriter>) -> Self {
        Self {
            election_id,
            trees: Mutex::new(HashMap::new()),
            nullifiers: Arc::new(NullifierSet::new()),
            blobs,
            blob_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_question(&self, question_id: Uuid) {
        self.trees
            .lock()
            .expect("ledger trees lock poisoned")
            .entry(question_id)
            .or_insert_with(MerkleTree::new);
        self.blob_keys
            .lock()
            .expect("ledger blob_keys lock poisoned")
            .entry(question_id)
            .or_default();
    }

    pub fn nullifiers(&self) -> Arc<NullifierSet> {
        self.nullifiers.clone()
    }

    fn blob_key(&self, question_id: Uuid, nullifier: &Hash) -> String {
        format!("{}/{}/{}", self.election_id, question_id, hex::encode(nullifier))
    }

    /// Persist a ballot blob without letting the write's outcome affect the
    /// caller: the vote is already durable in the Merkle tree by the time
    /// this is called.
    fn spawn_blob_write(&self, key: String, data: Vec<u8>) {
        let blobs = self.blobs.clone();
        tokio::spawn(async move {
            if let Err(err) = blobs.put(&key, data).await {
                tracing::error!(blob_key = %key, error = %err, "ballot blob write failed");
            }
        });
    }

    fn record_blob_key(&self, question_id: Uuid, key: String) {
        self.blob_keys
            .lock()
            .expect("ledger blob_keys lock poisoned")
            .entry(question_id)
            .or_default()
            .push(key);
    }

    /// Append one ballot: checks and consumes its nullifier, appends a leaf
    /// hashing the commitment, nullifier, and submission time together,
    /// then writes the encrypted ballot blob behind it.
    #[instrument(skip(self, encrypted_ballot), fields(election_id = %self.election_id, question_id = %question_id))]
    pub async fn append(
        &self,
        question_id: Uuid,
        nullifier: Hash,
        commitment: Hash,
        encrypted_ballot: Vec<u8>,
    ) -> Result<AcceptedBallot, LedgerError> {
        let position_hint = {
            let trees = self.trees.lock().expect("ledger trees lock poisoned");
            trees
                .get(&question_id)
                .ok_or(LedgerError::UnknownQuestion(question_id))?
                .size()
        };

        let spend_location = SpendLocation {
            question_id,
            position: position_hint,
        };
        if !self.nullifiers.consume(nullifier, spend_location) {
            return Err(LedgerError::DoubleVote);
        }

        let timestamp = now_unix();
        let leaf = leaf_hash(&commitment, &nullifier, timestamp);

        let (position, proof) = {
            let mut trees = self.trees.lock().expect("ledger trees lock poisoned");
            let tree = trees
                .get_mut(&question_id)
                .ok_or(LedgerError::UnknownQuestion(question_id))?;
            tree.append(leaf)?
        };

        let blob_key = self.blob_key(question_id, &nullifier);
        self.record_blob_key(question_id, blob_key.clone());
        self.spawn_blob_write(blob_key, encrypted_ballot);

        Ok(AcceptedBallot { position, proof })
    }

    /// Appends one answer per question for a ballot that shares a single
    /// nullifier across all of them (§6's `POST /api/vote/ballot`): the
    /// nullifier is consumed exactly once, then one leaf is appended per
    /// `(question_id, commitment, encrypted_ballot)` triple.
    ///
    /// Known simplification: `SpendLocation` records only the first
    /// answered question's id, since one nullifier spans several questions
    /// here but a spend location is tracked per-nullifier, not per-question.
    #[instrument(skip(self, answers), fields(election_id = %self.election_id))]
    pub async fn append_multi(
        &self,
        nullifier: Hash,
        answers: Vec<(Uuid, Hash, Vec<u8>)>,
    ) -> Result<Vec<(Uuid, AcceptedBallot)>, LedgerError> {
        let first_question_id = answers
            .first()
            .map(|(qid, _, _)| *qid)
            .unwrap_or(self.election_id);
        let spend_location = SpendLocation {
            question_id: first_question_id,
            position: 0,
        };
        if !self.nullifiers.consume(nullifier, spend_location) {
            return Err(LedgerError::DoubleVote);
        }

        let mut results = Vec::with_capacity(answers.len());
        let timestamp = now_unix();
        for (question_id, commitment, encrypted_ballot) in answers {
            let leaf = leaf_hash(&commitment, &nullifier, timestamp);
            let (position, proof) = {
                let mut trees = self.trees.lock().expect("ledger trees lock poisoned");
                let tree = trees
                    .get_mut(&question_id)
                    .ok_or(LedgerError::UnknownQuestion(question_id))?;
                tree.append(leaf)?
            };

            let blob_key = self.blob_key(question_id, &nullifier);
            self.record_blob_key(question_id, blob_key.clone());
            self.spawn_blob_write(blob_key, encrypted_ballot);

            results.push((question_id, AcceptedBallot { position, proof }));
        }
        Ok(results)
    }

    /// Append many ballots for the same question at once, atomically
    /// against the Merkle tree: nullifiers are consumed one at a time (so
    /// double-votes inside the same batch are rejected individually), but
    /// every surviving leaf lands behind a single tree mutation and a
    /// single resulting root, exactly as [`crate::merkle::MerkleTree::append_batch`]
    /// gives us. Blob writes, as in `append`, are fire-and-forget.
    #[instrument(skip(self, entries), fields(election_id = %self.election_id, question_id = %question_id))]
    pub fn append_batch(
        &self,
        question_id: Uuid,
        entries: Vec<(Hash, Hash, Vec<u8>)>,
    ) -> Result<Vec<Result<AcceptedBallot, LedgerError>>, LedgerError> {
        let mut trees = self.trees.lock().expect("ledger trees lock poisoned");
        let tree = trees
            .get_mut(&question_id)
            .ok_or(LedgerError::UnknownQuestion(question_id))?;

        let timestamp = now_unix();
        let mut next_position = tree.size();
        let mut leaves = Vec::with_capacity(entries.len());
        // Per-entry outcome, `None` placeholder for rejected entries that
        // don't get a tree slot.
        let mut outcomes: Vec<Option<Result<(), LedgerError>>> = Vec::with_capacity(entries.len());
        let mut accepted_blobs = Vec::new();

        for (nullifier, commitment, encrypted_ballot) in entries {
            let spend_location = SpendLocation {
                question_id,
                position: next_position,
            };
            if !self.nullifiers.consume(nullifier, spend_location) {
                outcomes.push(Some(Err(LedgerError::DoubleVote)));
                continue;
            }
            let leaf = leaf_hash(&commitment, &nullifier, timestamp);
            leaves.push(leaf);
            let blob_key = self.blob_key(question_id, &nullifier);
            accepted_blobs.push((blob_key, encrypted_ballot));
            outcomes.push(None);
            next_position += 1;
        }

        let proofs = if leaves.is_empty() {
            Vec::new()
        } else {
            tree.append_batch(&leaves)?
        };
        drop(trees);

        let mut proofs = proofs.into_iter();
        let mut blobs = accepted_blobs.into_iter();
        let results = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                Some(Err(err)) => Err(err),
                Some(Ok(())) => unreachable!("placeholder is never Ok"),
                None => {
                    let (position, proof) = proofs.next().expect("one proof per accepted leaf");
                    let (blob_key, blob_data) = blobs.next().expect("one blob per accepted leaf");
                    self.record_blob_key(question_id, blob_key.clone());
                    self.spawn_blob_write(blob_key, blob_data);
                    Ok(AcceptedBallot { position, proof })
                }
            })
            .collect();

        Ok(results)
    }

    /// Spawn a batch-flush worker backed by this ledger. Ballots enqueued
    /// here are grouped by `question_id` at flush time and appended via
    /// [`Self::append_batch`], one Merkle mutation per question per flush.
    pub fn spawn_batch_queue(self: Arc<Self>, config: BatchConfig) -> BatchQueue<VoteJob, Result<AcceptedBallot, LedgerError>> {
        BatchQueue::spawn(config, move |jobs: Vec<VoteJob>| {
            let mut by_question: HashMap<Uuid, Vec<usize>> = HashMap::new();
            for (idx, job) in jobs.iter().enumerate() {
                by_question.entry(job.question_id).or_default().push(idx);
            }

            let mut results: Vec<Option<Result<AcceptedBallot, LedgerError>>> =
                (0..jobs.len()).map(|_| None).collect();
            let mut jobs: Vec<Option<VoteJob>> = jobs.into_iter().map(Some).collect();

            for (question_id, indices) in by_question {
                let entries: Vec<(Hash, Hash, Vec<u8>)> = indices
                    .iter()
                    .map(|&idx| {
                        let job = jobs[idx].take().expect("each index visited once");
                        (job.nullifier, job.commitment, job.encrypted_ballot)
                    })
                    .collect();

                match self.append_batch(question_id, entries) {
                    Ok(outcomes) => {
                        for (idx, outcome) in indices.into_iter().zip(outcomes) {
                            results[idx] = Some(outcome);
                        }
                    }
                    Err(err) => {
                        for idx in indices {
                            // `LedgerError` isn't `Clone`; the group-level
                            // error (unknown question) applies identically
                            // to every item in the group.
                            results[idx] = Some(Err(match &err {
                                LedgerError::UnknownQuestion(qid) => LedgerError::UnknownQuestion(*qid),
                                _ => LedgerError::UnknownQuestion(question_id),
                            }));
                        }
                    }
                }
            }

            results
                .into_iter()
                .map(|r| r.expect("every index assigned a result"))
                .collect()
        })
    }

    pub fn root(&self, question_id: Uuid) -> Result<Hash, LedgerError> {
        let trees = self.trees.lock().expect("ledger trees lock poisoned");
        Ok(trees
            .get(&question_id)
            .ok_or(LedgerError::UnknownQuestion(question_id))?
            .root())
    }

    pub fn proof(&self, question_id: Uuid, position: u64) -> Result<InclusionProof, LedgerError> {
        let trees = self.trees.lock().expect("ledger trees lock poisoned");
        let tree = trees
            .get(&question_id)
            .ok_or(LedgerError::UnknownQuestion(question_id))?;
        Ok(tree.proof(position)?)
    }

    pub fn size(&self, question_id: Uuid) -> Result<u64, LedgerError> {
        let trees = self.trees.lock().expect("ledger trees lock poisoned");
        Ok(trees
            .get(&question_id)
            .ok_or(LedgerError::UnknownQuestion(question_id))?
            .size())
    }

    /// Total ballots across every question this election tracks.
    pub fn total_size(&self, question_order: &[Uuid]) -> Result<u64, LedgerError> {
        let trees = self.trees.lock().expect("ledger trees lock poisoned");
        question_order.iter().try_fold(0u64, |acc, qid| {
            let tree = trees
                .get(qid)
                .ok_or(LedgerError::UnknownQuestion(*qid))?;
            Ok(acc + tree.size())
        })
    }

    /// The aggregate root used by §4.8's close payload and the election-wide
    /// stats/root endpoints: a single question's own root, or a Merkle root
    /// built over each question's root (in display order) when there are
    /// several.
    pub fn aggregate_root(&self, question_order: &[Uuid]) -> Result<Hash, LedgerError> {
        let roots = {
            let trees = self.trees.lock().expect("ledger trees lock poisoned");
            question_order
                .iter()
                .map(|qid| {
                    trees
                        .get(qid)
                        .map(|tree| tree.root())
                        .ok_or(LedgerError::UnknownQuestion(*qid))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        match roots.as_slice() {
            [] => Ok(crate::merkle::empty_root()),
            [only] => Ok(*only),
            _ => {
                let mut of_roots = MerkleTree::new();
                of_roots.append_batch(&roots)?;
                Ok(of_roots.root())
            }
        }
    }

    /// Read every accepted ballot for `question_id` back out of the blob
    /// store, decode each as `num_candidates` per-candidate ciphertexts,
    /// and homomorphically sum them into one aggregate ciphertext per
    /// candidate — the input the decryption ceremony combines against.
    ///
    /// Unlike `append`'s blob write, this read is awaited and its errors
    /// propagate: a missing or corrupt ballot blob here is a precondition
    /// failure for starting decryption, not a write-behind best-effort.
    #[instrument(skip(self), fields(election_id = %self.election_id, question_id = %question_id))]
    pub async fn aggregate_ballot_ciphertexts(
        &self,
        question_id: Uuid,
        num_candidates: usize,
    ) -> Result<Vec<Ciphertext>, LedgerError> {
        let keys = self
            .blob_keys
            .lock()
            .expect("ledger blob_keys lock poisoned")
            .get(&question_id)
            .cloned()
            .ok_or(LedgerError::UnknownQuestion(question_id))?;

        let mut ballots = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = self
                .blobs
                .get(&key)
                .await?
                .ok_or_else(|| LedgerError::BallotDecode(format!("missing blob {key}")))?;
            ballots.push(tally::decode_ballot(&bytes, num_candidates)?);
        }

        Ok(tally::aggregate(ballots, num_candidates)?)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobWriter;
    use crate::hash::sha256;

    fn ledger() -> (LedgerManager, Uuid) {
        let election_id = Uuid::nil();
        let blobs = Arc::new(InMemoryBlobWriter::new(64));
        let ledger = LedgerManager::new(election_id, blobs);
        let question_id = Uuid::from_u128(1);
        ledger.register_question(question_id);
        (ledger, question_id)
    }

    #[tokio::test]
    async fn accepted_ballot_proof_verifies_against_current_root() {
        let (ledger, question_id) = ledger();
        let nullifier = sha256(b"voter-1");
        let leaf = sha256(b"commitment-1");

        let accepted = ledger
            .append(question_id, nullifier, leaf, b"ciphertext".to_vec())
            .await
            .unwrap();

        assert_eq!(accepted.position, 0);
        assert!(accepted.proof.verify());
        assert_eq!(accepted.proof.root, ledger.root(question_id).unwrap());
    }

    #[tokio::test]
    async fn double_vote_is_rejected_and_leaf_not_appended() {
        let (ledger, question_id) = ledger();
        let nullifier = sha256(b"voter-1");

        ledger
            .append(question_id, nullifier, sha256(b"commitment-1"), vec![])
            .await
            .unwrap();
        let size_after_first = ledger.size(question_id).unwrap();

        let err = ledger
            .append(question_id, nullifier, sha256(b"commitment-2"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DoubleVote));
        assert_eq!(ledger.size(question_id).unwrap(), size_after_first);
    }

    #[tokio::test]
    async fn unknown_question_rejected() {
        let (ledger, _) = ledger();
        let err = ledger
            .append(Uuid::from_u128(99), sha256(b"n"), sha256(b"l"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownQuestion(_)));
    }

    #[tokio::test]
    async fn blob_failure_does_not_unwind_an_already_appended_vote() {
        let election_id = Uuid::nil();
        let blobs = Arc::new(InMemoryBlobWriter::new(0));
        let ledger = LedgerManager::new(election_id, blobs);
        let question_id = Uuid::from_u128(1);
        ledger.register_question(question_id);

        let accepted = ledger
            .append(question_id, sha256(b"voter-1"), sha256(b"commitment-1"), vec![0u8; 1024])
            .await
            .unwrap();

        assert_eq!(accepted.position, 0);
        assert_eq!(ledger.size(question_id).unwrap(), 1);
    }

    #[test]
    fn append_batch_appends_all_leaves_against_one_root() {
        let election_id = Uuid::nil();
        let blobs = Arc::new(InMemoryBlobWriter::new(64));
        let ledger = LedgerManager::new(election_id, blobs);
        let question_id = Uuid::from_u128(1);
        ledger.register_question(question_id);

        let entries = vec![
            (sha256(b"n1"), sha256(b"c1"), vec![]),
            (sha256(b"n2"), sha256(b"c2"), vec![]),
            (sha256(b"n1"), sha256(b"c3"), vec![]), // double-vote
        ];
        let results = ledger.append_batch(question_id, entries).unwrap();

        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(LedgerError::DoubleVote)));
        assert_eq!(ledger.size(question_id).unwrap(), 2);
        assert_eq!(results[0].as_ref().unwrap().position, 0);
        assert_eq!(results[1].as_ref().unwrap().position, 1);
    }

    #[tokio::test]
    async fn spawn_batch_queue_resolves_each_caller_with_its_own_result() {
        let election_id = Uuid::nil();
        let blobs = Arc::new(InMemoryBlobWriter::new(64));
        let ledger = Arc::new(LedgerManager::new(election_id, blobs));
        let question_id = Uuid::from_u128(1);
        ledger.register_question(question_id);

        let queue = ledger.clone().spawn_batch_queue(BatchConfig {
            batch_size: 2,
            flush_interval: std::time::Duration::from_secs(60),
            backlog_limit: 16,
        });

        let job1 = VoteJob {
            question_id,
            nullifier: sha256(b"voter-a"),
            commitment: sha256(b"commitment-a"),
            encrypted_ballot: vec![],
        };
        let job2 = VoteJob {
            question_id,
            nullifier: sha256(b"voter-b"),
            commitment: sha256(b"commitment-b"),
            encrypted_ballot: vec![],
        };

        let q1 = queue.clone();
        let q2 = queue.clone();
        let h1 = tokio::spawn(async move { q1.enqueue(job1).await });
        let h2 = tokio::spawn(async move { q2.enqueue(job2).await });

        let r1 = h1.await.unwrap().unwrap().unwrap();
        let r2 = h2.await.unwrap().unwrap().unwrap();

        assert_ne!(r1.position, r2.position);
        assert_eq!(ledger.size(question_id).unwrap(), 2);
    }

    #[tokio::test]
    async fn aggregate_ballot_ciphertexts_sums_one_hot_ballots() {
        use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT as G;
        use curve25519_dalek::scalar::Scalar;

        let election_id = Uuid::nil();
        let blobs = Arc::new(InMemoryBlobWriter::new(64));
        let ledger = LedgerManager::new(election_id, blobs);
        let question_id = Uuid::from_u128(1);
        ledger.register_question(question_id);

        let one = Ciphertext { c1: G, c2: G * Scalar::from(7u64) };
        let zero = Ciphertext { c1: curve25519_dalek::ristretto::RistrettoPoint::default(), c2: curve25519_dalek::ristretto::RistrettoPoint::default() };

        // Ballot A votes for candidate 0, ballot B votes for candidate 1.
        let ballot_a = tally::encode_ballot(&[one, zero]);
        let ballot_b = tally::encode_ballot(&[zero, one]);

        ledger.append(question_id, sha256(b"voter-a"), sha256(b"commitment-a"), ballot_a).await.unwrap();
        // Blob writes are fire-and-forget; give the spawned task a turn.
        tokio::task::yield_now().await;
        ledger.append(question_id, sha256(b"voter-b"), sha256(b"commitment-b"), ballot_b).await.unwrap();
        tokio::task::yield_now().await;

        let totals = ledger.aggregate_ballot_ciphertexts(question_id, 2).await.unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].c1, G);
        assert_eq!(totals[1].c1, G);
    }
}
