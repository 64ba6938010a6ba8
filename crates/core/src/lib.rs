//! Vote ingestion, Merkle ledger, and threshold-ceremony core.
//!
//! This crate is transport-agnostic: it has no notion of HTTP, request
//! bodies, or JSON over the wire. `voteserver` is the thin layer that maps
//! an HTTP surface onto the operations exposed here.

pub mod anchor;
pub mod batch;
pub mod blob;
pub mod ceremony;
pub mod election;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod merkle;
pub mod nullifier;
pub mod registry;
pub mod tally;
pub mod verifier;

pub use error::CoreError;
pub use registry::Registry;
