//! Trustee ceremonies: key generation (C4) and tally decryption (C5).

pub mod decryption;
pub mod threshold;
