// SPDX-License-Identifier: AGPL-3.0-only
#![forbid(unsafe_code)]
#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]

pub mod bls;
pub mod pospace;

pub use bls::{
    bls_keygen_from_ikm, bls_pk_from_bytes, bls_sign, bls_verify, bls_verify_batch, BlsKeypair,
    BlsPublicKey, BlsSecretKey,
};
pub use pospace::{
    proof_verify, proof_verify_batch, ProofError, ProofMetadata, ProofVerifyParams,
    DEFAULT_SUB_SLOT_ITERS, K_SIZE_MAX, K_SIZE_MIN, MAX_PROOF_BYTES, MIN_PROOF_BYTES,
};

pub type Hash32 = [u8; 32];

/// Compute BLAKE3-256 (32 bytes) digest
pub fn blake3_32(data: &[u8]) -> Hash32 {
    use blake3::Hasher;
    let mut hasher = Hasher::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

/// SHA-256 (32 Bytes); Cache-Schlüssel laut Protokoll nutzen SHA-256, nicht BLAKE3.
pub fn sha256_32(data: &[u8]) -> Hash32 {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Domain-separierter BLAKE3-Digest: H(domain || bytes)
pub fn digest_with_domain(domain: &[u8], bytes: &[u8]) -> Hash32 {
    let mut buf = Vec::with_capacity(domain.len() + bytes.len());
    buf.extend_from_slice(domain);
    buf.extend_from_slice(bytes);
    blake3_32(&buf)
}
