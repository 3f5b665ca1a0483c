// SPDX-License-Identifier: AGPL-3.0-only

use crate::Hash32;
use core::fmt;

/// Zulässiger Plot-Parameter k
pub const K_SIZE_MIN: u8 = 25;
pub const K_SIZE_MAX: u8 = 50;

/// Proof-Blob: mindestens plot_id (32) + quality-Feld, höchstens 368 Bytes
pub const MIN_PROOF_BYTES: usize = 32;
pub const MAX_PROOF_BYTES: usize = 368;

/// Sub-Slot-Iterationen des Pools (Chain-Konstante)
pub const DEFAULT_SUB_SLOT_ITERS: u64 = 37_600_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofVerifyParams {
    pub challenge: Hash32,
    pub k_size: u8,
    pub sub_slot_iters: u64,
    pub difficulty: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofMetadata {
    pub plot_id: Hash32,
    pub quality: u64,
    pub iterations: u64,
    pub k_size: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofError {
    InvalidFormat,
    InvalidQuality,
    InvalidIterations,
    InvalidKSize,
}

impl fmt::Display for ProofError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat => f.write_str("invalid proof format"),
            Self::InvalidQuality => f.write_str("invalid proof quality"),
            Self::InvalidIterations => f.write_str("invalid proof iterations"),
            Self::InvalidKSize => f.write_str("invalid plot k-size"),
        }
    }
}

impl std::error::Error for ProofError {}

fn quality_from_proof(proof: &[u8]) -> Result<u64, ProofError> {
    let head = proof.get(..8).ok_or(ProofError::InvalidQuality)?;
    let mut b = [0u8; 8];
    b.copy_from_slice(head);
    let q = u64::from_le_bytes(b);
    // Qualität 0 wird auf das Minimum normalisiert
    Ok(if q == 0 { 1 } else { q })
}

fn plot_id_from_proof(proof: &[u8]) -> Result<Hash32, ProofError> {
    let head = proof.get(..32).ok_or(ProofError::InvalidFormat)?;
    let mut id = [0u8; 32];
    id.copy_from_slice(head);
    Ok(id)
}

/// Iterationsformel der Chain: (sub_slot_iters * difficulty / quality) / 10^6,
/// mit u128-Zwischenschritt gegen Überlauf.
fn iterations_for(quality: u64, difficulty: u64, sub_slot_iters: u64) -> Result<u64, ProofError> {
    if difficulty == 0 || sub_slot_iters == 0 {
        return Err(ProofError::InvalidIterations);
    }
    let numerator = (sub_slot_iters as u128) * (difficulty as u128);
    let raw = numerator / (quality as u128);
    let scaled = raw / 1_000_000u128;
    Ok(scaled.min(u64::MAX as u128) as u64)
}

/// Verifiziert einen Proof-of-Space-Blob gegen die Pool-Parameter.
///
/// Reihenfolge der Prüfungen: k-size → Format → Qualität → Iterationen.
/// `points` ist bewusst KEIN Ergebnis dieser Funktion; der Validator rechnet
/// Punkte auf der Accounting-Seite aus quality und Farmer-Difficulty.
pub fn proof_verify(proof: &[u8], params: &ProofVerifyParams) -> Result<ProofMetadata, ProofError> {
    if params.k_size < K_SIZE_MIN || params.k_size > K_SIZE_MAX {
        return Err(ProofError::InvalidKSize);
    }
    if proof.len() < MIN_PROOF_BYTES || proof.len() > MAX_PROOF_BYTES {
        return Err(ProofError::InvalidFormat);
    }
    let quality = quality_from_proof(proof)?;
    let iterations = iterations_for(quality, params.difficulty, params.sub_slot_iters)?;
    let plot_id = plot_id_from_proof(proof)?;
    Ok(ProofMetadata {
        plot_id,
        quality,
        iterations,
        k_size: params.k_size,
    })
}

/// Batch-Variante über parallele Slices; Ergebnis pro Element entspricht dem
/// Skalar-Resultat. Längen-Mismatch liefert eine leere Liste.
pub fn proof_verify_batch(
    proofs: &[&[u8]],
    params: &[ProofVerifyParams],
) -> Vec<Result<ProofMetadata, ProofError>> {
    if proofs.len() != params.len() {
        return Vec::new();
    }
    proofs
        .iter()
        .zip(params.iter())
        .map(|(proof, p)| proof_verify(proof, p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof_with_quality(quality: u64, len: usize) -> Vec<u8> {
        let mut p = vec![0u8; len];
        p[..8].copy_from_slice(&quality.to_le_bytes());
        p
    }

    fn params(k: u8, difficulty: u64) -> ProofVerifyParams {
        ProofVerifyParams {
            challenge: [0x42; 32],
            k_size: k,
            sub_slot_iters: DEFAULT_SUB_SLOT_ITERS,
            difficulty,
        }
    }

    #[test]
    fn k_size_boundaries() {
        let proof = proof_with_quality(1_000_000, 64);
        assert_eq!(
            proof_verify(&proof, &params(24, 1000)).unwrap_err(),
            ProofError::InvalidKSize
        );
        assert!(proof_verify(&proof, &params(25, 1000)).is_ok());
        assert!(proof_verify(&proof, &params(50, 1000)).is_ok());
        assert_eq!(
            proof_verify(&proof, &params(51, 1000)).unwrap_err(),
            ProofError::InvalidKSize
        );
    }

    #[test]
    fn format_bounds() {
        let short = proof_with_quality(5, 31);
        assert_eq!(
            proof_verify(&short, &params(32, 1000)).unwrap_err(),
            ProofError::InvalidFormat
        );
        let long = proof_with_quality(5, MAX_PROOF_BYTES + 1);
        assert_eq!(
            proof_verify(&long, &params(32, 1000)).unwrap_err(),
            ProofError::InvalidFormat
        );
        let max = proof_with_quality(5, MAX_PROOF_BYTES);
        assert!(proof_verify(&max, &params(32, 1000)).is_ok());
    }

    #[test]
    fn zero_quality_normalized_to_one() {
        let proof = proof_with_quality(0, 64);
        let meta = proof_verify(&proof, &params(32, 1000)).unwrap();
        assert_eq!(meta.quality, 1);
    }

    #[test]
    fn iterations_formula() {
        // iterations = (sub_slot_iters * difficulty / quality) / 1e6
        let proof = proof_with_quality(1_000_000, 64);
        let meta = proof_verify(&proof, &params(32, 1000)).unwrap();
        let expect = (DEFAULT_SUB_SLOT_ITERS as u128 * 1000 / 1_000_000) / 1_000_000;
        assert_eq!(meta.iterations, expect as u64);
    }

    #[test]
    fn zero_difficulty_rejected() {
        let proof = proof_with_quality(7, 64);
        assert_eq!(
            proof_verify(&proof, &params(32, 0)).unwrap_err(),
            ProofError::InvalidIterations
        );
    }

    #[test]
    fn plot_id_is_proof_prefix() {
        let mut proof = proof_with_quality(9, 64);
        proof[8..32].fill(0xAB);
        let meta = proof_verify(&proof, &params(32, 10)).unwrap();
        assert_eq!(&meta.plot_id[..8], &9u64.to_le_bytes());
        assert!(meta.plot_id[8..].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn batch_matches_scalar_all_sizes() {
        let proofs: Vec<Vec<u8>> = vec![
            proof_with_quality(1_000_000, 64),
            proof_with_quality(0, 31), // Format-Fehler
            proof_with_quality(42, 368),
            proof_with_quality(u64::MAX, 32),
        ];
        let ps = vec![params(32, 1000), params(32, 1000), params(24, 1), params(50, 77)];
        for n in 1..=proofs.len() {
            let refs: Vec<&[u8]> = proofs.iter().take(n).map(|p| p.as_slice()).collect();
            let got = proof_verify_batch(&refs, &ps[..n]);
            assert_eq!(got.len(), n);
            for i in 0..n {
                assert_eq!(got[i], proof_verify(&proofs[i], &ps[i]), "element {i} of {n}");
            }
        }
    }
}
