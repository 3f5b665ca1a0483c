// SPDX-License-Identifier: AGPL-3.0-only
#![allow(clippy::result_large_err)]

use blst::{min_pk as bls, BLST_ERROR};

// Augmented ciphersuite (min_pk: pubkeys in G1, signatures in G2); die Chain
// signiert mit vorangestelltem Pubkey als Augmentation.
const DST_SIG: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_AUG_";

#[derive(Clone)]
pub struct BlsSecretKey(pub bls::SecretKey);

#[derive(Clone)]
pub struct BlsPublicKey(pub bls::PublicKey);

impl BlsPublicKey {
    pub fn to_bytes(&self) -> [u8; 48] {
        self.0.to_bytes()
    }
    pub fn from_bytes(b: &[u8; 48]) -> Option<Self> {
        bls::PublicKey::from_bytes(b).ok().map(Self)
    }
}

pub fn bls_pk_from_bytes(b: &[u8; 48]) -> Option<BlsPublicKey> {
    BlsPublicKey::from_bytes(b)
}

pub struct BlsKeypair {
    pub sk: BlsSecretKey,
    pub pk: BlsPublicKey,
}

pub fn bls_keygen_from_ikm(ikm: &[u8]) -> Option<BlsKeypair> {
    let sk = bls::SecretKey::key_gen(ikm, &[]).ok()?;
    let pk = sk.sk_to_pk();
    Some(BlsKeypair {
        sk: BlsSecretKey(sk),
        pk: BlsPublicKey(pk),
    })
}

pub fn bls_sign(msg: &[u8], sk: &BlsSecretKey) -> [u8; 96] {
    let pk_bytes = sk.0.sk_to_pk().to_bytes();
    let sig = sk.0.sign(msg, DST_SIG, &pk_bytes);
    sig.to_bytes()
}

pub fn bls_verify(msg: &[u8], sig_bytes: &[u8; 96], pk: &BlsPublicKey) -> bool {
    let sig = match bls::Signature::from_bytes(sig_bytes) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let pk_bytes = pk.to_bytes();
    sig.verify(true, msg, DST_SIG, &pk_bytes, &pk.0, true) == BLST_ERROR::BLST_SUCCESS
}

/// Batch-Verify über parallele Slices. Ergebnis pro Element entspricht exakt dem
/// Skalar-Resultat und ist unabhängig von der Batch-Zusammensetzung; Längen-
/// Mismatch liefert eine leere Liste.
pub fn bls_verify_batch(
    msgs: &[&[u8]],
    sigs: &[[u8; 96]],
    pks: &[BlsPublicKey],
) -> Vec<bool> {
    if msgs.len() != sigs.len() || msgs.len() != pks.len() {
        return Vec::new();
    }
    msgs.iter()
        .zip(sigs.iter())
        .zip(pks.iter())
        .map(|((msg, sig), pk)| bls_verify(msg, sig, pk))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blake3_32;

    #[test]
    fn bls_sign_verify_roundtrip() {
        let ikm = blake3_32(b"ikm-1");
        let kp = bls_keygen_from_ikm(&ikm).expect("keygen");
        let msg = b"partial signing message";
        let sig = bls_sign(msg, &kp.sk);
        assert!(bls_verify(msg, &sig, &kp.pk));
        // negative
        let mut tampered = sig;
        tampered[0] ^= 1;
        assert!(!bls_verify(msg, &tampered, &kp.pk));
    }

    #[test]
    fn bls_verify_rejects_wrong_key() {
        let kp1 = bls_keygen_from_ikm(&blake3_32(b"ikm-1")).unwrap();
        let kp2 = bls_keygen_from_ikm(&blake3_32(b"ikm-2")).unwrap();
        let msg = b"msg";
        let sig = bls_sign(msg, &kp1.sk);
        assert!(!bls_verify(msg, &sig, &kp2.pk));
    }

    #[test]
    fn bls_pk_roundtrip_bytes() {
        let kp = bls_keygen_from_ikm(&blake3_32(b"ikm-3")).unwrap();
        let b = kp.pk.to_bytes();
        let pk2 = bls_pk_from_bytes(&b).unwrap();
        let msg = b"roundtrip";
        let sig = bls_sign(msg, &kp.sk);
        assert!(bls_verify(msg, &sig, &pk2));
    }

    #[test]
    fn batch_matches_scalar_all_sizes() {
        let kps: Vec<BlsKeypair> = (0u8..5)
            .map(|i| bls_keygen_from_ikm(&blake3_32(&[b'k', i])).unwrap())
            .collect();
        let msgs: Vec<Vec<u8>> = (0u8..5).map(|i| vec![b'm', i]).collect();
        let mut sigs: Vec<[u8; 96]> = kps
            .iter()
            .zip(msgs.iter())
            .map(|(kp, m)| bls_sign(m, &kp.sk))
            .collect();
        // Element 2 absichtlich korrumpieren
        sigs[2][4] ^= 0xFF;

        for n in 1..=5usize {
            let m_refs: Vec<&[u8]> = msgs.iter().take(n).map(|m| m.as_slice()).collect();
            let pks: Vec<BlsPublicKey> = kps.iter().take(n).map(|kp| kp.pk.clone()).collect();
            let got = bls_verify_batch(&m_refs, &sigs[..n], &pks);
            assert_eq!(got.len(), n);
            for i in 0..n {
                let scalar = bls_verify(&msgs[i], &sigs[i], &kps[i].pk);
                assert_eq!(got[i], scalar, "batch size {n}, element {i}");
            }
        }
    }

    #[test]
    fn batch_length_mismatch_is_empty() {
        let kp = bls_keygen_from_ikm(&blake3_32(b"ikm-4")).unwrap();
        let sig = bls_sign(b"x", &kp.sk);
        let got = bls_verify_batch(&[b"x" as &[u8]], &[sig, sig], &[kp.pk]);
        assert!(got.is_empty());
    }
}
