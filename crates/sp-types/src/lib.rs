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

use sp_codec::{decode_bytes_bounded, CodecError, Decodable, Encodable};
use sp_crypto::{digest_with_domain, Hash32, MAX_PROOF_BYTES};
use std::io::{Read, Write};

pub use sp_crypto::{K_SIZE_MAX, K_SIZE_MIN};

/// BLS-Signatur (min_pk-Variante, G2)
pub const SIGNATURE_BYTES: usize = 96;
/// BLS-Pubkey (G1)
pub const PUBKEY_BYTES: usize = 48;

/// Kleinste Geldeinheit: 10^12 Mojos pro XCH
pub const MOJO_PER_XCH: u64 = 1_000_000_000_000;

// Domain-Tags für Digests
const PARTIAL_DEDUP_DOMAIN: &[u8] = b"sp:partial:dedup:v1\x01";

/// 32-Byte-Id des Farmer-Singletons, stabil über dessen Lebenszeit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct LauncherId(pub Hash32);

impl LauncherId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let raw = hex::decode(s).ok()?;
        let mut out = [0u8; 32];
        if raw.len() != 32 {
            return None;
        }
        out.copy_from_slice(&raw);
        Some(Self(out))
    }
}

impl Encodable for LauncherId {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.0.encode(w)
    }
    fn encoded_len(&self) -> usize {
        32
    }
}
impl Decodable for LauncherId {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self(<[u8; 32]>::decode(r)?))
    }
}

/// Eingereichtes Partial eines Farmers. Die Farmer-Identität wird NICHT auf dem
/// Partial geführt, sondern über launcher_id aus der Registry abgeleitet;
/// Punkte sind kein Feld, sondern ein Accounting-Ergebnis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partial {
    pub launcher_id: LauncherId,
    pub challenge: Hash32,
    pub proof: Vec<u8>,
    pub signature: [u8; 96],
    /// Empfangszeit (Unix-Sekunden, monotone Quellzeit des Einlieferers)
    pub timestamp: u64,
    /// Nominale Difficulty zum Sendezeitpunkt
    pub difficulty: u64,
    /// Plot-Parameter k
    pub plot_size: u8,
}

impl Encodable for Partial {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.launcher_id.encode(w)?;
        self.challenge.encode(w)?;
        self.proof.encode(w)?;
        self.signature.encode(w)?;
        self.timestamp.encode(w)?;
        self.difficulty.encode(w)?;
        self.plot_size.encode(w)?;
        Ok(())
    }
    fn encoded_len(&self) -> usize {
        self.launcher_id.encoded_len()
            + 32
            + self.proof.encoded_len()
            + 96
            + self.timestamp.encoded_len()
            + self.difficulty.encoded_len()
            + 1
    }
}
impl Decodable for Partial {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            launcher_id: LauncherId::decode(r)?,
            challenge: <[u8; 32]>::decode(r)?,
            proof: decode_bytes_bounded(r, MAX_PROOF_BYTES)?,
            signature: <[u8; 96]>::decode(r)?,
            timestamp: u64::decode(r)?,
            difficulty: u64::decode(r)?,
            plot_size: u8::decode(r)?,
        })
    }
}

impl Partial {
    /// Digest für die Duplikat-Erkennung: H(domain || launcher || challenge || proof[0..32]).
    /// Proofs kürzer als 32 Bytes werden mit Nullen aufgefüllt; solche Partials
    /// scheitern später ohnehin an der Format-Prüfung.
    pub fn dedup_digest(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(32 + 32 + 32);
        buf.extend_from_slice(&self.launcher_id.0);
        buf.extend_from_slice(&self.challenge);
        let mut head = [0u8; 32];
        let n = self.proof.len().min(32);
        if let (Some(dst), Some(src)) = (head.get_mut(..n), self.proof.get(..n)) {
            dst.copy_from_slice(src);
        }
        buf.extend_from_slice(&head);
        digest_with_domain(PARTIAL_DEDUP_DOMAIN, &buf)
    }

    /// Signier-Nachricht: launcher || challenge || proof[0..32] || timestamp (LE u64),
    /// zusammen 128 Bytes.
    pub fn signing_message(&self) -> [u8; 128] {
        let mut msg = [0u8; 128];
        let (a, rest) = msg.split_at_mut(32);
        a.copy_from_slice(&self.launcher_id.0);
        let (b, rest) = rest.split_at_mut(32);
        b.copy_from_slice(&self.challenge);
        let (c, d) = rest.split_at_mut(32);
        let n = self.proof.len().min(32);
        if let (Some(dst), Some(src)) = (c.get_mut(..n), self.proof.get(..n)) {
            dst.copy_from_slice(src);
        }
        if let Some(ts) = d.get_mut(..8) {
            ts.copy_from_slice(&self.timestamp.to_le_bytes());
        }
        msg
    }
}

/// Persistenter On-Chain-Coin, der die Pool-Mitgliedschaft eines Farmers
/// repräsentiert und Rewards akkumuliert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Singleton {
    pub launcher_id: LauncherId,
    pub p2_puzzle_hash: Hash32,
    pub owner_public_key: [u8; 48],
    pub total_points: u64,
    pub current_difficulty: u64,
    /// Unix-Sekunden des letzten gültigen Partials
    pub last_partial_time: u64,
    pub is_pool_member: bool,
    /// Ausstehender Reward-Saldo in Mojos
    pub balance: u64,
    pub relative_lock_height: u32,
}

impl Singleton {
    pub fn new(launcher_id: LauncherId, owner_public_key: [u8; 48], difficulty: u64) -> Self {
        Self {
            launcher_id,
            p2_puzzle_hash: [0u8; 32],
            owner_public_key,
            total_points: 0,
            current_difficulty: difficulty.max(1),
            last_partial_time: 0,
            is_pool_member: false,
            balance: 0,
            relative_lock_height: 0,
        }
    }
}

impl Encodable for Singleton {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), CodecError> {
        self.launcher_id.encode(w)?;
        self.p2_puzzle_hash.encode(w)?;
        self.owner_public_key.encode(w)?;
        self.total_points.encode(w)?;
        self.current_difficulty.encode(w)?;
        self.last_partial_time.encode(w)?;
        self.is_pool_member.encode(w)?;
        self.balance.encode(w)?;
        self.relative_lock_height.encode(w)?;
        Ok(())
    }
    fn encoded_len(&self) -> usize {
        32 + 32
            + 48
            + self.total_points.encoded_len()
            + self.current_difficulty.encoded_len()
            + self.last_partial_time.encoded_len()
            + 1
            + self.balance.encoded_len()
            + self.relative_lock_height.encoded_len()
    }
}
impl Decodable for Singleton {
    fn decode<R: Read>(r: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            launcher_id: LauncherId::decode(r)?,
            p2_puzzle_hash: <[u8; 32]>::decode(r)?,
            owner_public_key: <[u8; 48]>::decode(r)?,
            total_points: u64::decode(r)?,
            current_difficulty: u64::decode(r)?,
            last_partial_time: u64::decode(r)?,
            is_pool_member: bool::decode(r)?,
            balance: u64::decode(r)?,
            relative_lock_height: u32::decode(r)?,
        })
    }
}

// ============================
// Stateless Validation
// ============================

pub fn validate_partial_sanity(p: &Partial) -> Result<(), &'static str> {
    if p.proof.is_empty() || p.proof.len() > MAX_PROOF_BYTES {
        return Err("proof size out of range");
    }
    if p.plot_size < K_SIZE_MIN || p.plot_size > K_SIZE_MAX {
        return Err("plot k-size out of range");
    }
    if p.difficulty == 0 {
        return Err("zero difficulty");
    }
    Ok(())
}
