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

//! Verträge der Blockchain-Kollaborateure. Der produktive RPC/WebSocket-Client
//! lebt außerhalb des Cores; die Traits hier sind blockierend und werden
//! ausschließlich vom dedizierten Sync-Thread aufgerufen (nie von einem
//! Validator-Worker).

use core::fmt;
use sp_types::LauncherId;
use std::time::Duration;
use tracing::warn;

pub mod mock;

pub type Hash32 = [u8; 32];

/// Zustand der Chain aus Sicht des Full Nodes
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlockchainState {
    pub tip_height: u32,
    pub synced_height: u32,
    /// Netspace in Bytes
    pub network_space: u64,
    /// Sync-Fortschritt in [0,1]
    pub progress: f64,
    pub is_syncing: bool,
}

/// Signage Point der Chain; Partials binden sich an dessen Challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignagePoint {
    pub challenge_hash: Hash32,
    pub signage_point_index: u32,
    pub peak_height: u32,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinRecord {
    pub coin_id: Hash32,
    pub puzzle_hash: Hash32,
    pub parent_coin_id: Hash32,
    pub amount: u64,
    pub confirmed_height: u32,
    pub spent: bool,
}

/// On-Chain-Sicht auf ein Singleton, Grundlage für die Mitgliedschafts-Ableitung.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingletonChainState {
    pub launcher_id: LauncherId,
    pub p2_puzzle_hash: Hash32,
    pub owner_public_key: [u8; 48],
    pub relative_lock_height: u32,
    /// Noch nicht absorbierter Reward-Saldo in Mojos
    pub pending_amount: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Accepted,
    Rejected,
}

#[derive(Debug)]
pub enum ChainError {
    Timeout,
    NotSynced,
    Transport(String),
    Rejected(String),
}

impl ChainError {
    /// Transiente Fehler dürfen mit Backoff wiederholt werden.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_) | Self::NotSynced)
    }
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("chain rpc timeout"),
            Self::NotSynced => f.write_str("node not synced"),
            Self::Transport(e) => write!(f, "chain transport error: {e}"),
            Self::Rejected(e) => write!(f, "chain rejected request: {e}"),
        }
    }
}

impl std::error::Error for ChainError {}

/// Blockierender Client gegen den Full Node (TLS mit Operator-Zertifikat ist
/// Sache der Implementierung).
pub trait ChainClient: Send + Sync {
    fn blockchain_state(&self) -> Result<BlockchainState, ChainError>;

    /// Pull-basierter Strom von Signage Points: liefert den nächsten noch nicht
    /// gesehenen Punkt oder None, wenn aktuell keiner ansteht.
    fn poll_signage_point(&self) -> Result<Option<SignagePoint>, ChainError>;

    fn coin_records_by_puzzle_hash(
        &self,
        puzzle_hash: &Hash32,
        start_height: u32,
    ) -> Result<Vec<CoinRecord>, ChainError>;

    /// On-Chain-Zustand eines Singletons; None, wenn die Chain den Launcher
    /// nicht kennt.
    fn singleton_state(
        &self,
        launcher_id: &LauncherId,
    ) -> Result<Option<SingletonChainState>, ChainError>;

    fn push_tx(&self, serialized_tx: &[u8]) -> Result<TxStatus, ChainError>;
}

/// Baut und signiert Absorb-Transaktionen; Signatur-Schlüssel verbleiben beim
/// Kollaborateur.
pub trait AbsorbTxBuilder: Send + Sync {
    fn build_absorb_tx(
        &self,
        launcher_id: &LauncherId,
        amount: u64,
        fee: u32,
    ) -> Result<Vec<u8>, ChainError>;

    fn sign_absorb_tx(&self, tx_bytes: &[u8], privkey: &[u8; 32]) -> Result<Vec<u8>, ChainError>;
}

/// Wiederholt `op` bei transienten Fehlern mit exponentiellem Backoff
/// (begrenztes Budget); nicht-transiente Fehler brechen sofort ab.
pub fn retry_with_backoff<T, F>(
    max_attempts: u32,
    base_delay: Duration,
    what: &str,
    mut op: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Result<T, ChainError>,
{
    let mut delay = base_delay;
    let mut attempt = 1u32;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(what, attempt, error = %e, "transient chain error, retrying");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
