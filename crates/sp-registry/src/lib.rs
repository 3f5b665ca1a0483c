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

//! Singleton-Registry: launcher_id → Singleton-Zustand.
//!
//! Viele Leser, kurze exklusive Schreibabschnitte pro Singleton. Punkte- und
//! Zeitstempel-Updates laufen unter einem per-Singleton-Lock, damit der
//! Difficulty-Controller konsistente Paare liest. Kein I/O unter Lock.

use sp_chain::{ChainClient, ChainError, Hash32};
use sp_types::{LauncherId, Singleton};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum RegistryError {
    UnknownSingleton(LauncherId),
    NotPoolMember(LauncherId),
    Chain(ChainError),
    Poisoned,
}

impl core::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownSingleton(id) => write!(f, "unknown singleton: {}", id.to_hex()),
            Self::NotPoolMember(id) => write!(f, "singleton not a pool member: {}", id.to_hex()),
            Self::Chain(e) => write!(f, "chain error: {e}"),
            Self::Poisoned => f.write_str("registry lock poisoned"),
        }
    }
}

impl std::error::Error for RegistryError {}
impl From<ChainError> for RegistryError {
    fn from(e: ChainError) -> Self {
        Self::Chain(e)
    }
}

type Slot = Arc<RwLock<Singleton>>;

pub struct SingletonRegistry {
    inner: RwLock<HashMap<LauncherId, Slot>>,
    /// p2-Puzzle-Hash des Pools; Grundlage der Mitgliedschafts-Ableitung.
    pool_puzzle_hash: Hash32,
}

impl SingletonRegistry {
    pub fn new(pool_puzzle_hash: Hash32) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            pool_puzzle_hash,
        }
    }

    pub fn pool_puzzle_hash(&self) -> Hash32 {
        self.pool_puzzle_hash
    }

    fn slot(&self, launcher_id: &LauncherId) -> Option<Slot> {
        self.inner
            .read()
            .ok()
            .and_then(|m| m.get(launcher_id).cloned())
    }

    /// Snapshot-Kopie des Singletons; None, wenn unbekannt.
    pub fn lookup(&self, launcher_id: &LauncherId) -> Option<Singleton> {
        let slot = self.slot(launcher_id)?;
        let g = slot.read().ok()?;
        Some(g.clone())
    }

    pub fn contains(&self, launcher_id: &LauncherId) -> bool {
        self.inner
            .read()
            .map(|m| m.contains_key(launcher_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fügt ein oder ersetzt den kompletten Zustand eines Singletons.
    pub fn upsert(&self, singleton: Singleton) -> Result<(), RegistryError> {
        let id = singleton.launcher_id;
        let mut map = self.inner.write().map_err(|_| RegistryError::Poisoned)?;
        match map.get(&id) {
            Some(slot) => {
                let mut g = slot.write().map_err(|_| RegistryError::Poisoned)?;
                *g = singleton;
            }
            None => {
                map.insert(id, Arc::new(RwLock::new(singleton)));
                debug!(launcher = %id.to_hex(), "singleton registered");
            }
        }
        Ok(())
    }

    /// Atomare Gutschrift nach einem gültigen Partial: total_points und
    /// last_partial_time ändern sich unter demselben exklusiven Abschnitt.
    pub fn credit_points(
        &self,
        launcher_id: &LauncherId,
        points: u64,
        now: u64,
    ) -> Result<u64, RegistryError> {
        let slot = self
            .slot(launcher_id)
            .ok_or(RegistryError::UnknownSingleton(*launcher_id))?;
        let mut g = slot.write().map_err(|_| RegistryError::Poisoned)?;
        g.total_points = g.total_points.saturating_add(points);
        g.last_partial_time = now;
        Ok(g.total_points)
    }

    /// Wendet eine neue Difficulty an (Retarget-Pass); Rückgabe alt → neu.
    pub fn set_difficulty(
        &self,
        launcher_id: &LauncherId,
        new_difficulty: u64,
    ) -> Result<(u64, u64), RegistryError> {
        let slot = self
            .slot(launcher_id)
            .ok_or(RegistryError::UnknownSingleton(*launcher_id))?;
        let mut g = slot.write().map_err(|_| RegistryError::Poisoned)?;
        let old = g.current_difficulty;
        g.current_difficulty = new_difficulty.max(1);
        Ok((old, g.current_difficulty))
    }

    /// Verbucht einen absorbierten Reward: pending Balance sinkt entsprechend.
    pub fn mark_absorbed(
        &self,
        launcher_id: &LauncherId,
        amount: u64,
    ) -> Result<u64, RegistryError> {
        let slot = self
            .slot(launcher_id)
            .ok_or(RegistryError::UnknownSingleton(*launcher_id))?;
        let mut g = slot.write().map_err(|_| RegistryError::Poisoned)?;
        g.balance = g.balance.saturating_sub(amount);
        info!(launcher = %launcher_id.to_hex(), amount, remaining = g.balance, "reward absorbed");
        Ok(g.balance)
    }

    /// Pool-Austritt ist erst bei relative_lock_height == 0 möglich.
    pub fn can_leave_pool(&self, launcher_id: &LauncherId) -> Result<bool, RegistryError> {
        let s = self
            .lookup(launcher_id)
            .ok_or(RegistryError::UnknownSingleton(*launcher_id))?;
        Ok(s.relative_lock_height == 0)
    }

    /// Synchronisiert ein Singleton mit der Chain. Mitgliedschaft wird aus der
    /// Puzzle-Struktur abgeleitet (p2-Puzzle-Hash == Pool-Puzzle-Hash), nicht
    /// aus einem frei setzbaren Flag. Unbekannte Launcher werden bei Erst-
    /// beobachtung angelegt.
    pub fn sync(
        &self,
        launcher_id: &LauncherId,
        chain: &dyn ChainClient,
    ) -> Result<Option<Singleton>, RegistryError> {
        let chain_state = chain.singleton_state(launcher_id)?;
        let Some(cs) = chain_state else {
            debug!(launcher = %launcher_id.to_hex(), "singleton unknown on chain");
            return Ok(None);
        };
        let is_member = cs.p2_puzzle_hash == self.pool_puzzle_hash;
        if !is_member {
            warn!(launcher = %launcher_id.to_hex(), "singleton not assigned to this pool");
        }

        // Chain-Sicht mit lokalem Accounting-Zustand zusammenführen
        let merged = {
            let existing = self.lookup(launcher_id);
            let mut s = existing.unwrap_or_else(|| {
                Singleton::new(*launcher_id, cs.owner_public_key, 1)
            });
            s.p2_puzzle_hash = cs.p2_puzzle_hash;
            s.owner_public_key = cs.owner_public_key;
            s.relative_lock_height = cs.relative_lock_height;
            s.balance = cs.pending_amount;
            s.is_pool_member = is_member;
            s
        };
        self.upsert(merged.clone())?;
        Ok(Some(merged))
    }

    /// Konsistente Momentaufnahme aller Singletons (Retarget-Pass, Persistenz,
    /// Statistik). Reihenfolge deterministisch nach launcher_id.
    pub fn snapshot(&self) -> Vec<Singleton> {
        let slots: Vec<Slot> = match self.inner.read() {
            Ok(m) => m.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        let mut out: Vec<Singleton> = slots
            .iter()
            .filter_map(|s| s.read().ok().map(|g| g.clone()))
            .collect();
        out.sort_by(|a, b| a.launcher_id.cmp(&b.launcher_id));
        out
    }

    /// Summe aller Punkte über alle Farmer.
    pub fn total_points(&self) -> u64 {
        self.snapshot()
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.total_points))
    }
}
