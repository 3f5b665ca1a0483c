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

//! Verifikations-Cache mit festem Speicherbudget pro Partition.
//!
//! Vier logische Partitionen (Proof, Signatur, Singleton-State, Difficulty),
//! jede mit eigenem Lock, Byte-Budget und TTL. Eviction ist approximatives LRU
//! über eine Stichprobe statt striktem LRU; Korrektheit hängt nur an der
//! Budget-Einhaltung.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Logische Partition des Caches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    Proof,
    Signature,
    SingletonState,
    Difficulty,
}

pub const PARTITION_COUNT: usize = 4;

impl Partition {
    pub fn all() -> [Partition; PARTITION_COUNT] {
        [
            Partition::Proof,
            Partition::Signature,
            Partition::SingletonState,
            Partition::Difficulty,
        ]
    }
}

/// Stichprobengröße für die Eviction-Runde
const EVICT_SAMPLE: usize = 8;

#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    inserted_at: u64,
    last_access: u64,
    access_count: u64,
}

fn entry_size(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: u64,
    pub bytes_used: usize,
    pub bytes_budget: usize,
}

struct Shard {
    map: HashMap<Vec<u8>, Entry>,
    bytes_used: usize,
    bytes_budget: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl Shard {
    fn new(bytes_budget: usize) -> Self {
        Self {
            map: HashMap::new(),
            bytes_used: 0,
            bytes_budget,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    fn remove_entry(&mut self, key: &[u8]) -> bool {
        if let Some(e) = self.map.remove(key) {
            self.bytes_used = self.bytes_used.saturating_sub(entry_size(key, &e.value));
            true
        } else {
            false
        }
    }

    /// Eine Eviction-Runde: Stichprobe aus der Map, das am längsten nicht
    /// genutzte Element der Stichprobe fliegt. HashMap-Iteration liefert
    /// eine quasi-zufällige Auswahl ohne zusätzlichen RNG-State.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .map
            .iter()
            .take(EVICT_SAMPLE)
            .min_by_key(|(_, e)| (e.last_access, e.access_count))
            .map(|(k, _)| k.clone());
        match victim {
            Some(k) => {
                if self.remove_entry(&k) {
                    self.evictions += 1;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}

/// Cache über alle vier Partitionen; Gesamtbudget wird gleichmäßig aufgeteilt.
pub struct VerificationCache {
    shards: [Mutex<Shard>; PARTITION_COUNT],
    ttl_secs: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl VerificationCache {
    pub fn new(total_budget_bytes: usize, ttl_secs: u64) -> Self {
        let per = total_budget_bytes / PARTITION_COUNT;
        Self {
            shards: [
                Mutex::new(Shard::new(per)),
                Mutex::new(Shard::new(per)),
                Mutex::new(Shard::new(per)),
                Mutex::new(Shard::new(per)),
            ],
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    fn shard(&self, p: Partition) -> &Mutex<Shard> {
        let [proof, sig, singleton, diff] = &self.shards;
        match p {
            Partition::Proof => proof,
            Partition::Signature => sig,
            Partition::SingletonState => singleton,
            Partition::Difficulty => diff,
        }
    }

    pub fn put(&self, p: Partition, key: &[u8], value: &[u8]) {
        self.put_at(p, key, value, unix_now());
    }

    fn put_at(&self, p: Partition, key: &[u8], value: &[u8], now: u64) {
        let size = entry_size(key, value);
        let Ok(mut shard) = self.shard(p).lock() else { return };
        if size > shard.bytes_budget {
            // Ein Eintrag, der alleine das Budget sprengt, wird verworfen
            debug!(partition = ?p, size, budget = shard.bytes_budget, "cache entry larger than partition budget");
            return;
        }
        // Ersetzen zählt nicht als Eviction
        shard.remove_entry(key);
        while shard.bytes_used + size > shard.bytes_budget {
            if !shard.evict_one() {
                break;
            }
        }
        shard.bytes_used += size;
        shard.map.insert(
            key.to_vec(),
            Entry {
                value: value.to_vec(),
                inserted_at: now,
                last_access: now,
                access_count: 0,
            },
        );
    }

    pub fn get(&self, p: Partition, key: &[u8]) -> Option<Vec<u8>> {
        self.get_at(p, key, unix_now())
    }

    fn get_at(&self, p: Partition, key: &[u8], now: u64) -> Option<Vec<u8>> {
        let Ok(mut shard) = self.shard(p).lock() else { return None };
        let expired = match shard.map.get(key) {
            Some(e) => now.saturating_sub(e.inserted_at) > self.ttl_secs,
            None => {
                shard.misses += 1;
                return None;
            }
        };
        if expired {
            shard.remove_entry(key);
            shard.expirations += 1;
            shard.misses += 1;
            return None;
        }
        shard.hits += 1;
        shard.map.get_mut(key).map(|e| {
            e.last_access = now;
            e.access_count += 1;
            e.value.clone()
        })
    }

    pub fn remove(&self, p: Partition, key: &[u8]) -> bool {
        match self.shard(p).lock() {
            Ok(mut shard) => shard.remove_entry(key),
            Err(_) => false,
        }
    }

    pub fn clear(&self, p: Partition) {
        if let Ok(mut shard) = self.shard(p).lock() {
            shard.map.clear();
            shard.bytes_used = 0;
        }
    }

    /// Räumt abgelaufene Einträge aller Partitionen aus (periodischer Sweep).
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(unix_now())
    }

    fn sweep_expired_at(&self, now: u64) -> usize {
        let mut total = 0usize;
        for p in Partition::all() {
            let Ok(mut shard) = self.shard(p).lock() else { continue };
            let ttl = self.ttl_secs;
            let dead: Vec<Vec<u8>> = shard
                .map
                .iter()
                .filter(|(_, e)| now.saturating_sub(e.inserted_at) > ttl)
                .map(|(k, _)| k.clone())
                .collect();
            for k in dead {
                if shard.remove_entry(&k) {
                    shard.expirations += 1;
                    total += 1;
                }
            }
        }
        if total > 0 {
            debug!(expired = total, "cache sweep");
        }
        total
    }

    pub fn stats(&self, p: Partition) -> PartitionStats {
        match self.shard(p).lock() {
            Ok(shard) => PartitionStats {
                hits: shard.hits,
                misses: shard.misses,
                evictions: shard.evictions,
                expirations: shard.expirations,
                entries: shard.map.len() as u64,
                bytes_used: shard.bytes_used,
                bytes_budget: shard.bytes_budget,
            },
            Err(_) => PartitionStats::default(),
        }
    }
}
