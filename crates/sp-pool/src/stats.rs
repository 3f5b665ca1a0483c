// SPDX-License-Identifier: AGPL-3.0-only

//! Prozessweite Pool-Statistik: atomare Zähler, Snapshot für Logging und API.

use crate::error::PartialRejection;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Default)]
pub struct PoolStats {
    total_partials: AtomicU64,
    valid_partials: AtomicU64,
    invalid_partials: AtomicU64,
    total_points: AtomicU64,
    blocks_found: AtomicU64,
    // Rejections pro Kind
    too_late: AtomicU64,
    duplicate: AtomicU64,
    invalid_singleton: AtomicU64,
    invalid_signature: AtomicU64,
    invalid_proof: AtomicU64,
    invalid_challenge: AtomicU64,
    internal_error: AtomicU64,
    // Worker-Überwachung
    worker_restarts: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_partials: u64,
    pub valid_partials: u64,
    pub invalid_partials: u64,
    pub total_points: u64,
    pub blocks_found: u64,
    pub too_late: u64,
    pub duplicate: u64,
    pub invalid_singleton: u64,
    pub invalid_signature: u64,
    pub invalid_proof: u64,
    pub invalid_challenge: u64,
    pub internal_error: u64,
    pub worker_restarts: u64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_valid(&self, points: u64) {
        self.total_partials.fetch_add(1, Ordering::Relaxed);
        self.valid_partials.fetch_add(1, Ordering::Relaxed);
        self.total_points.fetch_add(points, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, kind: PartialRejection) {
        self.total_partials.fetch_add(1, Ordering::Relaxed);
        self.invalid_partials.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            PartialRejection::TooLate => &self.too_late,
            PartialRejection::Duplicate => &self.duplicate,
            PartialRejection::InvalidSingleton => &self.invalid_singleton,
            PartialRejection::InvalidSignature => &self.invalid_signature,
            PartialRejection::InvalidProof => &self.invalid_proof,
            PartialRejection::InvalidChallenge => &self.invalid_challenge,
            PartialRejection::InternalError => &self.internal_error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_found(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_restart(&self) {
        self.worker_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_partials: self.total_partials.load(Ordering::Relaxed),
            valid_partials: self.valid_partials.load(Ordering::Relaxed),
            invalid_partials: self.invalid_partials.load(Ordering::Relaxed),
            total_points: self.total_points.load(Ordering::Relaxed),
            blocks_found: self.blocks_found.load(Ordering::Relaxed),
            too_late: self.too_late.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            invalid_singleton: self.invalid_singleton.load(Ordering::Relaxed),
            invalid_signature: self.invalid_signature.load(Ordering::Relaxed),
            invalid_proof: self.invalid_proof.load(Ordering::Relaxed),
            invalid_challenge: self.invalid_challenge.load(Ordering::Relaxed),
            internal_error: self.internal_error.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
        }
    }

    /// Statistikblock fürs periodische Log (30-s-Kadenz im Orchestrator).
    pub fn log_statistics(&self, total_farmers: u64, netspace_bytes: u64, current_difficulty: u64) {
        let s = self.snapshot();
        info!(
            farmers = total_farmers,
            partials = s.total_partials,
            valid = s.valid_partials,
            invalid = s.invalid_partials,
            blocks = s.blocks_found,
            netspace_tib = netspace_bytes / (1u64 << 40),
            points = s.total_points,
            difficulty = current_difficulty,
            "pool statistics"
        );
    }
}
