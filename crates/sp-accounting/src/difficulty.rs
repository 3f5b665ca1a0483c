// SPDX-License-Identifier: AGPL-3.0-only

//! Per-Farmer-Difficulty-Regelung.
//!
//! Bewusst konservative Regel: ±20% pro Anpassung, Clamping auf [min, max],
//! höchstens eine Anpassung pro Intervall und Farmer. Clamping wird als
//! Ereignis gemeldet.

use sp_types::LauncherId;
use std::collections::HashMap;
use tracing::info;

/// Ziel-Punkte pro Tag ≈ target_partials_per_day × 10³
const POINTS_PER_PARTIAL_NOMINAL: u64 = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DifficultyInput {
    pub target_partials_per_day: u64,
    pub current_difficulty: u64,
    pub farmer_points_24h: u64,
    pub time_since_last_partial: u64,
    pub min_difficulty: u64,
    pub max_difficulty: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DifficultyKind {
    Unchanged,
    Decreased,
    Increased,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClampEdge {
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DifficultyDecision {
    pub new_difficulty: u64,
    pub kind: DifficultyKind,
    pub clamped: Option<ClampEdge>,
}

/// Reine Update-Regel, frei von Zeit- und Farmer-Zustand:
/// - unter Ziel×10³ → ×0.8
/// - über 2×Ziel×10³ → ×1.2
/// - sonst unverändert; Ergebnis auf [min, max] geklemmt.
pub fn compute_difficulty(input: &DifficultyInput) -> DifficultyDecision {
    let target_points = input
        .target_partials_per_day
        .saturating_mul(POINTS_PER_PARTIAL_NOMINAL);
    let (raw, kind) = if input.farmer_points_24h < target_points {
        (
            (input.current_difficulty as u128 * 8 / 10) as u64,
            DifficultyKind::Decreased,
        )
    } else if input.farmer_points_24h > target_points.saturating_mul(2) {
        (
            (input.current_difficulty as u128 * 12 / 10).min(u64::MAX as u128) as u64,
            DifficultyKind::Increased,
        )
    } else {
        (input.current_difficulty, DifficultyKind::Unchanged)
    };

    let mut clamped = None;
    let mut new = raw;
    if new < input.min_difficulty {
        new = input.min_difficulty;
        if kind != DifficultyKind::Unchanged {
            clamped = Some(ClampEdge::Min);
        }
    }
    if new > input.max_difficulty {
        new = input.max_difficulty;
        if kind != DifficultyKind::Unchanged {
            clamped = Some(ClampEdge::Max);
        }
    }
    DifficultyDecision {
        new_difficulty: new,
        kind,
        clamped,
    }
}

/// Zustandsbehafteter Controller: hält Intervall-Gating pro Farmer.
pub struct DifficultyController {
    target_partials_per_day: u64,
    min_difficulty: u64,
    max_difficulty: u64,
    adjust_interval_secs: u64,
    last_adjustment: HashMap<LauncherId, u64>,
}

impl DifficultyController {
    pub fn new(
        target_partials_per_day: u64,
        min_difficulty: u64,
        max_difficulty: u64,
        adjust_interval_secs: u64,
    ) -> Self {
        Self {
            target_partials_per_day,
            min_difficulty: min_difficulty.max(1),
            max_difficulty: max_difficulty.max(min_difficulty.max(1)),
            adjust_interval_secs,
            last_adjustment: HashMap::new(),
        }
    }

    /// Anpassung für einen Farmer; None, solange das Intervall seit der letzten
    /// Anpassung noch nicht verstrichen ist.
    pub fn adjust(
        &mut self,
        launcher_id: &LauncherId,
        current_difficulty: u64,
        farmer_points_24h: u64,
        time_since_last_partial: u64,
        now: u64,
    ) -> Option<DifficultyDecision> {
        if let Some(last) = self.last_adjustment.get(launcher_id) {
            if now.saturating_sub(*last) < self.adjust_interval_secs {
                return None;
            }
        }
        let decision = compute_difficulty(&DifficultyInput {
            target_partials_per_day: self.target_partials_per_day,
            current_difficulty,
            farmer_points_24h,
            time_since_last_partial,
            min_difficulty: self.min_difficulty,
            max_difficulty: self.max_difficulty,
        });
        self.last_adjustment.insert(*launcher_id, now);
        if let Some(edge) = decision.clamped {
            info!(
                launcher = %launcher_id.to_hex(),
                new_difficulty = decision.new_difficulty,
                edge = ?edge,
                "difficulty clamped"
            );
        }
        Some(decision)
    }

    pub fn forget(&mut self, launcher_id: &LauncherId) {
        self.last_adjustment.remove(launcher_id);
    }
}

/// Gleitendes 24h-Punktefenster: 24 Stunden-Buckets als Ring. Genau genug für
/// die Regelung, konstanter Speicher pro Farmer.
#[derive(Clone, Debug)]
pub struct PointsWindow {
    buckets: [u64; 24],
    /// Stunden-Index (unix_secs / 3600) des zuletzt beschriebenen Buckets
    last_hour: u64,
}

impl Default for PointsWindow {
    fn default() -> Self {
        Self {
            buckets: [0u64; 24],
            last_hour: 0,
        }
    }
}

impl PointsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn advance(&mut self, hour: u64) {
        if self.last_hour == 0 {
            self.last_hour = hour;
            return;
        }
        if hour <= self.last_hour {
            return;
        }
        let steps = (hour - self.last_hour).min(24);
        for i in 1..=steps {
            let idx = ((self.last_hour + i) % 24) as usize;
            if let Some(b) = self.buckets.get_mut(idx) {
                *b = 0;
            }
        }
        self.last_hour = hour;
    }

    pub fn add(&mut self, now: u64, points: u64) {
        let hour = now / 3600;
        self.advance(hour);
        let idx = (hour % 24) as usize;
        if let Some(b) = self.buckets.get_mut(idx) {
            *b = b.saturating_add(points);
        }
    }

    pub fn total_24h(&mut self, now: u64) -> u64 {
        self.advance(now / 3600);
        self.buckets.iter().fold(0u64, |a, b| a.saturating_add(*b))
    }
}
