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

//! Punkte- und Auszahlungsrechnung.
//!
//! Alle Geldpfade rechnen ganzzahlig (Mojos, Basispunkte); f64 existiert nur
//! für Anzeige-Helfer. Erhaltungssatz: farmer_total + pool_amount + fee_amount
//! == block_reward, exakt.

pub mod difficulty;

pub use difficulty::{
    ClampEdge, DifficultyController, DifficultyDecision, DifficultyInput, DifficultyKind,
    PointsWindow,
};

use sp_types::{LauncherId, MOJO_PER_XCH};

/// Basispunkte-Skala (10_000 = 100%)
pub const BP_SCALE: u64 = 10_000;

/// Punkte-Skalierung der Chain: points = quality * 10^6 / difficulty
const POINTS_SCALE: u64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayoutScheme {
    Pps,
    Pplns,
}

/// Punkte für ein gültiges Partial; nie 0 (Clamp auf mindestens 1).
/// difficulty == 0 ist vorher durch die Validierung ausgeschlossen, wird hier
/// aber defensivfrei als Maximal-Clamp behandelt.
pub fn points_for_partial(quality: u64, difficulty: u64) -> u64 {
    if difficulty == 0 {
        return 1;
    }
    let p = (quality as u128) * (POINTS_SCALE as u128) / (difficulty as u128);
    let p = p.min(u64::MAX as u128) as u64;
    p.max(1)
}

/// Pool-Fee von Bruchteil [0,1] nach Basispunkten (kaufmännisch gerundet).
pub fn fee_bp_from_fraction(fee: f64) -> u16 {
    let clamped = fee.clamp(0.0, 1.0);
    (clamped * BP_SCALE as f64).round() as u16
}

/// Ganzzahlige XCH → Mojo-Konversion (exakt).
pub fn xch_to_mojo(xch: u64) -> u64 {
    xch.saturating_mul(MOJO_PER_XCH)
}

/// Anzeige-Helfer; nur für Menschen, nie für Geldrechnung.
pub fn mojo_to_xch_display(mojo: u64) -> f64 {
    mojo as f64 / MOJO_PER_XCH as f64
}

/// floor(total * bp / 10_000) ohne Überlauf in u64-Bereichen
fn split_bp(total: u64, bp: u16) -> u64 {
    ((total as u128) * (bp as u128) / (BP_SCALE as u128)) as u64
}

/// floor(pot * points / denom); 0 bei leerem Nenner
fn share_floor(pot: u64, points: u64, denom: u64) -> u64 {
    if denom == 0 {
        return 0;
    }
    ((pot as u128) * (points as u128) / (denom as u128)) as u64
}

/// PPS: reward = block_reward × (1 − fee) × farmer_points / estimated_points_per_block.
/// Null, wenn die Schätzung null ist.
pub fn compute_pps(
    farmer_points: u64,
    estimated_points_per_block: u64,
    block_reward: u64,
    fee_bp: u16,
) -> u64 {
    let pot = split_bp(block_reward, (BP_SCALE as u16).saturating_sub(fee_bp));
    share_floor(pot, farmer_points, estimated_points_per_block)
}

/// PPLNS: reward = block_reward × (1 − fee) × farmer_points / total_points_last_N.
/// Null, wenn das Fenster leer ist.
pub fn compute_pplns(
    farmer_points: u64,
    total_points_last_n: u64,
    block_reward: u64,
    fee_bp: u16,
) -> u64 {
    let pot = split_bp(block_reward, (BP_SCALE as u16).saturating_sub(fee_bp));
    share_floor(pot, farmer_points, total_points_last_n)
}

/// Auszahlung eines Farmers für einen gewonnenen Block.
#[derive(Clone, Debug, PartialEq)]
pub struct PayoutResult {
    pub launcher_id: LauncherId,
    pub amount: u64,
    pub points: u64,
    /// Anteil in [0,1]; reine Anzeigegröße
    pub share: f64,
}

/// Gesamtabrechnung eines Blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockPayout {
    pub farmers: Vec<PayoutResult>,
    /// Rundungsrest, verbleibt beim Pool
    pub pool_amount: u64,
    pub fee_amount: u64,
    pub block_reward: u64,
}

impl BlockPayout {
    pub fn farmer_total(&self) -> u64 {
        self.farmers.iter().fold(0u64, |acc, p| acc.saturating_add(p.amount))
    }
}

/// Verteilt einen Block-Reward über alle Farmer nach Punktanteil.
///
/// denom: bei PPLNS die Punktsumme des Fensters, bei PPS die Schätzung der
/// Punkte pro Block. Jeder Anteil wird einzeln nach unten gerundet; der Rest
/// (Rundung plus nicht zugeteilte Anteile) verbleibt als pool_amount, die Fee
/// ist die Differenz zwischen Reward und Netto-Topf. Erhaltung ist exakt.
pub fn compute_block_payout(
    farmers: &[(LauncherId, u64)],
    denom: u64,
    block_reward: u64,
    fee_bp: u16,
) -> BlockPayout {
    let pot = split_bp(block_reward, (BP_SCALE as u16).saturating_sub(fee_bp));
    let fee_amount = block_reward - pot;
    let mut out = Vec::with_capacity(farmers.len());
    let mut distributed = 0u64;
    for (id, points) in farmers {
        let amount = share_floor(pot, *points, denom);
        distributed = distributed.saturating_add(amount);
        if amount > 0 {
            out.push(PayoutResult {
                launcher_id: *id,
                amount,
                points: *points,
                share: if denom == 0 {
                    0.0
                } else {
                    *points as f64 / denom as f64
                },
            });
        }
    }
    BlockPayout {
        farmers: out,
        pool_amount: pot.saturating_sub(distributed),
        fee_amount,
        block_reward,
    }
}
