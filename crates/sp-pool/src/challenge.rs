// SPDX-License-Identifier: AGPL-3.0-only

//! Verfolgt die aktuell gültige Challenge (Signage Point) sowie deren
//! Vorgänger. Partials binden sich an die aktuelle Challenge; der Vorgänger
//! bleibt innerhalb der Deadline-Gnadenfrist akzeptabel.

use sp_chain::SignagePoint;
use sp_crypto::Hash32;
use std::sync::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    challenge: Hash32,
    /// Unix-Sekunden, ab denen diese Challenge galt
    since: u64,
}

#[derive(Default)]
struct TrackerInner {
    current: Option<Slot>,
    previous: Option<Slot>,
}

pub struct ChallengeTracker {
    inner: Mutex<TrackerInner>,
    /// Gnadenfrist, in der die Vorgänger-Challenge akzeptiert bleibt (== Deadline)
    grace_secs: u64,
}

impl ChallengeTracker {
    pub fn new(grace_secs: u64) -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            grace_secs,
        }
    }

    /// Übernimmt einen neuen Signage Point als aktuelle Challenge.
    pub fn rotate(&self, sp: &SignagePoint) {
        let Ok(mut g) = self.inner.lock() else { return };
        if let Some(cur) = g.current {
            if cur.challenge == sp.challenge_hash {
                return;
            }
            g.previous = Some(cur);
        }
        g.current = Some(Slot {
            challenge: sp.challenge_hash,
            since: sp.timestamp,
        });
        debug!(index = sp.signage_point_index, "challenge rotated");
    }

    pub fn current(&self) -> Option<Hash32> {
        self.inner.lock().ok().and_then(|g| g.current.map(|s| s.challenge))
    }

    /// Challenge-Bindung: aktuelle Challenge, oder die unmittelbar vorherige,
    /// solange die aktuelle jünger als die Gnadenfrist ist. Ohne bekannten
    /// Signage Point wird nichts akzeptiert.
    pub fn is_acceptable(&self, challenge: &Hash32, now: u64) -> bool {
        let Ok(g) = self.inner.lock() else { return false };
        let Some(cur) = g.current else { return false };
        if cur.challenge == *challenge {
            return true;
        }
        if let Some(prev) = g.previous {
            if prev.challenge == *challenge && now.saturating_sub(cur.since) <= self.grace_secs {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(ch: u8, ts: u64, idx: u32) -> SignagePoint {
        SignagePoint {
            challenge_hash: [ch; 32],
            signage_point_index: idx,
            peak_height: 100,
            timestamp: ts,
        }
    }

    #[test]
    fn no_challenge_accepts_nothing() {
        let t = ChallengeTracker::new(28);
        assert!(!t.is_acceptable(&[1; 32], 100));
        assert!(t.current().is_none());
    }

    #[test]
    fn current_challenge_accepted() {
        let t = ChallengeTracker::new(28);
        t.rotate(&sp(1, 100, 0));
        assert!(t.is_acceptable(&[1; 32], 100));
        assert_eq!(t.current(), Some([1; 32]));
    }

    #[test]
    fn previous_within_grace_accepted() {
        let t = ChallengeTracker::new(28);
        t.rotate(&sp(1, 100, 0));
        t.rotate(&sp(2, 110, 1));
        // Vorgänger innerhalb der Gnadenfrist
        assert!(t.is_acceptable(&[1; 32], 120));
        // nach Ablauf nicht mehr
        assert!(!t.is_acceptable(&[1; 32], 139));
    }

    #[test]
    fn two_rotations_old_is_rejected() {
        let t = ChallengeTracker::new(28);
        t.rotate(&sp(1, 100, 0));
        t.rotate(&sp(2, 110, 1));
        t.rotate(&sp(3, 120, 2));
        // zwei Signage Points alt → immer abgelehnt
        assert!(!t.is_acceptable(&[1; 32], 121));
        assert!(t.is_acceptable(&[2; 32], 121));
        assert!(t.is_acceptable(&[3; 32], 121));
    }

    #[test]
    fn duplicate_rotation_keeps_previous() {
        let t = ChallengeTracker::new(28);
        t.rotate(&sp(1, 100, 0));
        t.rotate(&sp(2, 110, 1));
        t.rotate(&sp(2, 111, 1));
        assert!(t.is_acceptable(&[1; 32], 112));
    }
}
