// SPDX-License-Identifier: AGPL-3.0-only

//! Sessions, Auth-Tokens und Rate-Limiting der Farmer-Schnittstelle.
//!
//! Rate-Limit ist ein festes Minutenfenster: Zähler pro Farmer, Schlüssel ist
//! die aktuelle Unix-Minute, Reset damit implizit an der Minutengrenze.

use crate::error::AuthFailure;
use rand::rngs::OsRng;
use rand::RngCore;
use sp_crypto::{bls_pk_from_bytes, bls_verify};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Session-Lebensdauer: 1 Stunde
const SESSION_TTL_SECS: u64 = 3600;
/// Token-Lebensdauer: 24 Stunden
const TOKEN_TTL_SECS: u64 = 86_400;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub session_id: [u8; 32],
    pub farmer_id: [u8; 32],
    pub created_time: u64,
    pub expiry_time: u64,
    pub request_count: u32,
    pub is_authenticated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthToken {
    pub token_data: [u8; 64],
    pub issue_time: u64,
    pub expiry_time: u64,
    pub farmer_public_key: [u8; 48],
}

#[derive(Clone, Copy, Default)]
struct RateSlot {
    minute: u64,
    count: u32,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<[u8; 32], Session>>,
    rate: Mutex<HashMap<[u8; 32], RateSlot>>,
    max_requests_per_minute: u32,
}

impl SessionManager {
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            rate: Mutex::new(HashMap::new()),
            max_requests_per_minute: max_requests_per_minute.max(1),
        }
    }

    fn random_bytes<const N: usize>() -> [u8; N] {
        let mut out = [0u8; N];
        OsRng.fill_bytes(&mut out);
        out
    }

    pub fn create_session(&self, farmer_id: &[u8; 32], now: u64) -> Option<Session> {
        let session = Session {
            session_id: Self::random_bytes::<32>(),
            farmer_id: *farmer_id,
            created_time: now,
            expiry_time: now + SESSION_TTL_SECS,
            request_count: 0,
            is_authenticated: true,
        };
        let mut g = self.sessions.lock().ok()?;
        g.insert(session.session_id, session.clone());
        info!(farmer = %hex_fmt(farmer_id), "session created");
        Some(session)
    }

    /// Validiert eine Session und zählt den Request. Abgelaufene Sessions
    /// werden dabei entfernt.
    pub fn validate_session(&self, session_id: &[u8; 32], now: u64) -> bool {
        let Ok(mut g) = self.sessions.lock() else { return false };
        let expired = match g.get(session_id) {
            Some(s) => now > s.expiry_time,
            None => {
                debug!("session not found");
                return false;
            }
        };
        if expired {
            g.remove(session_id);
            warn!("session expired");
            return false;
        }
        if let Some(s) = g.get_mut(session_id) {
            s.request_count += 1;
            true
        } else {
            false
        }
    }

    pub fn destroy_session(&self, session_id: &[u8; 32]) -> bool {
        match self.sessions.lock() {
            Ok(mut g) => g.remove(session_id).is_some(),
            Err(_) => false,
        }
    }

    /// Periodischer Sweep; Rückgabe: Anzahl entfernter Sessions.
    pub fn sweep_expired(&self, now: u64) -> usize {
        let Ok(mut g) = self.sessions.lock() else { return 0 };
        let before = g.len();
        g.retain(|_, s| now <= s.expiry_time);
        let removed = before - g.len();
        if removed > 0 {
            info!(removed, "expired sessions cleaned");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn issue_token(&self, farmer_public_key: &[u8; 48], now: u64) -> AuthToken {
        AuthToken {
            token_data: Self::random_bytes::<64>(),
            issue_time: now,
            expiry_time: now + TOKEN_TTL_SECS,
            farmer_public_key: *farmer_public_key,
        }
    }

    /// Token-Validierung: Ablauf → Signatur über die Token-Bytes → Rate-Limit.
    pub fn validate_token(
        &self,
        token: &AuthToken,
        signature: &[u8; 96],
        now: u64,
    ) -> Result<(), AuthFailure> {
        if now > token.expiry_time {
            warn!("auth token expired");
            return Err(AuthFailure::ExpiredToken);
        }
        let pk = bls_pk_from_bytes(&token.farmer_public_key)
            .ok_or(AuthFailure::InvalidToken)?;
        if !bls_verify(&token.token_data, signature, &pk) {
            warn!("auth token signature invalid");
            return Err(AuthFailure::InvalidSignature);
        }
        // farmer_id für das Rate-Limit: erste 32 Bytes des Pubkeys
        let mut farmer_id = [0u8; 32];
        if let Some(head) = token.farmer_public_key.get(..32) {
            farmer_id.copy_from_slice(head);
        }
        if !self.check_rate_limit(&farmer_id, now) {
            return Err(AuthFailure::RateLimited);
        }
        Ok(())
    }

    /// true = Request erlaubt (und gezählt); false = Limit erreicht.
    pub fn check_rate_limit(&self, farmer_id: &[u8; 32], now: u64) -> bool {
        let minute = now / 60;
        let Ok(mut g) = self.rate.lock() else { return false };
        let slot = g.entry(*farmer_id).or_default();
        if slot.minute != minute {
            slot.minute = minute;
            slot.count = 0;
        }
        if slot.count >= self.max_requests_per_minute {
            warn!(farmer = %hex_fmt(farmer_id), "rate limit exceeded");
            return false;
        }
        slot.count += 1;
        true
    }

    pub fn reset_rate_limit(&self, farmer_id: &[u8; 32]) {
        if let Ok(mut g) = self.rate.lock() {
            g.remove(farmer_id);
        }
    }
}

fn hex_fmt(b: &[u8; 32]) -> String {
    let mut s = String::with_capacity(16);
    for byte in b.iter().take(8) {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}
