// SPDX-License-Identifier: AGPL-3.0-only

use core::fmt;

/// Ausgang einer Partial-Validierung, sofern nicht `Valid`. Wird dem Einreicher
/// gemeldet; niemals fatal für den Pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartialRejection {
    TooLate,
    Duplicate,
    InvalidSingleton,
    InvalidSignature,
    InvalidProof,
    InvalidChallenge,
    InternalError,
}

impl PartialRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooLate => "TOO_LATE",
            Self::Duplicate => "DUPLICATE",
            Self::InvalidSingleton => "INVALID_SINGLETON",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidProof => "INVALID_PROOF",
            Self::InvalidChallenge => "INVALID_CHALLENGE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn all() -> [PartialRejection; 7] {
        [
            Self::TooLate,
            Self::Duplicate,
            Self::InvalidSingleton,
            Self::InvalidSignature,
            Self::InvalidProof,
            Self::InvalidChallenge,
            Self::InternalError,
        ]
    }
}

impl fmt::Display for PartialRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for PartialRejection {}

/// Authentifizierungs-Fehler der Session-/Token-Schicht.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidSignature,
    ExpiredToken,
    InvalidToken,
    RateLimited,
    InternalError,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::ExpiredToken => "EXPIRED_TOKEN",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for AuthFailure {}

/// Fehler der Orchestrator-Ebene; `Fatal`-Varianten führen zu Exit-Code 2.
#[derive(Debug)]
pub enum PoolError {
    InvalidConfig(String),
    InvalidStateTransition(&'static str),
    CryptoInit(String),
    Persistence(String),
    Shutdown,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "invalid pool config: {e}"),
            Self::InvalidStateTransition(e) => write!(f, "invalid state transition: {e}"),
            Self::CryptoInit(e) => write!(f, "crypto subsystem init failed: {e}"),
            Self::Persistence(e) => write!(f, "persistence failure: {e}"),
            Self::Shutdown => f.write_str("pool is shutting down"),
        }
    }
}

impl std::error::Error for PoolError {}
