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

//! Partial-Ingestion-Pipeline des Pools: Queue, Validator, Sessions,
//! Statistik und Orchestrierung.

pub mod challenge;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod session;
pub mod stats;
pub mod validator;

pub use challenge::ChallengeTracker;
pub use config::{NodeRpcConfig, PoolConfig};
pub use error::{AuthFailure, PartialRejection, PoolError};
pub use orchestrator::{Pool, PoolState};
pub use queue::{PartialQueue, Popped, PushOutcome};
pub use session::{AuthToken, SessionManager};
pub use stats::{PoolStats, StatsSnapshot};
pub use validator::{PartialValidator, ValidOutcome};

/// Unix-Sekunden der Systemuhr.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
