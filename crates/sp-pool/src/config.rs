// SPDX-License-Identifier: AGPL-3.0-only

use crate::error::PoolError;
use serde::Deserialize;
use sp_accounting::PayoutScheme;
use sp_crypto::DEFAULT_SUB_SLOT_ITERS;

fn default_true() -> bool {
    true
}
fn default_port() -> u16 {
    8444
}
fn default_fee() -> f64 {
    0.01
}
fn default_min_payout() -> u64 {
    1_000_000_000
}
fn default_deadline() -> u64 {
    28
}
fn default_difficulty_target() -> u64 {
    300
}
fn default_queue_max() -> usize {
    10_000
}
fn default_workers() -> usize {
    4
}
fn default_cache_budget() -> usize {
    100 * 1024 * 1024
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_min_difficulty() -> u64 {
    1
}
fn default_max_difficulty() -> u64 {
    1_000_000_000
}
fn default_sub_slot_iters() -> u64 {
    DEFAULT_SUB_SLOT_ITERS
}
fn default_rate_limit() -> u32 {
    60
}
fn default_adjust_interval() -> u64 {
    600
}
fn default_payout_scheme() -> String {
    "pplns".to_string()
}
fn default_rpc_host() -> String {
    "localhost".to_string()
}
fn default_rpc_port() -> u16 {
    8555
}

#[derive(Clone, Debug, Deserialize)]
pub struct NodeRpcConfig {
    #[serde(default = "default_rpc_host")]
    pub host: String,
    #[serde(default = "default_rpc_port")]
    pub port: u16,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
}

impl Default for NodeRpcConfig {
    fn default() -> Self {
        Self {
            host: default_rpc_host(),
            port: default_rpc_port(),
            cert_path: None,
            key_path: None,
        }
    }
}

/// Pool-Konfiguration; Defaults entsprechen dem üblichen Mainnet-Setup.
#[derive(Clone, Debug, Deserialize)]
pub struct PoolConfig {
    pub pool_name: String,
    pub pool_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bruchteil in [0,1]; intern als Basispunkte weiterverarbeitet
    #[serde(default = "default_fee")]
    pub pool_fee: f64,
    /// Mojos
    #[serde(default = "default_min_payout")]
    pub min_payout: u64,
    /// Sekunden
    #[serde(default = "default_deadline")]
    pub partial_deadline: u64,
    /// Ziel-Partials pro Tag und Farmer
    #[serde(default = "default_difficulty_target")]
    pub difficulty_target: u64,
    #[serde(default)]
    pub node_rpc: NodeRpcConfig,

    #[serde(default = "default_queue_max")]
    pub queue_max_size: usize,
    #[serde(default = "default_workers")]
    pub worker_threads: usize,
    #[serde(default = "default_cache_budget")]
    pub cache_budget_bytes: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_min_difficulty")]
    pub min_difficulty: u64,
    #[serde(default = "default_max_difficulty")]
    pub max_difficulty: u64,
    #[serde(default = "default_sub_slot_iters")]
    pub sub_slot_iters: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_adjust_interval")]
    pub difficulty_adjust_interval_secs: u64,
    /// "pps" oder "pplns"
    #[serde(default = "default_payout_scheme")]
    pub payout_scheme: String,
    /// fsync beim Persistieren von Singletons
    #[serde(default = "default_true")]
    pub fsync: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "SpacePool".to_string(),
            pool_url: "https://pool.example.com".to_string(),
            port: default_port(),
            pool_fee: default_fee(),
            min_payout: default_min_payout(),
            partial_deadline: default_deadline(),
            difficulty_target: default_difficulty_target(),
            node_rpc: NodeRpcConfig::default(),
            queue_max_size: default_queue_max(),
            worker_threads: default_workers(),
            cache_budget_bytes: default_cache_budget(),
            cache_ttl_seconds: default_cache_ttl(),
            min_difficulty: default_min_difficulty(),
            max_difficulty: default_max_difficulty(),
            sub_slot_iters: default_sub_slot_iters(),
            rate_limit_per_minute: default_rate_limit(),
            difficulty_adjust_interval_secs: default_adjust_interval(),
            payout_scheme: default_payout_scheme(),
            fsync: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.pool_name.is_empty() {
            return Err(PoolError::InvalidConfig("pool_name must not be empty".into()));
        }
        if self.port == 0 {
            return Err(PoolError::InvalidConfig("invalid port".into()));
        }
        if !(0.0..=1.0).contains(&self.pool_fee) {
            return Err(PoolError::InvalidConfig(
                "pool_fee must be between 0 and 1".into(),
            ));
        }
        if self.node_rpc.host.is_empty() {
            return Err(PoolError::InvalidConfig("node rpc host must not be empty".into()));
        }
        if self.partial_deadline == 0 {
            return Err(PoolError::InvalidConfig("partial_deadline must be > 0".into()));
        }
        if self.queue_max_size == 0 {
            return Err(PoolError::InvalidConfig("queue_max_size must be > 0".into()));
        }
        if self.worker_threads == 0 {
            return Err(PoolError::InvalidConfig("worker_threads must be > 0".into()));
        }
        if self.min_difficulty == 0 || self.min_difficulty > self.max_difficulty {
            return Err(PoolError::InvalidConfig(
                "difficulty range must satisfy 0 < min <= max".into(),
            ));
        }
        self.payout_scheme_parsed()?;
        Ok(())
    }

    pub fn pool_fee_bp(&self) -> u16 {
        sp_accounting::fee_bp_from_fraction(self.pool_fee)
    }

    pub fn payout_scheme_parsed(&self) -> Result<PayoutScheme, PoolError> {
        match self.payout_scheme.as_str() {
            "pps" => Ok(PayoutScheme::Pps),
            "pplns" => Ok(PayoutScheme::Pplns),
            other => Err(PoolError::InvalidConfig(format!(
                "unknown payout scheme '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = PoolConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.port, 8444);
        assert_eq!(cfg.partial_deadline, 28);
        assert_eq!(cfg.difficulty_target, 300);
        assert_eq!(cfg.min_payout, 1_000_000_000);
        assert_eq!(cfg.pool_fee_bp(), 100);
        assert_eq!(cfg.node_rpc.port, 8555);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = PoolConfig::default();
        cfg.pool_name.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = PoolConfig::default();
        cfg.port = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PoolConfig::default();
        cfg.pool_fee = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PoolConfig::default();
        cfg.min_difficulty = 100;
        cfg.max_difficulty = 10;
        assert!(cfg.validate().is_err());

        let mut cfg = PoolConfig::default();
        cfg.payout_scheme = "fifo".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_with_defaults_parses() {
        // Nur Pflichtfelder; alles andere fällt auf Defaults zurück
        let raw = r#"
            pool_name = "TestPool"
            pool_url = "https://test.example"

            [node_rpc]
            host = "10.0.0.2"
        "#;
        let cfg: PoolConfig = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.pool_name, "TestPool");
        assert_eq!(cfg.queue_max_size, 10_000);
        assert_eq!(cfg.node_rpc.host, "10.0.0.2");
        assert_eq!(cfg.node_rpc.port, 8555);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_full_override() {
        let raw = r#"
            pool_name = "P"
            pool_url = "u"
            pool_fee = 0.02
            partial_deadline = 20
            worker_threads = 2
            payout_scheme = "pps"
        "#;
        let cfg: PoolConfig = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.pool_fee_bp(), 200);
        assert_eq!(cfg.partial_deadline, 20);
        assert_eq!(cfg.payout_scheme_parsed().unwrap(), PayoutScheme::Pps);
    }
}
