//! Configuration for the cache subsystem.
//!
//! Loaded from environment variables; every knob except the two URLs has a
//! default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port).
    pub redis_url: String,
    /// Postgres URL for the system of record.
    pub database_url: String,
    /// Revalidation sweep period, seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// TTL for entity snapshot keys, seconds.
    #[serde(default = "default_entity_ttl_secs")]
    pub entity_ttl_secs: u64,
    /// TTL hygiene bound for follow-index keys, seconds. Correctness never
    /// depends on expiry; the precache wipe is the schema-change story.
    #[serde(default = "default_follow_ttl_secs")]
    pub follow_ttl_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_entity_ttl_secs() -> u64 {
    86_400 // 24 hours
}

fn default_follow_ttl_secs() -> u64 {
    86_400 // 24 hours
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            database_url: "postgres://postgres@127.0.0.1:5432/quill".to_string(),
            sweep_interval_secs: default_sweep_interval_secs(),
            entity_ttl_secs: default_entity_ttl_secs(),
            follow_ttl_secs: default_follow_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .context("REDIS_URL environment variable not set")?,
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            sweep_interval_secs: std::env::var("CACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_sweep_interval_secs),
            entity_ttl_secs: std::env::var("CACHE_ENTITY_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_entity_ttl_secs),
            follow_ttl_secs: std::env::var("CACHE_FOLLOW_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_follow_ttl_secs),
        })
    }
}
