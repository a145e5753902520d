//! Cache error taxonomy.
//!
//! Three families matter to callers: transient KV trouble (fall back to the
//! system of record), system-of-record failures (propagate, the truth is
//! unknown), and detected mirror-index divergence (flag for an operator
//! rebuild, never auto-heal).

use thiserror::Error;

use crate::snapshot::EdgeKind;

#[derive(Error, Debug)]
pub enum CacheError {
    /// KV store unreachable or misbehaving. Recoverable: the caller falls
    /// open to the system of record.
    #[error("transient cache error: {0}")]
    Transient(#[from] kv_store::KvError),

    /// The authoritative store failed. Not recoverable locally.
    #[error("system of record error: {0}")]
    Source(#[from] sqlx::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The two mirror follow indices disagree for a (target, follower) pair.
    #[error("mirror index divergence for {kind} edge target={target} follower={follower}")]
    InconsistentEdge {
        kind: EdgeKind,
        target: i32,
        follower: i32,
    },

    /// A second `rebuild_all` was invoked while one was running.
    #[error("precache rebuild already in progress")]
    RebuildInProgress,
}

pub type CacheResult<T> = Result<T, CacheError>;
