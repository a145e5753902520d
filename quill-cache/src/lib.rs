//! Denormalized entity cache and invalidation layer for the Quill
//! publishing platform.
//!
//! Maintains read-optimized, pre-joined snapshots of authors and topics plus
//! their follow-relationships in a key-value store, keeps them consistent
//! with the relational system of record through asynchronous revalidation,
//! and supports cold-start bulk rebuild:
//!
//! - [`EntityCache`]: read-through snapshot cache, id- and slug-keyed.
//! - [`FollowGraphCache`]: the two mirror follow indices plus batch
//!   materialization into snapshots.
//! - [`PrecacheLoader`]: wipe-and-rebuild from the system of record.
//! - [`RevalidationManager`]: dirty-set collection and the periodic sweep.
//! - [`CacheHooks`]: commit-time change events that only enqueue ids.
//!
//! The cache is a pure function of the system of record plus a staleness
//! window bounded by the sweep interval; it may be discarded and rebuilt at
//! any time without data loss.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use quill_cache::{
//!     CacheConfig, EntityCache, FollowGraphCache, PgSource, PrecacheLoader,
//!     RevalidationManager,
//! };
//! use kv_store::{KeyValue, RedisKv};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = CacheConfig::from_env()?;
//! let kv: Arc<dyn KeyValue> = Arc::new(RedisKv::connect(&config.redis_url).await?);
//! let pool = sqlx::PgPool::connect(&config.database_url).await?;
//! let source = Arc::new(PgSource::new(pool));
//!
//! let entities = EntityCache::new(kv.clone(), source.clone(), config.entity_ttl_secs);
//! let follows = FollowGraphCache::new(
//!     kv.clone(), source.clone(), entities.clone(), config.follow_ttl_secs,
//! );
//!
//! let precache = PrecacheLoader::new(
//!     kv.clone(), source.clone(), entities.clone(), follows.clone(),
//! );
//! precache.rebuild_all().await?;
//!
//! let revalidation = Arc::new(RevalidationManager::new(
//!     entities, follows, source, kv,
//!     Duration::from_secs(config.sweep_interval_secs),
//! ));
//! let loop_handle = revalidation.start();
//! // ... serve traffic, route change events through CacheHooks ...
//! loop_handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod follow;
pub mod hooks;
pub mod keys;
pub mod precache;
pub mod revalidation;
pub mod snapshot;
pub mod source;

pub use config::CacheConfig;
pub use entity::{EntityCache, EntityRef};
pub use error::{CacheError, CacheResult};
pub use follow::FollowGraphCache;
pub use hooks::{CacheHooks, ChangeEvents, EdgeOp, EntityOp};
pub use keys::CacheKey;
pub use precache::{PrecacheLoader, PrecacheReport};
pub use revalidation::{RevalidationHandle, RevalidationManager, SweepReport, INVALIDATION_CHANNEL};
pub use snapshot::{
    AuthorSnapshot, AuthorStat, EdgeKind, EntityKind, EntitySnapshot, TopicSnapshot, TopicStat,
};
pub use source::{PgSource, SourceOfRecord};
