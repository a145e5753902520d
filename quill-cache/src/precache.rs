//! Cold-start bulk rebuild.
//!
//! `rebuild_all` wipes the subsystem's whole KV namespace and rebuilds every
//! snapshot and both follow-index directions straight from the system of
//! record. It runs at process start or on operator demand and is serialized
//! against itself; one entity failing to precompute is skipped and logged,
//! never aborting the rebuild.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::entity::EntityCache;
use crate::error::{CacheError, CacheResult};
use crate::follow::FollowGraphCache;
use crate::keys::{CacheKey, ENTITY_PREFIX, FOLLOW_PREFIX};
use crate::snapshot::{EdgeKind, EntityKind};
use crate::source::SourceOfRecord;
use kv_store::KeyValue;

/// How many entities are rebuilt concurrently per phase.
const CONCURRENT_BATCH_SIZE: usize = 16;

/// Per-phase counters from one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    pub keys_wiped: usize,
    pub authors: usize,
    pub topics: usize,
    pub follow_sets: usize,
    pub failures: usize,
}

pub struct PrecacheLoader {
    kv: Arc<dyn KeyValue>,
    source: Arc<dyn SourceOfRecord>,
    entities: EntityCache,
    follows: FollowGraphCache,
    // Single-flight guard: a second concurrent rebuild bails out instead of
    // queueing behind the first.
    running: Mutex<()>,
}

impl PrecacheLoader {
    pub fn new(
        kv: Arc<dyn KeyValue>,
        source: Arc<dyn SourceOfRecord>,
        entities: EntityCache,
        follows: FollowGraphCache,
    ) -> Self {
        Self {
            kv,
            source,
            entities,
            follows,
            running: Mutex::new(()),
        }
    }

    /// Full rebuild from the system of record.
    ///
    /// Idempotent: two consecutive runs with no intervening writes produce
    /// identical cache contents (aside from volatile timestamps), because
    /// the wipe in phase one guarantees no residue from earlier schemas.
    pub async fn rebuild_all(&self) -> CacheResult<PrecacheReport> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| CacheError::RebuildInProgress)?;

        let start = Instant::now();
        let mut report = PrecacheReport::default();

        // Phase 1: explicit wipe, not TTL expiry. Stale entries from a
        // previous key schema must not survive.
        report.keys_wiped = self.kv.del_prefix(ENTITY_PREFIX).await?
            + self.kv.del_prefix(FOLLOW_PREFIX).await?;
        info!(keys_wiped = report.keys_wiped, "Precache phase 1: namespace wiped");

        // Phase 2: entity snapshots.
        let author_ids = self.source.visible_author_ids().await?;
        let topic_ids = self.source.visible_topic_ids().await?;

        let (written, failed) = self.snapshot_phase(EntityKind::Author, &author_ids).await;
        report.authors = written;
        report.failures += failed;

        let (written, failed) = self.snapshot_phase(EntityKind::Topic, &topic_ids).await;
        report.topics = written;
        report.failures += failed;

        info!(
            authors = report.authors,
            topics = report.topics,
            "Precache phase 2: snapshots written"
        );

        // Phase 3: both follow-index directions. Authors are the only
        // followers, so the follows-side is driven off the author list.
        let (written, failed) = self.follow_phase(&author_ids, &topic_ids).await;
        report.follow_sets = written;
        report.failures += failed;

        info!(
            follow_sets = report.follow_sets,
            failures = report.failures,
            elapsed_ms = start.elapsed().as_millis(),
            "Precache phase 3: follow indices written, rebuild complete"
        );

        self.follows.clear_rebuild_flag();
        Ok(report)
    }

    /// Write a snapshot for every id of one kind; skip-and-log on failure.
    async fn snapshot_phase(&self, kind: EntityKind, ids: &[i32]) -> (usize, usize) {
        let results: Vec<Result<(), ()>> = stream::iter(ids.iter().copied())
            .map(|id| async move {
                match self.source.entity_by_id(kind, id).await {
                    Ok(Some(snapshot)) => match self.entities.put(&snapshot).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            warn!(kind = %kind, id = id, error = %e, "Precache snapshot write failed");
                            Err(())
                        }
                    },
                    Ok(None) => {
                        // Listed a moment ago, gone now; nothing to cache.
                        warn!(kind = %kind, id = id, "Entity vanished during precache");
                        Err(())
                    }
                    Err(e) => {
                        warn!(kind = %kind, id = id, error = %e, "Precache snapshot fetch failed");
                        Err(())
                    }
                }
            })
            .buffer_unordered(CONCURRENT_BATCH_SIZE)
            .collect()
            .await;

        let written = results.iter().filter(|r| r.is_ok()).count();
        (written, results.len() - written)
    }

    /// Write both follow-index directions for every author and topic.
    async fn follow_phase(&self, author_ids: &[i32], topic_ids: &[i32]) -> (usize, usize) {
        let mut written = 0;
        let mut failed = 0;

        // Follower sides: every followable target.
        let mut targets: Vec<(EdgeKind, i32)> = Vec::new();
        targets.extend(author_ids.iter().map(|id| (EdgeKind::Author, *id)));
        targets.extend(topic_ids.iter().map(|id| (EdgeKind::Topic, *id)));

        let results: Vec<bool> = stream::iter(targets)
            .map(|(kind, id)| async move { self.write_follower_side(kind, id).await })
            .buffer_unordered(CONCURRENT_BATCH_SIZE)
            .collect()
            .await;
        written += results.iter().filter(|ok| **ok).count();
        failed += results.iter().filter(|ok| !**ok).count();

        // Follows sides: per follower, one set per edge kind.
        let follows: Vec<(i32, EdgeKind)> = author_ids
            .iter()
            .flat_map(|id| EdgeKind::ALL.into_iter().map(move |kind| (*id, kind)))
            .collect();

        let results: Vec<bool> = stream::iter(follows)
            .map(|(id, kind)| async move { self.write_follows_side(id, kind).await })
            .buffer_unordered(CONCURRENT_BATCH_SIZE)
            .collect()
            .await;
        written += results.iter().filter(|ok| **ok).count();
        failed += results.iter().filter(|ok| !**ok).count();

        (written, failed)
    }

    async fn write_follower_side(&self, kind: EdgeKind, target_id: i32) -> bool {
        match self.source.follower_ids(kind, target_id).await {
            Ok(ids) => {
                let key = CacheKey::followers(kind, target_id);
                let members: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                match self.kv.sreplace(&key, &members).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Precache follower index write failed");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(kind = %kind, target = target_id, error = %e, "Precache follower fetch failed");
                false
            }
        }
    }

    async fn write_follows_side(&self, follower_id: i32, kind: EdgeKind) -> bool {
        match self.source.followed_ids(follower_id, kind).await {
            Ok(ids) => {
                let key = CacheKey::follows(kind, follower_id);
                let members: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                match self.kv.sreplace(&key, &members).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Precache follows index write failed");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(follower = follower_id, kind = %kind, error = %e, "Precache follows fetch failed");
                false
            }
        }
    }
}
