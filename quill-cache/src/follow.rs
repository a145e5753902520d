//! Follow-graph cache: the two mirror indices.
//!
//! For every edge kind the cache holds "who follows X" and "what Y follows"
//! as separate KV sets. The pair must always agree; divergence is treated as
//! corruption and flagged for an operator-invoked rebuild, never patched
//! individually.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::entity::EntityCache;
use crate::error::{CacheError, CacheResult};
use crate::keys::CacheKey;
use crate::snapshot::{EdgeKind, EntityKind, EntitySnapshot};
use crate::source::SourceOfRecord;
use kv_store::KeyValue;

#[derive(Clone)]
pub struct FollowGraphCache {
    kv: Arc<dyn KeyValue>,
    source: Arc<dyn SourceOfRecord>,
    entities: EntityCache,
    ttl_secs: u64,
    rebuild_required: Arc<AtomicBool>,
}

impl FollowGraphCache {
    pub fn new(
        kv: Arc<dyn KeyValue>,
        source: Arc<dyn SourceOfRecord>,
        entities: EntityCache,
        ttl_secs: u64,
    ) -> Self {
        Self {
            kv,
            source,
            entities,
            ttl_secs,
            rebuild_required: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Follower ids of a target. An empty cached set is indistinguishable
    /// from a miss and re-derives from the system of record; that keeps
    /// every index write single-key-atomic.
    pub async fn followers_of(&self, kind: EdgeKind, target_id: i32) -> CacheResult<BTreeSet<i32>> {
        let key = CacheKey::followers(kind, target_id);
        if let Some(cached) = self.read_set(&key).await {
            return Ok(cached);
        }

        let ids = self.source.follower_ids(kind, target_id).await?;
        self.write_set(&key, &ids).await;
        Ok(ids.into_iter().collect())
    }

    /// What a follower follows, for one edge kind. Mirror of
    /// [`followers_of`](Self::followers_of).
    pub async fn follows_of(&self, follower_id: i32, kind: EdgeKind) -> CacheResult<BTreeSet<i32>> {
        let key = CacheKey::follows(kind, follower_id);
        if let Some(cached) = self.read_set(&key).await {
            return Ok(cached);
        }

        let ids = self.source.followed_ids(follower_id, kind).await?;
        self.write_set(&key, &ids).await;
        Ok(ids.into_iter().collect())
    }

    /// Revalidate both mirror sides of an edge from the system of record.
    ///
    /// Called by the revalidation sweep only, never inline with the
    /// triggering write. The single-member patch up front is an optimistic
    /// optimization; the wholesale recompute below is the authoritative
    /// write, because patches alone cannot detect duplicate or reordered
    /// events.
    pub async fn record_edge(
        &self,
        kind: EdgeKind,
        target_id: i32,
        follower_id: i32,
        inserted: bool,
    ) -> CacheResult<()> {
        let followers_key = CacheKey::followers(kind, target_id);
        let follows_key = CacheKey::follows(kind, follower_id);

        let target = target_id.to_string();
        let follower = follower_id.to_string();
        let patch = if inserted {
            let a = self.kv.sadd(&followers_key, &follower).await;
            let b = self.kv.sadd(&follows_key, &target).await;
            a.and(b)
        } else {
            let a = self.kv.srem(&followers_key, &follower).await;
            let b = self.kv.srem(&follows_key, &target).await;
            a.and(b)
        };
        if let Err(e) = patch {
            debug!(kind = %kind, error = %e, "Optimistic edge patch failed");
        }

        let follower_ids = self.source.follower_ids(kind, target_id).await?;
        self.kv
            .sreplace(&followers_key, &to_members(&follower_ids))
            .await?;
        if !follower_ids.is_empty() {
            let _ = self.kv.expire(&followers_key, self.ttl_secs).await;
        }

        let followed_ids = self.source.followed_ids(follower_id, kind).await?;
        self.kv
            .sreplace(&follows_key, &to_members(&followed_ids))
            .await?;
        if !followed_ids.is_empty() {
            let _ = self.kv.expire(&follows_key, self.ttl_secs).await;
        }

        debug!(
            kind = %kind,
            target = target_id,
            follower = follower_id,
            inserted = inserted,
            "Edge indices recomputed"
        );

        self.verify_mirror(kind, target_id, follower_id).await
    }

    /// Resolve a target id set into full snapshots through the entity cache
    /// batch path. `owner_id` is the entity whose list this is; it is
    /// excluded here, so a stored self-edge can never surface.
    pub async fn materialize(
        &self,
        kind: EntityKind,
        owner_id: i32,
        ids: &BTreeSet<i32>,
    ) -> CacheResult<Vec<EntitySnapshot>> {
        let wanted: Vec<i32> = ids.iter().copied().filter(|id| *id != owner_id).collect();
        self.entities.get_many(kind, &wanted).await
    }

    /// Whether mirror divergence was detected since the last full rebuild.
    pub fn rebuild_required(&self) -> bool {
        self.rebuild_required.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_rebuild_flag(&self) {
        self.rebuild_required.store(false, Ordering::Relaxed);
    }

    /// Check that the two freshly written indices agree for one pair.
    /// Divergence is logged, flagged for an operator rebuild, and returned
    /// as an error; it is never healed by a partial patch.
    async fn verify_mirror(
        &self,
        kind: EdgeKind,
        target_id: i32,
        follower_id: i32,
    ) -> CacheResult<()> {
        let followers = self
            .kv
            .smembers(&CacheKey::followers(kind, target_id))
            .await?;
        let follows = self.kv.smembers(&CacheKey::follows(kind, follower_id)).await?;

        let has_follower = followers.iter().any(|m| m == &follower_id.to_string());
        let has_target = follows.iter().any(|m| m == &target_id.to_string());

        if has_follower != has_target {
            error!(
                kind = %kind,
                target = target_id,
                follower = follower_id,
                followers_side = has_follower,
                follows_side = has_target,
                "Mirror index divergence detected, full rebuild required"
            );
            self.rebuild_required.store(true, Ordering::Relaxed);
            return Err(CacheError::InconsistentEdge {
                kind,
                target: target_id,
                follower: follower_id,
            });
        }
        Ok(())
    }

    /// Read a cached id set; KV errors, unparseable members and empty sets
    /// all read as a miss.
    async fn read_set(&self, key: &str) -> Option<BTreeSet<i32>> {
        let members = match self.kv.smembers(key).await {
            Ok(members) => members,
            Err(e) => {
                warn!(key = %key, error = %e, "KV set read failed, falling back to system of record");
                return None;
            }
        };
        if members.is_empty() {
            return None;
        }

        let mut ids = BTreeSet::new();
        for member in &members {
            match member.parse::<i32>() {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => {
                    warn!(key = %key, member = %member, "Corrupt follow index member, refetching");
                    return None;
                }
            }
        }
        debug!(key = %key, count = ids.len(), "Follow index hit");
        Some(ids)
    }

    /// Best-effort wholesale write-back with the hygiene TTL.
    async fn write_set(&self, key: &str, ids: &[i32]) {
        if let Err(e) = self.kv.sreplace(key, &to_members(ids)).await {
            warn!(key = %key, error = %e, "Follow index write failed");
            return;
        }
        if !ids.is_empty() {
            if let Err(e) = self.kv.expire(key, self.ttl_secs).await {
                debug!(key = %key, error = %e, "Follow index expiry not set");
            }
        }
    }
}

fn to_members(ids: &[i32]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
