//! Dirty-set collection and the periodic revalidation sweep.
//!
//! Change-event hooks mark ids dirty; a background loop drains the dirty
//! set on a fixed period and re-derives every affected cache entry from the
//! system of record, never from the stale cache. The dirty set is the only
//! shared mutable state in the subsystem and sits behind one mutex; the
//! drain is an atomic swap, so marks arriving mid-sweep land in the next
//! sweep instead of being lost or double-processed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::entity::EntityCache;
use crate::follow::FollowGraphCache;
use crate::snapshot::{EdgeKind, EntityKind};
use crate::source::SourceOfRecord;
use kv_store::KeyValue;

/// Channel carrying per-entity invalidation notices for other processes.
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";

/// Ids pending revalidation. Sets, not queues: duplicate marks collapse.
#[derive(Debug, Default)]
struct DirtySet {
    authors: HashSet<i32>,
    topics: HashSet<i32>,
    /// Edge triples to recompute; the flag is the last observed operation
    /// (true = inserted), used only for the optimistic patch.
    edges: HashMap<(EdgeKind, i32, i32), bool>,
}

impl DirtySet {
    fn is_empty(&self) -> bool {
        self.authors.is_empty() && self.topics.is_empty() && self.edges.is_empty()
    }

    fn len(&self) -> usize {
        self.authors.len() + self.topics.len() + self.edges.len()
    }
}

/// Counters from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub entities: usize,
    pub evicted: usize,
    pub edges: usize,
    pub failures: usize,
}

pub struct RevalidationManager {
    dirty: StdMutex<DirtySet>,
    entities: EntityCache,
    follows: FollowGraphCache,
    source: Arc<dyn SourceOfRecord>,
    kv: Arc<dyn KeyValue>,
    interval: Duration,
}

impl RevalidationManager {
    pub fn new(
        entities: EntityCache,
        follows: FollowGraphCache,
        source: Arc<dyn SourceOfRecord>,
        kv: Arc<dyn KeyValue>,
        interval: Duration,
    ) -> Self {
        Self {
            dirty: StdMutex::new(DirtySet::default()),
            entities,
            follows,
            source,
            kv,
            interval,
        }
    }

    /// Mark an entity for revalidation. O(1), non-blocking, touches no KV.
    /// Safe to call from any number of concurrent producers.
    pub fn mark_dirty(&self, kind: EntityKind, id: i32) {
        let mut dirty = self.lock_dirty();
        match kind {
            EntityKind::Author => dirty.authors.insert(id),
            EntityKind::Topic => dirty.topics.insert(id),
        };
    }

    /// Mark a follow edge for mirror recompute. Both endpoints should also
    /// be marked dirty by the caller (their follower counters changed).
    pub fn mark_edge(&self, kind: EdgeKind, target_id: i32, follower_id: i32, inserted: bool) {
        let mut dirty = self.lock_dirty();
        dirty.edges.insert((kind, target_id, follower_id), inserted);
    }

    /// Number of ids currently pending. Observability only.
    pub fn pending(&self) -> usize {
        self.lock_dirty().len()
    }

    /// Drain the dirty set and revalidate everything in it.
    ///
    /// The drain happens under the lock; all KV and source I/O happens
    /// outside it. A single id failing is logged and dropped from this
    /// sweep — a future write re-marks it. No defined revalidation order.
    pub async fn sweep(&self) -> SweepReport {
        let drained = { std::mem::take(&mut *self.lock_dirty()) };
        if drained.is_empty() {
            return SweepReport::default();
        }

        debug!(pending = drained.len(), "Sweep started");
        let mut report = SweepReport::default();

        let authors = drained.authors.iter().map(|id| (EntityKind::Author, *id));
        let topics = drained.topics.iter().map(|id| (EntityKind::Topic, *id));
        for (kind, id) in authors.chain(topics) {
            match self.revalidate_entity(kind, id).await {
                Ok(existed) => {
                    if existed {
                        report.entities += 1;
                    } else {
                        report.evicted += 1;
                    }
                    self.publish_invalidation(kind, id).await;
                }
                Err(e) => {
                    warn!(kind = %kind, id = id, error = %e, "Revalidation failed, dropping from sweep");
                    report.failures += 1;
                }
            }
        }

        for ((kind, target_id, follower_id), inserted) in drained.edges {
            match self
                .follows
                .record_edge(kind, target_id, follower_id, inserted)
                .await
            {
                Ok(()) => report.edges += 1,
                Err(e) => {
                    warn!(
                        kind = %kind,
                        target = target_id,
                        follower = follower_id,
                        error = %e,
                        "Edge revalidation failed, dropping from sweep"
                    );
                    report.failures += 1;
                }
            }
        }

        info!(
            entities = report.entities,
            evicted = report.evicted,
            edges = report.edges,
            failures = report.failures,
            "Sweep completed"
        );
        report
    }

    /// Spawn the periodic sweep loop. The first sweep fires one interval
    /// after start; an in-flight sweep always finishes before shutdown.
    pub fn start(self: Arc<Self>) -> RevalidationHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let manager = self;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval's first tick is immediate; the sweep period starts now.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Revalidation loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.sweep().await;
                    }
                }
            }
        });

        RevalidationHandle {
            shutdown_tx,
            handle,
        }
    }

    /// Re-derive one entity from the source. Returns whether it still
    /// exists; gone entities are evicted from the cache.
    async fn revalidate_entity(
        &self,
        kind: EntityKind,
        id: i32,
    ) -> crate::error::CacheResult<bool> {
        match self.source.entity_by_id(kind, id).await? {
            Some(snapshot) => {
                self.entities.put(&snapshot).await?;
                Ok(true)
            }
            None => {
                let slug = self.entities.peek(kind, id).await.map(|s| s.slug().to_string());
                self.entities.evict(kind, id, slug.as_deref()).await?;
                Ok(false)
            }
        }
    }

    /// Best-effort cross-process notice; a lost publish costs nothing
    /// locally.
    async fn publish_invalidation(&self, kind: EntityKind, id: i32) {
        let payload = serde_json::json!({ "kind": kind, "id": id }).to_string();
        if let Err(e) = self.kv.publish(INVALIDATION_CHANNEL, &payload).await {
            debug!(kind = %kind, id = id, error = %e, "Invalidation publish failed");
        }
    }

    fn lock_dirty(&self) -> std::sync::MutexGuard<'_, DirtySet> {
        // A poisoned lock only means a panic mid-insert; the set stays usable.
        self.dirty.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to the running sweep loop. `stop` finishes the in-flight sweep
/// and joins the task; the loop also terminates within one interval of the
/// signal even if a sweep just started.
pub struct RevalidationHandle {
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl RevalidationHandle {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}
