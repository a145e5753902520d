//! Read-through entity snapshot cache.
//!
//! Snapshots live under two key forms (id and slug) that always resolve to
//! the same value. KV errors fall open to the system of record; source
//! errors propagate, because the caller has no valid data to serve.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::keys::CacheKey;
use crate::snapshot::{EntityKind, EntitySnapshot};
use crate::source::SourceOfRecord;
use kv_store::KeyValue;

/// A lookup reference: numeric id or human-readable slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Id(i32),
    Slug(String),
}

impl EntityRef {
    /// Parse a raw identifier: all-digit strings are ids, anything else is
    /// a slug.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i32>() {
            Ok(id) => EntityRef::Id(id),
            Err(_) => EntityRef::Slug(raw.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct EntityCache {
    kv: Arc<dyn KeyValue>,
    source: Arc<dyn SourceOfRecord>,
    ttl_secs: u64,
}

impl EntityCache {
    pub fn new(kv: Arc<dyn KeyValue>, source: Arc<dyn SourceOfRecord>, ttl_secs: u64) -> Self {
        Self { kv, source, ttl_secs }
    }

    /// Look up by id or slug. `Ok(None)` means the entity does not exist in
    /// the system of record; a cold cache is never reported as absence.
    pub async fn get(&self, kind: EntityKind, reference: &EntityRef) -> CacheResult<Option<EntitySnapshot>> {
        match reference {
            EntityRef::Id(id) => self.get_by_id(kind, *id).await,
            EntityRef::Slug(slug) => self.get_by_slug(kind, slug).await,
        }
    }

    pub async fn get_by_id(&self, kind: EntityKind, id: i32) -> CacheResult<Option<EntitySnapshot>> {
        let key = CacheKey::entity_id(kind, id);
        if let Some(snapshot) = self.read_key(kind, &key).await {
            return Ok(Some(snapshot));
        }

        // Miss: one row from the system of record, stats joined.
        let Some(snapshot) = self.source.entity_by_id(kind, id).await? else {
            debug!(kind = %kind, id = id, "Entity absent in system of record");
            return Ok(None);
        };
        self.populate(&snapshot).await;
        Ok(Some(snapshot))
    }

    pub async fn get_by_slug(&self, kind: EntityKind, slug: &str) -> CacheResult<Option<EntitySnapshot>> {
        let key = CacheKey::entity_slug(kind, slug);
        if let Some(snapshot) = self.read_key(kind, &key).await {
            return Ok(Some(snapshot));
        }

        let Some(snapshot) = self.source.entity_by_slug(kind, slug).await? else {
            debug!(kind = %kind, slug = %slug, "Entity absent in system of record");
            return Ok(None);
        };
        self.populate(&snapshot).await;
        Ok(Some(snapshot))
    }

    /// Batch lookup by ids. Hits come from one batched KV read; all misses
    /// are fetched in a single source query, then written back individually.
    /// Results follow the input id order; absent ids are skipped.
    pub async fn get_many(&self, kind: EntityKind, ids: &[i32]) -> CacheResult<Vec<EntitySnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| CacheKey::entity_id(kind, *id)).collect();
        let raw_values = match self.kv.get_many(&keys).await {
            Ok(values) => values,
            Err(e) => {
                warn!(kind = %kind, error = %e, "KV batch read failed, treating all as misses");
                vec![None; ids.len()]
            }
        };

        let mut found: HashMap<i32, EntitySnapshot> = HashMap::with_capacity(ids.len());
        let mut missing: Vec<i32> = Vec::new();
        for (id, raw) in ids.iter().zip(raw_values.into_iter()) {
            match raw {
                Some(raw) => match EntitySnapshot::decode(kind, &raw) {
                    Ok(snapshot) => {
                        found.insert(*id, snapshot);
                    }
                    Err(e) => {
                        warn!(kind = %kind, id = id, error = %e, "Corrupt cache entry, refetching");
                        let _ = self.kv.del(&CacheKey::entity_id(kind, *id)).await;
                        missing.push(*id);
                    }
                },
                None => missing.push(*id),
            }
        }

        if !missing.is_empty() {
            debug!(kind = %kind, misses = missing.len(), "Batch cache misses");
            for snapshot in self.source.entities_by_ids(kind, &missing).await? {
                self.populate(&snapshot).await;
                found.insert(snapshot.id(), snapshot);
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// Unconditionally overwrite both key forms. Used by revalidation and by
    /// write paths that already hold a fresh snapshot.
    pub async fn put(&self, snapshot: &EntitySnapshot) -> CacheResult<()> {
        let encoded = snapshot.encode()?;
        let id_key = CacheKey::entity_id(snapshot.kind(), snapshot.id());
        let slug_key = CacheKey::entity_slug(snapshot.kind(), snapshot.slug());

        self.kv.set_ex(&id_key, &encoded, self.ttl_secs).await?;
        self.kv.set_ex(&slug_key, &encoded, self.ttl_secs).await?;

        debug!(kind = %snapshot.kind(), id = snapshot.id(), "Snapshot cached");
        Ok(())
    }

    /// Remove both key forms for an entity that no longer exists.
    pub async fn evict(&self, kind: EntityKind, id: i32, slug: Option<&str>) -> CacheResult<()> {
        self.kv.del(&CacheKey::entity_id(kind, id)).await?;
        if let Some(slug) = slug {
            self.kv.del(&CacheKey::entity_slug(kind, slug)).await?;
        }
        debug!(kind = %kind, id = id, "Snapshot evicted");
        Ok(())
    }

    /// Cache-only read, no source fallback. Used by revalidation to learn
    /// the slug of an entity that just disappeared from the source.
    pub(crate) async fn peek(&self, kind: EntityKind, id: i32) -> Option<EntitySnapshot> {
        self.read_key(kind, &CacheKey::entity_id(kind, id)).await
    }

    /// Read and decode one key; any KV or codec trouble reads as a miss.
    async fn read_key(&self, kind: EntityKind, key: &str) -> Option<EntitySnapshot> {
        match self.kv.get(key).await {
            Ok(Some(raw)) => match EntitySnapshot::decode(kind, &raw) {
                Ok(snapshot) => {
                    debug!(key = %key, "Cache hit");
                    Some(snapshot)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache deserialization failed");
                    // Delete the corrupt entry so the next read repopulates.
                    let _ = self.kv.del(key).await;
                    None
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "KV read failed, falling back to system of record");
                None
            }
        }
    }

    /// Best-effort write-back after a source fetch. A failed populate is a
    /// warning, not an error: the caller already holds the fresh snapshot.
    async fn populate(&self, snapshot: &EntitySnapshot) {
        if let Err(e) = self.put(snapshot).await {
            warn!(
                kind = %snapshot.kind(),
                id = snapshot.id(),
                error = %e,
                "Cache populate failed"
            );
        }
    }
}
