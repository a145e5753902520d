//! Shared fixtures: an in-memory system of record with call counting and a
//! builder for the full cache stack over `MemoryKv`.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use kv_store::{KeyValue, MemoryKv};
use quill_cache::{
    AuthorSnapshot, AuthorStat, CacheError, CacheResult, EdgeKind, EntityCache, EntityKind,
    FollowGraphCache, PrecacheLoader, RevalidationManager, SourceOfRecord, TopicSnapshot,
    TopicStat,
};

#[derive(Default)]
struct Inner {
    authors: HashMap<i32, AuthorSnapshot>,
    topics: HashMap<i32, TopicSnapshot>,
    edges: HashSet<(EdgeKind, i32, i32)>,
    /// Per-(follower, kind) answers overriding the edge set, for forcing
    /// mirror divergence.
    followed_overrides: HashMap<(i32, EdgeKind), Vec<i32>>,
}

/// Hashmap-backed [`SourceOfRecord`] with fetch instrumentation.
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
    entity_fetches: Mutex<HashMap<(EntityKind, i32), usize>>,
    batch_fetches: AtomicUsize,
    fail_entities: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_author(&self, snapshot: AuthorSnapshot) {
        self.inner.lock().unwrap().authors.insert(snapshot.id, snapshot);
    }

    pub fn put_topic(&self, snapshot: TopicSnapshot) {
        self.inner.lock().unwrap().topics.insert(snapshot.id, snapshot);
    }

    pub fn remove_author(&self, id: i32) {
        self.inner.lock().unwrap().authors.remove(&id);
    }

    pub fn add_edge(&self, kind: EdgeKind, target_id: i32, follower_id: i32) {
        self.inner
            .lock()
            .unwrap()
            .edges
            .insert((kind, target_id, follower_id));
    }

    pub fn remove_edge(&self, kind: EdgeKind, target_id: i32, follower_id: i32) {
        self.inner
            .lock()
            .unwrap()
            .edges
            .remove(&(kind, target_id, follower_id));
    }

    /// Force `followed_ids` to answer `ids` for one (follower, kind),
    /// regardless of the edge set. Used to simulate inconsistent edge data.
    pub fn override_followed(&self, follower_id: i32, kind: EdgeKind, ids: Vec<i32>) {
        self.inner
            .lock()
            .unwrap()
            .followed_overrides
            .insert((follower_id, kind), ids);
    }

    /// Make every entity fetch fail until cleared.
    pub fn set_fail_entities(&self, fail: bool) {
        self.fail_entities.store(fail, Ordering::SeqCst);
    }

    pub fn entity_fetch_count(&self, kind: EntityKind, id: i32) -> usize {
        *self
            .entity_fetches
            .lock()
            .unwrap()
            .get(&(kind, id))
            .unwrap_or(&0)
    }

    pub fn batch_fetch_count(&self) -> usize {
        self.batch_fetches.load(Ordering::SeqCst)
    }

    fn record_fetch(&self, kind: EntityKind, id: i32) {
        *self
            .entity_fetches
            .lock()
            .unwrap()
            .entry((kind, id))
            .or_insert(0) += 1;
    }

    fn check_failure(&self) -> CacheResult<()> {
        if self.fail_entities.load(Ordering::SeqCst) {
            return Err(CacheError::Source(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn fresh_author(&self, id: i32) -> Option<AuthorSnapshot> {
        self.inner.lock().unwrap().authors.get(&id).map(|a| {
            let mut a = a.clone();
            a.cached_at = Utc::now();
            a
        })
    }

    fn fresh_topic(&self, id: i32) -> Option<TopicSnapshot> {
        self.inner.lock().unwrap().topics.get(&id).map(|t| {
            let mut t = t.clone();
            t.cached_at = Utc::now();
            t
        })
    }
}

#[async_trait]
impl SourceOfRecord for MemorySource {
    async fn author_by_id(&self, id: i32) -> CacheResult<Option<AuthorSnapshot>> {
        self.check_failure()?;
        self.record_fetch(EntityKind::Author, id);
        Ok(self.fresh_author(id))
    }

    async fn author_by_slug(&self, slug: &str) -> CacheResult<Option<AuthorSnapshot>> {
        self.check_failure()?;
        let id = {
            let inner = self.inner.lock().unwrap();
            inner
                .authors
                .values()
                .find(|a| a.slug.eq_ignore_ascii_case(slug))
                .map(|a| a.id)
        };
        match id {
            Some(id) => self.author_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn authors_by_ids(&self, ids: &[i32]) -> CacheResult<Vec<AuthorSnapshot>> {
        self.check_failure()?;
        self.batch_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(ids.iter().filter_map(|id| self.fresh_author(*id)).collect())
    }

    async fn topic_by_id(&self, id: i32) -> CacheResult<Option<TopicSnapshot>> {
        self.check_failure()?;
        self.record_fetch(EntityKind::Topic, id);
        Ok(self.fresh_topic(id))
    }

    async fn topic_by_slug(&self, slug: &str) -> CacheResult<Option<TopicSnapshot>> {
        self.check_failure()?;
        let id = {
            let inner = self.inner.lock().unwrap();
            inner
                .topics
                .values()
                .find(|t| t.slug.eq_ignore_ascii_case(slug))
                .map(|t| t.id)
        };
        match id {
            Some(id) => self.topic_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn topics_by_ids(&self, ids: &[i32]) -> CacheResult<Vec<TopicSnapshot>> {
        self.check_failure()?;
        self.batch_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(ids.iter().filter_map(|id| self.fresh_topic(*id)).collect())
    }

    async fn visible_author_ids(&self) -> CacheResult<Vec<i32>> {
        let mut ids: Vec<i32> = self.inner.lock().unwrap().authors.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn visible_topic_ids(&self) -> CacheResult<Vec<i32>> {
        let mut ids: Vec<i32> = self.inner.lock().unwrap().topics.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn follower_ids(&self, kind: EdgeKind, target_id: i32) -> CacheResult<Vec<i32>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<i32> = inner
            .edges
            .iter()
            .filter(|(k, t, _)| *k == kind && *t == target_id)
            .map(|(_, _, f)| *f)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn followed_ids(&self, follower_id: i32, kind: EdgeKind) -> CacheResult<Vec<i32>> {
        let inner = self.inner.lock().unwrap();
        if let Some(ids) = inner.followed_overrides.get(&(follower_id, kind)) {
            return Ok(ids.clone());
        }
        let mut ids: Vec<i32> = inner
            .edges
            .iter()
            .filter(|(k, _, f)| *k == kind && *f == follower_id)
            .map(|(_, t, _)| *t)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// The full subsystem wired over `MemoryKv` and a `MemorySource`.
pub struct TestStack {
    pub kv: MemoryKv,
    pub source: Arc<MemorySource>,
    pub entities: EntityCache,
    pub follows: FollowGraphCache,
    pub precache: PrecacheLoader,
    pub revalidation: Arc<RevalidationManager>,
}

/// Route test logs through the capture writer; honors `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn stack() -> TestStack {
    stack_with_interval(Duration::from_secs(300))
}

pub fn stack_with_interval(interval: Duration) -> TestStack {
    init_tracing();
    let kv = MemoryKv::new();
    let kv_dyn: Arc<dyn KeyValue> = Arc::new(kv.clone());
    let source = MemorySource::new();
    let source_dyn: Arc<dyn SourceOfRecord> = source.clone();

    let entities = EntityCache::new(kv_dyn.clone(), source_dyn.clone(), 3600);
    let follows = FollowGraphCache::new(kv_dyn.clone(), source_dyn.clone(), entities.clone(), 3600);
    let precache = PrecacheLoader::new(
        kv_dyn.clone(),
        source_dyn.clone(),
        entities.clone(),
        follows.clone(),
    );
    let revalidation = Arc::new(RevalidationManager::new(
        entities.clone(),
        follows.clone(),
        source_dyn,
        kv_dyn,
        interval,
    ));

    TestStack {
        kv,
        source,
        entities,
        follows,
        precache,
        revalidation,
    }
}

pub fn author(id: i32, slug: &str, followers: i32) -> AuthorSnapshot {
    AuthorSnapshot {
        id,
        slug: slug.to_string(),
        name: format!("Author {id}"),
        bio: None,
        pic: None,
        created_at: Utc::now(),
        stat: AuthorStat {
            shouts: 0,
            followers,
            follows: 0,
            rating: 0,
            comments: 0,
        },
        cached_at: Utc::now(),
    }
}

pub fn topic(id: i32, slug: &str) -> TopicSnapshot {
    TopicSnapshot {
        id,
        slug: slug.to_string(),
        title: format!("Topic {id}"),
        body: None,
        pic: None,
        community: 1,
        stat: TopicStat {
            shouts: 0,
            followers: 0,
            authors: 0,
        },
        cached_at: Utc::now(),
    }
}
