use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{broadcast, RwLock};

use crate::{KeyValue, KvError, KvResult};

#[derive(Debug, Clone)]
enum Entry {
    Value(String),
    Set(HashSet<String>),
}

/// In-memory [`KeyValue`] implementation with the same observable semantics
/// as the Redis client (string values, string sets, prefix delete,
/// publish/subscribe over an in-process bus).
///
/// TTLs are accepted and ignored; nothing in the cache layer depends on
/// expiry for correctness.
#[derive(Clone)]
pub struct MemoryKv {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    published: Arc<RwLock<Vec<(String, String)>>>,
    bus: broadcast::Sender<(String, String)>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        let (bus, _) = broadcast::channel(64);
        Self {
            entries: Arc::default(),
            published: Arc::default(),
            bus,
        }
    }
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the whole store, sets rendered as sorted member lists.
    /// Test support: lets suites compare full store contents.
    pub async fn dump(&self) -> BTreeMap<String, Vec<String>> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(key, entry)| match entry {
                Entry::Value(v) => (key.clone(), vec![v.clone()]),
                Entry::Set(members) => {
                    let mut sorted: Vec<String> = members.iter().cloned().collect();
                    sorted.sort();
                    (key.clone(), sorted)
                }
            })
            .collect()
    }

    /// Messages published so far, in order. Test support.
    pub async fn published(&self) -> Vec<(String, String)> {
        self.published.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValue for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(Entry::Value(v)) => Ok(Some(v.clone())),
            Some(Entry::Set(_)) => Err(KvError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        let entries = self.entries.read().await;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match entries.get(key) {
                Some(Entry::Value(v)) => values.push(Some(v.clone())),
                _ => values.push(None),
            }
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry::Value(value.to_string()));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> KvResult<()> {
        self.set(key, value).await
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> KvResult<()> {
        Ok(())
    }

    async fn del_prefix(&self, prefix: &str) -> KvResult<usize> {
        let mut entries = self.entries.write().await;
        let doomed: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len())
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()))
        {
            Entry::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            Entry::Value(_) => Err(KvError::WrongType(key.to_string())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        let now_empty = match entries.get_mut(key) {
            Some(Entry::Set(members)) => {
                members.remove(member);
                members.is_empty()
            }
            Some(Entry::Value(_)) => return Err(KvError::WrongType(key.to_string())),
            None => false,
        };
        // Like Redis, an emptied set ceases to exist.
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(Entry::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(Entry::Value(_)) => Err(KvError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn sreplace(&self, key: &str, members: &[String]) -> KvResult<()> {
        let mut entries = self.entries.write().await;
        if members.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(
                key.to_string(),
                Entry::Set(members.iter().cloned().collect()),
            );
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> KvResult<usize> {
        let mut published = self.published.write().await;
        published.push((channel.to_string(), payload.to_string()));
        // send errors only when nobody is subscribed.
        let subscribers = self
            .bus
            .send((channel.to_string(), payload.to_string()))
            .unwrap_or(0);
        Ok(subscribers)
    }

    async fn subscribe(&self, channel: &str) -> KvResult<BoxStream<'static, String>> {
        let rx = self.bus.subscribe();
        let channel = channel.to_string();
        let stream = futures::stream::unfold((rx, channel), |(mut rx, channel)| async move {
            loop {
                match rx.recv().await {
                    Ok((ch, payload)) if ch == channel => return Some((payload, (rx, channel))),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed();
        Ok(stream)
    }
}
