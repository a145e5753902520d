use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Pipeline};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{KeyValue, KvError, KvResult};

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis-backed [`KeyValue`] implementation.
///
/// Constructed explicitly via [`RedisKv::connect`] and released via
/// [`RedisKv::disconnect`]; never held as a module-level singleton.
#[derive(Clone)]
pub struct RedisKv {
    manager: SharedConnectionManager,
    // Subscriptions need dedicated connections; the client stays around to
    // open one per subscriber.
    client: Client,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> KvResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client.clone()).await?;

        info!("Redis connection manager initialized");

        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
            client,
        })
    }

    /// Build from an already-connected shared manager (pool handoff). The
    /// client is still required for subscriber connections.
    pub fn from_manager(manager: SharedConnectionManager, client: Client) -> Self {
        Self { manager, client }
    }

    /// Release the connection. The manager is dropped once every clone of
    /// this handle is gone; this call only marks intent and logs.
    pub fn disconnect(self) {
        info!("Redis connection released");
        drop(self);
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KeyValue for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.manager.lock().await;
        let value: Option<String> = conn.get(key).await.map_err(KvError::Redis)?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.manager.lock().await;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut *conn)
            .await
            .map_err(KvError::Redis)?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut conn = self.manager.lock().await;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.manager.lock().await;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> KvResult<()> {
        let mut conn = self.manager.lock().await;
        conn.del::<_, ()>(key).await.map_err(KvError::Redis)?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()> {
        let mut conn = self.manager.lock().await;
        conn.expire::<_, ()>(key, ttl_secs as i64)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn del_prefix(&self, prefix: &str) -> KvResult<usize> {
        let pattern = format!("{prefix}*");
        let mut conn = self.manager.lock().await;
        let mut cursor: u64 = 0;
        let mut total_deleted = 0;

        loop {
            // SCAN instead of KEYS to avoid blocking the server.
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut *conn)
                .await
                .map_err(KvError::Redis)?;

            if !keys.is_empty() {
                let mut pipe = Pipeline::new();
                for key in &keys {
                    pipe.del(key);
                }
                pipe.query_async::<_, ()>(&mut *conn)
                    .await
                    .map_err(KvError::Redis)?;

                total_deleted += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(prefix = %prefix, deleted = total_deleted, "Prefix delete");
        Ok(total_deleted)
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.manager.lock().await;
        let exists: bool = conn.exists(key).await.map_err(KvError::Redis)?;
        Ok(exists)
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<()> {
        let mut conn = self.manager.lock().await;
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<()> {
        let mut conn = self.manager.lock().await;
        conn.srem::<_, _, ()>(key, member)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let mut conn = self.manager.lock().await;
        let members: Vec<String> = conn.smembers(key).await.map_err(KvError::Redis)?;
        Ok(members)
    }

    async fn sreplace(&self, key: &str, members: &[String]) -> KvResult<()> {
        let mut conn = self.manager.lock().await;
        let mut pipe = Pipeline::new();
        pipe.del(key);
        if !members.is_empty() {
            pipe.sadd(key, members);
        }
        pipe.query_async::<_, ()>(&mut *conn)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> KvResult<usize> {
        let mut conn = self.manager.lock().await;
        let subscribers: usize = conn
            .publish(channel, payload)
            .await
            .map_err(KvError::Redis)?;
        Ok(subscribers)
    }

    async fn subscribe(&self, channel: &str) -> KvResult<BoxStream<'static, String>> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(KvError::Redis)?;
        pubsub.subscribe(channel).await.map_err(KvError::Redis)?;

        debug!(channel = %channel, "Subscribed");
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() })
            .boxed();
        Ok(stream)
    }
}
