//! Thin async key-value client used by the cache subsystem.
//!
//! Exposes a [`KeyValue`] trait covering exactly the operations the cache
//! layer needs (string get/set with optional TTL, batch get, delete,
//! SCAN-based prefix delete, set membership, publish/subscribe) and two
//! implementations:
//!
//! - [`RedisKv`]: production client over `redis::aio::ConnectionManager`
//!   with an explicit `connect`/`disconnect` lifecycle.
//! - [`MemoryKv`]: in-process twin with the same semantics, used by tests
//!   and local development.
//!
//! No business logic lives here; callers own key construction and value
//! encoding.

mod memory;
mod redis_impl;

pub use memory::MemoryKv;
pub use redis_impl::{RedisKv, SharedConnectionManager};

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("wrong value type for key {0}")]
    WrongType(String),

    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

pub type KvResult<T> = Result<T, KvError>;

/// Core key-value operations.
///
/// Every method is a single logical store operation; no method depends on a
/// second call completing for the store to remain valid.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Batch get; the result vector is positionally aligned with `keys`.
    async fn get_many(&self, keys: &[String]) -> KvResult<Vec<Option<String>>>;

    /// Set a string value without expiry.
    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// Set a string value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> KvResult<()>;

    /// Set or refresh a TTL on an existing key of any type.
    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<()>;

    /// Delete every key starting with `prefix`. Non-blocking (SCAN, never
    /// KEYS). Returns the number of keys deleted.
    async fn del_prefix(&self, prefix: &str) -> KvResult<usize>;

    /// Check key existence.
    async fn exists(&self, key: &str) -> KvResult<bool>;

    /// Add one member to a set.
    async fn sadd(&self, key: &str, member: &str) -> KvResult<()>;

    /// Remove one member from a set.
    async fn srem(&self, key: &str, member: &str) -> KvResult<()>;

    /// All members of a set. A missing key reads as an empty set.
    async fn smembers(&self, key: &str) -> KvResult<Vec<String>>;

    /// Overwrite a set wholesale with `members`.
    async fn sreplace(&self, key: &str, members: &[String]) -> KvResult<()>;

    /// Publish a payload on a channel; returns the subscriber count.
    async fn publish(&self, channel: &str, payload: &str) -> KvResult<usize>;

    /// Subscribe to a channel. The stream yields message payloads published
    /// after the subscription was established.
    async fn subscribe(&self, channel: &str) -> KvResult<BoxStream<'static, String>>;
}
