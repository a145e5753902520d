//! Entity snapshots and their wire codec.
//!
//! A snapshot is a point-in-time, read-optimized copy of one authoritative
//! row plus its precomputed aggregate counters. Snapshots are overwritten
//! wholesale on every revalidation and never patched in place.
//!
//! Private columns (email, password hash, OAuth identities) are not part of
//! these types at all, so they can never leak into the KV store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;

/// Cacheable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Author,
    Topic,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Author => write!(f, "author"),
            EntityKind::Topic => write!(f, "topic"),
        }
    }
}

/// Follow-edge kinds. Targets of `Author`/`Topic` edges have snapshots;
/// `ShoutReactions` targets are shouts and are never materialized here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Author,
    Topic,
    ShoutReactions,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Author, EdgeKind::Topic, EdgeKind::ShoutReactions];

    /// The entity kind of this edge's target, if it has a snapshot type.
    pub fn entity_kind(self) -> Option<EntityKind> {
        match self {
            EdgeKind::Author => Some(EntityKind::Author),
            EdgeKind::Topic => Some(EntityKind::Topic),
            EdgeKind::ShoutReactions => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Author => write!(f, "author"),
            EdgeKind::Topic => write!(f, "topic"),
            EdgeKind::ShoutReactions => write!(f, "shout-reactions"),
        }
    }
}

/// Aggregate counters for an author, joined at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorStat {
    pub shouts: i32,
    pub followers: i32,
    pub follows: i32,
    pub rating: i32,
    pub comments: i32,
}

/// Aggregate counters for a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStat {
    pub shouts: i32,
    pub followers: i32,
    pub authors: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub id: i32,
    pub slug: String,
    pub name: String,
    pub bio: Option<String>,
    pub pic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub stat: AuthorStat,
    /// Volatile: when this snapshot was written. Excluded from content
    /// comparison.
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    pub id: i32,
    pub slug: String,
    pub title: String,
    pub body: Option<String>,
    pub pic: Option<String>,
    pub community: i32,
    pub stat: TopicStat,
    /// Volatile: when this snapshot was written.
    pub cached_at: DateTime<Utc>,
}

/// One cached entity, either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntitySnapshot {
    Author(AuthorSnapshot),
    Topic(TopicSnapshot),
}

impl EntitySnapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySnapshot::Author(_) => EntityKind::Author,
            EntitySnapshot::Topic(_) => EntityKind::Topic,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            EntitySnapshot::Author(a) => a.id,
            EntitySnapshot::Topic(t) => t.id,
        }
    }

    pub fn slug(&self) -> &str {
        match self {
            EntitySnapshot::Author(a) => &a.slug,
            EntitySnapshot::Topic(t) => &t.slug,
        }
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        match self {
            EntitySnapshot::Author(a) => a.cached_at,
            EntitySnapshot::Topic(t) => t.cached_at,
        }
    }

    /// Serialize for storage. The kind is carried by the key, not the value.
    pub fn encode(&self) -> CacheResult<String> {
        let json = match self {
            EntitySnapshot::Author(a) => serde_json::to_string(a)?,
            EntitySnapshot::Topic(t) => serde_json::to_string(t)?,
        };
        Ok(json)
    }

    /// Deserialize a stored value; the caller knows the kind from the key.
    pub fn decode(kind: EntityKind, raw: &str) -> CacheResult<Self> {
        let snapshot = match kind {
            EntityKind::Author => EntitySnapshot::Author(serde_json::from_str(raw)?),
            EntityKind::Topic => EntitySnapshot::Topic(serde_json::from_str(raw)?),
        };
        Ok(snapshot)
    }

    /// Equality ignoring the volatile `cached_at` stamp.
    pub fn content_eq(&self, other: &EntitySnapshot) -> bool {
        match (self, other) {
            (EntitySnapshot::Author(a), EntitySnapshot::Author(b)) => {
                let mut a = a.clone();
                a.cached_at = b.cached_at;
                a == *b
            }
            (EntitySnapshot::Topic(a), EntitySnapshot::Topic(b)) => {
                let mut a = a.clone();
                a.cached_at = b.cached_at;
                a == *b
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(id: i32, slug: &str) -> AuthorSnapshot {
        AuthorSnapshot {
            id,
            slug: slug.to_string(),
            name: "Jane".to_string(),
            bio: None,
            pic: None,
            created_at: Utc::now(),
            stat: AuthorStat {
                shouts: 3,
                followers: 10,
                follows: 2,
                rating: 5,
                comments: 1,
            },
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(EntityKind::Author.to_string(), "author");
        assert_eq!(EntityKind::Topic.to_string(), "topic");
        assert_eq!(EdgeKind::ShoutReactions.to_string(), "shout-reactions");
    }

    #[test]
    fn edge_kind_to_entity_kind() {
        assert_eq!(EdgeKind::Author.entity_kind(), Some(EntityKind::Author));
        assert_eq!(EdgeKind::Topic.entity_kind(), Some(EntityKind::Topic));
        assert_eq!(EdgeKind::ShoutReactions.entity_kind(), None);
    }

    #[test]
    fn codec_roundtrip() {
        let snapshot = EntitySnapshot::Author(author(1, "jane"));
        let encoded = snapshot.encode().unwrap();
        let decoded = EntitySnapshot::decode(EntityKind::Author, &encoded).unwrap();
        assert_eq!(snapshot, decoded);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(EntitySnapshot::decode(EntityKind::Topic, "not json").is_err());
    }

    #[test]
    fn content_eq_ignores_cached_at() {
        let a = author(1, "jane");
        let mut b = a.clone();
        b.cached_at = Utc::now() + chrono::Duration::seconds(60);

        let left = EntitySnapshot::Author(a);
        let right = EntitySnapshot::Author(b);
        assert!(left.content_eq(&right));
        assert_ne!(left, right);
    }

    #[test]
    fn content_eq_detects_stat_drift() {
        let a = author(1, "jane");
        let mut b = a.clone();
        b.stat.followers += 1;

        assert!(!EntitySnapshot::Author(a).content_eq(&EntitySnapshot::Author(b)));
    }
}
