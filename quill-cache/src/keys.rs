//! Cache key schema.
//!
//! Every module goes through these generators; nothing formats a cache key
//! inline. Key formats:
//!
//! - `entity:<kind>:id:<id>`
//! - `entity:<kind>:slug:<slug>`
//! - `follow:<kind>:followers:<id>`
//! - `follow:<kind>:follows-<edgekind>:<followerId>`

use crate::snapshot::{EdgeKind, EntityKind};

/// Prefix owned by entity snapshots; wiped wholesale by the precache loader.
pub const ENTITY_PREFIX: &str = "entity:";

/// Prefix owned by follow indices; wiped wholesale by the precache loader.
pub const FOLLOW_PREFIX: &str = "follow:";

/// Cache key builder.
pub struct CacheKey;

impl CacheKey {
    /// Snapshot by numeric id.
    pub fn entity_id(kind: EntityKind, id: i32) -> String {
        format!("entity:{kind}:id:{id}")
    }

    /// Snapshot by slug. Slugs are stored lowercased so that lookups are
    /// case-insensitive.
    pub fn entity_slug(kind: EntityKind, slug: &str) -> String {
        format!("entity:{kind}:slug:{}", slug.to_lowercase())
    }

    /// "Who follows this target" index.
    pub fn followers(kind: EdgeKind, target_id: i32) -> String {
        format!("follow:{kind}:followers:{target_id}")
    }

    /// "What this follower follows" index, the mirror of [`followers`].
    ///
    /// [`followers`]: CacheKey::followers
    pub fn follows(kind: EdgeKind, follower_id: i32) -> String {
        format!("follow:{kind}:follows-{kind}:{follower_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_key() {
        assert_eq!(
            CacheKey::entity_id(EntityKind::Author, 42),
            "entity:author:id:42"
        );
        assert_eq!(
            CacheKey::entity_id(EntityKind::Topic, 7),
            "entity:topic:id:7"
        );
    }

    #[test]
    fn entity_slug_key_is_lowercased() {
        assert_eq!(
            CacheKey::entity_slug(EntityKind::Author, "Jane-Doe"),
            "entity:author:slug:jane-doe"
        );
    }

    #[test]
    fn follower_keys() {
        assert_eq!(
            CacheKey::followers(EdgeKind::Author, 1),
            "follow:author:followers:1"
        );
        assert_eq!(
            CacheKey::follows(EdgeKind::Topic, 2),
            "follow:topic:follows-topic:2"
        );
        assert_eq!(
            CacheKey::follows(EdgeKind::ShoutReactions, 3),
            "follow:shout-reactions:follows-shout-reactions:3"
        );
    }

    #[test]
    fn follow_keys_live_under_the_wipe_prefix() {
        assert!(CacheKey::followers(EdgeKind::Author, 9).starts_with(FOLLOW_PREFIX));
        assert!(CacheKey::entity_id(EntityKind::Topic, 9).starts_with(ENTITY_PREFIX));
    }
}
