//! System-of-record seam.
//!
//! The cache layer never talks to Postgres directly; it goes through
//! [`SourceOfRecord`], which exposes exactly three capabilities: fetch an
//! entity row with its aggregate stats, list visible entity ids, and fetch
//! follow-edge id sets. [`PgSource`] is the production implementation; tests
//! supply an in-memory one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::CacheResult;
use crate::snapshot::{
    AuthorSnapshot, AuthorStat, EdgeKind, EntityKind, EntitySnapshot, TopicSnapshot, TopicStat,
};

#[async_trait]
pub trait SourceOfRecord: Send + Sync {
    async fn author_by_id(&self, id: i32) -> CacheResult<Option<AuthorSnapshot>>;
    async fn author_by_slug(&self, slug: &str) -> CacheResult<Option<AuthorSnapshot>>;
    async fn authors_by_ids(&self, ids: &[i32]) -> CacheResult<Vec<AuthorSnapshot>>;

    async fn topic_by_id(&self, id: i32) -> CacheResult<Option<TopicSnapshot>>;
    async fn topic_by_slug(&self, slug: &str) -> CacheResult<Option<TopicSnapshot>>;
    async fn topics_by_ids(&self, ids: &[i32]) -> CacheResult<Vec<TopicSnapshot>>;

    /// Ids of every author meeting the visibility predicate (non-deleted,
    /// linked to a real user identity).
    async fn visible_author_ids(&self) -> CacheResult<Vec<i32>>;

    /// Ids of every topic meeting the visibility predicate (non-deleted,
    /// linked to a community).
    async fn visible_topic_ids(&self) -> CacheResult<Vec<i32>>;

    /// Who follows `target_id` for the given edge kind.
    async fn follower_ids(&self, kind: EdgeKind, target_id: i32) -> CacheResult<Vec<i32>>;

    /// What `follower_id` follows for the given edge kind.
    async fn followed_ids(&self, follower_id: i32, kind: EdgeKind) -> CacheResult<Vec<i32>>;

    /// Kind-dispatched single fetch.
    async fn entity_by_id(&self, kind: EntityKind, id: i32) -> CacheResult<Option<EntitySnapshot>> {
        Ok(match kind {
            EntityKind::Author => self.author_by_id(id).await?.map(EntitySnapshot::Author),
            EntityKind::Topic => self.topic_by_id(id).await?.map(EntitySnapshot::Topic),
        })
    }

    /// Kind-dispatched slug fetch.
    async fn entity_by_slug(
        &self,
        kind: EntityKind,
        slug: &str,
    ) -> CacheResult<Option<EntitySnapshot>> {
        Ok(match kind {
            EntityKind::Author => self.author_by_slug(slug).await?.map(EntitySnapshot::Author),
            EntityKind::Topic => self.topic_by_slug(slug).await?.map(EntitySnapshot::Topic),
        })
    }

    /// Kind-dispatched batch fetch. One round-trip per call, never per id.
    async fn entities_by_ids(
        &self,
        kind: EntityKind,
        ids: &[i32],
    ) -> CacheResult<Vec<EntitySnapshot>> {
        Ok(match kind {
            EntityKind::Author => self
                .authors_by_ids(ids)
                .await?
                .into_iter()
                .map(EntitySnapshot::Author)
                .collect(),
            EntityKind::Topic => self
                .topics_by_ids(ids)
                .await?
                .into_iter()
                .map(EntitySnapshot::Topic)
                .collect(),
        })
    }
}

const AUTHOR_SELECT: &str = r#"
    SELECT a.id, a.slug, a.name, a.bio, a.pic, a.created_at,
           (SELECT count(*)
              FROM shout_author sa
              JOIN shout s ON s.id = sa.shout
             WHERE sa.author = a.id
               AND s.deleted_at IS NULL
               AND s.published_at IS NOT NULL)::int AS shouts,
           (SELECT count(*) FROM author_follower af WHERE af.author = a.id)::int AS followers,
           (SELECT count(*) FROM author_follower af WHERE af.follower = a.id)::int AS follows,
           COALESCE((SELECT sum(CASE WHEN r.kind = 'LIKE' THEN 1 ELSE -1 END)
              FROM reaction r
              JOIN shout_author sa ON sa.shout = r.shout
             WHERE sa.author = a.id
               AND r.deleted_at IS NULL
               AND r.kind IN ('LIKE', 'DISLIKE')), 0)::int AS rating,
           (SELECT count(*)
              FROM reaction r
             WHERE r.created_by = a.id
               AND r.kind = 'COMMENT'
               AND r.deleted_at IS NULL)::int AS comments
      FROM author a
"#;

const TOPIC_SELECT: &str = r#"
    SELECT t.id, t.slug, t.title, t.body, t.pic, t.community,
           (SELECT count(*)
              FROM shout_topic st
              JOIN shout s ON s.id = st.shout
             WHERE st.topic = t.id
               AND s.deleted_at IS NULL
               AND s.published_at IS NOT NULL)::int AS shouts,
           (SELECT count(*) FROM topic_follower tf WHERE tf.topic = t.id)::int AS followers,
           (SELECT count(DISTINCT sa.author)
              FROM shout_topic st
              JOIN shout_author sa ON sa.shout = st.shout
             WHERE st.topic = t.id)::int AS authors
      FROM topic t
"#;

const AUTHOR_VISIBLE: &str = "a.deleted_at IS NULL AND a.user_id IS NOT NULL";
const TOPIC_VISIBLE: &str = "t.deleted_at IS NULL AND t.community IS NOT NULL";

#[derive(sqlx::FromRow)]
struct AuthorRow {
    id: i32,
    slug: String,
    name: String,
    bio: Option<String>,
    pic: Option<String>,
    created_at: DateTime<Utc>,
    shouts: i32,
    followers: i32,
    follows: i32,
    rating: i32,
    comments: i32,
}

impl AuthorRow {
    fn into_snapshot(self) -> AuthorSnapshot {
        AuthorSnapshot {
            id: self.id,
            slug: self.slug,
            name: self.name,
            bio: self.bio,
            pic: self.pic,
            created_at: self.created_at,
            stat: AuthorStat {
                shouts: self.shouts,
                followers: self.followers,
                follows: self.follows,
                rating: self.rating,
                comments: self.comments,
            },
            cached_at: Utc::now(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TopicRow {
    id: i32,
    slug: String,
    title: String,
    body: Option<String>,
    pic: Option<String>,
    community: i32,
    shouts: i32,
    followers: i32,
    authors: i32,
}

impl TopicRow {
    fn into_snapshot(self) -> TopicSnapshot {
        TopicSnapshot {
            id: self.id,
            slug: self.slug,
            title: self.title,
            body: self.body,
            pic: self.pic,
            community: self.community,
            stat: TopicStat {
                shouts: self.shouts,
                followers: self.followers,
                authors: self.authors,
            },
            cached_at: Utc::now(),
        }
    }
}

/// Postgres implementation of [`SourceOfRecord`].
#[derive(Clone)]
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceOfRecord for PgSource {
    async fn author_by_id(&self, id: i32) -> CacheResult<Option<AuthorSnapshot>> {
        let sql = format!("{AUTHOR_SELECT} WHERE a.id = $1 AND {AUTHOR_VISIBLE}");
        let row = sqlx::query_as::<_, AuthorRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AuthorRow::into_snapshot))
    }

    async fn author_by_slug(&self, slug: &str) -> CacheResult<Option<AuthorSnapshot>> {
        let sql = format!("{AUTHOR_SELECT} WHERE lower(a.slug) = lower($1) AND {AUTHOR_VISIBLE}");
        let row = sqlx::query_as::<_, AuthorRow>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AuthorRow::into_snapshot))
    }

    async fn authors_by_ids(&self, ids: &[i32]) -> CacheResult<Vec<AuthorSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("{AUTHOR_SELECT} WHERE a.id = ANY($1) AND {AUTHOR_VISIBLE}");
        let rows = sqlx::query_as::<_, AuthorRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AuthorRow::into_snapshot).collect())
    }

    async fn topic_by_id(&self, id: i32) -> CacheResult<Option<TopicSnapshot>> {
        let sql = format!("{TOPIC_SELECT} WHERE t.id = $1 AND {TOPIC_VISIBLE}");
        let row = sqlx::query_as::<_, TopicRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TopicRow::into_snapshot))
    }

    async fn topic_by_slug(&self, slug: &str) -> CacheResult<Option<TopicSnapshot>> {
        let sql = format!("{TOPIC_SELECT} WHERE lower(t.slug) = lower($1) AND {TOPIC_VISIBLE}");
        let row = sqlx::query_as::<_, TopicRow>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TopicRow::into_snapshot))
    }

    async fn topics_by_ids(&self, ids: &[i32]) -> CacheResult<Vec<TopicSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("{TOPIC_SELECT} WHERE t.id = ANY($1) AND {TOPIC_VISIBLE}");
        let rows = sqlx::query_as::<_, TopicRow>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TopicRow::into_snapshot).collect())
    }

    async fn visible_author_ids(&self) -> CacheResult<Vec<i32>> {
        let sql = format!("SELECT a.id FROM author a WHERE {AUTHOR_VISIBLE} ORDER BY a.id");
        let rows = sqlx::query_as::<_, (i32,)>(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn visible_topic_ids(&self) -> CacheResult<Vec<i32>> {
        let sql = format!("SELECT t.id FROM topic t WHERE {TOPIC_VISIBLE} ORDER BY t.id");
        let rows = sqlx::query_as::<_, (i32,)>(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn follower_ids(&self, kind: EdgeKind, target_id: i32) -> CacheResult<Vec<i32>> {
        let sql = match kind {
            EdgeKind::Author => "SELECT follower FROM author_follower WHERE author = $1",
            EdgeKind::Topic => "SELECT follower FROM topic_follower WHERE topic = $1",
            EdgeKind::ShoutReactions => {
                "SELECT follower FROM shout_reactions_follower WHERE shout = $1"
            }
        };
        let rows = sqlx::query_as::<_, (i32,)>(sql)
            .bind(target_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn followed_ids(&self, follower_id: i32, kind: EdgeKind) -> CacheResult<Vec<i32>> {
        let sql = match kind {
            EdgeKind::Author => "SELECT author FROM author_follower WHERE follower = $1",
            EdgeKind::Topic => "SELECT topic FROM topic_follower WHERE follower = $1",
            EdgeKind::ShoutReactions => {
                "SELECT shout FROM shout_reactions_follower WHERE follower = $1"
            }
        };
        let rows = sqlx::query_as::<_, (i32,)>(sql)
            .bind(follower_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
