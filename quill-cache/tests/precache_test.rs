mod support;

use std::collections::BTreeMap;

use kv_store::KeyValue;
use quill_cache::{EdgeKind, EntityKind, SourceOfRecord};
use support::{author, stack, topic};

/// Store dump with volatile `cached_at` stamps blanked out of snapshot
/// values, so two rebuilds can be compared byte-for-byte.
async fn normalized_dump(kv: &kv_store::MemoryKv) -> BTreeMap<String, Vec<String>> {
    kv.dump()
        .await
        .into_iter()
        .map(|(key, values)| {
            if !key.starts_with("entity:") {
                return (key, values);
            }
            let normalized = values
                .into_iter()
                .map(|raw| match serde_json::from_str::<serde_json::Value>(&raw) {
                    Ok(mut value) => {
                        value["cached_at"] = serde_json::Value::Null;
                        value.to_string()
                    }
                    Err(_) => raw,
                })
                .collect();
            (key, normalized)
        })
        .collect()
}

#[tokio::test]
async fn rebuild_is_a_pure_function_of_the_source() {
    let s = stack();
    s.source.put_author(author(1, "jane", 1));
    s.source.put_author(author(2, "ada", 0));
    s.source.put_topic(topic(10, "rust"));
    s.source.add_edge(EdgeKind::Author, 1, 2);
    s.source.add_edge(EdgeKind::Topic, 10, 1);

    s.precache.rebuild_all().await.unwrap();

    let cached = s
        .entities
        .get_by_id(EntityKind::Author, 1)
        .await
        .unwrap()
        .unwrap();
    let derived = s.source.author_by_id(1).await.unwrap().unwrap();
    assert!(cached.content_eq(&quill_cache::EntitySnapshot::Author(derived)));

    assert_eq!(
        s.follows.followers_of(EdgeKind::Author, 1).await.unwrap(),
        [2].into_iter().collect()
    );
    assert_eq!(
        s.follows.follows_of(1, EdgeKind::Topic).await.unwrap(),
        [10].into_iter().collect()
    );
}

#[tokio::test]
async fn rebuild_twice_is_idempotent() {
    let s = stack();
    s.source.put_author(author(1, "jane", 1));
    s.source.put_topic(topic(10, "rust"));
    s.source.add_edge(EdgeKind::Author, 1, 2);
    s.source.add_edge(EdgeKind::ShoutReactions, 77, 1);

    let first = s.precache.rebuild_all().await.unwrap();
    let dump_one = normalized_dump(&s.kv).await;

    let second = s.precache.rebuild_all().await.unwrap();
    let dump_two = normalized_dump(&s.kv).await;

    assert_eq!(dump_one, dump_two);
    assert_eq!(first.authors, second.authors);
    assert_eq!(first.topics, second.topics);
    assert_eq!(first.follow_sets, second.follow_sets);
}

#[tokio::test]
async fn rebuild_on_empty_source_leaves_a_clean_cache() {
    let s = stack();

    let report = s.precache.rebuild_all().await.unwrap();
    assert_eq!(report.authors, 0);
    assert_eq!(report.topics, 0);
    assert_eq!(report.failures, 0);
    assert!(s.kv.is_empty().await);

    // Subsequent reads behave as clean misses, not errors.
    assert!(s
        .entities
        .get_by_id(EntityKind::Author, 1)
        .await
        .unwrap()
        .is_none());
    assert!(s
        .follows
        .followers_of(EdgeKind::Author, 1)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn rebuild_wipes_residue_from_earlier_schemas() {
    let s = stack();
    s.kv.set("entity:author:id:999", "stale").await.unwrap();
    s.kv
        .set("follow:author:followers:999", "stale")
        .await
        .unwrap();

    let report = s.precache.rebuild_all().await.unwrap();
    assert_eq!(report.keys_wiped, 2);
    assert!(!s.kv.exists("entity:author:id:999").await.unwrap());
    assert!(!s.kv.exists("follow:author:followers:999").await.unwrap());
}

#[tokio::test]
async fn rebuild_reports_per_phase_counts() {
    let s = stack();
    s.source.put_author(author(1, "jane", 0));
    s.source.put_author(author(2, "ada", 0));
    s.source.put_topic(topic(10, "rust"));

    let report = s.precache.rebuild_all().await.unwrap();
    assert_eq!(report.authors, 2);
    assert_eq!(report.topics, 1);
    // Follower side per target (2 authors + 1 topic) plus a follows side
    // per author per edge kind (2 * 3).
    assert_eq!(report.follow_sets, 9);
    assert_eq!(report.failures, 0);
}

#[tokio::test]
async fn rebuild_clears_the_divergence_flag() {
    let s = stack();
    s.source.add_edge(EdgeKind::Author, 1, 2);
    s.source.override_followed(2, EdgeKind::Author, vec![]);
    let _ = s.follows.record_edge(EdgeKind::Author, 1, 2, true).await;
    assert!(s.follows.rebuild_required());

    s.source.override_followed(2, EdgeKind::Author, vec![1]);
    s.precache.rebuild_all().await.unwrap();
    assert!(!s.follows.rebuild_required());
}

#[tokio::test]
async fn one_failing_entity_does_not_abort_the_rebuild() {
    let s = stack();
    s.source.put_author(author(1, "jane", 0));
    s.source.put_topic(topic(10, "rust"));

    // Entity fetches fail wholesale; listings still work. Every snapshot is
    // skipped and logged, follow indices still get written.
    s.source.set_fail_entities(true);
    let report = s.precache.rebuild_all().await.unwrap();
    assert_eq!(report.authors, 0);
    assert_eq!(report.topics, 0);
    assert_eq!(report.failures, 2);
    assert_eq!(report.follow_sets, 5);
}
