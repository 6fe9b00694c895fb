mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{FlakyStorage, counting, get};
use tagcache::{
    Config, DistributedTagIndex, MemoryStorage, ResponseCache, Storage, TagIndex, TagsMode, X_CACHE,
};

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|tag| (*tag).to_owned()).collect()
}

fn instance(storage: &Arc<dyn Storage>) -> ResponseCache {
    ResponseCache::new(
        Config::builder()
            .shared_storage(Arc::clone(storage))
            .tags_mode(TagsMode::Distributed)
            .tags(|head| {
                head.uri()
                    .path()
                    .strip_prefix("/users/")
                    .map(|id| vec![format!("user:{id}")])
                    .unwrap_or_default()
            })
            .build(),
    )
}

#[tokio::test]
async fn invalidation_reaches_other_process() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let a = instance(&storage);
    let b = instance(&storage);
    let calls = Arc::new(AtomicUsize::new(0));

    a.handle(get("/users/1"), counting(&calls, "alice")).await.unwrap();
    let hit = b.handle(get("/users/1"), counting(&calls, "other")).await.unwrap();
    assert_eq!(hit.headers()[X_CACHE], "hit");
    assert_eq!(hit.body(), "alice");

    assert_eq!(b.invalidate_tags(tags(&["user:1"])).await.unwrap(), 1);

    let response = a.handle(get("/users/1"), counting(&calls, "alice v2")).await.unwrap();
    assert_eq!(response.headers()[X_CACHE], "miss");
    assert_eq!(response.body(), "alice v2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn local_mirror_is_stale_until_verified() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let a = DistributedTagIndex::new(Arc::clone(&storage), None);
    let b = DistributedTagIndex::new(Arc::clone(&storage), None);

    a.add("k1", &tags(&["user:1"])).await.unwrap();
    a.add("k2", &tags(&["user:1"])).await.unwrap();

    let mut keys = b.invalidate(&tags(&["user:1"])).await.unwrap();
    keys.sort();
    assert_eq!(keys, tags(&["k1", "k2"]));
    assert!(b.stored_keys("user:1").await.unwrap().is_empty());

    // Without verification the stale mirror short-circuits `ensure`.
    assert!(a.has("k1"));
    a.ensure("k1", &tags(&["user:1"])).await.unwrap();
    assert!(a.stored_keys("user:1").await.unwrap().is_empty());

    let a = DistributedTagIndex::new(Arc::clone(&storage), None).verify_on_hit(true);
    a.ensure("k1", &tags(&["user:1"])).await.unwrap();
    assert_eq!(a.stored_keys("user:1").await.unwrap(), tags(&["k1"]));
    assert_eq!(a.stored_tags("k1").await.unwrap(), tags(&["user:1"]));
}

#[tokio::test]
async fn failed_invalidation_can_be_retried() {
    let flaky = FlakyStorage::new();
    let storage: Arc<dyn Storage> = Arc::new(flaky.clone());
    let a = ResponseCache::new(
        Config::builder()
            .shared_storage(Arc::clone(&storage))
            .tags_mode(TagsMode::Distributed)
            .tags(|_| vec!["a".to_owned()])
            .build(),
    );
    let b = instance(&storage);
    let calls = Arc::new(AtomicUsize::new(0));
    a.handle(get("/x"), counting(&calls, "x")).await.unwrap();

    flaky.break_key("tagcache:tag:b");
    assert!(b.invalidate_tags(tags(&["a", "b"])).await.is_err());
    flaky.repair_keys();

    assert_eq!(b.invalidate_tags(tags(&["a"])).await.unwrap(), 1);
    let response = a.handle(get("/x"), counting(&calls, "x v2")).await.unwrap();
    assert_eq!(response.headers()[X_CACHE], "miss");
    assert_eq!(response.body(), "x v2");
}

#[tokio::test]
async fn mirror_is_cleared_before_storage_is_touched() {
    let flaky = FlakyStorage::new();
    let index = DistributedTagIndex::new(Arc::new(flaky.clone()), None);
    index.add("k1", &tags(&["a"])).await.unwrap();

    flaky.break_key("tagcache:tag:a");
    assert!(index.invalidate(&tags(&["a"])).await.is_err());
    assert!(index.local().keys_for("a").is_empty());

    flaky.repair_keys();
    assert_eq!(index.stored_keys("a").await.unwrap(), tags(&["k1"]));
    assert_eq!(index.stored_tags("k1").await.unwrap(), tags(&["a"]));
}
