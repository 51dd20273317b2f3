mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use common::MemoryOrigin;
use hotboot::engine::cache::{CacheStore, PopulateOutcome};
use hotboot::source::traits::Origin;
use hotboot::BootError;

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn origin_with_assets() -> Arc<MemoryOrigin> {
    let origin = MemoryOrigin::new();
    origin.serve("/", "<html>index</html>");
    origin.serve("/logo.svg", "<svg/>");
    origin.serve("/font.css", "body{}");
    origin.serve("/elemental.js", "boot()");
    origin
}

#[tokio::test]
async fn test_populate_then_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let origin = origin_with_assets();
    let store = CacheStore::new(dir.path(), origin.clone() as Arc<dyn Origin>, 4).unwrap();

    assert!(!store.exists("ELEMENTAL"));
    let outcome = store
        .populate(
            "ELEMENTAL",
            &urls(&["/elemental.js?v=v1-000001", "/", "/logo.svg"]),
            |_| {},
        )
        .await
        .unwrap();
    assert_eq!(outcome, PopulateOutcome::Populated { count: 3 });
    assert!(store.exists("ELEMENTAL"));

    let region = store.open("ELEMENTAL").unwrap().unwrap();
    assert_eq!(region.len(), 3);
    let hit = region.get("/elemental.js?v=v1-000001").await.unwrap().unwrap();
    assert_eq!(&hit.body[..], b"boot()");
    assert!(region.get("/missing").await.unwrap().is_none());

    let matched = store.match_url("/logo.svg").await.unwrap().unwrap();
    assert_eq!(&matched.body[..], b"<svg/>");
}

#[tokio::test]
async fn test_second_populate_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let origin = origin_with_assets();
    let store = CacheStore::new(dir.path(), origin.clone() as Arc<dyn Origin>, 4).unwrap();
    let list = urls(&["/", "/logo.svg", "/font.css"]);

    store.populate("ELEMENTAL", &list, |_| {}).await.unwrap();
    let after_first = origin.request_count();
    assert_eq!(after_first, 3);

    let outcome = store.populate("ELEMENTAL", &list, |_| {}).await.unwrap();
    assert_eq!(outcome, PopulateOutcome::AlreadyPresent);
    assert_eq!(origin.request_count(), after_first);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let origin = MemoryOrigin::new();
    let list: Vec<String> = (0..24).map(|i| format!("/asset/{}", i)).collect();
    for url in &list {
        origin.serve(url, url.clone());
    }
    let store = CacheStore::new(dir.path(), origin as Arc<dyn Origin>, 3).unwrap();

    let seen = Mutex::new(Vec::new());
    store
        .populate("secondary_cache_v2", &list, |p| {
            seen.lock().push((p.current, p.percent.unwrap()))
        })
        .await
        .unwrap();

    let seen = seen.into_inner();
    assert_eq!(seen.len(), list.len());
    for pair in seen.windows(2) {
        assert!(pair[1].1 >= pair[0].1);
        assert_eq!(pair[1].0, pair[0].0 + 1);
    }
    assert!(seen.iter().all(|(_, p)| *p <= 1.0));
    assert_eq!(seen.last().unwrap().1, 1.0);
}

#[tokio::test]
async fn test_failed_asset_leaves_region_absent() {
    let dir = tempfile::tempdir().unwrap();
    let origin = origin_with_assets();
    origin.fail("/font.css");
    let store = CacheStore::new(dir.path(), origin.clone() as Arc<dyn Origin>, 4).unwrap();

    let err = store
        .populate("ELEMENTAL", &urls(&["/", "/font.css", "/logo.svg"]), |_| {})
        .await
        .unwrap_err();
    match err {
        BootError::PartialFetch {
            region,
            failed,
            total,
        } => {
            assert_eq!(region, "ELEMENTAL");
            assert_eq!(failed, vec!["/font.css".to_string()]);
            assert_eq!(total, 3);
        }
        other => panic!("unexpected error {other}"),
    }

    assert!(!store.exists("ELEMENTAL"));
    assert!(store.regions().unwrap().is_empty());
    // No staging directory survives the failure.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_interrupted_staging_is_swept_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let staging = dir.path().join("ELEMENTAL.partial-0000beef");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("000000.body"), b"half").unwrap();

    let store = CacheStore::new(dir.path(), MemoryOrigin::new() as Arc<dyn Origin>, 4).unwrap();
    assert!(!staging.exists());
    assert!(!store.exists("ELEMENTAL"));
}

#[tokio::test]
async fn test_invalidate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let origin = origin_with_assets();
    let store = CacheStore::new(dir.path(), origin as Arc<dyn Origin>, 4).unwrap();
    store.populate("ELEMENTAL", &urls(&["/"]), |_| {}).await.unwrap();
    store.populate("monaco_editor", &urls(&["/logo.svg"]), |_| {}).await.unwrap();
    assert_eq!(store.regions().unwrap(), vec!["ELEMENTAL", "monaco_editor"]);

    assert!(store.invalidate("ELEMENTAL").unwrap());
    assert!(!store.invalidate("ELEMENTAL").unwrap());
    assert!(store.open("ELEMENTAL").unwrap().is_none());

    assert_eq!(store.invalidate_all().unwrap(), 1);
    assert!(store.regions().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejects_path_like_region_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path(), MemoryOrigin::new() as Arc<dyn Origin>, 4).unwrap();
    assert!(!store.exists("../escape"));
    assert!(store.invalidate("a/b").is_err());
}
