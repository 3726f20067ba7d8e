//! Integration coverage for the cache's external behavior: the concrete
//! scenarios and boundary cases a fresh build must satisfy end to end,
//! exercised through the public `Cache`/`CacheBuilder` surface only.

use std::time::Duration;

use tinylfu_cache::{CacheBuilder, CacheError, EntryCodec};

struct StringCodec;

impl EntryCodec<String, String> for StringCodec {
    fn encode_key(&self, key: &String) -> Vec<u8> {
        key.as_bytes().to_vec()
    }
    fn decode_key(&self, bytes: &[u8]) -> Result<String, CacheError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
    fn encode_value(&self, value: &String) -> Vec<u8> {
        value.as_bytes().to_vec()
    }
    fn decode_value(&self, bytes: &[u8]) -> Result<String, CacheError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn random_inserts_stay_within_overshoot_bound() {
    let cache = CacheBuilder::new(1000).build().unwrap();
    for i in 0u64..20_000 {
        // Deterministic pseudo-random spread over [0, 100_000), so the
        // test doesn't depend on a `rand` dependency this crate dropped.
        let key = tinylfu_cache::hasher::mix64(i) % 100_000;
        cache.set(key, key, 1).await;
    }
    quiesce().await;
    assert!(cache.len() <= 1200, "len() was {}", cache.len());
}

#[tokio::test]
async fn set_get_delete_roundtrip() {
    let cache = CacheBuilder::new(100).build().unwrap();
    assert!(cache.set("foo".to_string(), "foo".to_string(), 1).await);
    assert_eq!(cache.get(&"foo".to_string()), Some("foo".to_string()));
    assert!(cache.delete(&"foo".to_string()));
    assert_eq!(cache.get(&"foo".to_string()), None);
}

#[tokio::test]
async fn cost_pressure_settles_to_expected_survivor_count() {
    let cache = CacheBuilder::new(500).build().unwrap();
    for i in 0u64..30 {
        cache.set(format!("key:{i}"), i, 20).await;
    }
    quiesce().await;
    assert_eq!(cache.len(), 25);
}

#[tokio::test]
async fn updating_one_entrys_cost_reshapes_the_survivor_set() {
    let cache = CacheBuilder::new(500).build().unwrap();
    for i in 0u64..30 {
        cache.set(format!("key:{i}"), i, 20).await;
    }
    quiesce().await;
    cache.set("key:10".to_string(), 0, 200).await;
    quiesce().await;
    assert_eq!(cache.len(), 16);
}

#[tokio::test]
async fn doorkeeper_requires_a_second_sighting() {
    let cache = CacheBuilder::new(500).build().unwrap();
    cache.set_doorkeeper(true);
    quiesce().await;

    let mut first_pass_admitted = false;
    for i in 0u64..30 {
        if cache.set(format!("key:{i}"), i, 20).await {
            first_pass_admitted = true;
        }
    }
    quiesce().await;
    assert!(!first_pass_admitted);
    assert_eq!(cache.len(), 0);

    let mut second_pass_admitted = false;
    for i in 0u64..30 {
        if cache.set(format!("key:{i}"), i, 20).await {
            second_pass_admitted = true;
        }
    }
    quiesce().await;
    assert!(second_pass_admitted);
    assert!(cache.len() > 0);
}

#[tokio::test]
async fn ttl_expiry_removes_the_entry() {
    let cache = CacheBuilder::new(500).build().unwrap();
    cache
        .set_with_ttl("foo".to_string(), "foo".to_string(), 1, Duration::from_secs(3600))
        .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    cache
        .set_with_ttl("foo".to_string(), "foo".to_string(), 1, Duration::from_secs(1))
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cache.get(&"foo".to_string()), None);
    assert_eq!(cache.len(), 0);
}

#[tokio::test]
async fn boundary_costs() {
    let cache = CacheBuilder::new(100).build().unwrap();
    assert!(cache.set("zero".to_string(), 0, 0).await);
    assert!(cache.set("exact".to_string(), 0, 100).await);
    assert!(!cache.set("over".to_string(), 0, 101).await);
}

#[tokio::test]
async fn explicit_delete_is_not_lost() {
    let cache = CacheBuilder::new(100).build().unwrap();
    cache.set("a".to_string(), 1, 1).await;
    assert!(cache.delete(&"a".to_string()));
    quiesce().await;
    assert_eq!(cache.get(&"a".to_string()), None);
}

#[tokio::test]
async fn update_changes_total_cost_by_exactly_the_delta() {
    let cache = CacheBuilder::new(1000).build().unwrap();
    cache.set("a".to_string(), 1, 50).await;
    cache.set("b".to_string(), 2, 50).await;
    quiesce().await;
    cache.set("a".to_string(), 1, 80).await;
    quiesce().await;
    assert_eq!(cache.get(&"a".to_string()), Some(1));
    assert_eq!(cache.get(&"b".to_string()), Some(2));
}

#[tokio::test]
async fn snapshot_round_trips_a_live_set() {
    let dir = std::env::temp_dir().join(format!("tinylfu-cache-snapshot-test-{}", std::process::id()));
    let path = dir.with_extension("bin");

    let writer = CacheBuilder::new(1000).build().unwrap();
    for i in 0u64..10 {
        writer.set(format!("k{i}"), format!("v{i}"), 1).await;
    }
    quiesce().await;

    let codec = StringCodec;
    writer.save_snapshot(&path, &codec, 1).await.unwrap();

    let reader = CacheBuilder::new(1000).build().unwrap();
    let loaded = reader.load_snapshot(&path, &codec, Some(1)).await.unwrap();
    assert_eq!(loaded, 10);
    for i in 0u64..10 {
        assert_eq!(reader.get(&format!("k{i}")), Some(format!("v{i}")));
    }

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn snapshot_version_mismatch_is_rejected() {
    let path = std::env::temp_dir()
        .join(format!("tinylfu-cache-snapshot-version-test-{}", std::process::id()))
        .with_extension("bin");

    let writer = CacheBuilder::new(100).build().unwrap();
    writer.set("k".to_string(), "v".to_string(), 1).await;
    quiesce().await;

    let codec = StringCodec;
    writer.save_snapshot(&path, &codec, 1).await.unwrap();

    let reader = CacheBuilder::new(100).build().unwrap();
    let result = reader.load_snapshot(&path, &codec, Some(2)).await;
    assert!(matches!(result, Err(CacheError::VersionMismatch { expected: 2, found: 1 })));

    let _ = std::fs::remove_file(&path);
}
