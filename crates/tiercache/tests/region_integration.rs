//! Region controller integration tests.
//!
//! Every region here has at least one auxiliary, so these tests cover the
//! interplay between the memory tier, the spool worker and read-through.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use common::{FailingAuxiliary, RecordingSink, SlowAuxiliary, region_with_disk};
use tiercache::{
    AuxiliaryKind, CacheError, CacheEventKind, DiskUsagePattern, DisposeReport, ElementAttributes,
    ElementEventType, GroupAttrName, HitTier, MapAuxiliary, MemoryPolicyKind, Region, RegionConfig,
    now_millis,
};

fn key(i: usize) -> String {
    format!("{i}:key")
}

// ─────────────────────────────────────────────────────────────────────────────
// Spill and read-through
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_spill_completeness() -> Result<()> {
    for policy in [
        MemoryPolicyKind::Lru,
        MemoryPolicyKind::Soft,
        MemoryPolicyKind::HashOrdered,
    ] {
        let config = RegionConfig::new().with_max_objects(50).with_policy(policy);
        let (region, _disk) = region_with_disk("spill", config);

        for i in 0..100 {
            region.put(key(i), format!("data{i}"))?;
        }
        region.wait_for_spool().await;

        for i in 0..100 {
            let element = region.get(&key(i)).await;
            assert_eq!(
                element.map(|e| e.value().clone()),
                Some(format!("data{i}")),
                "{policy}: key {i} should be readable"
            );
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_concrete_lru_scenario() -> Result<()> {
    let (region, disk) = region_with_disk("scenario", RegionConfig::new().with_max_objects(100));

    for i in 0..200 {
        region.put(key(i), format!("data{i}"))?;
    }
    region.wait_for_spool().await;

    assert_eq!(region.memory_size(), 100);
    let expected: Vec<String> = (100..200).map(key).collect();
    assert_eq!(region.key_set(), expected);
    assert_eq!(disk.len(), 100);

    for i in 0..200 {
        let element = region.get(&key(i)).await.expect("every key is readable");
        assert_eq!(element.value(), &format!("data{i}"));
    }

    assert_eq!(region.memory_size(), 100);
    assert_eq!(region.key_set(), expected);
    Ok(())
}

#[tokio::test]
async fn test_evicted_element_visible_while_in_flight() -> Result<()> {
    let slow = SlowAuxiliary::new(Duration::from_millis(200));
    let sink = RecordingSink::new();
    let region: Arc<Region<String, String>> =
        Region::builder("inflight", RegionConfig::new().with_max_objects(1))
            .with_auxiliary(slow.clone())
            .with_sink(sink.clone())
            .build()?;

    region.put("a".to_string(), "1".to_string())?;
    region.put("b".to_string(), "2".to_string())?;

    let element = region.get(&"a".to_string()).await.expect("queued element is readable");
    assert_eq!(element.value(), "1");
    assert_eq!(sink.count(CacheEventKind::Hit(HitTier::InFlight)), 1);

    // Reading `a` promoted it back, which pushed `b` out.
    assert_eq!(region.key_set(), vec!["a".to_string()]);
    region.wait_for_spool().await;
    assert_eq!(slow.len(), 2);
    assert_eq!(region.stats().spool.in_flight, 0);
    Ok(())
}

#[tokio::test]
async fn test_get_multiple() -> Result<()> {
    let (region, _disk) = region_with_disk("multi", RegionConfig::new().with_max_objects(2));
    for i in 0..4 {
        region.put(key(i), format!("data{i}"))?;
    }
    region.wait_for_spool().await;

    let keys: Vec<String> = (0..6).map(key).collect();
    let found = region.get_multiple(&keys).await;
    assert_eq!(found.len(), 4);
    assert_eq!(found[&key(0)].value(), "data0");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Removal and clear
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_removal_correctness() -> Result<()> {
    let (region, disk) = region_with_disk("remove", RegionConfig::new().with_max_objects(10));

    for i in 0..200 {
        region.put(key(i), format!("data{i}"))?;
    }
    // No wait: most spills are still queued and must be cancelled.
    for i in 0..200 {
        region.remove(&key(i)).await?;
    }
    region.wait_for_spool().await;

    for i in 0..200 {
        assert!(region.get(&key(i)).await.is_none(), "key {i} should be gone");
    }
    assert!(disk.is_empty());
    assert_eq!(region.memory_size(), 0);
    Ok(())
}

#[tokio::test]
async fn test_hierarchical_removal() -> Result<()> {
    let (region, disk) = region_with_disk("tree", RegionConfig::new().with_max_objects(5));

    for i in 0..10 {
        region.put(format!("root:{i}:key"), "data".to_string())?;
    }
    region.put("test".to_string(), "data".to_string())?;
    region.wait_for_spool().await;
    assert!(!disk.is_empty());

    assert!(region.remove(&"root:".to_string()).await?);

    for i in 0..10 {
        assert!(region.get(&format!("root:{i}:key")).await.is_none());
    }
    assert!(region.get(&"test".to_string()).await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_hierarchical_removal_with_custom_delimiter() -> Result<()> {
    let config = RegionConfig::new()
        .with_max_objects(2)
        .with_hierarchy_delimiter('/');
    let (region, disk) = region_with_disk("slash", config);

    for i in 0..10 {
        region.put(format!("root/{i}/key"), "data".to_string())?;
    }
    region.put("root:other".to_string(), "data".to_string())?;
    region.wait_for_spool().await;
    assert_eq!(disk.len(), 9);

    assert!(region.remove(&"root/".to_string()).await?);
    region.wait_for_spool().await;

    assert_eq!(disk.len(), 0);
    for i in 0..10 {
        assert!(region.get(&format!("root/{i}/key")).await.is_none());
    }
    assert!(region.get(&"root:other".to_string()).await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_remove_during_read_through_is_not_undone() -> Result<()> {
    let slow = SlowAuxiliary::slow_reads(Duration::from_millis(50));
    let region: Arc<Region<String, String>> =
        Region::builder("race", RegionConfig::new().with_max_objects(1))
            .with_auxiliary(slow.clone())
            .build()?;
    region.put("a".to_string(), "1".to_string())?;
    region.put("b".to_string(), "2".to_string())?;
    region.wait_for_spool().await;
    assert!(slow.contains("a"));

    let reader = tokio::spawn({
        let region = region.clone();
        async move { region.get(&"a".to_string()).await }
    });
    // Let the reader fetch "a" and park inside the slow read.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(region.remove(&"a".to_string()).await?);
    reader.await?;

    assert!(region.get_quiet(&"a".to_string()).is_none());
    assert_eq!(region.key_set(), vec!["b".to_string()]);
    assert!(region.get(&"a".to_string()).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_clear_during_read_through_is_not_undone() -> Result<()> {
    let slow = SlowAuxiliary::slow_reads(Duration::from_millis(50));
    let region: Arc<Region<String, String>> =
        Region::builder("race-clear", RegionConfig::new().with_max_objects(1))
            .with_auxiliary(slow.clone())
            .build()?;
    region.put("a".to_string(), "1".to_string())?;
    region.put("b".to_string(), "2".to_string())?;
    region.wait_for_spool().await;

    let reader = tokio::spawn({
        let region = region.clone();
        async move { region.get(&"a".to_string()).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    region.clear().await?;
    reader.await?;

    assert_eq!(region.memory_size(), 0);
    assert!(region.get(&"a".to_string()).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_read_through_promotes_when_no_removal_overlaps() -> Result<()> {
    let slow = SlowAuxiliary::slow_reads(Duration::from_millis(5));
    let region: Arc<Region<String, String>> =
        Region::builder("promote", RegionConfig::new().with_max_objects(1))
            .with_auxiliary(slow.clone())
            .build()?;
    region.put("a".to_string(), "1".to_string())?;
    region.put("b".to_string(), "2".to_string())?;
    region.wait_for_spool().await;

    // An earlier, finished removal does not block promotion.
    region.remove(&"unrelated".to_string()).await?;
    assert!(region.get(&"a".to_string()).await.is_some());
    assert_eq!(region.key_set(), vec!["a".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_group_wildcard_removal() -> Result<()> {
    let disk: Arc<MapAuxiliary<GroupAttrName, u32>> = Arc::new(MapAuxiliary::disk("disk"));
    let region: Arc<Region<GroupAttrName, u32>> =
        Region::builder("groups", RegionConfig::new().with_max_objects(2))
            .with_auxiliary(disk.clone())
            .build()?;

    for (group, attr) in [("g1", "a"), ("g1", "b"), ("g2", "a"), ("g1", "c")] {
        region.put(GroupAttrName::new(group, attr), 1)?;
    }
    region.wait_for_spool().await;

    assert!(region.remove(&GroupAttrName::group("g1")).await?);
    for attr in ["a", "b", "c"] {
        assert!(region.get(&GroupAttrName::new("g1", attr)).await.is_none());
    }
    assert!(region.get(&GroupAttrName::new("g2", "a")).await.is_some());

    let err = region.put(GroupAttrName::group("g3"), 1).unwrap_err();
    assert!(matches!(err, CacheError::InvalidKey { .. }));
    Ok(())
}

#[tokio::test]
async fn test_clear_law() -> Result<()> {
    let (region, disk) = region_with_disk("clear", RegionConfig::new().with_max_objects(2));
    for i in 0..5 {
        region.put(key(i), "v".to_string())?;
    }
    region.clear().await?;
    region.wait_for_spool().await;

    for i in 0..5 {
        assert!(region.get(&key(i)).await.is_none());
    }
    assert!(disk.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_local_remove_leaves_remote() -> Result<()> {
    let remote: Arc<MapAuxiliary<String, String>> =
        Arc::new(MapAuxiliary::new("remote", AuxiliaryKind::Remote));
    let region: Arc<Region<String, String>> = Region::builder("local", RegionConfig::new())
        .with_auxiliary(remote.clone())
        .build()?;

    region.put("a".to_string(), "1".to_string())?;
    region.wait_for_spool().await;
    assert!(remote.contains(&"a".to_string()));

    assert!(region.local_remove(&"a".to_string()).await?);
    assert!(remote.contains(&"a".to_string()));
    assert!(region.local_get(&"a".to_string()).await.is_none());
    assert!(region.get(&"a".to_string()).await.is_some());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Matching
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_matching_memory_only() -> Result<()> {
    let (region, _disk) = region_with_disk("match", RegionConfig::new().with_max_objects(2));
    region.put("user:1".to_string(), "a".to_string())?;
    region.put("user:2".to_string(), "b".to_string())?;
    region.put("item:1".to_string(), "c".to_string())?;
    region.wait_for_spool().await;

    // user:1 was spilled; memory is authoritative so the disk is not asked.
    let matches = region.get_matching("^user:").await?;
    assert_eq!(matches.len(), 1);
    assert!(matches.contains_key("user:2"));

    assert!(matches!(
        region.get_matching("(").await,
        Err(CacheError::InvalidPattern(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_get_matching_zero_capacity_asks_disk() -> Result<()> {
    let (region, _disk) = region_with_disk("match0", RegionConfig::new().with_max_objects(0));
    region.put("user:1".to_string(), "a".to_string())?;
    region.put("user:2".to_string(), "b".to_string())?;
    region.put("item:1".to_string(), "c".to_string())?;
    region.wait_for_spool().await;

    let matches = region.get_matching("^user:").await?;
    assert_eq!(matches.len(), 2);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Write-through
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_write_through_respects_flags() -> Result<()> {
    let disk: Arc<MapAuxiliary<String, String>> = Arc::new(MapAuxiliary::disk("disk"));
    let lateral: Arc<MapAuxiliary<String, String>> =
        Arc::new(MapAuxiliary::new("peer", AuxiliaryKind::Lateral));
    let region: Arc<Region<String, String>> = Region::builder("wt", RegionConfig::new())
        .with_auxiliary(disk.clone())
        .with_auxiliary(lateral.clone())
        .build()?;

    region.put("shared".to_string(), "1".to_string())?;
    region.put_with(
        "private".to_string(),
        "2".to_string(),
        ElementAttributes::new().with_lateral(false),
    )?;
    region.wait_for_spool().await;

    assert!(lateral.contains(&"shared".to_string()));
    assert!(!lateral.contains(&"private".to_string()));
    // Swap pattern: disk only sees spills.
    assert!(disk.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_update_pattern_writes_disk_on_put() -> Result<()> {
    let config = RegionConfig::new().with_disk_usage_pattern(DiskUsagePattern::Update);
    let (region, disk) = region_with_disk("update", config);

    region.put("a".to_string(), "1".to_string())?;
    region.wait_for_spool().await;

    assert!(disk.contains(&"a".to_string()));
    assert_eq!(region.memory_size(), 1);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Expiry on request
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_expired_on_request() -> Result<()> {
    let sink = RecordingSink::new();
    let region: Arc<Region<String, String>> = Region::builder("expiry", RegionConfig::new())
        .with_sink(sink.clone())
        .build()?;

    let long_ago = now_millis() - 5_000;
    region.put_with(
        "old".to_string(),
        "v".to_string(),
        ElementAttributes::new()
            .with_eternal(false)
            .with_max_life_seconds(1)
            .with_create_time(long_ago),
    )?;
    region.put_with(
        "idle".to_string(),
        "v".to_string(),
        ElementAttributes::new()
            .with_eternal(false)
            .with_idle_time_seconds(1)
            .with_create_time(long_ago),
    )?;

    assert!(region.get(&"old".to_string()).await.is_none());
    assert!(region.get(&"idle".to_string()).await.is_none());
    assert_eq!(region.memory_size(), 0);
    assert_eq!(region.stats().misses_expired, 2);
    assert_eq!(
        sink.keys_for(CacheEventKind::Element(ElementEventType::ExceededMaxLifeOnRequest)),
        vec!["old".to_string()]
    );
    assert_eq!(
        sink.keys_for(CacheEventKind::Element(ElementEventType::ExceededIdleTimeOnRequest)),
        vec!["idle".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_read_resets_idle_clock() -> Result<()> {
    let (region, _disk) = region_with_disk("touch", RegionConfig::new());
    region.put_with(
        "a".to_string(),
        "v".to_string(),
        ElementAttributes::new()
            .with_eternal(false)
            .with_idle_time_seconds(60),
    )?;
    let before = region.get_quiet(&"a".to_string()).unwrap().attributes().last_access_time();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let element = region.get(&"a".to_string()).await.unwrap();
    assert!(element.attributes().last_access_time() > before);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures and limits
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failing_auxiliary_is_swallowed() -> Result<()> {
    let failing = FailingAuxiliary::new(AuxiliaryKind::Disk);
    let sink = RecordingSink::new();
    let region: Arc<Region<String, String>> =
        Region::builder("failing", RegionConfig::new().with_max_objects(1))
            .with_auxiliary(failing.clone())
            .with_sink(sink.clone())
            .build()?;

    region.put("a".to_string(), "1".to_string())?;
    region.put("b".to_string(), "2".to_string())?;
    region.wait_for_spool().await;

    assert!(region.get(&"a".to_string()).await.is_none());
    assert!(!region.remove(&"a".to_string()).await?);
    region.clear().await?;

    assert!(failing.calls() >= 4);
    let stats = region.stats();
    assert!(stats.spool.failures >= 4);
    assert_eq!(stats.spool.dropped, 1);
    assert_eq!(
        sink.keys_for(CacheEventKind::Element(ElementEventType::SpooledDiskNotAvailable)),
        vec!["a".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_slow_auxiliary_is_time_bounded() -> Result<()> {
    let slow = SlowAuxiliary::new(Duration::from_millis(500));
    let config = RegionConfig::new()
        .with_max_objects(1)
        .with_auxiliary_timeout(Duration::from_millis(50));
    let region: Arc<Region<String, String>> = Region::builder("slow", config)
        .with_auxiliary(slow.clone())
        .build()?;

    region.put("a".to_string(), "1".to_string())?;
    region.put("b".to_string(), "2".to_string())?;
    tokio::time::timeout(Duration::from_millis(400), region.wait_for_spool()).await?;

    assert_eq!(slow.len(), 0);
    let stats = region.stats();
    assert_eq!(stats.spool.failures, 1);
    assert_eq!(stats.spool.dropped, 1);
    Ok(())
}

#[tokio::test]
async fn test_spool_not_allowed() -> Result<()> {
    let sink = RecordingSink::new();
    let disk: Arc<MapAuxiliary<String, String>> = Arc::new(MapAuxiliary::disk("disk"));
    let region: Arc<Region<String, String>> =
        Region::builder("nospool", RegionConfig::new().with_max_objects(1))
            .with_auxiliary(disk.clone())
            .with_sink(sink.clone())
            .build()?;

    region.put_with(
        "pinned".to_string(),
        "1".to_string(),
        ElementAttributes::new().with_spool(false),
    )?;
    region.put("b".to_string(), "2".to_string())?;
    region.wait_for_spool().await;

    assert!(disk.is_empty());
    assert!(region.get(&"pinned".to_string()).await.is_none());
    assert_eq!(
        sink.count(CacheEventKind::Element(ElementEventType::SpooledNotAllowed)),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_full_spool_queue_waits_for_room() -> Result<()> {
    let slow = SlowAuxiliary::new(Duration::from_millis(20));
    let sink = RecordingSink::new();
    let config = RegionConfig::new()
        .with_max_objects(1)
        .with_spool_queue_capacity(1);
    let region: Arc<Region<String, String>> = Region::builder("full", config)
        .with_auxiliary(slow.clone())
        .with_sink(sink.clone())
        .build()?;

    for i in 0..6 {
        region.put(key(i), format!("v{i}"))?;
    }
    // Nothing has been written yet; every evicted key is held in flight.
    assert_eq!(region.stats().spool.in_flight, 5);

    region.wait_for_spool().await;

    let full = sink.count(CacheEventKind::Element(ElementEventType::SpoolQueueFull));
    let stats = region.stats().spool;
    assert!(full >= 1);
    assert_eq!(stats.overflowed, full as u64);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(slow.len(), 5);
    for i in 0..5 {
        assert!(slow.contains(&key(i)), "key {i} should be on disk");
    }
    Ok(())
}

#[tokio::test]
async fn test_spill_burst_larger_than_queue() -> Result<()> {
    // Default queue capacity is 1024; a burst of 1500 evictions overflows it.
    let (region, disk) = region_with_disk("burst", RegionConfig::new().with_max_objects(1500));

    for i in 0..3000 {
        region.put(key(i), format!("data{i}"))?;
    }
    region.wait_for_spool().await;

    let stats = region.stats().spool;
    assert_eq!(stats.dropped, 0);
    assert!(stats.overflowed > 0);
    assert_eq!(disk.len(), 1500);

    let mut missing = Vec::new();
    for i in 0..3000 {
        match region.get(&key(i)).await {
            Some(element) => assert_eq!(element.value(), &format!("data{i}")),
            None => missing.push(i),
        }
    }
    assert!(missing.is_empty(), "missing keys: {missing:?}");
    Ok(())
}

#[tokio::test]
async fn test_overflowed_stale_value_is_not_written() -> Result<()> {
    let slow = SlowAuxiliary::new(Duration::from_millis(20));
    let config = RegionConfig::new()
        .with_max_objects(1)
        .with_spool_queue_capacity(1);
    let region: Arc<Region<String, String>> = Region::builder("supersede", config)
        .with_auxiliary(slow.clone())
        .build()?;

    // "a" v1 and v2 are each evicted while the queue is full.
    region.put("a".to_string(), "v1".to_string())?;
    region.put("x".to_string(), "x".to_string())?;
    region.put("y".to_string(), "y".to_string())?;
    region.put("a".to_string(), "v2".to_string())?;
    region.put("z".to_string(), "z".to_string())?;
    region.wait_for_spool().await;

    let element = region.get(&"a".to_string()).await.expect("a was spilled");
    assert_eq!(element.value(), "v2");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispose
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dispose_flushes_all_to_disk() -> Result<()> {
    let (region, disk) = region_with_disk("dispose", RegionConfig::new().with_max_objects(10));
    for i in 0..15 {
        region.put(key(i), "v".to_string())?;
    }

    let report = region.dispose().await?;
    assert_eq!(report, DisposeReport { flushed: 10, skipped: 0 });
    assert_eq!(disk.len(), 15);
    assert!(disk.is_disposed());
    assert_eq!(region.memory_size(), 0);

    assert!(matches!(
        region.remove(&key(0)).await,
        Err(CacheError::Disposed(_))
    ));
    assert!(matches!(
        region.get_matching(".*").await,
        Err(CacheError::Disposed(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_dispose_timeout_is_reported_once() -> Result<()> {
    let slow = SlowAuxiliary::new(Duration::from_secs(1));
    let config = RegionConfig::new().with_dispose_timeout(Duration::from_millis(50));
    let region: Arc<Region<String, String>> = Region::builder("stuck", config)
        .with_auxiliary(slow)
        .build()?;
    region.put("a".to_string(), "1".to_string())?;

    assert!(matches!(
        region.dispose().await,
        Err(CacheError::DisposeTimeout { timeout_ms: 50, .. })
    ));
    assert_eq!(region.dispose().await?, DisposeReport::default());
    Ok(())
}

#[tokio::test]
async fn test_stats_serialize() -> Result<()> {
    let (region, _disk) = region_with_disk("stats", RegionConfig::new().with_max_objects(1));
    region.put("a".to_string(), "1".to_string())?;
    region.put("b".to_string(), "2".to_string())?;
    region.get(&"b".to_string()).await;
    region.get(&"missing".to_string()).await;
    region.wait_for_spool().await;

    let stats = region.stats();
    assert_eq!(stats.updates, 2);
    assert_eq!(stats.hits_memory, 1);
    assert_eq!(stats.misses_not_found, 1);
    assert_eq!(stats.memory.evictions, 1);
    assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);

    let json = serde_json::to_value(&stats)?;
    assert_eq!(json["region"], "stats");
    assert_eq!(json["memory"]["policy"], "lru");
    assert_eq!(json["spool"]["spooled"], 1);
    Ok(())
}
