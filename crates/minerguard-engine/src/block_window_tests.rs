use super::*;
use crate::test_support::{block, MockChain};

fn window_with(range: std::ops::RangeInclusive<u64>, max: usize) -> BlockWindow {
    let mut window = BlockWindow::new(max);
    for n in range {
        assert!(window.push(block(n, &[])));
    }
    window
}

#[test]
fn test_window_capacity() {
    assert_eq!(window_capacity(Duration::from_secs(1800)), 300);
    assert_eq!(window_capacity(Duration::from_secs(3600)), 600);
    assert_eq!(window_capacity(Duration::from_secs(3)), 1);
    assert_eq!(window_capacity(Duration::ZERO), 1);
}

#[test]
fn test_push_never_exceeds_capacity() {
    let mut window = BlockWindow::new(4);
    for n in 1..=50 {
        window.push(block(n, &[]));
        assert!(window.len() <= 4);
        // The smallest resident block is always the oldest one.
        let smallest = window.blocks().map(|b| b.number).min();
        assert_eq!(smallest, window.oldest());
    }
    assert_eq!(window.oldest(), Some(47));
    assert_eq!(window.newest(), Some(50));
}

#[test]
fn test_membership_matches_resident_blocks() {
    let window = window_with(1..=10, 3);
    for n in 1..=10 {
        assert_eq!(window.contains(n), (8..=10).contains(&n), "block {}", n);
    }
}

#[test]
fn test_push_rejects_non_monotonic() {
    let mut window = window_with(10..=12, 5);
    assert!(!window.push(block(12, &[])));
    assert!(!window.push(block(3, &[])));
    assert_eq!(window.len(), 3);

    // Gaps are fine.
    assert!(window.push(block(20, &[])));
    let numbers: Vec<u64> = window.blocks().map(|b| b.number).collect();
    assert_eq!(numbers, vec![10, 11, 12, 20]);
}

#[test]
fn test_eviction_hides_punishment() {
    let mut window = BlockWindow::new(5);
    window.push(block(100, &["cXpunished"]));
    for n in 101..=104 {
        window.push(block(n, &[]));
    }
    assert_eq!(window.punishments_for("cXpunished").len(), 1);

    window.push(block(105, &[]));

    assert!(!window.contains(100));
    assert!(window.punishments_for("cXpunished").is_empty());
}

#[test]
fn test_punishments_for_filters_by_source() {
    let mut window = BlockWindow::new(10);
    window.push(block(1, &["cXa", "cXb"]));
    window.push(block(2, &["cXa"]));

    let found = window.punishments_for("cXa");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].block_number, 1);
    assert_eq!(found[1].block_number, 2);
    assert_eq!(window.punishments_for("cXb").len(), 1);
    assert!(window.punishments_for("cXc").is_empty());
}

#[tokio::test]
async fn test_initialize_backfills_window() {
    let chain = Arc::new(MockChain::new(1000));
    chain.fail_block(998);
    let cache = BlockWindowCache::new(chain.clone(), 5);

    cache.initialize().await;

    assert!(cache.is_initialized());
    assert_eq!(cache.cursor(), 1000);
    let numbers: Vec<u64> = cache.snapshot().iter().map(|b| b.number).collect();
    assert_eq!(numbers, vec![996, 997, 999, 1000]);
}

#[tokio::test]
async fn test_initialize_clamps_at_genesis() {
    let chain = Arc::new(MockChain::new(3));
    let cache = BlockWindowCache::new(chain, 10);
    cache.initialize().await;
    assert_eq!(
        cache.status(),
        WindowStatus {
            len: 3,
            oldest: Some(1),
            newest: Some(3)
        }
    );
}

#[tokio::test]
async fn test_initialize_runs_once() {
    let chain = Arc::new(MockChain::new(10));
    let cache = BlockWindowCache::new(chain.clone(), 4);

    cache.initialize().await;
    cache.initialize().await;

    assert_eq!(chain.block_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_initialize_retried_after_head_failure() {
    let chain = Arc::new(MockChain::new(10));
    chain.fail_height(true);
    let cache = BlockWindowCache::new(chain.clone(), 4);

    cache.initialize().await;
    assert!(!cache.is_initialized());
    assert_eq!(cache.status().len, 0);

    chain.fail_height(false);
    cache.poll_once().await;
    assert!(cache.is_initialized());
    assert_eq!(cache.status().newest, Some(10));
}

#[tokio::test]
async fn test_poll_appends_new_blocks() {
    let chain = Arc::new(MockChain::new(10));
    let cache = BlockWindowCache::new(chain.clone(), 4);
    cache.initialize().await;

    chain.set_height(13);
    chain.fail_block(12);
    chain.add_block(block(13, &["cXlate"]));
    cache.poll_once().await;

    let numbers: Vec<u64> = cache.snapshot().iter().map(|b| b.number).collect();
    assert_eq!(numbers, vec![9, 10, 11, 13]);
    assert_eq!(cache.cursor(), 13);
    assert_eq!(cache.punishments_for("cXlate").len(), 1);

    // Nothing new: no fetches.
    let calls = chain.block_calls.load(Ordering::SeqCst);
    cache.poll_once().await;
    assert_eq!(chain.block_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_snapshot_is_detached() {
    let chain = Arc::new(MockChain::new(0));
    let cache = BlockWindowCache::new(chain, 3);
    cache.push(block(1, &[]));

    let snapshot = cache.snapshot();
    cache.push(block(2, &[]));

    assert_eq!(snapshot.len(), 1);
    assert_eq!(cache.snapshot().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_poller_stops_when_deactivated() {
    let chain = Arc::new(MockChain::new(5));
    let cache = Arc::new(
        BlockWindowCache::new(chain.clone(), 10).with_poll_interval(Duration::from_secs(3)),
    );

    let handle = tokio::spawn(cache.clone().run_poller());
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(cache.is_initialized());

    chain.set_height(7);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(cache.status().newest, Some(7));

    cache.deactivate();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();
}
