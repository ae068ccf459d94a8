//! Router behaviour: main-pool resolution, readiness gating and the
//! single-construction guarantee of the slug→pool cache.

mod common;

use branchd::error::BranchError;
use branchd::models::{BranchStatus, BranchType};
use branchd::store::MetadataStore;
use common::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[tokio::test]
async fn empty_and_main_slugs_resolve_to_main_pool() {
    let h = harness();

    h.router.get_pool("").await.unwrap();
    h.router.get_pool("main").await.unwrap();

    // neither resolution touched the opener or the cache
    assert_eq!(h.opener.open_count(), 0);
    assert!(h.router.get_active_pools().await.is_empty());
}

#[tokio::test]
async fn disabled_router_still_serves_main() {
    let mut config = branching_config();
    config.enabled = false;
    let h = harness_with(config);

    h.router.get_pool("").await.unwrap();
    h.router.get_pool("main").await.unwrap();

    let err = h.router.get_pool("feature-x").await.unwrap_err();
    assert!(matches!(err, BranchError::BranchingDisabled));
    assert_eq!(h.opener.open_count(), 0);
}

#[tokio::test]
async fn unknown_slug_is_not_found() {
    let h = harness();
    let err = h.router.get_pool("no-such-branch").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn non_ready_branch_is_rejected() {
    let h = harness();
    h.store.insert(make_branch(
        "wip",
        BranchType::Preview,
        BranchStatus::Creating,
        None,
    ));

    let err = h.router.get_pool("wip").await.unwrap_err();
    assert!(matches!(err, BranchError::BranchNotReady(slug, status)
        if slug == "wip" && status == "creating"));
    assert_eq!(h.opener.open_count(), 0);
}

#[tokio::test]
async fn pool_is_cached_after_first_use() {
    let h = harness();
    h.store.insert(make_branch(
        "feature-a",
        BranchType::Preview,
        BranchStatus::Ready,
        None,
    ));

    h.router.get_pool("feature-a").await.unwrap();
    h.router.get_pool("feature-a").await.unwrap();

    assert_eq!(h.opener.open_count(), 1);
    assert!(h.router.has_pool("feature-a").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_build_exactly_one_pool() {
    let h = harness();
    h.store.insert(make_branch(
        "feature-a",
        BranchType::Preview,
        BranchStatus::Ready,
        None,
    ));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let router = h.router.clone();
        tasks.spawn(async move { router.get_pool("feature-a").await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(h.opener.open_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_slugs_build_pools_concurrently() {
    let h = harness();
    for slug in ["branch-a", "branch-b"] {
        h.store.insert(make_branch(
            slug,
            BranchType::Preview,
            BranchStatus::Ready,
            None,
        ));
    }
    h.opener.delay_ms.store(200, Ordering::SeqCst);

    let start = Instant::now();
    let a = {
        let router = h.router.clone();
        tokio::spawn(async move { router.get_pool("branch-a").await })
    };
    let b = {
        let router = h.router.clone();
        tokio::spawn(async move { router.get_pool("branch-b").await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // both builds overlap; back-to-back would take at least 400ms
    assert!(
        start.elapsed() < Duration::from_millis(390),
        "pool creation for different slugs serialized: took {:?}",
        start.elapsed()
    );
    assert_eq!(h.opener.open_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cached_pools_stay_readable_during_a_slow_build() {
    let h = harness();
    for slug in ["branch-a", "branch-b"] {
        h.store.insert(make_branch(
            slug,
            BranchType::Preview,
            BranchStatus::Ready,
            None,
        ));
    }

    h.router.get_pool("branch-a").await.unwrap();

    h.opener.delay_ms.store(300, Ordering::SeqCst);
    let slow = {
        let router = h.router.clone();
        tokio::spawn(async move { router.get_pool("branch-b").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    h.router.get_pool("branch-a").await.unwrap();
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "cached read blocked behind an in-flight build: took {:?}",
        start.elapsed()
    );

    slow.await.unwrap().unwrap();
    assert_eq!(h.opener.open_count(), 2);
}

#[tokio::test]
async fn close_pool_evicts_and_reopen_rebuilds() {
    let h = harness();
    h.store.insert(make_branch(
        "feature-a",
        BranchType::Preview,
        BranchStatus::Ready,
        None,
    ));

    h.router.get_pool("feature-a").await.unwrap();
    assert!(h.router.close_pool("feature-a").await);
    assert!(!h.router.has_pool("feature-a").await);
    // second close is a no-op
    assert!(!h.router.close_pool("feature-a").await);

    h.router.get_pool("feature-a").await.unwrap();
    assert_eq!(h.opener.open_count(), 2);
}

#[tokio::test]
async fn refresh_pool_builds_a_new_pool() {
    let h = harness();
    h.store.insert(make_branch(
        "feature-a",
        BranchType::Preview,
        BranchStatus::Ready,
        None,
    ));

    h.router.get_pool("feature-a").await.unwrap();
    h.router.refresh_pool("feature-a").await.unwrap();

    assert_eq!(h.opener.open_count(), 2);
    assert!(h.router.has_pool("feature-a").await);
}

#[tokio::test]
async fn refresh_pool_works_while_branch_is_not_ready() {
    let h = harness();
    let branch = make_branch(
        "feature-a",
        BranchType::Preview,
        BranchStatus::Ready,
        None,
    );
    h.store.insert(branch.clone());
    h.router.get_pool("feature-a").await.unwrap();

    // mid-migration the branch is not ready, but its pool must still be
    // replaceable from the remembered URL
    h.store
        .update_branch_status(branch.id, BranchStatus::Migrating, None)
        .await
        .unwrap();

    h.router.refresh_pool("feature-a").await.unwrap();
    assert_eq!(h.opener.open_count(), 2);
    assert!(h.router.has_pool("feature-a").await);
}

#[tokio::test]
async fn active_pools_are_sorted() {
    let h = harness();
    for slug in ["zeta", "alpha", "mid"] {
        h.store.insert(make_branch(
            slug,
            BranchType::Preview,
            BranchStatus::Ready,
            None,
        ));
    }

    h.router.get_pool("zeta").await.unwrap();
    h.router.get_pool("alpha").await.unwrap();
    h.router.get_pool("mid").await.unwrap();

    assert_eq!(
        h.router.get_active_pools().await,
        vec!["alpha".to_string(), "mid".to_string(), "zeta".to_string()]
    );
}

#[tokio::test]
async fn pool_stats_cover_main_and_branches() {
    let h = harness();
    h.store.insert(make_branch(
        "feature-a",
        BranchType::Preview,
        BranchStatus::Ready,
        None,
    ));
    h.router.get_pool("feature-a").await.unwrap();

    let stats = h.router.get_pool_stats().await;
    assert!(stats.contains_key("main"));
    assert!(stats.contains_key("feature-a"));
    assert_eq!(stats.len(), 2);
}

#[tokio::test]
async fn close_all_pools_leaves_main_usable() {
    let h = harness();
    h.store.insert(make_branch(
        "feature-a",
        BranchType::Preview,
        BranchStatus::Ready,
        None,
    ));
    h.router.get_pool("feature-a").await.unwrap();

    h.router.close_all_pools().await;
    assert!(h.router.get_active_pools().await.is_empty());
    h.router.get_pool("main").await.unwrap();
}
