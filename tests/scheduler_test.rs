//! Cleanup scheduler behaviour: expiry selection, failure isolation and
//! start/stop semantics.

mod common;

use branchd::config::CleanupConfig;
use branchd::models::{BranchStatus, BranchType};
use branchd::scheduler::CleanupScheduler;
use branchd::store::MetadataStore;
use chrono::{Duration, Utc};
use common::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;

fn scheduler_for(h: &Harness, config: CleanupConfig) -> CleanupScheduler {
    CleanupScheduler::new(
        h.store.clone(),
        h.router.clone(),
        h.manager.clone(),
        config,
    )
}

fn fast_config() -> CleanupConfig {
    CleanupConfig {
        interval: StdDuration::from_millis(50),
        startup_delay: StdDuration::from_millis(10),
    }
}

#[tokio::test]
async fn cleanup_deletes_only_expired_branches() {
    let h = harness();
    let expired = make_branch(
        "stale",
        BranchType::Preview,
        BranchStatus::Ready,
        Some(Utc::now() - Duration::hours(1)),
    );
    let fresh = make_branch(
        "fresh",
        BranchType::Preview,
        BranchStatus::Ready,
        Some(Utc::now() + Duration::hours(1)),
    );
    h.store.insert(expired.clone());
    h.store.insert(fresh.clone());

    let scheduler = scheduler_for(&h, CleanupConfig::default());
    let outcome = scheduler.cleanup(None).await;

    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(h.provisioner.drop_count(), 1);
    assert!(h.store.get_branch(expired.id).await.unwrap_err().is_not_found());
    assert_eq!(
        h.store.get_branch(fresh.id).await.unwrap().status,
        BranchStatus::Ready
    );
}

#[tokio::test]
async fn cleanup_never_touches_main_or_deleting_branches() {
    let h = harness();
    // a branch already mid-deletion must not be picked up again
    h.store.insert(make_branch(
        "half-gone",
        BranchType::Preview,
        BranchStatus::Deleting,
        Some(Utc::now() - Duration::hours(1)),
    ));

    let scheduler = scheduler_for(&h, CleanupConfig::default());
    let outcome = scheduler.cleanup(None).await;

    assert_eq!(outcome.deleted, 0);
    assert_eq!(outcome.failed, 0);
    assert_eq!(h.provisioner.drop_count(), 0);
    assert_eq!(
        h.store.get_main_branch().await.unwrap().status,
        BranchStatus::Ready
    );
}

#[tokio::test]
async fn cleanup_continues_past_deletion_failures() {
    let h = harness();
    for slug in ["stale-a", "stale-b"] {
        h.store.insert(make_branch(
            slug,
            BranchType::Preview,
            BranchStatus::Ready,
            Some(Utc::now() - Duration::hours(1)),
        ));
    }
    h.provisioner.fail_drop.store(true, Ordering::SeqCst);

    let scheduler = scheduler_for(&h, CleanupConfig::default());
    let outcome = scheduler.cleanup(None).await;

    // both failures are tallied; neither aborts the pass
    assert_eq!(outcome.deleted, 0);
    assert_eq!(outcome.failed, 2);
    assert_eq!(
        h.store.get_branch_by_slug("stale-a").await.unwrap().status,
        BranchStatus::Error
    );
    assert_eq!(
        h.store.get_branch_by_slug("stale-b").await.unwrap().status,
        BranchStatus::Error
    );
}

#[tokio::test]
async fn expired_error_branches_are_reclaimed() {
    let h = harness();
    let broken = make_branch(
        "broken",
        BranchType::Preview,
        BranchStatus::Error,
        Some(Utc::now() - Duration::minutes(5)),
    );
    h.store.insert(broken.clone());

    let scheduler = scheduler_for(&h, CleanupConfig::default());
    let outcome = scheduler.cleanup(None).await;

    assert_eq!(outcome.deleted, 1);
    assert!(h.store.get_branch(broken.id).await.unwrap_err().is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_scheduler_reclaims_on_its_own() {
    let h = harness();
    let expired = make_branch(
        "stale",
        BranchType::Preview,
        BranchStatus::Ready,
        Some(Utc::now() - Duration::hours(1)),
    );
    h.store.insert(expired.clone());

    let scheduler = scheduler_for(&h, fast_config());
    scheduler.start().await;
    assert!(scheduler.is_running().await);
    // a second start is a no-op
    scheduler.start().await;

    tokio::time::sleep(StdDuration::from_millis(150)).await;
    scheduler.stop().await;
    assert!(!scheduler.is_running().await);

    assert!(h.store.get_branch(expired.id).await.unwrap_err().is_not_found());
    assert_eq!(h.provisioner.drop_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_during_startup_delay_runs_no_pass() {
    let h = harness();
    h.store.insert(make_branch(
        "stale",
        BranchType::Preview,
        BranchStatus::Ready,
        Some(Utc::now() - Duration::hours(1)),
    ));

    let config = CleanupConfig {
        interval: StdDuration::from_secs(3600),
        startup_delay: StdDuration::from_secs(3600),
    };
    let scheduler = scheduler_for(&h, config);
    scheduler.start().await;
    scheduler.stop().await;

    assert!(!scheduler.is_running().await);
    assert_eq!(h.provisioner.drop_count(), 0);
}
