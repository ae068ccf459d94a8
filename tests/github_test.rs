//! Pull-request event handling against the stored per-repository policy.

mod common;

use branchd::github::{pr_slug, GitHubIntegration, PullRequestAction, PullRequestEvent};
use branchd::models::{BranchStatus, DataCloneMode, GitHubConfig};
use branchd::store::MetadataStore;
use chrono::Utc;
use common::*;
use pretty_assertions::assert_eq;

const REPO: &str = "acme/webapp";

fn integration(h: &Harness) -> GitHubIntegration {
    GitHubIntegration::new(h.store.clone(), h.manager.clone())
}

async fn store_policy(h: &Harness, auto_create: bool, auto_delete: bool) {
    let now = Utc::now();
    h.store
        .upsert_github_config(&GitHubConfig {
            repository: REPO.to_string(),
            auto_create_on_pr: auto_create,
            auto_delete_on_merge: auto_delete,
            default_clone_mode: DataCloneMode::SchemaOnly,
            webhook_secret: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
}

fn pr_event(number: i32, action: PullRequestAction) -> PullRequestEvent {
    PullRequestEvent {
        repository: REPO.to_string(),
        number,
        title: format!("Add feature {}", number),
        url: format!("https://github.com/{}/pull/{}", REPO, number),
        author: "octocat".to_string(),
        action,
    }
}

#[tokio::test]
async fn opened_pr_creates_a_branch() {
    let h = harness();
    store_policy(&h, true, true).await;

    let branch = integration(&h)
        .handle_pull_request(&pr_event(7, PullRequestAction::Opened))
        .await
        .unwrap()
        .expect("branch for opened PR");

    assert_eq!(branch.slug, pr_slug(7));
    assert_eq!(branch.status, BranchStatus::Ready);
    assert_eq!(branch.github_repo.as_deref(), Some(REPO));
    assert_eq!(branch.github_pr_number, Some(7));
    assert_eq!(branch.created_by, "octocat");
    assert_eq!(h.provisioner.create_count(), 1);
}

#[tokio::test]
async fn redelivered_open_event_reuses_existing_branch() {
    let h = harness();
    store_policy(&h, true, true).await;
    let github = integration(&h);

    let first = github
        .handle_pull_request(&pr_event(7, PullRequestAction::Opened))
        .await
        .unwrap()
        .unwrap();
    let second = github
        .handle_pull_request(&pr_event(7, PullRequestAction::Reopened))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.provisioner.create_count(), 1);
}

#[tokio::test]
async fn merged_pr_deletes_the_branch() {
    let h = harness();
    store_policy(&h, true, true).await;
    let github = integration(&h);

    let branch = github
        .handle_pull_request(&pr_event(7, PullRequestAction::Opened))
        .await
        .unwrap()
        .unwrap();

    github
        .handle_pull_request(&pr_event(7, PullRequestAction::Closed { merged: true }))
        .await
        .unwrap();

    assert_eq!(h.provisioner.drop_count(), 1);
    assert!(h.store.get_branch(branch.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn unmerged_close_keeps_the_branch() {
    let h = harness();
    store_policy(&h, true, true).await;
    let github = integration(&h);

    let branch = github
        .handle_pull_request(&pr_event(7, PullRequestAction::Opened))
        .await
        .unwrap()
        .unwrap();

    github
        .handle_pull_request(&pr_event(7, PullRequestAction::Closed { merged: false }))
        .await
        .unwrap();

    assert_eq!(h.provisioner.drop_count(), 0);
    assert_eq!(
        h.store.get_branch(branch.id).await.unwrap().status,
        BranchStatus::Ready
    );
}

#[tokio::test]
async fn events_for_unconfigured_repository_are_ignored() {
    let h = harness();

    let result = integration(&h)
        .handle_pull_request(&pr_event(7, PullRequestAction::Opened))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(h.provisioner.create_count(), 0);
}

#[tokio::test]
async fn policy_flags_are_respected() {
    let h = harness();
    store_policy(&h, false, false).await;
    let github = integration(&h);

    let created = github
        .handle_pull_request(&pr_event(7, PullRequestAction::Opened))
        .await
        .unwrap();
    assert!(created.is_none());

    // branch created out of band is untouched when auto-delete is off
    let branch = h
        .manager
        .create_branch(
            branchd::models::CreateBranchRequest {
                name: "manual".to_string(),
                slug: Some(pr_slug(7)),
                github_repo: Some(REPO.to_string()),
                github_pr_number: Some(7),
                ..Default::default()
            },
            "octocat",
        )
        .await
        .unwrap();

    github
        .handle_pull_request(&pr_event(7, PullRequestAction::Closed { merged: true }))
        .await
        .unwrap();
    assert_eq!(
        h.store.get_branch(branch.id).await.unwrap().status,
        BranchStatus::Ready
    );
}
