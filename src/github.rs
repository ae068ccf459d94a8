//! GitHub integration
//!
//! Translates pull-request events into branch lifecycle calls according to
//! the per-repository policy stored in the metadata store. Webhook transport
//! and signature verification live outside this crate.

use crate::error::{BranchError, BranchResult};
use crate::lifecycle::{BranchManager, SYSTEM_ACTOR};
use crate::models::{Branch, CreateBranchRequest};
use crate::store::MetadataStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Slug assigned to the branch of a pull request
pub fn pr_slug(number: i32) -> String {
    format!("pr-{}", number)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Closed { merged: bool },
}

#[derive(Debug, Clone)]
pub struct PullRequestEvent {
    pub repository: String,
    pub number: i32,
    pub title: String,
    pub url: String,
    pub author: String,
    pub action: PullRequestAction,
}

pub struct GitHubIntegration {
    store: Arc<dyn MetadataStore>,
    manager: Arc<BranchManager>,
}

impl GitHubIntegration {
    pub fn new(store: Arc<dyn MetadataStore>, manager: Arc<BranchManager>) -> Self {
        Self { store, manager }
    }

    /// Apply a pull-request event under the repository's policy.
    ///
    /// Repositories without a stored config are ignored. Returns the branch
    /// created for an opened PR, if any.
    pub async fn handle_pull_request(
        &self,
        event: &PullRequestEvent,
    ) -> BranchResult<Option<Branch>> {
        let config = match self.store.get_github_config(&event.repository).await {
            Ok(config) => config,
            Err(BranchError::GitHubConfigNotFound(_)) => {
                debug!(repo = %event.repository, "no branching policy for repository, ignoring event");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match &event.action {
            PullRequestAction::Opened | PullRequestAction::Reopened => {
                if !config.auto_create_on_pr {
                    return Ok(None);
                }

                // webhook deliveries retry; an existing PR branch is reused
                if let Ok(existing) = self
                    .store
                    .get_branch_by_github_pr(&event.repository, event.number)
                    .await
                {
                    debug!(slug = %existing.slug, "branch for PR already exists");
                    return Ok(Some(existing));
                }

                let request = CreateBranchRequest {
                    name: event.title.clone(),
                    slug: Some(pr_slug(event.number)),
                    data_clone_mode: Some(config.default_clone_mode),
                    github_repo: Some(event.repository.clone()),
                    github_pr_number: Some(event.number),
                    github_pr_url: Some(event.url.clone()),
                    ..Default::default()
                };

                let branch = self.manager.create_branch(request, &event.author).await?;
                info!(repo = %event.repository, pr = event.number, slug = %branch.slug, "branch created for PR");
                Ok(Some(branch))
            }
            PullRequestAction::Closed { merged } => {
                if !merged || !config.auto_delete_on_merge {
                    return Ok(None);
                }

                let branch = match self
                    .store
                    .get_branch_by_github_pr(&event.repository, event.number)
                    .await
                {
                    Ok(branch) => branch,
                    Err(BranchError::BranchNotFound(_)) => return Ok(None),
                    Err(e) => return Err(e),
                };

                self.manager.delete_branch(branch.id, SYSTEM_ACTOR).await?;
                info!(repo = %event.repository, pr = event.number, "branch deleted for merged PR");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slug::validate_slug;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pr_slug_format() {
        assert_eq!(pr_slug(42), "pr-42");
        assert!(validate_slug(&pr_slug(42)).is_ok());
        assert!(validate_slug(&pr_slug(123456)).is_ok());
    }
}
