//! Metadata store
//!
//! Durable source of truth for branches, access grants, activity log,
//! migration history and per-repository GitHub policy. The trait is the seam
//! the lifecycle manager, router and scheduler work against; the production
//! implementation is [`postgres::PgMetadataStore`].

pub mod postgres;
pub mod schema;

use crate::error::BranchResult;
use crate::models::{
    AccessLevel, ActivityEntry, Branch, BranchAccess, BranchFilter, BranchStatus, GitHubConfig,
    MigrationRecord, NewActivity, NewBranch,
};
use async_trait::async_trait;
use uuid::Uuid;

pub use postgres::PgMetadataStore;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    // --- branches ---

    /// Insert a new branch row with status=creating. Slug uniqueness is
    /// enforced by the store's constraints; violations surface as database
    /// errors for the caller to classify.
    async fn create_branch(&self, branch: &NewBranch) -> BranchResult<Branch>;

    async fn get_branch(&self, id: Uuid) -> BranchResult<Branch>;

    async fn get_branch_by_slug(&self, slug: &str) -> BranchResult<Branch>;

    async fn get_branch_by_github_pr(&self, repo: &str, pr_number: i32) -> BranchResult<Branch>;

    async fn get_main_branch(&self) -> BranchResult<Branch>;

    async fn list_branches(&self, filter: &BranchFilter) -> BranchResult<Vec<Branch>>;

    /// Number of live branches (excludes deleted and deleting), used for the
    /// global quota.
    async fn count_branches(&self) -> BranchResult<i64>;

    /// Number of live branches created by one user, used for the per-user
    /// quota.
    async fn count_branches_by_user(&self, user_id: &str) -> BranchResult<i64>;

    /// Atomic status update; fails NotFound when no row was affected.
    async fn update_branch_status(
        &self,
        id: Uuid,
        status: BranchStatus,
        error_message: Option<&str>,
    ) -> BranchResult<()>;

    /// Soft delete. Guarded at the query level against the main branch.
    async fn delete_branch(&self, id: Uuid) -> BranchResult<()>;

    /// Non-deleted, non-main branches whose expires_at has passed.
    async fn get_expired_branches(&self) -> BranchResult<Vec<Branch>>;

    // --- activity log ---

    async fn log_activity(&self, entry: &NewActivity) -> BranchResult<()>;

    async fn get_activity_log(
        &self,
        branch_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> BranchResult<Vec<ActivityEntry>>;

    // --- migration history ---

    /// Insert-if-absent; re-recording the same version is a no-op.
    async fn record_migration(
        &self,
        branch_id: Uuid,
        version: &str,
        name: Option<&str>,
    ) -> BranchResult<()>;

    async fn get_migration_history(&self, branch_id: Uuid) -> BranchResult<Vec<MigrationRecord>>;

    // --- github config ---

    async fn upsert_github_config(&self, config: &GitHubConfig) -> BranchResult<GitHubConfig>;

    async fn get_github_config(&self, repository: &str) -> BranchResult<GitHubConfig>;

    async fn delete_github_config(&self, repository: &str) -> BranchResult<()>;

    // --- access control ---

    async fn grant_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
        level: AccessLevel,
        granted_by: &str,
    ) -> BranchResult<()>;

    async fn revoke_access(&self, branch_id: Uuid, user_id: &str) -> BranchResult<()>;

    async fn get_branch_access_list(&self, branch_id: Uuid) -> BranchResult<Vec<BranchAccess>>;

    /// Explicit grant level for a user, if any. Creator-implicit access is
    /// resolved by [`MetadataStore::has_access`], not here.
    async fn get_user_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
    ) -> BranchResult<Option<AccessLevel>>;

    /// Whether a user holds at least `minimum` access on a branch. The
    /// creator has implicit admin access without a grant row; everyone else
    /// needs an explicit grant of sufficient rank.
    async fn has_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
        minimum: AccessLevel,
    ) -> BranchResult<bool> {
        let branch = self.get_branch(branch_id).await?;
        if branch.created_by == user_id {
            return Ok(true);
        }
        let granted = self.get_user_access(branch_id, user_id).await?;
        Ok(granted.is_some_and(|level| level.rank() >= minimum.rank()))
    }

    /// Slug-addressed variant of [`MetadataStore::has_access`].
    async fn user_has_access(
        &self,
        slug: &str,
        user_id: &str,
        minimum: AccessLevel,
    ) -> BranchResult<bool> {
        let branch = self.get_branch_by_slug(slug).await?;
        self.has_access(branch.id, user_id, minimum).await
    }
}
