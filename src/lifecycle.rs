//! Branch lifecycle orchestration
//!
//! Sole authority for major status transitions. Drives the provisioner, the
//! metadata store, the seed executor and the router through the branch state
//! machine, bracketing each major step with activity-log entries.

use crate::config::BranchingConfig;
use crate::error::{BranchError, BranchResult};
use crate::models::{
    AccessLevel, Branch, BranchStatus, BranchType, CreateBranchRequest, DataCloneMode, NewActivity,
    NewBranch,
};
use crate::provision::Provisioner;
use crate::router::BranchRouter;
use crate::seeder::SeedExecutor;
use crate::slug::{generate_database_name, generate_slug, validate_slug};
use crate::store::MetadataStore;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Reserved actor for scheduler-driven operations; bypasses access checks
pub const SYSTEM_ACTOR: &str = "system";

/// Applies migration SQL to a branch database in a single transaction
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    async fn apply(&self, pool: &Pool, sql: &str) -> BranchResult<()>;
}

pub struct PgMigrationRunner;

#[async_trait]
impl MigrationRunner for PgMigrationRunner {
    async fn apply(&self, pool: &Pool, sql: &str) -> BranchResult<()> {
        let mut client = pool.get().await?;
        let tx = client.transaction().await?;
        tx.batch_execute(sql).await?;
        tx.commit().await?;
        Ok(())
    }
}

pub struct BranchManager {
    store: Arc<dyn MetadataStore>,
    provisioner: Arc<dyn Provisioner>,
    router: Arc<BranchRouter>,
    config: BranchingConfig,
    migrations: Arc<dyn MigrationRunner>,
}

impl BranchManager {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        provisioner: Arc<dyn Provisioner>,
        router: Arc<BranchRouter>,
        config: BranchingConfig,
    ) -> Self {
        Self {
            store,
            provisioner,
            router,
            config,
            migrations: Arc::new(PgMigrationRunner),
        }
    }

    pub fn with_migration_runner(mut self, runner: Arc<dyn MigrationRunner>) -> Self {
        self.migrations = runner;
        self
    }

    /// Create a branch end to end: metadata row, physical database, optional
    /// seeds, then status=ready.
    ///
    /// Failures after provisioning has started leave the branch row in
    /// status=error with a message; the physical database is retained for
    /// inspection and later reclamation rather than rolled back.
    pub async fn create_branch(
        &self,
        request: CreateBranchRequest,
        requested_by: &str,
    ) -> BranchResult<Branch> {
        if !self.config.enabled {
            return Err(BranchError::BranchingDisabled);
        }

        let branch_type = request.branch_type.unwrap_or(BranchType::Preview);
        if branch_type == BranchType::Main {
            return Err(BranchError::InvalidSlug(
                "the main branch cannot be created through the branching API".to_string(),
            ));
        }

        let slug = match &request.slug {
            Some(slug) => slug.clone(),
            None => generate_slug(&request.name),
        };
        validate_slug(&slug)?;

        // quotas are enforced before any infrastructure is touched
        let total = self.store.count_branches().await?;
        if total >= self.config.max_branches as i64 {
            return Err(BranchError::MaxBranchesReached(self.config.max_branches));
        }
        let by_user = self.store.count_branches_by_user(requested_by).await?;
        if by_user >= self.config.max_branches_per_user as i64 {
            return Err(BranchError::MaxUserBranchesReached(
                self.config.max_branches_per_user,
            ));
        }

        let parent = match &request.parent_slug {
            Some(parent_slug) => self.store.get_branch_by_slug(parent_slug).await?,
            None => self.store.get_main_branch().await?,
        };

        let clone_mode = request.data_clone_mode.unwrap_or(DataCloneMode::SchemaOnly);
        let expires_at = match branch_type {
            BranchType::Preview => {
                let ttl = request.ttl_hours.unwrap_or(self.config.default_ttl_hours);
                Some(Utc::now() + Duration::hours(ttl))
            }
            BranchType::Persistent => request.ttl_hours.map(|h| Utc::now() + Duration::hours(h)),
            BranchType::Main => None,
        };

        let new_branch = NewBranch {
            name: request.name.clone(),
            slug: slug.clone(),
            database_name: generate_database_name(&slug),
            branch_type,
            parent_branch_id: Some(parent.id),
            data_clone_mode: clone_mode,
            github_repo: request.github_repo.clone(),
            github_pr_number: request.github_pr_number,
            github_pr_url: request.github_pr_url.clone(),
            seeds_path: request.seeds_path.clone(),
            created_by: requested_by.to_string(),
            expires_at,
        };

        // slug conflicts surface here, before any physical database exists
        let branch = match self.store.create_branch(&new_branch).await {
            Ok(branch) => branch,
            Err(e) if e.is_unique_violation() => {
                return Err(BranchError::DuplicateSlug(slug));
            }
            Err(e) => return Err(e),
        };

        let start = Instant::now();
        self.log(NewActivity::started(branch.id, "create_branch")).await;

        if let Err(e) = self
            .provisioner
            .create_database(&branch.database_name, clone_mode, &parent.database_name)
            .await
        {
            return Err(self.fail_branch(&branch, "create_branch", e, start).await);
        }

        if let Some(seeds_dir) = self.seeds_dir_for(&branch) {
            if let Err(e) = self.run_seeds(&branch, seeds_dir).await {
                return Err(self.fail_branch(&branch, "create_branch", e, start).await);
            }
        }

        self.store
            .update_branch_status(branch.id, BranchStatus::Ready, None)
            .await?;
        self.log(NewActivity::success(
            branch.id,
            "create_branch",
            elapsed_ms(start),
        ))
        .await;

        // best-effort: a warm pool saves the first caller the connection cost
        if self.router.warmup_pool(&slug).await.is_err() {
            warn!(slug = %slug, "branch ready but pool warmup failed");
        }

        info!(slug = %slug, database = %branch.database_name, "branch created");
        self.store.get_branch(branch.id).await
    }

    /// Delete a branch: status=deleting guard, pool teardown, physical drop,
    /// then soft delete. The main branch is always rejected.
    pub async fn delete_branch(&self, id: Uuid, requested_by: &str) -> BranchResult<()> {
        let branch = self.store.get_branch(id).await?;
        if branch.is_main() {
            return Err(BranchError::CannotDeleteMain);
        }

        if requested_by != SYSTEM_ACTOR
            && !self
                .store
                .has_access(branch.id, requested_by, AccessLevel::Admin)
                .await?
        {
            return Err(BranchError::AccessDenied(format!(
                "user '{}' lacks admin access on branch '{}'",
                requested_by, branch.slug
            )));
        }

        // the transition table rejects concurrent duplicate deletion
        // (deleting -> deleting) and deletion of half-created branches
        if !branch.status.can_transition_to(BranchStatus::Deleting) {
            return Err(BranchError::InvalidTransition(
                branch.status.as_str().to_string(),
                BranchStatus::Deleting.as_str().to_string(),
            ));
        }
        self.store
            .update_branch_status(id, BranchStatus::Deleting, None)
            .await?;

        let start = Instant::now();
        self.log(NewActivity::started(id, "delete_branch")).await;

        self.router.close_pool(&branch.slug).await;

        if let Err(e) = self.provisioner.drop_database(&branch.database_name).await {
            // keep the branch visible for retry instead of losing it
            return Err(self.fail_branch(&branch, "delete_branch", e, start).await);
        }

        self.store.delete_branch(id).await?;
        self.log(NewActivity::success(id, "delete_branch", elapsed_ms(start)))
            .await;

        info!(slug = %branch.slug, "branch deleted");
        Ok(())
    }

    /// Apply one migration to a ready branch, record it, and refresh the
    /// branch's pool so new connections see the updated schema.
    pub async fn migrate_branch(
        &self,
        id: Uuid,
        version: &str,
        name: Option<&str>,
        sql: &str,
    ) -> BranchResult<()> {
        let branch = self.store.get_branch(id).await?;
        if branch.status != BranchStatus::Ready {
            return Err(BranchError::BranchNotReady(
                branch.slug.clone(),
                branch.status.as_str().to_string(),
            ));
        }

        // grab the pool while the branch is still ready
        let pool = self.router.get_pool(&branch.slug).await?;

        self.store
            .update_branch_status(id, BranchStatus::Migrating, None)
            .await?;
        let start = Instant::now();
        self.log(NewActivity::started(id, "migrate_branch")).await;

        if let Err(e) = self.migrations.apply(&pool, sql).await {
            return Err(self.fail_branch(&branch, "migrate_branch", e, start).await);
        }

        // every failure from here on must still land the branch in a
        // diagnosable state, never leave it stuck in migrating
        if let Err(e) = self.store.record_migration(id, version, name).await {
            return Err(self.fail_branch(&branch, "migrate_branch", e, start).await);
        }

        if let Err(e) = self.router.refresh_pool(&branch.slug).await {
            warn!(slug = %branch.slug, error = %e, "pool refresh after migration failed");
        }

        if let Err(e) = self
            .store
            .update_branch_status(id, BranchStatus::Ready, None)
            .await
        {
            return Err(self.fail_branch(&branch, "migrate_branch", e, start).await);
        }
        self.log(NewActivity::success(id, "migrate_branch", elapsed_ms(start)))
            .await;

        info!(slug = %branch.slug, version, "branch migrated");
        Ok(())
    }

    fn seeds_dir_for(&self, branch: &Branch) -> Option<PathBuf> {
        if let Some(path) = &branch.seeds_path {
            return Some(PathBuf::from(path));
        }
        if branch.data_clone_mode == DataCloneMode::SeedData {
            if self.config.seeds_dir.is_none() {
                warn!(slug = %branch.slug, "seed_data clone mode but no seeds directory configured");
            }
            return self.config.seeds_dir.clone();
        }
        None
    }

    async fn run_seeds(&self, branch: &Branch, seeds_dir: PathBuf) -> BranchResult<()> {
        // the branch is not ready yet, so the router cache cannot be used
        let pool = self.router.open_direct(&branch.database_name).await?;
        let executor = SeedExecutor::new(seeds_dir);
        let result = executor.execute_seeds(&pool, branch.id).await;
        pool.close();
        result.map(|_| ())
    }

    /// Record a step failure: mark the branch status=error with the message,
    /// write the failed activity entry, and hand back the original error.
    async fn fail_branch(
        &self,
        branch: &Branch,
        action: &str,
        error: BranchError,
        start: Instant,
    ) -> BranchError {
        let message = error.to_string();
        if let Err(e) = self
            .store
            .update_branch_status(branch.id, BranchStatus::Error, Some(&message))
            .await
        {
            warn!(slug = %branch.slug, error = %e, "failed to record error status");
        }
        self.log(NewActivity::failed(
            branch.id,
            action,
            &message,
            elapsed_ms(start),
        ))
        .await;
        error
    }

    /// Activity logging never masks the outcome of the step it brackets
    async fn log(&self, entry: NewActivity) {
        if let Err(e) = self.store.log_activity(&entry).await {
            warn!(branch_id = %entry.branch_id, action = %entry.action, error = %e, "activity log write failed");
        }
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}
