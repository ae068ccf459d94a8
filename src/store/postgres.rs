//! Postgres-backed metadata store
//!
//! All queries bind values as parameters, including dynamically composed
//! filters and pagination.

use crate::error::{BranchError, BranchResult};
use crate::models::{
    AccessLevel, ActivityEntry, ActivityStatus, Branch, BranchAccess, BranchFilter, BranchStatus,
    BranchType, DataCloneMode, GitHubConfig, MigrationRecord, NewActivity, NewBranch,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

const BRANCH_COLUMNS: &str = "id, name, slug, database_name, status, branch_type, \
     parent_branch_id, data_clone_mode, github_repo, github_pr_number, github_pr_url, \
     error_message, seeds_path, created_by, created_at, updated_at, expires_at";

pub struct PgMetadataStore {
    pool: Pool,
}

impl PgMetadataStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn branch_from_row(row: &Row) -> BranchResult<Branch> {
        let status: String = row.get(4);
        let branch_type: String = row.get(5);
        let clone_mode: String = row.get(7);

        Ok(Branch {
            id: row.get(0),
            name: row.get(1),
            slug: row.get(2),
            database_name: row.get(3),
            status: BranchStatus::parse(&status)
                .ok_or_else(|| BranchError::Internal(format!("unknown branch status '{}'", status)))?,
            branch_type: BranchType::parse(&branch_type).ok_or_else(|| {
                BranchError::Internal(format!("unknown branch type '{}'", branch_type))
            })?,
            parent_branch_id: row.get(6),
            data_clone_mode: DataCloneMode::parse(&clone_mode).ok_or_else(|| {
                BranchError::Internal(format!("unknown clone mode '{}'", clone_mode))
            })?,
            github_repo: row.get(8),
            github_pr_number: row.get(9),
            github_pr_url: row.get(10),
            error_message: row.get(11),
            seeds_path: row.get(12),
            created_by: row.get(13),
            created_at: row.get(14),
            updated_at: row.get(15),
            expires_at: row.get(16),
        })
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn create_branch(&self, branch: &NewBranch) -> BranchResult<Branch> {
        let client = self.pool.get().await?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO branching.branches \
                     (id, name, slug, database_name, status, branch_type, parent_branch_id, \
                      data_clone_mode, github_repo, github_pr_number, github_pr_url, \
                      seeds_path, created_by, created_at, updated_at, expires_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
                     RETURNING {}",
                    BRANCH_COLUMNS
                ),
                &[
                    &id,
                    &branch.name,
                    &branch.slug,
                    &branch.database_name,
                    &BranchStatus::Creating.as_str(),
                    &branch.branch_type.as_str(),
                    &branch.parent_branch_id,
                    &branch.data_clone_mode.as_str(),
                    &branch.github_repo,
                    &branch.github_pr_number,
                    &branch.github_pr_url,
                    &branch.seeds_path,
                    &branch.created_by,
                    &now,
                    &now,
                    &branch.expires_at,
                ],
            )
            .await?;

        debug!(slug = %branch.slug, "branch row inserted");
        Self::branch_from_row(&row)
    }

    async fn get_branch(&self, id: Uuid) -> BranchResult<Branch> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM branching.branches WHERE id = $1 AND status <> 'deleted'",
                    BRANCH_COLUMNS
                ),
                &[&id],
            )
            .await?;

        match row {
            Some(row) => Self::branch_from_row(&row),
            None => Err(BranchError::BranchNotFound(id.to_string())),
        }
    }

    async fn get_branch_by_slug(&self, slug: &str) -> BranchResult<Branch> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM branching.branches WHERE slug = $1 AND status <> 'deleted'",
                    BRANCH_COLUMNS
                ),
                &[&slug],
            )
            .await?;

        match row {
            Some(row) => Self::branch_from_row(&row),
            None => Err(BranchError::BranchNotFound(slug.to_string())),
        }
    }

    async fn get_branch_by_github_pr(&self, repo: &str, pr_number: i32) -> BranchResult<Branch> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM branching.branches \
                     WHERE github_repo = $1 AND github_pr_number = $2 AND status <> 'deleted'",
                    BRANCH_COLUMNS
                ),
                &[&repo, &pr_number],
            )
            .await?;

        match row {
            Some(row) => Self::branch_from_row(&row),
            None => Err(BranchError::BranchNotFound(format!("{}#{}", repo, pr_number))),
        }
    }

    async fn get_main_branch(&self) -> BranchResult<Branch> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM branching.branches \
                     WHERE branch_type = 'main' AND status <> 'deleted'",
                    BRANCH_COLUMNS
                ),
                &[],
            )
            .await?;

        match row {
            Some(row) => Self::branch_from_row(&row),
            None => Err(BranchError::BranchNotFound("main".to_string())),
        }
    }

    async fn list_branches(&self, filter: &BranchFilter) -> BranchResult<Vec<Branch>> {
        let client = self.pool.get().await?;

        // keep owned values alive for the duration of the query
        let status_text = filter.status.map(|s| s.as_str().to_string());
        let type_text = filter.branch_type.map(|t| t.as_str().to_string());
        let limit = filter.limit.unwrap_or(100);
        let offset = filter.offset.unwrap_or(0);

        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        match &status_text {
            Some(status) => {
                params.push(status);
                conditions.push(format!("status = ${}", params.len()));
            }
            // soft-deleted rows are invisible unless asked for explicitly
            None => conditions.push("status <> 'deleted'".to_string()),
        }
        if let Some(branch_type) = &type_text {
            params.push(branch_type);
            conditions.push(format!("branch_type = ${}", params.len()));
        }
        if let Some(created_by) = &filter.created_by {
            params.push(created_by);
            conditions.push(format!("created_by = ${}", params.len()));
        }
        if let Some(repo) = &filter.github_repo {
            params.push(repo);
            conditions.push(format!("github_repo = ${}", params.len()));
        }

        params.push(&limit);
        let limit_idx = params.len();
        params.push(&offset);
        let offset_idx = params.len();

        let query = format!(
            "SELECT {} FROM branching.branches WHERE {} \
             ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            BRANCH_COLUMNS,
            conditions.join(" AND "),
            limit_idx,
            offset_idx,
        );

        let rows = client.query(&query, &params).await?;
        rows.iter().map(Self::branch_from_row).collect()
    }

    async fn count_branches(&self) -> BranchResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM branching.branches \
                 WHERE status NOT IN ('deleted', 'deleting')",
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn count_branches_by_user(&self, user_id: &str) -> BranchResult<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM branching.branches \
                 WHERE created_by = $1 AND status NOT IN ('deleted', 'deleting')",
                &[&user_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn update_branch_status(
        &self,
        id: Uuid,
        status: BranchStatus,
        error_message: Option<&str>,
    ) -> BranchResult<()> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        let affected = client
            .execute(
                "UPDATE branching.branches \
                 SET status = $2, error_message = $3, updated_at = $4 \
                 WHERE id = $1 AND status <> 'deleted'",
                &[&id, &status.as_str(), &error_message, &now],
            )
            .await?;

        if affected == 0 {
            return Err(BranchError::BranchNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_branch(&self, id: Uuid) -> BranchResult<()> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        // main is rejected by the query itself, not just by callers
        let affected = client
            .execute(
                "UPDATE branching.branches \
                 SET status = 'deleted', updated_at = $2 \
                 WHERE id = $1 AND branch_type <> 'main' AND status <> 'deleted'",
                &[&id, &now],
            )
            .await?;

        if affected == 0 {
            return match self.get_branch(id).await {
                Ok(branch) if branch.is_main() => Err(BranchError::CannotDeleteMain),
                Ok(_) => Err(BranchError::Internal(format!(
                    "branch {} could not be deleted",
                    id
                ))),
                Err(e) => Err(e),
            };
        }
        Ok(())
    }

    async fn get_expired_branches(&self) -> BranchResult<Vec<Branch>> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM branching.branches \
                     WHERE expires_at IS NOT NULL AND expires_at < $1 \
                       AND status NOT IN ('deleted', 'deleting') \
                       AND branch_type <> 'main' \
                     ORDER BY expires_at",
                    BRANCH_COLUMNS
                ),
                &[&now],
            )
            .await?;
        rows.iter().map(Self::branch_from_row).collect()
    }

    async fn log_activity(&self, entry: &NewActivity) -> BranchResult<()> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        client
            .execute(
                "INSERT INTO branching.activity_log \
                 (id, branch_id, action, status, details, duration_ms, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &Uuid::new_v4(),
                    &entry.branch_id,
                    &entry.action,
                    &entry.status.as_str(),
                    &entry.details,
                    &entry.duration_ms,
                    &now,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_activity_log(
        &self,
        branch_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> BranchResult<Vec<ActivityEntry>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, branch_id, action, status, details, duration_ms, created_at \
                 FROM branching.activity_log \
                 WHERE branch_id = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                &[&branch_id, &limit, &offset],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get(3);
                Ok(ActivityEntry {
                    id: row.get(0),
                    branch_id: row.get(1),
                    action: row.get(2),
                    status: ActivityStatus::parse(&status).ok_or_else(|| {
                        BranchError::Internal(format!("unknown activity status '{}'", status))
                    })?,
                    details: row.get(4),
                    duration_ms: row.get(5),
                    created_at: row.get(6),
                })
            })
            .collect()
    }

    async fn record_migration(
        &self,
        branch_id: Uuid,
        version: &str,
        name: Option<&str>,
    ) -> BranchResult<()> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        client
            .execute(
                "INSERT INTO branching.migration_history \
                 (branch_id, migration_version, name, applied_at) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (branch_id, migration_version) DO NOTHING",
                &[&branch_id, &version, &name, &now],
            )
            .await?;
        Ok(())
    }

    async fn get_migration_history(&self, branch_id: Uuid) -> BranchResult<Vec<MigrationRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, branch_id, migration_version, name, applied_at \
                 FROM branching.migration_history \
                 WHERE branch_id = $1 \
                 ORDER BY migration_version",
                &[&branch_id],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| MigrationRecord {
                id: row.get(0),
                branch_id: row.get(1),
                migration_version: row.get(2),
                name: row.get(3),
                applied_at: row.get(4),
            })
            .collect())
    }

    async fn upsert_github_config(&self, config: &GitHubConfig) -> BranchResult<GitHubConfig> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        let row = client
            .query_one(
                "INSERT INTO branching.github_config \
                 (repository, auto_create_on_pr, auto_delete_on_merge, default_clone_mode, \
                  webhook_secret, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $6) \
                 ON CONFLICT (repository) DO UPDATE SET \
                   auto_create_on_pr = EXCLUDED.auto_create_on_pr, \
                   auto_delete_on_merge = EXCLUDED.auto_delete_on_merge, \
                   default_clone_mode = EXCLUDED.default_clone_mode, \
                   webhook_secret = EXCLUDED.webhook_secret, \
                   updated_at = EXCLUDED.updated_at \
                 RETURNING repository, auto_create_on_pr, auto_delete_on_merge, \
                   default_clone_mode, webhook_secret, created_at, updated_at",
                &[
                    &config.repository,
                    &config.auto_create_on_pr,
                    &config.auto_delete_on_merge,
                    &config.default_clone_mode.as_str(),
                    &config.webhook_secret,
                    &now,
                ],
            )
            .await?;

        let clone_mode: String = row.get(3);
        Ok(GitHubConfig {
            repository: row.get(0),
            auto_create_on_pr: row.get(1),
            auto_delete_on_merge: row.get(2),
            default_clone_mode: DataCloneMode::parse(&clone_mode).ok_or_else(|| {
                BranchError::Internal(format!("unknown clone mode '{}'", clone_mode))
            })?,
            webhook_secret: row.get(4),
            created_at: row.get(5),
            updated_at: row.get(6),
        })
    }

    async fn get_github_config(&self, repository: &str) -> BranchResult<GitHubConfig> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT repository, auto_create_on_pr, auto_delete_on_merge, \
                   default_clone_mode, webhook_secret, created_at, updated_at \
                 FROM branching.github_config WHERE repository = $1",
                &[&repository],
            )
            .await?;

        let row = row.ok_or_else(|| BranchError::GitHubConfigNotFound(repository.to_string()))?;
        let clone_mode: String = row.get(3);
        Ok(GitHubConfig {
            repository: row.get(0),
            auto_create_on_pr: row.get(1),
            auto_delete_on_merge: row.get(2),
            default_clone_mode: DataCloneMode::parse(&clone_mode).ok_or_else(|| {
                BranchError::Internal(format!("unknown clone mode '{}'", clone_mode))
            })?,
            webhook_secret: row.get(4),
            created_at: row.get(5),
            updated_at: row.get(6),
        })
    }

    async fn delete_github_config(&self, repository: &str) -> BranchResult<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "DELETE FROM branching.github_config WHERE repository = $1",
                &[&repository],
            )
            .await?;
        if affected == 0 {
            return Err(BranchError::GitHubConfigNotFound(repository.to_string()));
        }
        Ok(())
    }

    async fn grant_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
        level: AccessLevel,
        granted_by: &str,
    ) -> BranchResult<()> {
        let client = self.pool.get().await?;
        let now = Utc::now();
        client
            .execute(
                "INSERT INTO branching.branch_access \
                 (branch_id, user_id, access_level, granted_by, granted_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (branch_id, user_id) DO UPDATE SET \
                   access_level = EXCLUDED.access_level, \
                   granted_by = EXCLUDED.granted_by, \
                   granted_at = EXCLUDED.granted_at",
                &[&branch_id, &user_id, &level.as_str(), &granted_by, &now],
            )
            .await?;
        Ok(())
    }

    async fn revoke_access(&self, branch_id: Uuid, user_id: &str) -> BranchResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM branching.branch_access WHERE branch_id = $1 AND user_id = $2",
                &[&branch_id, &user_id],
            )
            .await?;
        Ok(())
    }

    async fn get_branch_access_list(&self, branch_id: Uuid) -> BranchResult<Vec<BranchAccess>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT branch_id, user_id, access_level, granted_by, granted_at \
                 FROM branching.branch_access \
                 WHERE branch_id = $1 \
                 ORDER BY granted_at",
                &[&branch_id],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let level: String = row.get(2);
                Ok(BranchAccess {
                    branch_id: row.get(0),
                    user_id: row.get(1),
                    access_level: AccessLevel::parse(&level).ok_or_else(|| {
                        BranchError::Internal(format!("unknown access level '{}'", level))
                    })?,
                    granted_by: row.get(3),
                    granted_at: row.get(4),
                })
            })
            .collect()
    }

    async fn get_user_access(
        &self,
        branch_id: Uuid,
        user_id: &str,
    ) -> BranchResult<Option<AccessLevel>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT access_level FROM branching.branch_access \
                 WHERE branch_id = $1 AND user_id = $2",
                &[&branch_id, &user_id],
            )
            .await?;

        match row {
            Some(row) => {
                let level: String = row.get(0);
                Ok(Some(AccessLevel::parse(&level).ok_or_else(|| {
                    BranchError::Internal(format!("unknown access level '{}'", level))
                })?))
            }
            None => Ok(None),
        }
    }
}
