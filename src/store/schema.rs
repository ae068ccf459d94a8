//! Branching metadata schema
//!
//! DDL for the `branching` namespace in the main database, applied
//! idempotently at startup.

use crate::error::BranchResult;
use deadpool_postgres::Pool;
use tracing::info;

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS branching";

const CREATE_BRANCHES: &str = r#"
    CREATE TABLE IF NOT EXISTS branching.branches (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        slug TEXT NOT NULL,
        database_name TEXT NOT NULL,
        status TEXT NOT NULL,
        branch_type TEXT NOT NULL,
        parent_branch_id UUID REFERENCES branching.branches(id),
        data_clone_mode TEXT NOT NULL,
        github_repo TEXT,
        github_pr_number INTEGER,
        github_pr_url TEXT,
        error_message TEXT,
        seeds_path TEXT,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ
    )
"#;

/// Slug uniqueness only applies to live rows; soft-deleted branches keep
/// their slug for audit continuity.
const CREATE_SLUG_INDEX: &str = r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_branches_slug_active
    ON branching.branches (slug)
    WHERE status <> 'deleted'
"#;

const CREATE_EXPIRY_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_branches_expires_at
    ON branching.branches (expires_at)
    WHERE expires_at IS NOT NULL AND status <> 'deleted'
"#;

const CREATE_MIGRATION_HISTORY: &str = r#"
    CREATE TABLE IF NOT EXISTS branching.migration_history (
        id BIGSERIAL PRIMARY KEY,
        branch_id UUID NOT NULL REFERENCES branching.branches(id),
        migration_version TEXT NOT NULL,
        name TEXT,
        applied_at TIMESTAMPTZ NOT NULL,
        UNIQUE (branch_id, migration_version)
    )
"#;

const CREATE_ACTIVITY_LOG: &str = r#"
    CREATE TABLE IF NOT EXISTS branching.activity_log (
        id UUID PRIMARY KEY,
        branch_id UUID NOT NULL REFERENCES branching.branches(id),
        action TEXT NOT NULL,
        status TEXT NOT NULL,
        details JSONB,
        duration_ms BIGINT,
        created_at TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_ACTIVITY_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_activity_log_branch
    ON branching.activity_log (branch_id, created_at DESC)
"#;

const CREATE_GITHUB_CONFIG: &str = r#"
    CREATE TABLE IF NOT EXISTS branching.github_config (
        repository TEXT PRIMARY KEY,
        auto_create_on_pr BOOLEAN NOT NULL DEFAULT true,
        auto_delete_on_merge BOOLEAN NOT NULL DEFAULT true,
        default_clone_mode TEXT NOT NULL DEFAULT 'schema_only',
        webhook_secret TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
"#;

const CREATE_BRANCH_ACCESS: &str = r#"
    CREATE TABLE IF NOT EXISTS branching.branch_access (
        branch_id UUID NOT NULL REFERENCES branching.branches(id),
        user_id TEXT NOT NULL,
        access_level TEXT NOT NULL,
        granted_by TEXT NOT NULL,
        granted_at TIMESTAMPTZ NOT NULL,
        UNIQUE (branch_id, user_id)
    )
"#;

/// Create the branching schema and all metadata tables if they don't exist
pub async fn ensure_schema(pool: &Pool) -> BranchResult<()> {
    let client = pool.get().await?;

    client.execute(CREATE_SCHEMA, &[]).await?;
    client.execute(CREATE_BRANCHES, &[]).await?;
    client.execute(CREATE_SLUG_INDEX, &[]).await?;
    client.execute(CREATE_EXPIRY_INDEX, &[]).await?;
    client.execute(CREATE_MIGRATION_HISTORY, &[]).await?;
    client.execute(CREATE_ACTIVITY_LOG, &[]).await?;
    client.execute(CREATE_ACTIVITY_INDEX, &[]).await?;
    client.execute(CREATE_GITHUB_CONFIG, &[]).await?;
    client.execute(CREATE_BRANCH_ACCESS, &[]).await?;

    info!("Branching metadata schema initialized");
    Ok(())
}
