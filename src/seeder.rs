//! Seed execution
//!
//! Applies a directory of *.sql files to a branch database, each at most
//! once, in lexicographic filename order (numeric prefixes enforce ordering).
//! The execution log lives in the branch database itself so a seed's content
//! and its success row commit in one transaction.

use crate::error::{BranchError, BranchResult};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CREATE_SEED_LOG: &str = r#"
    CREATE TABLE IF NOT EXISTS branching.seed_execution_log (
        id BIGSERIAL PRIMARY KEY,
        branch_id UUID NOT NULL,
        seed_file TEXT NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        duration_ms BIGINT,
        executed_at TIMESTAMPTZ NOT NULL,
        UNIQUE (branch_id, seed_file)
    )
"#;

const UPSERT_SEED_LOG: &str = r#"
    INSERT INTO branching.seed_execution_log
        (branch_id, seed_file, status, error_message, duration_ms, executed_at)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (branch_id, seed_file) DO UPDATE SET
        status = EXCLUDED.status,
        error_message = EXCLUDED.error_message,
        duration_ms = EXCLUDED.duration_ms,
        executed_at = EXCLUDED.executed_at
"#;

/// Per-file execution and idempotency bookkeeping against one branch
/// database. The executor drives file discovery and ordering; the runner
/// owns the SQL side.
#[async_trait]
pub trait SeedRunner: Send + Sync {
    /// Create the execution log table in the branch database if missing
    async fn prepare(&self, pool: &Pool) -> BranchResult<()>;

    /// Filenames already marked successful for this branch
    async fn completed(&self, pool: &Pool, branch_id: Uuid) -> BranchResult<HashSet<String>>;

    /// Apply one seed file and record the outcome
    async fn apply(
        &self,
        pool: &Pool,
        branch_id: Uuid,
        file_name: &str,
        sql: &str,
    ) -> BranchResult<()>;
}

pub struct PgSeedRunner;

#[async_trait]
impl SeedRunner for PgSeedRunner {
    async fn prepare(&self, pool: &Pool) -> BranchResult<()> {
        let client = pool.get().await?;
        client
            .execute("CREATE SCHEMA IF NOT EXISTS branching", &[])
            .await?;
        client.execute(CREATE_SEED_LOG, &[]).await?;
        Ok(())
    }

    async fn completed(&self, pool: &Pool, branch_id: Uuid) -> BranchResult<HashSet<String>> {
        let client = pool.get().await?;
        let rows = client
            .query(
                "SELECT seed_file FROM branching.seed_execution_log \
                 WHERE branch_id = $1 AND status = 'success'",
                &[&branch_id],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// Run one seed file inside a transaction. The started and success rows
    /// commit together with the seed's content effects; on failure the
    /// transaction rolls back and only a failed row is written.
    async fn apply(
        &self,
        pool: &Pool,
        branch_id: Uuid,
        file_name: &str,
        sql: &str,
    ) -> BranchResult<()> {
        let start = Instant::now();
        let mut client = pool.get().await?;
        let tx = client.transaction().await?;

        tx.execute(
            UPSERT_SEED_LOG,
            &[
                &branch_id,
                &file_name,
                &"started",
                &None::<String>,
                &None::<i64>,
                &Utc::now(),
            ],
        )
        .await?;

        let result = tx.batch_execute(sql).await;
        let duration_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(()) => {
                tx.execute(
                    UPSERT_SEED_LOG,
                    &[
                        &branch_id,
                        &file_name,
                        &"success",
                        &None::<String>,
                        &Some(duration_ms),
                        &Utc::now(),
                    ],
                )
                .await?;
                tx.commit().await?;
                debug!(file = %file_name, duration_ms, "seed applied");
                Ok(())
            }
            Err(e) => {
                // roll back the content effects, then record the failure
                drop(tx);
                let message = e.to_string();
                client
                    .execute(
                        UPSERT_SEED_LOG,
                        &[
                            &branch_id,
                            &file_name,
                            &"failed",
                            &Some(message.clone()),
                            &Some(duration_ms),
                            &Utc::now(),
                        ],
                    )
                    .await?;
                Err(BranchError::Seed {
                    file: file_name.to_string(),
                    message,
                })
            }
        }
    }
}

pub struct SeedExecutor {
    seeds_dir: PathBuf,
    runner: Arc<dyn SeedRunner>,
}

impl SeedExecutor {
    pub fn new(seeds_dir: impl Into<PathBuf>) -> Self {
        Self::with_runner(seeds_dir, Arc::new(PgSeedRunner))
    }

    pub fn with_runner(seeds_dir: impl Into<PathBuf>, runner: Arc<dyn SeedRunner>) -> Self {
        Self {
            seeds_dir: seeds_dir.into(),
            runner,
        }
    }

    /// List *.sql files in the seeds directory, sorted by filename. A
    /// missing directory is not an error.
    pub fn discover_seed_files(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.seeds_dir) {
            Ok(entries) => entries,
            Err(_) => {
                warn!(dir = %self.seeds_dir.display(), "seeds directory missing, nothing to apply");
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("sql")
            })
            .collect();

        files.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));
        files
    }

    /// Files not yet marked successful for this branch, in execution order
    pub fn pending_files(discovered: Vec<PathBuf>, completed: &HashSet<String>) -> Vec<PathBuf> {
        discovered
            .into_iter()
            .filter(|path| {
                file_name(path)
                    .map(|name| !completed.contains(name))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Apply every undone seed file to the branch database, in order.
    ///
    /// Returns the number of files executed. The first SQL failure aborts the
    /// remainder of this invocation; the failed file was never marked
    /// successful, so it stays eligible for retry on the next call.
    pub async fn execute_seeds(&self, pool: &Pool, branch_id: Uuid) -> BranchResult<usize> {
        self.runner.prepare(pool).await?;

        let discovered = self.discover_seed_files();
        if discovered.is_empty() {
            debug!(branch_id = %branch_id, "no seed files to apply");
            return Ok(0);
        }

        let completed = self.runner.completed(pool, branch_id).await?;
        let pending = Self::pending_files(discovered, &completed);

        let mut executed = 0usize;
        for path in pending {
            let Some(name) = file_name(&path) else {
                continue;
            };
            let sql = match std::fs::read_to_string(&path) {
                Ok(sql) => sql,
                Err(e) => {
                    // intentional swallow: an unreadable file is skipped, not fatal
                    warn!(file = %path.display(), error = %e, "skipping unreadable seed file");
                    continue;
                }
            };
            self.runner.apply(pool, branch_id, name, &sql).await?;
            executed += 1;
        }

        if executed > 0 {
            info!(branch_id = %branch_id, executed, "seed files applied");
        }
        Ok(executed)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
