//! Physical database provisioning
//!
//! The lifecycle manager drives branches through this minimal contract;
//! the Postgres implementation uses template-based database creation on the
//! admin pool. CREATE/DROP DATABASE cannot take bind parameters, so names go
//! through identifier quoting instead.

use crate::error::{BranchError, BranchResult};
use crate::models::DataCloneMode;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::{info, warn};

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the physical database for a branch. `source_name` is the
    /// database of the parent branch.
    async fn create_database(
        &self,
        name: &str,
        clone_mode: DataCloneMode,
        source_name: &str,
    ) -> BranchResult<()>;

    /// Drop a branch's physical database. Dropping a database that no longer
    /// exists is not an error.
    async fn drop_database(&self, name: &str) -> BranchResult<()>;
}

/// Quote a Postgres identifier (database name) safely
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Template-based provisioner backed by an admin connection pool.
///
/// full_clone templates the live source database; schema_only and seed_data
/// template a schema-only template database maintained out of band. Postgres
/// refuses to template a database with active backends, so sessions on the
/// template are terminated first.
pub struct PostgresProvisioner {
    admin_pool: Pool,
    /// Schema-only template used for schema_only/seed_data creation
    template_database: String,
}

impl PostgresProvisioner {
    pub fn new(admin_pool: Pool, template_database: String) -> Self {
        Self {
            admin_pool,
            template_database,
        }
    }

    async fn terminate_backends(&self, database: &str) -> BranchResult<()> {
        let client = self.admin_pool.get().await?;
        client
            .execute(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = $1 AND pid <> pg_backend_pid()",
                &[&database],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Provisioner for PostgresProvisioner {
    async fn create_database(
        &self,
        name: &str,
        clone_mode: DataCloneMode,
        source_name: &str,
    ) -> BranchResult<()> {
        let template = match clone_mode {
            DataCloneMode::FullClone => source_name,
            DataCloneMode::SchemaOnly | DataCloneMode::SeedData => &self.template_database,
        };

        self.terminate_backends(template).await?;

        let client = self.admin_pool.get().await?;
        let query = format!(
            "CREATE DATABASE {} TEMPLATE {}",
            quote_ident(name),
            quote_ident(template)
        );
        client
            .execute(&query, &[])
            .await
            .map_err(|e| BranchError::Provision(format!("CREATE DATABASE {} failed: {}", name, e)))?;

        info!(database = %name, template = %template, mode = %clone_mode.as_str(), "database created");
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> BranchResult<()> {
        // kill stragglers so the drop doesn't fail on lingering sessions
        if let Err(e) = self.terminate_backends(name).await {
            warn!(database = %name, error = %e, "failed to terminate backends before drop");
        }

        let client = self.admin_pool.get().await?;
        let query = format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name));
        client
            .execute(&query, &[])
            .await
            .map_err(|e| BranchError::Provision(format!("DROP DATABASE {} failed: {}", name, e)))?;

        info!(database = %name, "database dropped");
        Ok(())
    }
}
