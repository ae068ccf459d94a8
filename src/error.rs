//! Error handling module
//!
//! Provides the unified error type shared by every branching component.

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Application-wide error type for the branching service
#[derive(Error, Debug)]
pub enum BranchError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Failed to create pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("GitHub config not found for repository: {0}")]
    GitHubConfigNotFound(String),

    #[error("Branch slug already in use: {0}")]
    DuplicateSlug(String),

    #[error("The main branch cannot be deleted")]
    CannotDeleteMain,

    #[error("Branch '{0}' is not ready (status: {1})")]
    BranchNotReady(String, String),

    #[error("Database branching is disabled")]
    BranchingDisabled,

    #[error("Maximum number of branches ({0}) reached")]
    MaxBranchesReached(usize),

    #[error("Maximum number of branches per user ({0}) reached")]
    MaxUserBranchesReached(usize),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid slug: {0}")]
    InvalidSlug(String),

    #[error("Invalid status transition: {0} -> {1}")]
    InvalidTransition(String, String),

    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("Seed execution failed in {file}: {message}")]
    Seed { file: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BranchError {
    /// Whether the underlying cause is a Postgres unique-constraint violation.
    ///
    /// The store propagates driver errors untouched; callers that race on
    /// unique columns (branch slug, seed log keys) use this to map the
    /// violation onto their own conflict error.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            BranchError::Database(e) => e.code() == Some(&SqlState::UNIQUE_VIOLATION),
            _ => false,
        }
    }

    /// Whether this error is one of the Not-Found sentinels.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BranchError::BranchNotFound(_) | BranchError::GitHubConfigNotFound(_)
        )
    }
}

/// Result type alias used throughout the crate
pub type BranchResult<T> = Result<T, BranchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_sentinels() {
        assert!(BranchError::BranchNotFound("x".into()).is_not_found());
        assert!(BranchError::GitHubConfigNotFound("o/r".into()).is_not_found());
        assert!(!BranchError::CannotDeleteMain.is_not_found());
    }

    #[test]
    fn test_unique_violation_only_matches_database_errors() {
        assert!(!BranchError::DuplicateSlug("a".into()).is_unique_violation());
        assert!(!BranchError::Internal("dup".into()).is_unique_violation());
    }
}
