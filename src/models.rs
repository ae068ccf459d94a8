//! Core data models for the branching subsystem
//!
//! Every enum that is persisted maps to lowercase text in the store; the
//! `as_str`/`parse` pairs below are the single mapping point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Branch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Creating,
    Ready,
    Migrating,
    Deleting,
    Deleted,
    Error,
}

impl BranchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchStatus::Creating => "creating",
            BranchStatus::Ready => "ready",
            BranchStatus::Migrating => "migrating",
            BranchStatus::Deleting => "deleting",
            BranchStatus::Deleted => "deleted",
            BranchStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(BranchStatus::Creating),
            "ready" => Some(BranchStatus::Ready),
            "migrating" => Some(BranchStatus::Migrating),
            "deleting" => Some(BranchStatus::Deleting),
            "deleted" => Some(BranchStatus::Deleted),
            "error" => Some(BranchStatus::Error),
            _ => None,
        }
    }

    /// The explicit transition table. Transitions are monotonic: once a
    /// branch is deleted it never leaves that state.
    pub fn can_transition_to(&self, next: BranchStatus) -> bool {
        use BranchStatus::*;
        matches!(
            (self, next),
            (Creating, Ready)
                | (Creating, Error)
                | (Ready, Migrating)
                | (Migrating, Ready)
                | (Migrating, Error)
                | (Ready, Deleting)
                | (Error, Deleting)
                | (Deleting, Deleted)
                | (Deleting, Error)
        )
    }
}

/// Branch kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Main,
    Preview,
    Persistent,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Main => "main",
            BranchType::Preview => "preview",
            BranchType::Persistent => "persistent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(BranchType::Main),
            "preview" => Some(BranchType::Preview),
            "persistent" => Some(BranchType::Persistent),
            _ => None,
        }
    }
}

/// How much of the parent database is copied at branch creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCloneMode {
    SchemaOnly,
    FullClone,
    SeedData,
}

impl DataCloneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataCloneMode::SchemaOnly => "schema_only",
            DataCloneMode::FullClone => "full_clone",
            DataCloneMode::SeedData => "seed_data",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schema_only" => Some(DataCloneMode::SchemaOnly),
            "full_clone" => Some(DataCloneMode::FullClone),
            "seed_data" => Some(DataCloneMode::SeedData),
            _ => None,
        }
    }
}

/// Per-user access level on a branch, ordered read < write < admin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(AccessLevel::Read),
            "write" => Some(AccessLevel::Write),
            "admin" => Some(AccessLevel::Admin),
            _ => None,
        }
    }

    /// Ordinal rank used for minimum-level comparisons
    pub fn rank(&self) -> u8 {
        match self {
            AccessLevel::Read => 1,
            AccessLevel::Write => 2,
            AccessLevel::Admin => 3,
        }
    }
}

/// A database branch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub database_name: String,
    pub status: BranchStatus,
    pub branch_type: BranchType,
    pub parent_branch_id: Option<Uuid>,
    pub data_clone_mode: DataCloneMode,
    pub github_repo: Option<String>,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub error_message: Option<String>,
    pub seeds_path: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// None means the branch never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl Branch {
    pub fn is_main(&self) -> bool {
        self.branch_type == BranchType::Main
    }
}

/// Insert payload for a new branch row
#[derive(Debug, Clone)]
pub struct NewBranch {
    pub name: String,
    pub slug: String,
    pub database_name: String,
    pub branch_type: BranchType,
    pub parent_branch_id: Option<Uuid>,
    pub data_clone_mode: DataCloneMode,
    pub github_repo: Option<String>,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub seeds_path: Option<String>,
    pub created_by: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to create a branch (API-shaped, consumed by the lifecycle manager)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateBranchRequest {
    pub name: String,
    /// Explicit slug; generated from the name when absent
    pub slug: Option<String>,
    pub branch_type: Option<BranchType>,
    /// Parent branch slug; main when absent
    pub parent_slug: Option<String>,
    pub data_clone_mode: Option<DataCloneMode>,
    pub github_repo: Option<String>,
    pub github_pr_number: Option<i32>,
    pub github_pr_url: Option<String>,
    pub seeds_path: Option<String>,
    /// Lifetime in hours; falls back to the configured default for preview
    /// branches. Persistent and main branches never expire.
    pub ttl_hours: Option<i64>,
}

/// Filter for listing/counting branches. All values optional; pagination is
/// always bound as parameters, never interpolated.
#[derive(Debug, Clone, Default)]
pub struct BranchFilter {
    pub status: Option<BranchStatus>,
    pub branch_type: Option<BranchType>,
    pub created_by: Option<String>,
    pub github_repo: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Activity log entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Started,
    Success,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Started => "started",
            ActivityStatus::Success => "success",
            ActivityStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(ActivityStatus::Started),
            "success" => Some(ActivityStatus::Success),
            "failed" => Some(ActivityStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only audit entry for branch lifecycle steps
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub action: String,
    pub status: ActivityStatus,
    pub details: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for an activity entry
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub branch_id: Uuid,
    pub action: String,
    pub status: ActivityStatus,
    pub details: Option<serde_json::Value>,
    pub duration_ms: Option<i64>,
}

impl NewActivity {
    pub fn started(branch_id: Uuid, action: &str) -> Self {
        Self {
            branch_id,
            action: action.to_string(),
            status: ActivityStatus::Started,
            details: None,
            duration_ms: None,
        }
    }

    pub fn success(branch_id: Uuid, action: &str, duration_ms: i64) -> Self {
        Self {
            branch_id,
            action: action.to_string(),
            status: ActivityStatus::Success,
            details: None,
            duration_ms: Some(duration_ms),
        }
    }

    pub fn failed(branch_id: Uuid, action: &str, error: &str, duration_ms: i64) -> Self {
        Self {
            branch_id,
            action: action.to_string(),
            status: ActivityStatus::Failed,
            details: Some(serde_json::json!({ "error": error })),
            duration_ms: Some(duration_ms),
        }
    }
}

/// One applied migration on a branch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub id: i64,
    pub branch_id: Uuid,
    pub migration_version: String,
    pub name: Option<String>,
    pub applied_at: DateTime<Utc>,
}

/// Per-repository GitHub branching policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubConfig {
    pub repository: String,
    pub auto_create_on_pr: bool,
    pub auto_delete_on_merge: bool,
    pub default_clone_mode: DataCloneMode,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Explicit access grant on a branch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchAccess {
    pub branch_id: Uuid,
    pub user_id: String,
    pub access_level: AccessLevel,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_round_trip() {
        for status in [
            BranchStatus::Creating,
            BranchStatus::Ready,
            BranchStatus::Migrating,
            BranchStatus::Deleting,
            BranchStatus::Deleted,
            BranchStatus::Error,
        ] {
            assert_eq!(BranchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BranchStatus::parse("bogus"), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(BranchStatus::Creating.can_transition_to(BranchStatus::Ready));
        assert!(BranchStatus::Ready.can_transition_to(BranchStatus::Migrating));
        assert!(BranchStatus::Migrating.can_transition_to(BranchStatus::Ready));
        assert!(BranchStatus::Ready.can_transition_to(BranchStatus::Deleting));
        assert!(BranchStatus::Error.can_transition_to(BranchStatus::Deleting));
        assert!(BranchStatus::Deleting.can_transition_to(BranchStatus::Deleted));
    }

    #[test]
    fn test_deleted_is_terminal() {
        for next in [
            BranchStatus::Creating,
            BranchStatus::Ready,
            BranchStatus::Migrating,
            BranchStatus::Deleting,
            BranchStatus::Error,
        ] {
            assert!(!BranchStatus::Deleted.can_transition_to(next));
        }
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!BranchStatus::Creating.can_transition_to(BranchStatus::Deleted));
        assert!(!BranchStatus::Ready.can_transition_to(BranchStatus::Deleted));
        assert!(!BranchStatus::Creating.can_transition_to(BranchStatus::Migrating));
    }

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::Read.rank() < AccessLevel::Write.rank());
        assert!(AccessLevel::Write.rank() < AccessLevel::Admin.rank());
    }
}
