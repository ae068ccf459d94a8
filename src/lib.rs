//! branchd - database branching service
//!
//! On-demand creation, routing and teardown of isolated, ephemeral
//! Postgres-compatible databases ("branches") tied to development workflows,
//! typically one database per pull request.

pub mod config;
pub mod error;
pub mod github;
pub mod lifecycle;
pub mod models;
pub mod provision;
pub mod router;
pub mod scheduler;
pub mod seeder;
pub mod slug;
pub mod store;

pub use error::{BranchError, BranchResult};
