//! gitfile core library.
//!
//! This crate provides the foundational components for declaratively managing
//! single files in remote Git repositories: configuration, the repository
//! read/write client, provider wiring, and the `git_file` resource.

pub mod config;
pub mod errors;
pub mod git;
pub mod provider;
pub mod resource;

// Re-exports for convenience.
pub use config::AppConfig;
pub use errors::{CoreError, GitError};
pub use git::RepoClient;
pub use resource::GitFileSpec;
pub use tokio_util::sync::CancellationToken;
