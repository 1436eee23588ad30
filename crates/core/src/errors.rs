//! Error types for the gitfile core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// The stage of a repository operation at which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitStage {
    Clone,
    Worktree,
    Checkout,
    Stat,
    Open,
    Read,
    Create,
    Write,
    Add,
    Commit,
    Push,
}

impl fmt::Display for GitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Clone => "clone",
            Self::Worktree => "worktree",
            Self::Checkout => "checkout",
            Self::Stat => "stat",
            Self::Open => "open",
            Self::Read => "read",
            Self::Create => "create",
            Self::Write => "write",
            Self::Add => "add",
            Self::Commit => "commit",
            Self::Push => "push",
        };
        f.write_str(label)
    }
}

/// Errors from remote repository read/write operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A `git2` failure, tagged with the stage that produced it.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: GitStage,
        #[source]
        source: git2::Error,
    },

    /// The requested branch does not exist on the remote.
    #[error("branch '{branch}' not found")]
    BranchNotFound { branch: String },

    /// The file locator (or one of its parent directories) collides with
    /// an existing entry of the wrong kind.
    #[error("{stage} failed: '{path}' is not a file")]
    NotAFile { stage: GitStage, path: String },

    /// Push was refused because the remote branch moved past our parent.
    #[error("push rejected for branch '{branch}' (non-fast-forward): {detail}")]
    NonFastForward { branch: String, detail: String },

    /// Push was refused for any other reason.
    #[error("push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// Every attempt ended in a non-fast-forward rejection.
    #[error("push failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<GitError>,
    },

    /// The caller's cancellation signal fired.
    #[error("{stage} cancelled")]
    Cancelled { stage: GitStage },

    /// The ephemeral snapshot directory could not be created.
    #[error("snapshot I/O error: {0}")]
    Snapshot(#[from] std::io::Error),

    /// The blocking worker running the operation panicked or was aborted.
    #[error("repository task failed: {0}")]
    TaskFailed(String),
}

impl GitError {
    /// Wrap a `git2` error with the stage it came from.
    pub fn at(stage: GitStage) -> impl FnOnce(git2::Error) -> GitError {
        move |source| GitError::Stage { stage, source }
    }

    /// Whether this error is a push rejection caused by the remote branch
    /// having advanced (the only condition `Write` retries on).
    pub fn is_non_fast_forward(&self) -> bool {
        match self {
            Self::NonFastForward { .. } => true,
            Self::Stage {
                stage: GitStage::Push,
                source,
            } => source.code() == git2::ErrorCode::NotFastForward,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Classify a per-reference push status message reported by the server.
pub fn is_non_fast_forward_status(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    detail.contains("non-fast-forward")
        || detail.contains("fetch first")
        || detail.contains("stale info")
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Resource errors
// ---------------------------------------------------------------------------

/// Errors from the declarative `git_file` resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// A required attribute is empty.
    #[error("missing required attribute '{field}'")]
    MissingField { field: &'static str },

    /// A repository operation failed while serving a resource operation.
    #[error("failed to {action} file: {source}")]
    Git {
        action: &'static str,
        #[source]
        source: GitError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::Stage {
            stage: GitStage::Clone,
            source: git2::Error::from_str("connection refused"),
        };
        assert_eq!(err.to_string(), "clone failed: connection refused");

        let err = GitError::BranchNotFound {
            branch: "main".into(),
        };
        assert_eq!(err.to_string(), "branch 'main' not found");

        let err = GitError::Cancelled {
            stage: GitStage::Push,
        };
        assert_eq!(err.to_string(), "push cancelled");

        let err = ConfigError::InvalidValue {
            field: "provider.username".into(),
            detail: "must not be empty".into(),
        };
        assert!(err.to_string().contains("provider.username"));
    }

    #[test]
    fn test_retries_exhausted_mentions_attempts() {
        let err = GitError::RetriesExhausted {
            attempts: 4,
            source: Box::new(GitError::NonFastForward {
                branch: "main".into(),
                detail: "fetch first".into(),
            }),
        };
        assert!(err.to_string().starts_with("push failed after 4 attempts"));
        assert!(!err.is_non_fast_forward());
    }

    #[test]
    fn test_non_fast_forward_classification() {
        let nff = GitError::Stage {
            stage: GitStage::Push,
            source: git2::Error::new(
                git2::ErrorCode::NotFastForward,
                git2::ErrorClass::Reference,
                "cannot push non-fastforwardable reference",
            ),
        };
        assert!(nff.is_non_fast_forward());

        let auth = GitError::Stage {
            stage: GitStage::Push,
            source: git2::Error::new(
                git2::ErrorCode::Auth,
                git2::ErrorClass::Http,
                "authentication required",
            ),
        };
        assert!(!auth.is_non_fast_forward());

        let rejected = GitError::PushRejected {
            branch: "main".into(),
            detail: "pre-receive hook declined".into(),
        };
        assert!(!rejected.is_non_fast_forward());
    }

    #[test]
    fn test_status_message_classification() {
        assert!(is_non_fast_forward_status("non-fast-forward"));
        assert!(is_non_fast_forward_status("Updates were rejected (fetch first)"));
        assert!(is_non_fast_forward_status("stale info"));
        assert!(!is_non_fast_forward_status("pre-receive hook declined"));
        assert!(!is_non_fast_forward_status("protected branch hook declined"));
    }

    #[test]
    fn test_stage_wrapping() {
        let err = GitError::at(GitStage::Add)(git2::Error::from_str("index locked"));
        assert!(matches!(
            err,
            GitError::Stage {
                stage: GitStage::Add,
                ..
            }
        ));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let git_err = GitError::BranchNotFound {
            branch: "dev".into(),
        };
        let core_err: CoreError = git_err.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let res_err = ResourceError::MissingField { field: "branch" };
        let core_err: CoreError = res_err.into();
        assert!(matches!(core_err, CoreError::Resource(_)));
    }
}
