//! Remote repository file client via `git2`.
//!
//! Every call works on its own [`Snapshot`]: a fresh single-branch clone that
//! is discarded when the call returns. Nothing is cached between calls.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::retry::retry_on_conflict;
use super::snapshot::{AbortFlag, Snapshot};
use crate::config::ClientConfig;
use crate::errors::{GitError, GitStage};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Username and secret used for every clone and push.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Requests / responses
// ---------------------------------------------------------------------------

/// Identifies one file at the tip of one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub repository: String,
    pub branch: String,
    /// Directory inside the repository. May be empty for the root.
    pub path: String,
    pub file_name: String,
}

impl ReadRequest {
    /// The in-repository path of the file.
    pub fn locator(&self) -> String {
        file_locator(&self.path, &self.file_name)
    }
}

/// Join a directory and file name into a repository path.
///
/// Tree paths are relative and have no empty components, so repeated or
/// surrounding separators are dropped and an empty directory addresses the
/// repository root.
pub fn file_locator(folder: &str, file_name: &str) -> String {
    folder
        .split('/')
        .chain(file_name.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResponse {
    pub exists: bool,
    /// Empty unless `exists` is true.
    pub contents: Vec<u8>,
}

/// New content for one file plus the identity that commits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub target: ReadRequest,
    /// May be empty; an empty file is written.
    pub content: String,
    pub name: String,
    pub email: String,
    /// Appended to the generated commit message.
    pub postfix: String,
}

/// Success is the absence of an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResponse;

/// Message for commits created by [`RepoClient::write`].
pub fn commit_message(file_name: &str, tool: &str, postfix: &str) -> String {
    format!("{}: updated via {}. {}", file_name, tool, postfix)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Reads and writes single files in remote repositories.
///
/// Reads run concurrently. Writes are serialized through a fair lock owned
/// by the client, held for the whole write including retries, so writers
/// proceed in arrival order.
pub struct RepoClient {
    credentials: Credentials,
    config: ClientConfig,
    write_lock: Mutex<()>,
}

impl fmt::Debug for RepoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoClient")
            .field("credentials", &self.credentials)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RepoClient {
    pub fn new(credentials: Credentials, config: ClientConfig) -> Self {
        Self {
            credentials,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read one file from the tip of a branch.
    ///
    /// A missing file is not an error: it yields `exists: false`.
    #[instrument(skip(self, request, cancel), fields(
        repository = %request.repository,
        branch = %request.branch,
        locator = %request.locator(),
    ))]
    pub async fn read(
        &self,
        request: ReadRequest,
        cancel: &CancellationToken,
    ) -> Result<ReadResponse, GitError> {
        let credentials = self.credentials.clone();
        let depth = self.config.clone_depth;

        let contents = run_blocking(cancel, move |abort| {
            let snapshot = Snapshot::clone(
                &request.repository,
                &request.branch,
                &credentials,
                depth,
                abort,
            )?;
            snapshot.read_file(&request.locator())
        })
        .await?;

        Ok(match contents {
            Some(contents) => {
                debug!(bytes = contents.len(), "file read");
                ReadResponse {
                    exists: true,
                    contents,
                }
            }
            None => ReadResponse::default(),
        })
    }

    /// Create or overwrite one file and push a commit to the branch.
    ///
    /// Each attempt clones afresh. A push rejected as non-fast-forward
    /// restarts the attempt, up to `max_push_retries` times; any other
    /// failure is returned immediately. The remote is only touched by the
    /// final, atomic push.
    #[instrument(skip(self, request, cancel), fields(
        repository = %request.target.repository,
        branch = %request.target.branch,
        locator = %request.target.locator(),
    ))]
    pub async fn write(
        &self,
        request: WriteRequest,
        cancel: &CancellationToken,
    ) -> Result<WriteResponse, GitError> {
        let _guard = tokio::select! {
            guard = self.write_lock.lock() => guard,
            _ = cancel.cancelled() => return Err(GitError::Cancelled { stage: GitStage::Clone }),
        };

        let request = Arc::new(request);
        let message = commit_message(
            &request.target.file_name,
            &self.config.commit_tool,
            &request.postfix,
        );

        retry_on_conflict(self.config.max_push_retries, |attempt| {
            let request = Arc::clone(&request);
            let credentials = self.credentials.clone();
            let message = message.clone();
            let depth = self.config.clone_depth;
            async move {
                debug!(attempt, "starting write attempt");
                run_blocking(cancel, move |abort| {
                    write_attempt(&request, &credentials, depth, &message, abort)
                })
                .await
            }
        })
        .await?;

        info!("file written");
        Ok(WriteResponse)
    }
}

/// CLONE -> CHECKOUT -> STAGE_CONTENT -> COMMIT -> PUSH
fn write_attempt(
    request: &WriteRequest,
    credentials: &Credentials,
    depth: u32,
    message: &str,
    abort: AbortFlag,
) -> Result<(), GitError> {
    let target = &request.target;
    let snapshot = Snapshot::clone(
        &target.repository,
        &target.branch,
        credentials,
        depth,
        abort,
    )?;
    snapshot.checkout()?;
    let tree = snapshot.stage_file(&target.locator(), request.content.as_bytes())?;
    snapshot.commit(tree, message, &request.name, &request.email)?;
    snapshot.push()
}

/// Run blocking repository work off the async runtime.
///
/// When `cancel` fires, in-flight libgit2 callbacks are told to abort and the
/// worker is awaited so its snapshot is cleaned up (and, for writes, the
/// lock is not released while a push may still be running).
async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T, GitError>
where
    T: Send + 'static,
    F: FnOnce(AbortFlag) -> Result<T, GitError> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(GitError::Cancelled {
            stage: GitStage::Clone,
        });
    }

    let abort = AbortFlag::default();
    let worker_abort = abort.clone();
    let mut handle = tokio::task::spawn_blocking(move || work(worker_abort));

    let joined = tokio::select! {
        joined = &mut handle => joined,
        _ = cancel.cancelled() => {
            debug!("cancellation requested, aborting repository task");
            abort.raise();
            handle.await
        }
    };

    joined.map_err(|e| GitError::TaskFailed(e.to_string()))?
}
