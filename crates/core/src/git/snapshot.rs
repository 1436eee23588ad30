//! Ephemeral, single-branch repository snapshots.
//!
//! A [`Snapshot`] is a fresh bare clone of one branch, owned by exactly one
//! read or write attempt. The working tree is never materialized: files are
//! resolved from the branch tip's tree object, and new content is staged into
//! an in-memory index. The object store lives in a private temporary
//! directory that is removed when the snapshot is dropped.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use git2::build::RepoBuilder;
use git2::{
    Cred, ErrorClass, ErrorCode, FetchOptions, Index, IndexEntry, IndexTime, ObjectType, Oid,
    PushOptions, RemoteCallbacks, Repository, Signature, Tree,
};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::client::Credentials;
use crate::errors::{is_non_fast_forward_status, GitError, GitStage};

const REMOTE_NAME: &str = "origin";
const DEFAULT_FILE_MODE: u32 = 0o100644;

// ---------------------------------------------------------------------------
// Abort flag
// ---------------------------------------------------------------------------

/// Shared flag that tells in-flight libgit2 callbacks to abort.
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail fast between stages once cancellation was requested.
    pub(crate) fn check(&self, stage: GitStage) -> Result<(), GitError> {
        if self.is_raised() {
            Err(GitError::Cancelled { stage })
        } else {
            Ok(())
        }
    }

    /// Wrap a `git2` error with its stage. Errors raised after an abort
    /// request are reported as cancellation.
    pub(crate) fn wrap(&self, stage: GitStage) -> impl FnOnce(git2::Error) -> GitError + '_ {
        move |source| {
            if self.is_raised() {
                GitError::Cancelled { stage }
            } else {
                GitError::Stage { stage, source }
            }
        }
    }
}

fn aborted() -> git2::Error {
    git2::Error::new(ErrorCode::User, ErrorClass::Callback, "operation cancelled")
}

/// Credential and progress callbacks shared by clone and push.
fn remote_callbacks(credentials: &Credentials, abort: &AbortFlag) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();

    let username = credentials.username().to_string();
    let password = credentials.password().to_string();
    let abort_cred = abort.clone();
    let mut offered = false;
    callbacks.credentials(move |_url, _username_from_url, _allowed| {
        if abort_cred.is_raised() {
            return Err(aborted());
        }
        // libgit2 keeps asking while the remote answers 401.
        if offered {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                "credentials rejected by remote",
            ));
        }
        offered = true;
        Cred::userpass_plaintext(&username, &password)
    });

    let abort_transfer = abort.clone();
    callbacks.transfer_progress(move |_progress| !abort_transfer.is_raised());

    let abort_sideband = abort.clone();
    callbacks.sideband_progress(move |_data| !abort_sideband.is_raised());

    callbacks
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A per-call clone of one branch. Field order matters: the repository
/// handle must be dropped before its directory.
pub(crate) struct Snapshot {
    repo: Repository,
    branch: String,
    credentials: Credentials,
    abort: AbortFlag,
    _dir: TempDir,
}

impl Snapshot {
    /// Clone `branch` of `url` into a fresh private directory.
    ///
    /// Only the requested branch is fetched. `depth` limits history; `0`
    /// fetches everything.
    pub(crate) fn clone(
        url: &str,
        branch: &str,
        credentials: &Credentials,
        depth: u32,
        abort: AbortFlag,
    ) -> Result<Self, GitError> {
        abort.check(GitStage::Clone)?;

        let dir = tempfile::Builder::new().prefix("gitfile-").tempdir()?;
        debug!(path = %dir.path().display(), depth, "cloning into ephemeral snapshot");

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(credentials, &abort));
        if depth > 0 {
            fetch_opts.depth(i32::try_from(depth).unwrap_or(i32::MAX));
        }

        let single_branch = branch.to_string();
        let mut builder = RepoBuilder::new();
        builder
            .bare(true)
            .branch(branch)
            .fetch_options(fetch_opts)
            .remote_create(move |repo, name, url| {
                let refspec = format!(
                    "+refs/heads/{branch}:refs/remotes/{name}/{branch}",
                    branch = single_branch,
                    name = name,
                );
                repo.remote_with_fetch(name, url, &refspec)
            });

        let repo = builder.clone(url, dir.path()).map_err(|e| {
            if is_missing_ref(&e) && !abort.is_raised() {
                GitError::BranchNotFound {
                    branch: branch.to_string(),
                }
            } else {
                abort.wrap(GitStage::Clone)(e)
            }
        })?;
        info!(url, branch, "clone completed");

        Ok(Self {
            repo,
            branch: branch.to_string(),
            credentials: credentials.clone(),
            abort,
            _dir: dir,
        })
    }

    fn local_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    /// Point the local branch and HEAD at the fetched remote tip.
    pub(crate) fn checkout(&self) -> Result<(), GitError> {
        self.abort.check(GitStage::Checkout)?;
        let remote_ref = format!("refs/remotes/{}/{}", REMOTE_NAME, self.branch);
        let tip = self
            .repo
            .find_reference(&remote_ref)
            .and_then(|r| r.peel_to_commit())
            .map_err(|e| {
                if is_missing_ref(&e) {
                    GitError::BranchNotFound {
                        branch: self.branch.clone(),
                    }
                } else {
                    self.abort.wrap(GitStage::Checkout)(e)
                }
            })?;

        let local_ref = self.local_ref();
        self.repo
            .reference(&local_ref, tip.id(), true, "gitfile: checkout branch tip")
            .map_err(self.abort.wrap(GitStage::Checkout))?;
        self.repo
            .set_head(&local_ref)
            .map_err(self.abort.wrap(GitStage::Checkout))?;
        debug!(branch = %self.branch, tip = %tip.id(), "checked out branch tip");
        Ok(())
    }

    /// The tree of the commit HEAD points at.
    fn head_tree(&self) -> Result<Tree<'_>, GitError> {
        self.repo
            .head()
            .and_then(|head| head.peel_to_tree())
            .map_err(self.abort.wrap(GitStage::Worktree))
    }

    /// Read the file at `locator`. `Ok(None)` means the path does not exist.
    pub(crate) fn read_file(&self, locator: &str) -> Result<Option<Vec<u8>>, GitError> {
        let tree = self.head_tree()?;

        let entry = match tree.get_path(Path::new(locator)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(locator, "file does not exist");
                return Ok(None);
            }
            Err(e) => return Err(self.abort.wrap(GitStage::Stat)(e)),
        };

        if entry.kind() != Some(ObjectType::Blob) {
            return Err(GitError::NotAFile {
                stage: GitStage::Open,
                path: locator.to_string(),
            });
        }

        let object = entry
            .to_object(&self.repo)
            .map_err(self.abort.wrap(GitStage::Open))?;
        let blob = object
            .peel_to_blob()
            .map_err(self.abort.wrap(GitStage::Read))?;
        Ok(Some(blob.content().to_vec()))
    }

    /// Create or overwrite `locator` with `content` on top of the branch tip
    /// and return the resulting tree id.
    pub(crate) fn stage_file(&self, locator: &str, content: &[u8]) -> Result<Oid, GitError> {
        let base = self.head_tree()?;

        // The index would silently replace a colliding directory or parent
        // file, so refuse those up front.
        for (idx, _) in locator.match_indices('/') {
            let parent = &locator[..idx];
            if let Ok(entry) = base.get_path(Path::new(parent)) {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(GitError::NotAFile {
                        stage: GitStage::Create,
                        path: parent.to_string(),
                    });
                }
            }
        }
        let existing = base.get_path(Path::new(locator)).ok();
        if let Some(entry) = &existing {
            if entry.kind() != Some(ObjectType::Blob) {
                return Err(GitError::NotAFile {
                    stage: GitStage::Create,
                    path: locator.to_string(),
                });
            }
        }

        // Keep the executable bit of a file being overwritten.
        let mode = existing
            .map(|entry| entry.filemode() as u32)
            .unwrap_or(DEFAULT_FILE_MODE);

        let mut index = Index::new().map_err(self.abort.wrap(GitStage::Create))?;
        index
            .read_tree(&base)
            .map_err(self.abort.wrap(GitStage::Create))?;

        let blob = self
            .repo
            .blob(content)
            .map_err(self.abort.wrap(GitStage::Write))?;

        index
            .add(&blob_entry(locator, blob, mode, content.len()))
            .map_err(self.abort.wrap(GitStage::Add))?;
        let tree = index
            .write_tree_to(&self.repo)
            .map_err(self.abort.wrap(GitStage::Add))?;
        debug!(locator, blob = %blob, tree = %tree, "staged file");
        Ok(tree)
    }

    /// Commit `tree` on top of HEAD with the given identity as both author
    /// and committer.
    pub(crate) fn commit(
        &self,
        tree: Oid,
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<Oid, GitError> {
        self.abort.check(GitStage::Commit)?;
        let wrap = || self.abort.wrap(GitStage::Commit);

        let tree = self.repo.find_tree(tree).map_err(wrap())?;
        let signature = Signature::now(author_name, author_email).map_err(wrap())?;
        let parent = self
            .repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(wrap())?;
        let oid = self
            .repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &[&parent],
            )
            .map_err(wrap())?;
        info!(sha = %oid, "created commit");
        Ok(oid)
    }

    /// Push the local branch to the same branch on the remote. Never forced.
    pub(crate) fn push(&self) -> Result<(), GitError> {
        self.abort.check(GitStage::Push)?;
        info!(remote = REMOTE_NAME, branch = %self.branch, "pushing");

        let mut remote = self
            .repo
            .find_remote(REMOTE_NAME)
            .map_err(self.abort.wrap(GitStage::Push))?;

        let mut callbacks = remote_callbacks(&self.credentials, &self.abort);
        let abort_negotiation = self.abort.clone();
        callbacks.push_negotiation(move |_updates| {
            if abort_negotiation.is_raised() {
                Err(aborted())
            } else {
                Ok(())
            }
        });
        let push_error = Arc::new(Mutex::new(None::<String>));
        let push_error_clone = Arc::clone(&push_error);
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                if let Ok(mut slot) = push_error_clone.lock() {
                    *slot = Some(msg.to_string());
                }
            }
            Ok(())
        });

        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("{0}:{0}", self.local_ref());

        if let Err(e) = remote.push(&[&refspec], Some(&mut push_opts)) {
            if e.code() == ErrorCode::NotFastForward {
                return Err(GitError::NonFastForward {
                    branch: self.branch.clone(),
                    detail: e.message().to_string(),
                });
            }
            return Err(self.abort.wrap(GitStage::Push)(e));
        }

        let rejection = push_error.lock().ok().and_then(|mut slot| slot.take());
        if let Some(detail) = rejection {
            return Err(if is_non_fast_forward_status(&detail) {
                GitError::NonFastForward {
                    branch: self.branch.clone(),
                    detail,
                }
            } else {
                GitError::PushRejected {
                    branch: self.branch.clone(),
                    detail,
                }
            });
        }

        info!("push completed");
        Ok(())
    }
}

fn is_missing_ref(e: &git2::Error) -> bool {
    e.code() == ErrorCode::NotFound && e.class() == ErrorClass::Reference
}

/// An index entry for a regular file blob at `path`.
pub(crate) fn blob_entry(path: &str, id: Oid, mode: u32, size: usize) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode,
        uid: 0,
        gid: 0,
        file_size: u32::try_from(size).unwrap_or(u32::MAX),
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}
