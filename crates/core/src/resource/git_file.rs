//! The `git_file` resource.
//!
//! One managed object is one file on one branch. Deleting the managed object
//! only drops local tracking; the file is never removed from the repository.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::path::resolve_path;
use crate::errors::ResourceError;
use crate::git::{ReadRequest, RepoClient, WriteRequest};

// ---------------------------------------------------------------------------
// Desired and observed state
// ---------------------------------------------------------------------------

/// Desired state of one managed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitFileSpec {
    /// Remote repository URL.
    pub repository: String,

    /// Branch to read from and commit to. Must already exist.
    pub branch: String,

    #[serde(default)]
    pub folder: String,

    #[serde(default)]
    pub file_name: String,

    /// Shorthand for `folder` + `file_name`; wins when non-empty.
    #[serde(default)]
    pub path: String,

    /// Desired file content.
    pub content: String,

    /// Commit author name.
    pub author: String,

    /// Commit author email.
    pub email: String,

    /// Appended to the generated commit message.
    #[serde(default)]
    pub postfix: String,
}

impl GitFileSpec {
    /// Resolved `(folder, file_name)`.
    pub fn resolved_path(&self) -> (String, String) {
        resolve_path(&self.path, &self.folder, &self.file_name)
    }

    /// The identifier that keys this managed object: `folder/file_name`.
    pub fn id(&self) -> String {
        let (folder, file) = self.resolved_path();
        format!("{}/{}", folder, file)
    }

    /// Check that every required attribute is present.
    pub fn validate(&self) -> Result<(), ResourceError> {
        let required = [
            ("repository", &self.repository),
            ("branch", &self.branch),
            ("author", &self.author),
            ("email", &self.email),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ResourceError::MissingField { field });
            }
        }
        if self.resolved_path().1.is_empty() {
            return Err(ResourceError::MissingField { field: "file_name" });
        }
        Ok(())
    }

    pub fn read_request(&self) -> ReadRequest {
        let (folder, file_name) = self.resolved_path();
        ReadRequest {
            repository: self.repository.clone(),
            branch: self.branch.clone(),
            path: folder,
            file_name,
        }
    }

    pub fn write_request(&self) -> WriteRequest {
        WriteRequest {
            target: self.read_request(),
            content: self.content.clone(),
            name: self.author.clone(),
            email: self.email.clone(),
            postfix: self.postfix.clone(),
        }
    }
}

/// Observed state of one managed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitFileState {
    pub id: String,
    pub exists: bool,
    /// File content, or empty when the file does not exist.
    pub content: String,
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// Write the desired content, then read back the observed state.
///
/// A failed read-back does not fail the create; the desired content is
/// reported as observed.
#[instrument(skip_all, fields(id = %spec.id()))]
pub async fn create(
    client: &RepoClient,
    spec: &GitFileSpec,
    cancel: &CancellationToken,
) -> Result<GitFileState, ResourceError> {
    spec.validate()?;
    write(client, spec, cancel).await?;

    match read(client, spec, cancel).await {
        Ok(state) => Ok(state),
        Err(e) => {
            warn!(error = %e, "read-back after create failed");
            Ok(GitFileState {
                id: spec.id(),
                exists: true,
                content: spec.content.clone(),
            })
        }
    }
}

/// Observe the current content of the file.
#[instrument(skip_all, fields(id = %spec.id()))]
pub async fn read(
    client: &RepoClient,
    spec: &GitFileSpec,
    cancel: &CancellationToken,
) -> Result<GitFileState, ResourceError> {
    spec.validate()?;
    let response = client
        .read(spec.read_request(), cancel)
        .await
        .map_err(|source| ResourceError::Git {
            action: "read",
            source,
        })?;

    let content = if response.exists {
        String::from_utf8_lossy(&response.contents).into_owned()
    } else {
        String::new()
    };

    Ok(GitFileState {
        id: spec.id(),
        exists: response.exists,
        content,
    })
}

/// Write the desired content, then return the observed state.
#[instrument(skip_all, fields(id = %spec.id()))]
pub async fn update(
    client: &RepoClient,
    spec: &GitFileSpec,
    cancel: &CancellationToken,
) -> Result<GitFileState, ResourceError> {
    spec.validate()?;
    write(client, spec, cancel).await?;
    read(client, spec, cancel).await
}

/// Stop tracking the file. The repository is left untouched.
pub fn delete(spec: &GitFileSpec) -> Result<(), ResourceError> {
    info!(
        id = %spec.id(),
        "dropping managed file from tracking; repository content is left in place"
    );
    Ok(())
}

async fn write(
    client: &RepoClient,
    spec: &GitFileSpec,
    cancel: &CancellationToken,
) -> Result<(), ResourceError> {
    client
        .write(spec.write_request(), cancel)
        .await
        .map_err(|source| ResourceError::Git {
            action: "write",
            source,
        })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Plan / apply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    NoChange,
    Create,
    Update,
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChange => write!(f, "no change"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// What converging a file would do, given its observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub action: PlanAction,
    pub observed: GitFileState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub action: PlanAction,
    pub state: GitFileState,
}

/// Compare desired and observed content without writing anything.
pub async fn plan(
    client: &RepoClient,
    spec: &GitFileSpec,
    cancel: &CancellationToken,
) -> Result<Plan, ResourceError> {
    let observed = read(client, spec, cancel).await?;
    let action = if !observed.exists {
        PlanAction::Create
    } else if observed.content != spec.content {
        PlanAction::Update
    } else {
        PlanAction::NoChange
    };
    Ok(Plan { action, observed })
}

/// Converge one file: plan, then create or update only when needed.
pub async fn apply(
    client: &RepoClient,
    spec: &GitFileSpec,
    cancel: &CancellationToken,
) -> Result<ApplyOutcome, ResourceError> {
    let Plan { action, observed } = plan(client, spec, cancel).await?;
    let state = match action {
        PlanAction::NoChange => observed,
        PlanAction::Create => create(client, spec, cancel).await?,
        PlanAction::Update => update(client, spec, cancel).await?,
    };
    info!(id = %state.id, %action, "applied");
    Ok(ApplyOutcome { action, state })
}
