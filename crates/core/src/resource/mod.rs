//! Declarative `git_file` resource: maps desired-state attributes onto the
//! repository client's read and write operations.

pub mod git_file;
pub mod path;

pub use git_file::{
    apply, create, delete, plan, read, update, ApplyOutcome, GitFileSpec, GitFileState, Plan,
    PlanAction,
};
pub use path::resolve_path;
