//! Remote repository access for gitfile.

pub mod client;
pub mod retry;
mod snapshot;

pub use client::{
    commit_message, file_locator, Credentials, ReadRequest, ReadResponse, RepoClient,
    WriteRequest, WriteResponse,
};
pub use retry::retry_on_conflict;
