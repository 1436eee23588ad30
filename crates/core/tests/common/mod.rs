//! Shared helpers: local bare repositories standing in for remotes.

#![allow(dead_code)]

pub mod server;

use std::path::Path;

use git2::{Index, IndexEntry, IndexTime, Repository, Signature};
use tempfile::TempDir;

use gitfile_core::config::ClientConfig;
use gitfile_core::git::{Credentials, RepoClient};

/// A bare repository on disk, addressed by its path.
pub struct Remote {
    pub dir: TempDir,
    pub url: String,
}

impl Remote {
    /// Create a bare repository with one commit on `branch` holding `files`.
    pub fn seeded(branch: &str, files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.git");
        let repo = Repository::init_bare(&path).unwrap();

        let mut index = Index::new().unwrap();
        for (name, content) in files {
            let blob = repo.blob(content.as_bytes()).unwrap();
            index.add(&entry(name, blob, content.len())).unwrap();
        }
        let tree_id = index.write_tree_to(&repo).unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Seed", "seed@example.com").unwrap();
        let refname = format!("refs/heads/{}", branch);
        repo.commit(Some(&refname), &sig, &sig, "seed", &tree, &[])
            .unwrap();
        repo.set_head(&refname).unwrap();

        let url = path.to_str().unwrap().to_string();
        Self { dir, url }
    }

    /// Directory holding the bare repository `remote.git`.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn repo(&self) -> Repository {
        Repository::open_bare(&self.url).unwrap()
    }

    /// Content of `path` at the tip of `branch`, if present.
    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        let repo = self.repo();
        let commit = repo
            .find_reference(&format!("refs/heads/{}", branch))
            .unwrap()
            .peel_to_commit()
            .unwrap();
        let tree = commit.tree().unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = entry.to_object(&repo).unwrap().peel_to_blob().unwrap();
        Some(String::from_utf8(blob.content().to_vec()).unwrap())
    }

    /// Message, author name and author email of the tip of `branch`.
    pub fn tip(&self, branch: &str) -> (String, String, String) {
        let repo = self.repo();
        let commit = repo
            .find_reference(&format!("refs/heads/{}", branch))
            .unwrap()
            .peel_to_commit()
            .unwrap();
        let author = commit.author();
        (
            commit.message().unwrap().to_string(),
            author.name().unwrap().to_string(),
            author.email().unwrap().to_string(),
        )
    }

    /// Number of commits reachable from `branch`.
    pub fn commit_count(&self, branch: &str) -> usize {
        let repo = self.repo();
        let mut walk = repo.revwalk().unwrap();
        walk.push_ref(&format!("refs/heads/{}", branch)).unwrap();
        walk.count()
    }
}

fn entry(path: &str, id: git2::Oid, size: usize) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        file_size: size as u32,
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

/// A client configured for local remotes (libgit2's local transport does
/// not support shallow fetches).
pub fn client() -> RepoClient {
    let config = ClientConfig {
        clone_depth: 0,
        ..ClientConfig::default()
    };
    RepoClient::new(Credentials::new("user", "secret"), config)
}
