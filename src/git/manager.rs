//! Core GitManager implementation
//!
//! Contains the GitManager struct and its basic operations

use git2::{Commit, Error as GitError, Repository};
use std::path::Path;

use crate::git::types::CommitInfo;

/// Git manager for repository operations
pub struct GitManager {
    pub(crate) repo: Repository,
}

impl GitManager {
    /// Create a new GitManager for the given repository or worktree path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Resolve any revision spec (`HEAD`, branch name, hash) to a commit
    pub(crate) fn find_commit(&self, rev: &str) -> Result<Commit<'_>, GitError> {
        self.repo.revparse_single(rev)?.peel_to_commit()
    }

    /// Resolve a revision spec to its full commit hash
    pub fn resolve_commit_id(&self, rev: &str) -> Result<String, GitError> {
        Ok(self.find_commit(rev)?.id().to_string())
    }

    /// Get commit details for a revision spec
    pub fn get_commit(&self, rev: &str) -> Result<CommitInfo, GitError> {
        let commit = self.find_commit(rev)?;
        self.commit_to_info(&commit)
    }

    /// Name of the branch HEAD points to, if any
    pub fn current_branch_name(&self) -> Option<String> {
        let head = self.repo.head().ok()?;
        if head.is_branch() {
            head.shorthand().map(|s| s.to_string())
        } else {
            None
        }
    }

    /// Convert a Commit to CommitInfo
    pub(crate) fn commit_to_info(&self, commit: &Commit) -> Result<CommitInfo, GitError> {
        let id = commit.id().to_string();
        let short_id = id.chars().take(7).collect();
        let author = commit.author();

        Ok(CommitInfo {
            id,
            short_id,
            message: commit.message().unwrap_or("").to_string(),
            author: author.name().unwrap_or("").to_string(),
            email: author.email().unwrap_or("").to_string(),
            timestamp: commit.time().seconds(),
            parent_ids: commit.parent_ids().map(|oid| oid.to_string()).collect(),
        })
    }
}
