//! Commit inspection for GitManager
//!
//! Contains methods for reading file contents at revisions, listing the files a
//! commit touched, and measuring how far a branch has drifted.

use git2::{Diff, DiffOptions, Error as GitError, ErrorCode, Oid, Sort, Tree};
use std::collections::BTreeSet;
use std::path::Path;

use crate::git::GitManager;

impl GitManager {
    /// Content of `path` at revision `rev`, or None if the file does not exist there
    pub fn file_content_at(&self, rev: &str, path: &str) -> Result<Option<String>, GitError> {
        let commit = self.find_commit(rev)?;
        let tree = commit.tree()?;
        self.blob_content_in_tree(&tree, path)
    }

    fn blob_content_in_tree(&self, tree: &Tree, path: &str) -> Result<Option<String>, GitError> {
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let blob = self.repo.find_blob(entry.id())?;
        Ok(Some(String::from_utf8_lossy(blob.content()).to_string()))
    }

    /// Files touched by a single commit, compared with its first parent
    pub fn commit_changed_files(&self, rev: &str) -> Result<Vec<String>, GitError> {
        let commit = self.find_commit(rev)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree()?),
            Err(_) => None,
        };

        let diff = self.repo.diff_tree_to_tree(
            parent_tree.as_ref(),
            Some(&tree),
            Some(&mut DiffOptions::new()),
        )?;

        Ok(diff_paths(&diff))
    }

    /// Merge base of two revisions
    pub fn merge_base(&self, rev_a: &str, rev_b: &str) -> Result<String, GitError> {
        let a = self.find_commit(rev_a)?.id();
        let b = self.find_commit(rev_b)?.id();
        Ok(self.repo.merge_base(a, b)?.to_string())
    }

    /// Files that differ between `base_rev` and the working directory,
    /// including committed, staged, unstaged and untracked changes
    pub fn changed_files_since(&self, base_rev: &str) -> Result<Vec<String>, GitError> {
        let base_tree = self.find_commit(base_rev)?.tree()?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true);
        opts.recurse_untracked_dirs(true);

        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut opts))?;

        Ok(diff_paths(&diff))
    }

    /// Number of commits reachable from `to_rev` but not from `from_rev`
    pub fn count_commits_between(&self, from_rev: &str, to_rev: &str) -> Result<u32, GitError> {
        Ok(self.commits_between(from_rev, to_rev)?.len() as u32)
    }

    /// Hashes of commits in `from_rev..to_rev` that touched `path`, oldest first
    pub fn commits_touching(
        &self,
        from_rev: &str,
        to_rev: &str,
        path: &str,
    ) -> Result<Vec<String>, GitError> {
        let mut touching = Vec::new();
        for oid in self.commits_between(from_rev, to_rev)? {
            let hash = oid.to_string();
            if self.commit_changed_files(&hash)?.iter().any(|p| p == path) {
                touching.push(hash);
            }
        }
        Ok(touching)
    }

    fn commits_between(&self, from_rev: &str, to_rev: &str) -> Result<Vec<Oid>, GitError> {
        let from = self.find_commit(from_rev)?.id();
        let to = self.find_commit(to_rev)?.id();

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        revwalk.push(to)?;
        revwalk.hide(from)?;

        revwalk.collect()
    }
}

/// Paths (new side preferred) of every delta in a diff, deduplicated and sorted
fn diff_paths(diff: &Diff) -> Vec<String> {
    let mut paths = BTreeSet::new();
    for delta in diff.deltas() {
        let path = delta.new_file().path().or_else(|| delta.old_file().path());
        if let Some(path) = path {
            paths.insert(path.to_string_lossy().replace('\\', "/"));
        }
    }
    paths.into_iter().collect()
}
