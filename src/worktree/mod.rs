//! Worktree Manager (spec §4.3): reconciles logical task branches with git
//! worktrees, recovers from orphaned registrations, and customizes a fresh
//! worktree with copied files and a setup script.
//!
//! Grounded on the teacher crate's worktree lifecycle (`worktrees.rs`): create
//! validates the branch name up front, existence is the AND of git's view and
//! the filesystem's, and a missing directory with a live git registration is
//! healed by one `prune` + retry rather than surfaced as an error immediately.

mod setup;

pub use setup::WorktreeSetup;

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::command_executor::CommandExecutor;
use crate::error::CrewError;
use crate::git::Repository;

static BRANCH_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^crew-[0-9]+(-gh-[0-9]+)?$").unwrap());

/// True if `branch` matches the `crew-<N>[-gh-<M>]` convention (spec §4.3).
pub fn is_crew_branch(branch: &str) -> bool {
    BRANCH_PATTERN.is_match(branch)
}

/// A worktree entry as reported by [`WorktreeManager::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeInfo {
    pub branch: String,
    pub path: PathBuf,
}

/// Owns the mapping `branch -> filesystem path`, rooted under
/// `<crewDir>/worktrees/<task id>` (directory name is the numeric task id,
/// not the branch — spec §4.3).
pub struct WorktreeManager {
    repo: Repository,
    worktrees_root: PathBuf,
    executor: CommandExecutor,
}

impl WorktreeManager {
    pub fn new(repo: Repository, crew_dir: impl Into<PathBuf>) -> Self {
        WorktreeManager {
            repo,
            worktrees_root: crew_dir.into().join("worktrees"),
            executor: CommandExecutor::new(),
        }
    }

    fn task_id_of(branch: &str) -> Result<&str, CrewError> {
        if !is_crew_branch(branch) {
            return Err(CrewError::InvalidBranch { branch: branch.to_string() });
        }
        // "crew-<N>" or "crew-<N>-gh-<M>": the id is the first numeric segment.
        branch
            .strip_prefix("crew-")
            .and_then(|rest| rest.split('-').next())
            .ok_or_else(|| CrewError::InvalidBranch { branch: branch.to_string() })
    }

    fn path_for(&self, branch: &str) -> Result<PathBuf, CrewError> {
        let id = Self::task_id_of(branch)?;
        Ok(self.worktrees_root.join(id))
    }

    /// True only when git lists the branch *and* its worktree directory
    /// exists on disk (spec §4.3 Existence semantics).
    pub fn exists(&self, branch: &str) -> Result<bool, CrewError> {
        let registered = self.repo.worktree_for_branch(branch)?.is_some();
        let path = self.path_for(branch)?;
        Ok(registered && path.exists())
    }

    /// Create a worktree for `branch`, branching from `base_branch`. Recovers
    /// from an orphaned registration (git knows about the branch's worktree
    /// but the directory is gone) by pruning once and retrying.
    pub fn create(&self, branch: &str, base_branch: &str) -> Result<PathBuf, CrewError> {
        let path = self.path_for(branch)?;
        if path.exists() {
            return Ok(path);
        }

        match self.repo.add_worktree(&path, branch, base_branch) {
            Ok(()) => Ok(path),
            Err(first_err) => {
                self.repo.prune_worktrees()?;
                self.repo
                    .add_worktree(&path, branch, base_branch)
                    .map_err(|_| first_err)?;
                Ok(path)
            }
        }
    }

    /// Resolve the filesystem path registered for `branch`.
    pub fn resolve(&self, branch: &str) -> Result<PathBuf, CrewError> {
        if self.exists(branch)? {
            Ok(self.path_for(branch)?)
        } else {
            Err(CrewError::WorktreeNotFound { branch: branch.to_string() })
        }
    }

    /// Remove the worktree for `branch`. Non-forced: fails with
    /// `UncommittedChanges` if the tree is dirty (spec §4.3 Removal semantics).
    pub fn remove(&self, branch: &str, force: bool) -> Result<(), CrewError> {
        let path = self.path_for(branch)?;
        if !path.exists() {
            return Ok(());
        }
        self.repo.remove_worktree(&path, force)
    }

    /// List every registered crew worktree (non-crew entries, e.g. the
    /// primary checkout, are filtered out).
    pub fn list(&self) -> Result<Vec<WorktreeInfo>, CrewError> {
        Ok(self
            .repo
            .list_worktrees()?
            .into_iter()
            .filter_map(|w| {
                let branch = w.branch?;
                is_crew_branch(&branch).then_some(WorktreeInfo { branch, path: w.path })
            })
            .collect())
    }

    /// True if `branch`'s worktree has uncommitted or untracked changes.
    pub fn is_dirty(&self, branch: &str) -> Result<bool, CrewError> {
        let path = self.resolve(branch)?;
        self.repo.has_uncommitted_changes(&path)
    }

    /// After create: copy configured files into the worktree and run the
    /// setup command (spec §4.3 Setup).
    pub fn setup(&self, branch: &str, repo_root: &Path, setup: &WorktreeSetup) -> Result<(), CrewError> {
        let path = self.resolve(branch)?;
        setup::apply(&self.executor, repo_root, &path, setup)
    }
}
