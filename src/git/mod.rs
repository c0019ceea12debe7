//! Git adapter: branch/worktree/merge/uncommitted queries over the installed
//! `git` binary (spec §1(c)/(d) collaborator, §4.3, §6).
//!
//! Grounded on the teacher crate's `git::repository` module: a `Repository`
//! handle scoped to a directory, porcelain output parsed line-oriented, and
//! worktree listing filtered to exclude bare entries. Unlike the teacher
//! (which wraps every failure in its own `GitError`), this adapter reports
//! through [`crate::error::CrewError`] directly since the error taxonomy here
//! is the crate-wide one, not a git-specific subset.

mod parse;

pub use parse::WorktreeEntry;

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::CrewError;

/// A handle to a git repository (or one of its worktrees) at a given path.
#[derive(Debug, Clone)]
pub struct Repository {
    /// Any path inside the repository; `git -C <dir>` is used for every call,
    /// so this need not be the repo root.
    dir: PathBuf,
}

impl Repository {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn run(&self, args: &[&str]) -> Result<String, CrewError> {
        self.run_in(&self.dir, args)
    }

    fn run_in(&self, dir: &Path, args: &[&str]) -> Result<String, CrewError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .map_err(|e| CrewError::io(format!("running git {}", args.join(" ")), e))?;

        if !output.status.success() {
            return Err(CrewError::Subprocess {
                command: format!("git {}", args.join(" ")),
                exit_info: match output.status.code() {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                },
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Root of the repository's primary worktree (resolves via `rev-parse
    /// --show-toplevel`; returns the `.git` dir's parent for linked worktrees).
    pub fn root(&self) -> Result<PathBuf, CrewError> {
        let out = self.run(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// The `.git` common directory, shared by every worktree (spec §6
    /// `GitDir` template variable).
    pub fn common_git_dir(&self) -> Result<PathBuf, CrewError> {
        let out = self.run(&["rev-parse", "--git-common-dir"])?;
        let raw = PathBuf::from(out.trim());
        Ok(if raw.is_absolute() {
            raw
        } else {
            self.dir.join(raw)
        })
    }

    /// Current branch name, or `None` if detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>, CrewError> {
        let out = self.run(&["symbolic-ref", "--short", "-q", "HEAD"]);
        match out {
            Ok(name) => Ok(Some(name.trim().to_string())),
            Err(CrewError::Subprocess { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// True if `branch` resolves via `show-ref`.
    pub fn branch_exists(&self, branch: &str) -> Result<bool, CrewError> {
        let out = Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .status()
            .map_err(|e| CrewError::io("running git show-ref", e))?;
        Ok(out.success())
    }

    /// List all worktrees registered for this repository (`git worktree list
    /// --porcelain`), excluding bare entries — see teacher's `WorktreeList`.
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>, CrewError> {
        let out = self.run(&["worktree", "list", "--porcelain"])?;
        Ok(parse::parse_worktree_porcelain(&out)
            .into_iter()
            .filter(|w| !w.bare)
            .collect())
    }

    /// Path of the worktree registered for `branch`, if any.
    pub fn worktree_for_branch(&self, branch: &str) -> Result<Option<PathBuf>, CrewError> {
        Ok(self
            .list_worktrees()?
            .into_iter()
            .find(|w| w.branch.as_deref() == Some(branch))
            .map(|w| w.path))
    }

    /// `git worktree prune` — drops registrations whose directories are gone.
    pub fn prune_worktrees(&self) -> Result<(), CrewError> {
        self.run(&["worktree", "prune"])?;
        Ok(())
    }

    /// Create a worktree at `path` for `branch`, branching from `base_branch`.
    /// Creates `branch` if it does not already exist.
    pub fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> Result<(), CrewError> {
        let path_str = path.to_string_lossy().into_owned();
        if self.branch_exists(branch)? {
            self.run(&["worktree", "add", &path_str, branch])?;
        } else {
            self.run(&["worktree", "add", "-b", branch, &path_str, base_branch])?;
        }
        Ok(())
    }

    /// Remove the worktree at `path`. Non-forced: fails if git reports the
    /// worktree dirty (spec §4.3 Removal semantics).
    pub fn remove_worktree(&self, path: &Path, force: bool) -> Result<(), CrewError> {
        let path_str = path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        self.run(&args)
            .map_err(|e| reinterpret_dirty_worktree(e, path))?;
        Ok(())
    }

    /// True if the worktree at `path` has uncommitted changes (staged,
    /// unstaged, or untracked).
    pub fn has_uncommitted_changes(&self, path: &Path) -> Result<bool, CrewError> {
        let out = self.run_in(path, &["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }

    /// Files that would conflict merging `branch` into `base_branch`, without
    /// mutating either ref (spec §4.2 Conflict probe). Uses the 2-ref form of
    /// `merge-tree`, which computes its own merge base, writes its report to
    /// stdout, and exits 0 on a clean merge or 1 on conflict — a real failure
    /// (bad refs, no common ancestor) is any other exit code.
    pub fn merge_conflict_files(
        &self,
        branch: &str,
        base_branch: &str,
    ) -> Result<Vec<String>, CrewError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(["merge-tree", "--name-only", base_branch, branch])
            .output()
            .map_err(|e| CrewError::io("running git merge-tree --name-only", e))?;

        match output.status.code() {
            Some(0) => Ok(vec![]),
            Some(1) => Ok(parse::parse_conflict_files(&String::from_utf8_lossy(&output.stdout))),
            code => Err(CrewError::Subprocess {
                command: format!("git merge-tree --name-only {base_branch} {branch}"),
                exit_info: match code {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                },
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }

    /// Merge `branch` into the currently checked-out branch at `worktree_path`.
    pub fn merge_branch(&self, worktree_path: &Path, branch: &str) -> Result<(), CrewError> {
        self.run_in(worktree_path, &["merge", "--no-edit", branch])?;
        Ok(())
    }

    /// Best-effort autodetected default branch (`main`, falling back to
    /// `master`, falling back to whatever `HEAD` of the primary worktree is).
    pub fn default_branch(&self) -> Result<String, CrewError> {
        for candidate in ["main", "master"] {
            if self.branch_exists(candidate)? {
                return Ok(candidate.to_string());
            }
        }
        self.current_branch()?
            .ok_or_else(|| CrewError::Other("cannot determine default branch (detached HEAD, no main/master)".into()))
    }
}

/// `git worktree remove` without `--force` fails with a generic non-zero exit
/// when the tree is dirty; translate that into the typed error so callers
/// (Worktree Manager) don't have to string-match stderr themselves.
fn reinterpret_dirty_worktree(err: CrewError, path: &Path) -> CrewError {
    if let CrewError::Subprocess { stderr, .. } = &err {
        if stderr.contains("contains modified or untracked files") {
            return CrewError::UncommittedChanges {
                branch: path.display().to_string(),
            };
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            assert!(StdCommand::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .status()
                .unwrap()
                .success());
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);
        dir
    }

    #[test]
    fn current_branch_reports_initial_branch() {
        let dir = init_repo();
        let repo = Repository::at(dir.path());
        assert_eq!(repo.current_branch().unwrap(), Some("main".to_string()));
    }

    #[test]
    fn add_and_list_worktree_roundtrips() {
        let dir = init_repo();
        let repo = Repository::at(dir.path());
        let wt_path = dir.path().join("wt-1");
        repo.add_worktree(&wt_path, "crew-1", "main").unwrap();

        let worktrees = repo.list_worktrees().unwrap();
        assert!(worktrees.iter().any(|w| w.branch.as_deref() == Some("crew-1")));
        assert_eq!(
            repo.worktree_for_branch("crew-1").unwrap(),
            Some(dunce::canonicalize(&wt_path).unwrap_or(wt_path))
        );
    }

    #[test]
    fn remove_worktree_fails_when_dirty() {
        let dir = init_repo();
        let repo = Repository::at(dir.path());
        let wt_path = dir.path().join("wt-1");
        repo.add_worktree(&wt_path, "crew-1", "main").unwrap();
        std::fs::write(wt_path.join("dirty.txt"), "x").unwrap();

        let err = repo.remove_worktree(&wt_path, false).unwrap_err();
        assert!(matches!(err, CrewError::UncommittedChanges { .. }));

        // Force removal succeeds.
        repo.remove_worktree(&wt_path, true).unwrap();
        assert!(repo.worktree_for_branch("crew-1").unwrap().is_none());
    }

    #[test]
    fn orphaned_worktree_is_pruned_before_recreate() {
        let dir = init_repo();
        let repo = Repository::at(dir.path());
        let wt_path = dir.path().join("wt-3");
        repo.add_worktree(&wt_path, "crew-3", "main").unwrap();
        std::fs::remove_dir_all(&wt_path).unwrap();

        // git still lists it until pruned.
        assert!(repo.worktree_for_branch("crew-3").unwrap().is_some());
        repo.prune_worktrees().unwrap();
        assert!(repo.worktree_for_branch("crew-3").unwrap().is_none());

        repo.add_worktree(&wt_path, "crew-3", "main").unwrap();
        assert!(wt_path.exists());
    }

    #[test]
    fn merge_conflict_files_reports_empty_for_clean_merge() {
        let dir = init_repo();
        let repo = Repository::at(dir.path());
        let run = |args: &[&str]| {
            assert!(StdCommand::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .status()
                .unwrap()
                .success());
        };
        run(&["checkout", "-q", "-b", "crew-1"]);
        std::fs::write(dir.path().join("feature.txt"), "new\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "feature"]);
        run(&["checkout", "-q", "main"]);

        let conflicts = repo.merge_conflict_files("crew-1", "main").unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn merge_conflict_files_reports_conflicting_paths() {
        let dir = init_repo();
        let repo = Repository::at(dir.path());
        let run = |args: &[&str]| {
            assert!(StdCommand::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .status()
                .unwrap()
                .success());
        };
        run(&["checkout", "-q", "-b", "crew-1"]);
        std::fs::write(dir.path().join("README.md"), "branch change\n").unwrap();
        run(&["commit", "-q", "-am", "branch edit"]);
        run(&["checkout", "-q", "main"]);
        std::fs::write(dir.path().join("README.md"), "main change\n").unwrap();
        run(&["commit", "-q", "-am", "main edit"]);

        let conflicts = repo.merge_conflict_files("crew-1", "main").unwrap();
        assert_eq!(conflicts, vec!["README.md".to_string()]);
    }
}
