//! Worktree setup: file copying and the post-create setup command (spec §4.3
//! Setup, §9 worker `setup_script` expansion).
//!
//! Grounded on the teacher crate's `cow_copy` benchmark intent: prefer a
//! reflink (copy-on-write) clone when the filesystem supports it, falling
//! back to a recursive byte copy otherwise.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::command_executor::CommandExecutor;
use crate::error::CrewError;

/// What to materialize in a freshly created worktree.
#[derive(Debug, Clone, Default)]
pub struct WorktreeSetup {
    /// Paths, relative to the repo root, to copy into the worktree verbatim
    /// (e.g. `.env`, untracked config files agents need but git ignores).
    pub copy: Vec<PathBuf>,
    /// Shell command run in the worktree after copying, via `sh -c`.
    pub setup_command: Option<String>,
    /// Paths written by the worker agent's own `setup_script` (e.g. hook
    /// files, editor plugin scaffolding) that must stay out of any commit.
    pub exclude_after_setup: Vec<PathBuf>,
}

pub fn apply(
    executor: &CommandExecutor,
    repo_root: &Path,
    worktree_path: &Path,
    setup: &WorktreeSetup,
) -> Result<(), CrewError> {
    for rel in &setup.copy {
        copy_one(repo_root, worktree_path, rel)?;
    }

    if let Some(command) = &setup.setup_command {
        if !command.trim().is_empty() {
            executor.run_checked(command, worktree_path)?;
        }
    }

    if !setup.exclude_after_setup.is_empty() {
        append_git_exclude(worktree_path, &setup.exclude_after_setup)?;
    }

    Ok(())
}

fn copy_one(repo_root: &Path, worktree_path: &Path, rel: &Path) -> Result<(), CrewError> {
    let src = repo_root.join(rel);
    if !src.exists() {
        return Ok(());
    }
    let dst = worktree_path.join(rel);
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CrewError::io("creating worktree parent dir", e))?;
    }

    if src.is_dir() {
        copy_dir_recursive(&src, &dst)
    } else {
        reflink_or_copy(&src, &dst)
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), CrewError> {
    std::fs::create_dir_all(dst).map_err(|e| CrewError::io("creating destination directory", e))?;
    for entry in std::fs::read_dir(src).map_err(|e| CrewError::io("reading source directory", e))? {
        let entry = entry.map_err(|e| CrewError::io("reading directory entry", e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            reflink_or_copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Reflink (copy-on-write) when the filesystem supports it; falls back to a
/// plain byte copy otherwise (e.g. across filesystems, or on platforms
/// without reflink support).
fn reflink_or_copy(src: &Path, dst: &Path) -> Result<(), CrewError> {
    match reflink_copy::reflink(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dst).map_err(|e| CrewError::io(format!("copying {} into worktree", src.display()), e))?;
            Ok(())
        }
    }
}

/// Append `paths` to `<worktree>/.git/info/exclude`, the per-worktree,
/// never-shared ignore list — agent scaffolding this writes must never show
/// up as untracked changes to commit (spec §9).
fn append_git_exclude(worktree_path: &Path, paths: &[PathBuf]) -> Result<(), CrewError> {
    let git_dir = worktree_path.join(".git");
    let info_dir = if git_dir.is_dir() {
        git_dir.join("info")
    } else {
        // A linked worktree's `.git` is a file pointing at the real gitdir.
        let pointer = std::fs::read_to_string(&git_dir).map_err(|e| CrewError::io("reading .git pointer file", e))?;
        let real_dir = pointer
            .trim()
            .strip_prefix("gitdir: ")
            .ok_or_else(|| CrewError::Other("malformed .git pointer file".into()))?;
        PathBuf::from(real_dir).join("info")
    };
    std::fs::create_dir_all(&info_dir).map_err(|e| CrewError::io("creating .git/info", e))?;

    let exclude_path = info_dir.join("exclude");
    let existing = std::fs::read_to_string(&exclude_path).unwrap_or_default();
    let existing_lines: std::collections::HashSet<&str> = existing.lines().collect();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut additions = String::new();
    for path in paths {
        let line = path.to_string_lossy().into_owned();
        if !existing_lines.contains(line.as_str()) && seen.insert(line.clone()) {
            additions.push_str(&line);
            additions.push('\n');
        }
    }
    if additions.is_empty() {
        return Ok(());
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&exclude_path)
        .map_err(|e| CrewError::io("opening .git/info/exclude", e))?;
    file.write_all(additions.as_bytes()).map_err(|e| CrewError::io("writing .git/info/exclude", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copies_file_into_worktree() {
        let repo = TempDir::new().unwrap();
        let worktree = TempDir::new().unwrap();
        std::fs::write(repo.path().join(".env"), "SECRET=1\n").unwrap();

        let executor = CommandExecutor::new();
        let setup = WorktreeSetup { copy: vec![PathBuf::from(".env")], ..Default::default() };
        apply(&executor, repo.path(), worktree.path(), &setup).unwrap();

        assert_eq!(std::fs::read_to_string(worktree.path().join(".env")).unwrap(), "SECRET=1\n");
    }

    #[test]
    fn runs_setup_command_in_worktree_dir() {
        let repo = TempDir::new().unwrap();
        let worktree = TempDir::new().unwrap();
        let executor = CommandExecutor::new();
        let setup = WorktreeSetup {
            setup_command: Some("touch setup-ran.txt".to_string()),
            ..Default::default()
        };
        apply(&executor, repo.path(), worktree.path(), &setup).unwrap();
        assert!(worktree.path().join("setup-ran.txt").exists());
    }

    #[test]
    fn setup_command_failure_propagates() {
        let repo = TempDir::new().unwrap();
        let worktree = TempDir::new().unwrap();
        let executor = CommandExecutor::new();
        let setup = WorktreeSetup {
            setup_command: Some("exit 1".to_string()),
            ..Default::default()
        };
        let err = apply(&executor, repo.path(), worktree.path(), &setup).unwrap_err();
        assert!(matches!(err, CrewError::Subprocess { .. }));
    }

    #[test]
    fn excluded_paths_land_in_git_info_exclude() {
        let worktree = TempDir::new().unwrap();
        std::fs::create_dir_all(worktree.path().join(".git")).unwrap();
        append_git_exclude(worktree.path(), &[PathBuf::from(".claude-hooks/")]).unwrap();
        let text = std::fs::read_to_string(worktree.path().join(".git/info/exclude")).unwrap();
        assert!(text.contains(".claude-hooks/"));

        // Re-appending the same path does not duplicate it.
        append_git_exclude(worktree.path(), &[PathBuf::from(".claude-hooks/")]).unwrap();
        let text2 = std::fs::read_to_string(worktree.path().join(".git/info/exclude")).unwrap();
        assert_eq!(text2.matches(".claude-hooks/").count(), 1);
    }
}
