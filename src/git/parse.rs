//! Porcelain output parsing, grounded on the teacher crate's worktree parsing
//! (blank line separates entries; `branch refs/heads/<x>` yields `<x>`;
//! detached entries carry no branch).

use std::path::PathBuf;

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: String,
    pub branch: Option<String>,
    pub bare: bool,
    pub detached: bool,
}

/// Parse the full `--porcelain` output of `git worktree list`.
///
/// Entries are separated by blank lines. Each entry starts with `worktree
/// <path>`, followed by `HEAD <sha>`, then either `branch refs/heads/<name>`,
/// `detached`, or `bare`.
pub fn parse_worktree_porcelain(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head = String::new();
    let mut branch = None;
    let mut bare = false;
    let mut detached = false;

    let flush = |entries: &mut Vec<WorktreeEntry>,
                 path: &mut Option<PathBuf>,
                 head: &mut String,
                 branch: &mut Option<String>,
                 bare: &mut bool,
                 detached: &mut bool| {
        if let Some(p) = path.take() {
            entries.push(WorktreeEntry {
                path: p,
                head: std::mem::take(head),
                branch: branch.take(),
                bare: *bare,
                detached: *detached,
            });
        }
        *bare = false;
        *detached = false;
    };

    for line in output.lines() {
        if line.is_empty() {
            flush(&mut entries, &mut path, &mut head, &mut branch, &mut bare, &mut detached);
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            flush(&mut entries, &mut path, &mut head, &mut branch, &mut bare, &mut detached);
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(
                rest.strip_prefix("refs/heads/")
                    .unwrap_or(rest)
                    .to_string(),
            );
        } else if line == "bare" {
            bare = true;
        } else if line == "detached" {
            detached = true;
        }
    }
    flush(&mut entries, &mut path, &mut head, &mut branch, &mut bare, &mut detached);
    entries
}

/// Extract the set of conflicting file paths from `git merge-tree
/// --name-only` output. The first line is always the resulting tree OID
/// (present even on a clean merge) and must be skipped; remaining lines are
/// either `Auto-merging <path>`/`CONFLICT (...): ...` informational lines or
/// bare conflicting paths. Only call this on the conflict (exit code 1)
/// path — a clean merge's OID-only output is not meaningful input here.
pub fn parse_conflict_files(output: &str) -> Vec<String> {
    let mut files: Vec<String> = output
        .lines()
        .skip(1)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("Auto-merging"))
        .filter(|l| !l.starts_with("CONFLICT "))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_entries_with_branch_and_bare() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/wt-1\nHEAD def456\nbranch refs/heads/crew-1\n\nworktree /repo/.bare\nbare\n";
        let entries = parse_worktree_porcelain(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("crew-1"));
        assert!(entries[2].bare);
    }

    #[test]
    fn detached_entry_has_no_branch() {
        let output = "worktree /repo/wt-2\nHEAD abc123\ndetached\n";
        let entries = parse_worktree_porcelain(output);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].detached);
        assert!(entries[0].branch.is_none());
    }

    #[test]
    fn conflict_files_skips_oid_and_annotation_lines() {
        let output = "abc123def456\nAuto-merging f.txt\nCONFLICT (content): Merge conflict in f.txt\n";
        assert_eq!(parse_conflict_files(output), vec!["f.txt".to_string()]);
    }

    #[test]
    fn conflict_files_dedupes_and_sorts() {
        let output = "abc123\nCONFLICT (content): Merge conflict in b.txt\nb.txt\na.txt\na.txt\n";
        assert_eq!(
            parse_conflict_files(output),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );
    }
}
