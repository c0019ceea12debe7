//! Error taxonomy and exit-code mapping (spec §6, §7).
//!
//! Grounded on the teacher crate's `git::GitError`: a hand-rolled enum with a
//! manual `Display` impl rather than `thiserror`, because several variants
//! need bespoke multi-line formatting (the merge-conflict remediation block)
//! that a derive macro can't express cleanly.

use std::fmt;
use std::path::PathBuf;

/// The single error type returned across component boundaries (Store, Worktree
/// Manager, Session Manager, Lifecycle State Machine). Adapters (git, tmux,
/// subprocess) wrap their own failures into this type at the point they cross
/// into core logic.
#[derive(Debug)]
pub enum CrewError {
    // ---- Not-found (exit 3) ----
    TaskNotFound { namespace: String, id: u64 },
    CommentNotFound { id: u64, index: usize },
    WorktreeNotFound { branch: String },
    NoSession { name: String },
    AgentNotFound { name: String },

    // ---- Precondition (exit 4-9) ----
    InvalidTransition {
        from: String,
        to: String,
    },
    UncommittedChanges {
        branch: String,
    },
    SessionRunning {
        name: String,
    },
    MergeConflict {
        branch: String,
        base_branch: String,
        files: Vec<String>,
    },
    AgentDisabled {
        name: String,
    },
    EmptyTitle,
    EmptyMessage,
    InvalidParentID {
        reason: String,
    },
    InvalidReviewMode {
        value: String,
    },
    InvalidCommentMeta {
        reason: String,
    },
    InvalidBranch {
        branch: String,
    },

    // ---- State (exit 10) ----
    NotInitialized {
        path: PathBuf,
    },
    ConfigExists {
        path: PathBuf,
    },
    ConfigSchemaMismatch {
        expected: i64,
        found: i64,
    },

    // ---- IO / External (exit 1 or 10) ----
    Io {
        context: String,
        source: std::io::Error,
    },
    Subprocess {
        command: String,
        exit_info: String,
        stderr: String,
    },
    /// Any other failure, carrying an already-formatted cause chain.
    Other(String),
}

impl CrewError {
    /// Exit code as defined by spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            CrewError::TaskNotFound { .. }
            | CrewError::CommentNotFound { .. }
            | CrewError::WorktreeNotFound { .. } => 3,
            CrewError::InvalidTransition { .. } => 4,
            CrewError::MergeConflict { .. } => 5,
            CrewError::UncommittedChanges { .. } => 6,
            CrewError::SessionRunning { .. } => 7,
            CrewError::NoSession { .. } => 8,
            CrewError::AgentNotFound { .. } | CrewError::AgentDisabled { .. } => 9,
            CrewError::NotInitialized { .. }
            | CrewError::ConfigExists { .. }
            | CrewError::ConfigSchemaMismatch { .. } => 10,
            CrewError::EmptyTitle
            | CrewError::EmptyMessage
            | CrewError::InvalidParentID { .. }
            | CrewError::InvalidReviewMode { .. }
            | CrewError::InvalidCommentMeta { .. }
            | CrewError::InvalidBranch { .. } => 2,
            CrewError::Io { .. } | CrewError::Subprocess { .. } | CrewError::Other(_) => 1,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CrewError::Io {
            context: context.into(),
            source,
        }
    }
}

impl fmt::Display for CrewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrewError::TaskNotFound { namespace, id } => {
                write!(f, "task {namespace}/{id} not found")
            }
            CrewError::CommentNotFound { id, index } => {
                write!(f, "task {id} has no comment at index {index}")
            }
            CrewError::WorktreeNotFound { branch } => write!(f, "no worktree for branch {branch}"),
            CrewError::NoSession { name } => write!(f, "no running session named {name}"),
            CrewError::AgentNotFound { name } => write!(f, "unknown agent {name}"),
            CrewError::InvalidTransition { from, to } => {
                write!(f, "cannot transition from {from} to {to}")
            }
            CrewError::UncommittedChanges { branch } => {
                write!(f, "worktree for {branch} has uncommitted changes")
            }
            CrewError::SessionRunning { name } => write!(f, "session {name} is already running"),
            CrewError::MergeConflict {
                branch,
                base_branch,
                files,
            } => {
                writeln!(f, "merge conflict between {branch} and {base_branch}:")?;
                for file in files {
                    writeln!(f, "  - {file}")?;
                }
                write!(
                    f,
                    "resolve the conflicts in the task worktree, commit, then retry"
                )
            }
            CrewError::AgentDisabled { name } => write!(f, "agent {name} is disabled"),
            CrewError::EmptyTitle => write!(f, "title must not be empty"),
            CrewError::EmptyMessage => write!(f, "message must not be empty"),
            CrewError::InvalidParentID { reason } => write!(f, "invalid parent id: {reason}"),
            CrewError::InvalidReviewMode { value } => {
                write!(f, "invalid review mode {value:?} (want auto|manual|auto_fix)")
            }
            CrewError::InvalidCommentMeta { reason } => {
                write!(f, "invalid comment metadata: {reason}")
            }
            CrewError::InvalidBranch { branch } => {
                write!(f, "{branch} is not a valid crew branch (want crew-<N>[-gh-<M>])")
            }
            CrewError::NotInitialized { path } => {
                write!(f, "{} is not initialized (run `crew config init`)", path.display())
            }
            CrewError::ConfigExists { path } => {
                write!(f, "config already exists at {}", path.display())
            }
            CrewError::ConfigSchemaMismatch { expected, found } => write!(
                f,
                "config schema mismatch: expected {expected}, found {found}"
            ),
            CrewError::Io { context, source } => write!(f, "{context}: {source}"),
            CrewError::Subprocess {
                command,
                exit_info,
                stderr,
            } => {
                write!(f, "command `{command}` failed ({exit_info})")?;
                if !stderr.trim().is_empty() {
                    write!(f, ":\n{stderr}")?;
                }
                Ok(())
            }
            CrewError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CrewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrewError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec_table() {
        assert_eq!(
            CrewError::TaskNotFound {
                namespace: "default".into(),
                id: 1
            }
            .exit_code(),
            3
        );
        assert_eq!(
            CrewError::InvalidTransition {
                from: "done".into(),
                to: "todo".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            CrewError::MergeConflict {
                branch: "crew-1".into(),
                base_branch: "main".into(),
                files: vec![]
            }
            .exit_code(),
            5
        );
        assert_eq!(
            CrewError::UncommittedChanges {
                branch: "crew-1".into()
            }
            .exit_code(),
            6
        );
        assert_eq!(
            CrewError::SessionRunning {
                name: "crew-1".into()
            }
            .exit_code(),
            7
        );
        assert_eq!(CrewError::NoSession { name: "crew-1".into() }.exit_code(), 8);
        assert_eq!(
            CrewError::AgentNotFound { name: "claude".into() }.exit_code(),
            9
        );
        assert_eq!(
            CrewError::NotInitialized { path: PathBuf::from("/tmp") }.exit_code(),
            10
        );
    }

    #[test]
    fn merge_conflict_display_lists_files() {
        let err = CrewError::MergeConflict {
            branch: "crew-7".into(),
            base_branch: "main".into(),
            files: vec!["src/lib.rs".into(), "Cargo.toml".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("crew-7"));
        assert!(msg.contains("src/lib.rs"));
        assert!(msg.contains("Cargo.toml"));
    }
}
