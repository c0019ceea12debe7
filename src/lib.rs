//! Orchestrates a git repository into a multi-agent workspace: one task per
//! branch, worktree, and interactive agent session.
//!
//! Module map (see `SPEC_FULL.md` for the full contract of each):
//!   - [`store`]: the Task Store (Markdown + JSON persistence, locking, ids).
//!   - [`worktree`]: the Worktree Manager (git worktree lifecycle).
//!   - [`session`]: the Session Manager (tmux multiplexer + agent IPC).
//!   - [`config`]: layered TOML configuration.
//!   - [`agent`]: agent registry, inheritance, and command rendering.
//!   - [`lifecycle`]: the task status transition state machine.
//!   - [`git`]: the git porcelain adapter.
//!   - [`cli`]: the command-line surface.

pub mod agent;
pub mod clock;
pub mod cli;
pub mod command_executor;
pub mod config;
pub mod error;
pub mod git;
pub mod lifecycle;
pub mod session;
pub mod store;
pub mod styling;
pub mod worktree;

pub use error::CrewError;
