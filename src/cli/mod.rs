//! Command-line surface (spec §6): one subcommand per verb, wired to the
//! lifecycle engine, store, and config loader in `main.rs`.
//!
//! The clap derive layout and styled-help convention are lifted from the
//! teacher crate's `cli.rs`; the help-pager/markdown-rendering machinery
//! there is specific to a long-form docs site and has no counterpart here,
//! so it is not carried over.

use clap::builder::styling::{AnsiColor, Color, Styles};
use clap::{Parser, Subcommand};

fn help_styles() -> Styles {
    Styles::styled()
        .header(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .usage(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .literal(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .placeholder(anstyle::Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .error(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
}

#[derive(Parser)]
#[command(name = "crew")]
#[command(about = "Turn a git repository into a multi-agent workspace", long_about = None)]
#[command(version)]
#[command(styles = help_styles())]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Working directory to treat as the repository root
    #[arg(short = 'C', global = true, value_name = "path")]
    pub directory: Option<std::path::PathBuf>,

    /// Namespace to operate in
    #[arg(long, global = true, default_value = "default")]
    pub namespace: String,

    /// Enable `crew=info` logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new task
    New {
        title: String,
        /// Base branch to fork from (defaults to the repo's default branch)
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        parent: Option<u64>,
        #[arg(long)]
        label: Vec<String>,
        #[arg(long)]
        skip_review: Option<bool>,
    },
    /// Start work on a task: create its worktree and worker session
    Start {
        id: u64,
        /// Explicit message overriding the agent's configured prompt
        #[arg(long)]
        message: Option<String>,
    },
    /// Print a single task
    Show { id: u64 },
    /// List tasks
    List {
        #[arg(long)]
        parent: Option<u64>,
        #[arg(long)]
        label: Vec<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Edit a task's title, description, or labels
    Edit {
        id: u64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Append a comment to a task
    Comment {
        id: u64,
        text: String,
        #[arg(long, default_value = "user")]
        author: String,
    },
    /// Mark work complete and move into review (or `reviewed` if skipped)
    Complete { id: u64 },
    /// Start (or advance) the review for a task awaiting review
    Review {
        id: u64,
        /// Record a verdict instead of starting the reviewer session
        #[arg(long)]
        lgtm: Option<bool>,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Merge a reviewed task into its base branch
    Merge { id: u64 },
    /// Abandon a task: stop its sessions and close it
    Abandon {
        id: u64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Attach to a task's running session (replaces the current process)
    Attach {
        id: u64,
        #[arg(long)]
        review: bool,
    },
    /// Capture the last N lines of a task's session
    Peek {
        id: u64,
        #[arg(long, default_value_t = 50)]
        lines: u32,
        #[arg(long)]
        review: bool,
    },
    /// Send literal keys to a task's session
    SendKeys {
        id: u64,
        keys: String,
        #[arg(long)]
        review: bool,
    },
    /// Show the diff between a task's branch and its base branch
    Diff { id: u64 },
    /// Change the effective review mode at runtime
    SetReviewMode { mode: String },
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Write a starter `.crew.toml` in the repo root
    Init,
    /// Print the merged config with per-key provenance
    Show,
}
