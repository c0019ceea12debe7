//! Task and Comment data model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle status (spec §4.2). Serialized to/from the string form stored in
/// `<id>.meta.json`; unrecognized-but-legacy strings are mapped by
/// [`normalize_status`] rather than rejected outright.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Todo,
    InProgress,
    NeedsInput,
    Blocked,
    ForReview,
    InReview,
    Reviewed,
    Done,
    Closed,
    Error,
}

impl Status {
    /// Terminal statuses can still be re-opened by `abandon` per the open
    /// question in spec §9 — see DESIGN.md for the recorded decision.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Closed)
    }
}

/// Maps status strings written by older schema versions onto current states.
/// Returns `None` for strings that are neither current nor legacy (a hard
/// parse error at the call site, per spec §4.1 "Validation on read").
pub fn normalize_status(raw: &str) -> Option<Status> {
    use std::str::FromStr;
    if let Ok(status) = Status::from_str(raw) {
        return Some(status);
    }
    // Legacy aliases observed in task stores created by pre-1.0 schemas.
    match raw {
        "in-progress" | "started" => Some(Status::InProgress),
        "review" | "pending_review" => Some(Status::ForReview),
        "merged" => Some(Status::Done),
        "abandoned" | "cancelled" => Some(Status::Closed),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    #[default]
    None,
    Merged,
    Abandoned,
}

/// Tri-state flag: unset (inherit from config), or explicitly true/false.
/// `false` is distinct from unset because an explicit `false` on the task
/// must override a `true` default in config (spec §3, §8 invariant 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    #[default]
    Unset,
    True,
    False,
}

impl TriState {
    pub fn resolve(self, config_default: bool) -> bool {
        match self {
            TriState::Unset => config_default,
            TriState::True => true,
            TriState::False => false,
        }
    }

    pub fn from_bool_opt(v: Option<bool>) -> Self {
        match v {
            None => TriState::Unset,
            Some(true) => TriState::True,
            Some(false) => TriState::False,
        }
    }

    pub fn as_bool_opt(self) -> Option<bool> {
        match self {
            TriState::Unset => None,
            TriState::True => Some(true),
            TriState::False => Some(false),
        }
    }
}

impl Serialize for TriState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_bool_opt().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TriState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Option::<bool>::deserialize(deserializer)?;
        Ok(TriState::from_bool_opt(v))
    }
}

/// A unit of work: identity `(namespace, id)`, tracked through the lifecycle
/// state machine and materialized as `<id>.md` + `<id>.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(skip)]
    pub namespace: String,
    pub id: u64,

    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub skip_review: TriState,

    pub status: Status,
    #[serde(default)]
    pub close_reason: CloseReason,
    #[serde(default)]
    pub block_reason: Option<String>,

    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,

    pub agent: Option<String>,
    pub session: Option<String>,

    pub base_branch: String,

    #[serde(default)]
    pub issue: Option<u64>,
    #[serde(default)]
    pub pr: Option<u64>,

    #[serde(default)]
    pub status_version: u64,

    #[serde(default)]
    pub auto_fix_retry_count: u64,

    #[serde(default)]
    pub review_count: u64,
    #[serde(default)]
    pub last_review_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_review_is_lgtm: TriState,
}

impl Task {
    /// A freshly-created task, in `Todo`, with no session/agent yet.
    pub fn new(namespace: impl Into<String>, id: u64, title: impl Into<String>, base_branch: impl Into<String>, now: DateTime<Utc>) -> Self {
        Task {
            namespace: namespace.into(),
            id,
            title: title.into(),
            description: String::new(),
            labels: BTreeSet::new(),
            parent_id: None,
            skip_review: TriState::Unset,
            status: Status::Todo,
            close_reason: CloseReason::None,
            block_reason: None,
            created: now,
            started: None,
            agent: None,
            session: None,
            base_branch: base_branch.into(),
            issue: None,
            pr: None,
            status_version: 0,
            auto_fix_retry_count: 0,
            review_count: 0,
            last_review_at: None,
            last_review_is_lgtm: TriState::Unset,
        }
    }

    /// The git branch this task's worktree lives on (spec §4.3 naming
    /// convention: `crew-<N>[-gh-<M>]`).
    pub fn branch_name(&self) -> String {
        match self.issue {
            Some(n) if n != 0 => format!("crew-{}-gh-{}", self.id, n),
            _ => format!("crew-{}", self.id),
        }
    }

    pub fn worker_session_name(&self) -> String {
        format!("crew-{}", self.id)
    }

    pub fn reviewer_session_name(&self) -> String {
        format!("crew-{}-review", self.id)
    }
}

/// Type tag for a comment (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommentType {
    Report,
    Friction,
    Review,
    Note,
}

/// An append-only comment on a task. `index` must equal the comment's
/// position in the task's comment log (spec §8 invariant 3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub index: usize,
    pub author: String,
    pub time: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub r#type: Option<CommentType>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: std::collections::BTreeMap<String, String>,
}
