//! `<id>.meta.json` and `meta.json` (namespace) schemas: strict JSON decode
//! with unknown-field rejection (spec §4.1 Parsing contract, §6 Persisted-state
//! format guarantees).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{CloseReason, Status, Task, TriState};
use crate::error::CrewError;

/// The machine-authoritative half of a task: everything that isn't in the
/// human-edited Markdown frontmatter/body. `deny_unknown_fields` enforces the
/// spec's "unknown keys rejected" contract; adding a field later is a schema
/// change, not a silent passthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskMeta {
    pub status: String,
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
    pub last_review_is_lgtm: Option<bool>,
}

impl TaskMeta {
    pub fn from_task(task: &Task) -> Self {
        TaskMeta {
            status: task.status.to_string(),
            close_reason: task.close_reason,
            block_reason: task.block_reason.clone(),
            created: task.created,
            started: task.started,
            agent: task.agent.clone(),
            session: task.session.clone(),
            base_branch: task.base_branch.clone(),
            issue: task.issue,
            pr: task.pr,
            status_version: task.status_version,
            auto_fix_retry_count: task.auto_fix_retry_count,
            review_count: task.review_count,
            last_review_at: task.last_review_at,
            last_review_is_lgtm: task.last_review_is_lgtm.as_bool_opt(),
        }
    }

    /// Validates the status string and required non-empty `base_branch`
    /// (spec §3, §4.1 Validation on read), returning the parsed [`Status`].
    pub fn validated_status(&self) -> Result<Status, CrewError> {
        super::task::normalize_status(&self.status).ok_or_else(|| {
            CrewError::Other(format!("invalid task status {:?}", self.status))
        })
    }

    pub fn apply_to(&self, task: &mut Task) -> Result<(), CrewError> {
        if self.base_branch.trim().is_empty() {
            return Err(CrewError::Other("base_branch must not be empty".into()));
        }
        task.status = self.validated_status()?;
        task.close_reason = self.close_reason;
        task.block_reason = self.block_reason.clone();
        task.created = self.created;
        task.started = self.started;
        task.agent = self.agent.clone();
        task.session = self.session.clone();
        task.base_branch = self.base_branch.clone();
        task.issue = self.issue;
        task.pr = self.pr;
        task.status_version = self.status_version;
        task.auto_fix_retry_count = self.auto_fix_retry_count;
        task.review_count = self.review_count;
        task.last_review_at = self.last_review_at;
        task.last_review_is_lgtm = TriState::from_bool_opt(self.last_review_is_lgtm);
        Ok(())
    }
}

/// Per-namespace allocator state (spec §3 Namespace meta, §4.1 ID allocation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceMeta {
    pub schema: i64,
    pub namespace: String,
    pub next_id: u64,
}

pub const CURRENT_SCHEMA: i64 = 1;

impl NamespaceMeta {
    pub fn new(namespace: impl Into<String>) -> Self {
        NamespaceMeta {
            schema: CURRENT_SCHEMA,
            namespace: namespace.into(),
            next_id: 1,
        }
    }
}

/// Decode JSON with unknown-field rejection and "exactly one top-level
/// object" enforcement (spec §4.1: "trailing content rejected").
pub fn decode_strict<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, CrewError> {
    let mut de = serde_json::Deserializer::from_str(text);
    let value: T = serde::de::Deserialize::deserialize(&mut de)
        .map_err(|e| CrewError::Other(format!("invalid JSON: {e}")))?;
    de.end()
        .map_err(|_| CrewError::Other("trailing content after JSON object".into()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_fields() {
        let text = r#"{"status":"todo","created":"2026-01-01T00:00:00Z","started":null,"agent":null,"session":null,"base_branch":"main","bogus":true}"#;
        let err = decode_strict::<TaskMeta>(text).unwrap_err();
        assert!(err.to_string().contains("invalid JSON") || err.to_string().contains("unknown"));
    }

    #[test]
    fn rejects_trailing_content() {
        let text = r#"{"status":"todo","created":"2026-01-01T00:00:00Z","started":null,"agent":null,"session":null,"base_branch":"main"} {"extra":1}"#;
        let err = decode_strict::<TaskMeta>(text).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn namespace_meta_repair_detects_drift() {
        let meta = NamespaceMeta {
            schema: CURRENT_SCHEMA,
            namespace: "default".into(),
            next_id: 1,
        };
        let existing_ids = [1u64, 2, 5];
        let max = *existing_ids.iter().max().unwrap();
        assert!(meta.next_id <= max);
    }
}
