//! The Task Store (spec §4.1): a file-backed, crash-safe, concurrently-accessed
//! repository of tasks and comments, namespace-scoped, with monotonic ID
//! allocation and self-repair on init.

mod frontmatter;
mod lock;
mod meta;
mod task;

pub use frontmatter::FrontMatter;
pub use meta::{NamespaceMeta, TaskMeta, CURRENT_SCHEMA};
pub use task::{CloseReason, Comment, CommentType, Status, Task, TriState, normalize_status};
pub(crate) use lock::{write_atomic, NamespaceLock};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::clock::Clock;
use crate::error::CrewError;

/// Filter applied by [`Store::list`] (spec §4.1 `List(filter)`).
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub parent_id: Option<u64>,
    /// Set-AND semantics: a task must carry every label in this set.
    pub labels: BTreeSet<String>,
    pub status: Option<Status>,
}

/// Result of [`Store::initialize_namespace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitResult {
    pub repaired: bool,
    pub next_id: u64,
}

/// A file-backed task store rooted at `<crewDir>/tasks/`.
pub struct Store {
    root: PathBuf,
    clock: std::sync::Arc<dyn Clock>,
}

impl Store {
    pub fn new(crew_dir: impl Into<PathBuf>, clock: std::sync::Arc<dyn Clock>) -> Self {
        Store {
            root: crew_dir.into().join("tasks"),
            clock,
        }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn task_md_path(&self, namespace: &str, id: u64) -> PathBuf {
        self.namespace_dir(namespace).join(format!("{id}.md"))
    }

    fn task_meta_path(&self, namespace: &str, id: u64) -> PathBuf {
        self.namespace_dir(namespace).join(format!("{id}.meta.json"))
    }

    fn namespace_meta_path(&self, namespace: &str) -> PathBuf {
        self.namespace_dir(namespace).join("meta.json")
    }

    /// Ensure the namespace directory and `meta.json` exist, repairing
    /// `next_id` if it is not strictly greater than the max existing task id
    /// (spec §4.1 ID allocation, §8 scenario 4).
    pub fn initialize_namespace(&self, namespace: &str) -> Result<InitResult, CrewError> {
        let ns_dir = self.namespace_dir(namespace);
        std::fs::create_dir_all(&ns_dir).map_err(|e| CrewError::io("creating namespace dir", e))?;
        let _guard = lock::NamespaceLock::exclusive(&lock::lock_path(&ns_dir))?;

        let meta_path = self.namespace_meta_path(namespace);
        let mut meta = if meta_path.exists() {
            let text = std::fs::read_to_string(&meta_path).map_err(|e| CrewError::io("reading meta.json", e))?;
            meta::decode_strict::<NamespaceMeta>(&text)?
        } else {
            NamespaceMeta::new(namespace)
        };

        let max_existing = self.max_existing_id(&ns_dir)?;
        let mut repaired = false;
        if meta.next_id <= max_existing {
            meta.next_id = max_existing + 1;
            repaired = true;
        }
        if !meta_path.exists() || repaired {
            lock::write_atomic(&meta_path, &serde_json::to_string_pretty(&meta).unwrap())?;
        }

        Ok(InitResult { repaired, next_id: meta.next_id })
    }

    fn max_existing_id(&self, ns_dir: &Path) -> Result<u64, CrewError> {
        let mut max = 0u64;
        if !ns_dir.exists() {
            return Ok(max);
        }
        for entry in std::fs::read_dir(ns_dir).map_err(|e| CrewError::io("reading namespace dir", e))? {
            let entry = entry.map_err(|e| CrewError::io("reading dir entry", e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".md") {
                if let Ok(id) = stem.parse::<u64>() {
                    max = max.max(id);
                }
            }
        }
        Ok(max)
    }

    /// Allocate the next id for `namespace` under the exclusive lock,
    /// persisting `next_id + 1` (spec §4.1 `NextID`, §8 invariant 2).
    pub fn next_id(&self, namespace: &str) -> Result<u64, CrewError> {
        let ns_dir = self.namespace_dir(namespace);
        std::fs::create_dir_all(&ns_dir).map_err(|e| CrewError::io("creating namespace dir", e))?;
        let _guard = lock::NamespaceLock::exclusive(&lock::lock_path(&ns_dir))?;

        let meta_path = self.namespace_meta_path(namespace);
        let mut meta = if meta_path.exists() {
            let text = std::fs::read_to_string(&meta_path).map_err(|e| CrewError::io("reading meta.json", e))?;
            meta::decode_strict::<NamespaceMeta>(&text)?
        } else {
            NamespaceMeta::new(namespace)
        };

        let id = meta.next_id;
        meta.next_id += 1;
        lock::write_atomic(&meta_path, &serde_json::to_string_pretty(&meta).unwrap())?;
        Ok(id)
    }

    /// Fetch a task by id. `Ok(None)` when neither file exists; an error when
    /// only one half of the pair is present (spec §4.1 `Get`).
    pub fn get(&self, namespace: &str, id: u64) -> Result<Option<Task>, CrewError> {
        let ns_dir = self.namespace_dir(namespace);
        let _guard = lock::NamespaceLock::shared(&lock::lock_path(&ns_dir))?;
        self.get_locked(namespace, id)
    }

    fn get_locked(&self, namespace: &str, id: u64) -> Result<Option<Task>, CrewError> {
        let md_path = self.task_md_path(namespace, id);
        let meta_path = self.task_meta_path(namespace, id);
        let md_exists = md_path.exists();
        let meta_exists = meta_path.exists();

        match (md_exists, meta_exists) {
            (false, false) => Ok(None),
            (true, false) | (false, true) => Err(CrewError::Other(format!(
                "task {namespace}/{id} is half-persisted (md={md_exists}, meta={meta_exists})"
            ))),
            (true, true) => {
                let md_text = std::fs::read_to_string(&md_path).map_err(|e| CrewError::io("reading task md", e))?;
                let meta_text = std::fs::read_to_string(&meta_path).map_err(|e| CrewError::io("reading task meta", e))?;
                let parsed = frontmatter::parse(&md_text)?;
                let meta: TaskMeta = meta::decode_strict(&meta_text)?;

                let mut task = Task::new(namespace, id, parsed.front_matter.title.clone(), meta.base_branch.clone(), meta.created);
                task.description = parsed.description;
                task.labels = parsed.front_matter.labels;
                task.parent_id = parsed.front_matter.parent_id;
                task.skip_review = TriState::from_bool_opt(parsed.front_matter.skip_review);
                meta.apply_to(&mut task)?;
                Ok(Some(task))
            }
        }
    }

    fn read_comments(&self, namespace: &str, id: u64) -> Result<Vec<Comment>, CrewError> {
        let md_path = self.task_md_path(namespace, id);
        let text = std::fs::read_to_string(&md_path).map_err(|e| CrewError::io("reading task md", e))?;
        Ok(frontmatter::parse(&text)?.comments)
    }

    /// List tasks in `namespace`, sorted ascending by id, filtered per
    /// [`ListFilter`] (spec §4.1 `List`, §8 invariant 4).
    pub fn list(&self, namespace: &str, filter: &ListFilter) -> Result<Vec<Task>, CrewError> {
        let ns_dir = self.namespace_dir(namespace);
        if !ns_dir.exists() {
            return Ok(vec![]);
        }
        let _guard = lock::NamespaceLock::shared(&lock::lock_path(&ns_dir))?;

        let mut ids: Vec<u64> = std::fs::read_dir(&ns_dir)
            .map_err(|e| CrewError::io("reading namespace dir", e))?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.strip_suffix(".md")).and_then(|n| n.parse::<u64>().ok()))
            .collect();
        ids.sort_unstable();

        let mut tasks = Vec::new();
        for id in ids {
            let Some(task) = self.get_locked(namespace, id)? else { continue };
            if let Some(parent) = filter.parent_id {
                if task.parent_id != Some(parent) {
                    continue;
                }
            }
            if !filter.labels.is_subset(&task.labels) {
                continue;
            }
            if let Some(status) = filter.status {
                if task.status != status {
                    continue;
                }
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Equivalent to `list({parent_id: Some(parent_id)})` (spec §4.1
    /// `GetChildren`).
    pub fn get_children(&self, namespace: &str, parent_id: u64) -> Result<Vec<Task>, CrewError> {
        self.list(namespace, &ListFilter { parent_id: Some(parent_id), ..Default::default() })
    }

    /// Insert or overwrite a task, preserving existing comments (spec §4.1
    /// `Save`).
    pub fn save(&self, task: &Task) -> Result<(), CrewError> {
        let ns_dir = self.namespace_dir(&task.namespace);
        std::fs::create_dir_all(&ns_dir).map_err(|e| CrewError::io("creating namespace dir", e))?;
        let _guard = lock::NamespaceLock::exclusive(&lock::lock_path(&ns_dir))?;
        let existing_comments = self.read_comments(&task.namespace, task.id).unwrap_or_default();
        self.write_task_locked(task, &existing_comments)
    }

    /// Single-transaction update of both files with an explicit comment list
    /// (spec §4.1 `SaveTaskWithComments`).
    pub fn save_with_comments(&self, task: &Task, comments: &[Comment]) -> Result<(), CrewError> {
        let ns_dir = self.namespace_dir(&task.namespace);
        std::fs::create_dir_all(&ns_dir).map_err(|e| CrewError::io("creating namespace dir", e))?;
        let _guard = lock::NamespaceLock::exclusive(&lock::lock_path(&ns_dir))?;
        self.write_task_locked(task, comments)
    }

    /// Walk `task.parent_id` up the ancestor chain, rejecting both self- and
    /// longer cyclic parenthood (spec §3). Bounded by the namespace's
    /// existing task count so a corrupt chain can't loop forever. Uses
    /// [`Store::get_locked`] rather than [`Store::get`] since the caller
    /// already holds the namespace's exclusive lock.
    fn reject_cyclic_parent(&self, task: &Task) -> Result<(), CrewError> {
        let Some(mut parent_id) = task.parent_id else { return Ok(()) };
        let ns_dir = self.namespace_dir(&task.namespace);
        let limit = self.max_existing_id(&ns_dir)?;

        for _ in 0..=limit {
            if parent_id == task.id {
                return Err(CrewError::InvalidParentID { reason: "parent chain forms a cycle".into() });
            }
            match self.get_locked(&task.namespace, parent_id)?.and_then(|t| t.parent_id) {
                Some(next) => parent_id = next,
                None => return Ok(()),
            }
        }
        Err(CrewError::InvalidParentID { reason: "parent chain forms a cycle".into() })
    }

    fn write_task_locked(&self, task: &Task, comments: &[Comment]) -> Result<(), CrewError> {
        if task.title.trim().is_empty() {
            return Err(CrewError::EmptyTitle);
        }
        if task.base_branch.trim().is_empty() {
            return Err(CrewError::Other("base_branch must not be empty".into()));
        }
        if task.parent_id == Some(task.id) {
            return Err(CrewError::InvalidParentID { reason: "task cannot be its own parent".into() });
        }
        self.reject_cyclic_parent(task)?;

        let fm = FrontMatter {
            title: task.title.clone(),
            labels: task.labels.clone(),
            parent_id: task.parent_id,
            skip_review: task.skip_review.as_bool_opt(),
        };
        let md = frontmatter::render(&fm, &task.description, comments);
        let meta = TaskMeta::from_task(task);
        let meta_json = serde_json::to_string_pretty(&meta).map_err(|e| CrewError::Other(e.to_string()))?;

        lock::write_atomic(&self.task_md_path(&task.namespace, task.id), &md)?;
        lock::write_atomic(&self.task_meta_path(&task.namespace, task.id), &meta_json)?;
        Ok(())
    }

    /// Append a comment, assigning `index = comments.len()` (spec §4.1
    /// `AddComment`).
    pub fn add_comment(&self, namespace: &str, id: u64, author: &str, text: &str, kind: Option<CommentType>) -> Result<Comment, CrewError> {
        if text.trim().is_empty() {
            return Err(CrewError::EmptyMessage);
        }
        let ns_dir = self.namespace_dir(namespace);
        let _guard = lock::NamespaceLock::exclusive(&lock::lock_path(&ns_dir))?;
        let task = self.get_locked(namespace, id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: namespace.to_string(), id })?;
        let mut comments = self.read_comments(namespace, id)?;
        let comment = Comment {
            index: comments.len(),
            author: author.to_string(),
            time: self.clock.now(),
            text: text.trim().to_string(),
            r#type: kind,
            tags: BTreeSet::new(),
            metadata: Default::default(),
        };
        comments.push(comment.clone());
        self.write_task_locked(&task, &comments)?;
        Ok(comment)
    }

    /// Replace the comment at `index` in place (spec §4.1 `UpdateComment`).
    pub fn update_comment(&self, namespace: &str, id: u64, index: usize, text: Option<String>, tags: Option<BTreeSet<String>>, metadata: Option<std::collections::BTreeMap<String, String>>) -> Result<Comment, CrewError> {
        let ns_dir = self.namespace_dir(namespace);
        let _guard = lock::NamespaceLock::exclusive(&lock::lock_path(&ns_dir))?;
        let task = self.get_locked(namespace, id)?.ok_or_else(|| CrewError::TaskNotFound { namespace: namespace.to_string(), id })?;
        let mut comments = self.read_comments(namespace, id)?;
        let comment = comments.get_mut(index).ok_or(CrewError::CommentNotFound { id, index })?;
        if let Some(text) = text {
            if text.trim().is_empty() {
                return Err(CrewError::EmptyMessage);
            }
            comment.text = text;
        }
        if let Some(tags) = tags {
            comment.tags = tags;
        }
        if let Some(metadata) = metadata {
            comment.metadata = metadata;
        }
        let updated = comment.clone();
        self.write_task_locked(&task, &comments)?;
        Ok(updated)
    }

    /// Remove both files for a task. Idempotent when already absent (spec
    /// §4.1 `Delete`).
    pub fn delete(&self, namespace: &str, id: u64) -> Result<(), CrewError> {
        let ns_dir = self.namespace_dir(namespace);
        let _guard = lock::NamespaceLock::exclusive(&lock::lock_path(&ns_dir))?;
        let md = self.task_md_path(namespace, id);
        let meta = self.task_meta_path(namespace, id);
        if md.exists() {
            std::fs::remove_file(&md).map_err(|e| CrewError::io("deleting task md", e))?;
        }
        if meta.exists() {
            std::fs::remove_file(&meta).map_err(|e| CrewError::io("deleting task meta", e))?;
        }
        Ok(())
    }

    // ---- Optional snapshot/remote-sync capabilities (spec §9) ----
    // No-op defaults: they exist so callers can depend on the capability
    // without the core depending on any implementation ever overriding it.

    pub fn save_snapshot(&self, _label: &str) -> Result<(), CrewError> {
        Ok(())
    }

    pub fn list_snapshots(&self) -> Result<Vec<String>, CrewError> {
        Ok(vec![])
    }

    pub fn push(&self, _remote: &str) -> Result<(), CrewError> {
        Ok(())
    }

    pub fn fetch_remote(&self, _remote: &str) -> Result<(), CrewError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let store = Store::new(dir.path(), clock);
        (dir, store)
    }

    #[test]
    fn new_start_complete_merge_flow_persists_and_reloads() {
        let (_dir, store) = store();
        store.initialize_namespace("default").unwrap();
        let id = store.next_id("default").unwrap();
        assert_eq!(id, 1);

        let task = Task::new("default", id, "Task X", "main", Utc::now());
        store.save(&task).unwrap();

        let reloaded = store.get("default", id).unwrap().unwrap();
        assert_eq!(reloaded.title, "Task X");
        assert_eq!(reloaded.status, Status::Todo);
    }

    #[test]
    fn next_id_is_monotonic_and_gt_max_existing() {
        let (_dir, store) = store();
        store.initialize_namespace("default").unwrap();
        let a = store.next_id("default").unwrap();
        let b = store.next_id("default").unwrap();
        assert_eq!(b, a + 1);
    }

    #[test]
    fn namespace_repair_detects_drift_on_initialize() {
        let (dir, store) = store();
        let ns_dir = dir.path().join("tasks").join("default");
        std::fs::create_dir_all(&ns_dir).unwrap();
        // Corrupt meta.json: next_id=1 while tasks 1,2,5 exist.
        std::fs::write(ns_dir.join("meta.json"), r#"{"schema":1,"namespace":"default","next_id":1}"#).unwrap();
        for id in [1u64, 2, 5] {
            let task = Task::new("default", id, format!("t{id}"), "main", Utc::now());
            store.save(&task).unwrap();
        }
        let result = store.initialize_namespace("default").unwrap();
        assert!(result.repaired);
        assert_eq!(result.next_id, 6);

        // Re-running with no further drift is a no-op.
        let second = store.initialize_namespace("default").unwrap();
        assert!(!second.repaired);
    }

    #[test]
    fn comments_append_with_dense_indices() {
        let (_dir, store) = store();
        let task = Task::new("default", 1, "T", "main", Utc::now());
        store.save(&task).unwrap();
        let c0 = store.add_comment("default", 1, "agent", "first", None).unwrap();
        let c1 = store.add_comment("default", 1, "agent", "second", None).unwrap();
        assert_eq!(c0.index, 0);
        assert_eq!(c1.index, 1);

        let updated = store.update_comment("default", 1, 0, Some("edited".into()), None, None).unwrap();
        assert_eq!(updated.text, "edited");
        assert_eq!(updated.index, 0);
    }

    #[test]
    fn update_comment_out_of_range_fails() {
        let (_dir, store) = store();
        let task = Task::new("default", 1, "T", "main", Utc::now());
        store.save(&task).unwrap();
        let err = store.update_comment("default", 1, 5, Some("x".into()), None, None).unwrap_err();
        assert!(matches!(err, CrewError::CommentNotFound { .. }));
    }

    #[test]
    fn list_is_sorted_ascending_and_label_filtered() {
        let (_dir, store) = store();
        for id in [3u64, 1, 2] {
            let mut task = Task::new("default", id, format!("t{id}"), "main", Utc::now());
            if id == 2 {
                task.labels.insert("urgent".into());
            }
            store.save(&task).unwrap();
        }
        let all = store.list("default", &ListFilter::default()).unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let filtered = store.list("default", &ListFilter { labels: BTreeSet::from(["urgent".to_string()]), ..Default::default() }).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, 2);
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        let task = Task::new("default", 1, "T", "main", Utc::now());
        store.save(&task).unwrap();
        store.delete("default", 1).unwrap();
        assert!(store.get("default", 1).unwrap().is_none());
        store.delete("default", 1).unwrap(); // no error
    }

    #[test]
    fn save_rejects_self_parenthood() {
        let (_dir, store) = store();
        let mut task = Task::new("default", 1, "T", "main", Utc::now());
        task.parent_id = Some(1);
        let err = store.save(&task).unwrap_err();
        assert!(matches!(err, CrewError::InvalidParentID { .. }));
    }

    #[test]
    fn save_rejects_longer_parent_cycle() {
        let (_dir, store) = store();
        let mut task1 = Task::new("default", 1, "t1", "main", Utc::now());
        task1.parent_id = Some(2);
        store.save(&task1).unwrap();

        let mut task2 = Task::new("default", 2, "t2", "main", Utc::now());
        task2.parent_id = Some(1);
        let err = store.save(&task2).unwrap_err();
        assert!(matches!(err, CrewError::InvalidParentID { .. }));
    }

    #[test]
    fn save_allows_non_cyclic_parent_chain() {
        let (_dir, store) = store();
        let task1 = Task::new("default", 1, "t1", "main", Utc::now());
        store.save(&task1).unwrap();

        let mut task2 = Task::new("default", 2, "t2", "main", Utc::now());
        task2.parent_id = Some(1);
        store.save(&task2).unwrap();

        let reloaded = store.get("default", 2).unwrap().unwrap();
        assert_eq!(reloaded.parent_id, Some(1));
    }

    #[test]
    fn get_returns_none_when_absent_and_errors_when_half_persisted() {
        let (dir, store) = store();
        assert!(store.get("default", 99).unwrap().is_none());

        let ns_dir = dir.path().join("tasks").join("default");
        std::fs::create_dir_all(&ns_dir).unwrap();
        std::fs::write(ns_dir.join("1.md"), "---\ntitle: x\n---\n\nbody\n").unwrap();
        let err = store.get("default", 1).unwrap_err();
        assert!(err.to_string().contains("half-persisted"));
    }
}
