//! Task Lifecycle State Machine (spec §4.2): enforces legal status
//! transitions and performs their side effects against the Worktree Manager,
//! Session Manager, and Store.
//!
//! Every public method here follows the same shape: load the task, check the
//! guard, perform side effects in external-effect-then-persist order, bump
//! `status_version`, and save. The namespace lock inside [`Store`] protects
//! each individual read/write; a transition itself is not wrapped in one
//! wider lock, since this binary is invoked once per command and never holds
//! a task open across interactive input.

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::{self, AgentRegistry, RenderContext};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::CrewError;
use crate::git::Repository;
use crate::session::ipc::{self, AgentRequest};
use crate::session::{SessionKind, SessionManager, StartSpec};
use crate::store::{CloseReason, Comment, CommentType, Status, Store, Task, TriState};
use crate::worktree::WorktreeManager;

/// Resolve the effective `skip_review` flag (spec §4.2): an explicit value
/// on the task wins; otherwise fall back to the config default.
pub fn resolve_skip_review(task: &Task, config: &Config) -> bool {
    task.skip_review.resolve(config.tasks.skip_review.unwrap_or(false))
}

fn invalid(task: &Task, to: Status) -> CrewError {
    CrewError::InvalidTransition { from: task.status.to_string(), to: to.to_string() }
}

/// Ties the Store, Worktree Manager, Session Manager, and Agent Registry
/// together behind the transition table. Cheaply cloneable (every field is
/// an `Arc`) so a dispatcher thread can own a copy that outlives the CLI
/// invocation which spawned it (spec §4.4 Expansion, agent-driven IPC).
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<Store>,
    pub worktree: Arc<WorktreeManager>,
    pub sessions: Arc<SessionManager>,
    pub repo: Arc<Repository>,
    pub registry: Arc<AgentRegistry>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub crew_dir: PathBuf,
}

impl Engine {
    fn render_ctx(&self, task: &Task, worktree_path: &std::path::Path, message: String, r#continue: bool) -> Result<RenderContext, CrewError> {
        let repo_root = self.repo.root()?;
        let git_dir = self.repo.common_git_dir()?;
        Ok(RenderContext {
            model: String::new(),
            prompt: message,
            args: vec![],
            r#continue,
            worktree: worktree_path.display().to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            branch: task.branch_name(),
            issue: task.issue.map(|n| n.to_string()),
            task_id: task.id,
            git_dir: git_dir.display().to_string(),
            repo_root: repo_root.display().to_string(),
        })
    }

    fn fetch(&self, namespace: &str, id: u64) -> Result<Task, CrewError> {
        self.store
            .get(namespace, id)?
            .ok_or_else(|| CrewError::TaskNotFound { namespace: namespace.to_string(), id })
    }

    fn append_comment(&self, task: &Task, text: &str, kind: CommentType) -> Result<(), CrewError> {
        self.store.add_comment(&task.namespace, task.id, "crew", text, Some(kind))?;
        Ok(())
    }

    /// Create the agent request fifo for `task_id` and spawn both the
    /// listener thread and a dispatcher thread that applies each parsed
    /// request against this `Engine` (spec §4.4 Expansion, §1(d)). Best
    /// effort: a fifo failure (e.g. non-unix) is logged, not fatal, since the
    /// session itself is already running.
    fn spawn_agent_ipc(&self, namespace: &str, task_id: u64) {
        let path = match ipc::create_fifo(&self.crew_dir, task_id) {
            Ok(path) => path,
            Err(err) => {
                log::warn!("could not set up agent IPC for task {namespace}/{task_id}: {err}");
                return;
            }
        };
        let (tx, rx) = std::sync::mpsc::channel();
        ipc::spawn_listener(path, tx);
        let engine = self.clone();
        std::thread::spawn(move || {
            for request in rx {
                engine.dispatch_agent_request(request);
            }
        });
    }

    /// Apply one agent-originated request to the Lifecycle State Machine.
    /// Unknown ops and failed transitions are logged rather than propagated —
    /// there is no caller left to return an error to.
    fn dispatch_agent_request(&self, request: AgentRequest) {
        let result = match request.op.as_str() {
            "needs_input" => self
                .needs_input(&request.namespace, request.task_id, request.reason.as_deref().unwrap_or(""))
                .map(|_| ()),
            "resume" => self.resume(&request.namespace, request.task_id).map(|_| ()),
            "complete" => self.complete(&request.namespace, request.task_id).map(|_| ()),
            other => {
                log::warn!("unknown agent IPC op `{other}` for task {}/{}", request.namespace, request.task_id);
                Ok(())
            }
        };
        if let Err(err) = result {
            log::warn!(
                "agent IPC request `{}` failed for task {}/{}: {err}",
                request.op,
                request.namespace,
                request.task_id
            );
        }
    }

    /// `todo -> in_progress`: create/reuse the worktree and start the
    /// worker's session.
    pub fn start(&self, namespace: &str, id: u64, message: Option<&str>) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        if task.status != Status::Todo {
            return Err(invalid(&task, Status::InProgress));
        }
        let session_name = task.worker_session_name();
        if self.sessions.is_running(&session_name) {
            return Err(CrewError::SessionRunning { name: session_name });
        }

        let branch = task.branch_name();
        let path = self.worktree.create(&branch, &task.base_branch)?;

        let repo_root = self.repo.root()?;
        let setup = crate::worktree::WorktreeSetup {
            copy: self.config.worktree.copy.clone(),
            setup_command: self.config.worktree.setup_command.clone(),
            exclude_after_setup: self.config.worktree.copy.clone(),
        };
        self.worktree.setup(&branch, &repo_root, &setup)?;

        let agent_name = task
            .agent
            .clone()
            .or_else(|| self.registry.default_for_role(&self.config, crate::config::AgentRole::Worker))
            .ok_or_else(|| CrewError::AgentNotFound { name: "worker".to_string() })?;
        let resolved_agent = self.registry.resolve(&agent_name)?;

        let ctx = self.render_ctx(&task, &path, String::new(), false)?;

        if let Some(script) = agent::render_setup_script(&resolved_agent, &ctx)? {
            let executor = crate::command_executor::CommandExecutor::new();
            executor.run_checked(&script, &path)?;
        }

        let rendered = agent::render_invocation(&resolved_agent, message, "Please work on this task.", ctx)?;

        self.sessions.start(&StartSpec {
            name: &session_name,
            dir: &path,
            command: &rendered.command,
            task_id: task.id,
            title: &task.title,
            agent: &agent_name,
            kind: SessionKind::Worker,
        })?;
        self.spawn_agent_ipc(namespace, task.id);

        task.agent = Some(agent_name);
        task.session = Some(session_name);
        task.status = Status::InProgress;
        task.started = Some(self.clock.now());
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }

    /// `* -> needs_input`: only legal when the task is not already awaiting
    /// review.
    pub fn needs_input(&self, namespace: &str, id: u64, reason: &str) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        if matches!(task.status, Status::ForReview | Status::InReview) {
            return Err(invalid(&task, Status::NeedsInput));
        }
        task.status = Status::NeedsInput;
        task.block_reason = Some(reason.to_string());
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }

    /// `needs_input -> in_progress`: the worker session must still be alive.
    pub fn resume(&self, namespace: &str, id: u64) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        if task.status != Status::NeedsInput {
            return Err(invalid(&task, Status::InProgress));
        }
        let session_name = task.worker_session_name();
        if !self.sessions.is_running(&session_name) {
            return Err(CrewError::NoSession { name: session_name });
        }
        task.status = Status::InProgress;
        task.block_reason = None;
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }

    /// `in_progress -> for_review` or `in_progress -> reviewed`, gated by
    /// `skip_review` and `review_mode` (spec §4.2 Expansion).
    pub fn complete(&self, namespace: &str, id: u64) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        if task.status != Status::InProgress {
            return Err(invalid(&task, Status::ForReview));
        }

        let path = self.worktree.resolve(&task.branch_name())?;
        if self.worktree.is_dirty(&task.branch_name())? {
            return Err(CrewError::UncommittedChanges { branch: task.branch_name() });
        }
        if let Some(cmd) = &self.config.complete_command {
            let executor = crate::command_executor::CommandExecutor::new();
            executor.run_checked(cmd, &path)?;
        }

        self.sessions.stop(&task.worker_session_name())?;
        ipc::remove_fifo(&self.crew_dir, task.id);

        let conflicts = self.repo.merge_conflict_files(&task.branch_name(), &task.base_branch)?;
        if !conflicts.is_empty() {
            let message = format_conflict_message(&conflicts, &task.base_branch);
            self.append_comment(&task, &message, CommentType::Friction)?;
            task.status_version += 1;
            self.store.save(&task)?;
            return Err(CrewError::MergeConflict {
                branch: task.branch_name(),
                base_branch: task.base_branch.clone(),
                files: conflicts,
            });
        }

        if resolve_skip_review(&task, &self.config) {
            task.status = Status::Reviewed;
            task.status_version += 1;
            self.store.save(&task)?;
            return Ok(task);
        }

        task.status = Status::ForReview;
        task.status_version += 1;
        self.store.save(&task)?;

        let review_mode = self.config.review_mode.unwrap_or_default();
        if matches!(review_mode, crate::config::ReviewMode::Auto | crate::config::ReviewMode::AutoFix) {
            task = self.start_review(namespace, id)?;
        }
        Ok(task)
    }

    /// `for_review -> in_review`: start the reviewer session.
    pub fn start_review(&self, namespace: &str, id: u64) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        if task.status != Status::ForReview {
            return Err(invalid(&task, Status::InReview));
        }
        let path = self.worktree.resolve(&task.branch_name())?;
        let reviewer_name = self
            .registry
            .default_for_role(&self.config, crate::config::AgentRole::Reviewer)
            .ok_or_else(|| CrewError::AgentNotFound { name: "reviewer".to_string() })?;
        let resolved = self.registry.resolve(&reviewer_name)?;

        let ctx = self.render_ctx(&task, &path, String::new(), false)?;
        let rendered = agent::render_invocation(&resolved, None, agent::DEFAULT_REVIEWER_PROMPT, ctx)?;

        let session_name = task.reviewer_session_name();
        self.sessions.start(&StartSpec {
            name: &session_name,
            dir: &path,
            command: &rendered.command,
            task_id: task.id,
            title: &task.title,
            agent: &reviewer_name,
            kind: SessionKind::Reviewer,
        })?;
        self.spawn_agent_ipc(namespace, task.id);

        task.status = Status::InReview;
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }

    /// `in_review -> reviewed` (LGTM) or `in_review -> in_progress`
    /// (non-LGTM, possibly restarting the worker under `auto_fix`).
    pub fn record_review_verdict(&self, namespace: &str, id: u64, lgtm: bool, note: &str) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        if task.status != Status::InReview {
            return Err(invalid(&task, Status::Reviewed));
        }
        self.sessions.stop(&task.reviewer_session_name()).ok();
        ipc::remove_fifo(&self.crew_dir, task.id);

        task.review_count += 1;
        task.last_review_at = Some(self.clock.now());
        task.last_review_is_lgtm = TriState::from_bool_opt(Some(lgtm));
        if !note.is_empty() {
            self.append_comment(&task, note, CommentType::Review)?;
        }

        if lgtm {
            task.status = Status::Reviewed;
            task.status_version += 1;
            self.store.save(&task)?;
            return Ok(task);
        }

        task.status = Status::InProgress;
        task.status_version += 1;
        self.store.save(&task)?;

        let review_mode = self.config.review_mode.unwrap_or_default();
        if matches!(review_mode, crate::config::ReviewMode::AutoFix) {
            task = self.restart_worker_for_fix(namespace, id, note)?;
        } else if self.sessions.is_running(&task.worker_session_name()) {
            self.sessions.send(&task.worker_session_name(), note).ok();
        }
        Ok(task)
    }

    fn restart_worker_for_fix(&self, namespace: &str, id: u64, note: &str) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        let path = self.worktree.resolve(&task.branch_name())?;
        let agent_name = task
            .agent
            .clone()
            .ok_or_else(|| CrewError::AgentNotFound { name: "worker".to_string() })?;
        let resolved = self.registry.resolve(&agent_name)?;

        let fix_prompt = format!("Please fix these review comments:\n{note}");
        let ctx = self.render_ctx(&task, &path, String::new(), true)?;
        let rendered = agent::render_invocation(&resolved, Some(&fix_prompt), "", ctx)?;

        if self.sessions.is_running(&task.worker_session_name()) {
            self.sessions.stop(&task.worker_session_name())?;
            ipc::remove_fifo(&self.crew_dir, task.id);
        }
        self.sessions.start(&StartSpec {
            name: &task.worker_session_name(),
            dir: &path,
            command: &rendered.command,
            task_id: task.id,
            title: &task.title,
            agent: &agent_name,
            kind: SessionKind::Worker,
        })?;
        self.spawn_agent_ipc(namespace, task.id);

        task.auto_fix_retry_count += 1;
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }

    /// `reviewed -> done`: merge after a successful conflict probe.
    pub fn merge(&self, namespace: &str, id: u64) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        if task.status != Status::Reviewed {
            return Err(invalid(&task, Status::Done));
        }

        let conflicts = self.repo.merge_conflict_files(&task.branch_name(), &task.base_branch)?;
        if !conflicts.is_empty() {
            let message = format_conflict_message(&conflicts, &task.base_branch);
            self.append_comment(&task, &message, CommentType::Friction)?;
            if self.sessions.is_running(&task.worker_session_name()) {
                self.sessions.send(&task.worker_session_name(), &message).ok();
            }
            task.status = Status::InProgress;
            task.status_version += 1;
            self.store.save(&task)?;
            return Err(CrewError::MergeConflict {
                branch: task.branch_name(),
                base_branch: task.base_branch.clone(),
                files: conflicts,
            });
        }

        let path = self.worktree.resolve(&task.branch_name())?;
        self.repo.merge_branch(&path, &task.branch_name())?;

        task.status = Status::Done;
        task.close_reason = CloseReason::Merged;
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }

    /// `* -> closed`: stop the session, remove the worktree if clean, and
    /// record the close reason.
    pub fn abandon(&self, namespace: &str, id: u64, reason: Option<&str>) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;

        for name in [task.worker_session_name(), task.reviewer_session_name()] {
            if self.sessions.is_running(&name) {
                self.sessions.stop(&name)?;
            }
        }
        ipc::remove_fifo(&self.crew_dir, task.id);

        let branch = task.branch_name();
        if self.worktree.exists(&branch)? && !self.worktree.is_dirty(&branch)? {
            self.worktree.remove(&branch, false)?;
        }

        if let Some(reason) = reason {
            self.append_comment(&task, reason, CommentType::Note)?;
        }
        task.status = Status::Closed;
        task.close_reason = CloseReason::Abandoned;
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }

    /// `* -> error`: record an unrecoverable failure.
    pub fn fail(&self, namespace: &str, id: u64, reason: &str) -> Result<Task, CrewError> {
        let mut task = self.fetch(namespace, id)?;
        task.status = Status::Error;
        task.block_reason = Some(reason.to_string());
        task.status_version += 1;
        self.store.save(&task)?;
        Ok(task)
    }
}

fn format_conflict_message(files: &[String], base_branch: &str) -> String {
    let mut msg = format!("Merge conflict against `{base_branch}`. Conflicting files:\n");
    for f in files {
        msg.push_str("  - ");
        msg.push_str(f);
        msg.push('\n');
    }
    msg.push_str("Resolve the conflicts in the worktree, commit, then run `crew complete` again.");
    msg
}


/// Path to the repo-scoped crew directory, `<git-dir>/crew`.
pub fn crew_dir(common_git_dir: &std::path::Path) -> PathBuf {
    common_git_dir.join("crew")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::clock::FakeClock;
    use crate::config::Config;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::at(dir.path());
        repo.run(&["init", "-q", "-b", "main"]).unwrap();
        repo.run(&["config", "user.email", "t@example.com"]).unwrap();
        repo.run(&["config", "user.name", "Test"]).unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        repo.run(&["add", "."]).unwrap();
        repo.run(&["commit", "-q", "-m", "init"]).unwrap();
        (dir, repo)
    }

    #[test]
    fn skip_review_resolution_matches_spec_example() {
        let mut task = Task::new("default", 1, "t", "main", Utc::now());
        let mut config = Config::default();
        config.tasks.skip_review = Some(true);
        assert!(resolve_skip_review(&task, &config));
        task.skip_review = TriState::False;
        assert!(!resolve_skip_review(&task, &config));
    }

    #[test]
    fn start_on_non_todo_task_is_invalid_transition() {
        let (dir, repo) = setup_repo();
        let crew_dir = dir.path().join(".git/crew");
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let store = Arc::new(Store::new(crew_dir.clone(), clock.clone()));
        let worktree = Arc::new(WorktreeManager::new(repo.clone(), crew_dir.clone()));
        let sessions = Arc::new(SessionManager::new(crew_dir.clone()));
        let config = Arc::new(Config::default());
        let registry = Arc::new(AgentRegistry::new(&config));
        let engine = Engine {
            store: store.clone(),
            worktree,
            sessions,
            repo: Arc::new(repo),
            registry,
            config,
            clock,
            crew_dir,
        };

        let mut task = Task::new("default", 1, "t", "main", Utc::now());
        task.status = Status::Done;
        store.save(&task).unwrap();

        let err = engine.start("default", 1, None).unwrap_err();
        assert!(matches!(err, CrewError::InvalidTransition { .. }));
    }

    #[test]
    fn merge_with_conflicts_reopens_task_and_records_comment() {
        let (dir, repo) = setup_repo();
        let crew_dir = dir.path().join(".git/crew");
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let store = Arc::new(Store::new(crew_dir.clone(), clock.clone()));
        let worktree = Arc::new(WorktreeManager::new(repo.clone(), crew_dir.clone()));
        let sessions = Arc::new(SessionManager::new(crew_dir.clone()));
        let config = Arc::new(Config::default());
        let registry = Arc::new(AgentRegistry::new(&config));
        let engine = Engine {
            store: store.clone(),
            worktree,
            sessions,
            repo: Arc::new(repo.clone()),
            registry,
            config,
            clock,
            crew_dir,
        };

        repo.run(&["checkout", "-b", "crew-1"]).unwrap();
        std::fs::write(dir.path().join("README.md"), "branch change").unwrap();
        repo.run(&["commit", "-aqm", "branch change"]).unwrap();
        repo.run(&["checkout", "main"]).unwrap();
        std::fs::write(dir.path().join("README.md"), "main change").unwrap();
        repo.run(&["commit", "-aqm", "main change"]).unwrap();
        repo.run(&["worktree", "add", dir.path().join(".git/crew/worktrees/1").to_str().unwrap(), "crew-1"]).unwrap();

        let mut task = Task::new("default", 1, "t", "main", Utc::now());
        task.status = Status::Reviewed;
        store.save(&task).unwrap();

        let err = engine.merge("default", 1).unwrap_err();
        assert!(matches!(err, CrewError::MergeConflict { .. }));
        let reloaded = store.get("default", 1).unwrap().unwrap();
        assert_eq!(reloaded.status, Status::InProgress);
    }

    #[test]
    fn abandon_stops_sessions_and_sets_close_reason() {
        let (dir, repo) = setup_repo();
        let crew_dir = dir.path().join(".git/crew");
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let store = Arc::new(Store::new(crew_dir.clone(), clock.clone()));
        let worktree = Arc::new(WorktreeManager::new(repo.clone(), crew_dir.clone()));
        let sessions = Arc::new(SessionManager::new(crew_dir.clone()));
        let config = Arc::new(Config::default());
        let registry = Arc::new(AgentRegistry::new(&config));
        let engine = Engine {
            store: store.clone(),
            worktree,
            sessions,
            repo: Arc::new(repo),
            registry,
            config,
            clock,
            crew_dir,
        };

        let task = Task::new("default", 1, "t", "main", Utc::now());
        store.save(&task).unwrap();

        let result = engine.abandon("default", 1, Some("no longer needed")).unwrap();
        assert_eq!(result.status, Status::Closed);
        assert_eq!(result.close_reason, CloseReason::Abandoned);
    }
}
