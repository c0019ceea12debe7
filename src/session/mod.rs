//! Session Manager (spec §4.4): maps each task to a detached `tmux` session,
//! starts/stops the agent process tree with correct signal propagation, and
//! hosts the agent-driven IPC listener.
//!
//! Grounded on `nwiizo-ccswarm`'s `tmux::TmuxClient` (the teacher crate has no
//! multiplexer code at all): session existence via `has-session`, panes
//! enumerated before a kill, keys sent with `send-keys`. The private-socket
//! addressing (`-S <path>`) and custom `-f <conf>` are this crate's own
//! convention, so multiple concurrent repos never collide on the default
//! tmux server.

pub mod ipc;
mod theme;

pub use theme::{shorten_agent_name, SessionKind};

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::error::CrewError;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const SECOND_SIGTERM_AT: Duration = Duration::from_millis(500);

/// Parameters for [`SessionManager::start`].
pub struct StartSpec<'a> {
    pub name: &'a str,
    pub dir: &'a Path,
    pub command: &'a str,
    pub task_id: u64,
    pub title: &'a str,
    pub agent: &'a str,
    pub kind: SessionKind,
}

/// Owns tmux sessions on a private socket under `<crewDir>/tmux.sock`.
pub struct SessionManager {
    socket_path: PathBuf,
    conf_path: PathBuf,
}

impl SessionManager {
    pub fn new(crew_dir: impl Into<PathBuf>) -> Self {
        let crew_dir = crew_dir.into();
        SessionManager {
            socket_path: crew_dir.join("tmux.sock"),
            conf_path: crew_dir.join("tmux.conf"),
        }
    }

    fn tmux(&self) -> Command {
        let mut cmd = Command::new("tmux");
        cmd.arg("-S").arg(&self.socket_path);
        if self.conf_path.exists() {
            cmd.arg("-f").arg(&self.conf_path);
        }
        cmd
    }

    /// Write the shared `tmux.conf`: Ctrl-G detach binding, hidden window
    /// list (each session shows only itself). Idempotent.
    fn ensure_conf(&self) -> Result<(), CrewError> {
        if let Some(parent) = self.conf_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CrewError::io("creating crew dir", e))?;
        }
        let conf = "set -g status-left \"\"\nset -g window-status-format \"\"\nset -g window-status-current-format \"\"\nbind-key -n C-g detach-client\n";
        std::fs::write(&self.conf_path, conf).map_err(|e| CrewError::io("writing tmux.conf", e))?;
        Ok(())
    }

    fn run_checked(&self, args: &[&str]) -> Result<std::process::Output, CrewError> {
        let output = self
            .tmux()
            .args(args)
            .output()
            .map_err(|e| CrewError::io(format!("running tmux {}", args.join(" ")), e))?;
        if !output.status.success() {
            return Err(CrewError::Subprocess {
                command: format!("tmux {}", args.join(" ")),
                exit_info: match output.status.code() {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                },
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output)
    }

    /// Absence of the socket or a non-zero `has-session` both mean "not
    /// running" — neither is an error (spec §4.4 IsRunning).
    pub fn is_running(&self, name: &str) -> bool {
        if !self.socket_path.exists() {
            return false;
        }
        self.tmux()
            .args(["has-session", "-t", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Start a detached session named `spec.name`, running `spec.command` in
    /// `spec.dir`, then apply status-bar theming (spec §4.4 Start).
    pub fn start(&self, spec: &StartSpec) -> Result<(), CrewError> {
        if self.is_running(spec.name) {
            return Err(CrewError::SessionRunning { name: spec.name.to_string() });
        }
        self.ensure_conf()?;

        self.run_checked(&[
            "new-session",
            "-d",
            "-s",
            spec.name,
            "-c",
            &spec.dir.to_string_lossy(),
            spec.command,
        ])?;

        for (option, value) in theme::status_bar_options(spec.task_id, spec.title, spec.agent, spec.kind) {
            if value.is_empty() {
                self.run_checked(&["set-option", "-t", spec.name, &option, ""])?;
            } else {
                self.run_checked(&["set-option", "-t", spec.name, &option, &value])?;
            }
        }
        Ok(())
    }

    /// Stop a session: SIGTERM every pane's process group, poll up to
    /// [`STOP_TIMEOUT`], retry the signal once at [`SECOND_SIGTERM_AT`] (a
    /// single SIGTERM is empirically not always enough for nested shells),
    /// then `kill-session`. Already-gone is treated as success.
    pub fn stop(&self, name: &str) -> Result<(), CrewError> {
        if !self.is_running(name) {
            return Ok(());
        }

        let pane_pids = self.pane_pids(name)?;
        let start = Instant::now();
        let mut resent = false;
        for &pid in &pane_pids {
            send_process_group_signal(pid, nix::sys::signal::Signal::SIGTERM);
        }

        while start.elapsed() < STOP_TIMEOUT {
            if !self.is_running(name) {
                return Ok(());
            }
            if !resent && start.elapsed() >= SECOND_SIGTERM_AT {
                for &pid in &pane_pids {
                    send_process_group_signal(pid, nix::sys::signal::Signal::SIGTERM);
                }
                resent = true;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        // Still alive after the grace period: force kill the session, which
        // tmux itself translates into SIGHUP/SIGKILL for remaining panes.
        let _ = self.run_checked(&["kill-session", "-t", name]);
        Ok(())
    }

    fn pane_pids(&self, name: &str) -> Result<Vec<i32>, CrewError> {
        let output = self
            .tmux()
            .args(["list-panes", "-t", name, "-F", "#{pane_pid}"])
            .output()
            .map_err(|e| CrewError::io("listing tmux panes", e))?;
        if !output.status.success() {
            return Ok(vec![]);
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|l| l.trim().parse::<i32>().ok())
            .collect())
    }

    /// Replace the current process image with a tmux attach invocation
    /// (single-shot; never returns on success).
    #[cfg(unix)]
    pub fn attach(&self, name: &str) -> Result<std::convert::Infallible, CrewError> {
        use std::os::unix::process::CommandExt;
        if !self.is_running(name) {
            return Err(CrewError::NoSession { name: name.to_string() });
        }
        let err = self.tmux().args(["attach-session", "-t", name]).exec();
        Err(CrewError::io("exec-ing tmux attach-session", err))
    }

    /// Capture the last `lines` lines of the session's active pane.
    pub fn peek(&self, name: &str, lines: u32) -> Result<String, CrewError> {
        if !self.is_running(name) {
            return Err(CrewError::NoSession { name: name.to_string() });
        }
        let output = self.run_checked(&[
            "capture-pane",
            "-t",
            name,
            "-p",
            "-S",
            &format!("-{lines}"),
        ])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Send literal keys to the session (e.g. `"Enter"` or a text string),
    /// trusting tmux's own escaping.
    pub fn send(&self, name: &str, keys: &str) -> Result<(), CrewError> {
        if !self.is_running(name) {
            return Err(CrewError::NoSession { name: name.to_string() });
        }
        self.run_checked(&["send-keys", "-t", name, keys])?;
        Ok(())
    }
}

#[cfg(unix)]
fn send_process_group_signal(pid: i32, signal: nix::sys::signal::Signal) {
    let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(-pid), signal);
}

#[cfg(not(unix))]
fn send_process_group_signal(_pid: i32, _signal: ()) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tmux_available() -> bool {
        Command::new("tmux").arg("-V").output().map(|o| o.status.success()).unwrap_or(false)
    }

    #[test]
    fn agent_name_shortening_is_exposed_from_session_module() {
        assert_eq!(shorten_agent_name("opencode"), "oc");
    }

    #[test]
    fn is_running_is_false_without_socket() {
        let dir = TempDir::new().unwrap();
        let mgr = SessionManager::new(dir.path());
        assert!(!mgr.is_running("crew-1"));
    }

    #[test]
    fn start_stop_roundtrip_against_real_tmux() {
        if !tmux_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let mgr = SessionManager::new(dir.path());
        let spec = StartSpec {
            name: "crew-test-1",
            dir: dir.path(),
            command: "sleep 60",
            task_id: 1,
            title: "Test task",
            agent: "claude",
            kind: SessionKind::Worker,
        };
        mgr.start(&spec).unwrap();
        assert!(mgr.is_running("crew-test-1"));

        let err = mgr.start(&spec).unwrap_err();
        assert!(matches!(err, CrewError::SessionRunning { .. }));

        mgr.stop("crew-test-1").unwrap();
        assert!(!mgr.is_running("crew-test-1"));
    }
}
