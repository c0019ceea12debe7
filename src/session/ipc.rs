//! Agent-driven status transitions over a private request fifo (spec §4.4
//! Expansion, §1(d)): an agent running inside a session can ask the Session
//! Manager to transition its own task without shelling back out to the
//! `crew` binary.
//!
//! Grounded on the teacher crate's IPC-free design generalized from its
//! `shell::` module's line-oriented framing convention — one JSON object per
//! newline, read on a dedicated listener thread per active session.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use serde::Deserialize;

use crate::error::CrewError;

/// One parsed request read from an agent's fifo.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRequest {
    pub op: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub task_id: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Path of the request fifo for `task_id` under `crew_dir`.
pub fn fifo_path(crew_dir: &Path, task_id: u64) -> PathBuf {
    crew_dir.join(format!("agent.sock.{task_id}"))
}

/// Create the named fifo (removing any stale one first) and return its path.
#[cfg(unix)]
pub fn create_fifo(crew_dir: &Path, task_id: u64) -> Result<PathBuf, CrewError> {
    let path = fifo_path(crew_dir, task_id);
    if path.exists() {
        std::fs::remove_file(&path).map_err(|e| CrewError::io("removing stale agent fifo", e))?;
    }
    nix::unistd::mkfifo(&path, nix::sys::stat::Mode::S_IRUSR | nix::sys::stat::Mode::S_IWUSR)
        .map_err(|e| CrewError::Other(format!("creating agent fifo: {e}")))?;
    Ok(path)
}

#[cfg(not(unix))]
pub fn create_fifo(_crew_dir: &Path, _task_id: u64) -> Result<PathBuf, CrewError> {
    Err(CrewError::Other("agent IPC fifo is only supported on unix".into()))
}

/// Remove the fifo for `task_id`, if present, so its listener thread's
/// existence check fails on its next re-open attempt. Best effort: a missing
/// or already-removed fifo is not an error.
pub fn remove_fifo(crew_dir: &Path, task_id: u64) {
    let path = fifo_path(crew_dir, task_id);
    let _ = std::fs::remove_file(&path);
}

/// Spawn a listener thread that reads newline-delimited JSON requests from
/// the fifo at `path` and forwards successfully-parsed ones to `sender`.
/// Runs until the fifo is removed or the writer side closes permanently.
pub fn spawn_listener(path: PathBuf, sender: Sender<AgentRequest>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            if !path.exists() {
                break;
            }
            let file = match std::fs::File::open(&path) {
                Ok(f) => f,
                Err(_) => break,
            };
            let reader = std::io::BufReader::new(file);
            for line in reader.lines() {
                let Ok(line) = line else { continue };
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(request) = serde_json::from_str::<AgentRequest>(&line) {
                    if sender.send(request).is_err() {
                        return;
                    }
                }
            }
            // A fifo reader sees EOF once every writer closes; re-open to
            // keep listening for the next writer.
        }
    })
}
