//! Deployment Log Manager (§4.10): one append-only, line-buffered JSON log
//! file per deployment, rotated so at most `max_retained` files survive.
//! Grounded on the teacher's `Logstream`/`LogSender` pair (§9: "the
//! process-wide deployment logger becomes a named lifetime-managed resource
//! initialized by the daemon"), but targets a local rotating file instead of
//! a remote uploader.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use agent_api::error::{AgentError, ErrorKind, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_RETAINED: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub time: String,
    pub level: String,
    pub message: String,
}

struct OpenLog {
    deployment_id: String,
    file: File,
}

pub struct DeploymentLogManager {
    dir: PathBuf,
    max_retained: usize,
    current: Mutex<Option<OpenLog>>,
}

impl DeploymentLogManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DeploymentLogManager {
            dir: dir.into(),
            max_retained: DEFAULT_MAX_RETAINED,
            current: Mutex::new(None),
        }
    }

    fn log_path(&self, deployment_id: &str) -> PathBuf {
        self.dir.join(format!("deployments.0000.{deployment_id}.log"))
    }

    /// Ensures a file for `deployment_id` is open for append; rotates (and
    /// prunes old files) if the id changed from what's currently open.
    pub fn enable(&self, deployment_id: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to create log directory", e))?;

        let mut guard = self.current.lock().expect("deployment log mutex poisoned");
        if let Some(open) = guard.as_ref() {
            if open.deployment_id == deployment_id {
                return Ok(());
            }
        }

        let path = self.log_path(deployment_id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AgentError::with_source(
                    ErrorKind::Io,
                    format!("failed to open deployment log '{}'", path.display()),
                    e,
                )
            })?;
        *guard = Some(OpenLog {
            deployment_id: deployment_id.to_string(),
            file,
        });
        drop(guard);

        self.prune()
    }

    pub fn disable(&self) {
        let mut guard = self.current.lock().expect("deployment log mutex poisoned");
        *guard = None;
    }

    /// Line-buffered append; silently dropped while disabled.
    pub fn write_line(&self, line: &LogLine) -> Result<()> {
        let mut guard = self.current.lock().expect("deployment log mutex poisoned");
        let Some(open) = guard.as_mut() else {
            return Ok(());
        };
        let mut serialized = serde_json::to_vec(line)?;
        serialized.push(b'\n');
        open.file.write_all(&serialized).map_err(|e| {
            AgentError::with_source(ErrorKind::Io, "failed to append to deployment log", e)
        })
    }

    /// Returns every line that parses as a `LogLine`; malformed lines are
    /// skipped rather than failing the whole read.
    pub fn get_logs(&self, deployment_id: &str) -> Result<Vec<LogLine>> {
        let path = self.log_path(deployment_id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AgentError::with_source(
                    ErrorKind::Io,
                    format!("failed to open '{}'", path.display()),
                    e,
                ))
            }
        };
        let reader = BufReader::new(file);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| {
                AgentError::with_source(ErrorKind::Io, "failed to read deployment log", e)
            })?;
            if let Ok(parsed) = serde_json::from_str::<LogLine>(&line) {
                lines.push(parsed);
            }
        }
        Ok(lines)
    }

    /// Discards the oldest deployment log files beyond `max_retained`.
    fn prune(&self) -> Result<()> {
        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(&self.dir)
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to list log directory", e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_deployment_log(path))
            .filter_map(|path| fs::metadata(&path).ok().and_then(|m| m.modified().ok()).map(|t| (t, path)))
            .collect();

        if entries.len() <= self.max_retained {
            return Ok(());
        }
        entries.sort_by_key(|(modified, _)| *modified);
        let excess = entries.len() - self.max_retained;
        for (_, path) in entries.into_iter().take(excess) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

fn is_deployment_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("deployments.") && n.ends_with(".log"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_while_enabled_are_retrievable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DeploymentLogManager::new(dir.path());
        manager.enable("dep-1").unwrap();
        manager
            .write_line(&LogLine {
                time: "2026-01-01T00:00:00Z".into(),
                level: "info".into(),
                message: "started".into(),
            })
            .unwrap();

        let lines = manager.get_logs("dep-1").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].message, "started");
    }

    #[test]
    fn writes_while_disabled_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DeploymentLogManager::new(dir.path());
        manager
            .write_line(&LogLine {
                time: "t".into(),
                level: "info".into(),
                message: "lost".into(),
            })
            .unwrap();
        assert!(manager.get_logs("dep-1").unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DeploymentLogManager::new(dir.path());
        manager.enable("dep-1").unwrap();
        fs::write(
            manager.log_path("dep-1"),
            "not json\n{\"time\":\"t\",\"level\":\"info\",\"message\":\"ok\"}\n",
        )
        .unwrap();

        let lines = manager.get_logs("dep-1").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].message, "ok");
    }
}
