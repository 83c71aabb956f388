use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to spawn '{path}': {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("failed to wait for '{path}': {source}")]
    Wait { path: PathBuf, source: io::Error },
    #[error("'{path}' timed out after {soft_secs}s and was killed")]
    TimedOut { path: PathBuf, soft_secs: u64 },
    #[error("failed to list scripts in '{dir}': {source}")]
    ListDir { dir: PathBuf, source: io::Error },
}

pub struct ScriptOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status_code == Some(0)
    }
}

/// Runs `path` with `args`, enforcing the two-stage timeout of §5: a soft
/// timer sends SIGTERM, a hard timer `kill_grace` later escalates to SIGKILL.
/// The caller observes failure as soon as SIGTERM is sent (`timed_out` is set
/// immediately; we do not block further on the grace period before
/// returning it to callers that only care about pass/fail).
pub fn run_with_timeout(
    path: &Path,
    args: &[&str],
    soft_timeout: Duration,
    kill_grace: Duration,
) -> Result<ScriptOutput, ScriptError> {
    let mut child = Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ScriptError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;

    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);
    let mut sent_term = false;

    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|source| ScriptError::Wait {
                path: path.to_path_buf(),
                source,
            })?
        {
            let output = child.wait_with_output().map_err(|source| ScriptError::Wait {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(ScriptOutput {
                status_code: status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: sent_term,
            });
        }

        let elapsed = start.elapsed();
        if !sent_term && elapsed >= soft_timeout {
            terminate(&child);
            sent_term = true;
        } else if sent_term && elapsed >= soft_timeout + kill_grace {
            kill(&child);
            let output = child.wait_with_output().map_err(|source| ScriptError::Wait {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(ScriptOutput {
                status_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: true,
            });
        }

        std::thread::sleep(poll_interval);
    }
}

fn terminate(child: &Child) {
    let _ = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
}

fn kill(child: &Child) {
    let _ = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
}

/// Lists executable regular files directly inside `dir`, lexicographically
/// sorted — the order state scripts and inventory/identity helpers run in.
pub fn list_executables(dir: &Path) -> Result<Vec<PathBuf>, ScriptError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| ScriptError::ListDir {
            dir: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_executable_file(path))
        .collect();
    entries.sort();
    Ok(entries)
}

fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

/// Parses `key=value` lines as emitted by identity/inventory helpers (§4.11).
/// A value that looks like a JSON array literal (`["a","b"]`) is parsed as a
/// list; blank lines and `#`-comments are skipped; anything else without `=`
/// is a parse error.
pub fn parse_key_value_lines(text: &str) -> Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("malformed line {}: '{}'", lineno + 1, line));
        };
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn runs_script_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "hello", "#!/bin/sh\necho hello\n");
        let out = run_with_timeout(&path, &[], Duration::from_secs(5), Duration::from_secs(5))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn kills_script_that_exceeds_soft_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "sleepy", "#!/bin/sh\nsleep 30\n");
        let out = run_with_timeout(
            &path,
            &[],
            Duration::from_millis(50),
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(out.timed_out);
    }

    #[test]
    fn list_executables_is_sorted_and_skips_non_executable() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "b.sh", "#!/bin/sh\n");
        write_script(dir.path(), "a.sh", "#!/bin/sh\n");
        fs::write(dir.path().join("c.sh"), "#!/bin/sh\n").unwrap();
        let found = list_executables(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.sh", "b.sh"]);
    }

    #[test]
    fn parses_key_value_lines_with_list_values() {
        let parsed = parse_key_value_lines("mac=aa:bb\n# comment\n\ngroups=[\"a\",\"b\"]\n")
            .unwrap();
        assert_eq!(
            parsed,
            vec![
                ("mac".to_string(), "aa:bb".to_string()),
                ("groups".to_string(), "[\"a\",\"b\"]".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_line_without_equals() {
        assert!(parse_key_value_lines("not-a-pair").is_err());
    }
}
