use std::{
    ffi::OsStr,
    io,
    process::{Command as StdCommand, Output},
};

use strum_macros::IntoStaticStr;

/// External binaries this crate shells out to. Resolved through `PATH` via
/// `which` rather than hardcoded absolute paths, same as the teacher's own
/// `Dependency` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Dependency {
    FwPrintenv,
    FwSetenv,
    Findmnt,
}

impl Dependency {
    pub fn name(&self) -> &'static str {
        (*self).into()
    }

    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            inner: StdCommand::new(self.name()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("failed to find dependency '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },
    #[error("failed to execute dependency '{dependency}': {source}")]
    CouldNotExecute {
        dependency: Dependency,
        #[source]
        source: io::Error,
    },
    #[error("dependency '{dependency}' exited unsuccessfully (status {code:?})\nstdout: {stdout}\nstderr: {stderr}")]
    ExecutionFailed {
        dependency: Dependency,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Thin wrapper around `std::process::Command` that resolves the binary via
/// `which` before spawning and turns a non-zero exit into a typed error.
pub struct Command {
    dependency: Dependency,
    inner: StdCommand,
}

impl Command {
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.inner.arg(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Self {
        self.inner.args(args);
        self
    }

    pub fn stdin_bytes(self, bytes: Vec<u8>) -> StdinCommand {
        StdinCommand {
            command: self,
            stdin: bytes,
        }
    }

    fn resolved(self) -> Result<StdCommand, DependencyError> {
        let path = which::which(self.dependency.name()).map_err(|source| {
            DependencyError::NotFound {
                dependency: self.dependency,
                source,
            }
        })?;
        let mut resolved = StdCommand::new(path);
        resolved.args(self.inner.get_args());
        Ok(resolved)
    }

    pub fn output(self) -> Result<Output, DependencyError> {
        let dependency = self.dependency;
        let mut cmd = self.resolved()?;
        cmd.output()
            .map_err(|source| DependencyError::CouldNotExecute { dependency, source })
    }

    /// Runs the command and checks the exit status, returning captured stdout
    /// as a lossily-decoded string on success.
    pub fn run_and_capture(self) -> Result<String, DependencyError> {
        let dependency = self.dependency;
        let output = self.output()?;
        if !output.status.success() {
            return Err(DependencyError::ExecutionFailed {
                dependency,
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// A command that feeds `stdin` before waiting for completion, used for
/// `fw_setenv`'s batch-mode (`-script -`) invocation.
pub struct StdinCommand {
    command: Command,
    stdin: Vec<u8>,
}

impl StdinCommand {
    pub fn run(self) -> Result<(), DependencyError> {
        use std::io::Write;
        let dependency = self.command.dependency;
        let mut cmd = self.command.resolved()?;
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|source| DependencyError::CouldNotExecute { dependency, source })?;
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(&self.stdin)
            .map_err(|source| DependencyError::CouldNotExecute { dependency, source })?;
        let output = child
            .wait_with_output()
            .map_err(|source| DependencyError::CouldNotExecute { dependency, source })?;
        if !output.status.success() {
            return Err(DependencyError::ExecutionFailed {
                dependency,
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}
