//! External Module Installer (§4.8 last paragraph): the payload installer
//! backing an operator-supplied executable. The contract is purely argv,
//! stdin, stdout and exit code — one invocation per lifecycle step, with
//! `Yes`/`No` stdout answers for the two capability queries. Grounded on
//! `osutils::scripts::run_with_timeout`'s two-stage timeout (the same one
//! state scripts use) and the teacher's `dependencies.rs` "resolve then
//! invoke" subprocess shape.

use std::{
    fs,
    io::Read,
    path::PathBuf,
    time::Duration,
};

use agent_api::error::{AgentError, ErrorKind, Result};
use osutils::scripts::{self, ScriptOutput};

use super::{PayloadInstaller, PayloadType};

const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);
const PAYLOAD_FILE_NAME: &str = "files/0000";

pub struct ModuleInstaller {
    name: String,
    module_path: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
    kill_grace: Duration,
    payload_type: PayloadType,
}

impl ModuleInstaller {
    pub fn new(name: impl Into<String>, module_path: impl Into<PathBuf>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::with_kill_grace(name, module_path, work_dir, timeout, DEFAULT_KILL_GRACE)
    }

    pub fn with_kill_grace(
        name: impl Into<String>,
        module_path: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
        kill_grace: Duration,
    ) -> Self {
        let name = name.into();
        ModuleInstaller {
            payload_type: PayloadType::Module(name.clone()),
            name,
            module_path: module_path.into(),
            work_dir: work_dir.into(),
            timeout,
            kill_grace,
        }
    }

    fn invoke(&self, arg: &str) -> Result<ScriptOutput> {
        scripts::run_with_timeout(&self.module_path, &[arg], self.timeout, self.kill_grace).map_err(|e| {
            AgentError::with_source(ErrorKind::Fatal, format!("module '{}' failed on {arg}", self.name), e)
        })
    }

    fn run_step(&self, arg: &str) -> Result<()> {
        let out = self.invoke(arg)?;
        if out.timed_out {
            return Err(AgentError::new(
                ErrorKind::Fatal,
                format!("module '{}' timed out on {arg}", self.name),
            ));
        }
        if !out.success() {
            return Err(AgentError::new(
                ErrorKind::Fatal,
                format!("module '{}' exited non-zero on {arg}: {}", self.name, out.stderr),
            ));
        }
        Ok(())
    }

    /// Runs a capability query; a module that doesn't understand the query
    /// (non-zero exit, or anything but an unambiguous `Yes`) answers `No`,
    /// matching the convention that unsupported commands are declined.
    fn query_yes_no(&self, arg: &str) -> bool {
        match self.invoke(arg) {
            Ok(out) if out.success() => out.stdout.trim().eq_ignore_ascii_case("yes"),
            _ => false,
        }
    }

    fn payload_path(&self) -> PathBuf {
        self.work_dir.join(PAYLOAD_FILE_NAME)
    }
}

impl PayloadInstaller for ModuleInstaller {
    fn initialize(&mut self) -> Result<()> {
        let dir = self.payload_path();
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to create module work dir", e))?;
        }
        Ok(())
    }

    fn prepare_store_update(&mut self) -> Result<()> {
        Ok(())
    }

    /// Writes the payload stream to the module's well-known file location,
    /// then invokes `Download`; the module reads the file itself rather
    /// than from stdin, mirroring how real update modules are given file
    /// paths instead of a piped stream.
    fn store_update(&mut self, reader: &mut dyn Read, size: u64) -> Result<()> {
        let path = self.payload_path();
        let mut file = fs::File::create(&path)
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to create module payload file", e))?;
        let written = std::io::copy(reader, &mut file)
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to write module payload", e))?;
        file.sync_all().ok();
        if written != size {
            return Err(AgentError::new(
                ErrorKind::Fatal,
                format!("module payload stream was {written} bytes, expected {size}"),
            ));
        }
        self.run_step("Download")
    }

    fn finish_store_update(&mut self) -> Result<()> {
        Ok(())
    }

    fn install_update(&mut self) -> Result<()> {
        self.run_step("ArtifactInstall")
    }

    fn needs_reboot(&self) -> bool {
        self.query_yes_no("NeedsArtifactReboot")
    }

    fn supports_rollback(&self) -> bool {
        self.query_yes_no("SupportsRollback")
    }

    fn commit_update(&mut self) -> Result<()> {
        self.run_step("ArtifactCommit")
    }

    fn rollback(&mut self) -> Result<()> {
        self.run_step("ArtifactRollback")
    }

    fn verify_reboot(&self) -> Result<()> {
        self.invoke("ArtifactVerifyReboot").and_then(|out| {
            if out.success() {
                Ok(())
            } else {
                Err(AgentError::new(ErrorKind::Fatal, format!("module '{}' failed ArtifactVerifyReboot", self.name)))
            }
        })
    }

    fn verify_rollback_reboot(&self) -> Result<()> {
        self.invoke("ArtifactVerifyRollbackReboot").and_then(|out| {
            if out.success() {
                Ok(())
            } else {
                Err(AgentError::new(
                    ErrorKind::Fatal,
                    format!("module '{}' failed ArtifactVerifyRollbackReboot", self.name),
                ))
            }
        })
    }

    fn failure(&mut self) -> Result<()> {
        self.run_step("ArtifactFailure")
    }

    fn cleanup(&mut self) -> Result<()> {
        let result = self.run_step("Cleanup");
        let _ = fs::remove_dir_all(&self.work_dir);
        result
    }

    fn get_type(&self) -> &PayloadType {
        &self.payload_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs::File, io::Write, os::unix::fs::PermissionsExt};

    fn write_module(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("module.sh");
        let mut file = File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn store_update_writes_payload_then_invokes_download() {
        let module_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let log = work_dir.path().join("calls.log");
        let module_path = write_module(
            module_dir.path(),
            &format!("#!/bin/sh\necho \"$1\" >> {}\n", log.display()),
        );

        let mut installer = ModuleInstaller::new("rootfs-image", module_path, work_dir.path(), Duration::from_secs(5));
        installer.initialize().unwrap();
        let payload = b"hello module";
        installer.store_update(&mut &payload[..], payload.len() as u64).unwrap();

        let calls = fs::read_to_string(&log).unwrap();
        assert_eq!(calls.trim(), "Download");
        let written = fs::read(installer.payload_path()).unwrap();
        assert_eq!(written, payload);
    }

    #[test]
    fn capability_query_reads_yes_no_from_stdout() {
        let module_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let module_path = write_module(module_dir.path(), "#!/bin/sh\necho Yes\n");

        let installer = ModuleInstaller::new("rootfs-image", module_path, work_dir.path(), Duration::from_secs(5));
        assert!(installer.supports_rollback());
        assert!(installer.needs_reboot());
    }

    #[test]
    fn unsupported_capability_query_defaults_to_no() {
        let module_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let module_path = write_module(module_dir.path(), "#!/bin/sh\nexit 1\n");

        let installer = ModuleInstaller::new("unknown", module_path, work_dir.path(), Duration::from_secs(5));
        assert!(!installer.supports_rollback());
    }

    #[test]
    fn timed_out_step_is_fatal() {
        let module_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let module_path = write_module(module_dir.path(), "#!/bin/sh\nsleep 30\n");

        let mut installer = ModuleInstaller::with_kill_grace(
            "slow",
            module_path,
            work_dir.path(),
            Duration::from_millis(50),
            Duration::from_millis(100),
        );
        let err = installer.install_update().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Fatal);
    }
}
