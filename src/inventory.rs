//! Inventory Reporter (§4.13 ADDED detail in the expanded spec): runs every
//! executable in the inventory-scripts directory, merges `key=value`
//! output (last writer wins), and submits the result. Shares its script
//! execution primitives with the Identity Provider.

use std::{path::PathBuf, time::Duration};

use agent_api::error::{AgentError, ErrorKind, Result};
use osutils::scripts;

const SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);
const KILL_GRACE: Duration = Duration::from_secs(10);

pub struct InventoryReporter {
    scripts_dir: PathBuf,
}

impl InventoryReporter {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        InventoryReporter {
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Runs every script in lexicographic order, merging their parsed
    /// `key=value` output (later scripts overwrite earlier ones on key
    /// collision). `Transient` if every script fails to run or exits
    /// unsuccessfully — a single bad helper shouldn't silently blank the
    /// whole report, but persistent individual failures shouldn't block the
    /// whole daemon either.
    pub fn collect(&self) -> Result<std::collections::BTreeMap<String, String>> {
        let paths = scripts::list_executables(&self.scripts_dir).map_err(|e| {
            AgentError::with_source(ErrorKind::Io, "failed to list inventory scripts", e)
        })?;

        let mut attrs = std::collections::BTreeMap::new();
        let mut ran_any = false;

        for path in &paths {
            let output = match scripts::run_with_timeout(path, &[], SCRIPT_TIMEOUT, KILL_GRACE) {
                Ok(out) if out.success() => out,
                _ => continue,
            };
            ran_any = true;
            if let Ok(pairs) = scripts::parse_key_value_lines(&output.stdout) {
                for (key, value) in pairs {
                    attrs.insert(key, value);
                }
            }
        }

        if !paths.is_empty() && !ran_any {
            return Err(AgentError::new(
                ErrorKind::Transient,
                "every inventory script failed",
            ));
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Write, os::unix::fs::PermissionsExt};

    fn write_script(dir: &std::path::Path, name: &str, body: &str) {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
    }

    #[test]
    fn merges_output_with_last_writer_winning() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "a.sh", "#!/bin/sh\necho device_type=rpi\n");
        write_script(dir.path(), "b.sh", "#!/bin/sh\necho device_type=rpi4\n");

        let reporter = InventoryReporter::new(dir.path());
        let attrs = reporter.collect().unwrap();
        assert_eq!(attrs.get("device_type").map(String::as_str), Some("rpi4"));
    }

    #[test]
    fn missing_directory_yields_empty_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = InventoryReporter::new(dir.path().join("nope"));
        assert!(reporter.collect().unwrap().is_empty());
    }

    #[test]
    fn all_scripts_failing_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "a.sh", "#!/bin/sh\nexit 1\n");

        let reporter = InventoryReporter::new(dir.path());
        let err = reporter.collect().unwrap_err();
        assert!(err.is_transient());
    }
}
