//! Boot Environment: read/atomically-write the bootloader's key/value
//! variable area via the `fw_printenv`/`fw_setenv` tool pair (§4.1).

use std::collections::BTreeMap;

use agent_api::error::{AgentError, ErrorKind, Result};
use osutils::dependencies::Dependency;

pub struct BootEnvironment;

impl BootEnvironment {
    pub fn new() -> Self {
        BootEnvironment
    }

    /// Reads the requested variables. A name `fw_printenv` doesn't know about
    /// is simply absent from the result; a line that isn't `KEY=VALUE` is a
    /// hard `Parse` error, since at that point we can no longer trust the
    /// tool's output format.
    pub fn read(&self, names: &[&str]) -> Result<BTreeMap<String, String>> {
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        let stdout = Dependency::FwPrintenv
            .cmd()
            .args(names)
            .run_and_capture()
            .map_err(|e| {
                AgentError::with_source(ErrorKind::Io, "fw_printenv failed", e)
            })?;

        parse_printenv_output(&stdout)
    }

    /// Writes `vars` in one batch invocation of `fw_setenv -script -`, so the
    /// update is all-or-nothing: either the bootloader sees every variable
    /// applied, or (on tool failure) none of them.
    pub fn write(&self, vars: &BTreeMap<String, String>) -> Result<()> {
        let mut script = String::new();
        for (key, value) in vars {
            script.push_str(key);
            script.push(' ');
            script.push_str(value);
            script.push('\n');
        }

        Dependency::FwSetenv
            .cmd()
            .args(["-script", "-"])
            .stdin_bytes(script.into_bytes())
            .run()
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "fw_setenv failed", e))
    }
}

impl Default for BootEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_printenv_output(stdout: &str) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(AgentError::new(
                ErrorKind::Parse,
                format!("malformed fw_printenv line: '{line}'"),
            ));
        };
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_output() {
        let vars = parse_printenv_output("mender_boot_part=2\nupgrade_available=0\n").unwrap();
        assert_eq!(vars.get("mender_boot_part").map(String::as_str), Some("2"));
        assert_eq!(vars.get("upgrade_available").map(String::as_str), Some("0"));
    }

    #[test]
    fn rejects_malformed_line() {
        let err = parse_printenv_output("mender_boot_part 2\n").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Parse));
    }

    #[test]
    fn missing_key_is_simply_absent() {
        let vars = parse_printenv_output("mender_boot_part=2\n").unwrap();
        assert!(!vars.contains_key("bootcount"));
    }
}
