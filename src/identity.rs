//! Identity Provider (§4.11): runs every executable in the identity-scripts
//! directory and merges their `key=value` output into an attribute map sent
//! with authorization requests.

use std::{path::Path, time::Duration};

use agent_api::{
    error::{AgentError, ErrorKind, Result},
    status::{AttributeMap, AttributeValue},
};
use osutils::scripts;

const SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);
const KILL_GRACE: Duration = Duration::from_secs(10);

pub struct IdentityProvider {
    scripts_dir: std::path::PathBuf,
}

impl IdentityProvider {
    pub fn new(scripts_dir: impl Into<std::path::PathBuf>) -> Self {
        IdentityProvider {
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Runs every executable in the scripts directory in lexicographic order
    /// and merges their parsed output, last writer wins on key collision. A
    /// missing directory simply yields an empty identity.
    pub fn collect(&self) -> Result<AttributeMap> {
        let paths = scripts::list_executables(&self.scripts_dir)
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to list identity scripts", e))?;

        let mut attrs = AttributeMap::new();
        for path in paths {
            let output = scripts::run_with_timeout(&path, &[], SCRIPT_TIMEOUT, KILL_GRACE)
                .map_err(|e| AgentError::with_source(ErrorKind::Io, "identity script failed to run", e))?;
            if !output.success() {
                return Err(AgentError::new(
                    ErrorKind::Fatal,
                    format!(
                        "identity script '{}' exited unsuccessfully",
                        path.display()
                    ),
                ));
            }
            merge_output(&mut attrs, &output.stdout, &path)?;
        }
        Ok(attrs)
    }
}

fn merge_output(attrs: &mut AttributeMap, stdout: &str, source: &Path) -> Result<()> {
    let pairs = scripts::parse_key_value_lines(stdout).map_err(|e| {
        AgentError::new(
            ErrorKind::Parse,
            format!("malformed output from '{}': {e}", source.display()),
        )
    })?;
    for (key, value) in pairs {
        attrs.insert(key, parse_attribute_value(&value));
    }
    Ok(())
}

/// A value that parses as a JSON array of strings becomes a `List`; anything
/// else is kept as the raw scalar string.
fn parse_attribute_value(value: &str) -> AttributeValue {
    if value.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(value) {
            return AttributeValue::List(list);
        }
    }
    AttributeValue::Scalar(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_value_stays_scalar() {
        assert_eq!(
            parse_attribute_value("aa:bb:cc"),
            AttributeValue::Scalar("aa:bb:cc".to_string())
        );
    }

    #[test]
    fn json_array_becomes_list() {
        assert_eq!(
            parse_attribute_value(r#"["eth0","eth1"]"#),
            AttributeValue::List(vec!["eth0".to_string(), "eth1".to_string()])
        );
    }

    #[test]
    fn malformed_array_falls_back_to_scalar() {
        assert_eq!(
            parse_attribute_value("[not json"),
            AttributeValue::Scalar("[not json".to_string())
        );
    }

    #[test]
    fn missing_scripts_dir_yields_empty_identity() {
        let dir = tempfile::tempdir().unwrap();
        let provider = IdentityProvider::new(dir.path().join("does-not-exist"));
        assert!(provider.collect().unwrap().is_empty());
    }
}
