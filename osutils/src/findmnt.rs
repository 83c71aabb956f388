//! Wraps the `findmnt` command to resolve the device currently mounted at a
//! given mountpoint. Preferred over hand-parsing `/proc/self/mountinfo`
//! because `findmnt --json` gives us typed, already-escaped fields.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dependencies::Dependency;

#[derive(Debug, Deserialize)]
struct FindMnt {
    filesystems: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    source: Option<String>,
}

/// Returns the device path `findmnt` reports as the source for `target`
/// (e.g. `/`), or `None` if nothing is mounted there.
pub fn source_for_mountpoint(target: &Path) -> Result<Option<PathBuf>, crate::dependencies::DependencyError> {
    let stdout = Dependency::Findmnt
        .cmd()
        .args(["--json", "--noheadings", "--output", "source"])
        .arg(target)
        .run_and_capture()?;

    let parsed: FindMnt = match serde_json::from_str(&stdout) {
        Ok(parsed) => parsed,
        Err(_) => return Ok(None),
    };

    Ok(parsed
        .filesystems
        .into_iter()
        .next()
        .and_then(|entry| entry.source)
        .map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_findmnt_json_source() {
        let json = r#"{"filesystems": [{"source": "/dev/mmcblk0p2"}]}"#;
        let parsed: FindMnt = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.filesystems[0].source.as_deref(), Some("/dev/mmcblk0p2"));
    }
}
