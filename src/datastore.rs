//! Owns the flat-file persisted layout under the configured data directory
//! (§6): the device key, bearer token, state checkpoint, provides store and
//! installed-artifact name. Every write goes through a temp-file-then-rename
//! so a crash mid-write never leaves a torn file, the same all-or-nothing
//! guarantee the Boot Environment gives its own writes.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use agent_api::{
    error::{AgentError, ErrorKind, Result},
    status::StateCheckpoint,
};
use serde::{de::DeserializeOwned, Serialize};

pub const KEY_FILE: &str = "mender-agent.pem";
pub const TOKEN_FILE: &str = "authtoken";
pub const STANDALONE_STATE_FILE: &str = "standalone-state";
pub const PROVIDES_FILE: &str = "provides";
pub const ARTIFACT_NAME_FILE: &str = "artifact-name";

/// Owned once by the daemon for its lifetime (§5: "the data store is opened
/// once by the daemon and owned for its lifetime").
pub struct DataStore {
    root: PathBuf,
}

impl DataStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            AgentError::with_source(
                ErrorKind::Io,
                format!("failed to create data store directory '{}'", root.display()),
                e,
            )
        })?;
        Ok(DataStore { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn read_bytes(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.file(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::with_source(
                ErrorKind::Io,
                format!("failed to read '{name}'"),
                e,
            )),
        }
    }

    /// Writes `bytes` to `name` via a temp file in the same directory plus a
    /// rename, so the update is atomic from the filesystem's point of view.
    pub fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.file(name);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(|e| {
            AgentError::with_source(ErrorKind::Io, "failed to create temp file", e)
        })?;
        use std::io::Write;
        tmp.write_all(bytes)
            .map_err(|e| AgentError::with_source(ErrorKind::Io, "failed to write temp file", e))?;
        tmp.as_file().sync_all().map_err(|e| {
            AgentError::with_source(ErrorKind::Io, "failed to sync temp file", e)
        })?;
        tmp.persist(&dest).map_err(|e| {
            AgentError::with_source(
                ErrorKind::Io,
                format!("failed to persist '{}'", dest.display()),
                e.error,
            )
        })?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.file(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AgentError::with_source(
                ErrorKind::Io,
                format!("failed to remove '{name}'"),
                e,
            )),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.read_bytes(name)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(name, &bytes)
    }

    // --- Device key (owned exclusively by the Authorization Manager) ---

    pub fn read_key_pem(&self) -> Result<Option<Vec<u8>>> {
        self.read_bytes(KEY_FILE)
    }

    pub fn write_key_pem(&self, pem: &[u8]) -> Result<()> {
        self.write_atomic(KEY_FILE, pem)
    }

    // --- Bearer token ---

    pub fn read_token(&self) -> Result<Vec<u8>> {
        Ok(self.read_bytes(TOKEN_FILE)?.unwrap_or_default())
    }

    pub fn write_token(&self, token: &[u8]) -> Result<()> {
        self.write_atomic(TOKEN_FILE, token)
    }

    pub fn remove_token(&self) -> Result<()> {
        self.remove(TOKEN_FILE)
    }

    // --- State checkpoint ---

    pub fn read_checkpoint(&self) -> Result<Option<StateCheckpoint>> {
        self.read_json(STANDALONE_STATE_FILE)
    }

    pub fn write_checkpoint(&self, checkpoint: &StateCheckpoint) -> Result<()> {
        self.write_json(STANDALONE_STATE_FILE, checkpoint)
    }

    pub fn clear_checkpoint(&self) -> Result<()> {
        self.remove(STANDALONE_STATE_FILE)
    }

    // --- Provides store ---

    pub fn read_provides(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.read_json(PROVIDES_FILE)?.unwrap_or_default())
    }

    pub fn write_provides(&self, provides: &BTreeMap<String, String>) -> Result<()> {
        self.write_json(PROVIDES_FILE, provides)
    }

    // --- Installed artifact name ---

    pub fn read_artifact_name(&self) -> Result<String> {
        Ok(self
            .read_bytes(ARTIFACT_NAME_FILE)?
            .map(|b| String::from_utf8_lossy(&b).trim().to_string())
            .unwrap_or_default())
    }

    pub fn write_artifact_name(&self, name: &str) -> Result<()> {
        self.write_atomic(ARTIFACT_NAME_FILE, name.as_bytes())
    }
}

/// Applies an artifact's provides/clears-provides to the current store, per
/// the invariant in §3: the new store is exactly the union of `provides`
/// minus `clears_provides`, applied to the previous store.
pub fn apply_provides(
    previous: &BTreeMap<String, String>,
    provides: &BTreeMap<String, String>,
    clears_provides: &[String],
) -> BTreeMap<String, String> {
    let mut next = previous.clone();
    for key in clears_provides {
        next.remove(key);
    }
    for (key, value) in provides {
        next.insert(key.clone(), value.clone());
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_token_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open(dir.path()).unwrap();
        store.write_token(b"abc123").unwrap();
        assert_eq!(store.read_token().unwrap(), b"abc123");
    }

    #[test]
    fn missing_token_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open(dir.path()).unwrap();
        assert_eq!(store.read_token().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::open(dir.path()).unwrap();
        assert!(store.read_checkpoint().unwrap().is_none());

        let checkpoint = StateCheckpoint::new("update-install");
        store.write_checkpoint(&checkpoint).unwrap();
        assert_eq!(store.read_checkpoint().unwrap(), Some(checkpoint));

        store.clear_checkpoint().unwrap();
        assert!(store.read_checkpoint().unwrap().is_none());
    }

    #[test]
    fn apply_provides_is_union_minus_cleared() {
        let mut previous = BTreeMap::new();
        previous.insert("rootfs-image.version".to_string(), "v1".to_string());
        previous.insert("data-partition.version".to_string(), "d1".to_string());

        let mut provides = BTreeMap::new();
        provides.insert("rootfs-image.version".to_string(), "v2".to_string());

        let next = apply_provides(&previous, &provides, &["data-partition.version".to_string()]);

        let mut expected = BTreeMap::new();
        expected.insert("rootfs-image.version".to_string(), "v2".to_string());
        assert_eq!(next, expected);
    }
}
