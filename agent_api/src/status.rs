use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reserved boot-environment keys the core reads and writes (§6).
pub mod boot_vars {
    pub const MENDER_BOOT_PART: &str = "mender_boot_part";
    pub const MENDER_BOOT_PART_HEX: &str = "mender_boot_part_hex";
    pub const UPGRADE_AVAILABLE: &str = "upgrade_available";
    pub const BOOTCOUNT: &str = "bootcount";
}

/// A device identity attribute: either a single string or a list of strings
/// (§4.11 — a helper-script value that looks like a JSON array literal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttributeValue {
    Scalar(String),
    List(Vec<String>),
}

pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Update Descriptor received from the deployment-check endpoint (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateDescriptor {
    pub id: String,
    pub artifact_name: String,
    #[serde(default)]
    pub device_types_compatible: Vec<String>,
    pub source_uri: String,
    pub size: u64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub depends: BTreeMap<String, String>,
    #[serde(default)]
    pub provides: BTreeMap<String, String>,
    #[serde(default)]
    pub clears_provides: Vec<String>,
}

/// Deployment status values submitted via the status-report endpoint (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    Downloading,
    Installing,
    Rebooting,
    Success,
    Failure,
    AlreadyInstalled,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Downloading => "downloading",
            DeploymentStatus::Installing => "installing",
            DeploymentStatus::Rebooting => "rebooting",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failure => "failure",
            DeploymentStatus::AlreadyInstalled => "already-installed",
        }
    }
}

/// Current checkpoint format version. Bumped whenever the shape below
/// changes in an incompatible way; `StateCheckpoint::load` rejects any other
/// value rather than guessing at a migration.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Crash-tolerant record of where the state machine currently sits (§3,§4.9).
/// Absence of the file on disk means "no deployment in progress".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateCheckpoint {
    pub version: u32,
    pub state_id: String,
    #[serde(default)]
    pub deployment_id: String,
    #[serde(default)]
    pub payload_types: Vec<String>,
    #[serde(default)]
    pub artifact_name: String,
    pub rollback_supported: bool,
    pub reboot_needed: bool,
}

impl StateCheckpoint {
    pub fn new(state_id: impl Into<String>) -> Self {
        StateCheckpoint {
            version: CHECKPOINT_VERSION,
            state_id: state_id.into(),
            deployment_id: String::new(),
            payload_types: Vec::new(),
            artifact_name: String::new(),
            rollback_supported: false,
            reboot_needed: false,
        }
    }
}
