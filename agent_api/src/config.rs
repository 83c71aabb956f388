use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, ErrorKind, Result};

/// One deployment-service endpoint and the tenant token to present to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSpec {
    #[serde(rename = "ServerURL")]
    pub server_url: String,
    #[serde(rename = "TenantToken", default)]
    pub tenant_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpsClientConfig {
    #[serde(rename = "Certificate")]
    pub certificate: Option<PathBuf>,
    #[serde(rename = "Key")]
    pub key: Option<PathBuf>,
    #[serde(rename = "SkipVerify", default)]
    pub skip_verify: bool,
}

/// Raw on-disk shape of the configuration document (§6). Kept separate from
/// [`Config`] so the `ServerURL`/`Servers` mutual-exclusivity check happens
/// once, at load time, rather than being re-litigated by every reader.
/// Field names are spelled out explicitly rather than via `rename_all`,
/// since the wire format's acronyms (`ServerURL`, `RootfsPartA`) don't
/// follow a mechanical case-conversion rule.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(rename = "ServerURL")]
    server_url: Option<String>,
    #[serde(rename = "Servers")]
    servers: Option<Vec<ServerSpec>>,
    #[serde(rename = "TenantToken")]
    tenant_token: Option<String>,
    #[serde(rename = "ServerCertificate")]
    server_certificate: Option<PathBuf>,
    #[serde(rename = "HttpsClient", default)]
    https_client: HttpsClientConfig,
    #[serde(rename = "RootfsPartA")]
    rootfs_part_a: PathBuf,
    #[serde(rename = "RootfsPartB")]
    rootfs_part_b: PathBuf,
    #[serde(rename = "UpdatePollIntervalSeconds", default = "defaults::update_poll_interval_seconds")]
    update_poll_interval_seconds: u64,
    #[serde(rename = "InventoryPollIntervalSeconds", default = "defaults::inventory_poll_interval_seconds")]
    inventory_poll_interval_seconds: u64,
    #[serde(rename = "RetryPollIntervalSeconds", default = "defaults::retry_poll_interval_seconds")]
    retry_poll_interval_seconds: u64,
    #[serde(rename = "StateScriptTimeoutSeconds", default = "defaults::state_script_timeout_seconds")]
    state_script_timeout_seconds: u64,
    #[serde(rename = "StateScriptRetryIntervalSeconds", default = "defaults::state_script_retry_interval_seconds")]
    state_script_retry_interval_seconds: u64,
    #[serde(rename = "StateScriptRetryTimeoutSeconds", default = "defaults::state_script_retry_timeout_seconds")]
    state_script_retry_timeout_seconds: u64,
    #[serde(rename = "UpdateLogPath", default = "defaults::update_log_path")]
    update_log_path: PathBuf,
    #[serde(rename = "DeviceTypeFile")]
    device_type_file: PathBuf,
    #[serde(rename = "ArtifactInfoFile")]
    artifact_info_file: PathBuf,
    #[serde(rename = "ModulesPath", default = "defaults::modules_path")]
    modules_path: PathBuf,
    #[serde(rename = "ModulesWorkPath", default = "defaults::modules_work_path")]
    modules_work_path: PathBuf,
    #[serde(rename = "ModuleTimeoutSeconds", default = "defaults::module_timeout_seconds")]
    module_timeout_seconds: u64,
    #[serde(rename = "DataStorePath", default = "defaults::data_store_path")]
    data_store_path: PathBuf,
}

mod defaults {
    use std::path::PathBuf;

    pub fn update_poll_interval_seconds() -> u64 {
        1800
    }
    pub fn inventory_poll_interval_seconds() -> u64 {
        28800
    }
    pub fn retry_poll_interval_seconds() -> u64 {
        300
    }
    pub fn state_script_timeout_seconds() -> u64 {
        60
    }
    pub fn state_script_retry_interval_seconds() -> u64 {
        60
    }
    pub fn state_script_retry_timeout_seconds() -> u64 {
        1800
    }
    pub fn update_log_path() -> PathBuf {
        PathBuf::from("/var/lib/fleetward/log")
    }
    pub fn modules_path() -> PathBuf {
        PathBuf::from("/usr/share/fleetward/modules/v3")
    }
    pub fn modules_work_path() -> PathBuf {
        PathBuf::from("/var/lib/fleetward/modules/v3")
    }
    pub fn module_timeout_seconds() -> u64 {
        2400
    }
    pub fn data_store_path() -> PathBuf {
        PathBuf::from("/var/lib/fleetward")
    }
}

/// Resolved, validated configuration. `Config::load` is the only entry point;
/// parsing and cross-field validation both happen there so components only
/// ever see an internally-consistent value.
#[derive(Debug, Clone)]
pub struct Config {
    pub servers: Vec<ServerSpec>,
    pub server_certificate: Option<PathBuf>,
    pub https_client: HttpsClientConfig,
    pub rootfs_part_a: PathBuf,
    pub rootfs_part_b: PathBuf,
    pub update_poll_interval: Duration,
    pub inventory_poll_interval: Duration,
    pub retry_poll_interval: Duration,
    pub state_script_timeout: Duration,
    pub state_script_retry_interval: Duration,
    pub state_script_retry_timeout: Duration,
    pub update_log_path: PathBuf,
    pub device_type_file: PathBuf,
    pub artifact_info_file: PathBuf,
    pub modules_path: PathBuf,
    pub modules_work_path: PathBuf,
    pub module_timeout: Duration,
    pub data_store_path: PathBuf,
}

impl Config {
    /// Loads and validates a single JSON configuration document. Merging
    /// multiple files, `-fallback-config` precedence, and CLI-flag overrides
    /// are a command-line-surface concern and out of scope here.
    pub fn load(path: &std::path::Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AgentError::with_source(
                ErrorKind::Config,
                format!("failed to read config file '{}'", path.display()),
                e,
            )
        })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|e| {
            AgentError::with_source(
                ErrorKind::Config,
                format!("failed to parse config file '{}'", path.display()),
                e,
            )
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Config> {
        let servers = match (raw.server_url, raw.servers) {
            (Some(_), Some(_)) => {
                return Err(AgentError::new(
                    ErrorKind::Config,
                    "ServerURL and Servers are mutually exclusive",
                ))
            }
            (Some(url), None) => vec![ServerSpec {
                server_url: url,
                tenant_token: raw.tenant_token.clone().unwrap_or_default(),
            }],
            (None, Some(servers)) => {
                if servers.is_empty() {
                    return Err(AgentError::new(ErrorKind::Config, "Servers is empty"));
                }
                servers
            }
            (None, None) => {
                return Err(AgentError::new(
                    ErrorKind::Config,
                    "one of ServerURL or Servers must be set",
                ))
            }
        };

        if raw.rootfs_part_a == raw.rootfs_part_b {
            return Err(AgentError::new(
                ErrorKind::Config,
                "RootfsPartA and RootfsPartB must be distinct",
            ));
        }

        Ok(Config {
            servers,
            server_certificate: raw.server_certificate,
            https_client: raw.https_client,
            rootfs_part_a: raw.rootfs_part_a,
            rootfs_part_b: raw.rootfs_part_b,
            update_poll_interval: Duration::from_secs(raw.update_poll_interval_seconds),
            inventory_poll_interval: Duration::from_secs(raw.inventory_poll_interval_seconds),
            retry_poll_interval: Duration::from_secs(raw.retry_poll_interval_seconds),
            state_script_timeout: Duration::from_secs(raw.state_script_timeout_seconds),
            state_script_retry_interval: Duration::from_secs(
                raw.state_script_retry_interval_seconds,
            ),
            state_script_retry_timeout: Duration::from_secs(
                raw.state_script_retry_timeout_seconds,
            ),
            update_log_path: raw.update_log_path,
            device_type_file: raw.device_type_file,
            artifact_info_file: raw.artifact_info_file,
            modules_path: raw.modules_path,
            modules_work_path: raw.modules_work_path,
            module_timeout: Duration::from_secs(raw.module_timeout_seconds),
            data_store_path: raw.data_store_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn rejects_server_url_and_servers_both_set() {
        let file = write_config(
            r#"{
                "ServerURL": "https://a",
                "Servers": [{"ServerURL": "https://b"}],
                "RootfsPartA": "/dev/mmcblk0p2",
                "RootfsPartB": "/dev/mmcblk0p3",
                "DeviceTypeFile": "/etc/device-type",
                "ArtifactInfoFile": "/etc/artifact-info"
            }"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config));
    }

    #[test]
    fn single_server_url_becomes_one_server_spec() {
        let file = write_config(
            r#"{
                "ServerURL": "https://a",
                "TenantToken": "t1",
                "RootfsPartA": "/dev/mmcblk0p2",
                "RootfsPartB": "/dev/mmcblk0p3",
                "DeviceTypeFile": "/etc/device-type",
                "ArtifactInfoFile": "/etc/artifact-info"
            }"#,
        );
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.servers.len(), 1);
        assert_eq!(cfg.servers[0].server_url, "https://a");
        assert_eq!(cfg.servers[0].tenant_token, "t1");
    }

    #[test]
    fn rejects_matching_partitions() {
        let file = write_config(
            r#"{
                "ServerURL": "https://a",
                "RootfsPartA": "/dev/mmcblk0p2",
                "RootfsPartB": "/dev/mmcblk0p2",
                "DeviceTypeFile": "/etc/device-type",
                "ArtifactInfoFile": "/etc/artifact-info"
            }"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Config));
    }
}
