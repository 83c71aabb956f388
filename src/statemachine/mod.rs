//! State Machine Core (§4.9): the deployment state graph, expressed as data
//! per §9 Design Notes ("transition graph as values") — each state is a
//! value with an id, a state-script dispatch name, and a pure `step`
//! function returning the next state. Grounded on the teacher's
//! `engine::update`/`engine::rollback` sequencing and `datastore.rs`
//! checkpoint-before-mutation pattern.

pub mod checkpoint;

use std::{cell::Cell, thread, time::Duration};

use agent_api::{
    config::ServerSpec,
    error::{AgentError, ErrorKind, Result},
    status::{AttributeMap, DeploymentStatus, UpdateDescriptor},
};
use serde::Serialize;

use crate::{
    authz::AuthorizationManager,
    bootenv::BootEnvironment,
    datastore::{self, DataStore},
    installer::{dualrootfs::DualRootfsInstaller, PayloadInstaller},
    partition::PartitionResolver,
    retry::RetryPlan,
    transport::HttpTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateId {
    Init,
    Idle,
    AuthorizeWait,
    Authorize,
    CheckWait,
    UpdateCheck,
    InventoryUpdate,
    UpdateFetch,
    UpdateStore,
    UpdateInstall,
    ArtifactRebootEnter,
    Reboot,
    ArtifactRebootLeave,
    VerifyReboot,
    ArtifactCommit,
    Cleanup,
    Rollback,
    ArtifactRollbackReboot,
    VerifyRollbackReboot,
    Failure,
    UpdateError,
}

impl StateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateId::Init => "Init",
            StateId::Idle => "Idle",
            StateId::AuthorizeWait => "AuthorizeWait",
            StateId::Authorize => "Authorize",
            StateId::CheckWait => "CheckWait",
            StateId::UpdateCheck => "UpdateCheck",
            StateId::InventoryUpdate => "InventoryUpdate",
            StateId::UpdateFetch => "UpdateFetch",
            StateId::UpdateStore => "UpdateStore",
            StateId::UpdateInstall => "UpdateInstall",
            StateId::ArtifactRebootEnter => "ArtifactReboot_Enter",
            StateId::Reboot => "Reboot",
            StateId::ArtifactRebootLeave => "ArtifactReboot_Leave",
            StateId::VerifyReboot => "VerifyReboot",
            StateId::ArtifactCommit => "ArtifactCommit",
            StateId::Cleanup => "Cleanup",
            StateId::Rollback => "Rollback",
            StateId::ArtifactRollbackReboot => "ArtifactRollbackReboot_Enter",
            StateId::VerifyRollbackReboot => "VerifyRollbackReboot",
            StateId::Failure => "Failure",
            StateId::UpdateError => "UpdateError",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "Init" => StateId::Init,
            "Idle" => StateId::Idle,
            "AuthorizeWait" => StateId::AuthorizeWait,
            "Authorize" => StateId::Authorize,
            "CheckWait" => StateId::CheckWait,
            "UpdateCheck" => StateId::UpdateCheck,
            "InventoryUpdate" => StateId::InventoryUpdate,
            "UpdateFetch" => StateId::UpdateFetch,
            "UpdateStore" => StateId::UpdateStore,
            "UpdateInstall" => StateId::UpdateInstall,
            "ArtifactReboot_Enter" => StateId::ArtifactRebootEnter,
            "Reboot" => StateId::Reboot,
            "ArtifactReboot_Leave" => StateId::ArtifactRebootLeave,
            "VerifyReboot" => StateId::VerifyReboot,
            "ArtifactCommit" => StateId::ArtifactCommit,
            "Cleanup" => StateId::Cleanup,
            "Rollback" => StateId::Rollback,
            "ArtifactRollbackReboot_Enter" => StateId::ArtifactRollbackReboot,
            "VerifyRollbackReboot" => StateId::VerifyRollbackReboot,
            "Failure" => StateId::Failure,
            "UpdateError" => StateId::UpdateError,
            _ => return None,
        })
    }

    /// Recovery states whose state scripts run even on non-zero exit
    /// (§4.9: "the recovery states: Idle, ArtifactRollback,
    /// ArtifactRollbackReboot_Enter").
    pub fn ignores_script_errors(&self) -> bool {
        matches!(
            self,
            StateId::Idle | StateId::Rollback | StateId::ArtifactRollbackReboot
        )
    }

    /// True if a bare process restart can safely continue from this state.
    /// `UpdateInstall`, `Reboot` and its bracketing states leave the boot
    /// environment or the running kernel in a state a restarted process
    /// cannot tell apart from "reboot already happened" vs "it didn't", so
    /// those collapse to `Rollback`/`Failure` instead (§4.9).
    pub fn is_resumable(&self) -> bool {
        !matches!(
            self,
            StateId::UpdateInstall
                | StateId::ArtifactRebootEnter
                | StateId::Reboot
                | StateId::ArtifactRebootLeave
        )
    }

    /// States at or after `UpdateInstall`, whose failure mode cannot be
    /// safely retried from scratch and so must checkpoint before entry.
    pub fn requires_checkpoint(&self) -> bool {
        matches!(
            self,
            StateId::UpdateInstall
                | StateId::ArtifactRebootEnter
                | StateId::Reboot
                | StateId::ArtifactRebootLeave
                | StateId::VerifyReboot
                | StateId::ArtifactCommit
                | StateId::Rollback
                | StateId::ArtifactRollbackReboot
                | StateId::VerifyRollbackReboot
        )
    }
}

/// Context for one deployment attempt, threaded through every transition.
#[derive(Debug, Clone, Default)]
pub struct DeploymentContext {
    pub deployment_id: String,
    pub artifact_name: String,
    pub payload_types: Vec<String>,
    pub rollback_supported: bool,
    pub reboot_needed: bool,
    pub current_artifact_name: String,
    pub update: Option<UpdateDescriptor>,
    pub attempt: u32,
}

pub struct StateMachine<'a> {
    pub boot_env: &'a BootEnvironment,
    pub data_store: &'a DataStore,
    pub authz: &'a AuthorizationManager<'a>,
    pub transport: &'a HttpTransport,
    pub retry_plan: RetryPlan,
    /// Failover list (spec.md §6: "a list of servers is used for failover:
    /// on a per-deployment retry the next server is tried"). Must be
    /// non-empty; `Config::load` rejects an empty list.
    pub servers: Vec<ServerSpec>,
    /// Index into `servers` currently in use. Advances on a transient
    /// network failure and is reset to 0 whenever `Idle` is entered, so the
    /// failover only persists for the remainder of one deployment attempt.
    server_index: Cell<usize>,
    pub device_type: String,
}

impl<'a> StateMachine<'a> {
    pub fn new(
        boot_env: &'a BootEnvironment,
        data_store: &'a DataStore,
        authz: &'a AuthorizationManager<'a>,
        transport: &'a HttpTransport,
        retry_plan: RetryPlan,
        servers: Vec<ServerSpec>,
        device_type: String,
    ) -> Self {
        StateMachine {
            boot_env,
            data_store,
            authz,
            transport,
            retry_plan,
            servers,
            server_index: Cell::new(0),
            device_type,
        }
    }

    /// Advances exactly one transition from `current`, returning the next
    /// state. Network/installer side effects happen inline; persistence
    /// happens before any state `requires_checkpoint()`.
    pub fn step(
        &self,
        current: StateId,
        ctx: &mut DeploymentContext,
        resolver: Option<&PartitionResolver>,
        identity: &AttributeMap,
    ) -> Result<StateId> {
        if current.requires_checkpoint() {
            checkpoint::persist(
                self.data_store,
                current,
                &ctx.deployment_id,
                &ctx.payload_types,
                &ctx.artifact_name,
                ctx.rollback_supported,
                ctx.reboot_needed,
            )?;
        }

        match current {
            StateId::Init => Ok(StateId::Idle),
            StateId::Idle => {
                self.server_index.set(0);
                if self.authz.is_authorized()? {
                    Ok(StateId::CheckWait)
                } else {
                    Ok(StateId::AuthorizeWait)
                }
            }
            StateId::AuthorizeWait => Ok(StateId::Authorize),
            StateId::Authorize => self.do_authorize(identity),
            StateId::CheckWait => Ok(StateId::UpdateCheck),
            StateId::UpdateCheck => self.do_update_check(ctx, identity),
            StateId::InventoryUpdate => Ok(StateId::CheckWait),
            StateId::UpdateFetch => Ok(StateId::UpdateStore),
            StateId::UpdateStore => self.do_update_store(ctx, resolver, identity),
            StateId::UpdateInstall => self.do_update_install(ctx, resolver, identity),
            StateId::ArtifactRebootEnter => Ok(StateId::Reboot),
            StateId::Reboot => Ok(StateId::ArtifactRebootLeave),
            StateId::ArtifactRebootLeave => Ok(StateId::VerifyReboot),
            StateId::VerifyReboot => self.do_verify_reboot(ctx, resolver, identity),
            StateId::ArtifactCommit => self.do_commit(ctx, resolver, identity),
            StateId::Cleanup => Ok(StateId::Idle),
            StateId::Rollback => self.do_rollback(ctx, resolver),
            StateId::ArtifactRollbackReboot => Ok(StateId::VerifyRollbackReboot),
            StateId::VerifyRollbackReboot => self.do_verify_rollback_reboot(ctx, resolver, identity),
            StateId::Failure => {
                self.report_status(ctx, DeploymentStatus::Failure, identity)?;
                Ok(StateId::Cleanup)
            }
            StateId::UpdateError => Ok(StateId::Failure),
        }
    }

    /// Runs `op` against the currently active server's base URL; on a
    /// transient failure, advances to the next server (wrapping) and
    /// retries, up to once per configured server (spec.md §6 multi-server
    /// failover: "on a per-deployment retry the next server is tried").
    fn with_server_failover<T>(&self, op: impl Fn(&str) -> Result<T>) -> Result<T> {
        let n = self.servers.len();
        let mut last_err = None;
        for _ in 0..n {
            let base_url = self.servers[self.server_index.get()].server_url.clone();
            match op(&base_url) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    last_err = Some(e);
                    self.server_index.set((self.server_index.get() + 1) % n);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| AgentError::new(ErrorKind::Fatal, "no servers configured")))
    }

    /// Signs and submits a fresh authorization request, storing the
    /// returned token. Shared by the `Authorize` state and by
    /// [`Self::report_status`]'s inline re-authorization on a 401.
    fn authorize_now(&self, identity: &AttributeMap) -> Result<()> {
        let request = self.authz.make_auth_request(identity.clone())?;
        let signature_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &request.signature);
        let token = self.with_server_failover(|base_url| {
            let url = format!("{base_url}/api/devices/v1/authentication/auth_requests");
            self.transport.authorize(&url, &request.body, &signature_b64)
        })?;
        self.authz.receive_auth_response(&token)
    }

    fn do_authorize(&self, identity: &AttributeMap) -> Result<StateId> {
        match self.authorize_now(identity) {
            Ok(()) => Ok(StateId::CheckWait),
            Err(e) if e.is_transient() => Ok(StateId::AuthorizeWait),
            Err(e) => Err(e),
        }
    }

    fn do_update_check(&self, ctx: &mut DeploymentContext, identity: &AttributeMap) -> Result<StateId> {
        #[derive(Serialize)]
        struct CheckBody {
            provides: std::collections::BTreeMap<String, String>,
        }
        let provides = self.data_store.read_provides()?;
        let token = self.authz.auth_token()?;
        let token = String::from_utf8_lossy(&token).into_owned();
        let body = CheckBody { provides };

        let result = self.with_server_failover(|base_url| {
            let url = format!(
                "{base_url}/api/devices/v1/deployments/device/deployments/next?artifact_name={}&device_type={}",
                ctx.current_artifact_name, self.device_type
            );
            self.transport.check_update(&url, &token, &body)
        });

        match result {
            Ok(None) => Ok(StateId::CheckWait),
            Ok(Some(bytes)) => {
                let descriptor: UpdateDescriptor = serde_json::from_slice(&bytes)?;
                if descriptor.artifact_name == ctx.current_artifact_name {
                    ctx.deployment_id = descriptor.id.clone();
                    self.report_status(ctx, DeploymentStatus::AlreadyInstalled, identity)?;
                    ctx.deployment_id.clear();
                    return Ok(StateId::CheckWait);
                }
                if !descriptor.device_types_compatible.is_empty()
                    && !descriptor.device_types_compatible.contains(&self.device_type)
                {
                    return Ok(StateId::Failure);
                }
                ctx.deployment_id = descriptor.id.clone();
                ctx.artifact_name = descriptor.artifact_name.clone();
                ctx.update = Some(descriptor);
                Ok(StateId::UpdateFetch)
            }
            Err(e) if e.is_not_authorized() => {
                self.authz.remove_auth_token()?;
                Ok(StateId::AuthorizeWait)
            }
            Err(e) if e.is_transient() => Ok(StateId::CheckWait),
            Err(e) => Err(e),
        }
    }

    fn do_update_store(
        &self,
        ctx: &mut DeploymentContext,
        resolver: Option<&PartitionResolver>,
        identity: &AttributeMap,
    ) -> Result<StateId> {
        let descriptor = ctx.update.clone().ok_or_else(|| {
            AgentError::new(ErrorKind::Fatal, "UpdateStore entered without an update descriptor")
        })?;
        let resolver = resolver.ok_or_else(|| {
            AgentError::new(ErrorKind::Fatal, "partition resolver unavailable")
        })?;
        let token = self.authz.auth_token()?;
        let token = String::from_utf8_lossy(&token).into_owned();

        self.report_status(ctx, DeploymentStatus::Downloading, identity)?;
        let response = self.transport.fetch(&descriptor.source_uri, &token)?;

        ctx.payload_types = vec!["dual-rootfs".to_string()];
        ctx.rollback_supported = true;
        ctx.reboot_needed = true;

        let mut installer = DualRootfsInstaller::new(self.boot_env, resolver);
        let mut reader = response;
        match installer.store_update(&mut reader, descriptor.size) {
            Ok(()) => Ok(StateId::UpdateInstall),
            Err(e) if e.kind() == &ErrorKind::NoSpace => Err(e),
            Err(e) => Err(e),
        }
    }

    fn do_update_install(
        &self,
        ctx: &mut DeploymentContext,
        resolver: Option<&PartitionResolver>,
        identity: &AttributeMap,
    ) -> Result<StateId> {
        let resolver = resolver.ok_or_else(|| {
            AgentError::new(ErrorKind::Fatal, "partition resolver unavailable")
        })?;
        self.report_status(ctx, DeploymentStatus::Installing, identity)?;
        let mut installer = DualRootfsInstaller::new(self.boot_env, resolver);
        match installer.install_update() {
            Ok(()) => Ok(StateId::ArtifactRebootEnter),
            Err(e) => {
                ctx.attempt += 1;
                Err(e)
            }
        }
    }

    fn do_verify_reboot(
        &self,
        ctx: &mut DeploymentContext,
        resolver: Option<&PartitionResolver>,
        identity: &AttributeMap,
    ) -> Result<StateId> {
        let resolver = resolver.ok_or_else(|| {
            AgentError::new(ErrorKind::Fatal, "partition resolver unavailable")
        })?;
        self.report_status(ctx, DeploymentStatus::Rebooting, identity)?;
        let installer = DualRootfsInstaller::new(self.boot_env, resolver);
        match installer.verify_reboot() {
            Ok(()) => Ok(StateId::ArtifactCommit),
            Err(_) => Ok(StateId::Rollback),
        }
    }

    fn do_commit(
        &self,
        ctx: &mut DeploymentContext,
        resolver: Option<&PartitionResolver>,
        identity: &AttributeMap,
    ) -> Result<StateId> {
        let resolver = resolver.ok_or_else(|| {
            AgentError::new(ErrorKind::Fatal, "partition resolver unavailable")
        })?;
        let mut installer = DualRootfsInstaller::new(self.boot_env, resolver);
        match installer.commit_update() {
            Ok(()) => {
                let descriptor = ctx.update.clone();
                if let Some(descriptor) = descriptor {
                    let previous = self.data_store.read_provides()?;
                    let next = datastore::apply_provides(
                        &previous,
                        &descriptor.provides,
                        &descriptor.clears_provides,
                    );
                    self.data_store.write_provides(&next)?;
                    self.data_store.write_artifact_name(&descriptor.artifact_name)?;
                }
                self.report_status(ctx, DeploymentStatus::Success, identity)?;
                Ok(StateId::Cleanup)
            }
            Err(e) if e.kind() == &ErrorKind::NothingToCommit => Err(e),
            Err(_) => Ok(StateId::Rollback),
        }
    }

    fn do_rollback(&self, ctx: &mut DeploymentContext, resolver: Option<&PartitionResolver>) -> Result<StateId> {
        let resolver = resolver.ok_or_else(|| {
            AgentError::new(ErrorKind::Fatal, "partition resolver unavailable")
        })?;
        let mut installer = DualRootfsInstaller::new(self.boot_env, resolver);
        installer.rollback()?;

        let mut broken_name = ctx.artifact_name.clone();
        if !broken_name.is_empty() && !broken_name.ends_with("-broken") {
            broken_name.push_str("-broken");
        }
        let mut provides = self.data_store.read_provides()?;
        provides.insert("artifact-name".to_string(), broken_name);
        self.data_store.write_provides(&provides)?;

        Ok(StateId::ArtifactRollbackReboot)
    }

    fn do_verify_rollback_reboot(
        &self,
        ctx: &mut DeploymentContext,
        resolver: Option<&PartitionResolver>,
        identity: &AttributeMap,
    ) -> Result<StateId> {
        let resolver = resolver.ok_or_else(|| {
            AgentError::new(ErrorKind::Fatal, "partition resolver unavailable")
        })?;
        let installer = DualRootfsInstaller::new(self.boot_env, resolver);
        installer.verify_rollback_reboot()?;
        self.report_status(ctx, DeploymentStatus::Failure, identity)?;
        Ok(StateId::Cleanup)
    }

    /// Submits a deployment status report. A 401 is handled inline: the
    /// stale token is dropped, a fresh authorization is obtained, and the
    /// same status is resubmitted once before giving up — so a token
    /// expiring mid-deployment doesn't abandon an otherwise-healthy update
    /// (spec.md §8 scenario: "401 during status report").
    fn report_status(
        &self,
        ctx: &DeploymentContext,
        status: DeploymentStatus,
        identity: &AttributeMap,
    ) -> Result<()> {
        if ctx.deployment_id.is_empty() {
            return Ok(());
        }
        let submit = |token: &str| -> Result<()> {
            self.with_server_failover(|base_url| {
                let url = format!(
                    "{base_url}/api/devices/v1/deployments/device/deployments/{}/status",
                    ctx.deployment_id
                );
                self.transport.report_status(&url, token, status.as_str())
            })
        };

        let token = self.authz.auth_token()?;
        let token = String::from_utf8_lossy(&token).into_owned();
        match submit(&token) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_authorized() => {
                self.authz.remove_auth_token()?;
                self.authorize_now(identity)?;
                let token = self.authz.auth_token()?;
                let token = String::from_utf8_lossy(&token).into_owned();
                submit(&token)
            }
            Err(e) if e.is_aborted() => Ok(()),
            Err(e) if e.is_transient() => {
                thread::sleep(Duration::from_millis(0));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::empty_identity;

    #[test]
    fn state_id_round_trips_through_its_string_form() {
        for state in [
            StateId::Init,
            StateId::Idle,
            StateId::AuthorizeWait,
            StateId::Authorize,
            StateId::CheckWait,
            StateId::UpdateCheck,
            StateId::InventoryUpdate,
            StateId::UpdateFetch,
            StateId::UpdateStore,
            StateId::UpdateInstall,
            StateId::ArtifactRebootEnter,
            StateId::Reboot,
            StateId::ArtifactRebootLeave,
            StateId::VerifyReboot,
            StateId::ArtifactCommit,
            StateId::Cleanup,
            StateId::Rollback,
            StateId::ArtifactRollbackReboot,
            StateId::VerifyRollbackReboot,
            StateId::Failure,
            StateId::UpdateError,
        ] {
            assert_eq!(StateId::from_str(state.as_str()), Some(state));
        }
    }

    #[test]
    fn only_recovery_states_ignore_script_errors() {
        assert!(StateId::Idle.ignores_script_errors());
        assert!(StateId::Rollback.ignores_script_errors());
        assert!(StateId::ArtifactRollbackReboot.ignores_script_errors());
        assert!(!StateId::UpdateInstall.ignores_script_errors());
    }

    #[test]
    fn checkpointed_states_start_at_update_install() {
        assert!(!StateId::UpdateStore.requires_checkpoint());
        assert!(StateId::UpdateInstall.requires_checkpoint());
        assert!(StateId::ArtifactCommit.requires_checkpoint());
    }

    /// Returns a `http://127.0.0.1:<port>` URL nothing is listening on, so a
    /// connection attempt against it fails fast with connection-refused
    /// rather than timing out.
    fn dead_server_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}")
    }

    fn test_machine<'a>(
        boot_env: &'a BootEnvironment,
        data_store: &'a DataStore,
        authz: &'a AuthorizationManager<'a>,
        transport: &'a HttpTransport,
        servers: Vec<ServerSpec>,
    ) -> StateMachine<'a> {
        let retry_plan = RetryPlan::new(
            Duration::from_millis(0),
            Duration::from_millis(0),
            Duration::from_millis(0),
            1,
        );
        StateMachine::new(boot_env, data_store, authz, transport, retry_plan, servers, "qemux86-64".to_string())
    }

    /// spec.md §8 scenario 5: server A refuses the connection, so the same
    /// `CheckUpdate` call is retried against server B and the deployment
    /// proceeds as if B had been the only server configured.
    #[test]
    fn update_check_fails_over_to_the_next_server_on_connection_refused() {
        let dir = tempfile::tempdir().unwrap();
        let data_store = DataStore::open(dir.path()).unwrap();
        let (key_store, _) = crate::keystore::KeyStore::load_or_generate(None).unwrap();
        let authz = AuthorizationManager::new("tenant-token", &key_store, &data_store);
        authz.receive_auth_response(b"device-token").unwrap();

        let mut server_b = mockito::Server::new();
        let mock = server_b
            .mock("GET", mockito::Matcher::Regex(r"^/api/devices/v1/deployments/device/deployments/next.*".into()))
            .with_status(204)
            .expect(1)
            .create();

        let transport = HttpTransport::new(false, None, RetryPlan::new(Duration::ZERO, Duration::ZERO, Duration::ZERO, 1)).unwrap();
        let servers = vec![
            ServerSpec { server_url: dead_server_url(), tenant_token: String::new() },
            ServerSpec { server_url: server_b.url(), tenant_token: String::new() },
        ];
        let boot_env = BootEnvironment::new();
        let machine = test_machine(&boot_env, &data_store, &authz, &transport, servers);

        let mut ctx = DeploymentContext::default();
        let identity = empty_identity();
        let next = machine.step(StateId::UpdateCheck, &mut ctx, None, &identity).unwrap();

        assert_eq!(next, StateId::CheckWait);
        assert_eq!(machine.server_index.get(), 1, "server index should have advanced past the dead server");
        mock.assert();
    }

    /// spec.md §8 scenario 3: a status report gets a 401, the token is
    /// dropped and refreshed, and the same status is resubmitted — the
    /// deployment is not abandoned.
    #[test]
    fn report_status_reauthorizes_and_resubmits_after_a_401() {
        let dir = tempfile::tempdir().unwrap();
        let data_store = DataStore::open(dir.path()).unwrap();
        let (key_store, _) = crate::keystore::KeyStore::load_or_generate(None).unwrap();
        let authz = AuthorizationManager::new("tenant-token", &key_store, &data_store);
        authz.receive_auth_response(b"stale-token").unwrap();

        let mut server = mockito::Server::new();
        let status_path = "/api/devices/v1/deployments/device/deployments/dep-1/status";
        let unauthorized = server.mock("PUT", status_path).with_status(401).expect(1).create();
        let reauth = server
            .mock("POST", "/api/devices/v1/authentication/auth_requests")
            .with_status(200)
            .with_body("fresh-token")
            .expect(1)
            .create();
        let accepted = server.mock("PUT", status_path).with_status(204).expect(1).create();

        let transport = HttpTransport::new(false, None, RetryPlan::new(Duration::ZERO, Duration::ZERO, Duration::ZERO, 1)).unwrap();
        let servers = vec![ServerSpec { server_url: server.url(), tenant_token: String::new() }];
        let boot_env = BootEnvironment::new();
        let machine = test_machine(&boot_env, &data_store, &authz, &transport, servers);

        let ctx = DeploymentContext {
            deployment_id: "dep-1".to_string(),
            ..Default::default()
        };
        let identity = empty_identity();

        machine.report_status(&ctx, DeploymentStatus::Success, &identity).unwrap();

        unauthorized.assert();
        reauth.assert();
        accepted.assert();
        assert_eq!(authz.auth_token().unwrap(), b"fresh-token");
    }
}
