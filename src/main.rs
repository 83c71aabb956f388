use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_api::{config::Config, status::UpdateDescriptor};
use fleetward_agent::{
    authz::{empty_identity, AuthorizationManager},
    bootenv::BootEnvironment,
    cli::{AgentExitCode, Cli, Commands},
    datastore::DataStore,
    deploylog::DeploymentLogManager,
    deploylog_hook::DeploymentLogHook,
    identity::IdentityProvider,
    installer::{dualrootfs::DualRootfsInstaller, PayloadInstaller},
    inventory::InventoryReporter,
    keystore::KeyStore,
    partition::PartitionResolver,
    retry::RetryPlan,
    statemachine::{DeploymentContext, StateId, StateMachine},
    transport::HttpTransport,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("fleetward-agent {}", fleetward_agent::cli::VERSION);
        return AgentExitCode::Success.into();
    }

    let log_manager = Arc::new(DeploymentLogManager::new("/var/lib/fleetward/deployment-logs"));
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(DeploymentLogHook::new(log_manager.clone()))
        .init();

    match run(&cli) {
        Ok(code) => code.into(),
        Err(e) => {
            error!("{e}");
            AgentExitCode::Failed.into()
        }
    }
}

fn run(cli: &Cli) -> agent_api::error::Result<AgentExitCode> {
    let config = Config::load(&cli.config)?;
    let data_store_path = cli.data.clone().unwrap_or_else(|| config.data_store_path.clone());
    let data_store = DataStore::open(&data_store_path)?;

    let boot_env = BootEnvironment::new();
    let resolver = PartitionResolver::resolve(&config.rootfs_part_a, &config.rootfs_part_b, &boot_env)?;

    let existing_pem = data_store.read_key_pem()?;
    let (key_store, generated_pem) = KeyStore::load_or_generate(existing_pem.as_deref())?;
    if let Some(pem) = generated_pem {
        data_store.write_key_pem(&pem)?;
    }

    let tenant_token = config.servers.first().map(|s| s.tenant_token.clone()).unwrap_or_default();
    let authz = AuthorizationManager::new(tenant_token, &key_store, &data_store);

    let client_identity = match (&config.https_client.certificate, &config.https_client.key) {
        (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
        _ => None,
    };
    let retry_plan = RetryPlan::new(
        config.update_poll_interval,
        config.retry_poll_interval,
        config.state_script_retry_timeout,
        5,
    );
    let transport = HttpTransport::new(
        config.https_client.skip_verify,
        client_identity.as_ref().map(|(c, k)| (c.as_slice(), k.as_slice())),
        retry_plan,
    )?;

    let server_base_url = config
        .servers
        .first()
        .map(|s| s.server_url.clone())
        .unwrap_or_default();
    let device_type = read_key_value_field(&config.device_type_file, "device_type")?;

    match &cli.command {
        Commands::Version => unreachable!("handled before config load"),

        Commands::Bootstrap => {
            let identity_provider = IdentityProvider::new(device_helper_scripts_dir(&data_store_path));
            let identity = identity_provider.collect()?;
            let request = authz.make_auth_request(identity)?;
            let signature_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &request.signature);
            let url = format!("{server_base_url}/api/devices/v1/authentication/auth_requests");
            let token = transport.authorize(&url, &request.body, &signature_b64)?;
            authz.receive_auth_response(&token)?;
            info!("bootstrap complete, device is authorized");
            Ok(AgentExitCode::Success)
        }

        Commands::Daemon => run_daemon(
            &config,
            &boot_env,
            &data_store,
            &authz,
            &transport,
            retry_plan,
            &device_type,
            &data_store_path,
        ),

        Commands::Install { path } => {
            let mut file = std::fs::File::open(path)?;
            let size = file.metadata()?.len();
            let mut installer = DualRootfsInstaller::new(&boot_env, &resolver);
            installer.store_update(&mut file, size)?;
            installer.install_update()?;
            info!("artifact installed from '{}'; reboot to finish", path.display());
            Ok(AgentExitCode::RebootRequired)
        }

        Commands::Commit => {
            let mut installer = DualRootfsInstaller::new(&boot_env, &resolver);
            installer.commit_update()?;
            Ok(AgentExitCode::Success)
        }

        Commands::Rollback => {
            let mut installer = DualRootfsInstaller::new(&boot_env, &resolver);
            installer.rollback()?;
            Ok(AgentExitCode::RebootRequired)
        }

        Commands::CheckUpdate => {
            let current_artifact_name = data_store.read_artifact_name()?;
            let provides = data_store.read_provides()?;
            let token = authz.auth_token()?;
            let token = String::from_utf8_lossy(&token).into_owned();
            let url = format!(
                "{server_base_url}/api/devices/v1/deployments/device/deployments/next?artifact_name={current_artifact_name}&device_type={device_type}"
            );
            #[derive(serde::Serialize)]
            struct CheckBody {
                provides: std::collections::BTreeMap<String, String>,
            }
            match transport.check_update(&url, &token, &CheckBody { provides })? {
                None => println!("no update available"),
                Some(bytes) => {
                    let descriptor: UpdateDescriptor = serde_json::from_slice(&bytes)?;
                    println!("{}", serde_json::to_string_pretty(&descriptor).unwrap_or_default());
                }
            }
            Ok(AgentExitCode::Success)
        }

        Commands::SendInventory => {
            let reporter = InventoryReporter::new(device_helper_scripts_dir(&data_store_path).join("inventory"));
            let attrs = reporter.collect()?;
            let token = authz.auth_token()?;
            let token = String::from_utf8_lossy(&token).into_owned();
            let url = format!("{server_base_url}/api/devices/v1/inventory/device/attributes");
            transport.submit_inventory(&url, &token, &attrs)?;
            Ok(AgentExitCode::Success)
        }

        Commands::ShowArtifact => {
            println!("{}", data_store.read_artifact_name()?);
            Ok(AgentExitCode::Success)
        }

        Commands::ShowProvides => {
            let provides = data_store.read_provides()?;
            println!("{}", serde_json::to_string_pretty(&provides).unwrap_or_default());
            Ok(AgentExitCode::Success)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_daemon(
    config: &Config,
    boot_env: &BootEnvironment,
    data_store: &DataStore,
    authz: &AuthorizationManager,
    transport: &HttpTransport,
    retry_plan: RetryPlan,
    device_type: &str,
    data_store_path: &Path,
) -> agent_api::error::Result<AgentExitCode> {
    let machine = StateMachine::new(
        boot_env,
        data_store,
        authz,
        transport,
        retry_plan,
        config.servers.clone(),
        device_type.to_string(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&stop)?;

    let mut current = match data_store.read_checkpoint()? {
        Some(checkpoint) => fleetward_agent::statemachine::checkpoint::resume_state(&checkpoint),
        None => StateId::Init,
    };
    let mut ctx = DeploymentContext::default();
    let identity_provider = IdentityProvider::new(device_helper_scripts_dir(data_store_path).join("identity"));

    while !stop.load(Ordering::SeqCst) {
        let resolver = PartitionResolver::resolve(&config.rootfs_part_a, &config.rootfs_part_b, boot_env);
        let identity = identity_provider.collect().unwrap_or_else(|_| empty_identity());
        match machine.step(current, &mut ctx, resolver.as_ref().ok(), &identity) {
            Ok(next) => current = next,
            Err(e) if e.is_transient() => {
                error!("transient error in state {}: {e}", current.as_str());
                std::thread::sleep(retry_plan.backoff_for_attempt(0));
            }
            Err(e) => {
                error!("fatal error in state {}: {e}", current.as_str());
                current = StateId::Failure;
            }
        }
        if current == StateId::Idle {
            data_store.clear_checkpoint()?;
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    Ok(AgentExitCode::Success)
}

fn install_signal_handlers(stop: &Arc<AtomicBool>) -> agent_api::error::Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, stop.clone()).map_err(|e| {
            agent_api::error::AgentError::with_source(
                agent_api::error::ErrorKind::Fatal,
                "failed to install signal handler",
                e,
            )
        })?;
    }
    Ok(())
}

fn device_helper_scripts_dir(data_store_path: &Path) -> PathBuf {
    data_store_path.join("scripts")
}

fn read_key_value_field(path: &Path, key: &str) -> agent_api::error::Result<String> {
    let text = std::fs::read_to_string(path)?;
    for line in text.lines() {
        if let Some((k, v)) = line.trim().split_once('=') {
            if k.trim() == key {
                return Ok(v.trim().to_string());
            }
        }
    }
    Ok(String::new())
}
