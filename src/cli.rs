//! Command-line surface (§6 "external collaborator", kept intentionally
//! thin per the expanded spec's Non-goals): a `clap`-derived `Cli`/`Commands`
//! pair exposing the documented verbs, modeled on the teacher's
//! `cli::{Cli, Commands, TridentExitCodes}` shape.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, Subcommand};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExitCode {
    Success = 0,
    SetupFailed = 1,
    Failed = 2,
    RebootRequired = 3,
}

impl From<AgentExitCode> for ExitCode {
    fn from(code: AgentExitCode) -> Self {
        Self::from(code as u8)
    }
}

#[derive(Parser, Debug)]
#[clap(version = VERSION)]
pub struct Cli {
    /// Path to the JSON configuration document.
    #[arg(long, global = true, default_value = "/etc/fleetward-agent/config.json")]
    pub config: PathBuf,

    /// Overrides `DataStorePath` from the configuration file.
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    /// Logging verbosity passed through to `tracing_subscriber::EnvFilter`.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate or load the device key and obtain the first bearer token.
    Bootstrap,

    /// Run the cooperative state-machine dispatcher until signaled to stop.
    Daemon,

    /// Install an artifact payload from a local file path, standalone.
    Install {
        /// Path to the payload stream to install.
        path: PathBuf,
    },

    /// Commit the currently pending update.
    Commit,

    /// Roll back the currently pending update.
    Rollback,

    /// Perform a single update check against the configured server(s).
    #[clap(name = "check-update")]
    CheckUpdate,

    /// Run the inventory scripts and submit the result.
    #[clap(name = "send-inventory")]
    SendInventory,

    /// Print the currently installed artifact name.
    #[clap(name = "show-artifact")]
    ShowArtifact,

    /// Print the current provides store as JSON.
    #[clap(name = "show-provides")]
    ShowProvides,

    /// Print the agent version.
    Version,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Bootstrap => "bootstrap",
            Commands::Daemon => "daemon",
            Commands::Install { .. } => "install",
            Commands::Commit => "commit",
            Commands::Rollback => "rollback",
            Commands::CheckUpdate => "check-update",
            Commands::SendInventory => "send-inventory",
            Commands::ShowArtifact => "show-artifact",
            Commands::ShowProvides => "show-provides",
            Commands::Version => "version",
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}
