use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vpslite::runtime::options::envs;

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "vpslite", version, about = "Manage ephemeral SSH-reachable instances")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand, each with an environment fallback.
#[derive(Args, Debug)]
pub struct GlobalFlags {
    /// Backend to provision against ("mock" or "container")
    #[arg(long, global = true, env = "BACKEND", default_value = "mock")]
    pub backend: String,

    /// Public host advertised in SSH endpoints
    #[arg(long, global = true, env = "HOST_IP")]
    pub host_ip: Option<String>,

    /// Base of the SSH port pool; allocatable ports start one above it
    #[arg(long, global = true, env = "SSH_BASE_PORT")]
    pub base_port: Option<u16>,

    /// Number of allocatable SSH ports
    #[arg(long, global = true, env = "SSH_PORT_POOL")]
    pub pool_size: Option<u16>,

    /// Registry snapshot file; state is kept across invocations
    #[arg(long, global = true, env = "VPSLITE_STATE")]
    pub state: Option<PathBuf>,
}

impl GlobalFlags {
    /// Resolve the flags into runtime options.
    ///
    /// Env fallbacks for flag-covered fields go through clap, so an
    /// explicit flag always wins over a stale or garbage env value; only
    /// env vars without a flag are read here.
    pub fn options(&self) -> anyhow::Result<vpslite::VpsliteOptions> {
        let mut options = vpslite::VpsliteOptions::default();
        options.backend = self.backend.parse()?;
        if let Some(host_ip) = &self.host_ip {
            options.host_ip = host_ip.clone();
        }
        if let Some(base_port) = self.base_port {
            options.ssh_base_port = base_port;
        }
        if let Some(pool_size) = self.pool_size {
            options.port_pool_size = pool_size;
        }
        if let Some(state) = &self.state {
            options.state_file = Some(state.clone());
        }
        if let Ok(username) = std::env::var(envs::VPS_USERNAME) {
            options.username = username;
        }
        if let Ok(bin) = std::env::var(envs::DOCKER_BIN) {
            options.docker_bin = PathBuf::from(bin);
        }
        options.validate()?;
        tracing::debug!(backend = %options.backend, "resolved options");
        Ok(options)
    }

    pub fn runtime(&self) -> anyhow::Result<vpslite::VpsliteRuntime> {
        Ok(vpslite::VpsliteRuntime::new(self.options()?)?)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an instance and print its connection details
    Create(commands::create::CreateArgs),

    /// Delete one or more instances
    Rm(commands::rm::RmArgs),

    /// List instances
    #[command(alias = "ls")]
    List(commands::list::ListArgs),

    /// Show details of a single instance
    Info(commands::info::InfoArgs),

    /// Retry stuck deletions and flag dead backends
    Reconcile(commands::reconcile::ReconcileArgs),
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Create(args) => commands::create::execute(args, &cli.global).await,
        Commands::Rm(args) => commands::rm::execute(args, &cli.global).await,
        Commands::List(args) => commands::list::execute(args, &cli.global).await,
        Commands::Info(args) => commands::info::execute(args, &cli.global).await,
        Commands::Reconcile(args) => commands::reconcile::execute(args, &cli.global).await,
    }
}
