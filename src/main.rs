// src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pger::client::send_request;
use pger::config::{Config, DEFAULT_CONFIG_PATH, DEFAULT_SOCKET_PATH};
use pger::daemon::protocol::{DeleteArgs, PackageArgs, UpdateArgs};
use pger::daemon::{Command, Daemon, Request};
use pger::repository::CatalogScope;
use pger::PackageId;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "pger")]
#[command(author, version, about = "Package manager driven through a local control daemon", long_about = None)]
struct Cli {
    /// Control socket of the daemon [default: /tmp/pger.sock, or `socket_path`
    /// from the configuration file for `daemon`]
    #[arg(short, long, global = true, env = "PGER_SOCKET")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control daemon in the foreground
    Daemon {
        /// Configuration file
        #[arg(short, long, env = "PGER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Download (if needed) and install a package
    Install {
        /// Package name
        name: String,
        /// Package version
        version: String,
    },
    /// Uninstall a package
    Delete {
        /// Package name
        name: String,
        /// Package version
        version: String,
        /// Also remove the archive from the cache
        #[arg(long)]
        purge: bool,
    },
    /// Remove every cached archive
    ClearCache,
    /// Download everything in the repository catalog
    UpdateCache {
        /// Catalog to synchronize against: "latest" or "all"
        #[arg(default_value = "latest")]
        mode: CatalogScope,
    },
    /// Show registered packages
    List,
    /// Stop the daemon
    Stop,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let request = match cli.command {
        Commands::Daemon { config } => {
            let config = Config::load(&config)?.with_socket_override(cli.socket);
            info!("Starting pger daemon (repository: {})", config.repository);

            let daemon = Daemon::from_config(&config).with_context(|| {
                format!("Failed to start daemon on {}", config.socket_path.display())
            })?;
            daemon.run()?;
            return Ok(());
        }
        Commands::Install { name, version } => Request::Call(Command::Install(PackageArgs {
            id: PackageId::new(name, version)?,
        })),
        Commands::Delete {
            name,
            version,
            purge,
        } => Request::Call(Command::Delete(DeleteArgs {
            id: PackageId::new(name, version)?,
            remove_from_cache: purge,
        })),
        Commands::ClearCache => Request::Call(Command::ClearCache),
        Commands::UpdateCache { mode } => {
            Request::Call(Command::UpdateCache(UpdateArgs { scope: mode }))
        }
        Commands::List => Request::Call(Command::List),
        Commands::Stop => Request::Stop,
    };

    let socket = cli
        .socket
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
    let reply = send_request(&socket, &request)?;
    match reply.strip_prefix("error: ") {
        Some(message) => anyhow::bail!("{}", message.trim_end()),
        None => {
            println!("{}", reply.trim_end());
            Ok(())
        }
    }
}
