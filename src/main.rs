//! bucketmesh - peer-to-peer task bucket node
//!
//! Entry point for the node binary: parses the command line, loads the
//! configuration and runs the orchestrator until Ctrl-C or a fatal
//! listener error.

mod cli;

use std::sync::Arc;

use bucketmesh::config::{self, NodeConfig};
use bucketmesh::error::{Error, Result};
use bucketmesh::{logging, version, Orchestrator};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, ConfigSubcommand};

fn main() {
    if let Err(e) = run_cli() {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Run {
            config,
            listen_port,
            peers,
        } => {
            let mut config = NodeConfig::load(config.as_deref())?;
            if let Some(port) = listen_port {
                config.peer.listen_port = port;
            }
            if !peers.is_empty() {
                config.peer.addresses = peers;
            }
            config.validate()?;

            // Guards must outlive the runtime so buffered lines are flushed
            let _log_guards =
                logging::init_logging(&config.logging, config.node.debug, cli.verbose, cli.quiet)?;

            let build = version::build_info();
            info!(
                version = %build.full_version(),
                target = %build.target,
                profile = %build.profile,
                "Starting bucketmesh node"
            );

            run_node(config)
        }
    }
}

/// Build the runtime and run the node until it stops
fn run_node(config: NodeConfig) -> Result<()> {
    let node_id = config.node_id();
    info!(
        node_id = %node_id,
        listen_port = config.peer.listen_port,
        peers = config.peer.addresses.len(),
        buckets = config.buckets.len(),
        overflow_policy = ?config.fill.overflow_policy,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(if config.node.worker_threads > 0 {
            config.node.worker_threads
        } else {
            num_cpus::get().min(8)
        })
        .thread_name("bucketmesh")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async {
        let node = Arc::new(Orchestrator::from_config(&config));
        node.set_peer_failure_callback(|address, req, err| {
            warn!(peer = %address, command = %req.command, error = %err, "Peer send failed");
        });

        let signal_node = node.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    signal_node.stop();
                }
                Err(e) => warn!(error = %e, "Unable to listen for shutdown signal"),
            }
        });

        match node.start().await {
            Error::Stopped => {
                info!(node_id = %node_id, "Node shut down");
                Ok(())
            }
            cause => Err(cause),
        }
    })
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = NodeConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            NodeConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
