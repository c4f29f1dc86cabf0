//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// bucketmesh - peer-to-peer task bucket node
///
/// Holds bounded task buckets locally and spills overflow work to the
/// least-loaded sibling node.
#[derive(Parser, Debug)]
#[command(name = "bucketmesh")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the node until interrupted
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "BUCKETMESH_CONFIG")]
        config: Option<String>,

        /// Override the listen port
        #[arg(short = 'p', long)]
        listen_port: Option<u16>,

        /// Peer address (repeatable); replaces the configured list
        #[arg(long = "peer", value_name = "ADDR")]
        peers: Vec<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// `config` subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Print the effective configuration (file, env and defaults merged) as TOML
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write a commented default configuration file
    Init {
        /// Destination (default: ~/.bucketmesh/node.toml)
        #[arg(short, long)]
        path: Option<String>,

        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration file without starting the node
    Validate {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["bucketmesh", "run"]);
        match cli.command {
            Commands::Run { config, listen_port, peers } => {
                assert!(config.is_none());
                assert!(listen_port.is_none());
                assert!(peers.is_empty());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_overrides() {
        let cli = Cli::parse_from([
            "bucketmesh",
            "run",
            "--config",
            "/etc/bucketmesh/node.toml",
            "-p",
            "7500",
            "--peer",
            "10.0.0.2:7400",
            "--peer",
            "10.0.0.3:7400",
        ]);
        match cli.command {
            Commands::Run { config, listen_port, peers } => {
                assert_eq!(config.as_deref(), Some("/etc/bucketmesh/node.toml"));
                assert_eq!(listen_port, Some(7500));
                assert_eq!(peers, vec!["10.0.0.2:7400", "10.0.0.3:7400"]);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["bucketmesh", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["bucketmesh", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["bucketmesh", "config", "show"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Show { config } } => {
                assert!(config.is_none());
            }
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["bucketmesh", "config", "init", "--force"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Init { path, force } } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
