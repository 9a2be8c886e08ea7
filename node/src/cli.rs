//! # CLI Interface
//!
//! Defines the command-line argument structure for `ledgerline-node` using
//! `clap` derive. Subcommands: `devnet`, `init`, `check` and `version`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// Ledgerline validation node.
///
/// Development harness for the transfer consensus engine. Boots validation
/// nodes on the in-process message bus, prepares node identities and checks
/// configuration and topology files.
#[derive(Parser, Debug)]
#[command(
    name = "ledgerline-node",
    about = "Ledgerline validation node",
    version,
    propagate_version = true
)]
pub struct LedgerlineNodeCli {
    /// Log output format: pretty or json.
    #[arg(long, global = true, env = "LEDGERLINE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Boot a local cluster on the in-process bus and drive transfers
    /// through it.
    Devnet(DevnetArgs),
    /// Generate a validator key and print this node's topology entry.
    Init(InitArgs),
    /// Load and validate a config file and a topology file.
    Check(CheckArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `devnet` subcommand.
#[derive(Parser, Debug)]
pub struct DevnetArgs {
    /// Number of validation nodes to boot.
    #[arg(long, short = 'n', default_value_t = 4)]
    pub nodes: usize,

    /// Number of transfers to submit, round-robin across nodes.
    #[arg(long, short = 't', default_value_t = 3)]
    pub transfers: usize,

    /// Amount sent by each transfer.
    #[arg(long, default_value = "1.0")]
    pub amount: String,

    /// Balance the demo wallet starts with on every node.
    #[arg(long, default_value = "100")]
    pub initial_balance: String,

    /// Number of nodes to cut off from the bus before submitting.
    #[arg(long, default_value_t = 0)]
    pub unreachable: usize,

    /// Node configuration file (JSON). Defaults apply when omitted.
    #[arg(long, short = 'c', env = "LEDGERLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the confirmation timeout, in milliseconds.
    #[arg(long, env = "LEDGERLINE_CONFIRMATION_TIMEOUT_MS")]
    pub confirmation_timeout_ms: Option<u64>,

    /// Write the generated topology here. Every node then re-reads it on
    /// each topology refresh, so editing the file changes the live peer set.
    #[arg(long)]
    pub topology_out: Option<PathBuf>,

    /// Keep the cluster running after the transfers until Ctrl+C.
    #[arg(long)]
    pub linger: bool,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory the validator key is written to.
    #[arg(long, short = 'd', env = "LEDGERLINE_DATA_DIR", default_value = ".ledgerline")]
    pub data_dir: PathBuf,

    /// Id this node goes by in the topology.
    #[arg(long, env = "LEDGERLINE_NODE_ID")]
    pub node_id: String,

    /// Endpoint peers reach this node at.
    #[arg(long, default_value = "")]
    pub endpoint: String,
}

/// Arguments for the `check` subcommand.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Node configuration file (JSON).
    #[arg(long, short = 'c', env = "LEDGERLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Validation node list (JSON).
    #[arg(long, env = "LEDGERLINE_TOPOLOGY")]
    pub topology: PathBuf,

    /// Id of the local node; must appear in the topology.
    #[arg(long, env = "LEDGERLINE_NODE_ID")]
    pub node_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        LedgerlineNodeCli::command().debug_assert();
    }

    #[test]
    fn devnet_defaults() {
        let cli = LedgerlineNodeCli::parse_from(["ledgerline-node", "devnet"]);
        let Commands::Devnet(args) = cli.command else {
            panic!("expected devnet");
        };
        assert_eq!(args.nodes, 4);
        assert_eq!(args.transfers, 3);
        assert_eq!(args.unreachable, 0);
        assert!(!args.linger);
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn log_format_is_global() {
        let cli = LedgerlineNodeCli::parse_from([
            "ledgerline-node",
            "check",
            "--topology",
            "nodes.json",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
