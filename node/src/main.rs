// Copyright (c) 2026 Ledgerline Contributors. MIT License.
// See LICENSE for details.

//! # Ledgerline Validation Node
//!
//! Entry point for the `ledgerline-node` binary. Parses CLI arguments,
//! initializes logging and dispatches to a subcommand:
//!
//! - `devnet` : boot a local cluster and drive transfers through it
//! - `init`   : generate a validator key and print the topology entry
//! - `check`  : validate a config file and a topology file
//! - `version`: print build version information

mod cli;
mod devnet;
mod logging;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use ledgerline_protocol::config::{NodeConfig, WIRE_VERSION};
use ledgerline_protocol::crypto::keys::Keypair;
use ledgerline_protocol::identity::{AccountId, Curve};
use ledgerline_protocol::ledger::Account;
use ledgerline_protocol::network::{NodeDescriptor, NodeId, Topology};
use ledgerline_protocol::transfer::{parse_amount, TransferRequest};

use cli::{Commands, LedgerlineNodeCli};
use devnet::Devnet;

/// How long the devnet waits for every node to apply one outcome before
/// submitting the next transfer.
const QUIESCE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LedgerlineNodeCli::parse();
    logging::init_logging(logging::DEFAULT_DIRECTIVES, cli.log_format);

    match cli.command {
        Commands::Devnet(args) => run_devnet(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Check(args) => check_files(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(NodeConfig::default()),
    }
}

/// Boots a devnet, funds one wallet on every node and sends transfers from
/// it round-robin through the nodes. Each outcome is printed as a JSON line.
async fn run_devnet(args: cli::DevnetArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(ms) = args.confirmation_timeout_ms {
        config.confirmation_timeout_ms = ms;
    }
    config.validate().context("invalid node configuration")?;

    let initial_balance =
        parse_amount(&args.initial_balance).context("invalid --initial-balance")?;
    parse_amount(&args.amount).context("invalid --amount")?;
    anyhow::ensure!(
        args.unreachable < args.nodes,
        "--unreachable must leave at least one node connected"
    );

    tracing::info!(
        nodes = args.nodes,
        transfers = args.transfers,
        unreachable = args.unreachable,
        confirmation_timeout_ms = config.confirmation_timeout_ms,
        "starting devnet"
    );
    let devnet = Devnet::boot(args.nodes, &config, args.topology_out.as_deref())?;

    let owner = Keypair::generate();
    let wallet = AccountId::from_public_key(Curve::Ed25519, &owner.public_key());
    devnet.fund(&Account::new(wallet, initial_balance));
    let payee = AccountId::from_public_key(Curve::Ed25519, &Keypair::generate().public_key());
    tracing::info!(wallet = %wallet, payee = %payee, "wallet funded on every node");

    devnet.cut_off(args.unreachable);

    // Coordinators are picked from the reachable nodes only.
    let reachable = args.nodes - args.unreachable;
    for i in 0..args.transfers {
        let node = &devnet.nodes()[i % reachable];
        let request = TransferRequest::signed(&owner, &payee, &args.amount, &format!("devnet #{i}"))
            .context("failed to sign transfer request")?;

        let line = match node.submit(request).await {
            Ok(record) => {
                if !devnet
                    .settle_everywhere(&record.transfer.id, QUIESCE_TIMEOUT)
                    .await
                {
                    tracing::warn!(transfer = %record.transfer.id, "not every node applied the settlement in time");
                }
                serde_json::json!({
                    "transfer": record.transfer.id.to_string(),
                    "coordinator": node.node_id().as_str(),
                    "status": "settled",
                    "sender_balance": record.from.balance.to_string(),
                    "sender_height": record.from.height,
                    "recipient_balance": record.to.balance.to_string(),
                })
            }
            Err(err) => serde_json::json!({
                "coordinator": node.node_id().as_str(),
                "status": "failed",
                "code": err.code().as_str(),
                "reason": err.to_string(),
            }),
        };
        println!("{line}");
    }

    let resolved = devnet.nodes()[0]
        .resolve_balance(&wallet)
        .await
        .context("balance resolution failed")?;
    println!(
        "{}",
        serde_json::json!({
            "wallet": wallet.to_string(),
            "balance": resolved.as_ref().map(|a| a.balance.to_string()),
            "height": resolved.as_ref().map(|a| a.height),
        })
    );

    if args.linger {
        tracing::info!("devnet running, press Ctrl+C to stop");
        shutdown_signal().await;
    }
    devnet.shutdown().await;
    Ok(())
}

/// Generates a validator key in the data directory and prints the node's
/// topology entry.
fn init_node(args: cli::InitArgs) -> Result<()> {
    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), node_id = %args.node_id, "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let keypair = Keypair::generate();
    let key_path = data_dir.join("validator.key");
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write validator key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    let descriptor = NodeDescriptor {
        id: NodeId::new(args.node_id),
        public_key: keypair.public_key(),
        endpoint: args.endpoint,
    };
    tracing::info!(
        public_key = %descriptor.public_key.to_base58(),
        key_path = %key_path.display(),
        "validator keypair generated"
    );

    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    Ok(())
}

/// Loads the config and topology files the way a node would at startup.
fn check_files(args: cli::CheckArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let topology = Topology::from_json_file(&args.topology)
        .with_context(|| format!("failed to load topology from {}", args.topology.display()))?;

    if let Some(node_id) = &args.node_id {
        let id = NodeId::new(node_id.as_str());
        anyhow::ensure!(
            topology.find(&id).is_some(),
            "node '{node_id}' is not in {}",
            args.topology.display()
        );
    }

    println!("config   : ok");
    println!("  prepare timeout      : {:?}", config.prepare_timeout());
    println!("  confirmation timeout : {:?}", config.confirmation_timeout());
    println!("  balance timeout      : {:?}", config.balance_timeout());
    println!("  lock ttl             : {:?}", config.lock_ttl());
    println!("topology : {} node(s)", topology.len());
    for node in topology.nodes() {
        println!("  {:<16} {}", node.id.as_str(), node.public_key.to_base58());
    }
    Ok(())
}

fn print_version() {
    println!("ledgerline-node {}", env!("CARGO_PKG_VERSION"));
    println!("wire version    {}", WIRE_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
