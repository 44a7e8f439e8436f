//! canswarm-node — the CAN Swarm coordination-kernel node binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the swarm database, CAS and audit log
//!   2. Apply genesis if the database is fresh
//!   3. Wire the in-process bus through the policy gate into the dispatcher
//!   4. Spawn the background loops (flusher, scavenger, closer, sweeper)
//!   5. Run until interrupted; flush the Lamport clock on the way out
//!
//! The `replay` subcommand rebuilds state from a signed audit log on a
//! scratch database and prints the resulting state digest.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use canswarm_core::config::SwarmConfig;
use canswarm_dispatch::{replay, ReplayEnv};
use canswarm_genesis::GenesisParams;
use canswarm_node::{Node, NodeConfig};

#[derive(Parser, Debug)]
#[command(
    name = "canswarm-node",
    version,
    about = "CAN Swarm node — cooperative multi-agent coordination kernel"
)]
struct Args {
    /// Directory for the persistent swarm state.
    #[arg(long, default_value = "~/.canswarm/data")]
    data_dir: PathBuf,

    /// Path to a SwarmConfig JSON (defaults apply when absent).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to genesis params JSON (only required on first run).
    #[arg(long)]
    genesis_params: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild state from an audit log and print the state digest.
    Replay {
        /// Directory of per-thread audit logs.
        #[arg(long)]
        audit_dir: PathBuf,
        /// Scratch directory for the rebuilt database.
        #[arg(long)]
        scratch_dir: PathBuf,
        /// CAS directory the logged artifacts live in.
        #[arg(long)]
        cas_dir: PathBuf,
        /// Node identity seed (hex, 32 bytes) used by the original node.
        #[arg(long)]
        node_seed: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,canswarm=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let cfg: SwarmConfig = match &args.config {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_slice(&bytes).context("parsing config")?
        }
        None => SwarmConfig::default(),
    };

    let genesis: GenesisParams = match &args.genesis_params {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading genesis {}", path.display()))?;
            serde_json::from_slice(&bytes).context("parsing genesis params")?
        }
        None => GenesisParams::default(),
    };

    match args.command {
        Some(Command::Replay {
            audit_dir,
            scratch_dir,
            cas_dir,
            node_seed,
        }) => {
            let seed_bytes = hex::decode(node_seed.trim()).context("decoding node seed")?;
            anyhow::ensure!(seed_bytes.len() == 32, "node seed must be 32 bytes of hex");
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&seed_bytes);

            let env = ReplayEnv {
                scratch_dir: &scratch_dir,
                cas_dir: &cas_dir,
                cfg,
                node_seed: seed,
                genesis,
            };
            let digest = replay(&env, &audit_dir).context("replaying audit log")?;
            println!("{}", hex::encode(digest));
            Ok(())
        }
        None => {
            let data_dir = expand_tilde(&args.data_dir);
            let node = Node::start(NodeConfig {
                data_dir,
                cfg,
                node_seed: None,
                genesis,
                background_loops: true,
            })
            .await
            .context("starting node")?;

            info!("node running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

            info!("shutting down");
            node.shutdown().context("graceful shutdown")?;
            Ok(())
        }
    }
}

fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
