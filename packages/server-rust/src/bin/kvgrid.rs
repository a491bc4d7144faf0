//! `KvGrid` process entry point.
//!
//! Three roles, one binary:
//!
//! - `kvgrid cluster` -- host the N-shard engine behind the router
//! - `kvgrid master`  -- host a single replicating store, its acceptor,
//!   and the slave supervisor
//! - `kvgrid slave`   -- a supervised slave process (spawned by the
//!   supervisor, rarely by hand)
//!
//! Logging goes through `tracing` with the usual `RUST_LOG` env-filter.
//! SIGINT triggers a graceful shutdown: workers stop, final snapshots are
//! saved, slave processes are stopped before the master lets go of its
//! sockets.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kvgrid_server::config::{EngineConfig, ReplicationConfig};
use kvgrid_server::engine::Engine;
use kvgrid_server::replication::{ReplicationMaster, ReplicationSlave, SlaveSupervisor};
use kvgrid_server::storage::{expirer, snapshot, Snapshotter, Store};

#[derive(Parser)]
#[command(name = "kvgrid", about = "Sharded in-memory store with replication")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sharded engine (stores + router + background workers).
    Cluster {
        /// Comma-separated shard names, in placement order.
        #[arg(long, value_delimiter = ',')]
        shards: Option<Vec<String>>,
        /// Maximum entries per shard.
        #[arg(long)]
        max_entries: Option<usize>,
        /// Directory for the per-shard snapshot files.
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
        /// Milliseconds between periodic snapshot saves.
        #[arg(long)]
        snapshot_interval_ms: Option<u64>,
    },
    /// Run a replicating master store with its TCP acceptor.
    Master {
        /// Port the replication acceptor listens on.
        #[arg(long, default_value_t = 7000)]
        port: u16,
        /// Shard name (keys the snapshot file).
        #[arg(long, default_value = "master")]
        shard_name: String,
        /// Maximum entries.
        #[arg(long, default_value_t = 1000)]
        max_entries: usize,
        /// Directory for the snapshot file.
        #[arg(long, default_value = ".")]
        snapshot_dir: PathBuf,
        /// Slave processes to spawn at startup.
        #[arg(long, default_value_t = 0)]
        slaves: usize,
    },
    /// Run a supervised slave process (spawned by `master`).
    Slave {
        /// Identifier sent in the replication handshake.
        #[arg(long)]
        slave_id: String,
        /// Master replication address.
        #[arg(long, default_value = "127.0.0.1:7000")]
        master_addr: String,
        /// Port reserved for this slave (identity for supervision).
        #[arg(long)]
        listen_port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Cluster {
            shards,
            max_entries,
            snapshot_dir,
            snapshot_interval_ms,
        } => {
            let mut config = EngineConfig::default();
            if let Some(shards) = shards {
                config.shards = shards;
            }
            if let Some(max_entries) = max_entries {
                config.max_entries = max_entries;
            }
            if let Some(snapshot_dir) = snapshot_dir {
                config.snapshot_dir = snapshot_dir;
            }
            if let Some(interval) = snapshot_interval_ms {
                config.snapshot_interval_ms = interval;
            }
            run_cluster(config).await
        }
        Commands::Master {
            port,
            shard_name,
            max_entries,
            snapshot_dir,
            slaves,
        } => run_master(port, shard_name, max_entries, snapshot_dir, slaves).await,
        Commands::Slave {
            slave_id,
            master_addr,
            listen_port,
        } => run_slave(slave_id, master_addr, listen_port).await,
    }
}

async fn run_cluster(config: EngineConfig) -> anyhow::Result<()> {
    let mut engine = Engine::new(config)?;
    engine.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    engine.shutdown().await;
    Ok(())
}

async fn run_master(
    port: u16,
    shard_name: String,
    max_entries: usize,
    snapshot_dir: PathBuf,
    slaves: usize,
) -> anyhow::Result<()> {
    let repl_config = ReplicationConfig {
        master_port: port,
        ..ReplicationConfig::default()
    };
    repl_config.validate()?;

    let store = Arc::new(Store::new(shard_name.clone(), max_entries));
    let snapshot_path = snapshot_dir.join(format!("data_{shard_name}.json"));
    snapshot::recover(&store, &snapshot_path);

    let (shutdown_tx, _) = watch::channel(false);
    let expirer_task = expirer::spawn(
        Arc::clone(&store),
        Duration::from_millis(1000),
        shutdown_tx.subscribe(),
    );
    let snapshotter = Snapshotter::spawn(
        Arc::clone(&store),
        snapshot_path,
        Duration::from_millis(30_000),
        shutdown_tx.subscribe(),
    );

    let mut master = ReplicationMaster::new(Arc::clone(&store), repl_config.clone());
    let bound_port = master.start().await?;
    master.serve()?;
    let master = Arc::new(master);

    let master_addr = format!("127.0.0.1:{bound_port}");
    let supervisor = SlaveSupervisor::new(Arc::clone(&master), repl_config, &master_addr)?;
    if slaves > 0 {
        let ids = supervisor.add_slaves(slaves)?;
        info!(?ids, "initial slaves spawned");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    supervisor.stop_all_slaves().await;
    master.stop().await;
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), snapshotter.join()).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), expirer_task).await;
    Ok(())
}

async fn run_slave(
    slave_id: String,
    master_addr: String,
    listen_port: Option<u16>,
) -> anyhow::Result<()> {
    info!(slave = %slave_id, ?listen_port, "slave process starting");
    let store = Arc::new(Store::new(slave_id.clone(), 1000));

    let (shutdown_tx, _) = watch::channel(false);
    let expirer_task = expirer::spawn(
        Arc::clone(&store),
        Duration::from_millis(1000),
        shutdown_tx.subscribe(),
    );

    let slave = ReplicationSlave::new(
        Arc::clone(&store),
        slave_id.clone(),
        master_addr,
        ReplicationConfig::default().read_idle_timeout(),
    );

    let outcome = tokio::select! {
        result = slave.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!(slave = %slave_id, "shutdown requested");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(1), expirer_task).await;

    if let Err(e) = outcome {
        // Supervision owns the restart policy; this process just reports.
        error!(slave = %slave_id, error = %e, "replication link lost");
        return Err(e.into());
    }
    Ok(())
}
