//! covenant-node — the covenant full-node binary.
//!
//! Startup sequence:
//!   1. Load (or initialise) the registry snapshot from disk
//!   2. Run one sweep pass over the loaded records
//!   3. Start the P2P network (libp2p GossipSub + Kademlia + DirectorySync)
//!   4. Start the JSON-RPC transport
//!   5. Periodically sweep and persist the registry until shutdown

mod config;
mod identity;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use covenant_chain::InMemoryChainView;
use covenant_core::error::CovenantError;
use covenant_p2p::{
    InMemoryPeerBook, MessageDispatcher, NoLocalIdentity, P2pConfig, P2pNetwork,
    PeerBookMisbehaviorSink,
};
use covenant_registry::{load_snapshot, save_snapshot, Registry};
use covenant_rpc::{RpcConfig, RpcCredentials, RpcServer, RpcState, TlsFiles};

use config::NodeConfig;
use identity::ConfiguredIdentity;

/// How often the background task sweeps stale records and rewrites the
/// snapshot. Not part of the wire/persistence format, just this binary's
/// own scheduling choice.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,covenant=debug".parse().unwrap()),
        )
        .init();

    let config = NodeConfig::parse();
    info!("covenant node starting");

    let rpc_user = config
        .rpc_user
        .clone()
        .context("rpc_user is required (COVENANT_RPC_USER or --rpc-user) — refusing to start")?;
    let rpc_password = config.rpc_password.clone().context(
        "rpc_password is required (COVENANT_RPC_PASSWORD or --rpc-password) — refusing to start",
    )?;
    if config.rpc_ssl && (config.rpc_ssl_cert.is_none() || config.rpc_ssl_key.is_none()) {
        anyhow::bail!("rpc_ssl is set but rpc_ssl_cert/rpc_ssl_key are missing");
    }

    let datadir = config::expand_tilde(&config.datadir);
    std::fs::create_dir_all(&datadir)
        .with_context(|| format!("creating data dir {}", datadir.display()))?;
    let snapshot_path = config.snapshot_path();

    // ── Registry: load snapshot, advisory-recover on recognized corruption ───
    let registry = Arc::new(Registry::new());
    if snapshot_path.exists() {
        match load_snapshot(&snapshot_path) {
            Ok(records) => {
                info!(count = records.len(), "loaded registry snapshot");
                registry.load_records(records);
            }
            Err(CovenantError::IncorrectFormat) => {
                warn!("snapshot not in a recognized format — starting with an empty registry");
            }
            Err(e) => {
                anyhow::bail!("fatal error loading registry snapshot: {e}");
            }
        }
    } else {
        info!("no existing snapshot — starting with an empty registry");
    }
    registry.sweep(now_secs(), config.min_protocol_version);

    // ── Collaborators ──────────────────────────────────────────────────────────
    let chain: Arc<dyn covenant_chain::ChainView> = Arc::new(InMemoryChainView::new());
    let peer_book: Arc<dyn covenant_p2p::PeerBook> = Arc::new(InMemoryPeerBook::default());

    let identity = match &config.operator_private_key {
        Some(hex_key) => {
            Arc::new(ConfiguredIdentity::from_hex(hex_key).context("parsing operator_private_key")?)
                as Arc<dyn covenant_p2p::LocalIdentity>
        }
        None => Arc::new(NoLocalIdentity) as Arc<dyn covenant_p2p::LocalIdentity>,
    };
    if config.operator_private_key.is_some() {
        info!("operator identity configured — hot-activation enabled");
    }

    let misbehavior = Arc::new(PeerBookMisbehaviorSink::new(peer_book.clone()));
    let dispatcher = Arc::new(MessageDispatcher::new(
        registry.clone(),
        chain.clone(),
        misbehavior,
        identity,
        config.min_protocol_version,
    ));

    // ── P2P network ────────────────────────────────────────────────────────────
    let p2p_config = P2pConfig {
        listen_addr: config.p2p_listen.clone(),
        bootstrap_peers: config.bootstrap.clone(),
        min_protocol_version: config.min_protocol_version,
        ..P2pConfig::default()
    };
    let (p2p_network, p2p_handle) =
        P2pNetwork::new(&p2p_config, dispatcher, registry.clone(), peer_book.clone())
            .map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %p2p_handle.local_peer_id, "P2P identity");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let p2p_shutdown = shutdown_rx.clone();
    let p2p_task = tokio::spawn(p2p_network.run(p2p_shutdown));

    // ── RPC transport ──────────────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcState::new(registry.clone(), chain.clone(), peer_book.clone()));
    let rpc_config = RpcConfig {
        bind_addr: config.rpc_bind_addr(),
        credentials: RpcCredentials { user: rpc_user, password: rpc_password },
        allow_cidrs: config.rpc_allow_cidr.clone(),
        threads: config.rpc_threads,
        tls: if config.rpc_ssl {
            Some(TlsFiles {
                cert_path: config.rpc_ssl_cert.clone().unwrap(),
                key_path: config.rpc_ssl_key.clone().unwrap(),
            })
        } else {
            None
        },
    };
    let rpc_shutdown = shutdown_rx.clone();
    let rpc_task = tokio::spawn(RpcServer::new(rpc_config, rpc_state).run(rpc_shutdown));

    // ── Periodic sweep + snapshot ─────────────────────────────────────────────
    let sweep_registry = registry.clone();
    let sweep_min_protocol = config.min_protocol_version;
    let sweep_snapshot_path = snapshot_path.clone();
    let mut sweep_shutdown = shutdown_rx.clone();
    let sweep_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_registry.sweep(now_secs(), sweep_min_protocol);
                    let snapshot = sweep_registry.snapshot();
                    if let Err(e) = save_snapshot(&sweep_snapshot_path, &snapshot) {
                        warn!(error = %e, "failed to persist registry snapshot");
                    }
                }
                _ = sweep_shutdown.changed() => break,
            }
        }
    });

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(p2p_task, rpc_task, sweep_task);

    let snapshot = registry.snapshot();
    if let Err(e) = save_snapshot(&snapshot_path, &snapshot) {
        warn!(error = %e, "failed to persist registry snapshot on shutdown");
    }

    Ok(())
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
