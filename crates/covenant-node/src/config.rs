use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use ipnet::IpNet;

/// Node configuration. Every flag falls back to a `COVENANT_`-prefixed
/// environment variable of the same name, matching spec's
/// `rpc_user`/`rpc_password`/... surface.
#[derive(Parser, Debug)]
#[command(
    name = "covenant-node",
    version,
    about = "Covenant full node — masternode collateralized overlay"
)]
pub struct NodeConfig {
    /// Directory for the persistent registry snapshot.
    #[arg(long, env = "COVENANT_DATADIR", default_value = "~/.covenant/data")]
    pub datadir: PathBuf,

    /// P2P listen multiaddr.
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/9999")]
    pub p2p_listen: String,

    /// Bootstrap peer multiaddresses (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub bootstrap: Vec<String>,

    /// RPC Basic-auth username. Missing → refuse to start.
    #[arg(long, env = "COVENANT_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC Basic-auth password. Missing → refuse to start.
    #[arg(long, env = "COVENANT_RPC_PASSWORD")]
    pub rpc_password: Option<String>,

    /// RPC listen port. Binds loopback-only unless `rpc_allow_cidr` is set.
    #[arg(long, env = "COVENANT_RPC_PORT", default_value_t = 9998)]
    pub rpc_port: u16,

    /// Extra CIDR blocks allowed to reach the RPC port, beyond loopback.
    #[arg(long = "rpc-allow-cidr", env = "COVENANT_RPC_ALLOW_CIDR", value_delimiter = ',')]
    pub rpc_allow_cidr: Vec<IpNet>,

    /// Enable TLS on the RPC listener.
    #[arg(long, env = "COVENANT_RPC_SSL", default_value_t = false)]
    pub rpc_ssl: bool,

    /// TLS certificate path, required if `rpc_ssl` is set.
    #[arg(long, env = "COVENANT_RPC_SSL_CERT")]
    pub rpc_ssl_cert: Option<PathBuf>,

    /// TLS private key path, required if `rpc_ssl` is set.
    #[arg(long, env = "COVENANT_RPC_SSL_KEY")]
    pub rpc_ssl_key: Option<PathBuf>,

    /// RPC worker-pool size.
    #[arg(long, env = "COVENANT_RPC_THREADS", default_value_t = covenant_core::constants::DEFAULT_RPC_THREADS)]
    pub rpc_threads: usize,

    /// Hex-encoded operator keypair (public||secret, bincode-framed). Enables
    /// hot-activation of a matching Announce. Absent = cold node.
    #[arg(long, env = "COVENANT_OPERATOR_PRIVATE_KEY")]
    pub operator_private_key: Option<String>,

    /// Minimum protocol version accepted for a record to count as Enabled.
    #[arg(long, default_value_t = covenant_core::constants::DEFAULT_MIN_PROTOCOL_VERSION)]
    pub min_protocol_version: u32,
}

impl NodeConfig {
    /// Loopback-only unless `rpc_allow_cidr` names at least one extra
    /// block, in which case the listener binds every interface and leaves
    /// source filtering to the RPC allowlist middleware — mirrors the
    /// original's `-rpcallowip`-gates-`INADDR_ANY` behavior.
    pub fn rpc_bind_addr(&self) -> SocketAddr {
        let ip = if self.rpc_allow_cidr.is_empty() {
            std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
        } else {
            std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
        };
        SocketAddr::new(ip, self.rpc_port)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        expand_tilde(&self.datadir).join("covenant.snapshot")
    }
}


/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
pub fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
