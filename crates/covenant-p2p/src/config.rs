/// Configuration for the covenant P2P network.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Local listen address (e.g. "/ip4/0.0.0.0/tcp/9999").
    pub listen_addr: String,
    /// Bootstrap peer multiaddresses.
    pub bootstrap_peers: Vec<String>,
    /// Protocol version string advertised to peers.
    pub protocol_version: String,
    /// GossipSub topic name for relaying Announce/Heartbeat/Vote messages.
    pub gossip_topic: String,
    /// Minimum protocol version a covenant record must carry to count as
    /// Enabled.
    pub min_protocol_version: u32,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/9999".into(),
            bootstrap_peers: Vec::new(),
            protocol_version: "/covenant/1.0.0".into(),
            gossip_topic: "covenant-gossip".into(),
            min_protocol_version: covenant_core::constants::DEFAULT_MIN_PROTOCOL_VERSION,
        }
    }
}
