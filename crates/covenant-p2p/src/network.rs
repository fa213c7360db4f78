use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::{AsyncReadExt, AsyncWriteExt, StreamExt};
use libp2p::{
    gossipsub, identify, kad, noise,
    request_response::{self, OutboundRequestId, ProtocolSupport},
    ping, swarm::SwarmEvent, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm,
};
use libp2p_swarm::NetworkBehaviour;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use covenant_core::types::{PeerAddr, Timestamp};
use covenant_registry::Registry;

use crate::config::P2pConfig;
use crate::dispatcher::{DispatchOutcome, MessageDispatcher};
use crate::wire::P2pMessage;

/// Request-response codec carrying bincode-framed `P2pMessage`s. Used for
/// the unicast exchanges (ask-for-entry, DirectorySync) that don't belong
/// on the broadcast gossip topic.
#[derive(Clone, Default)]
pub struct CovenantCodec;

const MAX_FRAME_LEN: usize = 1 << 20;

#[async_trait::async_trait]
impl request_response::Codec for CovenantCodec {
    type Protocol = StreamProtocol;
    type Request = P2pMessage;
    type Response = Vec<P2pMessage>;

    async fn read_request<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<P2pMessage>
    where
        T: futures::AsyncRead + Unpin + Send,
    {
        let bytes = read_length_prefixed(io).await?;
        P2pMessage::from_bytes(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    async fn read_response<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<Vec<P2pMessage>>
    where
        T: futures::AsyncRead + Unpin + Send,
    {
        let bytes = read_length_prefixed(io).await?;
        bincode::deserialize(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    async fn write_request<T>(&mut self, _: &StreamProtocol, io: &mut T, req: P2pMessage) -> io::Result<()>
    where
        T: futures::AsyncWrite + Unpin + Send,
    {
        write_length_prefixed(io, &req.to_bytes()).await
    }

    async fn write_response<T>(&mut self, _: &StreamProtocol, io: &mut T, res: Vec<P2pMessage>) -> io::Result<()>
    where
        T: futures::AsyncWrite + Unpin + Send,
    {
        let bytes = bincode::serialize(&res).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_length_prefixed(io, &bytes).await
    }
}

async fn read_length_prefixed<T: futures::AsyncRead + Unpin + Send>(io: &mut T) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_length_prefixed<T: futures::AsyncWrite + Unpin + Send>(io: &mut T, bytes: &[u8]) -> io::Result<()> {
    io.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    io.write_all(bytes).await?;
    io.close().await
}

/// Combined libp2p network behaviour. The derive macro generates
/// `CovenantBehaviourEvent` with one variant per field.
#[derive(NetworkBehaviour)]
pub struct CovenantBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub request_response: request_response::Behaviour<CovenantCodec>,
}

/// Application-facing handle returned from `P2pNetwork::new()`.
pub struct P2pHandle {
    /// Send here to broadcast a message to all gossip peers.
    pub outbound_tx: mpsc::Sender<P2pMessage>,
    pub local_peer_id: PeerId,
}

/// Owns the libp2p Swarm and the registry/dispatcher it feeds.
pub struct P2pNetwork {
    swarm: Swarm<CovenantBehaviour>,
    topic: gossipsub::IdentTopic,
    outbound_rx: mpsc::Receiver<P2pMessage>,
    dispatcher: Arc<MessageDispatcher>,
    registry: Arc<Registry>,
    peer_book: Arc<dyn crate::peerbook::PeerBook>,
    min_protocol: u32,
    /// The remote IP last seen for each connected peer, so per-peer
    /// misbehavior/throttle bookkeeping (DirectorySync quota, bad-signature
    /// reports) attributes to the actual connection rather than a shared
    /// placeholder.
    peer_addrs: HashMap<PeerId, PeerAddr>,
}

/// Extract the remote IP from a connection's observed multiaddr, if it
/// carries one (TCP/QUIC transports always do; other transports may not).
fn peer_addr_from_multiaddr(addr: &Multiaddr) -> Option<PeerAddr> {
    addr.iter().find_map(|proto| match proto {
        libp2p::multiaddr::Protocol::Ip4(ip) => Some(PeerAddr(std::net::IpAddr::V4(ip))),
        libp2p::multiaddr::Protocol::Ip6(ip) => Some(PeerAddr(std::net::IpAddr::V6(ip))),
        _ => None,
    })
}

fn now_secs() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl P2pNetwork {
    pub fn new(
        config: &P2pConfig,
        dispatcher: Arc<MessageDispatcher>,
        registry: Arc<Registry>,
        peer_book: Arc<dyn crate::peerbook::PeerBook>,
    ) -> Result<(Self, P2pHandle), Box<dyn std::error::Error + Send + Sync>> {
        let topic = gossipsub::IdentTopic::new(&config.gossip_topic);
        let protocol_version = config.protocol_version.clone();

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key: &libp2p::identity::Keypair| {
                let message_id_fn = |msg: &gossipsub::Message| {
                    let mut s = DefaultHasher::new();
                    msg.data.hash(&mut s);
                    gossipsub::MessageId::from(s.finish().to_string())
                };

                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .message_id_fn(message_id_fn)
                    .build()
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

                let store = kad::store::MemoryStore::new(key.public().to_peer_id());
                let kademlia = kad::Behaviour::new(key.public().to_peer_id(), store);

                let identify = identify::Behaviour::new(identify::Config::new(
                    protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();

                let request_response = request_response::Behaviour::new(
                    [(StreamProtocol::new("/covenant/sync/1.0.0"), ProtocolSupport::Full)],
                    request_response::Config::default(),
                );

                Ok(CovenantBehaviour {
                    gossipsub,
                    kademlia,
                    identify,
                    ping,
                    request_response,
                })
            })?
            .build();

        swarm.behaviour_mut().gossipsub.subscribe(&topic)?;

        let listen_addr: Multiaddr = config.listen_addr.parse()?;
        swarm.listen_on(listen_addr)?;

        for addr_str in &config.bootstrap_peers {
            if let Ok(addr) = addr_str.parse::<Multiaddr>() {
                if let Some(libp2p::multiaddr::Protocol::P2p(peer_id)) = addr.iter().last() {
                    swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
                    debug!(peer = %peer_id, "added bootstrap peer");
                }
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        let (outbound_tx, outbound_rx) = mpsc::channel(256);

        let network = P2pNetwork {
            swarm,
            topic,
            outbound_rx,
            dispatcher,
            registry,
            peer_book,
            min_protocol: config.min_protocol_version,
            peer_addrs: HashMap::new(),
        };
        let handle = P2pHandle {
            outbound_tx,
            local_peer_id,
        };

        Ok((network, handle))
    }

    fn publish(&mut self, msg: &P2pMessage) {
        let data = msg.to_bytes();
        if let Err(e) = self
            .swarm
            .behaviour_mut()
            .gossipsub
            .publish(self.topic.clone(), data)
        {
            warn!(error = %e, "gossipsub publish failed");
        }
    }

    fn handle_gossip_message(&mut self, msg: P2pMessage, now: Timestamp) {
        let outcome = match &msg {
            P2pMessage::AnnounceLegacy(p) => self.dispatcher.handle_announce_legacy(p, now),
            P2pMessage::AnnounceRewarded(p) => self.dispatcher.handle_announce_rewarded(p, now),
            P2pMessage::Heartbeat(p) => self.dispatcher.handle_heartbeat(p, now),
            P2pMessage::Vote(p) => self.dispatcher.handle_vote(p, now),
            P2pMessage::DirectorySync(_) => return,
        };
        match outcome {
            DispatchOutcome::AcceptedRelay => self.publish(&msg),
            DispatchOutcome::LocalActivation => {
                info!("local operator key activated via network announce");
                self.publish(&msg);
            }
            DispatchOutcome::AcceptedNoRelay | DispatchOutcome::Dropped => {}
        }
    }

    fn handle_directory_sync_request(
        &mut self,
        peer: PeerId,
        channel: request_response::ResponseChannel<Vec<P2pMessage>>,
        requested: Option<covenant_core::types::Outpoint>,
        now: Timestamp,
    ) {
        let peer_addr = self.peer_addrs.get(&peer).cloned().unwrap_or(PeerAddr(
            std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        ));
        let messages = self
            .dispatcher
            .handle_directory_sync(&peer_addr, requested.as_ref(), now);
        let _ = self
            .swarm
            .behaviour_mut()
            .request_response
            .send_response(channel, messages);
        debug!(%peer, "answered directory sync request");
    }

    /// Send an initial DirectorySync request to a newly connected peer, if
    /// our registry is still empty (cold start).
    fn cold_start_sync(&mut self, peer: PeerId) -> Option<OutboundRequestId> {
        if !self.registry.is_empty() {
            return None;
        }
        Some(
            self.swarm
                .behaviour_mut()
                .request_response
                .send_request(&peer, P2pMessage::DirectorySync(None)),
        )
    }

    /// Drive the P2P event loop. Run in a dedicated tokio task; exits once
    /// `shutdown` is signalled.
    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("P2P network shutting down");
                        return;
                    }
                }

                Some(msg) = self.outbound_rx.recv() => {
                    self.publish(&msg);
                }

                event = self.swarm.select_next_some() => {
                    match event {
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "P2P listening on");
                        }
                        SwarmEvent::Behaviour(CovenantBehaviourEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            match P2pMessage::from_bytes(&message.data) {
                                Ok(msg) => self.handle_gossip_message(msg, now_secs()),
                                Err(e) => debug!(error = %e, "failed to decode gossip message"),
                            }
                        }
                        SwarmEvent::Behaviour(CovenantBehaviourEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            for addr in info.listen_addrs {
                                self.swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .add_address(&peer_id, addr);
                            }
                        }
                        SwarmEvent::Behaviour(CovenantBehaviourEvent::RequestResponse(
                            request_response::Event::Message { peer, message, .. },
                        )) => match message {
                            request_response::Message::Request { request, channel, .. } => {
                                if let P2pMessage::DirectorySync(requested) = request {
                                    self.handle_directory_sync_request(peer, channel, requested, now_secs());
                                }
                            }
                            request_response::Message::Response { response, .. } => {
                                let now = now_secs();
                                for msg in response {
                                    self.handle_gossip_message(msg, now);
                                }
                            }
                        },
                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            debug!(peer = %peer_id, "connection established");
                            let inbound = !endpoint.is_dialer();
                            self.peer_book.add_node(&peer_id.to_string(), false);
                            if let Some(addr) = peer_addr_from_multiaddr(endpoint.get_remote_address()) {
                                self.peer_addrs.insert(peer_id, addr);
                            }
                            if inbound {
                                debug!(peer = %peer_id, "inbound connection");
                            }
                            self.cold_start_sync(peer_id);
                        }
                        SwarmEvent::ConnectionClosed { peer_id, .. } => {
                            debug!(peer = %peer_id, "connection closed");
                            self.peer_book.remove_node(&peer_id.to_string());
                            self.peer_addrs.remove(&peer_id);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
