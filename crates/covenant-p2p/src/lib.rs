//! covenant-p2p
//!
//! libp2p networking layer for covenant nodes.
//!
//! GossipSub broadcasts Announce/Heartbeat/Vote traffic to all connected
//! peers. A request-response protocol carries the unicast DirectorySync
//! exchange. Kademlia handles peer discovery and bootstrap. Identify and
//! Ping maintain connection metadata and liveness.

pub mod config;
pub mod dispatcher;
pub mod network;
pub mod peerbook;
pub mod wire;

pub use config::P2pConfig;
pub use dispatcher::{
    DispatchOutcome, LocalIdentity, LoggingMisbehaviorSink, MessageDispatcher, MisbehaviorSink,
    NoLocalIdentity, NoopMisbehaviorSink, PeerBookMisbehaviorSink,
};
pub use network::{P2pHandle, P2pNetwork};
pub use peerbook::{BanEntry, InMemoryPeerBook, PeerBook, PeerStats};
pub use wire::P2pMessage;
