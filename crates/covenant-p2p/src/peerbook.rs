use parking_lot::Mutex;
use std::collections::HashMap;

use covenant_core::types::Timestamp;

/// A snapshot of one connected peer, as surfaced by `getpeerinfo`.
#[derive(Debug, Clone)]
pub struct PeerStats {
    pub addr: String,
    pub services: u64,
    pub lastsend: Timestamp,
    pub lastrecv: Timestamp,
    pub bytessent: u64,
    pub bytesrecv: u64,
    pub conntime: Timestamp,
    pub pingtime: Option<f64>,
    pub version: i32,
    pub subver: String,
    pub inbound: bool,
    pub banscore: u32,
}

#[derive(Debug, Clone)]
pub struct BanEntry {
    pub address: String,
    pub banned_until: Timestamp,
    pub ban_created: Timestamp,
    pub ban_reason: String,
}

/// Peer/ban bookkeeping the RPC layer reads and writes. Owned in-process by
/// the network driver; a node with no P2P layer attached can still answer
/// RPC with an empty `InMemoryPeerBook`.
pub trait PeerBook: Send + Sync {
    fn connection_count(&self) -> usize;
    fn peer_stats(&self) -> Vec<PeerStats>;
    fn queue_ping(&self, addr: &str);
    fn add_node(&self, addr: &str, onetry: bool);
    fn remove_node(&self, addr: &str);
    fn net_totals(&self) -> (u64, u64);
    fn list_banned(&self) -> Vec<BanEntry>;
    fn set_ban(&self, subnet: &str, bantime_secs: i64, ban_reason: &str, now: Timestamp);
    fn remove_ban(&self, subnet: &str);
    fn clear_banned(&self);
    fn record_misbehavior(&self, addr: &str, weight: u32);
}

#[derive(Default)]
struct InMemoryPeerBookState {
    peers: HashMap<String, PeerStats>,
    bans: HashMap<String, BanEntry>,
    banscores: HashMap<String, u32>,
    total_sent: u64,
    total_recv: u64,
}

#[derive(Default)]
pub struct InMemoryPeerBook {
    inner: Mutex<InMemoryPeerBookState>,
}

impl InMemoryPeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_peer(&self, stats: PeerStats) {
        self.inner.lock().peers.insert(stats.addr.clone(), stats);
    }

    pub fn remove_peer(&self, addr: &str) {
        self.inner.lock().peers.remove(addr);
    }
}

impl PeerBook for InMemoryPeerBook {
    fn connection_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    fn peer_stats(&self) -> Vec<PeerStats> {
        self.inner.lock().peers.values().cloned().collect()
    }

    fn queue_ping(&self, _addr: &str) {
        // Advisory only in this collaborator double; a real network driver
        // would set a per-peer "send ping on next pass" flag.
    }

    fn add_node(&self, addr: &str, _onetry: bool) {
        self.inner.lock().peers.entry(addr.to_string()).or_insert_with(|| PeerStats {
            addr: addr.to_string(),
            services: 0,
            lastsend: 0,
            lastrecv: 0,
            bytessent: 0,
            bytesrecv: 0,
            conntime: 0,
            pingtime: None,
            version: 0,
            subver: String::new(),
            inbound: false,
            banscore: 0,
        });
    }

    fn remove_node(&self, addr: &str) {
        self.inner.lock().peers.remove(addr);
    }

    fn net_totals(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.total_recv, inner.total_sent)
    }

    fn list_banned(&self) -> Vec<BanEntry> {
        self.inner.lock().bans.values().cloned().collect()
    }

    fn set_ban(&self, subnet: &str, bantime_secs: i64, ban_reason: &str, now: Timestamp) {
        self.inner.lock().bans.insert(
            subnet.to_string(),
            BanEntry {
                address: subnet.to_string(),
                banned_until: now + bantime_secs,
                ban_created: now,
                ban_reason: ban_reason.to_string(),
            },
        );
    }

    fn remove_ban(&self, subnet: &str) {
        self.inner.lock().bans.remove(subnet);
    }

    fn clear_banned(&self) {
        self.inner.lock().bans.clear();
    }

    fn record_misbehavior(&self, addr: &str, weight: u32) {
        let mut inner = self.inner.lock();
        let score = inner.banscores.entry(addr.to_string()).or_insert(0);
        *score += weight;
        if let Some(p) = inner.peers.get_mut(addr) {
            p.banscore = *score;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_misbehavior_into_banscore() {
        let book = InMemoryPeerBook::new();
        book.add_node("127.0.0.1:9999", false);
        book.record_misbehavior("127.0.0.1:9999", 100);
        let stats = book.peer_stats();
        assert_eq!(stats[0].banscore, 100);
    }

    #[test]
    fn set_ban_then_list_and_clear() {
        let book = InMemoryPeerBook::new();
        book.set_ban("10.0.0.0/8", 3600, "manual", 1_700_000_000);
        assert_eq!(book.list_banned().len(), 1);
        book.clear_banned();
        assert!(book.list_banned().is_empty());
    }
}
