use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── TxId ─────────────────────────────────────────────────────────────────────

/// 32-byte collateral transaction identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}…)", &self.to_hex()[..16])
    }
}

// ── Outpoint ─────────────────────────────────────────────────────────────────

/// The collateral outpoint: primary key of a covenant record. Ordering is
/// lexicographic on `(txid, vout)` — this is the tiebreak rule the selection
/// engine uses when two records score equally.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: TxId,
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: TxId, vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(&self.txid.0);
        buf.extend_from_slice(&self.vout.to_le_bytes());
        buf
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.txid.to_hex(), self.vout)
    }
}

impl fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outpoint({})", self)
    }
}

// ── Endpoint ─────────────────────────────────────────────────────────────────

/// A dotted-quad:port network endpoint, as carried on the wire and as used
/// in canonical signed-message strings.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    /// RFC1918 / link-local style private address — DirectorySync does not
    /// relay records whose endpoint falls in this range.
    pub fn is_routable(&self) -> bool {
        !self.ip.is_loopback() && !self.ip.is_unspecified()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

// ── PeerAddr ─────────────────────────────────────────────────────────────────

/// Identifies a peer by network address only — never a live connection
/// handle. Registry throttle tables are keyed on this so the registry never
/// outlives a peer's connection lifetime.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct PeerAddr(pub IpAddr);

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── DilithiumPublicKey / DilithiumSignature ───────────────────────────────────

/// Dilithium2 public key (1312 bytes per NIST FIPS 204). Used as both the
/// operator key and the collateral key on a covenant record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilithiumPublicKey(pub Vec<u8>);

impl fmt::Debug for DilithiumPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DilithiumPublicKey({}b)", self.0.len())
    }
}

/// Dilithium2 signature (2420 bytes per NIST FIPS 204).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilithiumSignature(pub Vec<u8>);

impl fmt::Debug for DilithiumSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DilithiumSignature({}b)", self.0.len())
    }
}

// ── CovenantState ────────────────────────────────────────────────────────────

/// Lifecycle state of a covenant record.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum CovenantState {
    /// Announced but not yet seen a fresh heartbeat.
    PreEnabled,
    /// Active: protocol_version >= MinProtocol and heartbeat is fresh.
    Enabled,
    /// Heartbeat has gone stale past `HEARTBEAT_EXPIRY_SECS`.
    Expired,
    /// Explicitly stopped via a Heartbeat stop_flag.
    Removed,
    /// Collateral UTXO observed spent by the chain collaborator.
    CollateralSpent,
}

impl CovenantState {
    /// States `sweep` erases the record for entirely.
    pub fn is_erasable(&self) -> bool {
        matches!(self, CovenantState::Removed | CovenantState::CollateralSpent)
    }
}

// ── CovenantRecord ───────────────────────────────────────────────────────────

/// A covenant node's registry entry. `collateral` is the primary key.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct CovenantRecord {
    pub collateral: Outpoint,
    pub endpoint: Endpoint,
    pub operator_pubkey: DilithiumPublicKey,
    pub collateral_pubkey: DilithiumPublicKey,
    pub announce_signature: DilithiumSignature,

    pub announce_time: Timestamp,
    pub last_seen: Timestamp,
    pub last_heartbeat: Timestamp,
    pub last_paid: Timestamp,

    pub protocol_version: u32,

    /// P2SH reward scripts are cleared to empty + 0% per the announce
    /// validation policy — a record never carries a P2SH reward script.
    pub reward_script: Option<Vec<u8>>,
    pub reward_percentage: u8,

    pub state: CovenantState,

    /// Advisory only. No code path may branch registry state on this value.
    pub port_open: bool,

    /// True if this record was announced via the legacy (non-reward)
    /// Announce variant. DirectorySync replies always honor this flag.
    pub legacy_flag: bool,
}

impl CovenantRecord {
    pub fn is_enabled(&self, min_protocol: u32) -> bool {
        self.state == CovenantState::Enabled && self.protocol_version >= min_protocol
    }

    pub fn seconds_since_payment(&self, now: Timestamp) -> i64 {
        (now - self.last_paid).max(0)
    }
}

// ── AskTables ────────────────────────────────────────────────────────────────

/// The three throttle maps guarding gossip chatter. All three are guarded by
/// the same lock as the record table itself (see `covenant-registry`).
#[derive(Default, Debug)]
pub struct AskTables {
    /// Peers who asked us for a DirectorySync recently (keyed by peer addr,
    /// throttles how often we answer a `dseg(null)` from the same peer).
    pub peers_who_asked_us: HashMap<PeerAddr, Timestamp>,
    /// Peers we asked for a DirectorySync recently (cold-start / periodic
    /// resync throttle).
    pub peers_we_asked: HashMap<PeerAddr, Timestamp>,
    /// Outpoints we've requested (AskForEntry) and are waiting to hear about.
    pub we_asked_for_entry: HashMap<Outpoint, Timestamp>,
}

impl AskTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every throttle entry whose deadline has passed — "lazy expiry",
    /// there is no active timer driving this.
    pub fn expire(&mut self, now: Timestamp, cooldown_peers: i64, cooldown_entry: i64) {
        self.peers_who_asked_us
            .retain(|_, ts| now - *ts < cooldown_peers);
        self.peers_we_asked.retain(|_, ts| now - *ts < cooldown_peers);
        self.we_asked_for_entry
            .retain(|_, ts| now - *ts < cooldown_entry);
    }
}
