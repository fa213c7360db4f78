use covenant_core::types::{DilithiumPublicKey, DilithiumSignature, Endpoint, Outpoint};
use serde::{Deserialize, Serialize};

/// Legacy (non-reward) Announce payload. Field order matches the wire
/// layout named in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncePayload {
    pub outpoint: Outpoint,
    pub endpoint: Endpoint,
    pub signature: DilithiumSignature,
    pub announce_time: i64,
    pub collateral_pubkey: DilithiumPublicKey,
    pub operator_pubkey: DilithiumPublicKey,
    /// `-1` is the original protocol's "this is a relay update, not a new
    /// record" sentinel; any other value is advisory ping-count metadata.
    pub count: i32,
    pub current: i32,
    pub last_updated: i64,
    pub protocol_version: i32,
}

/// Reward-bearing Announce payload: an `AnnouncePayload` plus a reward
/// script and percentage. P2SH reward scripts are cleared to
/// empty/0 by the validation policy before the record is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRewardedPayload {
    pub base: AnnouncePayload,
    pub reward_script: Vec<u8>,
    pub reward_percentage: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub outpoint: Outpoint,
    pub signature: DilithiumSignature,
    pub sigtime: i64,
    pub stop: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotePayload {
    pub outpoint: Outpoint,
    pub signature: DilithiumSignature,
    pub vote: i32,
}

/// Messages exchanged between covenant nodes. `DirectorySync(None)` is the
/// "sync everything" request; `DirectorySync(Some(outpoint))` asks for one
/// specific record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum P2pMessage {
    AnnounceLegacy(AnnouncePayload),
    AnnounceRewarded(AnnounceRewardedPayload),
    Heartbeat(HeartbeatPayload),
    Vote(VotePayload),
    DirectorySync(Option<Outpoint>),
}

impl P2pMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("P2pMessage serialization is infallible")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// A wire frame: network magic + 12-byte null-padded ASCII command string +
/// payload length + checksum (first 4 bytes of BLAKE3 of the payload) +
/// payload. All integers little-endian.
#[derive(Debug, Clone)]
pub struct Frame {
    pub network_magic: [u8; 4],
    pub command: [u8; 12],
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(network_magic: [u8; 4], command: &str, payload: Vec<u8>) -> Self {
        let mut cmd = [0u8; 12];
        let bytes = command.as_bytes();
        let n = bytes.len().min(12);
        cmd[..n].copy_from_slice(&bytes[..n]);
        Self {
            network_magic,
            command: cmd,
            payload,
        }
    }

    pub fn checksum(&self) -> [u8; 4] {
        let digest = covenant_crypto::blake3_hash(&self.payload);
        [digest[0], digest[1], digest[2], digest[3]]
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 12 + 4 + 4 + self.payload.len());
        buf.extend_from_slice(&self.network_magic);
        buf.extend_from_slice(&self.command);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.checksum());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 24 {
            return None;
        }
        let mut network_magic = [0u8; 4];
        network_magic.copy_from_slice(&bytes[0..4]);
        let mut command = [0u8; 12];
        command.copy_from_slice(&bytes[4..16]);
        let payload_len = u32::from_le_bytes(bytes[16..20].try_into().ok()?) as usize;
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&bytes[20..24]);
        let payload = bytes.get(24..24 + payload_len)?.to_vec();

        let frame = Frame {
            network_magic,
            command,
            payload,
        };
        if frame.checksum() != checksum {
            return None;
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let frame = Frame::new([1, 2, 3, 4], "dseg", b"hello".to_vec());
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.payload, b"hello");
        assert_eq!(decoded.network_magic, [1, 2, 3, 4]);
    }

    #[test]
    fn frame_rejects_bad_checksum() {
        let frame = Frame::new([1, 2, 3, 4], "dseg", b"hello".to_vec());
        let mut encoded = frame.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(Frame::decode(&encoded).is_none());
    }
}
