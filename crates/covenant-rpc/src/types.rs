use serde::{Deserialize, Serialize};

/// A JSON-RPC 1.0-style request body: `{"method": ..., "params": ..., "id": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub id: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
}

/// The JSON-RPC error envelope: `{"result": null, "error": {...}, "id": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub result: serde_json::Value,
    pub error: Option<RpcErrorObject>,
    pub id: serde_json::Value,
}

impl RpcResponse {
    pub fn ok(result: serde_json::Value, id: serde_json::Value) -> Self {
        Self { result, error: None, id }
    }

    pub fn err(code: i32, message: impl Into<String>, id: serde_json::Value) -> Self {
        Self {
            result: serde_json::Value::Null,
            error: Some(RpcErrorObject { code, message: message.into() }),
            id,
        }
    }
}

// ── Network / peer DTOs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RpcPeerInfo {
    pub addr: String,
    pub services: String,
    pub lastsend: i64,
    pub lastrecv: i64,
    pub bytessent: u64,
    pub bytesrecv: u64,
    pub conntime: i64,
    pub pingtime: Option<f64>,
    pub version: i32,
    pub subver: String,
    pub inbound: bool,
    pub banscore: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcNetTotals {
    pub totalbytesrecv: u64,
    pub totalbytessent: u64,
    pub timemillis: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcBanEntry {
    pub address: String,
    pub banned_until: i64,
    pub ban_created: i64,
    pub ban_reason: String,
}

// ── Chain DTOs ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RpcBlockInfo {
    pub hash: String,
    pub height: u64,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcMiningInfo {
    pub blocks: u64,
    pub difficulty: f64,
    pub networkhashps: f64,
    pub pooledtx: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcStakingInfo {
    pub enabled: bool,
    pub staking: bool,
    pub difficulty: f64,
    pub currentblocksize: u64,
    pub pooledtx: u64,
}

// ── Masternode / covenant-record DTOs ────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RpcMasternodeEntry {
    pub collateral: String,
    pub addr: String,
    pub status: String,
    pub protocol: u32,
    pub last_seen: i64,
    pub last_paid: i64,
    /// Display-only; no code path branches registry state on this.
    pub port_open: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcMasternodeCount {
    pub total: usize,
    pub enabled: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcMasternodeStatus {
    pub collateral: Option<String>,
    pub state: Option<String>,
    pub message: String,
}
