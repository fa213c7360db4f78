use thiserror::Error;

#[derive(Debug, Error)]
pub enum CovenantError {
    // ── Registry errors ──────────────────────────────────────────────────────
    #[error("duplicate collateral outpoint: {0}")]
    DuplicateCollateral(String),

    #[error("unknown covenant record: {0}")]
    UnknownRecord(String),

    #[error("record protocol version {got} below minimum {min}")]
    ProtocolTooOld { min: u32, got: u32 },

    // ── Dispatch / validation errors ─────────────────────────────────────────
    #[error("invalid signature")]
    InvalidSignature,

    #[error("malformed public key script")]
    MalformedPubkeyScript,

    #[error("announce_time out of bounds: {announce_time} (floor {floor}, now {now})")]
    AnnounceTimeOutOfBounds {
        announce_time: i64,
        floor: i64,
        now: i64,
    },

    #[error("sigtime out of bounds: {sigtime} (now {now})")]
    SigtimeOutOfBounds { sigtime: i64, now: i64 },

    #[error("reward_percentage out of range: {0} (must be 0-100)")]
    RewardPercentageOutOfRange(u8),

    #[error("announce rejected: interval not elapsed since {last_updated}")]
    AnnounceIntervalNotElapsed { last_updated: i64 },

    #[error("heartbeat stale: sigtime {sigtime} <= last_heartbeat {last_heartbeat}")]
    StaleHeartbeat { sigtime: i64, last_heartbeat: i64 },

    #[error("vote rate limit: last accepted vote at {last_vote}")]
    VoteRateLimited { last_vote: i64 },

    #[error("collateral UTXO not found")]
    CollateralUtxoUnknown,

    #[error("collateral value mismatch: expected {expected}, got {got}")]
    CollateralValueMismatch { expected: u64, got: u64 },

    #[error("collateral confirmations {got} below minimum {min}")]
    CollateralTooFewConfirmations { min: u32, got: u32 },

    #[error("collateral input age check failed against sigtime")]
    CollateralAgeMismatch,

    #[error("directory sync quota violation from non-loopback peer")]
    DirectorySyncQuotaViolation,

    // ── Persistence errors ────────────────────────────────────────────────────
    #[error("snapshot file error: {0}")]
    FileError(String),

    #[error("snapshot checksum mismatch")]
    IncorrectHash,

    #[error("snapshot magic message mismatch")]
    IncorrectMagicMessage,

    #[error("snapshot network magic mismatch")]
    IncorrectMagicNumber,

    #[error("snapshot format unrecognized")]
    IncorrectFormat,

    // ── Serialization ──────────────────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    // ── RPC / transport errors ────────────────────────────────────────────────
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("internal error: {0}")]
    MiscError(String),

    // ── General ────────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}
