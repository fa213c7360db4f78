//! ─── Covenant Node Protocol Constants ───────────────────────────────────────

// ── Network ──────────────────────────────────────────────────────────────────

/// 4-byte network magic prefixed to every wire frame and snapshot file.
pub const NETWORK_MAGIC: [u8; 4] = [0xc0, 0x1e, 0xda, 0x7e];

/// Fixed collateral value a covenant record's input must carry, in the
/// chain collaborator's smallest unit.
pub const COLLATERAL_VALUE: u64 = 1_000_000_000_000; // 10,000 coin @ 8 decimals

// ── Protocol / timing ────────────────────────────────────────────────────────

/// Default minimum protocol version a record must carry to count as Enabled.
pub const DEFAULT_MIN_PROTOCOL_VERSION: u32 = 70_015;

/// Earliest acceptable `announce_time`: 2017-11-20T00:00:00Z.
pub const ANNOUNCE_EPOCH_FLOOR: i64 = 1_511_159_400;

/// An Announce's `announce_time` may not be further than this many seconds
/// ahead of the receiving node's clock.
pub const ANNOUNCE_FUTURE_SLOP_SECS: i64 = 3_600;

/// A Heartbeat's `sigtime` must fall within `now ± HEARTBEAT_TIME_SLOP_SECS`.
pub const HEARTBEAT_TIME_SLOP_SECS: i64 = 3_600;

/// Minimum interval between accepted re-Announces of the same record.
pub const MIN_ANNOUNCE_INTERVAL_SECS: i64 = 3_600;

/// Cooldown on a single outstanding `ask_for_entry` per collateral outpoint.
pub const ASK_FOR_ENTRY_COOLDOWN_SECS: i64 = 60 * 60;

/// Cooldown on accepting a `DirectorySync(None)` ("dseg-all") request from
/// the same peer.
pub const DSEG_COOLDOWN_SECS: i64 = 3 * 60 * 60;

/// Minimum confirmations required on the collateral UTXO.
pub const MIN_CONFIRMATIONS: u32 = 15;

/// Past this many seconds without a fresh heartbeat, a record is Expired.
pub const HEARTBEAT_EXPIRY_SECS: i64 = 130 * 60;

/// Minimum interval between accepted votes on the same record.
pub const MIN_VOTE_INTERVAL_SECS: i64 = 60 * 60;

// ── Misbehavior weights ───────────────────────────────────────────────────────

/// Malformed pubkey script or failed signature check on an Announce.
pub const MISBEHAVIOR_BAD_SIGNATURE: u32 = 100;

/// Collateral UTXO present but below `MIN_CONFIRMATIONS`.
pub const MISBEHAVIOR_LOW_CONFIRMATION_COLLATERAL: u32 = 20;

/// Repeated non-loopback `DirectorySync(None)` inside `DSEG_COOLDOWN_SECS`.
pub const MISBEHAVIOR_DSEG_QUOTA_VIOLATION: u32 = 34;

// ── RPC transport ─────────────────────────────────────────────────────────────

/// Default worker-pool size for the RPC transport.
pub const DEFAULT_RPC_THREADS: usize = 20;

/// Passwords shorter than this many characters earn a timing-penalty delay
/// on auth failure, to slow brute-force guessing of weak credentials.
pub const SHORT_PASSWORD_THRESHOLD: usize = 20;

/// Delay applied on auth failure when the configured password is short.
pub const AUTH_FAILURE_PENALTY_MS: u64 = 250;
