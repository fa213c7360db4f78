use std::sync::Arc;

use covenant_chain::ChainView;
use covenant_core::constants::{
    ANNOUNCE_EPOCH_FLOOR, ANNOUNCE_FUTURE_SLOP_SECS, COLLATERAL_VALUE, HEARTBEAT_TIME_SLOP_SECS,
    MIN_ANNOUNCE_INTERVAL_SECS, MIN_CONFIRMATIONS, MISBEHAVIOR_BAD_SIGNATURE,
    MISBEHAVIOR_DSEG_QUOTA_VIOLATION, MISBEHAVIOR_LOW_CONFIRMATION_COLLATERAL,
};
use covenant_core::types::{
    CovenantRecord, CovenantState, DilithiumPublicKey, Outpoint, PeerAddr, Timestamp,
};
use covenant_crypto::{canonical_message, verify_signature};
use covenant_registry::Registry;

use crate::wire::{AnnouncePayload, AnnounceRewardedPayload, HeartbeatPayload, P2pMessage, VotePayload};

/// Reports a peer-weight misbehavior penalty. The dispatcher never
/// disconnects a peer itself — that policy decision belongs to whatever
/// consumes this sink.
pub trait MisbehaviorSink: Send + Sync {
    fn report(&self, peer: &PeerAddr, weight: u32);
}

/// A no-op sink, useful for tests and for nodes that don't enforce a ban
/// policy.
pub struct NoopMisbehaviorSink;
impl MisbehaviorSink for NoopMisbehaviorSink {
    fn report(&self, _peer: &PeerAddr, _weight: u32) {}
}

/// Logs reported misbehavior at `warn`. Actual ban-list enforcement is a
/// Non-goal; this exists so the reporting path is exercised end to end.
pub struct LoggingMisbehaviorSink;
impl MisbehaviorSink for LoggingMisbehaviorSink {
    fn report(&self, peer: &PeerAddr, weight: u32) {
        tracing::warn!(%peer, weight, "peer misbehavior reported");
    }
}

/// Accumulates misbehavior weight into a `PeerBook`'s banscore, so
/// `getpeerinfo`'s `banscore` field reflects real dispatcher-observed
/// penalties rather than the in-memory double's zero default.
pub struct PeerBookMisbehaviorSink {
    peer_book: Arc<dyn crate::peerbook::PeerBook>,
}

impl PeerBookMisbehaviorSink {
    pub fn new(peer_book: Arc<dyn crate::peerbook::PeerBook>) -> Self {
        Self { peer_book }
    }
}

impl MisbehaviorSink for PeerBookMisbehaviorSink {
    fn report(&self, peer: &PeerAddr, weight: u32) {
        self.peer_book.record_misbehavior(&peer.to_string(), weight);
    }
}

/// Whether the local node holds the operator key for a record it just saw
/// announced — the hot-activation seam.
pub trait LocalIdentity: Send + Sync {
    fn operator_public_key(&self) -> Option<DilithiumPublicKey>;
}

pub struct NoLocalIdentity;
impl LocalIdentity for NoLocalIdentity {
    fn operator_public_key(&self) -> Option<DilithiumPublicKey> {
        None
    }
}

/// What the caller should do after a message has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Message was accepted and should be relayed to other peers.
    AcceptedRelay,
    /// Message was accepted but relay is not appropriate (e.g. a reply to
    /// a specific DirectorySync request).
    AcceptedNoRelay,
    /// Message was dropped silently (stale, replay, or unknown referent
    /// after issuing an ask).
    Dropped,
    /// The local node's operator key matched an accepted Announce.
    LocalActivation,
}

pub struct MessageDispatcher {
    registry: Arc<Registry>,
    chain: Arc<dyn ChainView>,
    misbehavior: Arc<dyn MisbehaviorSink>,
    local_identity: Arc<dyn LocalIdentity>,
    min_protocol: u32,
}

impl MessageDispatcher {
    pub fn new(
        registry: Arc<Registry>,
        chain: Arc<dyn ChainView>,
        misbehavior: Arc<dyn MisbehaviorSink>,
        local_identity: Arc<dyn LocalIdentity>,
        min_protocol: u32,
    ) -> Self {
        Self {
            registry,
            chain,
            misbehavior,
            local_identity,
            min_protocol,
        }
    }

    /// Canonical signed message: `endpoint ∥ announce_time ∥ operator_pk ∥
    /// collateral_pk ∥ protocol [∥ reward_script ∥ reward_percentage]`,
    /// verified against `collateral_pk`. `reward` carries the raw,
    /// pre-P2SH-clearing wire values for the rewarded variant — the
    /// signature covers what was actually signed by the announcer, not the
    /// locally-cleared values the record ends up storing.
    fn announce_message_bytes(
        endpoint: &covenant_core::types::Endpoint,
        announce_time: i64,
        operator_pk: &DilithiumPublicKey,
        collateral_pk: &DilithiumPublicKey,
        protocol_version: i32,
        reward: Option<(&[u8], i32)>,
    ) -> Vec<u8> {
        let endpoint_str = endpoint.to_string();
        let operator_hex = hex::encode(&operator_pk.0);
        let collateral_hex = hex::encode(&collateral_pk.0);
        match reward {
            None => canonical_message(&[
                &endpoint_str,
                &announce_time,
                &operator_hex,
                &collateral_hex,
                &protocol_version,
            ]),
            Some((reward_script, reward_percentage)) => {
                let reward_hex = hex::encode(reward_script);
                canonical_message(&[
                    &endpoint_str,
                    &announce_time,
                    &operator_hex,
                    &collateral_hex,
                    &protocol_version,
                    &reward_hex,
                    &reward_percentage,
                ])
            }
        }
    }

    fn heartbeat_message_bytes(endpoint: &covenant_core::types::Endpoint, sigtime: i64, stop: bool) -> Vec<u8> {
        let endpoint_str = endpoint.to_string();
        canonical_message(&[&endpoint_str, &sigtime, &stop])
    }

    fn vote_message_bytes(outpoint: &Outpoint, vote: i32) -> Vec<u8> {
        let op_str = outpoint.to_string();
        canonical_message(&[&op_str, &vote])
    }

    /// Shared freshness/format/signature/collateral checks for both Announce
    /// variants. `legacy` tags the resulting record's `legacy_flag`.
    fn process_announce(
        &self,
        base: &AnnouncePayload,
        reward_script: Option<Vec<u8>>,
        reward_percentage: u8,
        signed_reward: Option<(&[u8], i32)>,
        legacy: bool,
        now: Timestamp,
    ) -> DispatchOutcome {
        // 1. announce_time bounds.
        if base.announce_time < ANNOUNCE_EPOCH_FLOOR
            || base.announce_time > now + ANNOUNCE_FUTURE_SLOP_SECS
        {
            self.misbehavior
                .report(&peer_addr_of(&base.endpoint), MISBEHAVIOR_BAD_SIGNATURE);
            return DispatchOutcome::Dropped;
        }

        // 2. port / endpoint sanity.
        if base.endpoint.port == 0 {
            return DispatchOutcome::Dropped;
        }

        // 3. reward percentage range (P2SH-clearing handled by the caller
        // before this function is reached, mirroring the original's
        // `if (rewardAddress.IsPayToScriptHash()) { rewardAddress.clear(); rewardPercentage = 0; }`).
        if reward_percentage > 100 {
            return DispatchOutcome::Dropped;
        }

        // 4. protocol version floor.
        if (base.protocol_version as u32) < self.min_protocol {
            return DispatchOutcome::Dropped;
        }

        // 5. pubkey script shape. Both keys here are Dilithium public keys,
        // not secp256k1 P2PKH scripts, so the "25-byte P2PKH shape" check
        // from the original collapses to a minimum non-empty length check
        // at this collaborator boundary.
        if base.collateral_pubkey.0.is_empty() || base.operator_pubkey.0.is_empty() {
            self.misbehavior
                .report(&peer_addr_of(&base.endpoint), MISBEHAVIOR_BAD_SIGNATURE);
            return DispatchOutcome::Dropped;
        }

        // 6. canonical signature check against the collateral key.
        let message = Self::announce_message_bytes(
            &base.endpoint,
            base.announce_time,
            &base.operator_pubkey,
            &base.collateral_pubkey,
            base.protocol_version,
            signed_reward,
        );
        if verify_signature(&base.collateral_pubkey, &message, &base.signature).is_err() {
            self.misbehavior
                .report(&peer_addr_of(&base.endpoint), MISBEHAVIOR_BAD_SIGNATURE);
            return DispatchOutcome::Dropped;
        }

        // 7. update-vs-insert branch. An update is admitted only as a relay
        // (count == -1), only when it proves ownership of the same
        // collateral key as the existing record, and only outside the
        // per-record announce cooldown; anything else is dropped rather
        // than applied.
        if let Some(existing) = self.registry.find_by_collateral(&base.outpoint) {
            if base.count != -1 {
                return DispatchOutcome::Dropped;
            }
            if existing.collateral_pubkey != base.collateral_pubkey {
                return DispatchOutcome::Dropped;
            }
            if now - existing.last_seen < MIN_ANNOUNCE_INTERVAL_SECS {
                return DispatchOutcome::Dropped;
            }

            let mut updated = existing;
            updated.endpoint = base.endpoint.clone();
            updated.operator_pubkey = base.operator_pubkey.clone();
            updated.announce_signature = base.signature.clone();
            updated.announce_time = base.announce_time;
            updated.last_seen = now;
            updated.protocol_version = base.protocol_version as u32;
            updated.reward_script = reward_script;
            updated.reward_percentage = reward_percentage;
            updated.legacy_flag = legacy;
            let _ = self.registry.update(updated);
        } else {
            // 8. collateral proof via the chain collaborator.
            match self.chain.utxo_value(&base.outpoint) {
                None => return DispatchOutcome::Dropped,
                Some((value, confirmations)) => {
                    if value != COLLATERAL_VALUE {
                        return DispatchOutcome::Dropped;
                    }
                    if confirmations < MIN_CONFIRMATIONS {
                        self.misbehavior.report(
                            &peer_addr_of(&base.endpoint),
                            MISBEHAVIOR_LOW_CONFIRMATION_COLLATERAL,
                        );
                        return DispatchOutcome::Dropped;
                    }
                }
            }

            // 9. sigtime vs. collateral confirmation block.
            if let Some(confirmed_height) = self.chain.utxo_confirmed_height(&base.outpoint) {
                if let Some(block_time) =
                    self.chain.block_time(confirmed_height + MIN_CONFIRMATIONS as u64 - 1)
                {
                    if base.announce_time < block_time {
                        return DispatchOutcome::Dropped;
                    }
                }
            }

            let record = CovenantRecord {
                collateral: base.outpoint.clone(),
                endpoint: base.endpoint.clone(),
                operator_pubkey: base.operator_pubkey.clone(),
                collateral_pubkey: base.collateral_pubkey.clone(),
                announce_signature: base.signature.clone(),
                announce_time: base.announce_time,
                last_seen: now,
                last_heartbeat: now,
                last_paid: now,
                protocol_version: base.protocol_version as u32,
                reward_script,
                reward_percentage,
                state: CovenantState::PreEnabled,
                port_open: base.endpoint.is_routable(),
                legacy_flag: legacy,
            };
            if self.registry.add(record).is_err() {
                return DispatchOutcome::Dropped;
            }
        }

        // 10. hot-activation.
        if self.local_identity.operator_public_key().as_ref() == Some(&base.operator_pubkey) {
            return DispatchOutcome::LocalActivation;
        }

        DispatchOutcome::AcceptedRelay
    }

    pub fn handle_announce_legacy(&self, payload: &AnnouncePayload, now: Timestamp) -> DispatchOutcome {
        self.process_announce(payload, None, 0, None, true, now)
    }

    pub fn handle_announce_rewarded(
        &self,
        payload: &AnnounceRewardedPayload,
        now: Timestamp,
    ) -> DispatchOutcome {
        let mut reward_script = Some(payload.reward_script.clone());
        let mut reward_percentage = payload.reward_percentage.clamp(0, 100) as u8;

        // P2SH-clearing rule: a P2SH reward script (OP_HASH160 <20 bytes> OP_EQUAL,
        // 23 bytes starting 0xa9 0x14) is always cleared to empty/0%. The
        // signature was taken over the raw, pre-clearing wire values, so the
        // clearing only ever affects what gets stored, not what gets verified.
        if let Some(script) = &reward_script {
            if script.len() == 23 && script[0] == 0xa9 && script[1] == 0x14 {
                reward_script = None;
                reward_percentage = 0;
            }
        }

        let signed_reward = Some((payload.reward_script.as_slice(), payload.reward_percentage));

        self.process_announce(
            &payload.base,
            reward_script,
            reward_percentage,
            signed_reward,
            false,
            now,
        )
    }

    pub fn handle_heartbeat(&self, payload: &HeartbeatPayload, now: Timestamp) -> DispatchOutcome {
        if payload.sigtime < now - HEARTBEAT_TIME_SLOP_SECS
            || payload.sigtime > now + HEARTBEAT_TIME_SLOP_SECS
        {
            return DispatchOutcome::Dropped;
        }

        let Some(mut record) = self.registry.find_by_collateral(&payload.outpoint) else {
            self.registry.ask_for_entry(&payload.outpoint, now);
            return DispatchOutcome::Dropped;
        };

        if payload.sigtime <= record.last_heartbeat {
            return DispatchOutcome::Dropped;
        }

        let message =
            Self::heartbeat_message_bytes(&record.endpoint, payload.sigtime, payload.stop);
        if verify_signature(&record.operator_pubkey, &message, &payload.signature).is_err() {
            self.misbehavior
                .report(&peer_addr_of(&record.endpoint), MISBEHAVIOR_BAD_SIGNATURE);
            return DispatchOutcome::Dropped;
        }

        if payload.stop {
            record.state = CovenantState::Removed;
        } else {
            record.last_heartbeat = payload.sigtime;
            record.last_seen = now;
            if record.protocol_version >= self.min_protocol {
                record.state = CovenantState::Enabled;
            }
        }
        let _ = self.registry.update(record);

        DispatchOutcome::AcceptedRelay
    }

    pub fn handle_vote(&self, payload: &VotePayload, now: Timestamp) -> DispatchOutcome {
        let Some(record) = self.registry.find_by_collateral(&payload.outpoint) else {
            return DispatchOutcome::Dropped;
        };

        let message = Self::vote_message_bytes(&payload.outpoint, payload.vote);
        if verify_signature(&record.operator_pubkey, &message, &payload.signature).is_err() {
            self.misbehavior
                .report(&peer_addr_of(&record.endpoint), MISBEHAVIOR_BAD_SIGNATURE);
            return DispatchOutcome::Dropped;
        }

        // Replaces any prior accepted vote for this outpoint; throttled to
        // at most one acceptance per `MinVoteInterval`.
        if !self.registry.record_vote(&payload.outpoint, payload.vote, now) {
            return DispatchOutcome::Dropped;
        }

        DispatchOutcome::AcceptedRelay
    }

    /// `None` = "sync everything" (throttled per-peer); `Some(outpoint)` =
    /// a specific-record request (not throttled at this layer — callers
    /// that want per-outpoint throttling use `Registry::ask_for_entry`
    /// symmetrically on their own side).
    pub fn handle_directory_sync(
        &self,
        peer: &PeerAddr,
        requested: Option<&Outpoint>,
        now: Timestamp,
    ) -> Vec<P2pMessage> {
        if requested.is_none() {
            if !peer.0.is_loopback() && !self.registry_announce_sync_to(peer, now) {
                self.misbehavior
                    .report(peer, MISBEHAVIOR_DSEG_QUOTA_VIOLATION);
                return Vec::new();
            }
        }

        let snapshot = self.registry.snapshot();
        snapshot
            .iter()
            .filter(|r| r.state == CovenantState::Enabled)
            .filter(|r| r.endpoint.is_routable())
            .filter(|r| requested.map(|op| op == &r.collateral).unwrap_or(true))
            .map(|r| self.record_to_announce_message(r))
            .collect()
    }

    fn registry_announce_sync_to(&self, peer: &PeerAddr, now: Timestamp) -> bool {
        self.registry.announce_sync_to(peer, now)
    }

    fn record_to_announce_message(&self, record: &CovenantRecord) -> P2pMessage {
        let base = AnnouncePayload {
            outpoint: record.collateral.clone(),
            endpoint: record.endpoint.clone(),
            signature: record.announce_signature.clone(),
            announce_time: record.announce_time,
            collateral_pubkey: record.collateral_pubkey.clone(),
            operator_pubkey: record.operator_pubkey.clone(),
            count: -1,
            current: 0,
            last_updated: record.last_seen,
            protocol_version: record.protocol_version as i32,
        };
        if record.legacy_flag {
            P2pMessage::AnnounceLegacy(base)
        } else {
            P2pMessage::AnnounceRewarded(AnnounceRewardedPayload {
                base,
                reward_script: record.reward_script.clone().unwrap_or_default(),
                reward_percentage: record.reward_percentage as i32,
            })
        }
    }
}

fn peer_addr_of(endpoint: &covenant_core::types::Endpoint) -> PeerAddr {
    PeerAddr(endpoint.ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_chain::InMemoryChainView;
    use covenant_core::constants::MIN_VOTE_INTERVAL_SECS;
    use covenant_core::types::{Endpoint, TxId};
    use covenant_crypto::NodeKeyPair;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex as StdMutex;

    /// Captures every reported penalty instead of acting on it, so tests can
    /// assert both the outcome and the misbehavior weight.
    #[derive(Default)]
    struct CapturingSink {
        reports: StdMutex<Vec<(PeerAddr, u32)>>,
    }

    impl MisbehaviorSink for CapturingSink {
        fn report(&self, peer: &PeerAddr, weight: u32) {
            self.reports.lock().unwrap().push((peer.clone(), weight));
        }
    }

    const NOW: Timestamp = 1_700_000_000;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)), port)
    }

    fn outpoint(vout: u32) -> Outpoint {
        Outpoint::new(TxId::from_bytes([vout as u8; 32]), vout)
    }

    fn harness(
        chain: Arc<InMemoryChainView>,
    ) -> (Arc<Registry>, Arc<CapturingSink>, MessageDispatcher) {
        let registry = Arc::new(Registry::new());
        let sink = Arc::new(CapturingSink::default());
        let dispatcher = MessageDispatcher::new(
            registry.clone(),
            chain,
            sink.clone(),
            Arc::new(NoLocalIdentity),
            70_015,
        );
        (registry, sink, dispatcher)
    }

    fn signed_announce(
        collateral_kp: &NodeKeyPair,
        operator_kp: &NodeKeyPair,
        op: Outpoint,
        ep: Endpoint,
        announce_time: i64,
    ) -> AnnouncePayload {
        let message = MessageDispatcher::announce_message_bytes(
            &ep,
            announce_time,
            &operator_kp.public_key,
            &collateral_kp.public_key,
            70_015,
            None,
        );
        AnnouncePayload {
            outpoint: op,
            endpoint: ep,
            signature: collateral_kp.sign(&message),
            announce_time,
            collateral_pubkey: collateral_kp.public_key.clone(),
            operator_pubkey: operator_kp.public_key.clone(),
            count: 1,
            current: 0,
            last_updated: announce_time,
            protocol_version: 70_015,
        }
    }

    // S1: a fresh, validly signed Announce backed by confirmed collateral is
    // admitted and inserted into the registry.
    #[test]
    fn fresh_announce_is_admitted() {
        let chain = Arc::new(InMemoryChainView::new());
        let op = outpoint(1);
        chain.set_utxo(op.clone(), COLLATERAL_VALUE, MIN_CONFIRMATIONS, 100);
        chain.set_block(100 + MIN_CONFIRMATIONS as u64 - 1, NOW - 1_000, "deadbeef");

        let (registry, sink, dispatcher) = harness(chain);
        let collateral_kp = NodeKeyPair::generate();
        let operator_kp = NodeKeyPair::generate();
        let payload = signed_announce(&collateral_kp, &operator_kp, op.clone(), endpoint(9999), NOW - 10);

        let outcome = dispatcher.handle_announce_legacy(&payload, NOW);

        assert_eq!(outcome, DispatchOutcome::AcceptedRelay);
        assert!(registry.find_by_collateral(&op).is_some());
        assert!(sink.reports.lock().unwrap().is_empty());
    }

    // S2: a heartbeat whose sigtime falls outside the allowed slop window is
    // dropped and never touches the record.
    #[test]
    fn stale_heartbeat_is_rejected() {
        let chain = Arc::new(InMemoryChainView::new());
        let op = outpoint(2);
        chain.set_utxo(op.clone(), COLLATERAL_VALUE, MIN_CONFIRMATIONS, 100);
        chain.set_block(100 + MIN_CONFIRMATIONS as u64 - 1, NOW - 1_000, "deadbeef");

        let (registry, _sink, dispatcher) = harness(chain);
        let collateral_kp = NodeKeyPair::generate();
        let operator_kp = NodeKeyPair::generate();
        let payload = signed_announce(&collateral_kp, &operator_kp, op.clone(), endpoint(9999), NOW - 10);
        dispatcher.handle_announce_legacy(&payload, NOW);
        let before = registry.find_by_collateral(&op).unwrap();

        let stale_heartbeat = HeartbeatPayload {
            outpoint: op.clone(),
            signature: operator_kp.sign(b"irrelevant, rejected before verification"),
            sigtime: NOW - HEARTBEAT_TIME_SLOP_SECS - 1,
            stop: false,
        };
        let outcome = dispatcher.handle_heartbeat(&stale_heartbeat, NOW);

        assert_eq!(outcome, DispatchOutcome::Dropped);
        let after = registry.find_by_collateral(&op).unwrap();
        assert_eq!(after.last_heartbeat, before.last_heartbeat);
    }

    // S3: a heartbeat signed with the wrong operator key is dropped and
    // reported as a bad-signature misbehavior.
    #[test]
    fn heartbeat_with_wrong_key_is_rejected_and_reported() {
        let chain = Arc::new(InMemoryChainView::new());
        let op = outpoint(3);
        chain.set_utxo(op.clone(), COLLATERAL_VALUE, MIN_CONFIRMATIONS, 100);
        chain.set_block(100 + MIN_CONFIRMATIONS as u64 - 1, NOW - 1_000, "deadbeef");

        let (registry, sink, dispatcher) = harness(chain);
        let collateral_kp = NodeKeyPair::generate();
        let operator_kp = NodeKeyPair::generate();
        let impostor_kp = NodeKeyPair::generate();
        let payload = signed_announce(&collateral_kp, &operator_kp, op.clone(), endpoint(9999), NOW - 10);
        dispatcher.handle_announce_legacy(&payload, NOW);
        let before = registry.find_by_collateral(&op).unwrap();

        let message = MessageDispatcher::heartbeat_message_bytes(&before.endpoint, NOW, false);
        let forged = HeartbeatPayload {
            outpoint: op.clone(),
            signature: impostor_kp.sign(&message),
            sigtime: NOW,
            stop: false,
        };
        let outcome = dispatcher.handle_heartbeat(&forged, NOW);

        assert_eq!(outcome, DispatchOutcome::Dropped);
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, MISBEHAVIOR_BAD_SIGNATURE);
    }

    // S4: a second non-loopback DirectorySync(None) within the cooldown
    // window is refused and reported as a quota violation (weight 34).
    #[test]
    fn repeat_directory_sync_violates_quota() {
        let chain = Arc::new(InMemoryChainView::new());
        let (_registry, sink, dispatcher) = harness(chain);
        let peer = PeerAddr(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)));

        let first = dispatcher.handle_directory_sync(&peer, None, NOW);
        assert!(sink.reports.lock().unwrap().is_empty());
        let _ = first;

        let second = dispatcher.handle_directory_sync(&peer, None, NOW + 10);
        assert!(second.is_empty());

        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0], (peer, MISBEHAVIOR_DSEG_QUOTA_VIOLATION));
    }

    // S5: the signature over a rewarded Announce covers the reward fields —
    // mutating reward_percentage after signing must invalidate it.
    #[test]
    fn rewarded_announce_signature_covers_reward_fields() {
        let chain = Arc::new(InMemoryChainView::new());
        let op = outpoint(4);
        chain.set_utxo(op.clone(), COLLATERAL_VALUE, MIN_CONFIRMATIONS, 100);
        chain.set_block(100 + MIN_CONFIRMATIONS as u64 - 1, NOW - 1_000, "deadbeef");

        let (_registry, sink, dispatcher) = harness(chain);
        let collateral_kp = NodeKeyPair::generate();
        let operator_kp = NodeKeyPair::generate();
        let base = signed_announce_rewarded(
            &collateral_kp,
            &operator_kp,
            op.clone(),
            endpoint(9999),
            NOW - 10,
            &[1, 2, 3],
            25,
        );
        let mut tampered = base;
        tampered.reward_percentage = 90;

        let outcome = dispatcher.handle_announce_rewarded(&tampered, NOW);

        assert_eq!(outcome, DispatchOutcome::Dropped);
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1, MISBEHAVIOR_BAD_SIGNATURE);
    }

    // S6: an Announce update is admitted only when it proves ownership of
    // the same collateral key as the existing record.
    #[test]
    fn announce_update_with_mismatched_collateral_key_is_dropped() {
        let chain = Arc::new(InMemoryChainView::new());
        let op = outpoint(5);
        chain.set_utxo(op.clone(), COLLATERAL_VALUE, MIN_CONFIRMATIONS, 100);
        chain.set_block(100 + MIN_CONFIRMATIONS as u64 - 1, NOW - 1_000, "deadbeef");

        let (registry, _sink, dispatcher) = harness(chain);
        let collateral_kp = NodeKeyPair::generate();
        let operator_kp = NodeKeyPair::generate();
        let first = signed_announce(&collateral_kp, &operator_kp, op.clone(), endpoint(9999), NOW - 10_000);
        dispatcher.handle_announce_legacy(&first, NOW - 10_000);

        let impostor_collateral_kp = NodeKeyPair::generate();
        let mut update = signed_announce(
            &impostor_collateral_kp,
            &operator_kp,
            op.clone(),
            endpoint(10000),
            NOW,
        );
        update.count = -1;

        let outcome = dispatcher.handle_announce_legacy(&update, NOW);

        assert_eq!(outcome, DispatchOutcome::Dropped);
        let record = registry.find_by_collateral(&op).unwrap();
        assert_eq!(record.endpoint.port, 9999);
    }

    // S7: a non-relay Announce (count != -1) for an already-registered
    // collateral is dropped outright, never applied as an update.
    #[test]
    fn non_relay_announce_for_existing_collateral_is_dropped() {
        let chain = Arc::new(InMemoryChainView::new());
        let op = outpoint(6);
        chain.set_utxo(op.clone(), COLLATERAL_VALUE, MIN_CONFIRMATIONS, 100);
        chain.set_block(100 + MIN_CONFIRMATIONS as u64 - 1, NOW - 1_000, "deadbeef");

        let (registry, _sink, dispatcher) = harness(chain);
        let collateral_kp = NodeKeyPair::generate();
        let operator_kp = NodeKeyPair::generate();
        let first = signed_announce(&collateral_kp, &operator_kp, op.clone(), endpoint(9999), NOW - 10_000);
        dispatcher.handle_announce_legacy(&first, NOW - 10_000);

        let mut second = signed_announce(&collateral_kp, &operator_kp, op.clone(), endpoint(10000), NOW);
        second.count = 3;

        let outcome = dispatcher.handle_announce_legacy(&second, NOW);

        assert_eq!(outcome, DispatchOutcome::Dropped);
        let record = registry.find_by_collateral(&op).unwrap();
        assert_eq!(record.endpoint.port, 9999);
    }

    // S8: an accepted vote is persisted and replaces any prior vote; a
    // repeat within MinVoteInterval is throttled.
    #[test]
    fn vote_is_persisted_and_replaces_prior() {
        let chain = Arc::new(InMemoryChainView::new());
        let op = outpoint(7);
        chain.set_utxo(op.clone(), COLLATERAL_VALUE, MIN_CONFIRMATIONS, 100);
        chain.set_block(100 + MIN_CONFIRMATIONS as u64 - 1, NOW - 1_000, "deadbeef");

        let (registry, _sink, dispatcher) = harness(chain);
        let collateral_kp = NodeKeyPair::generate();
        let operator_kp = NodeKeyPair::generate();
        let announce = signed_announce(&collateral_kp, &operator_kp, op.clone(), endpoint(9999), NOW - 10_000);
        dispatcher.handle_announce_legacy(&announce, NOW - 10_000);

        let message = MessageDispatcher::vote_message_bytes(&op, 1);
        let vote = VotePayload {
            outpoint: op.clone(),
            signature: operator_kp.sign(&message),
            vote: 1,
        };
        let outcome = dispatcher.handle_vote(&vote, NOW);
        assert_eq!(outcome, DispatchOutcome::AcceptedRelay);
        assert_eq!(registry.last_vote(&op), Some((1, NOW)));

        let message = MessageDispatcher::vote_message_bytes(&op, -1);
        let repeat = VotePayload {
            outpoint: op.clone(),
            signature: operator_kp.sign(&message),
            vote: -1,
        };
        let outcome = dispatcher.handle_vote(&repeat, NOW + 10);
        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert_eq!(registry.last_vote(&op), Some((1, NOW)));

        let outcome = dispatcher.handle_vote(&repeat, NOW + MIN_VOTE_INTERVAL_SECS);
        assert_eq!(outcome, DispatchOutcome::AcceptedRelay);
        assert_eq!(registry.last_vote(&op), Some((-1, NOW + MIN_VOTE_INTERVAL_SECS)));
    }

    #[allow(clippy::too_many_arguments)]
    fn signed_announce_rewarded(
        collateral_kp: &NodeKeyPair,
        operator_kp: &NodeKeyPair,
        op: Outpoint,
        ep: Endpoint,
        announce_time: i64,
        reward_script: &[u8],
        reward_percentage: i32,
    ) -> AnnounceRewardedPayload {
        let message = MessageDispatcher::announce_message_bytes(
            &ep,
            announce_time,
            &operator_kp.public_key,
            &collateral_kp.public_key,
            70_015,
            Some((reward_script, reward_percentage)),
        );
        let base = AnnouncePayload {
            outpoint: op,
            endpoint: ep,
            signature: collateral_kp.sign(&message),
            announce_time,
            collateral_pubkey: collateral_kp.public_key.clone(),
            operator_pubkey: operator_kp.public_key.clone(),
            count: 1,
            current: 0,
            last_updated: announce_time,
            protocol_version: 70_015,
        };
        AnnounceRewardedPayload {
            base,
            reward_script: reward_script.to_vec(),
            reward_percentage,
        }
    }
}
