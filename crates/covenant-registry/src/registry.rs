use covenant_core::constants::{
    ASK_FOR_ENTRY_COOLDOWN_SECS, DSEG_COOLDOWN_SECS, HEARTBEAT_EXPIRY_SECS, MIN_CONFIRMATIONS,
    MIN_VOTE_INTERVAL_SECS,
};
use covenant_core::error::CovenantError;
use covenant_core::types::{AskTables, CovenantRecord, CovenantState, Outpoint, PeerAddr, Timestamp};
use parking_lot::Mutex;
use std::collections::HashMap;

/// The record table + the three ask tables, under one lock. This mirrors the
/// original's single `cs_masternodes` critical section guarding both the
/// record vector and the throttle maps together.
struct RegistryInner {
    records: HashMap<Outpoint, CovenantRecord>,
    ask_tables: AskTables,
    /// Last accepted vote per collateral outpoint: `(vote, accepted_at)`.
    /// A new vote replaces the prior one; throttled to at most one
    /// acceptance per `MinVoteInterval`.
    votes: HashMap<Outpoint, (i32, Timestamp)>,
}

pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                records: HashMap::new(),
                ask_tables: AskTables::new(),
                votes: HashMap::new(),
            }),
        }
    }

    /// Insert-if-absent. Returns an error if the collateral outpoint is
    /// already registered — callers that mean to update an existing record
    /// go through the dispatcher's update-branch logic instead, which calls
    /// `update` directly.
    pub fn add(&self, record: CovenantRecord) -> Result<(), CovenantError> {
        let mut inner = self.inner.lock();
        if inner.records.contains_key(&record.collateral) {
            return Err(CovenantError::DuplicateCollateral(
                record.collateral.to_string(),
            ));
        }
        inner.records.insert(record.collateral.clone(), record);
        Ok(())
    }

    /// Overwrite an existing record in place (the Announce update branch).
    pub fn update(&self, record: CovenantRecord) -> Result<(), CovenantError> {
        let mut inner = self.inner.lock();
        if !inner.records.contains_key(&record.collateral) {
            return Err(CovenantError::UnknownRecord(record.collateral.to_string()));
        }
        inner.records.insert(record.collateral.clone(), record);
        Ok(())
    }

    pub fn find_by_collateral(&self, collateral: &Outpoint) -> Option<CovenantRecord> {
        self.inner.lock().records.get(collateral).cloned()
    }

    pub fn find_by_operator_key(&self, operator_pubkey: &[u8]) -> Option<CovenantRecord> {
        self.inner
            .lock()
            .records
            .values()
            .find(|r| r.operator_pubkey.0 == operator_pubkey)
            .cloned()
    }

    /// The record with the greatest `now - last_paid`, excluding the given
    /// set and any record below `min_age_secs` of collateral input age.
    pub fn find_oldest_unpaid(
        &self,
        excluding: &[Outpoint],
        min_age_secs: i64,
        now: Timestamp,
    ) -> Option<CovenantRecord> {
        let inner = self.inner.lock();
        inner
            .records
            .values()
            .filter(|r| !excluding.contains(&r.collateral))
            .filter(|r| r.state == CovenantState::Enabled)
            .filter(|r| now - r.announce_time >= min_age_secs)
            .max_by_key(|r| (r.seconds_since_payment(now), std::cmp::Reverse(r.collateral.clone())))
            .cloned()
    }

    /// Uniform sample over eligible entries. Takes the RNG as a parameter
    /// rather than reaching for an ambient singleton (spec §9: no ambient
    /// singletons) — callers that need determinism in tests pass a seeded
    /// `rand::rngs::StdRng`.
    pub fn find_random<R: rand::Rng + ?Sized>(
        &self,
        excluding: &[Outpoint],
        min_protocol: u32,
        rng: &mut R,
    ) -> Option<CovenantRecord> {
        let inner = self.inner.lock();
        let candidates: Vec<&CovenantRecord> = inner
            .records
            .values()
            .filter(|r| !excluding.contains(&r.collateral))
            .filter(|r| r.is_enabled(min_protocol))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }

    pub fn count_enabled(&self, min_protocol: u32) -> usize {
        self.inner
            .lock()
            .records
            .values()
            .filter(|r| r.is_enabled(min_protocol))
            .count()
    }

    pub fn remove(&self, collateral: &Outpoint) -> Option<CovenantRecord> {
        self.inner.lock().records.remove(collateral)
    }

    /// A deep-copy snapshot of all records, for the selection engine and for
    /// persistence — never hand out the lock itself.
    pub fn snapshot(&self) -> Vec<CovenantRecord> {
        self.inner.lock().records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the record table wholesale — used when loading a snapshot.
    pub fn load_records(&self, records: Vec<CovenantRecord>) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        for r in records {
            inner.records.insert(r.collateral.clone(), r);
        }
    }

    /// Throttled ask: only issue an `ask_for_entry` for `outpoint` if we
    /// haven't already within `ASK_FOR_ENTRY_COOLDOWN_SECS`. Returns `true`
    /// if the caller should actually send the request.
    pub fn ask_for_entry(&self, outpoint: &Outpoint, now: Timestamp) -> bool {
        let mut inner = self.inner.lock();
        let should_ask = match inner.ask_tables.we_asked_for_entry.get(outpoint) {
            Some(last) => now - *last >= ASK_FOR_ENTRY_COOLDOWN_SECS,
            None => true,
        };
        if should_ask {
            inner
                .ask_tables
                .we_asked_for_entry
                .insert(outpoint.clone(), now);
        }
        should_ask
    }

    /// Throttled directory sync: records that `peer` asked us for a full
    /// sync, returning `false` (violation) if `peer` asked again within
    /// `DSEG_COOLDOWN_SECS`.
    pub fn announce_sync_to(&self, peer: &PeerAddr, now: Timestamp) -> bool {
        let mut inner = self.inner.lock();
        let allowed = match inner.ask_tables.peers_who_asked_us.get(peer) {
            Some(last) => now - *last >= DSEG_COOLDOWN_SECS,
            None => true,
        };
        if allowed {
            inner
                .ask_tables
                .peers_who_asked_us
                .insert(peer.clone(), now);
        }
        allowed
    }

    /// Records that we issued a `DirectorySync` to `peer` (cold-start or
    /// periodic resync). Used only for bookkeeping; does not gate anything.
    pub fn record_we_asked_peer(&self, peer: &PeerAddr, now: Timestamp) {
        self.inner.lock().ask_tables.peers_we_asked.insert(peer.clone(), now);
    }

    /// Accept `vote` for `outpoint`, replacing any prior vote, unless the
    /// last accepted vote for this outpoint was within `MinVoteInterval`.
    /// Returns `true` if the vote was accepted and stored.
    pub fn record_vote(&self, outpoint: &Outpoint, vote: i32, now: Timestamp) -> bool {
        let mut inner = self.inner.lock();
        if let Some((_, last_accepted)) = inner.votes.get(outpoint) {
            if now - *last_accepted < MIN_VOTE_INTERVAL_SECS {
                return false;
            }
        }
        inner.votes.insert(outpoint.clone(), (vote, now));
        true
    }

    /// The last accepted `(vote, accepted_at)` for `outpoint`, if any.
    pub fn last_vote(&self, outpoint: &Outpoint) -> Option<(i32, Timestamp)> {
        self.inner.lock().votes.get(outpoint).copied()
    }

    /// Sweep pass: expire stale heartbeats, erase terminal-state records,
    /// erase records below the minimum protocol version, and lazily expire
    /// throttle-table entries. Ordered to match `CheckAndRemove`.
    pub fn sweep(&self, now: Timestamp, min_protocol: u32) {
        let mut inner = self.inner.lock();

        for record in inner.records.values_mut() {
            if record.state == CovenantState::Enabled
                && now - record.last_heartbeat > HEARTBEAT_EXPIRY_SECS
            {
                record.state = CovenantState::Expired;
            }
        }

        let before = inner.records.len();
        inner.records.retain(|_, r| {
            !r.state.is_erasable() && r.protocol_version >= min_protocol
        });
        let removed = before - inner.records.len();
        if removed > 0 {
            tracing::debug!(removed, "swept stale covenant records");
        }

        inner.ask_tables.expire(now, DSEG_COOLDOWN_SECS, ASK_FOR_ENTRY_COOLDOWN_SECS);
        let records = &inner.records;
        inner.votes.retain(|op, _| records.contains_key(op));
    }

    /// Collateral-proof sweep: drop records whose collateral UTXO the chain
    /// collaborator reports as spent. Kept separate from `sweep` because it
    /// requires a chain lookup per record, unlike the pure timestamp passes.
    pub fn sweep_spent_collateral<F>(&self, is_spent: F)
    where
        F: Fn(&Outpoint) -> bool,
    {
        let mut inner = self.inner.lock();
        for record in inner.records.values_mut() {
            if is_spent(&record.collateral) {
                record.state = CovenantState::CollateralSpent;
            }
        }
        inner.records.retain(|_, r| !r.state.is_erasable());
    }

    pub fn min_confirmations_ok(chain_confirmations: u32) -> bool {
        chain_confirmations >= MIN_CONFIRMATIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::types::{DilithiumPublicKey, DilithiumSignature, Endpoint, TxId};
    use std::net::{IpAddr, Ipv4Addr};

    fn make_record(vout: u32, state: CovenantState) -> CovenantRecord {
        CovenantRecord {
            collateral: Outpoint::new(TxId::from_bytes([vout as u8; 32]), vout),
            endpoint: Endpoint::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9999),
            operator_pubkey: DilithiumPublicKey(vec![1, 2, 3]),
            collateral_pubkey: DilithiumPublicKey(vec![4, 5, 6]),
            announce_signature: DilithiumSignature(vec![7, 8, 9]),
            announce_time: 1_600_000_000,
            last_seen: 1_600_000_000,
            last_heartbeat: 1_600_000_000,
            last_paid: 1_600_000_000,
            protocol_version: 70_015,
            reward_script: None,
            reward_percentage: 0,
            state,
            port_open: true,
            legacy_flag: false,
        }
    }

    #[test]
    fn add_rejects_duplicate_collateral() {
        let reg = Registry::new();
        reg.add(make_record(1, CovenantState::Enabled)).unwrap();
        let err = reg.add(make_record(1, CovenantState::Enabled)).unwrap_err();
        assert!(matches!(err, CovenantError::DuplicateCollateral(_)));
    }

    #[test]
    fn sweep_erases_removed_and_spent() {
        let reg = Registry::new();
        reg.add(make_record(1, CovenantState::Removed)).unwrap();
        reg.add(make_record(2, CovenantState::Enabled)).unwrap();
        reg.sweep(1_600_000_100, 70_015);
        assert_eq!(reg.len(), 1);
        assert!(reg.find_by_collateral(&Outpoint::new(TxId::from_bytes([2u8; 32]), 2)).is_some());
    }

    #[test]
    fn sweep_expires_stale_heartbeat() {
        let reg = Registry::new();
        reg.add(make_record(1, CovenantState::Enabled)).unwrap();
        reg.sweep(1_600_000_000 + HEARTBEAT_EXPIRY_SECS + 1, 70_015);
        let rec = reg
            .find_by_collateral(&Outpoint::new(TxId::from_bytes([1u8; 32]), 1))
            .unwrap();
        assert_eq!(rec.state, CovenantState::Expired);
    }

    #[test]
    fn ask_for_entry_throttles() {
        let reg = Registry::new();
        let op = Outpoint::new(TxId::from_bytes([9u8; 32]), 0);
        assert!(reg.ask_for_entry(&op, 1000));
        assert!(!reg.ask_for_entry(&op, 1030));
        assert!(reg.ask_for_entry(&op, 1000 + ASK_FOR_ENTRY_COOLDOWN_SECS));
    }

    #[test]
    fn directory_sync_quota_rejects_repeat() {
        let reg = Registry::new();
        let peer = PeerAddr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(reg.announce_sync_to(&peer, 1000));
        assert!(!reg.announce_sync_to(&peer, 1000 + 10));
    }

    #[test]
    fn find_random_only_returns_eligible_entries() {
        use rand::SeedableRng;

        let reg = Registry::new();
        reg.add(make_record(1, CovenantState::Enabled)).unwrap();
        reg.add(make_record(2, CovenantState::Removed)).unwrap();
        let excluded = Outpoint::new(TxId::from_bytes([1u8; 32]), 1);

        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        assert!(reg.find_random(&[excluded], 70_015, &mut rng).is_none());

        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let picked = reg.find_random(&[], 70_015, &mut rng).unwrap();
        assert_eq!(picked.collateral, Outpoint::new(TxId::from_bytes([1u8; 32]), 1));
    }

    #[test]
    fn find_random_samples_across_the_full_candidate_set() {
        use rand::SeedableRng;
        use std::collections::HashSet;

        let reg = Registry::new();
        for i in 1..=20u32 {
            reg.add(make_record(i, CovenantState::Enabled)).unwrap();
        }

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let picked = reg.find_random(&[], 70_015, &mut rng).unwrap();
            seen.insert(picked.collateral);
        }
        assert!(seen.len() > 1, "expected more than one distinct pick across 200 draws");
    }

    #[test]
    fn record_vote_replaces_prior_and_throttles() {
        let reg = Registry::new();
        let op = Outpoint::new(TxId::from_bytes([5u8; 32]), 0);
        assert!(reg.record_vote(&op, 1, 1000));
        assert_eq!(reg.last_vote(&op), Some((1, 1000)));

        assert!(!reg.record_vote(&op, -1, 1030));
        assert_eq!(reg.last_vote(&op), Some((1, 1000)));

        assert!(reg.record_vote(&op, -1, 1000 + MIN_VOTE_INTERVAL_SECS));
        assert_eq!(reg.last_vote(&op), Some((-1, 1000 + MIN_VOTE_INTERVAL_SECS)));
    }
}
