use covenant_core::types::{CovenantRecord, CovenantState, Outpoint};
use covenant_crypto::score_hash;

/// The payee selection engine. Operates purely on a deep-copy snapshot of
/// the registry — it never holds the registry lock while scoring.
pub struct SelectionEngine;

impl SelectionEngine {
    /// Elect the payee for `block_height`: the Enabled, protocol-eligible
    /// record with the greatest score, ties broken by lexicographic
    /// collateral-outpoint order. Returns `None` if no eligible record
    /// exists. This tiebreak is the authoritative rule; see DESIGN.md for
    /// why it intentionally differs from the original's iteration-order
    /// behavior.
    pub fn elect_payee(
        snapshot: &[CovenantRecord],
        modulus: u64,
        block_height: u64,
        min_protocol: u32,
    ) -> Option<Outpoint> {
        snapshot
            .iter()
            .filter(|r| r.is_enabled(min_protocol))
            .map(|r| (score_hash(&r.collateral, modulus, block_height), r))
            .max_by(|(score_a, rec_a), (score_b, rec_b)| {
                score_a
                    .cmp(score_b)
                    .then_with(|| rec_a.collateral.cmp(&rec_b.collateral))
            })
            .map(|(_, r)| r.collateral.clone())
    }

    /// 1-based rank of `collateral` among Enabled (or all, if
    /// `only_active` is false) protocol-eligible records, descending by
    /// score. `None` if `collateral` is not present among the scored set.
    pub fn rank(
        snapshot: &[CovenantRecord],
        collateral: &Outpoint,
        block_height: u64,
        min_protocol: u32,
        only_active: bool,
    ) -> Option<usize> {
        let ordered = Self::ordered_scores(snapshot, block_height, min_protocol, only_active);
        ordered
            .iter()
            .position(|(_, op)| op == collateral)
            .map(|idx| idx + 1)
    }

    /// The record at 1-based rank `n` in the same ordering `rank` uses.
    pub fn by_rank(
        snapshot: &[CovenantRecord],
        n: usize,
        block_height: u64,
        min_protocol: u32,
        only_active: bool,
    ) -> Option<Outpoint> {
        if n == 0 {
            return None;
        }
        let ordered = Self::ordered_scores(snapshot, block_height, min_protocol, only_active);
        ordered.get(n - 1).map(|(_, op)| op.clone())
    }

    fn ordered_scores(
        snapshot: &[CovenantRecord],
        block_height: u64,
        min_protocol: u32,
        only_active: bool,
    ) -> Vec<(u32, Outpoint)> {
        // `modulus` for rank/by_rank purposes is derived from block_height
        // itself (the caller-supplied chain modulus is only meaningful for
        // elect_payee's per-block randomness; ranking uses a stable,
        // height-only score so a rank table is reproducible independent of
        // the modulus source).
        let modulus = block_height;
        let mut scored: Vec<(u32, Outpoint)> = snapshot
            .iter()
            .filter(|r| if only_active { r.state == CovenantState::Enabled } else { true })
            .filter(|r| r.protocol_version >= min_protocol)
            .map(|r| (score_hash(&r.collateral, modulus, block_height), r.collateral.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored
    }
}
