use covenant_core::types::Outpoint;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The chain collaborator's contract: everything the registry and dispatcher
/// need to know about the rest of the node (block validation, the UTXO set,
/// mempool acceptability) without owning any of it.
pub trait ChainView: Send + Sync {
    /// Current best block height.
    fn best_height(&self) -> u64;

    /// Unix timestamp of the block at `height`, if known.
    fn block_time(&self, height: u64) -> Option<i64>;

    /// Hex-encoded hash of the block at `height`, if known.
    fn block_hash(&self, height: u64) -> Option<String>;

    /// Value (in the chain's smallest unit) and confirmation count of the
    /// UTXO at `outpoint`, if it exists and is unspent. Returns `None` for
    /// unknown or already-spent outpoints — the dispatcher treats this as
    /// "collateral proof unavailable", never as an error.
    fn utxo_value(&self, outpoint: &Outpoint) -> Option<(u64, u32)>;

    /// Height the collateral UTXO was confirmed at, if known. Used to check
    /// an Announce's `announce_time` against the input's confirmation block.
    fn utxo_confirmed_height(&self, outpoint: &Outpoint) -> Option<u64>;

    /// Current proof-of-work difficulty, for RPC display (`getdifficulty`,
    /// `getmininginfo`). Not consulted by any validation path.
    fn difficulty(&self) -> f64;
}

/// A test/collaborator double backing `ChainView` with in-memory state.
/// Not used in production — a real node wires this trait to its storage
/// engine and mempool instead.
#[derive(Default)]
pub struct InMemoryChainView {
    inner: Mutex<InMemoryChainState>,
}

#[derive(Default)]
struct InMemoryChainState {
    best_height: u64,
    block_times: HashMap<u64, i64>,
    block_hashes: HashMap<u64, String>,
    utxos: HashMap<Outpoint, (u64, u32, u64 /* confirmed_height */)>,
    difficulty: f64,
}

impl InMemoryChainView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_best_height(&self, height: u64) {
        self.inner.lock().best_height = height;
    }

    pub fn set_block(&self, height: u64, time: i64, hash: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.block_times.insert(height, time);
        inner.block_hashes.insert(height, hash.into());
    }

    pub fn set_utxo(&self, outpoint: Outpoint, value: u64, confirmations: u32, confirmed_height: u64) {
        self.inner
            .lock()
            .utxos
            .insert(outpoint, (value, confirmations, confirmed_height));
    }

    pub fn remove_utxo(&self, outpoint: &Outpoint) {
        self.inner.lock().utxos.remove(outpoint);
    }

    pub fn set_difficulty(&self, difficulty: f64) {
        self.inner.lock().difficulty = difficulty;
    }
}

impl ChainView for InMemoryChainView {
    fn best_height(&self) -> u64 {
        self.inner.lock().best_height
    }

    fn block_time(&self, height: u64) -> Option<i64> {
        self.inner.lock().block_times.get(&height).copied()
    }

    fn block_hash(&self, height: u64) -> Option<String> {
        self.inner.lock().block_hashes.get(&height).cloned()
    }

    fn utxo_value(&self, outpoint: &Outpoint) -> Option<(u64, u32)> {
        self.inner
            .lock()
            .utxos
            .get(outpoint)
            .map(|(v, c, _)| (*v, *c))
    }

    fn utxo_confirmed_height(&self, outpoint: &Outpoint) -> Option<u64> {
        self.inner.lock().utxos.get(outpoint).map(|(_, _, h)| *h)
    }

    fn difficulty(&self) -> f64 {
        self.inner.lock().difficulty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::types::TxId;

    #[test]
    fn reports_set_utxo() {
        let view = InMemoryChainView::new();
        let op = Outpoint::new(TxId::from_bytes([1u8; 32]), 0);
        view.set_utxo(op.clone(), 1_000_000_000_000, 20, 100);
        assert_eq!(view.utxo_value(&op), Some((1_000_000_000_000, 20)));
        assert_eq!(view.utxo_confirmed_height(&op), Some(100));
    }

    #[test]
    fn unknown_utxo_is_none() {
        let view = InMemoryChainView::new();
        let op = Outpoint::new(TxId::from_bytes([2u8; 32]), 0);
        assert_eq!(view.utxo_value(&op), None);
    }
}
