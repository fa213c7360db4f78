//! covenant-chain
//!
//! The collaborator seam onto the rest of a full node: block height, block
//! time and UTXO lookups. Block validation, reorg handling and storage are
//! out of scope for this core (spec Non-goals) — `ChainView` is the only
//! contract the registry and dispatcher need from that larger system.

pub mod view;

pub use view::{ChainView, InMemoryChainView};
