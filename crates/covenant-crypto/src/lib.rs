pub mod dilithium;
pub mod hash;
pub mod keypair;

pub use dilithium::{sign, verify_signature, CovenantSigner, SignatureError};
pub use hash::{blake3_hash, canonical_message, score_hash, snapshot_hash};
pub use keypair::NodeKeyPair;
