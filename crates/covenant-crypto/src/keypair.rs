use covenant_core::types::DilithiumPublicKey;
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use zeroize::{Zeroize, Zeroizing};

/// A Dilithium2 keypair used for a covenant node's operator or collateral
/// identity. The secret key is held in zeroizing memory and wiped on drop.
pub struct NodeKeyPair {
    pub public_key: DilithiumPublicKey,
    secret_key: Vec<u8>,
}

impl NodeKeyPair {
    /// Generate a fresh Dilithium2 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        Self {
            public_key: DilithiumPublicKey(pk.as_bytes().to_vec()),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    /// Restore a keypair from raw bytes, e.g. loaded from `operator_private_key`.
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        Self {
            public_key: DilithiumPublicKey(pk_bytes),
            secret_key: sk_bytes,
        }
    }

    pub fn sign(&self, message: &[u8]) -> covenant_core::types::DilithiumSignature {
        let sk = Zeroizing::new(self.secret_key.clone());
        crate::dilithium::sign(&sk, message).expect("sign with valid secret key is infallible")
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for NodeKeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeKeyPair {{ public_key: {:?} }}", self.public_key)
    }
}
