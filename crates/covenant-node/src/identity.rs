use covenant_core::types::DilithiumPublicKey;
use covenant_crypto::NodeKeyPair;
use covenant_p2p::LocalIdentity;

/// The node's own operator identity, if `operator_private_key` was
/// configured. Encoded as hex(bincode(pubkey_bytes, secret_bytes)) — the
/// concrete encoding is a collaborator detail (DESIGN.md), not part of the
/// wire protocol.
pub struct ConfiguredIdentity {
    keypair: Option<NodeKeyPair>,
}

impl ConfiguredIdentity {
    pub fn from_hex(hex_str: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(hex_str.trim())?;
        let (pk, sk): (Vec<u8>, Vec<u8>) = bincode::deserialize(&bytes)?;
        Ok(Self {
            keypair: Some(NodeKeyPair::from_raw(pk, sk)),
        })
    }

    pub fn keypair(&self) -> Option<&NodeKeyPair> {
        self.keypair.as_ref()
    }
}

impl LocalIdentity for ConfiguredIdentity {
    fn operator_public_key(&self) -> Option<DilithiumPublicKey> {
        self.keypair.as_ref().map(|kp| kp.public_key.clone())
    }
}
