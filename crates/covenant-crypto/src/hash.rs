use covenant_core::types::Outpoint;

/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Build a canonical signed-message byte string: decimal integers and
/// dotted-quad:port endpoints concatenated with no separators, matching the
/// original protocol's `strMessage` construction.
pub fn canonical_message(parts: &[&dyn std::fmt::Display]) -> Vec<u8> {
    let mut s = String::new();
    for part in parts {
        s.push_str(&part.to_string());
    }
    s.into_bytes()
}

/// Selection-engine score: low 32 bits of
/// BLAKE3(collateral ∥ modulus ∥ block_height), little-endian.
pub fn score_hash(collateral: &Outpoint, modulus: u64, block_height: u64) -> u32 {
    let mut buf = collateral.to_bytes();
    buf.extend_from_slice(&modulus.to_le_bytes());
    buf.extend_from_slice(&block_height.to_le_bytes());
    let digest = blake3_hash(&buf);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// BLAKE3 hash over a persisted snapshot's network-id-through-records span,
/// used both when writing (append) and reading (verify) a snapshot file.
pub fn snapshot_hash(bytes: &[u8]) -> [u8; 32] {
    blake3_hash(bytes)
}
