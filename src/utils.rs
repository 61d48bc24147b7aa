//! Identifier generation and identity normalization helpers.

use crate::error::{Error, Result};
use bech32::Bech32m;
use rand::RngCore;
use uuid7::uuid7;

/// Mint a fresh entity id: a uuid7 encoded as bech32 under the given
/// human-readable prefix (e.g. `chal_`, `part_`, `sub_`).
pub fn new_bech32_id(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| Error::Codec(e.to_string()))?;
    let encoded = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| Error::Codec(e.to_string()))?;
    Ok(encoded)
}

/// Mint an event id. Plain uuid7 strings are lexicographically
/// time-ordered, so these double as the chronological sort key inside an
/// events-tree prefix scan.
pub fn new_event_id() -> String {
    uuid7().to_string()
}

/// Canonical form of a user identity (wallet address or email): trimmed
/// and lower-cased. This is the dedup key for joins.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Identities end up embedded in composite store keys, so they must be
/// non-empty and free of whitespace and the `/` key separator.
pub fn valid_identity(identity: &str) -> bool {
    !identity.is_empty()
        && !identity.contains('/')
        && !identity.chars().any(|c| c.is_whitespace())
}

/// Fabricated transaction hash in the `0x` + 64 hex chars shape the chain
/// collaborator uses. Stands in for real signing, which is out of scope.
pub fn mock_tx_hash() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = new_bech32_id("chal_").unwrap();
        let b = new_bech32_id("chal_").unwrap();
        assert!(a.starts_with("chal_1"));
        assert_ne!(a, b);
    }

    #[test]
    fn event_ids_sort_chronologically() {
        let first = new_event_id();
        let second = new_event_id();
        assert!(first < second);
    }

    #[test]
    fn identity_normalization_lowercases_and_trims() {
        assert_eq!(normalize_identity("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_identity("0xABCDef"), "0xabcdef");
    }

    #[test]
    fn identity_validation_rejects_key_unsafe_input() {
        assert!(valid_identity("alice@example.com"));
        assert!(valid_identity("0xabc123"));
        assert!(!valid_identity(""));
        assert!(!valid_identity("a/b"));
        assert!(!valid_identity("has space"));
    }

    #[test]
    fn mock_tx_hashes_look_like_chain_hashes() {
        let h = mock_tx_hash();
        assert!(h.starts_with("0x"));
        assert_eq!(h.len(), 66);
        assert_ne!(h, mock_tx_hash());
    }
}
