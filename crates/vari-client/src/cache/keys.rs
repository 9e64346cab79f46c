//! Cache key derivation.
//!
//! Expiring keys are a kind prefix followed by each present parameter as
//! `name=value`, in a fixed order, joined by `|`. Values are form-encoded.
//! Identical queries always produce identical keys; distinct ones never share
//! a key.

use sha2::{Digest, Sha256};
use url::form_urlencoded;

use crate::types::CharacterQuery;

const DELIMITER: &str = "|";

/// Values are form-encoded, so a delimiter inside a value cannot forge a
/// parameter boundary.
pub fn listing_key(query: &CharacterQuery) -> String {
    let mut parts = vec!["characters".to_string()];
    parts.extend(query.params().into_iter().map(|(name, value)| {
        let escaped: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
        format!("{}={}", name, escaped)
    }));
    parts.join(DELIMITER)
}

pub fn record_key(id: &str) -> String {
    format!("character{}id={}", DELIMITER, id)
}

/// Durable key for a model bundle.
pub fn model_key(identifier: &str, variant: &str) -> String {
    format!("{}:{}", identifier, variant)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Filesystem-safe name for a key.
pub(crate) fn entry_dir_name(key: &str) -> String {
    sha256_hex(key.as_bytes())
}

/// Content digest recorded next to a persisted payload.
pub(crate) fn payload_digest(payload: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_key_skips_absent_params() {
        assert_eq!(listing_key(&CharacterQuery::new()), "characters");

        let query = CharacterQuery::new().with_search("mage").with_limit(20);
        assert_eq!(listing_key(&query), "characters|search=mage|limit=20");
    }

    #[test]
    fn test_listing_key_ignores_builder_order() {
        let a = CharacterQuery::new().with_page(2).with_rarity("ssr");
        let b = CharacterQuery::new().with_rarity("ssr").with_page(2);
        assert_eq!(listing_key(&a), listing_key(&b));
        assert_eq!(listing_key(&a), "characters|rarity=ssr|page=2");
    }

    #[test]
    fn test_distinct_queries_distinct_keys() {
        let a = CharacterQuery::new().with_page(1);
        let b = CharacterQuery::new().with_limit(1);
        assert_ne!(listing_key(&a), listing_key(&b));
    }

    #[test]
    fn test_delimiter_in_value_cannot_collide() {
        let forged = CharacterQuery::new().with_search("mage|limit=20");
        let real = CharacterQuery::new().with_search("mage").with_limit(20);
        assert_ne!(listing_key(&forged), listing_key(&real));
        assert_eq!(listing_key(&forged), "characters|search=mage%7Climit%3D20");

        let spaced = CharacterQuery::new().with_search("ice mage");
        assert_eq!(listing_key(&spaced), "characters|search=ice+mage");
    }

    #[test]
    fn test_record_and_model_keys() {
        assert_eq!(record_key("c001"), "character|id=c001");
        assert_eq!(model_key("c001", "default"), "c001:default");
    }

    #[test]
    fn test_entry_dir_name_is_stable_hex() {
        let name = entry_dir_name("c001:default");
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, entry_dir_name("c001:default"));
        assert_ne!(name, entry_dir_name("c001:skin01"));
    }

    #[test]
    fn test_payload_digest_format() {
        assert_eq!(
            payload_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
