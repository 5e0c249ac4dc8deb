//! One-way hashing of masked values.

use super::{MaskingStrategy, StrategyState};
use crate::entity::EntityType;
use sha2::{Digest, Sha256};

pub const DEFAULT_HASH_LENGTH: usize = 8;

/// Replaces a value with a truncated salted SHA-256 digest
///
/// Deterministic, so identical values always get identical tokens, but
/// one-way: the store does not record these tokens.
#[derive(Debug, Clone)]
pub struct HashStrategy {
    salt: String,
    length: usize,
}

impl Default for HashStrategy {
    fn default() -> Self {
        Self::new("", DEFAULT_HASH_LENGTH)
    }
}

impl HashStrategy {
    /// `length` is the number of hex characters kept, clamped to 1..=64
    pub fn new(salt: impl Into<String>, length: usize) -> Self {
        Self {
            salt: salt.into(),
            length: length.clamp(1, 64),
        }
    }

    pub fn digest(&self, original: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(original.as_bytes());
        hasher.update(self.salt.as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex[..self.length].to_string()
    }
}

impl MaskingStrategy for HashStrategy {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn generate(
        &self,
        original: &str,
        _entity_type: EntityType,
        _state: &mut StrategyState,
    ) -> String {
        self.digest(original)
    }

    fn is_reversible(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_truncated() {
        let strategy = HashStrategy::default();
        let a = strategy.digest("张三");
        assert_eq!(a.len(), 8);
        assert_eq!(a, strategy.digest("张三"));
        assert_ne!(a, strategy.digest("李四"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_salt_changes_digest() {
        let plain = HashStrategy::new("", 12);
        let salted = HashStrategy::new("pepper", 12);
        assert_ne!(plain.digest("张三"), salted.digest("张三"));
        assert_eq!(plain.digest("张三").len(), 12);
    }

    #[test]
    fn test_length_is_clamped() {
        assert_eq!(HashStrategy::new("", 0).digest("x").len(), 1);
        assert_eq!(HashStrategy::new("", 500).digest("x").len(), 64);
    }
}
