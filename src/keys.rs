//! Tenant-prefixed storage key generation and parsing.
//!
//! Keys have the shape `<tenant-slug>-<random>`.  The slug alphabet is ASCII
//! alphanumerics and the random alphabet is lowercase base36, so the `-`
//! delimiter appears exactly once and splitting on it is unambiguous.
//! `/` is deliberately not used as the delimiter: object stores and disk
//! services escape or interpret it differently.

use rand::Rng;

use crate::errors::KelderError;
use crate::tenant::TenantId;

/// Separator between the tenant slug and the random component.
pub const KEY_DELIMITER: char = '-';

/// Length of the random component.
pub const RANDOM_COMPONENT_LENGTH: usize = 28;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Strategy producing a fresh storage key for a tenant.
pub trait KeyGenerator: Send + Sync + 'static {
    /// Generate a key unique with overwhelming probability.
    fn generate_key(&self, tenant: &TenantId) -> String;
}

/// Generates `<slug>-<base36 token>` keys.
#[derive(Debug, Clone, Copy)]
pub struct TenantKeyGenerator {
    length: usize,
}

impl TenantKeyGenerator {
    /// A generator producing random components of `length` characters.
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }
}

impl Default for TenantKeyGenerator {
    fn default() -> Self {
        Self::new(RANDOM_COMPONENT_LENGTH)
    }
}

impl KeyGenerator for TenantKeyGenerator {
    fn generate_key(&self, tenant: &TenantId) -> String {
        format!(
            "{}{}{}",
            tenant.slug(),
            KEY_DELIMITER,
            random_base36(self.length)
        )
    }
}

/// A lowercase base36 token drawn from the thread-local CSPRNG.
pub fn random_base36(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| BASE36_ALPHABET[rng.gen_range(0..BASE36_ALPHABET.len())] as char)
        .collect()
}

/// Split a key on the first delimiter. `None` unless both sides are non-empty.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    match key.split_once(KEY_DELIMITER) {
        Some((slug, random)) if !slug.is_empty() && !random.is_empty() => Some((slug, random)),
        _ => None,
    }
}

/// A key known to be tenant-prefixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantKey<'a> {
    /// The tenant slug.
    pub slug: &'a str,
    /// The random component.
    pub random: &'a str,
}

impl<'a> TenantKey<'a> {
    /// Strictly parse `<slug>-<random>`, rejecting legacy un-prefixed keys.
    pub fn parse(key: &'a str) -> Result<Self, KelderError> {
        let malformed = || KelderError::MalformedKey {
            key: key.to_string(),
        };
        let (slug, random) = split_key(key).ok_or_else(malformed)?;
        if !slug.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed());
        }
        if !random
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
        {
            return Err(malformed());
        }
        Ok(Self { slug, random })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn tenant(name: &str) -> TenantId {
        TenantId::parse(name).unwrap()
    }

    #[test]
    fn test_key_is_prefixed_with_slug() {
        let key = TenantKeyGenerator::default().generate_key(&tenant("test_tenant_kelder_tenant123"));
        assert!(key.starts_with("tenant123-"));
        assert_eq!(key.len(), "tenant123-".len() + RANDOM_COMPONENT_LENGTH);
    }

    #[test]
    fn test_random_component_excludes_delimiter() {
        let gen = TenantKeyGenerator::default();
        let t = tenant("a_long_tenant_db_name");
        for _ in 0..200 {
            let key = gen.generate_key(&t);
            let suffix = key.strip_prefix("name-").unwrap();
            assert!(!suffix.contains(KEY_DELIMITER));
            assert!(suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_keys_are_unique() {
        let gen = TenantKeyGenerator::default();
        let t = tenant("acme");
        let keys: HashSet<String> = (0..1000).map(|_| gen.generate_key(&t)).collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_generated_keys_parse() {
        let key = TenantKeyGenerator::new(8).generate_key(&tenant("eu_acme"));
        let parsed = TenantKey::parse(&key).unwrap();
        assert_eq!(parsed.slug, "acme");
        assert_eq!(parsed.random.len(), 8);
    }

    #[test]
    fn test_split_key_first_occurrence() {
        assert_eq!(split_key("prj1-abcdefg"), Some(("prj1", "abcdefg")));
        assert_eq!(split_key("a-b-c"), Some(("a", "b-c")));
        assert_eq!(split_key("notenant"), None);
        assert_eq!(split_key("-abc"), None);
        assert_eq!(split_key("abc-"), None);
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for key in ["notenant", "-abc", "abc-", "a-b-c", "a_b-abc", "acme-ABC", "acme-a/b"] {
            let err = TenantKey::parse(key).unwrap_err();
            assert!(
                matches!(err, KelderError::MalformedKey { key: ref k } if k == key),
                "{key} should be malformed"
            );
        }
    }
}
