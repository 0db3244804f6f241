//! Mapping storage keys to sharded directory paths.
//!
//! Flat key namespaces are split into nested directories by key prefix so no
//! single directory holds too many files.  Sharding a tenant-prefixed key
//! naively would shard on the slug's own bytes:
//!
//! ```text
//! "abcdefg"      => "ab/cd/abcdefg"
//! "prj1-abcdefg" => "pr/j1/prj1-abcdefg"
//! ```
//!
//! which yields a handful of directories per tenant, each with every one of
//! that tenant's files.  [`TenantSharder`] instead makes the slug a single
//! top-level directory and shards only the random component beneath it:
//!
//! ```text
//! "prj1-abcdefg" => "prj1/ab/cd/prj1-abcdefg"
//! ```
//!
//! so fan-out stays bounded per tenant and a tenant's whole tree can be
//! enumerated or deleted without a full scan.

use crate::keys::split_key;

/// Strategy mapping a key to the directory segments that hold it.
pub trait PathSharder: Send + Sync + 'static {
    /// Directory segments for `key`, outermost first, excluding the key.
    fn folder_for(&self, key: &str) -> Vec<String>;

    /// Relative path of `key`: its folder followed by the key itself.
    fn path_for(&self, key: &str) -> String {
        let mut segments = self.folder_for(key);
        segments.push(key.to_string());
        segments.join("/")
    }
}

/// The default, tenant-agnostic rule: `segments` prefixes of `width`
/// characters sliced from the start of the key.
#[derive(Debug, Clone, Copy)]
pub struct PrefixSharder {
    segments: usize,
    width: usize,
}

impl PrefixSharder {
    pub fn new(segments: usize, width: usize) -> Self {
        Self {
            segments,
            width: width.max(1),
        }
    }
}

impl Default for PrefixSharder {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

impl PathSharder for PrefixSharder {
    fn folder_for(&self, key: &str) -> Vec<String> {
        // Short keys yield fewer (or shorter) segments, never empty ones.
        let chars: Vec<char> = key.chars().collect();
        chars
            .chunks(self.width)
            .take(self.segments)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }
}

/// Tenant-local sharding layered over an inner rule.
///
/// Keys of the form `<slug>-<random>` get `slug` as their top-level segment
/// followed by the inner rule applied to `random` alone.  Keys without a
/// tenant prefix use the inner rule on the whole key.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantSharder<S = PrefixSharder> {
    inner: S,
}

impl<S: PathSharder> TenantSharder<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: PathSharder> PathSharder for TenantSharder<S> {
    fn folder_for(&self, key: &str) -> Vec<String> {
        match split_key(key) {
            Some((slug, random)) => {
                let mut segments = vec![slug.to_string()];
                segments.extend(self.inner.folder_for(random));
                segments
            }
            None => self.inner.folder_for(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_sharder_default_rule() {
        let sharder = PrefixSharder::default();
        assert_eq!(sharder.folder_for("abcdefg"), vec!["ab", "cd"]);
        assert_eq!(sharder.path_for("abcdefg"), "ab/cd/abcdefg");
    }

    #[test]
    fn test_prefix_sharder_short_keys() {
        let sharder = PrefixSharder::default();
        assert_eq!(sharder.folder_for("abc"), vec!["ab", "c"]);
        assert_eq!(sharder.folder_for("a"), vec!["a"]);
        assert!(sharder.folder_for("").is_empty());
    }

    #[test]
    fn test_prefix_sharder_custom_shape() {
        let sharder = PrefixSharder::new(3, 1);
        assert_eq!(sharder.path_for("abcdef"), "a/b/c/abcdef");
    }

    #[test]
    fn test_tenant_key_gets_tenant_directory() {
        let sharder = TenantSharder::<PrefixSharder>::default();
        assert_eq!(sharder.path_for("prj1-abcdefg"), "prj1/ab/cd/prj1-abcdefg");
        assert_eq!(
            sharder.path_for("tenant-abcdefg123"),
            "tenant/ab/cd/tenant-abcdefg123"
        );
    }

    #[test]
    fn test_key_without_delimiter_falls_back() {
        let sharder = TenantSharder::<PrefixSharder>::default();
        assert_eq!(sharder.path_for("notenant"), "no/te/notenant");
    }

    #[test]
    fn test_empty_sides_fall_back() {
        let sharder = TenantSharder::<PrefixSharder>::default();
        assert_eq!(sharder.folder_for("-abcd"), vec!["-a", "bc"]);
        assert_eq!(sharder.folder_for("abcd-"), vec!["ab", "cd"]);
    }

    #[test]
    fn test_shards_depend_only_on_random_component() {
        let tenant_sharder = TenantSharder::<PrefixSharder>::default();
        let default = PrefixSharder::default();
        for (slug, random) in [("prj1", "abcdefg"), ("x", "0z9y8x"), ("tenant123", "q1")] {
            let key = format!("{slug}-{random}");
            let folder = tenant_sharder.folder_for(&key);
            assert_eq!(folder[0], slug);
            assert_eq!(folder[1..].to_vec(), default.folder_for(random));
        }
    }

    #[test]
    fn test_same_tenant_shares_top_level_directory() {
        let sharder = TenantSharder::<PrefixSharder>::default();
        let a = sharder.folder_for("acme-00aa11bb");
        let b = sharder.folder_for("acme-zz99yy88");
        assert_eq!(a[0], b[0]);
        assert_ne!(a[1], b[1]);
    }
}
