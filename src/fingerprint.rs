//! Request fingerprinting.
//!
//! The fingerprint is the cache key and the coalescing key, so two requests that the
//! backend would answer identically must fingerprint identically. Normalization:
//!
//! - parameter names are trimmed and lower-cased, values are trimmed
//! - empty values count as absent
//! - absent optional parameters take their configured per-class default
//! - parameters are sorted by name (then value) before hashing
//! - the path is trimmed, lower-cased and stripped of surrounding slashes
//!
//! The tier joins the digest only for classes configured as tier-sensitive.

use crate::config::CacheConfig;
use crate::identity::Tier;
use crate::request::{DocRequest, ResourceClass};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Deterministic identifier for a normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestFingerprint {
    class: ResourceClass,
    digest: String,
}

impl RequestFingerprint {
    pub fn class(&self) -> ResourceClass {
        self.class
    }

    /// Hex-encoded BLAKE3 digest of the canonical request.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.digest)
    }
}

/// Computes [`RequestFingerprint`]s from [`DocRequest`]s.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    defaults: BTreeMap<ResourceClass, BTreeMap<String, String>>,
    tier_sensitive: HashSet<ResourceClass>,
}

impl Fingerprinter {
    pub fn new(config: &CacheConfig) -> Self {
        let defaults = config
            .param_defaults
            .iter()
            .map(|(class, params)| {
                let normalized = params
                    .iter()
                    .filter_map(|(k, v)| normalize_pair(k, v))
                    .collect::<BTreeMap<_, _>>();
                (*class, normalized)
            })
            .collect();
        Self { defaults, tier_sensitive: config.tier_sensitive.iter().copied().collect() }
    }

    pub fn compute(&self, request: &DocRequest, tier: Tier) -> RequestFingerprint {
        let canonical = self.canonical(request, tier);
        let digest = blake3::hash(canonical.as_bytes()).to_hex().to_string();
        RequestFingerprint { class: request.class, digest }
    }

    /// Length-prefixed canonical form; prefixes keep `a=b&c` and `a=b&c=` style collisions apart.
    fn canonical(&self, request: &DocRequest, tier: Tier) -> String {
        let mut params: Vec<(String, String)> =
            request.params.iter().filter_map(|(k, v)| normalize_pair(k, v)).collect();

        if let Some(defaults) = self.defaults.get(&request.class) {
            for (name, value) in defaults {
                if !params.iter().any(|(k, _)| k == name) {
                    params.push((name.clone(), value.clone()));
                }
            }
        }
        params.sort();
        params.dedup();

        let mut out = String::new();
        push_field(&mut out, request.class.as_str());
        push_field(&mut out, &normalize_path(&request.path));
        if self.tier_sensitive.contains(&request.class) {
            push_field(&mut out, tier.as_str());
        } else {
            push_field(&mut out, "*");
        }
        for (name, value) in &params {
            push_field(&mut out, name);
            push_field(&mut out, value);
        }
        out
    }
}

fn normalize_pair(name: &str, value: &str) -> Option<(String, String)> {
    let name = name.trim().to_lowercase();
    let value = value.trim();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, value.to_string()))
}

fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_lowercase()
}

fn push_field(out: &mut String, field: &str) {
    out.push_str(&field.len().to_string());
    out.push(':');
    out.push_str(field);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> Fingerprinter {
        Fingerprinter::new(&CacheConfig::default())
    }

    #[test]
    fn parameter_order_and_key_case_do_not_matter() {
        let a = DocRequest::new(ResourceClass::Search, "react")
            .param("Query", "hooks")
            .param("limit", "5");
        let b = DocRequest::new(ResourceClass::Search, "react")
            .param("limit", " 5 ")
            .param("query", "hooks");
        assert_eq!(fp().compute(&a, Tier::Public), fp().compute(&b, Tier::Public));
    }

    #[test]
    fn absent_default_equals_explicit_default() {
        let implicit = DocRequest::new(ResourceClass::Search, "react").param("query", "state");
        let explicit = implicit.clone().param("LIMIT", "10");
        let blank = implicit.clone().param("limit", "  ");
        let f = fp();
        let expected = f.compute(&implicit, Tier::Public);
        assert_eq!(f.compute(&explicit, Tier::Public), expected);
        assert_eq!(f.compute(&blank, Tier::Public), expected);
    }

    #[test]
    fn different_values_differ() {
        let a = DocRequest::new(ResourceClass::Search, "react").param("query", "hooks");
        let b = DocRequest::new(ResourceClass::Search, "react").param("query", "Hooks");
        assert_ne!(fp().compute(&a, Tier::Public), fp().compute(&b, Tier::Public));
    }

    #[test]
    fn class_and_path_participate() {
        let docs = DocRequest::new(ResourceClass::Documentation, "react");
        let listing = DocRequest::new(ResourceClass::Listing, "react");
        let other = DocRequest::new(ResourceClass::Documentation, "vue");
        let f = fp();
        assert_ne!(f.compute(&docs, Tier::Public), f.compute(&listing, Tier::Public));
        assert_ne!(f.compute(&docs, Tier::Public), f.compute(&other, Tier::Public));
        assert_eq!(
            f.compute(&docs, Tier::Public),
            f.compute(&DocRequest::new(ResourceClass::Documentation, "/React/"), Tier::Public)
        );
    }

    #[test]
    fn tier_only_matters_for_sensitive_classes() {
        let config = CacheConfig {
            tier_sensitive: vec![ResourceClass::Listing],
            ..CacheConfig::default()
        };
        let f = Fingerprinter::new(&config);
        let docs = DocRequest::new(ResourceClass::Documentation, "react");
        let listing = DocRequest::new(ResourceClass::Listing, "frameworks");
        assert_eq!(f.compute(&docs, Tier::Public), f.compute(&docs, Tier::Premium));
        assert_ne!(f.compute(&listing, Tier::Public), f.compute(&listing, Tier::Premium));
    }

    #[test]
    fn delimiters_in_values_cannot_collide() {
        let a = DocRequest::new(ResourceClass::Search, "x").param("a", "b1:c");
        let b = DocRequest::new(ResourceClass::Search, "x").param("a", "b").param("1:c", "z");
        assert_ne!(fp().compute(&a, Tier::Public), fp().compute(&b, Tier::Public));
    }

    #[test]
    fn display_prefixes_class() {
        let fp = fp().compute(&DocRequest::new(ResourceClass::Listing, "all"), Tier::Public);
        let rendered = fp.to_string();
        assert!(rendered.starts_with("listing:"));
        assert_eq!(fp.digest().len(), 64);
    }
}
