//! Stable digests shared by every worker.
//!
//! Cache keys and dedupe keys are derived from these helpers, so the field
//! ordering and separators here are part of the cross-worker contract.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Hex digest of `parts` joined with `|`, truncated to 32 characters.
///
/// # Examples
///
/// ```
/// use alarmflow_common::hash::digest;
///
/// let a = digest(&["2", "100", "10.0.0.1"]);
/// assert_eq!(a.len(), 32);
/// assert_eq!(a, digest(&["2", "100", "10.0.0.1"]));
/// assert_ne!(a, digest(&["2", "100", "10.0.0.2"]));
/// ```
pub fn digest<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_ref().as_bytes());
    }
    let bytes = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in bytes.iter().take(16) {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Digest of a dimension map in key order (`k=v` pairs).
pub fn dimensions_digest(dimensions: &BTreeMap<String, String>) -> String {
    let parts: Vec<String> = dimensions.iter().map(|(k, v)| format!("{k}={v}")).collect();
    digest(&parts)
}

/// Digest of the values of `keys` taken from `dimensions`, in the order of
/// `keys`. Missing keys contribute an empty value.
pub fn dimension_values_digest(dimensions: &BTreeMap<String, String>, keys: &[String]) -> String {
    let parts: Vec<String> = keys
        .iter()
        .map(|k| format!("{k}={}", dimensions.get(k).map(String::as_str).unwrap_or("")))
        .collect();
    digest(&parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_digest_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("ip".to_string(), "10.0.0.1".to_string());
        a.insert("mount".to_string(), "/data".to_string());
        let mut b = BTreeMap::new();
        b.insert("mount".to_string(), "/data".to_string());
        b.insert("ip".to_string(), "10.0.0.1".to_string());
        assert_eq!(dimensions_digest(&a), dimensions_digest(&b));
    }

    #[test]
    fn separator_prevents_concatenation_collisions() {
        assert_ne!(digest(&["ab", "c"]), digest(&["a", "bc"]));
    }

    #[test]
    fn value_digest_depends_on_selected_keys_only() {
        let mut a = BTreeMap::new();
        a.insert("ip".to_string(), "10.0.0.1".to_string());
        a.insert("pid".to_string(), "1".to_string());
        let mut b = a.clone();
        b.insert("pid".to_string(), "2".to_string());
        let keys = vec!["ip".to_string()];
        assert_eq!(dimension_values_digest(&a, &keys), dimension_values_digest(&b, &keys));
    }
}
