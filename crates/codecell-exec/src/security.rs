//! Shared prototype-pollution vocabulary used by both the Security Validator
//! (context-key checks, spec §4.2) and the Context Builder (tool-name checks,
//! spec §4.5). Kept as one small module so the two call sites cannot drift.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Property/key names that are never permitted in a context object or a tool
/// name, regardless of nesting depth (spec §4.2, §4.5).
pub const DANGEROUS_NAMES: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

fn dangerous_names() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| DANGEROUS_NAMES.iter().copied().collect())
}

/// Exact match against the dangerous-names set (used for context object keys,
/// which must be valid identifiers rather than free text).
pub fn is_dangerous_name(name: &str) -> bool {
    dangerous_names().contains(name)
}

/// Case-insensitive substring match (used for tool names, which are free text
/// within a character class rather than exact identifiers).
pub fn contains_dangerous_substring(name: &str) -> bool {
    let lower = name.to_lowercase();
    DANGEROUS_NAMES.iter().any(|d| lower.contains(&d.to_lowercase()))
}
