//! Path Sanitizer (spec §4.1): strips host-absolute path prefixes from error
//! text and stack traces before they ever reach a caller.
//!
//! Pure, side-effect-free, and deliberately does not use `tracing` — logging
//! the very paths it exists to redact would defeat its purpose.

const REDACTED: &str = "<redacted>";

/// Replace every occurrence of `roots` (and `home`, if given) with
/// `<redacted>`, preserving any trailing `:line:col` suffix untouched since it
/// carries no host-identifying information. `allowed_root`, if given, is
/// exempted — a deliberately-configured allowed root survives redaction so a
/// caller can still tell which sandboxed path an error refers to.
pub fn sanitize(s: &str, roots: &[String], home: Option<&str>, allowed_root: Option<&str>) -> String {
    let mut candidates: Vec<&str> = roots.iter().map(String::as_str).collect();
    if let Some(h) = home {
        candidates.push(h);
    }
    candidates.retain(|c| !c.is_empty() && Some(*c) != allowed_root);
    // Longest first, so a root that is itself a prefix of another configured
    // root never shadows the more specific match.
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));

    let mut out = s.to_string();
    for root in candidates {
        out = replace_all(&out, root);
    }
    out
}

/// Apply [`sanitize`] independently to every line of a multi-line stack trace.
pub fn sanitize_stack_trace(multiline: &str, roots: &[String], home: Option<&str>) -> String {
    multiline
        .lines()
        .map(|line| sanitize(line, roots, home, None))
        .collect::<Vec<_>>()
        .join("\n")
}

fn replace_all(s: &str, needle: &str) -> String {
    if needle.is_empty() {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find(needle) {
        out.push_str(&rest[..idx]);
        out.push_str(REDACTED);
        rest = &rest[idx + needle.len()..];
    }
    out.push_str(rest);
    out
}
