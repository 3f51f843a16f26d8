//! Security Validator (spec §4.2): admission control run on code text and
//! context before cache lookup or resource acquisition.
//!
//! The baseline pattern table is carried verbatim from the spec in its
//! original JS-shaped form (`eval(`, `new Function`, `__proto__`, ...). Those
//! patterns are harmless against well-formed Python but are kept because the
//! spec defines them as the default table; a Python-native supplement below
//! covers the equivalent Python capability-escape surface. Both sets are
//! enabled by default through the same `customPatterns` extension point (see
//! DESIGN.md for the rationale).

use std::collections::VecDeque;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::security::is_dangerous_name;
use crate::types::{CustomPattern, Severity, StructuredError};

struct BuiltinPattern {
    violation_type: &'static str,
    regex: &'static str,
    severity: Severity,
}

// Spec §4.2 table, in declared evaluation order.
const BUILTIN_PATTERNS: &[BuiltinPattern] = &[
    BuiltinPattern {
        violation_type: "EVAL_USAGE",
        regex: r"\beval\s*\(",
        severity: Severity::High,
    },
    BuiltinPattern {
        violation_type: "FUNCTION_CONSTRUCTOR",
        regex: r"\bnew\s+Function\b|\bFunction\s*\(",
        severity: Severity::High,
    },
    BuiltinPattern {
        violation_type: "PROTO_POLLUTION",
        regex: r#"\b__proto__\b|\[\s*['"]__proto__['"]\s*\]"#,
        severity: Severity::High,
    },
    BuiltinPattern {
        violation_type: "CONSTRUCTOR_PROTOTYPE",
        regex: r"\.constructor\s*(\.|\[).*prototype",
        severity: Severity::High,
    },
    BuiltinPattern {
        violation_type: "DEFINE_GETTER",
        regex: r"__defineGetter__",
        severity: Severity::Medium,
    },
    BuiltinPattern {
        violation_type: "DEFINE_SETTER",
        regex: r"__defineSetter__",
        severity: Severity::Medium,
    },
    BuiltinPattern {
        violation_type: "DYNAMIC_IMPORT",
        regex: r"\bimport\s*\(",
        severity: Severity::Medium,
    },
];

/// Python-native supplement (SPEC_FULL §[MODULE] Security Validator). Shipped
/// through the same `customPatterns` mechanism the spec exposes for callers,
/// so the default configuration carries both tables without special-casing
/// either one.
fn python_supplement_patterns() -> Vec<CustomPattern> {
    let specs: &[(&str, &str, Severity)] = &[
        ("EVAL_USAGE_PY", r"\beval\s*\(", Severity::High),
        ("EXEC_USAGE_PY", r"\bexec\s*\(", Severity::High),
        ("COMPILE_USAGE_PY", r"\bcompile\s*\(", Severity::High),
        ("DUNDER_IMPORT_PY", r"__import__\s*\(", Severity::High),
        ("SUBCLASSES_PY", r"__subclasses__", Severity::High),
        ("GLOBALS_ACCESS_PY", r"__globals__", Severity::High),
        ("OS_SYSTEM_PY", r"\bos\.system\s*\(", Severity::High),
        ("SUBPROCESS_PY", r"\bsubprocess\.", Severity::High),
    ];
    specs
        .iter()
        .map(|(name, pattern, severity)| CustomPattern {
            name: (*name).to_string(),
            pattern: (*pattern).to_string(),
            severity: *severity,
        })
        .collect()
}

const MAX_CONTEXT_DEPTH: usize = 10;
const IDENTIFIER_RE_SRC: &str = r"^[A-Za-z_$][A-Za-z0-9_$]*$";

/// `validate(code, context)` (spec §4.2). Ordering: code length → builtin
/// regexes in declared order → Python supplement patterns → caller-supplied
/// custom patterns → context keys (breadth-first) → depth → value types. The
/// first violation short-circuits the rest.
pub fn validate(
    code: &str,
    context: &serde_json::Map<String, Value>,
    max_code_length: usize,
    custom_patterns: &[CustomPattern],
) -> Result<(), StructuredError> {
    check_code_length(code, max_code_length)?;
    check_builtin_patterns(code)?;
    check_custom_patterns(code, &python_supplement_patterns())?;
    check_custom_patterns(code, custom_patterns)?;
    check_context(context)?;
    Ok(())
}

fn check_code_length(code: &str, max_code_length: usize) -> Result<(), StructuredError> {
    if code.len() > max_code_length {
        warn!(violation_type = "CODE_TOO_LONG", severity = "low", "security validator rejected code");
        return Err(StructuredError::SecurityError {
            violation_type: "CODE_TOO_LONG".to_string(),
            message: format!("code length {} exceeds maximum of {max_code_length}", code.len()),
            pattern: "len(code) > maxCodeLength".to_string(),
            severity: Severity::Low,
        });
    }
    Ok(())
}

fn check_builtin_patterns(code: &str) -> Result<(), StructuredError> {
    for p in BUILTIN_PATTERNS {
        let re = Regex::new(p.regex).expect("builtin security pattern is a valid regex");
        if let Some(m) = re.find(code) {
            warn!(violation_type = p.violation_type, severity = ?p.severity, "security validator rejected code");
            return Err(StructuredError::SecurityError {
                violation_type: p.violation_type.to_string(),
                message: format!("code contains disallowed pattern: {}", m.as_str()),
                pattern: m.as_str().to_string(),
                severity: p.severity,
            });
        }
    }
    Ok(())
}

fn check_custom_patterns(code: &str, patterns: &[CustomPattern]) -> Result<(), StructuredError> {
    for p in patterns {
        let re = match Regex::new(&p.pattern) {
            Ok(re) => re,
            Err(_) => continue, // Malformed custom pattern: skip rather than fail closed on a config error.
        };
        if let Some(m) = re.find(code) {
            warn!(violation_type = %p.name, severity = ?p.severity, "security validator rejected code");
            return Err(StructuredError::SecurityError {
                violation_type: p.name.clone(),
                message: format!("code contains disallowed pattern: {}", m.as_str()),
                pattern: m.as_str().to_string(),
                severity: p.severity,
            });
        }
    }
    Ok(())
}

fn check_context(context: &serde_json::Map<String, Value>) -> Result<(), StructuredError> {
    let identifier_re = Regex::new(IDENTIFIER_RE_SRC).expect("identifier regex is valid");

    let mut queue: VecDeque<(String, &Value, usize)> =
        context.iter().map(|(k, v)| (k.clone(), v, 1usize)).collect();

    while let Some((key, value, depth)) = queue.pop_front() {
        if is_dangerous_name(&key) {
            warn!(violation_type = "PROTO_POLLUTION", severity = "high", "security validator rejected context key");
            return Err(StructuredError::SecurityError {
                violation_type: "PROTO_POLLUTION".to_string(),
                message: format!("context key '{key}' is not permitted"),
                pattern: key,
                severity: Severity::High,
            });
        }
        if !identifier_re.is_match(&key) {
            warn!(violation_type = "INVALID_IDENTIFIER", severity = "medium", "security validator rejected context key");
            return Err(StructuredError::SecurityError {
                violation_type: "INVALID_IDENTIFIER".to_string(),
                message: format!("context key '{key}' is not a valid identifier"),
                pattern: key,
                severity: Severity::Medium,
            });
        }
        if depth > MAX_CONTEXT_DEPTH {
            warn!(violation_type = "CONTEXT_TOO_DEEP", severity = "medium", "security validator rejected context");
            return Err(StructuredError::SecurityError {
                violation_type: "CONTEXT_TOO_DEEP".to_string(),
                message: format!("context nesting depth exceeds {MAX_CONTEXT_DEPTH}"),
                pattern: key,
                severity: Severity::Medium,
            });
        }

        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    queue.push_back((k.clone(), v, depth + 1));
                }
            }
            Value::Array(items) => {
                for v in items {
                    queue.push_back((key.clone(), v, depth + 1));
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
        }
    }

    Ok(())
}
