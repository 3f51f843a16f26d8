//! Foundational public types for the codecell-exec library.
//!
//! This module defines the core data structures used throughout the library:
//! - [`ExecutorConfig`] — configuration for a single execution / the process-wide singletons
//! - [`ExecutionResult`] — the result of one `execute()` call
//! - [`StructuredError`] — structured error variants surfaced to callers
//! - [`DEFAULT_ALLOWED_MODULES`] — the default set of permitted Python stdlib modules

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The default set of Python standard library modules permitted for import
/// inside a worker. This is a defense-in-depth layer underneath the worker's
/// capability isolation (§4.6.1): even a module on this list gets no
/// filesystem write, network, or subprocess access, because the worker
/// interpreter never registers those native modules in the first place.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "math",
    "re",
    "json",
    "datetime",
    "collections",
    "itertools",
    "functools",
    "string",
    "random",
    "os.path",
    "sys",
];

/// A context value: an identifier-keyed JSON mapping injected as pre-bound
/// globals before user code runs. Ordering of keys is insertion order on the
/// way in; canonicalization for cache-keying happens separately (see
/// `cache::canonicalize`).
pub type Context = serde_json::Map<String, Value>;

/// Per-server tool versions, used as the third segment of the cache key and
/// as the argument to `Cache::invalidate_by_tool_version`.
pub type ToolVersions = BTreeMap<String, String>;

/// Configuration that governs admission control, resource accounting, and a
/// single execution. Aggregates every knob from spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Wall-clock timeout per execution, in milliseconds. Default: 30,000.
    pub timeout_ms: u64,

    /// Per-worker heap cap, in MiB. Default: 512.
    pub memory_limit_mb: u64,

    /// Filesystem read allow-list. Default: empty (no reads permitted).
    pub allowed_read_paths: Vec<String>,

    /// Maximum number of concurrent executions. Default: 10.
    pub max_concurrent_executions: usize,

    /// Maximum aggregate memory across active executions, in MiB. Default: 3072.
    pub max_total_memory_mb: u64,

    /// Whether to consult host memory pressure before admitting an execution.
    /// Default: true.
    pub enable_memory_pressure_detection: bool,

    /// Reject acquisition when host memory used/total exceeds this percentage.
    /// Default: 80.
    pub memory_pressure_threshold_percent: u8,

    /// Maximum number of bytes that may be written to stdout + stderr combined.
    /// Default: 1,048,576 bytes (1 MiB).
    pub max_output_bytes: usize,

    /// List of Python module names workers are permitted to import.
    pub allowed_modules: Vec<String>,

    /// Maximum permitted code length, in bytes. Default: 65,536 (64 KiB).
    pub max_code_length: usize,

    /// Whether the security validator runs at all. Default: true.
    pub enable_code_validation: bool,

    /// Whether context key/value sanitization rules are enforced. Default: true.
    pub enable_context_sanitization: bool,

    /// Additional caller-supplied regex patterns, checked after the built-in set.
    pub custom_patterns: Vec<CustomPattern>,

    /// Result cache configuration.
    pub cache: CacheConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            memory_limit_mb: 512,
            allowed_read_paths: Vec::new(),
            max_concurrent_executions: 10,
            max_total_memory_mb: 3072,
            enable_memory_pressure_detection: true,
            memory_pressure_threshold_percent: 80,
            max_output_bytes: 1_048_576,
            allowed_modules: DEFAULT_ALLOWED_MODULES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_code_length: 65_536,
            enable_code_validation: true,
            enable_context_sanitization: true,
            custom_patterns: Vec::new(),
            cache: CacheConfig::default(),
        }
    }
}

/// A caller-supplied security pattern, checked with the same severity
/// taxonomy as the built-in set (spec §4.2 "Patterns are extensible via a
/// `customPatterns` config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPattern {
    pub name: String,
    pub pattern: String,
    pub severity: Severity,
}

/// Result cache configuration (spec §6 "Cache: enabled, maxEntries,
/// ttlSeconds, persistence").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_seconds: u64,
    /// Maximum serialized size, in bytes, of a single cache entry's result.
    pub max_entry_bytes: usize,
    /// Optional path to a persistence file. `None` disables persistence.
    pub persistence_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 256,
            ttl_seconds: 3600,
            max_entry_bytes: 1_048_576,
            persistence_path: None,
        }
    }
}

/// The outcome of one `execute()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Present iff `success == true` AND the code left a bare trailing
    /// expression to capture. A genuinely `None`/`null`-valued result is
    /// `Some(Value::Null)`; code with no trailing expression at all omits
    /// this field rather than emitting a `null` that would look the same as
    /// an explicit one (spec §9's `undefined`-vs-`null` open question,
    /// resolved in `DESIGN.md`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present iff `success == false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn ok(result: Option<Value>, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            result,
            error: None,
            execution_time_ms,
        }
    }

    pub fn failed(error: StructuredError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            execution_time_ms,
        }
    }
}

/// Severity of a rejected security pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Structured error variants produced when admission, resource acquisition,
/// or execution fails.
///
/// Serialized with an internally-tagged `"type"` discriminator field so that
/// JSON consumers can switch on `error.type` without a wrapper object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StructuredError {
    /// Admission was refused by the security validator.
    SecurityError {
        violation_type: String,
        message: String,
        pattern: String,
        severity: Severity,
    },

    /// A resource quota was exhausted.
    ResourceLimitError {
        limit_type: String,
        message: String,
        current: u64,
        max: u64,
    },

    /// Execution exceeded the configured wall-clock timeout.
    TimeoutError { message: String, limit_ms: u64 },

    /// The worker's heap/OOM limit was exceeded.
    MemoryError { message: String, limit_mb: u64 },

    /// A denied capability was attempted (filesystem, network, subprocess, ...).
    PermissionError { message: String },

    /// The code failed to parse.
    SyntaxError {
        message: String,
        line: u32,
        col: u32,
    },

    /// Anything else thrown inside user code, including wrapped `MCPToolError`s.
    RuntimeError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}
