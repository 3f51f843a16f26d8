//! Context Builder (spec §4.5): turns a caller's intent + candidate tool
//! catalog into a bounded, validated set of tool definitions to expose inside
//! a worker, without ever pulling in an embeddings implementation itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use regex::Regex;

use crate::security::contains_dangerous_substring;

/// Floor cosine-similarity score a tool candidate must meet to be considered
/// relevant to an intent (spec §4.5 "top-K ... under cosine similarity with a
/// floor of 0.6").
pub const RELEVANCE_FLOOR: f32 = 0.6;

fn tool_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("tool name regex is valid"))
}

/// A lightweight stand-in for a JSON-schema type, used only to generate a
/// human/documentation-facing Python type hint string — Python itself is
/// dynamically typed, so this never gates anything at runtime (spec §4.5
/// "manifest generation is documentation, not enforcement").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyTypeHint {
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Any,
}

impl PyTypeHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            PyTypeHint::Str => "str",
            PyTypeHint::Int => "int",
            PyTypeHint::Float => "float",
            PyTypeHint::Bool => "bool",
            PyTypeHint::List => "list",
            PyTypeHint::Dict => "dict",
            PyTypeHint::Any => "Any",
        }
    }

    /// Map a JSON-schema `"type"` value onto the nearest Python type hint.
    pub fn from_schema_type(schema_type: &str) -> Self {
        match schema_type {
            "string" => PyTypeHint::Str,
            "integer" => PyTypeHint::Int,
            "number" => PyTypeHint::Float,
            "boolean" => PyTypeHint::Bool,
            "array" => PyTypeHint::List,
            "object" => PyTypeHint::Dict,
            _ => PyTypeHint::Any,
        }
    }
}

/// One parameter of a tool's call signature, derived from its JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: String,
    pub required: bool,
}

/// A single tool's definition as advertised by an MCP-style server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub server: String,
    /// The name exposed to Python code, e.g. as a proxy function. Stays
    /// snake_case on the Python side even though `method_name` below is
    /// camelCase for wire compatibility with the host (spec §4.5).
    pub name: String,
    /// The RPC method name as sent over the wire to the host dispatcher.
    pub method_name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

/// Every tool a server advertises, keyed by server name.
pub type ToolManifest = BTreeMap<String, Vec<ToolDefinition>>;

/// A tool ranked against a caller's intent by [`VectorSearchProvider`], prior
/// to the top-K cut.
#[derive(Debug, Clone)]
pub struct ToolCandidate {
    pub server: String,
    pub tool: String,
    pub score: f32,
}

/// Embeddings/vector-search is explicitly out of scope for this crate (spec
/// §4.5 Non-goals); callers provide their own implementation of this trait to
/// rank tool candidates against free-text intent.
pub trait VectorSearchProvider: Send + Sync {
    fn rank(&self, intent: &str, manifest: &ToolManifest) -> Vec<ToolCandidate>;
}

/// A `VectorSearchProvider` that ranks every tool as equally relevant, in
/// manifest order. Useful when no intent text is supplied, or in tests.
pub struct NoopVectorSearchProvider;

impl VectorSearchProvider for NoopVectorSearchProvider {
    fn rank(&self, _intent: &str, manifest: &ToolManifest) -> Vec<ToolCandidate> {
        let mut candidates = Vec::new();
        for (server, tools) in manifest {
            for tool in tools {
                candidates.push(ToolCandidate {
                    server: server.clone(),
                    tool: tool.name.clone(),
                    score: 1.0,
                });
            }
        }
        candidates
    }
}

/// Cosine similarity between two equal-length embedding vectors. Returns
/// `0.0` for mismatched lengths or a zero-magnitude vector rather than
/// panicking or producing NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Reject tool names colliding with the shared prototype-pollution vocabulary
/// (spec §4.5, same list the Security Validator checks context keys against —
/// see [`crate::security`]).
pub fn validate_tool_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 100 {
        return Err(format!(
            "tool name '{name}' length {} is outside the permitted range [1, 100]",
            name.len()
        ));
    }
    if !tool_name_re().is_match(name) {
        return Err(format!(
            "tool name '{name}' must match ^[A-Za-z0-9_-]+$"
        ));
    }
    if contains_dangerous_substring(name) {
        warn!(tool = name, "rejected tool name: dangerous substring");
        return Err(format!("tool name '{name}' contains a disallowed substring"));
    }
    Ok(())
}

/// `snake_case` / `kebab-case` → `camelCase`, used only for the wire-facing
/// `method_name` field; the Python-side proxy key stays snake_case (spec
/// §4.5 "the host speaks camelCase, the sandbox speaks snake_case").
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for ch in s.chars() {
        if ch == '_' || ch == '-' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(ch.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn schema_to_parameters(schema: &Value) -> Vec<ToolParameter> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| {
            let schema_type = prop.get("type").and_then(Value::as_str).unwrap_or("any");
            ToolParameter {
                name: name.clone(),
                type_hint: PyTypeHint::from_schema_type(schema_type).as_str().to_string(),
                required: required.contains(name),
            }
        })
        .collect()
}

/// A raw tool descriptor as fetched from an MCP-style server, before it has
/// been turned into a [`ToolDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawToolDescriptor {
    pub server: String,
    pub tool: String,
    pub description: String,
    pub input_schema: Value,
}

/// Caches the (server, tool) → [`ToolDefinition`] mapping so repeated
/// `build_tools` calls for the same catalog don't re-derive parameter lists
/// on every execution (spec §4.5 "descriptor cache, keyed by (server, tool)").
pub struct DescriptorCache {
    inner: Mutex<HashMap<(String, String), ToolDefinition>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static DescriptorCache {
        static INSTANCE: OnceLock<DescriptorCache> = OnceLock::new();
        INSTANCE.get_or_init(DescriptorCache::new)
    }

    pub fn get_or_build(&self, descriptor: &RawToolDescriptor) -> ToolDefinition {
        let key = (descriptor.server.clone(), descriptor.tool.clone());
        let mut inner = self.inner.lock().expect("DescriptorCache mutex poisoned");
        inner
            .entry(key)
            .or_insert_with(|| ToolDefinition {
                server: descriptor.server.clone(),
                name: descriptor.tool.clone(),
                method_name: to_camel_case(&descriptor.tool),
                description: descriptor.description.clone(),
                parameters: schema_to_parameters(&descriptor.input_schema),
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("DescriptorCache mutex poisoned").len()
    }

    pub fn clear(&self) {
        self.inner.lock().expect("DescriptorCache mutex poisoned").clear();
    }
}

impl Default for DescriptorCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects and validates the tools a single execution is allowed to see.
pub struct ContextBuilder<'a> {
    search: &'a dyn VectorSearchProvider,
    descriptor_cache: &'a DescriptorCache,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(search: &'a dyn VectorSearchProvider, descriptor_cache: &'a DescriptorCache) -> Self {
        Self {
            search,
            descriptor_cache,
        }
    }

    /// Rank `manifest` against `intent`, keep the top `top_k`, validate every
    /// surviving tool name, and materialize full [`ToolDefinition`]s.
    pub fn build_tools(
        &self,
        intent: &str,
        manifest: &ToolManifest,
        descriptors: &[RawToolDescriptor],
        top_k: usize,
    ) -> Result<Vec<ToolDefinition>, String> {
        let mut ranked: Vec<ToolCandidate> = self
            .search
            .rank(intent, manifest)
            .into_iter()
            .filter(|c| c.score >= RELEVANCE_FLOOR)
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);

        self.build_tool_definitions(&ranked, descriptors)
    }

    /// Resolve a set of `(server, tool)` candidates into validated, fully
    /// described [`ToolDefinition`]s, using the descriptor cache.
    pub fn build_tool_definitions(
        &self,
        candidates: &[ToolCandidate],
        descriptors: &[RawToolDescriptor],
    ) -> Result<Vec<ToolDefinition>, String> {
        let mut defs = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            validate_tool_name(&candidate.tool)?;
            let descriptor = descriptors
                .iter()
                .find(|d| d.server == candidate.server && d.tool == candidate.tool)
                .ok_or_else(|| format!("no descriptor for {}::{}", candidate.server, candidate.tool))?;
            defs.push(self.descriptor_cache.get_or_build(descriptor));
        }
        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor(server: &str, tool: &str) -> RawToolDescriptor {
        RawToolDescriptor {
            server: server.to_string(),
            tool: tool.to_string(),
            description: format!("{tool} does things"),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "max_results": {"type": "integer"},
                },
                "required": ["query"],
            }),
        }
    }

    #[test]
    fn test_to_camel_case_snake_input() {
        assert_eq!(to_camel_case("search_web"), "searchWeb");
    }

    #[test]
    fn test_to_camel_case_kebab_input() {
        assert_eq!(to_camel_case("search-web"), "searchWeb");
    }

    #[test]
    fn test_to_camel_case_no_separators() {
        assert_eq!(to_camel_case("search"), "search");
    }

    #[test]
    fn test_validate_tool_name_rejects_dangerous_substring() {
        assert!(validate_tool_name("my__proto__tool").is_err());
    }

    #[test]
    fn test_validate_tool_name_rejects_empty() {
        assert!(validate_tool_name("").is_err());
    }

    #[test]
    fn test_validate_tool_name_accepts_clean_name() {
        assert!(validate_tool_name("search_web").is_ok());
    }

    #[test]
    fn test_cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_cosine_similarity_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_schema_to_parameters_marks_required() {
        let descriptor = sample_descriptor("search", "search_web");
        let params = schema_to_parameters(&descriptor.input_schema);
        let query = params.iter().find(|p| p.name == "query").unwrap();
        assert!(query.required);
        assert_eq!(query.type_hint, "str");
        let max_results = params.iter().find(|p| p.name == "max_results").unwrap();
        assert!(!max_results.required);
        assert_eq!(max_results.type_hint, "int");
    }

    #[test]
    fn test_descriptor_cache_reuses_entry() {
        let cache = DescriptorCache::new();
        let descriptor = sample_descriptor("search", "search_web");
        let first = cache.get_or_build(&descriptor);
        assert_eq!(cache.len(), 1);
        let second = cache.get_or_build(&descriptor);
        assert_eq!(first.method_name, second.method_name);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_build_tools_respects_top_k() {
        let manifest: ToolManifest = BTreeMap::new();
        let descriptors = vec![sample_descriptor("search", "a"), sample_descriptor("search", "b")];
        let candidates = vec![
            ToolCandidate {
                server: "search".to_string(),
                tool: "a".to_string(),
                score: 0.9,
            },
            ToolCandidate {
                server: "search".to_string(),
                tool: "b".to_string(),
                score: 0.1,
            },
        ];
        struct FixedProvider(Vec<ToolCandidate>);
        impl VectorSearchProvider for FixedProvider {
            fn rank(&self, _intent: &str, _manifest: &ToolManifest) -> Vec<ToolCandidate> {
                self.0
                    .iter()
                    .map(|c| ToolCandidate {
                        server: c.server.clone(),
                        tool: c.tool.clone(),
                        score: c.score,
                    })
                    .collect()
            }
        }
        let provider = FixedProvider(candidates);
        let cache = DescriptorCache::new();
        let builder = ContextBuilder::new(&provider, &cache);
        let tools = builder
            .build_tools("find something", &manifest, &descriptors, 1)
            .expect("build_tools should succeed");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "a");
    }

    #[test]
    fn test_build_tool_definitions_rejects_dangerous_tool_name() {
        let cache = DescriptorCache::new();
        let provider = NoopVectorSearchProvider;
        let builder = ContextBuilder::new(&provider, &cache);
        let candidates = vec![ToolCandidate {
            server: "search".to_string(),
            tool: "__proto__".to_string(),
            score: 1.0,
        }];
        let result = builder.build_tool_definitions(&candidates, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_tool_definitions_errors_on_missing_descriptor() {
        let cache = DescriptorCache::new();
        let provider = NoopVectorSearchProvider;
        let builder = ContextBuilder::new(&provider, &cache);
        let candidates = vec![ToolCandidate {
            server: "search".to_string(),
            tool: "missing".to_string(),
            score: 1.0,
        }];
        let result = builder.build_tool_definitions(&candidates, &[]);
        assert!(result.is_err());
    }
}
