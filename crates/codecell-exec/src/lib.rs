//! codecell-exec: sandboxed execution subsystem for untrusted, LLM-authored Python.
//!
//! Pipeline: [`validator`] admits or rejects source text and call context,
//! [`cache`] short-circuits repeated `(code, context, tool_versions)` triples,
//! [`limiter`] bounds concurrent VM instances and aggregate memory, the
//! [`pool`] of persistent interpreter slots (falling back to an ad-hoc
//! [`vm`] build under [`timeout`] supervision when the pool is saturated)
//! runs the code, and [`parser`] renders the outcome into a
//! [`types::StructuredError`] safe to hand back across the API boundary.
//! [`context_builder`] turns an MCP tool manifest into the callable surface
//! injected into the sandbox; [`rpc`] carries tool invocations out of the VM
//! thread to the host.

pub mod cache;
pub mod context_builder;
pub mod executor;
pub mod limiter;
pub mod modules;
pub mod output;
pub mod parser;
pub mod pool;
pub mod rpc;
pub mod sanitize;
pub mod security;
pub mod timeout;
pub mod types;
pub mod validator;
pub(crate) mod vm;

pub use cache::{cache_key, CacheKey, ResultCache};
pub use context_builder::{
    ContextBuilder, DescriptorCache, NoopVectorSearchProvider, RawToolDescriptor, ToolCandidate,
    ToolDefinition, ToolManifest, ToolParameter, VectorSearchProvider,
};
pub use executor::{execute, maybe_wrap_last_expr, ToolingContext};
pub use limiter::{LimiterConfig, LimiterStats, ResourceLimiter, Token};
pub use modules::{build_allowed_set, check_module_allowed, ModuleNotAllowed};
pub use output::{OutputBuffer, OutputLimitExceeded};
pub use pool::InterpreterPool;
pub use rpc::{
    call_and_wait, spawn_dispatch_loop, Invocation, NoopToolInvoker, ToolCall, ToolInvoker,
    ToolReply,
};
pub use types::{
    CacheConfig, Context, CustomPattern, ExecutionResult, ExecutorConfig, Severity,
    StructuredError, ToolVersions, DEFAULT_ALLOWED_MODULES,
};
