//! Executor (spec §4.6): the top-level orchestrator for a single `execute()`
//! call. Every other module in this crate is a step this function drives:
//!
//! 1. [`crate::validator::validate`] — admission control. A rejection here
//!    never touches the cache or the limiter (spec §4.6.1 "Security and
//!    Resource errors never reach user code").
//! 2. [`crate::cache::cache_key`] + [`crate::cache::ResultCache::get`] — a
//!    content-addressed cache lookup that, on a hit, skips the worker
//!    entirely.
//! 3. [`crate::limiter::ResourceLimiter::acquire`] — admission against the
//!    concurrency/memory quota. The returned [`crate::limiter::Token`] is
//!    wrapped in [`TokenGuard`] so it is released on every exit path,
//!    including an early return or a panic unwind.
//! 4. [`crate::context_builder::ContextBuilder::build_tools`] (only when the
//!    caller supplied [`ToolingContext`]) — ranks and validates the tool
//!    subset exposed to this execution.
//! 5. Dispatch: [`crate::pool::InterpreterPool`] (warm path) or a fresh
//!    interpreter under [`crate::timeout::run_with_timeout`] (pool exhausted).
//! 6. [`crate::parser`] — translates the VM's internal outcome (or a timeout,
//!    or an output-limit hit) into the public [`crate::types::StructuredError`]
//!    taxonomy.
//! 7. On success, [`crate::cache::ResultCache::set`] stores the result for
//!    future identical calls.
//!
//! ## Thread safety
//!
//! Each call to [`execute`] is fully independent: it creates new instances of
//! every per-call resource (`OutputBuffer`, allowlist set, response channel).
//! The pool, limiter, and cache singletons are internally synchronized, so
//! `execute` is safe to call from many threads simultaneously.
//!
//! ## Zero unsafe blocks
//!
//! This file contains no `unsafe` code.

use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::cache::{cache_key, ResultCache};
use crate::context_builder::{
    ContextBuilder, DescriptorCache, RawToolDescriptor, ToolDefinition, ToolManifest,
    VectorSearchProvider,
};
use crate::limiter::{LimiterConfig, ResourceLimiter, Token};
use crate::modules::build_allowed_set;
use crate::output::OutputBuffer;
use crate::parser::{output_limit_error, timeout_error, translate_vm_error, ParseContext};
use crate::pool::{InterpreterPool, WorkItem};
use crate::rpc::{spawn_dispatch_loop, InvokeSender, ToolInvoker};
use crate::timeout::run_with_timeout;
use crate::types::{Context, ExecutionResult, ExecutorConfig, StructuredError, ToolVersions};
use crate::validator;
use crate::vm::{build_interpreter, run_code, VmRunResult};

/// Timeout used when waiting for an available pool slot before falling back
/// to a freshly built interpreter.
const POOL_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call budget given to a single tool invocation's round trip. Bounded by
/// the overall execution timeout so a hung tool call cannot outlive the run.
const DEFAULT_TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything an execution needs to expose a bounded, validated set of MCP
/// tools to the worker (spec §4.5). Omit this (pass `None` to [`execute`])
/// for tool-free executions — no dispatch loop is spawned and no proxies are
/// installed.
pub struct ToolingContext<'a> {
    pub intent: &'a str,
    pub manifest: &'a ToolManifest,
    pub descriptors: &'a [RawToolDescriptor],
    pub search: &'a dyn VectorSearchProvider,
    pub invoker: Arc<dyn ToolInvoker>,
    pub tool_versions: ToolVersions,
    pub top_k: usize,
}

/// Releases a [`Token`] back to the [`ResourceLimiter`] when dropped, so
/// every `execute()` exit path — early return, timeout, or panic unwind —
/// conserves the limiter's slot/memory accounting (spec §8 "every acquired
/// token is eventually released").
struct TokenGuard<'a> {
    limiter: &'a ResourceLimiter,
    token: Token,
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.limiter.release(&self.token);
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Execute a Python source string against `context`, exposing `tooling`'s
/// tools (if any), governed by `config`.
///
/// # Parameters
/// - `code`: Python source text. The last statement, if it is a bare
///   expression (not a keyword statement or a function call), is
///   automatically wrapped as `__result__ = <expr>` so callers can retrieve a
///   return value.
/// - `context`: identifier-keyed values pre-bound as globals inside the
///   worker.
/// - `tooling`: optional tool-injection context (spec §4.5). `None` runs the
///   worker with no tool proxies installed.
/// - `config`: admission, resource, and cache configuration for this call.
///
/// # Thread safety
/// Each call is completely independent. No shared mutable state exists
/// between concurrent calls beyond the process-wide limiter/cache/pool
/// singletons, which are internally synchronized.
pub fn execute(
    code: &str,
    context: Context,
    tooling: Option<ToolingContext<'_>>,
    config: &ExecutorConfig,
) -> ExecutionResult {
    let start = Instant::now();

    if config.enable_code_validation {
        let validated_context = if config.enable_context_sanitization {
            &context
        } else {
            empty_context()
        };
        if let Err(err) = validator::validate(code, validated_context, config.max_code_length, &config.custom_patterns) {
            return ExecutionResult::failed(err, elapsed_ms(start));
        }
    }

    let tool_versions = tooling.as_ref().map(|t| t.tool_versions.clone()).unwrap_or_default();
    let context_value = Value::Object(context.clone());
    let key = cache_key(code, &context_value, &tool_versions);

    if let Some(cached) = ResultCache::global().get(&key) {
        return ExecutionResult {
            execution_time_ms: 0,
            ..cached
        };
    }

    let limiter_config = LimiterConfig {
        max_concurrent_executions: config.max_concurrent_executions,
        max_total_memory_mb: config.max_total_memory_mb,
        enable_memory_pressure_detection: config.enable_memory_pressure_detection,
        memory_pressure_threshold_percent: config.memory_pressure_threshold_percent,
    };
    let limiter = ResourceLimiter::instance_seeded(&limiter_config);
    let token = match limiter.acquire(config.memory_limit_mb) {
        Ok(token) => token,
        Err(err) => return ExecutionResult::failed(err, elapsed_ms(start)),
    };
    let _guard = TokenGuard { limiter, token };

    let tools: Vec<ToolDefinition> = match &tooling {
        Some(t) => {
            let builder = ContextBuilder::new(t.search, DescriptorCache::global());
            match builder.build_tools(t.intent, t.manifest, t.descriptors, t.top_k) {
                Ok(tools) => tools,
                Err(message) => return ExecutionResult::failed(StructuredError::PermissionError { message }, elapsed_ms(start)),
            }
        }
        None => Vec::new(),
    };

    let wrapped = maybe_wrap_last_expr(code);
    let allowed_set = Arc::new(build_allowed_set(&config.allowed_modules));
    let output = OutputBuffer::new(config.max_output_bytes);
    let timeout = Duration::from_millis(config.timeout_ms);

    let invoke_tx: Option<InvokeSender> = tooling.as_ref().map(|t| {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_dispatch_loop(rx, Arc::clone(&t.invoker));
        tx
    });

    let (response_tx, response_rx) = std::sync::mpsc::sync_channel::<VmRunResult>(1);
    let work = WorkItem {
        wrapped_source: wrapped.clone(),
        output: output.clone(),
        allowed_set: Arc::clone(&allowed_set),
        context: context.clone(),
        tools: tools.clone(),
        invoke_tx: invoke_tx.clone(),
        tool_call_timeout: DEFAULT_TOOL_CALL_TIMEOUT,
        response: response_tx,
    };

    let vm_result: Option<VmRunResult> = if InterpreterPool::global().dispatch_work(work, POOL_CHECKOUT_TIMEOUT) {
        match response_rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    } else {
        let output_for_vm = output.clone();
        let allowed_set_inner = (*allowed_set).clone();
        let wrapped_for_vm = wrapped.clone();
        let context_for_vm = context.clone();
        let tools_for_vm = tools.clone();
        let timeout_ns = timeout.as_nanos() as u64;
        run_with_timeout(
            move || {
                let interp = build_interpreter(allowed_set_inner, output_for_vm.clone());
                run_code(
                    &interp,
                    &wrapped_for_vm,
                    output_for_vm,
                    &context_for_vm,
                    &tools_for_vm,
                    invoke_tx,
                    DEFAULT_TOOL_CALL_TIMEOUT,
                )
            },
            timeout_ns,
        )
    };

    let home = std::env::var("HOME").ok();
    let ctx = ParseContext {
        roots: &config.allowed_read_paths,
        home: home.as_deref(),
        timeout_ms: config.timeout_ms,
    };

    let result = match vm_result {
        Some(_) if output.is_limit_exceeded() => ExecutionResult::failed(
            output_limit_error(crate::output::OutputLimitExceeded {
                limit_bytes: config.max_output_bytes,
            }),
            elapsed_ms(start),
        ),
        Some(vm_result) => match vm_result.error {
            Some(vm_error) => ExecutionResult::failed(translate_vm_error(vm_error, &ctx), elapsed_ms(start)),
            None => ExecutionResult::ok(vm_result.return_value, elapsed_ms(start)),
        },
        None => ExecutionResult::failed(timeout_error(&ctx), elapsed_ms(start)),
    };

    if result.success {
        ResultCache::global().set(key, result.clone());
    }

    result
}

fn empty_context() -> &'static Context {
    use std::sync::OnceLock;
    static EMPTY: OnceLock<Context> = OnceLock::new();
    EMPTY.get_or_init(Context::new)
}

// ── Source-level expression wrapper ──────────────────────────────────────────

/// Heuristically wrap the last line of `code` as `__result__ = <last_line>`
/// if the last line looks like a bare value-producing expression rather than a
/// statement or a side-effecting call.
///
/// # Rules (in order of evaluation)
///
/// The last non-empty line is **left unchanged** when:
/// - The code is empty or all whitespace/blank lines.
/// - The last non-empty line is indented (inside a block).
/// - The last non-empty line starts with any statement keyword from the
///   architecture §4.7 list:
///   `def`, `class`, `if`, `elif`, `else`, `for`, `while`, `try`, `except`,
///   `finally`, `with`, `import`, `from`, `return`, `pass`, `break`,
///   `continue`, `raise`, `assert`, `del`, `global`, `nonlocal`, `yield`,
///   `async`, `await`, `match`, `case`, `@`.
/// - The last non-empty line contains a bare assignment `=` (not `==`, `!=`,
///   `<=`, `>=`, or compound assignments like `+=`, `-=`, etc.).
/// - The last non-empty line looks like a function/method call (the trimmed
///   line ends with `)` at balanced nesting depth).
///
/// Otherwise the line is wrapped as `__result__ = <line>`.
///
/// # Examples
/// ```
/// use codecell_exec::maybe_wrap_last_expr;
/// assert_eq!(maybe_wrap_last_expr("1 + 1"), "__result__ = 1 + 1");
/// assert_eq!(maybe_wrap_last_expr("x = 1\nprint(x)"), "x = 1\nprint(x)");
/// assert_eq!(maybe_wrap_last_expr(""), "");
/// ```
pub fn maybe_wrap_last_expr(code: &str) -> String {
    // Statement-keyword prefixes that indicate the last line is NOT a bare expr.
    // Architecture §4.7 list.
    const STATEMENT_PREFIXES: &[&str] = &[
        "def ",
        "class ",
        "if ",
        "elif ",
        "else:",
        "else :",
        "for ",
        "while ",
        "try:",
        "try :",
        "except",
        "finally:",
        "finally :",
        "with ",
        "import ",
        "from ",
        "return ",
        "return\n",
        "return\r",
        "pass",
        "break",
        "continue",
        "raise ",
        "raise\n",
        "raise\r",
        "assert ",
        "del ",
        "global ",
        "nonlocal ",
        "yield ",
        "yield\n",
        "yield\r",
        "async ",
        "await ",
        "match ",
        "case ",
        "@",
        "#",
    ];

    // Bare keywords that stand alone on a line (no trailing space needed).
    const BARE_KEYWORDS: &[&str] = &[
        "pass", "break", "continue", "return", "yield", "raise", "else:", "finally:", "try:",
    ];

    // Split on newlines preserving structure.
    let lines: Vec<&str> = code.split('\n').collect();

    // Find index of last non-empty (non-whitespace) line.
    let last_idx = match lines
        .iter()
        .enumerate()
        .rev()
        .find(|(_, l)| !l.trim().is_empty())
        .map(|(i, _)| i)
    {
        Some(i) => i,
        None => return code.to_string(), // empty or all whitespace
    };

    let original_last_line = lines[last_idx];
    let last_line = original_last_line.trim();

    // If indented, it's inside a block — don't wrap.
    let leading = original_last_line.len() - original_last_line.trim_start().len();
    if leading > 0 {
        return code.to_string();
    }

    // Check bare keyword exact matches.
    for kw in BARE_KEYWORDS {
        if last_line == *kw {
            return code.to_string();
        }
    }

    // Check statement keyword prefixes.
    for prefix in STATEMENT_PREFIXES {
        if last_line.starts_with(prefix) {
            return code.to_string();
        }
    }

    // Check assignment: line contains bare '=' (not '==', '!=', '<=', '>=',
    // compound '+=', '-=', etc.).
    if looks_like_assignment(last_line) {
        return code.to_string();
    }

    // Check if last line is a call expression (ends with ')' at balanced depth).
    // Function calls are statement-like and typically produce None; don't wrap.
    if is_call_statement(last_line) {
        return code.to_string();
    }

    // Wrap: replace the last non-empty line.
    let formatted = format!("__result__ = {last_line}");
    let mut new_lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    new_lines[last_idx] = formatted;
    new_lines.join("\n")
}

/// Returns `true` if `line` looks like an assignment statement.
///
/// Detects:
/// - Simple assignment: `x = expr` (bare `=` not preceded by `!<>=+-*/&|^~`)
/// - Augmented assignment: `x += expr`, `x -= expr`, `x *= expr`, etc.
///   (a `=` preceded by `+`, `-`, `*`, `/`, `%`, `&`, `|`, `^`, `~` counts as
///   augmented assignment, which is still an assignment statement)
///
/// Does NOT match:
/// - `==`, `!=`, `<=`, `>=` comparisons
fn looks_like_assignment(line: &str) -> bool {
    let chars: Vec<char> = line.chars().collect();
    let n = chars.len();

    for i in 0..n {
        if chars[i] != '=' {
            continue;
        }
        // '==' — skip (comparison, not assignment)
        if i + 1 < n && chars[i + 1] == '=' {
            continue;
        }
        // Check character before '='.
        if i > 0 {
            let prev = chars[i - 1];
            match prev {
                // '!', '<', '>' or '=' before '=' → comparison operator, skip.
                '!' | '<' | '>' | '=' => continue,
                // '+', '-', '*', '/', '%', '&', '|', '^', '~' before '=' → augmented assignment.
                // Augmented assignment IS a statement — return true.
                '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | '~' => return true,
                // Anything else before '=' → simple assignment.
                _ => return true,
            }
        } else {
            // '=' at position 0 with no preceding char — bare '=' (unusual but treat as assignment).
            return true;
        }
    }
    false
}

/// Returns `true` if `line` is a top-level function/method call expression.
///
/// Heuristic: the trimmed line ends with `)` and the parentheses are balanced.
/// This catches `print(x)`, `foo.bar(baz)`, `f()`, etc.
/// It does NOT catch expressions like `(1 + 2)` — those should be wrapped.
///
/// The rule: if the line ends with `)` at balanced depth AND there is a `(`
/// somewhere in the line, it's treated as a call statement.
fn is_call_statement(line: &str) -> bool {
    if !line.ends_with(')') {
        return false;
    }

    // Check parentheses are balanced.
    let mut depth: i32 = 0;
    for ch in line.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
    }
    if depth != 0 {
        return false;
    }

    // The line ends with ')' and parens are balanced.
    // Distinguish call expressions from grouping expressions like `(1 + 2)`.
    // A call has an identifier (or attribute access) immediately before `(`.
    // A bare `(expr)` grouping starts with `(`.
    // Heuristic: if the first non-whitespace character is `(`, it's grouping.
    if line.starts_with('(') {
        return false;
    }

    true
}

// ── Tests ─────────────────────────────────────────────────────────────────────
