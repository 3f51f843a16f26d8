//! Result Parser (spec §4.6.3): the single place that turns a worker's raw
//! outcome — a [`crate::vm::VmRunResult`], a timeout, or an output-limit hit —
//! into the public [`StructuredError`] taxonomy. Every error message and
//! traceback that crosses this boundary is routed through [`crate::sanitize`]
//! first, so host filesystem paths never reach a caller.

use crate::output::OutputLimitExceeded;
use crate::sanitize::{sanitize, sanitize_stack_trace};
use crate::types::StructuredError;
use crate::vm::VmError;

/// Extra facts gathered outside the VM that the parser needs to classify an
/// outcome correctly: sandbox roots for path redaction, and the configured
/// wall-clock budget for the timeout message.
pub(crate) struct ParseContext<'a> {
    pub roots: &'a [String],
    pub home: Option<&'a str>,
    pub timeout_ms: u64,
}

/// Bridge a VM-internal error into the public taxonomy.
pub(crate) fn translate_vm_error(error: VmError, ctx: &ParseContext<'_>) -> StructuredError {
    match error {
        VmError::SyntaxError { message, line, col } => StructuredError::SyntaxError {
            message: sanitize(&message, ctx.roots, ctx.home),
            line,
            col,
        },
        VmError::ModuleNotAllowed { module_name } => StructuredError::PermissionError {
            message: format!("import of module '{module_name}' is not permitted"),
        },
        VmError::RuntimeError { message, traceback } => StructuredError::RuntimeError {
            message: sanitize(&message, ctx.roots, ctx.home),
            stack: Some(sanitize_stack_trace(&traceback, ctx.roots, ctx.home)),
        },
    }
}

/// Build the `StructuredError` for a worker that never reported back before
/// `ctx.timeout_ms` elapsed (pool checkout exhaustion or VM thread
/// abandonment — spec §4.4 "thread-abandonment timeout pattern").
pub(crate) fn timeout_error(ctx: &ParseContext<'_>) -> StructuredError {
    StructuredError::TimeoutError {
        message: format!("execution exceeded the {}ms timeout", ctx.timeout_ms),
        limit_ms: ctx.timeout_ms,
    }
}

/// Build the `StructuredError` for a worker that wrote past its combined
/// stdout+stderr byte budget.
pub(crate) fn output_limit_error(limit: OutputLimitExceeded) -> StructuredError {
    StructuredError::ResourceLimitError {
        limit_type: "OUTPUT_BYTES".to_string(),
        message: format!("combined stdout/stderr output exceeded {} bytes", limit.limit_bytes),
        current: limit.limit_bytes as u64,
        max: limit.limit_bytes as u64,
    }
}
