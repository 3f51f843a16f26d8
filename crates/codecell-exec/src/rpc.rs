//! RPC bridge (spec §4.6.2): tool proxies installed inside a worker never call
//! the host directly. Each call is packaged as an [`Invocation`] and sent over
//! a channel to a host-owned dispatch loop, which replies on an embedded
//! oneshot channel — real message passing across the worker/host boundary,
//! not a synchronous in-process trait call.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::StructuredError;

/// A single tool invocation requested from inside a worker.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub server: String,
    pub method_name: String,
    pub arguments: Value,
}

/// The host's answer to a [`ToolCall`].
#[derive(Debug, Clone)]
pub enum ToolReply {
    Ok(Value),
    Err(StructuredError),
}

/// One message on the worker → host RPC channel: the call plus a private
/// reply channel the dispatch loop uses to answer exactly this call.
pub struct Invocation {
    pub call: ToolCall,
    pub reply: SyncSender<ToolReply>,
}

/// The worker-side handle used to send a [`ToolCall`] to the host.
pub type InvokeSender = Sender<Invocation>;

/// Implemented by the host application to actually perform a tool call
/// (spec §4.6.2 "invocation is delegated to caller-supplied glue"). The
/// crate ships [`NoopToolInvoker`] as a default for contexts with no tools.
pub trait ToolInvoker: Send + Sync {
    fn invoke(&self, call: &ToolCall) -> ToolReply;
}

/// A [`ToolInvoker`] that rejects every call — used when no tools were
/// selected for an execution, or in tests that never need real dispatch.
pub struct NoopToolInvoker;

impl ToolInvoker for NoopToolInvoker {
    fn invoke(&self, call: &ToolCall) -> ToolReply {
        ToolReply::Err(StructuredError::PermissionError {
            message: format!("no tool invoker configured for '{}'", call.method_name),
        })
    }
}

/// Spawn the host-side dispatch loop: reads [`Invocation`]s off `receiver`
/// until the sending half is dropped (worker finished or was abandoned), and
/// replies on each invocation's own oneshot channel.
///
/// Runs on a dedicated thread so a slow or hanging `invoker.invoke` call never
/// blocks the worker's interpreter thread beyond the single call it made.
pub fn spawn_dispatch_loop(
    receiver: Receiver<Invocation>,
    invoker: std::sync::Arc<dyn ToolInvoker>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for invocation in receiver {
            let reply = invoker.invoke(&invocation.call);
            debug!(server = %invocation.call.server, method = %invocation.call.method_name, "dispatched tool call");
            if invocation.reply.send(reply).is_err() {
                warn!("worker dropped reply channel before dispatch loop could respond");
            }
        }
    })
}

/// Worker-side helper: send `call` over `sender` and block for the reply, up
/// to `timeout`. Used by the Python tool-proxy native function (built in
/// `vm.rs`) so a single call can never hang the whole execution past its
/// overall wall-clock budget.
pub fn call_and_wait(sender: &InvokeSender, call: ToolCall, timeout: Duration) -> ToolReply {
    let (reply_tx, reply_rx) = mpsc::sync_channel(1);
    if sender
        .send(Invocation {
            call: call.clone(),
            reply: reply_tx,
        })
        .is_err()
    {
        return ToolReply::Err(StructuredError::RuntimeError {
            message: "RPC dispatch loop is no longer running".to_string(),
            stack: None,
        });
    }
    match reply_rx.recv_timeout(timeout) {
        Ok(reply) => reply,
        Err(_) => ToolReply::Err(StructuredError::TimeoutError {
            message: format!("tool call '{}' timed out", call.method_name),
            limit_ms: timeout.as_millis() as u64,
        }),
    }
}
