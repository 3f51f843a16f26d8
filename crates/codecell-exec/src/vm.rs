//! RustPython VM lifecycle for codecell-exec.
//!
//! This module owns all RustPython API calls. It:
//! - Creates a fresh interpreter per execution with stdlib, import hook, and output capture.
//! - Installs the caller's context as pre-bound globals and tool proxies as callables
//!   (spec §4.6.1 "worker setup").
//! - Compiles and executes Python source, returning a [`VmRunResult`].
//! - Extracts structured errors (SyntaxError, RuntimeError, ModuleNotAllowed) as
//!   [`VmError`] — the parser module (`parser.rs`) is responsible for translating
//!   these into the public [`crate::types::StructuredError`] taxonomy.
//! - Extracts the `__result__` return value from the scope after execution, as a
//!   JSON [`serde_json::Value`] rather than a repr string.
//!
//! ## Import Hook (Option C: `builtins.__import__` override)
//!
//! RustPython 0.3 resolves imports by calling `builtins.__import__`. The init
//! closure in `Interpreter::with_init` runs before `vm.initialize()`, so
//! `builtins.__import__` is not yet set. We install the import hook at the
//! beginning of `run_code` (inside `interp.enter()`), which runs after full
//! initialization. This is Option C.
//!
//! ## Output Capture
//!
//! We replace `sys.stdout` and `sys.stderr` with minimal Python-level objects
//! whose `write(s)` method delegates to [`OutputBuffer::write_stdout`] /
//! [`OutputBuffer::write_stderr`]. The replacement also happens at the start of
//! each `run_code` call (inside `enter()`).
//!
//! ## Tool proxies
//!
//! Each selected tool is installed as a module-level callable that marshals its
//! arguments to JSON and blocks on [`crate::rpc::call_and_wait`] — a genuine
//! message-passing round trip to the host, not a direct function call (spec
//! §4.6.2).
//!
//! ## Zero unsafe blocks
//!
//! This file contains no `unsafe` code. All RustPython integration uses the safe
//! public Rust API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustpython_vm::{
    builtins::PyBaseExceptionRef,
    compiler::Mode,
    function::FuncArgs,
    scope::Scope,
    AsObject, Interpreter, PyObjectRef, PyResult, TryFromObject, VirtualMachine,
};
use serde_json::Value;

use crate::context_builder::ToolDefinition;
use crate::modules::check_module_allowed;
use crate::output::{OutputBuffer, OutputLimitExceeded};
use crate::rpc::{call_and_wait, InvokeSender, ToolCall, ToolReply};
use crate::types::Context;

// ── Public (crate-visible) types ─────────────────────────────────────────────

/// VM-level outcomes, distinct from the public [`crate::types::StructuredError`]
/// taxonomy. `parser.rs` bridges these (plus timeout/output-limit information
/// gathered outside the VM) into the public error shape (spec §4.6.3).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum VmError {
    SyntaxError { message: String, line: u32, col: u32 },
    ModuleNotAllowed { module_name: String },
    RuntimeError { message: String, traceback: String },
}

/// Internal result of running code in the VM. An intermediate representation
/// before the parser constructs a public [`crate::types::ExecutionResult`].
pub(crate) struct VmRunResult {
    pub stdout: String,
    pub stderr: String,
    pub return_value: Option<Value>,
    pub error: Option<VmError>,
}

/// A configured interpreter bundled with its module allowlist.
pub(crate) struct PyInterp {
    inner: Interpreter,
    allowed_set: Arc<HashSet<String>>,
}

impl PyInterp {
    /// Replace the allowed-module set for this interpreter. Called by the pool
    /// slot thread before each `run_code()` call when the caller supplies a
    /// custom allowlist.
    pub(crate) fn set_allowed_set(&mut self, allowed_set: HashSet<String>) {
        self.allowed_set = Arc::new(allowed_set);
    }

    /// Execute a closure with access to the VirtualMachine. Used by pool.rs for
    /// sys.modules inspection and reset.
    pub(crate) fn with_vm<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&VirtualMachine) -> R,
    {
        self.inner.enter(f)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Return candidate filesystem paths for a Python standard library installation.
fn python_stdlib_paths() -> Vec<String> {
    let candidates = [
        "/usr/local/lib/python3.13",
        "/usr/local/lib/python3.12",
        "/usr/local/lib/python3.11",
        "/usr/local/lib/python3.10",
        "/usr/local/lib/python3.9",
        "/usr/lib/python3",
        "/usr/lib/python3.12",
        "/usr/lib/python3.11",
        "/usr/lib/python3.10",
    ];
    candidates
        .iter()
        .filter(|p| std::path::Path::new(p).is_dir())
        .map(|p| p.to_string())
        .collect()
}

/// Create a new RustPython interpreter with stdlib configured.
pub(crate) fn build_interpreter(allowed_set: HashSet<String>, _output: OutputBuffer) -> PyInterp {
    let mut settings = rustpython_vm::Settings::default();
    for path in python_stdlib_paths() {
        settings.path_list.push(path);
    }

    let inner = Interpreter::with_init(settings, move |vm| {
        vm.add_native_modules(rustpython_stdlib::get_module_inits());

        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
import _json

class JSONDecodeError(ValueError):
    def __init__(self, msg, doc, pos):
        errmsg = '%s: line %d column %d (char %d)' % (
            msg,
            doc.count('\n', 0, pos) + 1,
            pos - doc.rfind('\n', 0, pos),
            pos,
        )
        ValueError.__init__(self, errmsg)
        self.msg = msg
        self.doc = doc
        self.pos = pos
        self.lineno = doc.count('\n', 0, pos) + 1
        self.colno = pos - doc.rfind('\n', 0, pos)

class JSONEncoder:
    def __init__(self, skipkeys=False, ensure_ascii=True,
                 check_circular=True, allow_nan=True, sort_keys=False,
                 indent=None, separators=None, default=None):
        self.skipkeys = skipkeys
        self.ensure_ascii = ensure_ascii
        self.check_circular = check_circular
        self.allow_nan = allow_nan
        self.sort_keys = sort_keys
        self.indent = indent
        if separators is not None:
            self.item_separator, self.key_separator = separators
        elif indent is not None:
            self.item_separator = ','
            self.key_separator = ': '
        else:
            self.item_separator = ', '
            self.key_separator = ': '
        self.default = default if default is not None else self._default

    def _default(self, obj):
        raise TypeError(f'Object of type {type(obj).__name__} is not JSON serializable')

    def encode(self, o):
        return _simple_encode(o, self)

    def iterencode(self, o, _one_shot=False):
        return iter([self.encode(o)])

def _simple_encode(obj, encoder):
    if obj is None:
        return 'null'
    elif obj is True:
        return 'true'
    elif obj is False:
        return 'false'
    elif isinstance(obj, int):
        return str(obj)
    elif isinstance(obj, float):
        if obj != obj:
            return 'NaN'
        elif obj == float('inf'):
            return 'Infinity'
        elif obj == float('-inf'):
            return '-Infinity'
        return repr(obj)
    elif isinstance(obj, str):
        return _encode_str(obj)
    elif isinstance(obj, (list, tuple)):
        if not obj:
            return '[]'
        items = [_simple_encode(v, encoder) for v in obj]
        return '[' + ', '.join(items) + ']'
    elif isinstance(obj, dict):
        if not obj:
            return '{}'
        keys = sorted(obj.keys()) if encoder.sort_keys else obj.keys()
        items = [_encode_str(str(k)) + ': ' + _simple_encode(v, encoder) for k, v in ((k, obj[k]) for k in keys)]
        return '{' + ', '.join(items) + '}'
    else:
        return encoder.default(obj)

def _encode_str(s):
    result = ['"']
    for c in s:
        if c == '"':
            result.append('\\"')
        elif c == '\\':
            result.append('\\\\')
        elif c == '\n':
            result.append('\\n')
        elif c == '\r':
            result.append('\\r')
        elif c == '\t':
            result.append('\\t')
        elif ord(c) < 0x20:
            result.append('\\u{:04x}'.format(ord(c)))
        else:
            result.append(c)
    result.append('"')
    return ''.join(result)

def dumps(obj, *, skipkeys=False, ensure_ascii=True, check_circular=True,
          allow_nan=True, cls=None, indent=None, separators=None, default=None,
          sort_keys=False, **kw):
    encoder = (cls or JSONEncoder)(
        skipkeys=skipkeys, ensure_ascii=ensure_ascii,
        check_circular=check_circular, allow_nan=allow_nan,
        indent=indent, separators=separators, default=default,
        sort_keys=sort_keys, **kw
    )
    return encoder.encode(obj)

def dump(obj, fp, **kwargs):
    fp.write(dumps(obj, **kwargs))

def loads(s, *, cls=None, object_hook=None, parse_float=None,
          parse_int=None, parse_constant=None, object_pairs_hook=None, **kw):
    if isinstance(s, (bytes, bytearray)):
        s = s.decode('utf-8')
    decoder = JSONDecoder(object_hook=object_hook, object_pairs_hook=object_pairs_hook,
                          parse_float=parse_float, parse_int=parse_int, strict=True)
    return decoder.decode(s)

def load(fp, **kwargs):
    return loads(fp.read(), **kwargs)

class JSONDecoder:
    def __init__(self, *, object_hook=None, parse_float=None, parse_int=None,
                 parse_constant=None, strict=True, object_pairs_hook=None):
        self.object_hook = object_hook
        self.object_pairs_hook = object_pairs_hook
        self.parse_float = parse_float or float
        self.parse_int = parse_int or int
        self.strict = strict
        self.scan_once = _json.make_scanner(self)

    def decode(self, s, _w=None):
        obj, end = self.raw_decode(s, 0)
        end = len(s.lstrip()) if not s else end
        return obj

    def raw_decode(self, s, idx=0):
        try:
            obj, end = self.scan_once(s, idx)
        except StopIteration as err:
            raise JSONDecodeError("Expecting value", s, err.value) from None
        return obj, end
"#,
            module_name = "json"
        ));
    });

    PyInterp {
        inner,
        allowed_set: Arc::new(allowed_set),
    }
}

/// Execute Python source code in the VM, with `context` pre-bound as globals
/// and `tools` installed as callables dispatching over `invoke_tx`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_code(
    interp: &PyInterp,
    code_str: &str,
    output: OutputBuffer,
    context: &Context,
    tools: &[ToolDefinition],
    invoke_tx: Option<InvokeSender>,
    tool_call_timeout: Duration,
) -> VmRunResult {
    let allowed_set = Arc::clone(&interp.allowed_set);

    interp.inner.enter(|vm| {
        install_import_hook(vm, &allowed_set);
        install_output_capture(vm, output.clone());

        let code = match vm.compile(code_str, Mode::Exec, "<string>".to_owned()) {
            Ok(c) => c,
            Err(e) => {
                let (stdout, stderr) = output.into_strings();
                return VmRunResult {
                    stdout,
                    stderr,
                    return_value: None,
                    error: Some(extract_syntax_error(e)),
                };
            }
        };

        let scope = vm.new_scope_with_builtins();
        let _ = scope.globals.set_item("__name__", vm.ctx.new_str("__main__").into(), vm);

        install_context_globals(vm, &scope, context);
        if let Some(tx) = invoke_tx {
            install_tool_proxies(vm, &scope, tools, tx, tool_call_timeout);
        }

        let exec_result = vm.run_code_obj(code, scope.clone());
        let (stdout, stderr) = output.into_strings();

        match exec_result {
            Ok(_) => {
                let return_value = extract_return_value(vm, &scope);
                VmRunResult {
                    stdout,
                    stderr,
                    return_value,
                    error: None,
                }
            }
            Err(exc) => {
                if let Some(module_err) = extract_module_not_allowed(vm, &exc) {
                    return VmRunResult {
                        stdout,
                        stderr,
                        return_value: None,
                        error: Some(module_err),
                    };
                }
                VmRunResult {
                    stdout,
                    stderr,
                    return_value: None,
                    error: Some(extract_runtime_error(vm, exc)),
                }
            }
        }
    })
}

// ── Context + tool proxy installation ────────────────────────────────────────

/// Bind every `context` entry as a global in `scope`, converted from JSON to a
/// native Python object (spec §4.5 "context is pre-bound, not a dict lookup").
fn install_context_globals(vm: &VirtualMachine, scope: &Scope, context: &Context) {
    for (key, value) in context {
        let py_value = json_value_to_pyobject(vm, value);
        let _ = scope.globals.set_item(key.as_str(), py_value, vm);
    }
}

/// Install one callable per tool. Calling it from Python marshals the keyword
/// arguments to JSON, sends a [`ToolCall`] over `invoke_tx`, blocks for the
/// reply, and either returns the JSON-converted result or raises a Python
/// exception describing the [`crate::types::StructuredError`] (spec §4.6.2).
fn install_tool_proxies(
    vm: &VirtualMachine,
    scope: &Scope,
    tools: &[ToolDefinition],
    invoke_tx: InvokeSender,
    timeout: Duration,
) {
    for tool in tools {
        let server = tool.server.clone();
        let method_name = tool.method_name.clone();
        let py_name = tool.name.clone();
        let tx = invoke_tx.clone();

        let proxy = vm.new_function(py_name.clone(), move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let mut arguments = serde_json::Map::new();
            for (key, value) in args.kwargs.iter() {
                arguments.insert(key.clone(), pyobject_to_json_value(vm, value));
            }
            let call = ToolCall {
                server: server.clone(),
                method_name: method_name.clone(),
                arguments: Value::Object(arguments),
            };
            match call_and_wait(&tx, call, timeout) {
                ToolReply::Ok(value) => Ok(json_value_to_pyobject(vm, &value)),
                ToolReply::Err(err) => Err(vm_error_to_py_exception(vm, &err)),
            }
        });

        let _ = scope.globals.set_item(py_name.as_str(), proxy.into(), vm);
    }
}

/// Raise a Python `RuntimeError` carrying the structured error's message — the
/// caller-facing `StructuredError` itself is reconstructed later by `parser.rs`
/// from the execution outcome, not parsed back out of this exception text.
fn vm_error_to_py_exception(vm: &VirtualMachine, err: &crate::types::StructuredError) -> rustpython_vm::builtins::PyBaseExceptionRef {
    let message = match err {
        crate::types::StructuredError::PermissionError { message } => message.clone(),
        crate::types::StructuredError::TimeoutError { message, .. } => message.clone(),
        crate::types::StructuredError::RuntimeError { message, .. } => message.clone(),
        other => format!("tool call failed: {other:?}"),
    };
    vm.new_exception_msg(vm.ctx.exceptions.runtime_error.to_owned(), message)
}

// ── JSON <-> PyObject conversion ─────────────────────────────────────────────

/// Convert a JSON value into a native Python object using the VM's context
/// constructors (`new_int`, `new_float`, `new_str`, `new_list`, `new_dict`).
pub(crate) fn json_value_to_pyobject(vm: &VirtualMachine, value: &Value) -> PyObjectRef {
    match value {
        Value::Null => vm.ctx.none(),
        Value::Bool(b) => vm.ctx.new_bool(*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                vm.ctx.new_int(i).into()
            } else {
                vm.ctx.new_float(n.as_f64().unwrap_or(0.0)).into()
            }
        }
        Value::String(s) => vm.ctx.new_str(s.as_str()).into(),
        Value::Array(items) => {
            let elements: Vec<PyObjectRef> = items.iter().map(|v| json_value_to_pyobject(vm, v)).collect();
            vm.ctx.new_list(elements).into()
        }
        Value::Object(map) => {
            let dict = vm.ctx.new_dict();
            for (k, v) in map {
                let _ = dict.set_item(k.as_str(), json_value_to_pyobject(vm, v), vm);
            }
            dict.into()
        }
    }
}

/// Convert a Python object back into JSON, using the generic mapping/iterator
/// protocol (`keys`/`__getitem__`, `__iter__`/`__next__`) rather than type
/// downcasts, mirroring the sys.modules-walking idiom in `pool.rs`.
pub(crate) fn pyobject_to_json_value(vm: &VirtualMachine, obj: &PyObjectRef) -> Value {
    if vm.is_none(obj) {
        return Value::Null;
    }

    if let Ok(keys) = vm.call_method(obj, "keys", ()) {
        return pymapping_to_json_object(vm, obj, &keys);
    }

    if obj.class().is(vm.ctx.types.list_type.as_ref()) || obj.class().is(vm.ctx.types.tuple_type.as_ref()) {
        return pyiterable_to_json_array(vm, obj);
    }

    if obj.class().is(vm.ctx.types.bool_type.as_ref()) {
        if let Ok(b) = bool::try_from_object(vm, obj.clone()) {
            return Value::Bool(b);
        }
    }

    if obj.class().is(vm.ctx.types.int_type.as_ref()) {
        if let Ok(i) = i64::try_from_object(vm, obj.clone()) {
            return Value::from(i);
        }
    }

    if obj.class().is(vm.ctx.types.float_type.as_ref()) {
        if let Ok(f) = f64::try_from_object(vm, obj.clone()) {
            return serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null);
        }
    }

    if let Ok(s) = obj.str(vm) {
        return Value::String(s.as_str().to_owned());
    }

    Value::Null
}

fn pymapping_to_json_object(vm: &VirtualMachine, obj: &PyObjectRef, keys: &PyObjectRef) -> Value {
    let mut map = serde_json::Map::new();
    let Ok(iter) = vm.call_method(keys, "__iter__", ()) else {
        return Value::Object(map);
    };
    loop {
        match vm.call_method(&iter, "__next__", ()) {
            Ok(key) => {
                let key_str = key.str(vm).map(|s| s.as_str().to_owned()).unwrap_or_default();
                if let Ok(value) = vm.call_method(obj, "__getitem__", (key,)) {
                    map.insert(key_str, pyobject_to_json_value(vm, &value));
                }
            }
            Err(_) => break,
        }
    }
    Value::Object(map)
}

fn pyiterable_to_json_array(vm: &VirtualMachine, obj: &PyObjectRef) -> Value {
    let mut items = Vec::new();
    let Ok(iter) = vm.call_method(obj, "__iter__", ()) else {
        return Value::Array(items);
    };
    loop {
        match vm.call_method(&iter, "__next__", ()) {
            Ok(item) => items.push(pyobject_to_json_value(vm, &item)),
            Err(_) => break,
        }
    }
    Value::Array(items)
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn is_user_code_import(args: &FuncArgs, vm: &VirtualMachine) -> bool {
    let globals = match args.args.get(1) {
        Some(g) => g,
        None => return true,
    };

    if vm.is_none(globals) {
        return true;
    }

    if let Ok(name_val) = vm.call_method(globals, "get", (vm.ctx.new_str("__name__"),)) {
        if !vm.is_none(&name_val) {
            if let Ok(name_str) = name_val.str(vm) {
                let name = name_str.as_str();
                if !name.is_empty() && name != "__main__" {
                    return false;
                }
                if name == "__main__" {
                    return true;
                }
            }
        }
    }

    let file_val = vm.call_method(globals, "get", (vm.ctx.new_str("__file__"),)).ok();

    match file_val {
        None => true,
        Some(v) if vm.is_none(&v) => false,
        Some(v) => v
            .str(vm)
            .map(|s| {
                let file = s.as_str();
                file == "<string>" || file == "<stdin>" || file == "<module>" || file.is_empty()
            })
            .unwrap_or(true),
    }
}

fn is_module_allowed(module_name: &str, allowed_set: &HashSet<String>) -> bool {
    if check_module_allowed(module_name, allowed_set).is_ok() {
        return true;
    }

    if let Some(dot_pos) = module_name.find('.') {
        let parent = &module_name[..dot_pos];
        if check_module_allowed(parent, allowed_set).is_ok() {
            return true;
        }
    }

    false
}

fn install_import_hook(vm: &VirtualMachine, allowed_set: &Arc<HashSet<String>>) {
    const SAVED_IMPORT_ATTR: &str = "__pyexec_original_import__";

    let original_import = if let Ok(saved) = vm.builtins.get_attr(SAVED_IMPORT_ATTR, vm) {
        saved
    } else {
        let real_original = match vm.builtins.get_attr("__import__", vm) {
            Ok(f) => f,
            Err(_) => return,
        };
        let _ = vm.builtins.set_attr(SAVED_IMPORT_ATTR, real_original.clone(), vm);
        real_original
    };

    #[allow(clippy::arc_with_non_send_sync)]
    let original_import = Arc::new(original_import);
    let allowed_set = Arc::clone(allowed_set);

    let hook = vm.new_function(
        "__import__",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let module_name: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();

            let level: i64 = args
                .args
                .get(4)
                .and_then(|o| i64::try_from_object(vm, o.clone()).ok())
                .unwrap_or(0);

            let full_module_name = if level > 0 {
                let package = args.args.get(1).and_then(|globals| {
                    vm.call_method(globals, "get", (vm.ctx.new_str("__package__"),))
                        .ok()
                        .filter(|v| !vm.is_none(v))
                        .and_then(|v| v.str(vm).ok())
                        .map(|s| s.as_str().to_owned())
                });

                if let Some(pkg) = package {
                    let base = if level > 1 {
                        let parts: Vec<&str> = pkg.split('.').collect();
                        let keep = parts.len().saturating_sub((level - 1) as usize);
                        parts[..keep].join(".")
                    } else {
                        pkg.clone()
                    };

                    if module_name.is_empty() {
                        base
                    } else {
                        format!("{base}.{module_name}")
                    }
                } else {
                    module_name.clone()
                }
            } else {
                module_name.clone()
            };

            let importing_from_user_code = is_user_code_import(&args, vm);

            if importing_from_user_code {
                let allowed = is_module_allowed(&full_module_name, &allowed_set);
                if !allowed {
                    let deny_name = if full_module_name != module_name {
                        full_module_name.clone()
                    } else {
                        module_name.clone()
                    };
                    return Err(vm.new_import_error(format!("ModuleNotAllowed:{deny_name}"), vm.ctx.new_str(deny_name)));
                }
            }

            original_import.call(args, vm)
        },
    );

    let _ = vm.builtins.set_attr("__import__", hook, vm);
}

fn install_output_capture(vm: &VirtualMachine, output: OutputBuffer) {
    let stdout_buf = output.clone();
    let stderr_buf = output;

    let stdout_obj = build_writer_object(vm, stdout_buf, true);
    let stderr_obj = build_writer_object(vm, stderr_buf, false);

    let _ = vm.sys_module.set_attr("stdout", stdout_obj, vm);
    let _ = vm.sys_module.set_attr("stderr", stderr_obj, vm);
}

fn build_writer_object(vm: &VirtualMachine, output: OutputBuffer, is_stdout: bool) -> PyObjectRef {
    let output = Arc::new(Mutex::new(output));
    let output_clone = Arc::clone(&output);

    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let data: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();

            let buf = output.lock().expect("OutputBuffer mutex poisoned");
            let write_result = if is_stdout {
                buf.write_stdout(data.as_bytes())
            } else {
                buf.write_stderr(data.as_bytes())
            };

            match write_result {
                Ok(()) => Ok(vm.ctx.new_int(data.len()).into()),
                Err(OutputLimitExceeded { limit_bytes }) => Err(vm.new_exception_msg(
                    vm.ctx.exceptions.runtime_error.to_owned(),
                    format!("Output limit exceeded: {limit_bytes} bytes"),
                )),
            }
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let _buf = output_clone.lock().expect("OutputBuffer mutex poisoned");
            Ok(vm.ctx.none())
        },
    );

    let ns = vm.new_module("<writer>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    let _ = ns.set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}

fn extract_syntax_error(err: rustpython_vm::compiler::CompileError) -> VmError {
    let (row, col) = err.python_location();
    VmError::SyntaxError {
        message: err.to_string(),
        line: row as u32,
        col: col as u32,
    }
}

fn extract_module_not_allowed(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> Option<VmError> {
    let msg = exc.as_object().str(vm).ok()?;
    let s = msg.as_str();
    s.strip_prefix("ModuleNotAllowed:").map(|name| VmError::ModuleNotAllowed {
        module_name: name.to_string(),
    })
}

fn extract_runtime_error(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> VmError {
    let message = exc
        .as_object()
        .str(vm)
        .map(|s| s.as_str().to_owned())
        .unwrap_or_else(|_| "Unknown runtime error".to_owned());

    let mut traceback = String::new();
    let _ = vm.write_exception(&mut traceback, &exc);

    VmError::RuntimeError { message, traceback }
}

/// `__getitem__` (not `.get()`) so that a binding the code explicitly set to
/// `None` (`x = None; x`) is distinguished from no `__result__` binding at
/// all: both look identical through `.get()`, but only `__getitem__` raises
/// when the key is absent, letting that case alone collapse to `None`.
fn extract_return_value(vm: &VirtualMachine, scope: &Scope) -> Option<Value> {
    let locals_obj: PyObjectRef = scope.locals.as_ref().to_owned();

    let result_obj = vm
        .call_method(&locals_obj, "__getitem__", (vm.ctx.new_str("__result__"),))
        .ok()?;

    Some(pyobject_to_json_value(vm, &result_obj))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
