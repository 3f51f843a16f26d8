use std::io::{self, Read};
use std::sync::Arc;

use clap::Parser;
use codecell_exec::{
    execute, Context, DescriptorCache, ExecutorConfig, NoopToolInvoker, NoopVectorSearchProvider,
    RawToolDescriptor, ToolManifest, ToolingContext, DEFAULT_ALLOWED_MODULES,
};

/// Execute untrusted Python code in the codecell sandbox and emit a JSON result.
#[derive(Parser, Debug)]
#[command(name = "codecell-exec-cli", about = "Execute Python code and emit a JSON result")]
struct Args {
    /// Read Python source from file instead of stdin
    #[arg(long)]
    file: Option<std::path::PathBuf>,

    /// Timeout in milliseconds (default: 30000)
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,

    /// Per-worker memory limit in MiB (default: 512)
    #[arg(long, default_value_t = 512)]
    memory_limit_mb: u64,

    /// Comma-separated list of allowed modules (default: standard set)
    #[arg(long)]
    modules: Option<String>,

    /// JSON object injected as pre-bound globals, e.g. '{"user_id": "abc"}'
    #[arg(long)]
    context: Option<String>,

    /// Disable the security validator (admission control). Off by default.
    #[arg(long)]
    no_validate: bool,

    /// Free-text description of what the code is trying to do, used to rank
    /// tools from --tools-manifest. Ignored if --tools-manifest is absent.
    #[arg(long, default_value = "")]
    intent: String,

    /// Path to a JSON file holding an array of tool descriptors
    /// (`{"server", "tool", "description", "input_schema"}`). When present,
    /// the top-ranked tools are exposed to the code as callables; without it
    /// no tool proxies are installed and the RPC dispatch loop never starts.
    #[arg(long)]
    tools_manifest: Option<std::path::PathBuf>,

    /// Max number of tools exposed to the code after ranking (default: 5)
    #[arg(long, default_value_t = 5)]
    top_k: usize,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let code = if let Some(path) = args.file {
        std::fs::read_to_string(&path).unwrap_or_else(|e| {
            eprintln!("Error reading file: {e}");
            std::process::exit(1);
        })
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).unwrap_or_else(|e| {
            eprintln!("Error reading stdin: {e}");
            std::process::exit(1);
        });
        buf
    };

    let context: Context = match args.context {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => {
                eprintln!("--context must be a JSON object");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Invalid --context JSON: {e}");
                std::process::exit(1);
            }
        },
        None => Context::new(),
    };

    let allowed_modules: Vec<String> = match args.modules {
        Some(m) => m.split(',').map(|s| s.trim().to_string()).collect(),
        None => DEFAULT_ALLOWED_MODULES.iter().map(|s| s.to_string()).collect(),
    };

    let config = ExecutorConfig {
        timeout_ms: args.timeout_ms,
        memory_limit_mb: args.memory_limit_mb,
        allowed_modules,
        enable_code_validation: !args.no_validate,
        ..ExecutorConfig::default()
    };

    let descriptors: Vec<RawToolDescriptor> = match args.tools_manifest {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("Error reading --tools-manifest: {e}");
                std::process::exit(1);
            });
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                eprintln!("Invalid --tools-manifest JSON: {e}");
                std::process::exit(1);
            })
        }
        None => Vec::new(),
    };

    let result = if descriptors.is_empty() {
        execute(&code, context, None, &config)
    } else {
        let descriptor_cache = DescriptorCache::global();
        let mut manifest: ToolManifest = ToolManifest::new();
        for descriptor in &descriptors {
            manifest
                .entry(descriptor.server.clone())
                .or_default()
                .push(descriptor_cache.get_or_build(descriptor));
        }
        let search = NoopVectorSearchProvider;
        let tooling = ToolingContext {
            intent: &args.intent,
            manifest: &manifest,
            descriptors: &descriptors,
            search: &search,
            invoker: Arc::new(NoopToolInvoker),
            tool_versions: Default::default(),
            top_k: args.top_k,
        };
        execute(&code, context, Some(tooling), &config)
    };

    let json = serde_json::to_string(&result).expect("ExecutionResult is always serializable");
    println!("{json}");
    // Exit 0 always -- errors are encoded in the JSON, not the exit code.
}
