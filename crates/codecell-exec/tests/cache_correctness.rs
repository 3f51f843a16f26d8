//! Seed scenario (spec §8): repeated identical `(code, context, tool
//! versions)` triples hit the result cache instead of re-running the worker.

use std::sync::Mutex;

use codecell_exec::{execute, Context, ExecutorConfig, ResultCache};

/// Serializes this binary's tests against the shared global `ResultCache`
/// singleton, since `cargo test` runs tests within one binary in parallel
/// by default.
static TEST_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn test_cache_hit_after_repeated_execution() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    ResultCache::global().clear();

    let code = "sum(i * i for i in range(1000))";
    let config = ExecutorConfig::default();

    for _ in 0..20 {
        let result = execute(code, Context::new(), None, &config);
        assert!(result.success, "unexpected error: {:?}", result.error);
    }

    assert_eq!(
        ResultCache::global().len(),
        1,
        "cache should contain exactly 1 entry after 20 identical executions (got {})",
        ResultCache::global().len()
    );
}

/// A cache hit returns the same result the first call produced, and is fast
/// enough that it clearly skipped re-running the worker.
#[test]
fn test_cache_hit_returns_identical_result_fast() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    ResultCache::global().clear();

    let config = ExecutorConfig::default();
    let first = execute("21 * 2", Context::new(), None, &config);
    assert!(first.success, "unexpected error: {:?}", first.error);
    assert_eq!(first.result, Some(serde_json::json!(42)));

    let start = std::time::Instant::now();
    let second = execute("21 * 2", Context::new(), None, &config);
    let elapsed = start.elapsed();

    assert!(second.success, "unexpected error: {:?}", second.error);
    assert_eq!(second.result, first.result);
    assert!(
        elapsed < std::time::Duration::from_millis(50),
        "cache hit took {elapsed:?}, expected a lookup well under VM-startup latency"
    );
}

/// Distinct contexts for the same code are distinct cache entries.
#[test]
fn test_cache_key_distinguishes_context() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    ResultCache::global().clear();

    let config = ExecutorConfig::default();
    let mut ctx_a = Context::new();
    ctx_a.insert("x".to_string(), serde_json::json!(1));
    let mut ctx_b = Context::new();
    ctx_b.insert("x".to_string(), serde_json::json!(2));

    let result_a = execute("x", ctx_a, None, &config);
    let result_b = execute("x", ctx_b, None, &config);

    assert_eq!(result_a.result, Some(serde_json::json!(1)));
    assert_eq!(result_b.result, Some(serde_json::json!(2)));
    assert_eq!(ResultCache::global().len(), 2);
}

/// A run that ends in an error is never cached, so a subsequent identical
/// call re-runs (and can therefore recover once the underlying condition
/// changes) rather than replaying a stale failure forever.
#[test]
fn test_failed_execution_is_not_cached() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    ResultCache::global().clear();

    let config = ExecutorConfig::default();
    let before = ResultCache::global().len();
    let result = execute("1 / 0", Context::new(), None, &config);
    assert!(!result.success);
    assert_eq!(
        ResultCache::global().len(),
        before,
        "a failed execution must not grow the cache"
    );
}
