//! Integration coverage for the persistent interpreter pool: checkout/checkin
//! bookkeeping, safe concurrent use, and state isolation between calls.

use codecell_exec::{execute, Context, ExecutorConfig, InterpreterPool};

/// After init (and any concurrent activity settles), every slot is idle; a
/// single call checks one out and returns it.
#[test]
fn test_pool_checkout_checkin_single() {
    let pool = InterpreterPool::global();
    let expected_size = pool.size();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
    while pool.idle_count() < expected_size && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert_eq!(pool.idle_count(), expected_size);

    let result = execute("1 + 1", Context::new(), None, &ExecutorConfig::default());
    assert!(result.success, "unexpected error: {:?}", result.error);
    assert_eq!(result.result, Some(serde_json::json!(2)));

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(
        pool.idle_count(),
        expected_size,
        "slot should be checked back in after the call completes"
    );
}

/// 16 threads each running 10 calls concurrently: zero errors, no thread
/// ever blocked on a slot long enough to fail.
#[test]
fn test_pool_concurrent_16_threads() {
    use std::sync::{Arc, Barrier};

    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|thread_idx| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let mut errors = 0usize;
                for iteration in 0..10 {
                    // Vary the context per call so the result cache can't
                    // short-circuit the pool dispatch this test exercises.
                    let mut context = Context::new();
                    context.insert("n".to_string(), serde_json::json!(thread_idx * 10 + iteration));
                    let result = execute(
                        "sum(i * i for i in range(100 + n))",
                        context,
                        None,
                        &ExecutorConfig::default(),
                    );
                    if !result.success {
                        errors += 1;
                    }
                }
                errors
            })
        })
        .collect();

    let total_errors: usize = handles.into_iter().map(|h| h.join().expect("thread panicked")).sum();
    assert_eq!(total_errors, 0, "{total_errors} out of 160 executions had errors");
}

/// A name bound in one call must not leak into the next: the pool resets
/// `sys.modules`-adjacent global state between checkouts of the same slot.
#[test]
fn test_pool_state_isolation() {
    let config = ExecutorConfig::default();

    let r1 = execute("x = 42", Context::new(), None, &config);
    assert!(r1.success, "first call failed: {:?}", r1.error);

    let r2 = execute("x", Context::new(), None, &config);
    assert!(!r2.success, "expected NameError, got a successful result: {:?}", r2.result);
    match r2.error {
        Some(codecell_exec::StructuredError::RuntimeError { ref message, .. }) => {
            assert!(
                message.contains("name") && message.contains("'x'"),
                "expected a NameError about 'x', got: {message}"
            );
        }
        other => panic!(
            "expected RuntimeError (NameError) on the second call, got: {other:?} \
             -- this indicates state isolation failed and x leaked between calls"
        ),
    }
}
