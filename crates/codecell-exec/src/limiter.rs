//! Resource Limiter (spec §4.3): process-wide concurrency + aggregate memory
//! quota, gating every execution before a worker is ever spawned.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::warn;

use crate::types::StructuredError;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// The Limiter's bookkeeping handle for one in-flight execution (spec
/// glossary "Token"). `released` guards `release()` against double-counting.
pub struct Token {
    id: u64,
    memory_limit_mb: u64,
    released: AtomicBool,
}

impl Token {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LimiterStats {
    pub active_executions: u64,
    pub total_executions: u64,
    pub rejected_executions: u64,
    pub current_allocated_memory_mb: u64,
    pub available_slots: u64,
    pub memory_pressure_detected: bool,
}

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    pub max_concurrent_executions: usize,
    pub max_total_memory_mb: u64,
    pub enable_memory_pressure_detection: bool,
    pub memory_pressure_threshold_percent: u8,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            max_total_memory_mb: 3072,
            enable_memory_pressure_detection: true,
            memory_pressure_threshold_percent: 80,
        }
    }
}

struct LimiterState {
    active_count: usize,
    allocated_mb: u64,
    total_executions: u64,
    rejected_executions: u64,
}

pub struct ResourceLimiter {
    config: LimiterConfig,
    state: Mutex<LimiterState>,
    system: Mutex<System>,
}

impl ResourceLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                active_count: 0,
                allocated_mb: 0,
                total_executions: 0,
                rejected_executions: 0,
            }),
            system: Mutex::new(System::new()),
        }
    }

    /// The process-wide singleton (spec §9 "global mutable state via
    /// init/reset singletons").
    pub fn instance() -> &'static ResourceLimiter {
        Self::instance_seeded(&LimiterConfig::default())
    }

    /// The process-wide singleton, seeded from `config` on first touch.
    /// Every execution passes its own quota knobs here, but since the quota
    /// is process-wide the first call to run wins; later calls with a
    /// different `config` observe the already-initialized limits rather than
    /// silently reconfiguring a live accounting structure mid-flight.
    pub fn instance_seeded(config: &LimiterConfig) -> &'static ResourceLimiter {
        static INSTANCE: OnceLock<ResourceLimiter> = OnceLock::new();
        INSTANCE.get_or_init(|| ResourceLimiter::new(config.clone()))
    }

    /// Build and leak a fresh singleton with a specific config. Test-only
    /// (spec §9 "Tests need resetInstance()"); never called on the hot path.
    pub fn instance_with_config(config: LimiterConfig) -> &'static ResourceLimiter {
        Box::leak(Box::new(ResourceLimiter::new(config)))
    }

    pub fn reset_instance(&self) {
        let mut state = self.state.lock().expect("limiter state mutex poisoned");
        state.active_count = 0;
        state.allocated_mb = 0;
        state.total_executions = 0;
        state.rejected_executions = 0;
    }

    pub fn can_acquire(&self, memory_limit_mb: u64) -> bool {
        let state = self.state.lock().expect("limiter state mutex poisoned");
        self.check_locked(&state, memory_limit_mb).is_ok()
    }

    pub fn acquire(&self, memory_limit_mb: u64) -> Result<Token, StructuredError> {
        let mut state = self.state.lock().expect("limiter state mutex poisoned");
        match self.check_locked(&state, memory_limit_mb) {
            Ok(()) => {
                state.active_count += 1;
                state.allocated_mb += memory_limit_mb;
                state.total_executions += 1;
                let id = NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed);
                Ok(Token {
                    id,
                    memory_limit_mb,
                    released: AtomicBool::new(false),
                })
            }
            Err(err) => {
                state.rejected_executions += 1;
                drop(state);
                warn!(error = ?err, "resource limiter rejected acquire");
                Err(err)
            }
        }
    }

    /// Polls roughly every 100ms until a slot frees up or `timeout_ms` elapses.
    pub fn acquire_with_wait(&self, memory_limit_mb: u64, timeout_ms: u64) -> Result<Token, StructuredError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match self.acquire(memory_limit_mb) {
                Ok(token) => return Ok(token),
                Err(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StructuredError::ResourceLimitError {
                            limit_type: "ACQUIRE_TIMEOUT".to_string(),
                            message: format!("timed out after {timeout_ms}ms waiting for a resource slot"),
                            current: 0,
                            max: timeout_ms,
                        });
                    }
                    let remaining = deadline.saturating_duration_since(now);
                    std::thread::sleep(Duration::from_millis(100).min(remaining));
                }
            }
        }
    }

    /// Idempotent: releasing an already-released token is a no-op (spec §8).
    pub fn release(&self, token: &Token) {
        if token.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock().expect("limiter state mutex poisoned");
        state.active_count = state.active_count.saturating_sub(1);
        state.allocated_mb = state.allocated_mb.saturating_sub(token.memory_limit_mb);
    }

    pub fn get_stats(&self) -> LimiterStats {
        let state = self.state.lock().expect("limiter state mutex poisoned");
        LimiterStats {
            active_executions: state.active_count as u64,
            total_executions: state.total_executions,
            rejected_executions: state.rejected_executions,
            current_allocated_memory_mb: state.allocated_mb,
            available_slots: self.config.max_concurrent_executions.saturating_sub(state.active_count) as u64,
            memory_pressure_detected: self.config.enable_memory_pressure_detection
                && self.memory_pressure().unwrap_or(false),
        }
    }

    fn check_locked(&self, state: &LimiterState, memory_limit_mb: u64) -> Result<(), StructuredError> {
        if state.active_count >= self.config.max_concurrent_executions {
            return Err(StructuredError::ResourceLimitError {
                limit_type: "CONCURRENT_EXECUTIONS".to_string(),
                message: "concurrent execution limit reached".to_string(),
                current: state.active_count as u64,
                max: self.config.max_concurrent_executions as u64,
            });
        }
        if state.allocated_mb + memory_limit_mb > self.config.max_total_memory_mb {
            return Err(StructuredError::ResourceLimitError {
                limit_type: "TOTAL_MEMORY".to_string(),
                message: "total memory limit reached".to_string(),
                current: state.allocated_mb,
                max: self.config.max_total_memory_mb,
            });
        }
        if self.config.enable_memory_pressure_detection && self.memory_pressure() == Some(true) {
            return Err(StructuredError::ResourceLimitError {
                limit_type: "MEMORY_PRESSURE".to_string(),
                message: "host memory pressure threshold exceeded".to_string(),
                current: self.config.memory_pressure_threshold_percent as u64,
                max: self.config.memory_pressure_threshold_percent as u64,
            });
        }
        Ok(())
    }

    /// `Some(true)` if used/total >= threshold, `Some(false)` if under, `None`
    /// if the query failed — callers must treat `None` as fail-open.
    fn memory_pressure(&self) -> Option<bool> {
        let mut system = self.system.lock().expect("sysinfo system mutex poisoned");
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let used = system.used_memory();
        let percent = (used as f64 / total as f64) * 100.0;
        Some(percent >= self.config.memory_pressure_threshold_percent as f64)
    }
}
