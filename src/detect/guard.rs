//! Uniform error boundary for perception adapters.
//!
//! Every adapter call goes through an [`AdapterGuard`]. Errors and panics are
//! converted into the caller's fallback value and counted; nothing propagates
//! into the pipeline. The first failure per adapter is logged at warn, the
//! rest at debug.

use anyhow::Result;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct AdapterGuard {
    name: String,
    failures: AtomicU64,
}

impl AdapterGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of failed calls so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Runs `call`, returning `fallback()` if it errors or panics.
    pub fn call<T>(&self, fallback: impl FnOnce() -> T, call: impl FnOnce() -> Result<T>) -> T {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.record_failure(&format!("{:#}", e));
                fallback()
            }
            Err(payload) => {
                self.record_failure(&format!("panic: {}", panic_message(payload.as_ref())));
                fallback()
            }
        }
    }

    fn record_failure(&self, message: &str) {
        let previous = self.failures.fetch_add(1, Ordering::Relaxed);
        if previous == 0 {
            log::warn!("{} adapter failed, using fallback: {}", self.name, message);
        } else {
            log::debug!(
                "{} adapter failed ({} failures), using fallback: {}",
                self.name,
                previous + 1,
                message
            );
        }
    }
}

/// Best-effort text from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
