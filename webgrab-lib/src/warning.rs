//! Side channel for per-URL batch failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Warnings kept before the oldest ones are discarded.
pub const MAX_WARNINGS: usize = 1000;

/// Collects warnings raised while a batch runs.
///
/// Every warning is logged through `tracing` and kept until taken, so
/// callers can inspect failures without the batch call itself failing.
/// Only the latest `capacity` messages are kept.
#[derive(Debug, Clone)]
pub struct WarningSink {
    enabled: Arc<AtomicBool>,
    capacity: usize,
    messages: Arc<Mutex<VecDeque<String>>>,
}

impl Default for WarningSink {
    fn default() -> Self {
        Self::new(true)
    }
}

impl WarningSink {
    pub fn new(enabled: bool) -> Self {
        Self::with_capacity(enabled, MAX_WARNINGS)
    }

    pub fn with_capacity(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            capacity: capacity.max(1),
            messages: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Turn warnings on or off. Disabled warnings are neither logged nor kept.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record a warning.
    pub fn warn<M: Into<String>>(&self, message: M) {
        if !self.is_enabled() {
            return;
        }
        let message = message.into();
        tracing::warn!("{}", message);
        if let Ok(mut messages) = self.messages.lock() {
            if messages.len() >= self.capacity {
                messages.pop_front();
            }
            messages.push_back(message);
        }
    }

    /// Snapshot of the recorded warnings.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drain the recorded warnings.
    pub fn take(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|mut m| m.drain(..).collect())
            .unwrap_or_default()
    }
}
