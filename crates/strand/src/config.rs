// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime and queue configuration.

use crate::error::ConfigError;
use crate::queue::{Discipline, Priority};

/// Worker count per priority pool. 0 = available parallelism.
pub const WORKERS_ENV: &str = "STRAND_WORKERS";
/// Stack size in bytes for runtime threads.
pub const STACK_SIZE_ENV: &str = "STRAND_STACK_SIZE";

/// Process-wide runtime settings. Read once, when the runtime starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Threads per priority pool. 0 picks the number of available cores.
    /// Pools add threads temporarily while workers are parked in
    /// `submit_sync`, so even a single worker can wait on its own pool.
    pub workers: usize,
    /// Prefix for thread names (`<prefix>-utility-3`, `<prefix>-main`, ...).
    pub thread_name_prefix: String,
    /// Stack size for runtime threads. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name_prefix: "strand".to_string(),
            stack_size: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `STRAND_WORKERS` / `STRAND_STACK_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(WORKERS_ENV) {
            config.workers = parse_usize(WORKERS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(STACK_SIZE_ENV) {
            let size = parse_usize(STACK_SIZE_ENV, &raw)?;
            if size == 0 {
                return Err(ConfigError::InvalidValue {
                    var: STACK_SIZE_ENV,
                    value: raw,
                    expected: "a positive number of bytes",
                });
            }
            config.stack_size = Some(size);
        }
        Ok(config)
    }

    /// Resolved worker count for one pool.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }

    pub(crate) fn thread_builder(&self, name: String) -> std::thread::Builder {
        let builder = std::thread::Builder::new().name(name);
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

fn parse_usize(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
        expected: "a non-negative integer",
    })
}

/// Settings for a custom queue. Label, discipline and priority are passed
/// through untouched; the label only shows up in `Debug` output and panic
/// messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub label: String,
    pub discipline: Discipline,
    pub priority: Priority,
}

impl QueueConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            discipline: Discipline::Serial,
            priority: Priority::default(),
        }
    }

    pub fn discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}
