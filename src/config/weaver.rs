//! Weaver configuration structures.

use std::collections::HashMap;
use std::env;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;

/// Default worker thread stack size (2 MiB).
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

const MIN_STACK_SIZE: usize = 64 * 1024;

/// Configuration of a single weaver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    /// Workers spawned at construction. More are spawned on demand.
    pub min_threads: usize,
    /// Upper bound of the worker inventory.
    pub max_threads: usize,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Worker threads are named `{prefix}-{id}`.
    pub thread_name_prefix: String,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            min_threads: 0,
            max_threads: num_cpus::get(),
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "weaver".into(),
        }
    }
}

impl WeaverConfig {
    /// Same as [`WeaverConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers spawned at construction.
    #[must_use]
    pub const fn with_min_threads(mut self, n: usize) -> Self {
        self.min_threads = n;
        self
    }

    /// Set the inventory limit.
    #[must_use]
    pub const fn with_max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// Fixed-size pool: `n` workers spawned up front, never more.
    #[must_use]
    pub const fn with_worker_count(mut self, n: usize) -> Self {
        self.min_threads = n;
        self.max_threads = n;
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_threads == 0 {
            return Err("max_threads must be greater than 0".into());
        }
        if self.min_threads > self.max_threads {
            return Err(format!(
                "min_threads ({}) must not exceed max_threads ({})",
                self.min_threads, self.max_threads
            ));
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!(
                "thread_stack_size must be at least {MIN_STACK_SIZE} bytes"
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Parse a configuration from JSON and validate it. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a configuration from the environment, after loading a `.env` file if present.
    ///
    /// Reads `WEAVER_MIN_THREADS`, `WEAVER_MAX_THREADS`, `WEAVER_STACK_SIZE` and
    /// `WEAVER_THREAD_NAME`; unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// A variable that does not parse, or a configuration that does not validate.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Some(n) = env_usize("WEAVER_MIN_THREADS")? {
            cfg.min_threads = n;
        }
        if let Some(n) = env_usize("WEAVER_MAX_THREADS")? {
            cfg.max_threads = n;
        }
        if let Some(n) = env_usize("WEAVER_STACK_SIZE")? {
            cfg.thread_stack_size = n;
        }
        if let Ok(prefix) = env::var("WEAVER_THREAD_NAME") {
            cfg.thread_name_prefix = prefix;
        }
        cfg.validate()
            .map_err(|e| anyhow::anyhow!("weaver config from environment invalid: {e}"))?;
        Ok(cfg)
    }
}

fn env_usize(key: &str) -> AppResult<Option<usize>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{key} must be a non-negative integer, got `{raw}`")),
        Err(_) => Ok(None),
    }
}

/// Several independently configured weavers, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeaversConfig {
    /// Map of weaver name to configuration.
    pub weavers: HashMap<String, WeaverConfig>,
}

impl WeaversConfig {
    /// Validate every weaver and require at least one.
    ///
    /// # Errors
    ///
    /// The first invalid weaver, prefixed with its name.
    pub fn validate(&self) -> Result<(), String> {
        if self.weavers.is_empty() {
            return Err("at least one weaver must be defined".into());
        }
        for (name, weaver) in &self.weavers {
            weaver
                .validate()
                .map_err(|e| format!("weaver `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse from JSON and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
