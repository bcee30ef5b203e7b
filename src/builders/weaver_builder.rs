//! Fluent construction of weavers, and weavers built from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{WeaverConfig, WeaversConfig};
use crate::core::{EventSink, TracingSink, Weaver, WeaverError};

/// Builder for [`Weaver`]. Sinks are registered before the first worker starts, so they see
/// every thread-created event.
#[derive(Default)]
pub struct WeaverBuilder {
    config: WeaverConfig,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl WeaverBuilder {
    /// Start from [`WeaverConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: WeaverConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
        }
    }

    /// Workers spawned at construction.
    #[must_use]
    pub fn min_threads(mut self, n: usize) -> Self {
        self.config.min_threads = n;
        self
    }

    /// Inventory limit.
    #[must_use]
    pub fn max_threads(mut self, n: usize) -> Self {
        self.config.max_threads = n;
        self
    }

    /// Fixed number of workers.
    #[must_use]
    pub fn worker_count(mut self, n: usize) -> Self {
        self.config = self.config.with_worker_count(n);
        self
    }

    /// Worker stack size in bytes.
    #[must_use]
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.config.thread_stack_size = bytes;
        self
    }

    /// Worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Register an event sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Log every event at debug level.
    #[must_use]
    pub fn with_tracing_sink(self) -> Self {
        self.sink(Arc::new(TracingSink))
    }

    /// Validate the configuration and start the weaver.
    ///
    /// # Errors
    ///
    /// See [`Weaver::new`].
    pub fn build(self) -> Result<Weaver, WeaverError> {
        Weaver::with_sinks(self.config, self.sinks)
    }
}

/// Build one weaver per configured name.
///
/// # Errors
///
/// [`WeaverError::InvalidConfig`] if the configuration does not validate, or the first error
/// of [`Weaver::new`]. Weavers built before the failure are shut down.
pub fn build_weavers(cfg: &WeaversConfig) -> Result<HashMap<String, Weaver>, WeaverError> {
    cfg.validate()
        .map_err(|e| WeaverError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut weavers = HashMap::new();
    for (name, weaver_cfg) in &cfg.weavers {
        let weaver = WeaverBuilder::from_config(weaver_cfg.clone()).build()?;
        tracing::debug!(name = %name, weaver = %weaver.id(), "weaver built from config");
        weavers.insert(name.clone(), weaver);
    }

    Ok(weavers)
}
