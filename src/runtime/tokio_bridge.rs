//! Bridge between weaver threads and a tokio runtime.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::core::{Weaver, WeaverEvent};

/// Runs the blocking halves of the bridge on a tokio runtime's blocking pool.
#[derive(Clone)]
pub struct TokioBridge {
    handle: Arc<tokio::runtime::Handle>,
}

impl TokioBridge {
    /// Create a bridge from a tokio runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Bridge onto the runtime the caller runs in, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }

    /// Forward events from a weaver subscription into a tokio channel.
    ///
    /// Forwarding stops when either side is closed.
    #[must_use]
    pub fn forward_events(&self, rx: Receiver<WeaverEvent>) -> UnboundedReceiver<WeaverEvent> {
        let (tx, out) = unbounded_channel();
        self.handle.spawn_blocking(move || {
            for event in rx {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        out
    }

    /// Wait for the weaver to become idle without blocking a runtime worker.
    pub async fn finish(&self, weaver: &Weaver) {
        let shared = Arc::clone(weaver.shared());
        if let Err(err) = self
            .handle
            .spawn_blocking(move || shared.finish(None))
            .await
        {
            tracing::warn!(error = %err, "finish task did not complete");
        }
    }
}

impl Weaver {
    /// Async [`Weaver::finish`], using the current tokio runtime.
    ///
    /// # Panics
    ///
    /// When called outside a tokio runtime.
    pub async fn finish_async(&self) {
        let shared = Arc::clone(self.shared());
        if let Err(err) = tokio::task::spawn_blocking(move || shared.finish(None)).await {
            tracing::warn!(error = %err, "finish task did not complete");
        }
    }
}
