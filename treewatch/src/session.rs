//! One watched tree: backend, normalizer and the readiness loop.

use std::future::Future;
use std::time::Instant;

use tracing::{debug, info};

use crate::backend::NotifyBackend;
use crate::config::WatchConfig;
use crate::error::Result;
use crate::normalizer::{EventNormalizer, NormalizerStats};
use crate::output::EventSink;

/// A running watch over one root.
pub struct WatchSession<B: NotifyBackend> {
    backend: B,
    normalizer: EventNormalizer,
}

impl<B: NotifyBackend> WatchSession<B> {
    /// Create a session. Call [`WatchSession::start`] to install watches.
    pub fn new(backend: B, config: &WatchConfig) -> Self {
        let normalizer = EventNormalizer::new(&config.root, config.exclusion_filter())
            .with_overflow_policy(config.on_overflow);
        Self {
            backend,
            normalizer,
        }
    }

    /// Walk the tree from the root and install every watch.
    pub fn start(&mut self) -> Result<usize> {
        info!("Setting up watches. This may take a while!");
        let started = Instant::now();

        let installed = self.normalizer.install_root(&mut self.backend)?;

        info!(
            "Watches established. {installed} directories via {} in {:.3}s",
            self.backend.name(),
            started.elapsed().as_secs_f64()
        );
        Ok(installed)
    }

    /// Process everything the backend has buffered as one batch.
    pub fn drain<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        let mut processed = 0;
        loop {
            let events = self.backend.poll_events()?;
            if events.is_empty() {
                break;
            }
            processed += events.len();
            for event in events {
                self.normalizer
                    .process_event(&mut self.backend, event, sink)?;
            }
        }
        self.normalizer.finish_batch(&mut self.backend)?;

        if processed > 0 {
            debug!("Processed batch of {processed} events");
        }
        Ok(processed)
    }

    /// Process batches until `shutdown` completes or an error occurs.
    ///
    /// Shutdown is only observed between batches.
    pub async fn run<S, F>(&mut self, sink: &mut S, shutdown: F) -> Result<()>
    where
        S: EventSink + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                ready = self.backend.readable() => {
                    ready?;
                    self.drain(sink)?;
                }
            }
        }
    }

    /// The normalizer and its registry.
    pub fn normalizer(&self) -> &EventNormalizer {
        &self.normalizer
    }

    /// Counters so far.
    pub fn stats(&self) -> NormalizerStats {
        self.normalizer.stats()
    }

    /// Mutable access to the backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Close the backend session.
    pub fn close(self) -> Result<()> {
        let stats = self.normalizer.stats();
        info!(
            forwarded = stats.forwarded,
            renames = stats.renames,
            exits = stats.exits,
            "Closing watch session"
        );
        self.backend.close()
    }
}
