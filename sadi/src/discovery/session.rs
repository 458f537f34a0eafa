//! Runs the engine on a background worker and streams its events.

use super::engine::{DiscoveryEngine, DiscoveryOutcome};
use super::events::{ChannelSink, DiscoveryEvent};
use super::CancellationFlag;
use crate::config::DiscoveryConfig;
use crate::graph::{SharedGraph, Term};
use crate::registry::RegistryClient;
use crate::resolver::TypeResolver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub const DEFAULT_EVENT_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn discovery worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("discovery worker panicked")]
    WorkerPanicked,
}

struct ActiveRun {
    cancel: CancellationFlag,
    worker: JoinHandle<DiscoveryOutcome>,
}

/// Owns at most one discovery run at a time.
pub struct DiscoverySession {
    engine: Arc<DiscoveryEngine>,
    graph: SharedGraph,
    event_buffer: usize,
    backoff: Duration,
    active: Option<ActiveRun>,
}

impl DiscoverySession {
    pub fn new(engine: DiscoveryEngine, graph: SharedGraph) -> Self {
        Self {
            engine: Arc::new(engine),
            graph,
            event_buffer: DEFAULT_EVENT_BUFFER,
            backoff: Duration::from_millis(5),
            active: None,
        }
    }

    pub fn from_config(
        config: &DiscoveryConfig,
        registry: Arc<dyn RegistryClient>,
        resolver: TypeResolver,
        graph: SharedGraph,
    ) -> Self {
        let engine = DiscoveryEngine::new(registry, Arc::new(resolver))
            .with_batch_size(config.discovery.batch_size);
        Self::new(engine, graph).with_event_buffer(config.discovery.event_buffer)
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Start a run for `inputs`. A run still in progress is cancelled and
    /// joined first, so runs never overlap.
    pub fn start(&mut self, inputs: Vec<Term>) -> Result<mpsc::Receiver<DiscoveryEvent>, SessionError> {
        if let Some(previous) = self.active.take() {
            log::debug!("[session] cancelling previous run");
            previous.cancel.cancel();
            previous
                .worker
                .join()
                .map_err(|_| SessionError::WorkerPanicked)?;
        }

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let cancel = CancellationFlag::new();
        let engine = Arc::clone(&self.engine);
        let graph = self.graph.clone();
        let flag = cancel.clone();
        let backoff = self.backoff;

        let worker = std::thread::Builder::new()
            .name("sadi-discovery".to_string())
            .spawn(move || {
                let mut sink = ChannelSink::new(tx, flag.clone()).with_backoff(backoff);
                let outcome = engine.run(&inputs, &graph, &mut sink, &flag);
                log::debug!("[session] worker finished: {:?}", outcome);
                outcome
            })?;

        self.active = Some(ActiveRun { cancel, worker });
        Ok(rx)
    }

    /// Ask the current run to stop at its next checkpoint.
    pub fn cancel(&self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }

    /// Handle to the current run's flag, for cancelling from elsewhere.
    pub fn cancellation(&self) -> Option<CancellationFlag> {
        self.active.as_ref().map(|a| a.cancel.clone())
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|a| !a.worker.is_finished())
            .unwrap_or(false)
    }

    /// Join the current run. `None` if nothing was started.
    pub fn wait(&mut self) -> Result<Option<DiscoveryOutcome>, SessionError> {
        match self.active.take() {
            Some(active) => active
                .worker
                .join()
                .map(Some)
                .map_err(|_| SessionError::WorkerPanicked),
            None => Ok(None),
        }
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            let _ = active.worker.join();
        }
    }
}
