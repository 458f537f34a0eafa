//! The two-phase discovery algorithm.
//!
//! 1. Collect the semantic types of every input node, resolving nodes the
//!    working graph knows nothing about.
//! 2. Phase A: ask the registry for services whose input class is one of
//!    those types.
//! 3. Phase B: page through the whole registry and run each remaining
//!    service's input-instance query against the working graph.
//!
//! The engine checks the cancellation flag before every node, batch and
//! service, and never emits a service twice in one run.

use super::events::{found_summary, DiscoveryEvent, EmitError, EventSink};
use super::CancellationFlag;
use crate::graph::{SharedGraph, Term};
use crate::matcher::InstanceMatcher;
use crate::registry::{RegistryClient, RegistryError, ServiceDescriptor};
use crate::resolver::TypeResolver;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Progress reported when the instance-query sweep starts.
pub const SWEEP_BASELINE: u8 = 1;

pub const DIRECT_TYPE_STATUS: &str = "Finding services by direct type...";
pub const INSTANCE_QUERY_STATUS: &str = "Finding services by input instance query...";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DiscoveryOutcome {
    Completed { found: usize },
    Cancelled,
    RegistryUnavailable { reason: String },
    /// The registry answered, but with something the client cannot use.
    RegistryFailed { reason: String },
}

enum Stop {
    Cancelled,
    Registry(RegistryError),
}

impl From<EmitError> for Stop {
    fn from(_: EmitError) -> Self {
        Stop::Cancelled
    }
}

impl From<RegistryError> for Stop {
    fn from(e: RegistryError) -> Self {
        Stop::Registry(e)
    }
}

pub struct DiscoveryEngine {
    registry: Arc<dyn RegistryClient>,
    resolver: Arc<TypeResolver>,
    matcher: InstanceMatcher,
    batch_size: usize,
}

impl DiscoveryEngine {
    pub fn new(registry: Arc<dyn RegistryClient>, resolver: Arc<TypeResolver>) -> Self {
        Self {
            registry,
            resolver,
            matcher: InstanceMatcher::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run discovery for `inputs`. Every event goes to `sink`; the return
    /// value says how the run ended.
    pub fn run(
        &self,
        inputs: &[Term],
        graph: &SharedGraph,
        sink: &mut dyn EventSink,
        cancel: &CancellationFlag,
    ) -> DiscoveryOutcome {
        let mut run = Run {
            engine: self,
            inputs,
            graph,
            sink,
            cancel,
            seen: HashSet::new(),
        };
        match run.execute() {
            Ok(found) => {
                log::info!("[engine] discovery complete: {} services", found);
                DiscoveryOutcome::Completed { found }
            }
            Err(Stop::Cancelled) => {
                log::info!("[engine] discovery cancelled after {} services", run.seen.len());
                DiscoveryOutcome::Cancelled
            }
            Err(Stop::Registry(RegistryError::Unavailable(reason))) => {
                log::warn!("[engine] service registry unavailable: {}", reason);
                let _ = run.sink.emit(DiscoveryEvent::status(format!(
                    "Service registry unavailable: {}",
                    reason
                )));
                DiscoveryOutcome::RegistryUnavailable { reason }
            }
            Err(Stop::Registry(e)) => {
                log::warn!("[engine] service registry failed: {}", e);
                let reason = e.to_string();
                let _ = run.sink.emit(DiscoveryEvent::status(format!(
                    "Service registry returned an unusable response: {}",
                    reason
                )));
                DiscoveryOutcome::RegistryFailed { reason }
            }
        }
    }
}

/// State for one run. The seen set dies with it.
struct Run<'a> {
    engine: &'a DiscoveryEngine,
    inputs: &'a [Term],
    graph: &'a SharedGraph,
    sink: &'a mut dyn EventSink,
    cancel: &'a CancellationFlag,
    seen: HashSet<String>,
}

impl Run<'_> {
    fn execute(&mut self) -> Result<usize, Stop> {
        let types = self.collect_types()?;
        self.direct_match(&types)?;
        self.instance_sweep()?;
        let found = self.seen.len();
        self.emit(DiscoveryEvent::status(found_summary(found)))?;
        Ok(found)
    }

    fn checkpoint(&self) -> Result<(), Stop> {
        if self.cancel.is_cancelled() {
            Err(Stop::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&mut self, event: DiscoveryEvent) -> Result<(), Stop> {
        self.sink.emit(event)?;
        Ok(())
    }

    /// Types of all input nodes, as a multiset in input order.
    fn collect_types(&mut self) -> Result<Vec<String>, Stop> {
        let resolver = &self.engine.resolver;
        let mut types = Vec::new();
        for node in self.inputs {
            self.checkpoint()?;
            if let Some(uri) = node.as_iri() {
                if !resolver.has_known_type(self.graph, node) {
                    self.sink
                        .emit(DiscoveryEvent::status(format!("Resolving {}...", uri)))?;
                    let added = resolver.resolve_and_import(self.graph, node);
                    log::debug!("[engine] resolved {}: {} new triples", uri, added);
                }
            }
            types.extend(resolver.types_of(self.graph, node));
        }
        Ok(types)
    }

    fn direct_match(&mut self, types: &[String]) -> Result<(), Stop> {
        self.checkpoint()?;
        self.emit(DiscoveryEvent::status(DIRECT_TYPE_STATUS))?;
        self.emit(DiscoveryEvent::progress(0))?;
        if types.is_empty() {
            log::debug!("[engine] no input types known, skipping direct match");
            return Ok(());
        }

        let services = self.engine.registry.find_by_input_class(types)?;
        let total = services.len();
        log::debug!("[engine] direct match returned {} services", total);
        for (index, service) in services.into_iter().enumerate() {
            self.checkpoint()?;
            self.report(service)?;
            self.checkpoint()?;
            self.emit(DiscoveryEvent::progress(direct_progress(index + 1, total)))?;
        }
        Ok(())
    }

    fn instance_sweep(&mut self) -> Result<(), Stop> {
        self.checkpoint()?;
        self.emit(DiscoveryEvent::status(INSTANCE_QUERY_STATUS))?;
        self.emit(DiscoveryEvent::progress(SWEEP_BASELINE))?;

        let engine = self.engine;
        let total = match engine.registry.service_count() {
            Ok(total) => total,
            Err(e) => {
                log::debug!("[engine] service count unavailable: {}", e);
                0
            }
        };

        let mut offset = 0;
        let mut progress = SWEEP_BASELINE;
        loop {
            self.checkpoint()?;
            let batch = engine.registry.list_all(offset, engine.batch_size)?;
            let fetched = batch.len();
            for service in batch {
                self.checkpoint()?;
                if self.seen.contains(&service.uri) {
                    continue;
                }
                let matched = {
                    let graph = self.graph.read();
                    engine.matcher.matches(&service, self.inputs, &graph)
                };
                if matched {
                    log::debug!("[engine] {} matches by instance query", service.uri);
                    self.report(service)?;
                }
            }
            offset += fetched;
            progress = progress.max(sweep_progress(offset, total));
            self.checkpoint()?;
            self.emit(DiscoveryEvent::progress(progress))?;
            if fetched < engine.batch_size {
                return Ok(());
            }
        }
    }

    /// Attach restrictions and emit `service` unless it was already reported.
    /// A service whose restrictions cannot be loaded is skipped.
    fn report(&mut self, service: ServiceDescriptor) -> Result<(), Stop> {
        if self.seen.contains(&service.uri) {
            return Ok(());
        }
        let uri = service.uri.clone();
        let service = match self.engine.registry.augment_with_property_restrictions(service) {
            Ok(service) => service,
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(e) => {
                log::warn!("[engine] skipping {}: cannot load property restrictions: {}", uri, e);
                return Ok(());
            }
        };
        self.seen.insert(uri);
        self.emit(DiscoveryEvent::ServiceFound { service })
    }
}

/// round(done / total * 100)
fn direct_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100 + total / 2) / total).min(100) as u8
}

/// Sweep progress from items scanned: 1 + scanned * 98 / total, capped at 99.
/// Stays at the baseline when the registry size is unknown.
fn sweep_progress(scanned: usize, total: usize) -> u8 {
    if total == 0 {
        return SWEEP_BASELINE;
    }
    (1 + scanned.saturating_mul(98) / total).min(99) as u8
}
