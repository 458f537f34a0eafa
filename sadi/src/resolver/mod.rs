//! Type resolution for input nodes.
//!
//! An input node may arrive with no `rdf:type` statements in the working
//! graph. The [`TypeResolver`] asks each configured [`TypeSource`] for a
//! description of the node and merges whatever comes back into the graph.
//! Sources are independent: every one is tried, and a failing source only
//! costs the types it would have contributed.

pub mod http;

pub use http::{SadiResolverSource, UriDereferencer};

use crate::config::ResolverConfig;
use crate::graph::{GraphError, SharedGraph, Term, Triple};
use std::collections::BTreeSet;
use thiserror::Error;

/// Error type for a single source's fetch
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("could not parse document from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: GraphError,
    },

    #[error("cannot resolve '{0}': not an http(s) URI")]
    InvalidUri(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// A place to look up the description of a resource.
pub trait TypeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch triples describing `node`.
    fn fetch(&self, node: &str) -> Result<Vec<Triple>, ResolveError>;
}

/// Best-effort type lookup backed by an ordered list of sources.
#[derive(Default)]
pub struct TypeResolver {
    sources: Vec<Box<dyn TypeSource>>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl TypeSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Assemble the resolver described by configuration: URI dereferencing
    /// first, then the SADI resolver service when one is configured.
    pub fn from_config(config: &ResolverConfig) -> Result<Self, ResolveError> {
        let mut resolver = Self::new();
        if config.dereference {
            resolver = resolver.with_source(UriDereferencer::new(config.timeout())?);
        }
        if let Some(endpoint) = config.sadi_resolver_endpoint() {
            resolver = resolver.with_source(SadiResolverSource::new(endpoint, config.timeout())?);
        }
        Ok(resolver)
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn has_known_type(&self, graph: &SharedGraph, node: &Term) -> bool {
        graph.read().has_type(node)
    }

    /// Query every source for `node` and import the results. Failures are
    /// logged and swallowed. Returns the number of new triples.
    pub fn resolve_and_import(&self, graph: &SharedGraph, node: &Term) -> usize {
        let Some(uri) = node.as_iri() else {
            log::debug!("[resolver] skipping non-IRI node {}", node);
            return 0;
        };

        let mut imported = 0;
        for source in &self.sources {
            match source.fetch(uri) {
                Ok(triples) => {
                    let fetched = triples.len();
                    let added = graph.import(triples);
                    log::debug!(
                        "[resolver] {} returned {} triples for {} ({} new)",
                        source.name(),
                        fetched,
                        uri,
                        added
                    );
                    imported += added;
                }
                Err(e) => {
                    log::warn!("[resolver] {} failed for {}: {}", source.name(), uri, e);
                }
            }
        }
        imported
    }

    pub fn types_of(&self, graph: &SharedGraph, node: &Term) -> BTreeSet<String> {
        graph.read().types_of(node)
    }
}
