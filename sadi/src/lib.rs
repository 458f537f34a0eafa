//! SADI semantic web service discovery.
//!
//! Given a set of input nodes and a working RDF graph, find every service in
//! a SADI registry that can consume those nodes: first by direct match on
//! the nodes' semantic types, then by running each service's input-instance
//! query against the graph. Discovery runs on a background worker, reports
//! progress as a stream of [`DiscoveryEvent`]s, and can be cancelled at any
//! time.

pub mod config;
pub mod discovery;
pub mod graph;
pub mod matcher;
pub mod query;
pub mod registry;
pub mod resolver;

pub use config::{ConfigError, DiscoveryConfig};
pub use discovery::{
    CancellationFlag, DiscoveryEngine, DiscoveryEvent, DiscoveryOutcome, DiscoverySession,
    EventSink, ResultSet,
};
pub use graph::{Graph, GraphError, InputNode, RdfFormat, SharedGraph, Term, Triple};
pub use matcher::InstanceMatcher;
pub use registry::{
    InMemoryRegistry, PropertyRestriction, RegistryClient, RegistryError, ServiceDescriptor,
    SparqlRegistry,
};
pub use resolver::{ResolveError, TypeResolver, TypeSource};
