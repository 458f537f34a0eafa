//! sadi-discover: find SADI services that accept the given resources.
//!
//! Usage:
//!   sadi-discover [--config FILE] [--graph FILE] [--registry URL | --offline-registry FILE.json]
//!                 [--no-resolve] [--json] [--verbose] NODE...

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sadi::discovery::CancellationFlag;
use sadi::{
    DiscoveryConfig, DiscoveryEvent, DiscoveryOutcome, DiscoverySession, Graph, InMemoryRegistry,
    RdfFormat, RegistryClient, ResultSet, SharedGraph, SparqlRegistry, Term, TypeResolver,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sadi-discover")]
#[command(about = "Discover SADI services that can consume the given resources")]
struct Args {
    /// Input resources (IRIs, `<IRI>` or `_:label`)
    #[arg(required = true, value_name = "NODE")]
    nodes: Vec<String>,

    /// Discovery configuration file (TOML format)
    #[arg(long, env = "SADI_CONFIG")]
    config: Option<PathBuf>,

    /// Seed the working graph from an RDF file (.nt, .ttl or .rdf)
    #[arg(long, value_name = "FILE")]
    graph: Option<PathBuf>,

    /// SPARQL endpoint of the service registry
    #[arg(long, value_name = "URL")]
    registry: Option<String>,

    /// Use a local JSON catalog instead of a remote registry
    #[arg(long, value_name = "FILE.json", conflicts_with = "registry")]
    offline_registry: Option<PathBuf>,

    /// Do not look up types of unknown nodes
    #[arg(long)]
    no_resolve: bool,

    /// Print events and results as JSON lines
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// CLI > config file > defaults
    fn discovery_config(&self) -> anyhow::Result<DiscoveryConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let config = DiscoveryConfig::from_file(path)?;
                info!("Loaded discovery configuration from: {}", path.display());
                config
            }
            None => DiscoveryConfig::default().apply_env(),
        };
        if let Some(endpoint) = &self.registry {
            config.registry.endpoint = endpoint.clone();
        }
        if self.no_resolve {
            config.resolver.dereference = false;
            config.resolver.sadi_resolver = None;
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let directive = if verbose { "sadi=debug" } else { "sadi=info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
    Ok(())
}

fn load_graph(path: Option<&PathBuf>) -> anyhow::Result<SharedGraph> {
    let Some(path) = path else {
        return Ok(SharedGraph::default());
    };
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read graph file {}", path.display()))?;
    let format = RdfFormat::from_path(path).unwrap_or_else(|| RdfFormat::sniff(&document));
    let graph = Graph::from_document(&document, format)
        .with_context(|| format!("invalid {} in {}", format, path.display()))?;
    info!("Loaded {} triples from {}", graph.len(), path.display());
    Ok(SharedGraph::new(graph))
}

fn build_registry(args: &Args, config: &DiscoveryConfig) -> anyhow::Result<Arc<dyn RegistryClient>> {
    match &args.offline_registry {
        Some(path) => {
            let registry = InMemoryRegistry::from_json_file(path)?;
            info!("Using offline registry with {} services", registry.len());
            Ok(Arc::new(registry))
        }
        None => {
            let registry = SparqlRegistry::from_config(&config.registry)?;
            info!("Using registry at {}", registry.endpoint());
            Ok(Arc::new(registry))
        }
    }
}

fn print_event(event: &DiscoveryEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        DiscoveryEvent::ServiceFound { service } => println!("+ {} <{}>", service.name, service.uri),
        DiscoveryEvent::StatusMessage { message } => eprintln!("{}", message),
        DiscoveryEvent::Progress { percent } => tracing::debug!("progress {}%", percent),
    }
    Ok(())
}

/// Drain the event stream, cancelling the run on Ctrl-C.
async fn consume(
    mut events: mpsc::Receiver<DiscoveryEvent>,
    cancel: Option<CancellationFlag>,
    json: bool,
) -> anyhow::Result<ResultSet> {
    let mut results = ResultSet::new();
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event, json)?;
                results.apply(event);
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(e) = signal {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                } else {
                    info!("Interrupted, cancelling discovery");
                }
                interrupted = true;
                if let Some(cancel) = &cancel {
                    cancel.cancel();
                }
            }
        }
    }
    Ok(results)
}

fn print_results(results: &ResultSet, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(results.services())?);
        return Ok(());
    }
    println!();
    for service in results.services() {
        println!("{}\t{}", service.name, service.uri);
        if !service.description.is_empty() {
            println!("\t{}", service.description);
        }
        for restriction in &service.restrictions {
            match &restriction.values_from {
                Some(class) => println!("\t  {} some {}", restriction.on_property, class),
                None => println!("\t  {}", restriction.on_property),
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let config = args.discovery_config()?;
    let graph = load_graph(args.graph.as_ref())?;
    let registry = build_registry(&args, &config)?;
    let resolver = TypeResolver::from_config(&config.resolver)?;
    let inputs = args
        .nodes
        .iter()
        .map(|node| node.parse::<Term>())
        .collect::<Result<Vec<_>, _>>()?;

    let mut session = DiscoverySession::from_config(&config, registry, resolver, graph);
    let events = session.start(inputs)?;

    // The engine uses blocking HTTP clients on its own worker thread; only
    // event consumption runs on the runtime.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")?;
    let results = runtime.block_on(consume(events, session.cancellation(), args.json))?;

    match session.wait()? {
        Some(DiscoveryOutcome::RegistryUnavailable { reason }) => {
            anyhow::bail!("service registry unavailable: {}", reason)
        }
        Some(DiscoveryOutcome::RegistryFailed { reason }) => {
            anyhow::bail!("service registry failed: {}", reason)
        }
        Some(DiscoveryOutcome::Cancelled) => {
            warn!("Discovery cancelled, showing partial results");
        }
        _ => {}
    }
    print_results(&results, args.json)
}
