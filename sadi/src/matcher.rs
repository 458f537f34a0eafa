//! Decides whether a service's input-instance query selects any of the
//! user's input nodes.

use crate::graph::{Graph, Term};
use crate::query::{translate_input_query, INPUT_VARIABLE};
use crate::registry::ServiceDescriptor;

#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceMatcher;

impl InstanceMatcher {
    pub fn new() -> Self {
        Self
    }

    /// True iff the service's query, run over `graph`, binds `?input` to one
    /// of `inputs`. Services without a query, or with one outside the
    /// supported subset, never match.
    pub fn matches(&self, service: &ServiceDescriptor, inputs: &[Term], graph: &Graph) -> bool {
        let Some(text) = service.input_instance_query.as_deref() else {
            return false;
        };
        let query = match translate_input_query(text) {
            Ok(query) => query,
            Err(e) => {
                log::debug!(
                    "[matcher] cannot translate input query of {}: {}",
                    service.uri,
                    e
                );
                return false;
            }
        };
        // Same result as filtering the projected rows on ?input.
        inputs
            .iter()
            .any(|node| query.has_solution_with(graph, INPUT_VARIABLE, node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RDF_TYPE;

    fn graph() -> Graph {
        Graph::from_ntriples(&format!(
            "<http://ex/n1> <{t}> <http://ex/Protein> .\n\
             <http://ex/n2> <{t}> <http://ex/Gene> .\n",
            t = RDF_TYPE
        ))
        .unwrap()
    }

    fn service(query: Option<&str>) -> ServiceDescriptor {
        let service = ServiceDescriptor::new("http://ex/svc", "Svc");
        match query {
            Some(q) => service.with_input_instance_query(q),
            None => service,
        }
    }

    #[test]
    fn test_no_query_never_matches() {
        let matcher = InstanceMatcher::new();
        assert!(!matcher.matches(&service(None), &[Term::iri("http://ex/n1")], &graph()));
    }

    #[test]
    fn test_match_requires_input_in_node_set() {
        let matcher = InstanceMatcher::new();
        let svc = service(Some(
            "CONSTRUCT { ?input a <http://ex/Protein> } WHERE { ?input a <http://ex/Protein> }",
        ));
        let g = graph();
        assert!(matcher.matches(&svc, &[Term::iri("http://ex/n2"), Term::iri("http://ex/n1")], &g));
        // n1 is a protein in the graph but was not selected.
        assert!(!matcher.matches(&svc, &[Term::iri("http://ex/n2")], &g));
        assert!(!matcher.matches(&svc, &[], &g));
    }

    #[test]
    fn test_untranslatable_query_is_a_non_match() {
        let matcher = InstanceMatcher::new();
        let svc = service(Some("DESCRIBE <http://ex/n1>"));
        assert!(!matcher.matches(&svc, &[Term::iri("http://ex/n1")], &graph()));
    }
}
