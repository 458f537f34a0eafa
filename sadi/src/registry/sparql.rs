//! Client for a SADI registry exposed as a SPARQL 1.1 endpoint.
//!
//! Queries go out as `GET <endpoint>?query=...` and come back as SPARQL JSON
//! results. Query construction and result parsing are plain functions so they
//! can be tested without a live endpoint.

use super::{PropertyRestriction, RegistryClient, RegistryError, ServiceDescriptor};
use crate::config::RegistryConfig;
use reqwest::blocking::Client as BlockingHttpClient;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

const PREFIXES: &str = "\
PREFIX mygrid: <http://www.mygrid.org.uk/mygrid-moby-service#>
PREFIX sadi: <http://sadiframework.org/ontologies/sadi.owl#>
PREFIX owl: <http://www.w3.org/2002/07/owl#>
";

/// Per-service attributes shared by the find and list queries.
const SERVICE_PATTERN: &str = "\
  ?serviceURI mygrid:hasOperation ?op .
  OPTIONAL { ?serviceURI mygrid:hasServiceNameText ?name }
  OPTIONAL { ?serviceURI mygrid:hasServiceDescriptionText ?description }
  OPTIONAL { ?serviceURI sadi:inputInstanceQuery ?instanceQuery }
";

const INPUT_CLASS_PATTERN: &str = "?op mygrid:inputParameter ?input . ?input mygrid:objectType ?inputClassURI .";

/// One binding in a SPARQL JSON result row.
#[derive(Debug, Deserialize)]
pub struct BindingValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

pub type Row = HashMap<String, BindingValue>;

#[derive(Debug, Deserialize)]
struct SparqlResults {
    results: ResultBindings,
}

#[derive(Debug, Deserialize)]
struct ResultBindings {
    bindings: Vec<Row>,
}

pub struct SparqlRegistry {
    endpoint: Url,
    client: BlockingHttpClient,
}

impl SparqlRegistry {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RegistryError::Unavailable(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        let client = BlockingHttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        Ok(Self { endpoint, client })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        Self::new(&config.endpoint, config.timeout())
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Run a SELECT and return its rows.
    pub fn select(&self, query: &str) -> Result<Vec<Row>, RegistryError> {
        log::debug!("[registry] querying {}", self.endpoint);
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("query", query)])
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .send()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Unavailable(format!(
                "{} answered with status {}",
                self.endpoint, status
            )));
        }
        let body = response
            .text()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        parse_results(&body)
    }
}

impl RegistryClient for SparqlRegistry {
    fn find_by_input_class(&self, classes: &[String]) -> Result<Vec<ServiceDescriptor>, RegistryError> {
        match build_find_query(classes) {
            Some(query) => Ok(parse_services(&self.select(&query)?)),
            None => Ok(Vec::new()),
        }
    }

    fn list_all(&self, offset: usize, limit: usize) -> Result<Vec<ServiceDescriptor>, RegistryError> {
        let rows = self.select(&build_list_query(offset, limit))?;
        Ok(parse_services(&rows))
    }

    fn augment_with_property_restrictions(
        &self,
        service: ServiceDescriptor,
    ) -> Result<ServiceDescriptor, RegistryError> {
        let query = build_restriction_query(&service.uri)
            .ok_or_else(|| RegistryError::UnknownService(service.uri.clone()))?;
        let rows = self.select(&query)?;
        Ok(service.with_restrictions(parse_restrictions(&rows)))
    }

    fn service_count(&self) -> Result<usize, RegistryError> {
        let rows = self.select(&build_count_query())?;
        parse_count(&rows)
    }
}

/// Render `iri` as `<iri>`, or `None` if it cannot be written safely.
pub fn iri_term(iri: &str) -> Option<String> {
    let unsafe_char = |c: char| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\');
    if iri.is_empty() || iri.chars().any(unsafe_char) || Url::parse(iri).is_err() {
        return None;
    }
    Some(format!("<{}>", iri))
}

/// Query for services whose input class is one of `classes`. `None` when no
/// class survives sanitizing.
pub fn build_find_query(classes: &[String]) -> Option<String> {
    let values: Vec<String> = classes
        .iter()
        .filter_map(|c| {
            let term = iri_term(c);
            if term.is_none() {
                log::debug!("[registry] ignoring unusable class IRI '{}'", c);
            }
            term
        })
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(format!(
        "{}SELECT ?serviceURI ?name ?description ?inputClassURI ?instanceQuery\n\
         WHERE {{\n\
         \x20 VALUES ?inputClassURI {{ {} }}\n\
         {}\x20 {}\n\
         }}",
        PREFIXES,
        values.join(" "),
        SERVICE_PATTERN,
        INPUT_CLASS_PATTERN
    ))
}

/// One page of the catalog. The page is cut on distinct services, not rows.
pub fn build_list_query(offset: usize, limit: usize) -> String {
    format!(
        "{}SELECT ?serviceURI ?name ?description ?inputClassURI ?instanceQuery\n\
         WHERE {{\n\
         \x20 {{ SELECT DISTINCT ?serviceURI WHERE {{ ?serviceURI mygrid:hasOperation ?anyOp }}\n\
         \x20   ORDER BY ?serviceURI LIMIT {} OFFSET {} }}\n\
         {}\x20 OPTIONAL {{ {} }}\n\
         }}\n\
         ORDER BY ?serviceURI",
        PREFIXES, limit, offset, SERVICE_PATTERN, INPUT_CLASS_PATTERN
    )
}

pub fn build_restriction_query(service_uri: &str) -> Option<String> {
    let service = iri_term(service_uri)?;
    Some(format!(
        "{}SELECT ?onProperty ?valuesFrom\n\
         WHERE {{\n\
         \x20 {} mygrid:hasOperation ?op .\n\
         \x20 ?op sadi:decoratesWith ?restriction .\n\
         \x20 ?restriction owl:onProperty ?onProperty .\n\
         \x20 OPTIONAL {{ ?restriction owl:someValuesFrom ?valuesFrom }}\n\
         }}",
        PREFIXES, service
    ))
}

pub fn build_count_query() -> String {
    format!(
        "{}SELECT (COUNT(DISTINCT ?serviceURI) AS ?count)\n\
         WHERE {{ ?serviceURI mygrid:hasOperation ?op }}",
        PREFIXES
    )
}

pub fn parse_results(body: &str) -> Result<Vec<Row>, RegistryError> {
    let results: SparqlResults =
        serde_json::from_str(body).map_err(|e| RegistryError::Malformed(e.to_string()))?;
    Ok(results.results.bindings)
}

fn value<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).map(|b| b.value.as_str())
}

/// Fold result rows into descriptors, one per service URI in first-seen
/// order. Rows without a service URI are ignored.
pub fn parse_services(rows: &[Row]) -> Vec<ServiceDescriptor> {
    let mut services: Vec<ServiceDescriptor> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(uri) = value(row, "serviceURI") else {
            continue;
        };
        let position = match index.get(uri) {
            Some(&i) => i,
            None => {
                let name = value(row, "name").unwrap_or(uri);
                services.push(ServiceDescriptor::new(uri, name));
                index.insert(uri.to_string(), services.len() - 1);
                services.len() - 1
            }
        };
        let service = &mut services[position];
        if service.description.is_empty() {
            if let Some(description) = value(row, "description") {
                service.description = description.to_string();
            }
        }
        if let Some(class) = value(row, "inputClassURI") {
            if !service.input_classes.iter().any(|c| c == class) {
                service.input_classes.push(class.to_string());
            }
        }
        if service.input_instance_query.is_none() {
            service.input_instance_query = value(row, "instanceQuery").map(str::to_string);
        }
    }
    services
}

pub fn parse_restrictions(rows: &[Row]) -> Vec<PropertyRestriction> {
    let mut restrictions: Vec<PropertyRestriction> = Vec::new();
    for row in rows {
        let Some(property) = value(row, "onProperty") else {
            continue;
        };
        let mut restriction = PropertyRestriction::new(property);
        if let Some(class) = value(row, "valuesFrom") {
            restriction = restriction.with_values_from(class);
        }
        if !restrictions.contains(&restriction) {
            restrictions.push(restriction);
        }
    }
    restrictions
}

pub fn parse_count(rows: &[Row]) -> Result<usize, RegistryError> {
    let raw = rows
        .first()
        .and_then(|row| value(row, "count"))
        .ok_or_else(|| RegistryError::Malformed("count query returned no rows".to_string()))?;
    raw.trim()
        .parse::<usize>()
        .map_err(|e| RegistryError::Malformed(format!("bad count '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows(json: &str) -> Vec<Row> {
        parse_results(json).unwrap()
    }

    #[test]
    fn test_find_query_lists_classes() {
        let query = build_find_query(&[
            "http://ex/T1".to_string(),
            "http://ex/bad iri".to_string(),
            "http://ex/T2".to_string(),
        ])
        .unwrap();
        assert!(query.contains("VALUES ?inputClassURI { <http://ex/T1> <http://ex/T2> }"));
        assert!(!query.contains("bad iri"));
        assert!(build_find_query(&["not an iri".to_string()]).is_none());
    }

    #[test]
    fn test_list_query_pages_on_services() {
        let query = build_list_query(50, 25);
        assert!(query.contains("ORDER BY ?serviceURI LIMIT 25 OFFSET 50"));
    }

    #[test]
    fn test_restriction_query_rejects_injection() {
        assert!(build_restriction_query("http://ex/svc> } DROP ALL {").is_none());
        let query = build_restriction_query("http://ex/svc").unwrap();
        assert!(query.contains("<http://ex/svc> mygrid:hasOperation ?op"));
    }

    #[test]
    fn test_parse_services_merges_rows() {
        let rows = rows(
            r#"{"head": {"vars": ["serviceURI", "name", "inputClassURI"]},
                "results": {"bindings": [
                  {"serviceURI": {"type": "uri", "value": "http://ex/s1"},
                   "name": {"type": "literal", "value": "First"},
                   "inputClassURI": {"type": "uri", "value": "http://ex/T1"}},
                  {"serviceURI": {"type": "uri", "value": "http://ex/s2"},
                   "inputClassURI": {"type": "uri", "value": "http://ex/T2"}},
                  {"serviceURI": {"type": "uri", "value": "http://ex/s1"},
                   "name": {"type": "literal", "value": "First"},
                   "inputClassURI": {"type": "uri", "value": "http://ex/T3"},
                   "instanceQuery": {"type": "literal", "value": "SELECT ?input WHERE { ?input a <http://ex/T1> }"}}
                ]}}"#,
        );
        let services = parse_services(&rows);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].uri, "http://ex/s1");
        assert_eq!(services[0].input_classes, vec!["http://ex/T1", "http://ex/T3"]);
        assert!(services[0].input_instance_query.is_some());
        // Missing name falls back to the URI.
        assert_eq!(services[1].name, "http://ex/s2");
    }

    #[test]
    fn test_parse_restrictions_dedups() {
        let rows = rows(
            r#"{"results": {"bindings": [
                  {"onProperty": {"type": "uri", "value": "http://ex/p"},
                   "valuesFrom": {"type": "uri", "value": "http://ex/C"}},
                  {"onProperty": {"type": "uri", "value": "http://ex/p"},
                   "valuesFrom": {"type": "uri", "value": "http://ex/C"}},
                  {"onProperty": {"type": "uri", "value": "http://ex/q"}}
                ]}}"#,
        );
        assert_eq!(
            parse_restrictions(&rows),
            vec![
                PropertyRestriction::new("http://ex/p").with_values_from("http://ex/C"),
                PropertyRestriction::new("http://ex/q"),
            ]
        );
    }

    #[test]
    fn test_parse_count() {
        let rows = rows(
            r#"{"results": {"bindings": [
                  {"count": {"type": "literal", "datatype": "http://www.w3.org/2001/XMLSchema#integer", "value": "412"}}
                ]}}"#,
        );
        assert_eq!(parse_count(&rows).unwrap(), 412);
        assert!(matches!(parse_count(&[]), Err(RegistryError::Malformed(_))));
    }

    #[test]
    fn test_malformed_body() {
        assert!(matches!(
            parse_results("<html>busy</html>"),
            Err(RegistryError::Malformed(_))
        ));
    }
}
