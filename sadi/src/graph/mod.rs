//! Working graph: the in-memory triple store discovery reads from and
//! imports into.
//!
//! Responsibilities:
//! - Hold the caller's data nodes plus anything fetched during type resolution.
//! - Answer `rdf:type` lookups and single triple-pattern matches.
//! - Be shareable between the foreground and the discovery worker
//!   ([`SharedGraph`]).
//!
//! Insertion order is preserved so query results are deterministic.

pub mod rdf;

pub use rdf::{parse_document, parse_ntriples, ParsedDocument, RdfFormat};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";

/// Errors raised while reading graph data or node identifiers.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("{format} syntax error: {message}")]
    Syntax { format: RdfFormat, message: String },

    #[error("invalid node '{0}': expected an absolute IRI or a blank node label")]
    InvalidNode(String),
}

/// An RDF term. Input nodes are terms too; identity is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Term {
    Iri { value: String },
    Blank { label: String },
    Literal {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lang: Option<String>,
    },
}

/// A user-selected resource handed to discovery.
pub type InputNode = Term;

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri {
            value: value.into(),
        }
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank {
            label: label.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            lang: None,
        }
    }

    pub fn lang_literal(value: impl Into<String>, lang: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            lang: Some(lang.into()),
        }
    }

    /// The IRI string if this term is an IRI.
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri { value } => Some(value),
            _ => None,
        }
    }

}

impl fmt::Display for Term {
    /// N-Triples rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri { value } => write!(f, "<{}>", value),
            Term::Blank { label } => write!(f, "_:{}", label),
            Term::Literal {
                value,
                datatype,
                lang,
            } => {
                write!(f, "\"{}\"", rdf::escape_literal(value))?;
                if let Some(lang) = lang {
                    write!(f, "@{}", lang)
                } else if let Some(datatype) = datatype {
                    write!(f, "^^<{}>", datatype)
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl FromStr for Term {
    type Err = GraphError;

    /// Parse a node as typed by a user: `<iri>`, a bare absolute IRI, or `_:label`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(label) = trimmed.strip_prefix("_:") {
            if label.is_empty() {
                return Err(GraphError::InvalidNode(s.to_string()));
            }
            return Ok(Term::blank(label));
        }
        let candidate = trimmed
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(trimmed);
        match url::Url::parse(candidate) {
            Ok(_) => Ok(Term::iri(candidate)),
            Err(_) => Err(GraphError::InvalidNode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// In-memory triple store with a subject index.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    triples: IndexSet<Triple>,
    by_subject: HashMap<Term, Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from an N-Triples document.
    pub fn from_ntriples(document: &str) -> Result<Self, GraphError> {
        Self::from_document(document, RdfFormat::NTriples)
    }

    /// Build a graph from a whole document; any malformed statement fails it.
    pub fn from_document(document: &str, format: RdfFormat) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        graph.import(parse_document(document, format, None).into_result()?);
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Insert a triple. Returns false if it was already present.
    pub fn insert(&mut self, triple: Triple) -> bool {
        let subject = triple.subject.clone();
        let (index, inserted) = self.triples.insert_full(triple);
        if inserted {
            self.by_subject.entry(subject).or_default().push(index);
        }
        inserted
    }

    /// Merge triples into the graph, returning how many were new.
    pub fn import<I>(&mut self, triples: I) -> usize
    where
        I: IntoIterator<Item = Triple>,
    {
        let mut added = 0;
        for triple in triples {
            if self.insert(triple) {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    /// Triples matching a pattern where `None` is a wildcard.
    pub fn matching<'a>(
        &'a self,
        subject: Option<&'a Term>,
        predicate: Option<&'a Term>,
        object: Option<&'a Term>,
    ) -> Box<dyn Iterator<Item = &'a Triple> + 'a> {
        let filter = move |triple: &&'a Triple| {
            predicate.map_or(true, |p| &triple.predicate == p)
                && object.map_or(true, |o| &triple.object == o)
        };
        match subject {
            Some(subject) => {
                let indices = self
                    .by_subject
                    .get(subject)
                    .map(|v| v.as_slice())
                    .unwrap_or(&[]);
                Box::new(
                    indices
                        .iter()
                        .filter_map(move |&i| self.triples.get_index(i))
                        .filter(filter),
                )
            }
            None => Box::new(self.triples.iter().filter(filter)),
        }
    }

    /// True if the graph holds at least one `rdf:type` statement about `node`.
    pub fn has_type(&self, node: &Term) -> bool {
        let rdf_type = Term::iri(RDF_TYPE);
        let found = self.matching(Some(node), Some(&rdf_type), None).next().is_some();
        found
    }

    /// IRIs of the declared types of `node`, sorted.
    pub fn types_of(&self, node: &Term) -> BTreeSet<String> {
        let rdf_type = Term::iri(RDF_TYPE);
        let types = self
            .matching(Some(node), Some(&rdf_type), None)
            .filter_map(|triple| triple.object.as_iri().map(str::to_string))
            .collect();
        types
    }
}

/// Clonable handle to a graph shared between the foreground and the
/// discovery worker. Lock poisoning is ignored; the graph only ever grows.
#[derive(Debug, Clone, Default)]
pub struct SharedGraph(Arc<RwLock<Graph>>);

impl SharedGraph {
    pub fn new(graph: Graph) -> Self {
        Self(Arc::new(RwLock::new(graph)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge triples under a short-lived write lock.
    pub fn import(&self, triples: Vec<Triple>) -> usize {
        self.write().import(triples)
    }
}

impl From<Graph> for SharedGraph {
    fn from(graph: Graph) -> Self {
        Self::new(graph)
    }
}
