//! Structured queries over the working graph.
//!
//! SADI services may advertise an *input-instance query*: usually a SPARQL
//! `CONSTRUCT` whose WHERE clause selects the resources the service accepts
//! as `?input`. This module parses the basic-graph-pattern subset of SPARQL
//! those queries use (grammar in `sparql.pest`). It translates them into an
//! executable [`SelectQuery`], and evaluates that against a
//! [`Graph`](crate::graph::Graph) (see [`eval`]).

pub mod eval;

pub use eval::Solution;

use crate::graph::{rdf, Term, RDF_TYPE, XSD_DECIMAL, XSD_INTEGER};
use pest::iterators::Pair;
use pest::Parser;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Variable every input-instance query must bind.
pub const INPUT_VARIABLE: &str = "input";

#[derive(pest_derive::Parser)]
#[grammar = "query/sparql.pest"]
struct SparqlParser;

/// Error type for query parsing and translation failures
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("undeclared prefix '{0}:'")]
    UnknownPrefix(String),

    #[error("invalid IRI '{iri}': {message}")]
    InvalidIri { iri: String, message: String },

    #[error("invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("query does not project ?{0}")]
    NotProjected(String),

    #[error("WHERE pattern never mentions ?{0}")]
    Unbound(String),

    #[error("empty WHERE pattern")]
    EmptyPattern,
}

impl From<pest::error::Error<Rule>> for QueryError {
    fn from(e: pest::error::Error<Rule>) -> Self {
        QueryError::Syntax(e.to_string())
    }
}

/// A position in a triple pattern. Query blank nodes are kept as variables
/// named `_:label`, which gives them SPARQL's existential meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternTerm {
    Var(String),
    Const(Term),
}

impl PatternTerm {
    fn is_var_named(&self, name: &str) -> bool {
        matches!(self, PatternTerm::Var(v) if v == name)
    }
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternTerm::Var(name) if name.starts_with("_:") => write!(f, "{}", name),
            PatternTerm::Var(name) => write!(f, "?{}", name),
            PatternTerm::Const(term) => write!(f, "{}", term),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
}

impl TriplePattern {
    pub fn mentions(&self, var: &str) -> bool {
        self.subject.is_var_named(var)
            || self.predicate.is_var_named(var)
            || self.object.is_var_named(var)
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Vars(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryForm {
    Select {
        distinct: bool,
        projection: Projection,
    },
    Construct {
        template: Vec<TriplePattern>,
    },
}

/// A parsed query with all prefixed names and relative IRIs expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub form: QueryForm,
    pub pattern: Vec<TriplePattern>,
}

/// An executable SELECT over a basic graph pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub distinct: bool,
    pub projection: Projection,
    pub pattern: Vec<TriplePattern>,
}

impl SelectQuery {
    /// Parse a SELECT query. CONSTRUCT queries are rejected here; use
    /// [`translate_input_query`] for those.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let parsed = parse_query(text)?;
        match parsed.form {
            QueryForm::Select {
                distinct,
                projection,
            } => Ok(SelectQuery {
                distinct,
                projection,
                pattern: parsed.pattern,
            }),
            QueryForm::Construct { .. } => Err(QueryError::Syntax(
                "expected a SELECT query".to_string(),
            )),
        }
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        match &self.projection {
            Projection::All => write!(f, "*")?,
            Projection::Vars(vars) => {
                let rendered: Vec<String> = vars.iter().map(|v| format!("?{}", v)).collect();
                write!(f, "{}", rendered.join(" "))?;
            }
        }
        writeln!(f, " WHERE {{")?;
        for pattern in &self.pattern {
            writeln!(f, "  {}", pattern)?;
        }
        write!(f, "}}")
    }
}

/// Parse a query in the supported subset.
pub fn parse_query(text: &str) -> Result<ParsedQuery, QueryError> {
    let mut pairs = SparqlParser::parse(Rule::query, text)?;
    let query = pairs
        .next()
        .ok_or_else(|| QueryError::Syntax("empty query".to_string()))?;
    Builder::default().query(query)
}

/// Translate a service's declared input-instance query into an executable
/// SELECT projecting `?input`.
///
/// CONSTRUCT queries keep their WHERE pattern and drop the template. SELECT
/// queries are accepted when they project `?input` or `*`.
pub fn translate_input_query(text: &str) -> Result<SelectQuery, QueryError> {
    let parsed = parse_query(text)?;
    let (distinct, projection) = match parsed.form {
        QueryForm::Construct { .. } => (true, Projection::Vars(vec![INPUT_VARIABLE.to_string()])),
        QueryForm::Select {
            distinct,
            projection,
        } => {
            let projects_input = match &projection {
                Projection::All => true,
                Projection::Vars(vars) => vars.iter().any(|v| v == INPUT_VARIABLE),
            };
            if !projects_input {
                return Err(QueryError::NotProjected(INPUT_VARIABLE.to_string()));
            }
            (distinct, projection)
        }
    };
    if parsed.pattern.is_empty() {
        return Err(QueryError::EmptyPattern);
    }
    if !parsed.pattern.iter().any(|p| p.mentions(INPUT_VARIABLE)) {
        return Err(QueryError::Unbound(INPUT_VARIABLE.to_string()));
    }
    Ok(SelectQuery {
        distinct,
        projection,
        pattern: parsed.pattern,
    })
}

/// Textual form of [`translate_input_query`].
pub fn convert_construct_query(text: &str) -> Result<String, QueryError> {
    Ok(translate_input_query(text)?.to_string())
}

#[derive(Default)]
struct Builder {
    base: Option<Url>,
    prefixes: HashMap<String, String>,
}

impl Builder {
    fn query(mut self, pair: Pair<Rule>) -> Result<ParsedQuery, QueryError> {
        let mut parsed = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::prologue => self.prologue(inner)?,
                Rule::select_query => parsed = Some(self.select(inner)?),
                Rule::construct_query => parsed = Some(self.construct(inner)?),
                _ => {}
            }
        }
        parsed.ok_or_else(|| QueryError::Syntax("missing query form".to_string()))
    }

    fn prologue(&mut self, pair: Pair<Rule>) -> Result<(), QueryError> {
        for decl in pair.into_inner() {
            match decl.as_rule() {
                Rule::base_decl => {
                    let iri = self.iri_from_inner(decl)?;
                    let base = Url::parse(&iri).map_err(|e| QueryError::InvalidIri {
                        iri: iri.clone(),
                        message: e.to_string(),
                    })?;
                    self.base = Some(base);
                }
                Rule::prefix_decl => {
                    let mut inner = decl.into_inner();
                    let name = inner
                        .next()
                        .map(|p| p.as_str().trim_end_matches(':').to_string())
                        .unwrap_or_default();
                    let iri = match inner.next() {
                        Some(iri_pair) => self.iri_ref(iri_pair)?,
                        None => return Err(QueryError::Syntax("PREFIX without IRI".to_string())),
                    };
                    self.prefixes.insert(name, iri);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn select(&self, pair: Pair<Rule>) -> Result<ParsedQuery, QueryError> {
        let mut distinct = false;
        let mut projection = Projection::All;
        let mut pattern = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::distinct => distinct = true,
                Rule::projection => projection = Self::projection(inner),
                Rule::group => pattern = self.group(inner)?,
                _ => {}
            }
        }
        Ok(ParsedQuery {
            form: QueryForm::Select {
                distinct,
                projection,
            },
            pattern,
        })
    }

    fn construct(&self, pair: Pair<Rule>) -> Result<ParsedQuery, QueryError> {
        let mut template = Vec::new();
        let mut pattern = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::template => template = self.group(inner)?,
                Rule::group => pattern = self.group(inner)?,
                _ => {}
            }
        }
        Ok(ParsedQuery {
            form: QueryForm::Construct { template },
            pattern,
        })
    }

    fn projection(pair: Pair<Rule>) -> Projection {
        let mut vars = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::star => return Projection::All,
                Rule::var => vars.push(Self::var_name(inner)),
                _ => {}
            }
        }
        Projection::Vars(vars)
    }

    /// `group` and `template` share the same shape: braces around an optional
    /// triples block.
    fn group(&self, pair: Pair<Rule>) -> Result<Vec<TriplePattern>, QueryError> {
        let mut patterns = Vec::new();
        for block in pair.into_inner() {
            if block.as_rule() != Rule::triples_block {
                continue;
            }
            for same_subject in block.into_inner() {
                self.triples_same_subject(same_subject, &mut patterns)?;
            }
        }
        Ok(patterns)
    }

    fn triples_same_subject(
        &self,
        pair: Pair<Rule>,
        out: &mut Vec<TriplePattern>,
    ) -> Result<(), QueryError> {
        let mut inner = pair.into_inner();
        let subject = match inner.next() {
            Some(term) => self.term(term)?,
            None => return Err(QueryError::Syntax("triple without subject".to_string())),
        };
        let Some(property_list) = inner.next() else {
            return Err(QueryError::Syntax("triple without predicate".to_string()));
        };

        let mut items = property_list.into_inner();
        while let Some(verb) = items.next() {
            let predicate = self.verb(verb)?;
            let Some(objects) = items.next() else {
                return Err(QueryError::Syntax("predicate without object".to_string()));
            };
            for object in objects.into_inner() {
                out.push(TriplePattern {
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    object: self.term(object)?,
                });
            }
        }
        Ok(())
    }

    fn verb(&self, pair: Pair<Rule>) -> Result<PatternTerm, QueryError> {
        match pair.into_inner().next() {
            Some(inner) if inner.as_rule() == Rule::rdf_type_kw => {
                Ok(PatternTerm::Const(Term::iri(RDF_TYPE)))
            }
            Some(inner) => self.term(inner),
            None => Err(QueryError::Syntax("empty verb".to_string())),
        }
    }

    fn term(&self, pair: Pair<Rule>) -> Result<PatternTerm, QueryError> {
        // `term` wraps exactly one concrete alternative.
        let pair = if pair.as_rule() == Rule::term {
            match pair.into_inner().next() {
                Some(inner) => inner,
                None => return Err(QueryError::Syntax("empty term".to_string())),
            }
        } else {
            pair
        };
        match pair.as_rule() {
            Rule::var => Ok(PatternTerm::Var(Self::var_name(pair))),
            Rule::blank_node => Ok(PatternTerm::Var(pair.as_str().to_string())),
            Rule::iri_ref => Ok(PatternTerm::Const(Term::iri(self.iri_ref(pair)?))),
            Rule::prefixed_name => Ok(PatternTerm::Const(Term::iri(self.prefixed_name(pair)?))),
            Rule::literal => Ok(PatternTerm::Const(self.literal(pair)?)),
            Rule::numeric => {
                let text = pair.as_str();
                let datatype = if text.contains('.') {
                    XSD_DECIMAL
                } else {
                    XSD_INTEGER
                };
                Ok(PatternTerm::Const(Term::typed_literal(text, datatype)))
            }
            other => Err(QueryError::Syntax(format!("unexpected {:?} in term position", other))),
        }
    }

    fn var_name(pair: Pair<Rule>) -> String {
        pair.into_inner()
            .next()
            .map(|name| name.as_str().to_string())
            .unwrap_or_default()
    }

    fn iri_from_inner(&self, pair: Pair<Rule>) -> Result<String, QueryError> {
        match pair.into_inner().next() {
            Some(iri) => self.iri_ref(iri),
            None => Err(QueryError::Syntax("expected IRI".to_string())),
        }
    }

    /// Expand an `<...>` reference, resolving it against BASE when relative.
    fn iri_ref(&self, pair: Pair<Rule>) -> Result<String, QueryError> {
        let raw = pair
            .into_inner()
            .next()
            .map(|body| body.as_str())
            .unwrap_or_default();
        let text = rdf::unescape(raw).map_err(|message| QueryError::InvalidIri {
            iri: raw.to_string(),
            message,
        })?;
        if Url::parse(&text).is_ok() {
            return Ok(text);
        }
        match &self.base {
            Some(base) => base
                .join(&text)
                .map(|u| u.to_string())
                .map_err(|e| QueryError::InvalidIri {
                    iri: text.clone(),
                    message: e.to_string(),
                }),
            None => Err(QueryError::InvalidIri {
                iri: text,
                message: "relative IRI without BASE".to_string(),
            }),
        }
    }

    fn prefixed_name(&self, pair: Pair<Rule>) -> Result<String, QueryError> {
        let mut prefix = "";
        let mut local = "";
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::pname_ns => prefix = part.as_str().trim_end_matches(':'),
                Rule::pn_local => local = part.as_str(),
                _ => {}
            }
        }
        let namespace = self
            .prefixes
            .get(prefix)
            .ok_or_else(|| QueryError::UnknownPrefix(prefix.to_string()))?;
        Ok(format!("{}{}", namespace, local))
    }

    fn literal(&self, pair: Pair<Rule>) -> Result<Term, QueryError> {
        let mut value = None;
        let mut lang = None;
        let mut datatype = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::string => {
                    let body = part
                        .into_inner()
                        .next()
                        .map(|b| b.as_str())
                        .unwrap_or_default();
                    value = Some(rdf::unescape(body).map_err(QueryError::InvalidLiteral)?);
                }
                Rule::lang_tag => lang = Some(part.as_str().trim_start_matches('@').to_string()),
                Rule::datatype => {
                    datatype = match part.into_inner().next() {
                        Some(inner) if inner.as_rule() == Rule::iri_ref => Some(self.iri_ref(inner)?),
                        Some(inner) => Some(self.prefixed_name(inner)?),
                        None => None,
                    }
                }
                _ => {}
            }
        }
        let value = value.unwrap_or_default();
        Ok(match (lang, datatype) {
            (Some(lang), _) => Term::lang_literal(value, lang),
            (None, Some(datatype)) => Term::typed_literal(value, datatype),
            (None, None) => Term::literal(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CONSTRUCT: &str = r#"
        PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
        PREFIX bio: <http://example.org/bio#>
        # keep only proteins that carry a sequence
        CONSTRUCT {
            ?input a bio:Protein .
        }
        WHERE {
            ?input a bio:Protein ;
                   bio:hasSequence ?seq , ?alt .
            ?seq bio:label "primary"@en .
        }
    "#;

    #[test]
    fn test_construct_translates_to_select_input() {
        let query = translate_input_query(CONSTRUCT).unwrap();
        assert_eq!(query.projection, Projection::Vars(vec!["input".to_string()]));
        assert_eq!(query.pattern.len(), 4);
        assert_eq!(
            query.pattern[0],
            TriplePattern {
                subject: PatternTerm::Var("input".to_string()),
                predicate: PatternTerm::Const(Term::iri(RDF_TYPE)),
                object: PatternTerm::Const(Term::iri("http://example.org/bio#Protein")),
            }
        );
        assert_eq!(
            query.pattern[3].object,
            PatternTerm::Const(Term::lang_literal("primary", "en"))
        );
    }

    #[test]
    fn test_convert_construct_query_renders_select() {
        let text = convert_construct_query(CONSTRUCT).unwrap();
        assert!(text.starts_with("SELECT DISTINCT ?input WHERE {"));
        assert!(text.contains("?input <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://example.org/bio#Protein> ."));
        // The rendered form parses back to the same query.
        assert_eq!(SelectQuery::parse(&text).unwrap(), translate_input_query(CONSTRUCT).unwrap());
    }

    #[test]
    fn test_select_without_input_is_rejected() {
        let err = translate_input_query("SELECT ?x WHERE { ?x a <http://ex/T> }").unwrap_err();
        assert!(matches!(err, QueryError::NotProjected(_)));
    }

    #[test]
    fn test_select_star_must_mention_input() {
        let err = translate_input_query("SELECT * WHERE { ?x a <http://ex/T> }").unwrap_err();
        assert!(matches!(err, QueryError::Unbound(_)));
        assert!(translate_input_query("SELECT * WHERE { ?input a <http://ex/T> }").is_ok());
    }

    #[test]
    fn test_unknown_prefix() {
        let err = translate_input_query("CONSTRUCT { ?input a ex:T } WHERE { ?input a ex:T }")
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownPrefix(p) if p == "ex"));
    }

    #[test]
    fn test_filter_is_outside_the_subset() {
        let err = translate_input_query(
            "SELECT ?input WHERE { ?input <http://ex/p> ?v . FILTER(?v > 3) }",
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Syntax(_)));
    }

    #[test]
    fn test_empty_where_is_rejected() {
        let err = translate_input_query("CONSTRUCT { ?input a <http://ex/T> } WHERE { }").unwrap_err();
        assert!(matches!(err, QueryError::EmptyPattern));
    }

    #[test]
    fn test_base_resolves_relative_iris_and_blank_nodes_become_vars() {
        let query = SelectQuery::parse(
            "BASE <http://example.org/onto/>\n\
             SELECT ?input WHERE { ?input <hasPart> _:part . _:part a <Part> . }",
        )
        .unwrap();
        assert_eq!(
            query.pattern[0].predicate,
            PatternTerm::Const(Term::iri("http://example.org/onto/hasPart"))
        );
        assert_eq!(query.pattern[0].object, PatternTerm::Var("_:part".to_string()));
    }

    #[test]
    fn test_numeric_and_typed_literals() {
        let query = SelectQuery::parse(
            "PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>\n\
             SELECT ?input WHERE { ?input <http://ex/n> 5 ; <http://ex/d> \"2.5\"^^xsd:decimal . }",
        )
        .unwrap();
        assert_eq!(
            query.pattern[0].object,
            PatternTerm::Const(Term::typed_literal("5", XSD_INTEGER))
        );
        assert_eq!(
            query.pattern[1].object,
            PatternTerm::Const(Term::typed_literal("2.5", XSD_DECIMAL))
        );
    }

    #[test]
    fn test_prefixed_name_starting_with_a() {
        let query = SelectQuery::parse(
            "PREFIX a: <http://ex/a#>\nSELECT ?input WHERE { ?input a a:Thing }",
        )
        .unwrap();
        assert_eq!(
            query.pattern[0].predicate,
            PatternTerm::Const(Term::iri(RDF_TYPE))
        );
        assert_eq!(
            query.pattern[0].object,
            PatternTerm::Const(Term::iri("http://ex/a#Thing"))
        );
    }
}
