//! RDF document reading for resolver responses and seed graphs.
//!
//! N-Triples is read line by line, so one bad line costs only that
//! statement. Turtle and RDF/XML are streamed; a syntax error stops the
//! document but keeps every triple read before it.

use super::{GraphError, Term, Triple};
use oxiri::Iri;
use rio_api::model as rio;
use rio_api::parser::TriplesParser;
use rio_turtle::{NTriplesParser, TurtleParser};
use rio_xml::RdfXmlParser;
use std::fmt;
use std::path::Path;

/// Serializations the resolver can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    NTriples,
    Turtle,
    RdfXml,
}

impl RdfFormat {
    /// `Accept` header for linked-data requests.
    pub const ACCEPT: &'static str =
        "text/turtle, application/n-triples;q=0.9, application/rdf+xml;q=0.8, text/plain;q=0.5";

    /// Format named by a `Content-Type` value; parameters are ignored.
    pub fn from_media_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/n-triples" | "text/plain" => Some(RdfFormat::NTriples),
            "text/turtle" | "application/x-turtle" | "text/n3" => Some(RdfFormat::Turtle),
            "application/rdf+xml" | "application/xml" | "text/xml" => Some(RdfFormat::RdfXml),
            _ => None,
        }
    }

    /// Format implied by a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "nt" => Some(RdfFormat::NTriples),
            "ttl" | "n3" => Some(RdfFormat::Turtle),
            "rdf" | "owl" | "xml" => Some(RdfFormat::RdfXml),
            _ => None,
        }
    }

    /// Guess from the document itself: XML or else Turtle, which also
    /// covers N-Triples.
    pub fn sniff(document: &str) -> Self {
        let head = document.trim_start();
        if head.starts_with("<?xml") || head.starts_with("<rdf:RDF") {
            RdfFormat::RdfXml
        } else {
            RdfFormat::Turtle
        }
    }
}

impl fmt::Display for RdfFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RdfFormat::NTriples => "N-Triples",
            RdfFormat::Turtle => "Turtle",
            RdfFormat::RdfXml => "RDF/XML",
        };
        f.write_str(name)
    }
}

/// Triples read from a document plus the statements that could not be read.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    pub triples: Vec<Triple>,
    pub errors: Vec<GraphError>,
}

impl ParsedDocument {
    /// Strict view: the first error wins.
    pub fn into_result(self) -> Result<Vec<Triple>, GraphError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(self.triples),
        }
    }
}

/// Read `document` as `format`. Relative IRIs resolve against `base`.
pub fn parse_document(document: &str, format: RdfFormat, base: Option<&str>) -> ParsedDocument {
    let base = base.and_then(|iri| Iri::parse(iri.to_string()).ok());
    let mut parsed = ParsedDocument::default();
    match format {
        RdfFormat::NTriples => read_lines(document, &mut parsed),
        RdfFormat::Turtle => drain(
            TurtleParser::new(document.as_bytes(), base),
            format,
            &mut parsed,
        ),
        RdfFormat::RdfXml => drain(
            RdfXmlParser::new(document.as_bytes(), base),
            format,
            &mut parsed,
        ),
    }
    parsed
}

/// Parse an N-Triples document, failing on the first malformed line.
pub fn parse_ntriples(document: &str) -> Result<Vec<Triple>, GraphError> {
    parse_document(document, RdfFormat::NTriples, None).into_result()
}

fn read_lines(document: &str, parsed: &mut ParsedDocument) {
    for (index, raw) in document.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut statement = Vec::new();
        let result = NTriplesParser::new(line.as_bytes()).parse_all(&mut |t| {
            statement.extend(convert(&t));
            Ok::<(), rio_turtle::TurtleError>(())
        });
        match result {
            Ok(()) if statement.is_empty() => parsed.errors.push(GraphError::Parse {
                line: index + 1,
                message: "no statement on line".to_string(),
            }),
            Ok(()) => parsed.triples.extend(statement),
            Err(e) => parsed.errors.push(GraphError::Parse {
                line: index + 1,
                message: e.to_string(),
            }),
        }
    }
}

fn drain<P: TriplesParser>(mut parser: P, format: RdfFormat, parsed: &mut ParsedDocument) {
    while !parser.is_end() {
        let triples = &mut parsed.triples;
        let step = parser.parse_step(&mut |t| {
            triples.extend(convert(&t));
            Ok::<(), P::Error>(())
        });
        if let Err(e) = step {
            parsed.errors.push(GraphError::Syntax {
                format,
                message: e.to_string(),
            });
            break;
        }
    }
}

/// Quoted (RDF-star) triples have no place in the working graph.
fn convert(triple: &rio::Triple<'_>) -> Option<Triple> {
    let subject = match triple.subject {
        rio::Subject::NamedNode(node) => Term::iri(node.iri),
        rio::Subject::BlankNode(node) => Term::blank(node.id),
        _ => return None,
    };
    let object = match triple.object {
        rio::Term::NamedNode(node) => Term::iri(node.iri),
        rio::Term::BlankNode(node) => Term::blank(node.id),
        rio::Term::Literal(rio::Literal::Simple { value }) => Term::literal(value),
        rio::Term::Literal(rio::Literal::LanguageTaggedString { value, language }) => {
            Term::lang_literal(value, language)
        }
        rio::Term::Literal(rio::Literal::Typed { value, datatype }) => {
            Term::typed_literal(value, datatype.iri)
        }
        _ => return None,
    };
    Some(Triple::new(subject, Term::iri(triple.predicate.iri), object))
}

/// Escape a literal's lexical form for N-Triples output.
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Resolve string escapes (`\n`, `\"`, `\uXXXX`, `\UXXXXXXXX`, ...).
pub(crate) fn unescape(raw: &str) -> Result<String, String> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('u') => out.push(hex_char(&mut chars, 4)?),
            Some('U') => out.push(hex_char(&mut chars, 8)?),
            Some(other) => return Err(format!("unknown escape '\\{}'", other)),
            None => return Err("dangling escape".to_string()),
        }
    }
    Ok(out)
}

fn hex_char(chars: &mut std::str::Chars<'_>, digits: usize) -> Result<char, String> {
    let hex: String = chars.take(digits).collect();
    if hex.len() != digits {
        return Err(format!("truncated unicode escape '{}'", hex));
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid unicode escape '{}'", hex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RDF_TYPE;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_basic_document() {
        let doc = format!(
            "# resolver output\n\
             <http://ex/a> <{rdf_type}> <http://ex/T> .\n\
             \n\
             _:b1 <http://ex/name> \"Alice\"@en .\n\
             <http://ex/a> <http://ex/age> \"42\"^^<http://www.w3.org/2001/XMLSchema#integer> . # trailing\n",
            rdf_type = RDF_TYPE
        );
        let triples = parse_ntriples(&doc).unwrap();
        assert_eq!(triples.len(), 3);
        assert_eq!(triples[0].object, Term::iri("http://ex/T"));
        assert_eq!(triples[1].subject, Term::blank("b1"));
        assert_eq!(triples[1].object, Term::lang_literal("Alice", "en"));
        assert_eq!(
            triples[2].object,
            Term::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer")
        );
    }

    #[test]
    fn test_parse_escapes() {
        let doc = r#"<http://ex/a> <http://ex/note> "say \"hi\"\né" ."#;
        let triples = parse_ntriples(doc).unwrap();
        assert_eq!(triples[0].object, Term::literal("say \"hi\"\n\u{e9}"));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let doc = "<http://ex/a> <http://ex/p> <http://ex/b> .\n<http://ex/a> \"bad\" <http://ex/b> .\n";
        match parse_ntriples(doc) {
            Err(GraphError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_line_keeps_the_rest_of_the_document() {
        let doc = "<http://ex/a> <http://ex/p> <http://ex/b> .\n\
                   this is not a statement\n\
                   <http://ex/a> <http://ex/p> <http://ex/c> .\n";
        let parsed = parse_document(doc, RdfFormat::NTriples, None);
        assert_eq!(parsed.triples.len(), 2);
        assert_eq!(parsed.errors.len(), 1);
        assert!(matches!(parsed.errors[0], GraphError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_missing_terminator_is_rejected() {
        assert!(parse_ntriples("<http://ex/a> <http://ex/p> <http://ex/b>").is_err());
    }

    #[test]
    fn test_display_roundtrips_literal_escapes() {
        let term = Term::literal("a \"quoted\"\tvalue");
        let line = format!("<http://ex/s> <http://ex/p> {} .", term);
        let triples = parse_ntriples(&line).unwrap();
        assert_eq!(triples[0].object, term);
    }

    #[test]
    fn test_turtle_prefixes_and_a() {
        let doc = "@prefix ex: <http://ex/> .\n<http://ex/n> a ex:Protein ; ex:name \"p53\" .\n";
        let parsed = parse_document(doc, RdfFormat::Turtle, None);
        assert!(parsed.errors.is_empty());
        assert_eq!(
            parsed.triples[0],
            Triple::new(
                Term::iri("http://ex/n"),
                Term::iri(RDF_TYPE),
                Term::iri("http://ex/Protein")
            )
        );
        assert_eq!(parsed.triples[1].object, Term::literal("p53"));
    }

    #[test]
    fn test_turtle_relative_iris_use_the_base() {
        let doc = "<#gene> a <Gene> .";
        let parsed = parse_document(doc, RdfFormat::Turtle, Some("http://ex/doc"));
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.triples[0].subject, Term::iri("http://ex/doc#gene"));
        assert_eq!(parsed.triples[0].object, Term::iri("http://ex/Gene"));
    }

    #[test]
    fn test_turtle_error_keeps_earlier_triples() {
        let doc = "<http://ex/a> a <http://ex/T> .\n<http://ex/b> a ??? .\n";
        let parsed = parse_document(doc, RdfFormat::Turtle, None);
        assert_eq!(parsed.triples.len(), 1);
        assert!(matches!(
            parsed.errors[0],
            GraphError::Syntax { format: RdfFormat::Turtle, .. }
        ));
    }

    #[test]
    fn test_rdf_xml_description() {
        let doc = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:ex="http://ex/">
  <ex:Protein rdf:about="http://ex/p1">
    <ex:name>p53</ex:name>
  </ex:Protein>
</rdf:RDF>"#;
        assert_eq!(RdfFormat::sniff(doc), RdfFormat::RdfXml);
        let parsed = parse_document(doc, RdfFormat::RdfXml, None);
        assert!(parsed.errors.is_empty());
        assert!(parsed.triples.contains(&Triple::new(
            Term::iri("http://ex/p1"),
            Term::iri(RDF_TYPE),
            Term::iri("http://ex/Protein"),
        )));
    }

    #[test]
    fn test_media_types_and_extensions() {
        assert_eq!(
            RdfFormat::from_media_type("text/turtle; charset=utf-8"),
            Some(RdfFormat::Turtle)
        );
        assert_eq!(
            RdfFormat::from_media_type("application/rdf+xml"),
            Some(RdfFormat::RdfXml)
        );
        assert_eq!(RdfFormat::from_media_type("text/html"), None);
        assert_eq!(
            RdfFormat::from_path(Path::new("seed.nt")),
            Some(RdfFormat::NTriples)
        );
        assert_eq!(RdfFormat::from_path(Path::new("seed.TTL")), Some(RdfFormat::Turtle));
        assert_eq!(RdfFormat::from_path(Path::new("seed")), None);
    }
}
