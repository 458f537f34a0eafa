//! HTTP-backed type sources.

use super::{ResolveError, TypeSource};
use crate::graph::{rdf, RdfFormat, Triple};
use reqwest::blocking::Client as BlockingHttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use url::Url;

fn build_client(timeout: Duration) -> Result<BlockingHttpClient, ResolveError> {
    BlockingHttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ResolveError::Client(e.to_string()))
}

/// GET `url` with RDF content negotiation and parse whatever comes back.
fn fetch_rdf(client: &BlockingHttpClient, url: &Url) -> Result<Vec<Triple>, ResolveError> {
    let response = client
        .get(url.clone())
        .header(ACCEPT, RdfFormat::ACCEPT)
        .send()
        .map_err(|e| ResolveError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ResolveError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    // Redirects (303 See Other is common for linked data) move the base.
    let base = response.url().clone();
    let body = response.text().map_err(|e| ResolveError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    read_document(url, &body, content_type.as_deref(), &base)
}

/// Parse a response body. Statements that fail to parse are logged and
/// skipped; the fetch only fails when nothing at all could be read.
pub(crate) fn read_document(
    url: &Url,
    body: &str,
    content_type: Option<&str>,
    base: &Url,
) -> Result<Vec<Triple>, ResolveError> {
    let format = content_type
        .and_then(RdfFormat::from_media_type)
        .unwrap_or_else(|| RdfFormat::sniff(body));
    let parsed = rdf::parse_document(body, format, Some(base.as_str()));
    if parsed.triples.is_empty() {
        if let Some(source) = parsed.errors.into_iter().next() {
            return Err(ResolveError::Parse {
                url: url.to_string(),
                source,
            });
        }
        return Ok(Vec::new());
    }
    for error in &parsed.errors {
        log::warn!("[resolver] {}: skipped malformed {}: {}", url, format, error);
    }
    Ok(parsed.triples)
}

/// Parse `node` and accept only http(s) URIs.
fn dereferenceable(node: &str) -> Result<Url, ResolveError> {
    let url = Url::parse(node).map_err(|_| ResolveError::InvalidUri(node.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ResolveError::InvalidUri(node.to_string())),
    }
}

/// Dereferences the node's own URI as linked data.
pub struct UriDereferencer {
    client: BlockingHttpClient,
}

impl UriDereferencer {
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

impl TypeSource for UriDereferencer {
    fn name(&self) -> &str {
        "dereference"
    }

    fn fetch(&self, node: &str) -> Result<Vec<Triple>, ResolveError> {
        let mut url = dereferenceable(node)?;
        // The fragment never reaches the server.
        url.set_fragment(None);
        fetch_rdf(&self.client, &url)
    }
}

/// Asks a SADI resolver service to describe the node.
pub struct SadiResolverSource {
    endpoint: Url,
    client: BlockingHttpClient,
}

impl SadiResolverSource {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ResolveError> {
        let endpoint =
            Url::parse(endpoint).map_err(|_| ResolveError::InvalidUri(endpoint.to_string()))?;
        Ok(Self {
            endpoint,
            client: build_client(timeout)?,
        })
    }

    /// Request URL for `node`: the endpoint with a `uri` query parameter.
    pub fn resolver_url_for(&self, node: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("uri", node);
        url
    }
}

impl TypeSource for SadiResolverSource {
    fn name(&self) -> &str {
        "sadi-resolver"
    }

    fn fetch(&self, node: &str) -> Result<Vec<Triple>, ResolveError> {
        dereferenceable(node)?;
        fetch_rdf(&self.client, &self.resolver_url_for(node))
    }
}
