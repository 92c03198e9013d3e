//! Plain http(s) URIs
//!
//! Metadata for a URI is the header set of its terminal response. Nothing is
//! cached. Metadata resolves its own raising chain, separate from the
//! stream's memoized dereference chain; both are dropped on refresh.
use crate::error::{IdError, IdResult};
use crate::identifier::{Family, IdentifierSystem};
use crate::resolver::{HttpRequest, ResolutionChain};
use crate::stream::{Fetch, Progenitor, ProgenitorKind, System};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    static ref URI: Regex = Regex::new(r"^https?://[^\s/$.?#][^\s]*$").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Uri;

impl IdentifierSystem for Uri {
    const NAME: &'static str = "uri";
    const FAMILY: Family = Family::Ietf;

    fn canonical_grammar() -> &'static Regex {
        &URI
    }

    fn normalize(raw: &str) -> String {
        raw.trim().to_string()
    }
}

/// Headers of the last hop as a JSON object, lower cased names
fn header_object(chain: &ResolutionChain) -> Option<Value> {
    let (_, response) = chain.last_hop()?;
    let headers: Map<String, Value> = response
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
        .collect();
    Some(Value::Object(headers))
}

#[async_trait]
impl System for Uri {
    async fn fetch_metadata(&self, mut fetch: Fetch<'_, Self>) -> IdResult<Option<Value>> {
        let chain = fetch.ctx.resolver.resolve(&fetch.identifier.actionable(), true).await?;
        let value = header_object(&chain);
        if let Some((_, response)) = chain.last_hop() {
            fetch.record(ProgenitorKind::HttpResponse, Progenitor::Response(response.clone()));
        }
        Ok(value)
    }

    async fn fetch_data(&self, mut fetch: Fetch<'_, Self>) -> IdResult<Option<Vec<u8>>> {
        let resp = fetch.ctx.send(&HttpRequest::fetch(&fetch.identifier.actionable())).await?;
        if !resp.is_success() {
            return Err(IdError::from_status(resp.status, &resp.url));
        }
        let body = resp.body.clone().unwrap_or_default();
        fetch.record(ProgenitorKind::HttpResponse, Progenitor::Response(resp));
        Ok(Some(body))
    }

    fn freshness(&self, metadata: &Value) -> Option<String> {
        ["etag", "last-modified"]
            .iter()
            .find_map(|name| metadata.get(*name).and_then(Value::as_str))
            .map(str::to_string)
    }

    fn label(&self, metadata: &Value) -> Option<String> {
        metadata.get("content-type").and_then(Value::as_str).map(str::to_string)
    }
}
