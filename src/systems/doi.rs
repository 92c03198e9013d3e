//! Digital Object Identifiers
use super::{accept_request, text_at};
use crate::context::Context;
use crate::error::{IdError, IdResult};
use crate::identifier::{Family, IdentifierSystem};
use crate::resolver::HttpRequest;
use crate::stream::{Fetch, Fetched, Progenitor, ProgenitorKind, Stream, System};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

const DOI_ORG: &str = "https://doi.org/";
const NEGOTIATE_ACCEPT: &str = "application/vnd.datacite.datacite+json, application/json";
const DATACITE_API: &str = "https://api.datacite.org/dois/";
const CROSSREF_API: &str = "https://api.crossref.org/v1/works/";

/// Prefixes accepted in front of the `10.` directory indicator
const PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "dx.doi.org/",
    "doi.org/",
    "doi:",
];

lazy_static! {
    static ref DOI: Regex = Regex::new(r"^https://doi\.org/10\.[0-9]{4,9}(\.[0-9]+)*/\S+$").unwrap();
    static ref DOI_LOCAL: Regex = Regex::new(r"^(?i:doi):10\.[0-9]{4,9}(\.[0-9]+)*/\S+$").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Doi;

/// Part after `https://doi.org/`
fn suffix(canonical: &str) -> &str {
    canonical.strip_prefix(DOI_ORG).unwrap_or(canonical)
}

impl IdentifierSystem for Doi {
    const NAME: &'static str = "doi";
    const FAMILY: Family = Family::Iso;

    fn canonical_grammar() -> &'static Regex {
        &DOI
    }

    fn local_grammar() -> Option<&'static Regex> {
        Some(&DOI_LOCAL)
    }

    fn normalize(raw: &str) -> String {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        let body = PREFIXES
            .iter()
            .find(|p| lower.starts_with(**p))
            .map(|p| &trimmed[p.len()..])
            .unwrap_or(trimmed);

        if body.starts_with("10.") {
            format!("{}{}", DOI_ORG, body)
        } else {
            trimmed.to_string()
        }
    }

    fn local_form(canonical: &str) -> Option<String> {
        Some(format!("doi:{}", suffix(canonical)))
    }
}

/// Content negotiation on doi.org, then the registry APIs
async fn negotiate(ctx: &Context, canonical: &str) -> IdResult<Fetched> {
    let resp = ctx.send(&accept_request(canonical, NEGOTIATE_ACCEPT)).await?;
    if resp.is_success() {
        if let Ok(value) = resp.json() {
            return Ok(Fetched::new(Some(value), resp));
        }
        debug!("{} negotiated a non json representation", canonical);
    } else if resp.status == 404 {
        return Err(IdError::IdDoesNotExist(canonical.to_string()));
    }

    let suffix = suffix(canonical);
    info!("content negotiation failed for {} ({}), trying registry APIs", canonical, resp.status);

    let datacite = ctx
        .send(&accept_request(&format!("{}{}", DATACITE_API, suffix), "application/vnd.api+json"))
        .await?;
    if datacite.is_success() {
        if let Some(attributes) = datacite.json()?.pointer("/data/attributes").cloned() {
            return Ok(Fetched::new(Some(attributes), datacite));
        }
    }

    let crossref = ctx
        .send(&accept_request(&format!("{}{}", CROSSREF_API, suffix), "application/json"))
        .await?;
    if crossref.is_success() {
        if let Some(message) = crossref.json()?.get("message").cloned() {
            return Ok(Fetched::new(Some(message), crossref));
        }
    }

    Err(IdError::from_status(resp.status.max(400), canonical))
}

#[async_trait]
impl System for Doi {
    async fn fetch_metadata(&self, mut fetch: Fetch<'_, Self>) -> IdResult<Option<Value>> {
        let ctx = fetch.ctx;
        let canonical = fetch.identifier.to_string();
        fetch
            .cached("doi_json", "metadata", &canonical.clone(), move || async move {
                negotiate(ctx, &canonical).await
            })
            .await
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

    fn bound_identifier(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/doi").or_else(|| text_at(metadata, "/DOI"))
    }

    fn freshness(&self, metadata: &Value) -> Option<String> {
        match metadata.get("created")? {
            Value::String(s) => Some(s.clone()),
            created => created
                .get("timestamp")
                .map(|t| t.to_string())
                .or_else(|| text_at(created, "/date-time")),
        }
    }

    fn label(&self, metadata: &Value) -> Option<String> {
        match metadata.get("title") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(titles)) => titles.first().and_then(Value::as_str).map(str::to_string),
            _ => text_at(metadata, "/titles/0/title"),
        }
    }

    fn category(&self, metadata: &Value) -> Option<String> {
        if let Some(general) = text_at(metadata, "/types/resourceTypeGeneral") {
            return Some(general);
        }

        let container = match metadata.get("container-title") {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Array(items)) => items.first().and_then(Value::as_str),
            _ => None,
        };
        if container == Some("protocols.io") {
            return Some("Protocol".to_string());
        }

        match metadata.get("type").and_then(Value::as_str) {
            Some("article-journal") | Some("journal-article") => Some("ArticleJournal".to_string()),
            _ => None,
        }
    }

    fn description(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/descriptions/0/description").or_else(|| text_at(metadata, "/abstract"))
    }
}

impl Stream<Doi> {
    /// Turtle representation, `None` when the remote only offers HTML
    pub async fn turtle(&mut self) -> IdResult<Option<String>> {
        let request = accept_request(&self.identifier().actionable(), "text/turtle");
        let resp = self.context().send(&request).await?;
        if !resp.is_success() {
            return Err(IdError::from_status(resp.status, &resp.url));
        }
        if resp
            .header("content-type")
            .is_some_and(|ct| ct.contains("text/html"))
        {
            debug!("{} sent html instead of turtle", resp.url);
            return Ok(None);
        }
        Ok(Some(resp.text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::resolver::{HttpResponse, Method};
    use crate::testing::{context, json_response, ScriptedTransport};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    const ID: &str = "https://doi.org/10.1038/nature12373";

    #[test]
    fn test_normalize_variants() {
        for raw in [
            "10.1038/nature12373",
            "doi:10.1038/nature12373",
            "DOI:10.1038/nature12373",
            "https://doi.org/10.1038/nature12373",
            "http://dx.doi.org/10.1038/nature12373",
            " https://DX.DOI.ORG/10.1038/nature12373 ",
        ] {
            let id: Identifier<Doi> = Identifier::new(raw).unwrap();
            assert_eq!(id.as_str(), ID, "{}", raw);
            assert_eq!(Doi::normalize(id.as_str()), id.as_str());
        }
    }

    #[test]
    fn test_local_form_and_malformed() {
        let id: Identifier<Doi> = Identifier::new(ID).unwrap();
        assert_eq!(id.local(), "doi:10.1038/nature12373");
        assert!(Doi::local_grammar().unwrap().is_match(&id.local()));

        assert!(Identifier::<Doi>::new("10.12/too-short").is_err());
        assert!(Identifier::<Doi>::new("https://example.org/10.1038/x").is_err());
    }

    #[tokio::test]
    async fn test_metadata_by_content_negotiation() {
        let dir = tempdir().unwrap();
        let record = json!({
            "doi": "10.1038/nature12373",
            "titles": [{"title": "Nanometre-scale thermometry"}],
            "types": {"resourceTypeGeneral": "JournalArticle"},
            "created": "2013-07-31T00:00:00Z",
        });
        let transport = Arc::new(ScriptedTransport::new().on(Method::Get, ID, json_response(ID, 200, record)));
        let mut stream: Stream<Doi> = Stream::new(context(&transport, dir.path()), ID).unwrap();

        let out = stream.as_record(false).await;
        assert_eq!(out.label.as_deref(), Some("Nanometre-scale thermometry"));
        assert_eq!(out.category.as_deref(), Some("JournalArticle"));

        let accept = transport.requests()[0]
            .headers
            .iter()
            .find(|(k, _)| k == "Accept")
            .map(|(_, v)| v.clone());
        assert_eq!(accept.as_deref(), Some(NEGOTIATE_ACCEPT));
    }

    #[tokio::test]
    async fn test_fallback_to_crossref() {
        let dir = tempdir().unwrap();
        let crossref = "https://api.crossref.org/v1/works/10.1038/nature12373";
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(Method::Get, ID, HttpResponse::new(ID, 503))
                .on(
                    Method::Get,
                    crossref,
                    json_response(
                        crossref,
                        200,
                        json!({"message": {
                            "DOI": "10.1038/nature12373",
                            "title": ["A protocol"],
                            "container-title": ["protocols.io"],
                            "created": {"timestamp": 1375228800000u64},
                        }}),
                    ),
                ),
        );
        let mut stream: Stream<Doi> = Stream::new(context(&transport, dir.path()), ID).unwrap();

        let metadata = stream.metadata().await.unwrap().unwrap().clone();
        assert_eq!(Doi.label(&metadata).as_deref(), Some("A protocol"));
        assert_eq!(Doi.category(&metadata).as_deref(), Some("Protocol"));
        assert_eq!(Doi.freshness(&metadata).as_deref(), Some("1375228800000"));
        // doi.org, DataCite (unscripted 404), Crossref
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_doi_does_not_fall_back() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let mut stream: Stream<Doi> = Stream::new(context(&transport, dir.path()), ID).unwrap();

        let err = stream.metadata().await.unwrap_err();
        assert!(matches!(err, IdError::IdDoesNotExist(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_turtle_rejects_html() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new().on(
            Method::Get,
            ID,
            HttpResponse::new(ID, 200)
                .with_header("Content-Type", "text/html; charset=utf-8")
                .with_body("<html></html>"),
        ));
        let mut stream: Stream<Doi> = Stream::new(context(&transport, dir.path()), ID).unwrap();
        assert_eq!(stream.turtle().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_data_is_the_landing_payload() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new().on(Method::Get, ID, HttpResponse::new(ID, 200).with_body("payload")),
        );
        let mut stream: Stream<Doi> = Stream::new(context(&transport, dir.path()), ID).unwrap();
        assert_eq!(stream.data().await.unwrap(), Some(&b"payload"[..]));
        assert!(stream.progenitor_of(ProgenitorKind::HttpResponse).is_ok());
    }
}
