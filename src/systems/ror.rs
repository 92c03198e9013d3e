//! Research Organization Registry identifiers
use super::{accept_request, strings, text_at};
use crate::error::{IdError, IdResult};
use crate::identifier::{Family, Identifier, IdentifierSystem};
use crate::stream::{Fetch, Fetched, Stream, System};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

const ROR_ORG: &str = "https://ror.org/";
const API: &str = "https://api.ror.org/organizations/";

lazy_static! {
    static ref ROR: Regex = Regex::new(r"^https://ror\.org/0[a-z0-9]{6}[0-9]{2}$").unwrap();
    static ref ROR_LOCAL: Regex = Regex::new(r"^(?i:ror):0[a-z0-9]{6}[0-9]{2}$").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ror;

/// Identifier systems that ROR records list under `external_ids`
pub trait RorExternalKey: IdentifierSystem {
    /// Key of the system in `external_ids`, e.g. `ISNI` or `GRID`
    const ROR_KEY: &'static str;
}

/// Institution class derived from a ROR organization type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstitutionType {
    Institution,
    CoreFacility,
    Nonprofit,
}

impl InstitutionType {
    fn from_ror(kind: &str) -> Option<Self> {
        match kind {
            "Education" | "Healthcare" | "Other" => Some(Self::Institution),
            "Facility" => Some(Self::CoreFacility),
            "Nonprofit" => Some(Self::Nonprofit),
            _ => None,
        }
    }
}

/// Preferred external id, else the first of `all` (which may be a bare string)
fn external_id(metadata: &Value, key: &str) -> Option<String> {
    let record = metadata.get("external_ids")?.get(key)?;
    if let Some(preferred) = record.get("preferred").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return Some(preferred.to_string());
    }
    match record.get("all")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn suffix(canonical: &str) -> &str {
    canonical.strip_prefix(ROR_ORG).unwrap_or(canonical)
}

impl IdentifierSystem for Ror {
    const NAME: &'static str = "ror";
    const FAMILY: Family = Family::Independent;

    fn canonical_grammar() -> &'static Regex {
        &ROR
    }

    fn local_grammar() -> Option<&'static Regex> {
        Some(&ROR_LOCAL)
    }

    fn normalize(raw: &str) -> String {
        let lower = raw.trim().to_ascii_lowercase();
        let body = ["https://ror.org/", "http://ror.org/", "ror:"]
            .iter()
            .find_map(|p| lower.strip_prefix(*p))
            .unwrap_or(lower.as_str());
        format!("{}{}", ROR_ORG, body)
    }

    fn local_form(canonical: &str) -> Option<String> {
        Some(format!("ror:{}", suffix(canonical)))
    }
}

#[async_trait]
impl System for Ror {
    async fn fetch_metadata(&self, mut fetch: Fetch<'_, Self>) -> IdResult<Option<Value>> {
        let ctx = fetch.ctx;
        let url = format!("{}{}", API, suffix(fetch.identifier.as_str()));
        let key = fetch.identifier.to_string();
        fetch
            .cached("ror_json", "metadata", &key, move || async move {
                let resp = ctx.send(&accept_request(&url, "application/json")).await?;
                if !resp.is_success() {
                    return Err(IdError::from_status(resp.status, &resp.url));
                }
                Ok(Fetched::new(Some(resp.json()?), resp))
            })
            .await
    }

    fn bound_identifier(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/id")
    }

    /// Records carry no modification timestamp, the name stands in
    fn freshness(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/name")
    }

    fn label(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/name")
    }

    fn category(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/types/0")
    }

    fn synonyms(&self, metadata: &Value) -> Vec<String> {
        let mut out = strings(metadata.get("aliases"), "value");
        out.extend(strings(metadata.get("acronyms"), "value"));
        out.extend(strings(metadata.get("labels"), "label"));
        out
    }
}

impl Stream<Ror> {
    /// The record's identifier in system `T`, if it lists one
    pub async fn as_external_id<T: RorExternalKey>(&mut self) -> IdResult<Option<Identifier<T>>> {
        let eid = self
            .metadata()
            .await?
            .and_then(|m| external_id(m, T::ROR_KEY));
        eid.map(|eid| Identifier::new(&eid)).transpose()
    }

    /// Institution classes of the organization's `types`
    pub async fn institution_types(&mut self) -> IdResult<Vec<InstitutionType>> {
        let metadata = self
            .metadata()
            .await?
            .cloned()
            .ok_or_else(|| IdError::Resolution(format!("No metadata found for {}", self.identifier())))?;
        let kinds = metadata
            .get("types")
            .and_then(Value::as_array)
            .ok_or_else(|| IdError::Resolution(format!("ROR record {} has no types", self.identifier())))?;

        let mut out = Vec::new();
        for kind in kinds.iter().filter_map(Value::as_str) {
            if kind == "Other" {
                info!("{} has organization type Other", self.identifier());
            }
            match InstitutionType::from_ror(kind) {
                Some(t) => out.push(t),
                None => warn!("unmapped ROR organization type {} for {}", kind, self.identifier()),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::resolver::Method;
    use crate::stream::Stream;
    use crate::testing::{context, json_response, ScriptedTransport};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    const ID: &str = "https://ror.org/05dxps055";
    const API_URL: &str = "https://api.ror.org/organizations/05dxps055";

    #[test]
    fn test_normalize() {
        for raw in ["05dxps055", "ror:05DXPS055", "http://ror.org/05dxps055", ID] {
            let id: Identifier<Ror> = Identifier::new(raw).unwrap();
            assert_eq!(id.as_str(), ID);
        }
        assert_eq!(Identifier::<Ror>::new(ID).unwrap().local(), "ror:05dxps055");
        assert!(Identifier::<Ror>::new("15dxps055").is_err());
        assert!(Identifier::<Ror>::new("05dxps0x5").is_err());
    }

    struct Isni;

    lazy_static! {
        static ref ISNI: Regex = Regex::new(r"^[0-9]{15}[0-9X]$").unwrap();
    }

    impl IdentifierSystem for Isni {
        const NAME: &'static str = "isni";
        const FAMILY: Family = Family::Iso;

        fn canonical_grammar() -> &'static Regex {
            &ISNI
        }

        fn normalize(raw: &str) -> String {
            raw.chars().filter(|c| !c.is_whitespace()).collect()
        }
    }

    impl RorExternalKey for Isni {
        const ROR_KEY: &'static str = "ISNI";
    }

    struct Grid;

    lazy_static! {
        static ref GRID: Regex = Regex::new(r"^grid\.[0-9]+\.[0-9a-f]+$").unwrap();
    }

    impl IdentifierSystem for Grid {
        const NAME: &'static str = "grid";
        const FAMILY: Family = Family::Independent;

        fn canonical_grammar() -> &'static Regex {
            &GRID
        }

        fn normalize(raw: &str) -> String {
            raw.trim().to_string()
        }
    }

    impl RorExternalKey for Grid {
        const ROR_KEY: &'static str = "GRID";
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["05dxps055", "ror:05DXPS055", " http://ror.org/05dxps055", ID] {
            let once = Ror::normalize(raw);
            assert_eq!(Ror::normalize(&once), once, "{}", raw);
        }
    }

    #[tokio::test]
    async fn test_external_ids_and_institution_types() {
        let dir = tempdir().unwrap();
        let body = json!({
            "id": ID,
            "name": "California Institute of Technology",
            "types": ["Education", "Facility", "Company"],
            "external_ids": {
                "ISNI": {"preferred": null, "all": ["0000 0001 0706 8890", "0000 0004 0000 0001"]},
                "GRID": {"preferred": "grid.20861.3d", "all": "grid.20861.3d"},
            },
        });
        let transport = Arc::new(ScriptedTransport::new().on(Method::Get, API_URL, json_response(API_URL, 200, body)));
        let mut stream: Stream<Ror> = Stream::new(context(&transport, dir.path()), ID).unwrap();

        let isni = stream.as_external_id::<Isni>().await.unwrap().unwrap();
        assert_eq!(isni.as_str(), "0000000107068890");
        let grid = stream.as_external_id::<Grid>().await.unwrap().unwrap();
        assert_eq!(grid.as_str(), "grid.20861.3d");

        assert_eq!(
            stream.institution_types().await.unwrap(),
            vec![InstitutionType::Institution, InstitutionType::CoreFacility]
        );
    }

    #[test]
    fn test_external_id_bare_string_all() {
        let metadata = json!({"external_ids": {"GRID": {"preferred": null, "all": "grid.1.a"}}});
        assert_eq!(external_id(&metadata, "GRID").as_deref(), Some("grid.1.a"));
        assert_eq!(external_id(&metadata, "ISNI"), None);
    }

    #[tokio::test]
    async fn test_synonyms_collected() {
        let dir = tempdir().unwrap();
        let body = json!({
            "id": ID,
            "name": "California Institute of Technology",
            "types": ["Education"],
            "aliases": ["Caltech"],
            "acronyms": ["CIT"],
            "labels": [{"label": "Instituto de Tecnología de California", "iso639": "es"}],
        });
        let transport = Arc::new(ScriptedTransport::new().on(Method::Get, API_URL, json_response(API_URL, 200, body)));
        let mut stream: Stream<Ror> = Stream::new(context(&transport, dir.path()), ID).unwrap();

        let record = stream.as_record(false).await;
        assert_eq!(record.label.as_deref(), Some("California Institute of Technology"));
        assert_eq!(record.category.as_deref(), Some("Education"));
        assert_eq!(
            record.synonyms,
            vec!["Caltech", "CIT", "Instituto de Tecnología de California"]
        );
    }
}
