//! Research Resource Identifiers
use super::{strings, text_at};
use crate::cache::Cooldown;
use crate::error::{IdError, IdResult};
use crate::identifier::{Family, Identifier, IdentifierSystem};
use crate::resolver::HttpRequest;
use crate::stream::{Fetch, Fetched, System};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

const RESOLVER: &str = "https://scicrunch.org/resolver/";

lazy_static! {
    static ref RRID: Regex = Regex::new(r"^RRID:([A-Za-z]+)_([A-Za-z0-9_:-]+)$").unwrap();
}

/// RRID system; with `cooldown` a missing record is cached as a cooldown
/// instead of raising
#[derive(Debug, Clone, Copy, Default)]
pub struct Rrid {
    pub cooldown: bool,
}

impl Rrid {
    pub fn with_cooldown() -> Self {
        Self { cooldown: true }
    }
}

impl IdentifierSystem for Rrid {
    const NAME: &'static str = "rrid";
    const FAMILY: Family = Family::Independent;

    fn canonical_grammar() -> &'static Regex {
        &RRID
    }

    fn normalize(raw: &str) -> String {
        let trimmed = raw.trim();
        match trimmed.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("rrid:") => format!("RRID:{}", &trimmed[5..]),
            _ => trimmed.to_string(),
        }
    }

    fn actionable(canonical: &str) -> String {
        format!("{}{}", RESOLVER, canonical)
    }
}

impl Identifier<Rrid> {
    /// Registry that issued the identifier, e.g. `AB` or `SCR`
    pub fn authority(&self) -> &str {
        self.parts().0
    }

    /// Identifier within the authority
    pub fn authority_local(&self) -> &str {
        self.parts().1
    }

    fn parts(&self) -> (&str, &str) {
        // the grammar guarantees an underscore after the authority
        let body = &self.as_str()["RRID:".len()..];
        body.split_once('_').unwrap_or((body, ""))
    }
}

#[async_trait]
impl System for Rrid {
    async fn fetch_metadata(&self, mut fetch: Fetch<'_, Self>) -> IdResult<Option<Value>> {
        let ctx = fetch.ctx;
        let actionable = fetch.identifier.actionable();
        let key = fetch.identifier.to_string();
        let cooldown = self.cooldown;

        let blob = fetch
            .cached("rrid_json", "metadata", &key, move || async move {
                let url = format!("{}.json", actionable);
                let resp = ctx.send(&HttpRequest::fetch(&url)).await?;
                if resp.is_success() {
                    Ok(Fetched::new(Some(resp.json()?), resp))
                } else if cooldown && resp.status == 404 {
                    let message = format!("RRID failure: {} {}", resp.status, actionable);
                    let record = Cooldown::new(Some(resp.status), None, message).into_record();
                    Ok(Fetched::new(Some(record), resp))
                } else {
                    Err(IdError::from_status(resp.status, &resp.url))
                }
            })
            .await?;

        match blob {
            Some(blob) => blob
                .pointer("/hits/hits/0/_source")
                .cloned()
                .map(Some)
                .ok_or_else(|| IdError::IdDoesNotExist(key)),
            None => Ok(None),
        }
    }

    fn bound_identifier(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/rrid/curie")
    }

    fn checksum_extras(&self, metadata: &Value) -> Vec<String> {
        let mut extras: Vec<String> = text_at(metadata, "/rrid/properCitation").into_iter().collect();
        extras.extend(strings(metadata.get("vendors"), "uri"));
        extras
    }

    fn label(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/item/name")
    }

    fn synonyms(&self, metadata: &Value) -> Vec<String> {
        let item = metadata.get("item");
        ["label", "synonyms", "abbreviations"]
            .iter()
            .flat_map(|field| strings(item.and_then(|i| i.get(*field)), "name"))
            .collect()
    }

    fn description(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/item/description")
    }
}
