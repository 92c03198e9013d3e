//! ORCID researcher identifiers
use super::{accept_request, strings, text_at};
use crate::error::{IdError, IdResult};
use crate::identifier::{Family, IdentifierSystem};
use crate::stream::{Fetch, Fetched, System};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

const ORCID_ORG: &str = "https://orcid.org/";
const PUBLIC_API: &str = "https://pub.orcid.org/v3.0/";

lazy_static! {
    static ref ORCID: Regex = Regex::new(
        r"^https://orcid\.org/0000-000(1-[5-9]|2-[0-9]|3-[0-4])[0-9]{3}-[0-9]{3}[0-9X]$"
    )
    .unwrap();
    static ref ORCID_LOCAL: Regex = Regex::new(
        r"^(?i:orcid):0000-000(1-[5-9]|2-[0-9]|3-[0-4])[0-9]{3}-[0-9]{3}[0-9X]$"
    )
    .unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Orcid;

fn suffix(canonical: &str) -> &str {
    canonical.strip_prefix(ORCID_ORG).unwrap_or(canonical)
}

/// ISO 7064 mod 11-2 check character over the first 15 digits
pub fn check_digit(digits: &str) -> Option<char> {
    let mut total: u32 = 0;
    for c in digits.chars() {
        total = (total + c.to_digit(10)?) * 2;
    }
    match (12 - total % 11) % 11 {
        10 => Some('X'),
        d => char::from_digit(d, 10),
    }
}

impl IdentifierSystem for Orcid {
    const NAME: &'static str = "orcid";
    const FAMILY: Family = Family::Iso;

    fn canonical_grammar() -> &'static Regex {
        &ORCID
    }

    fn local_grammar() -> Option<&'static Regex> {
        Some(&ORCID_LOCAL)
    }

    fn normalize(raw: &str) -> String {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        let body = ["https://orcid.org/", "http://orcid.org/", "orcid:"]
            .iter()
            .find(|p| lower.starts_with(**p))
            .map(|p| &trimmed[p.len()..])
            .unwrap_or(trimmed);
        format!("{}{}", ORCID_ORG, body.to_ascii_uppercase())
    }

    fn validate(canonical: &str) -> bool {
        let digits: String = suffix(canonical).chars().filter(|c| *c != '-').collect();
        if digits.len() != 16 {
            return false;
        }
        let (body, last) = digits.split_at(15);
        check_digit(body).is_some_and(|expected| last.starts_with(expected))
    }

    fn local_form(canonical: &str) -> Option<String> {
        Some(format!("orcid:{}", suffix(canonical)))
    }
}

#[async_trait]
impl System for Orcid {
    async fn fetch_metadata(&self, mut fetch: Fetch<'_, Self>) -> IdResult<Option<Value>> {
        let ctx = fetch.ctx;
        let url = format!("{}{}", PUBLIC_API, suffix(fetch.identifier.as_str()));
        let key = fetch.identifier.to_string();
        fetch
            .cached("orcid_json", "metadata", &key, move || async move {
                let resp = ctx.send(&accept_request(&url, "application/orcid+json")).await?;
                if !resp.is_success() {
                    return Err(IdError::from_status(resp.status, &resp.url));
                }
                Ok(Fetched::new(Some(resp.json()?), resp))
            })
            .await
    }

    fn bound_identifier(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/orcid-identifier/uri")
    }

    fn freshness(&self, metadata: &Value) -> Option<String> {
        metadata
            .pointer("/history/submission-date/value")
            .map(|v| v.to_string())
    }

    fn label(&self, metadata: &Value) -> Option<String> {
        let given = text_at(metadata, "/person/name/given-names/value");
        let family = text_at(metadata, "/person/name/family-name/value");
        match (given, family) {
            (Some(g), Some(f)) => Some(format!("{} {}", g, f)),
            (g, f) => g.or(f),
        }
    }

    fn synonyms(&self, metadata: &Value) -> Vec<String> {
        strings(metadata.pointer("/person/other-names/other-name"), "content")
    }

    fn description(&self, metadata: &Value) -> Option<String> {
        text_at(metadata, "/person/biography/content")
    }
}
