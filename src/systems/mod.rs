//! Bundled identifier systems
//!
//! Each submodule pairs an [`IdentifierSystem`](crate::identifier::IdentifierSystem)
//! grammar with a [`System`](crate::stream::System) fetch routine.

pub mod doi;
pub mod orcid;
pub mod protocols_io;
pub mod ror;
pub mod rrid;
pub mod uri;

pub use doi::Doi;
pub use orcid::Orcid;
pub use protocols_io::ProtocolsIo;
pub use ror::Ror;
pub use rrid::Rrid;
pub use uri::Uri;

use crate::context::Context;
use crate::error::{IdError, IdResult};
use crate::identifier::Identifier;
use crate::resolver::HttpRequest;
use crate::stream::{Record, Stream};
use serde_json::Value;
use std::sync::Arc;

/// GET with an Accept header, redirects followed, body read
pub(crate) fn accept_request(url: &str, accept: &str) -> HttpRequest {
    HttpRequest::fetch(url).header("Accept", accept)
}

/// String at a JSON pointer
pub(crate) fn text_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strings of an array, taking `field` from object members
pub(crate) fn strings(value: Option<&Value>, field: &str) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => item.get(field).and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Stream of whichever bundled system recognized the input
#[derive(Debug)]
pub enum AnyStream {
    Doi(Stream<Doi>),
    Orcid(Stream<Orcid>),
    Ror(Stream<Ror>),
    ProtocolsIo(Stream<ProtocolsIo>),
    Rrid(Stream<Rrid>),
    Uri(Stream<Uri>),
}

impl AnyStream {
    pub fn system_name(&self) -> &'static str {
        match self {
            AnyStream::Doi(s) => s.identifier().system_name(),
            AnyStream::Orcid(s) => s.identifier().system_name(),
            AnyStream::Ror(s) => s.identifier().system_name(),
            AnyStream::ProtocolsIo(s) => s.identifier().system_name(),
            AnyStream::Rrid(s) => s.identifier().system_name(),
            AnyStream::Uri(s) => s.identifier().system_name(),
        }
    }

    pub async fn as_record(&mut self, include_description: bool) -> Record {
        match self {
            AnyStream::Doi(s) => s.as_record(include_description).await,
            AnyStream::Orcid(s) => s.as_record(include_description).await,
            AnyStream::Ror(s) => s.as_record(include_description).await,
            AnyStream::ProtocolsIo(s) => s.as_record(include_description).await,
            AnyStream::Rrid(s) => s.as_record(include_description).await,
            AnyStream::Uri(s) => s.as_record(include_description).await,
        }
    }
}

/// Pick a system by the structure of `raw`
///
/// More specific systems are tried first, plain URIs last.
pub fn detect(ctx: Arc<Context>, raw: &str) -> IdResult<AnyStream> {
    if let Ok(id) = Identifier::<Doi>::new(raw) {
        return Ok(AnyStream::Doi(Stream::from_identifier(ctx, id)));
    }
    if let Ok(id) = Identifier::<Orcid>::new(raw) {
        return Ok(AnyStream::Orcid(Stream::from_identifier(ctx, id)));
    }
    if let Ok(id) = Identifier::<Ror>::new(raw) {
        return Ok(AnyStream::Ror(Stream::from_identifier(ctx, id)));
    }
    if let Ok(id) = Identifier::<ProtocolsIo>::new(raw) {
        return Ok(AnyStream::ProtocolsIo(Stream::from_identifier(ctx, id)));
    }
    if let Ok(id) = Identifier::<Rrid>::new(raw) {
        return Ok(AnyStream::Rrid(Stream::from_identifier(ctx, id)));
    }
    if let Ok(id) = Identifier::<Uri>::new(raw) {
        return Ok(AnyStream::Uri(Stream::from_identifier(ctx, id)));
    }

    Err(IdError::MalformedIdentifier {
        system: "any",
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, ScriptedTransport};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_detect_by_structure() {
        let dir = tempdir().unwrap();
        let ctx = context(&Arc::new(ScriptedTransport::new()), dir.path());
        let cases = [
            ("doi:10.1038/nature12373", "doi"),
            ("https://dx.doi.org/10.1038/nature12373", "doi"),
            ("0000-0002-1825-0097", "orcid"),
            ("https://ror.org/05dxps055", "ror"),
            ("https://protocols.io/view/some-protocol-abc123", "protocols.io"),
            ("RRID:AB_123456", "rrid"),
            ("https://example.org/page", "uri"),
        ];
        for (raw, system) in cases {
            let stream = detect(ctx.clone(), raw).unwrap();
            assert_eq!(stream.system_name(), system, "{}", raw);
        }

        assert!(matches!(
            detect(ctx, "not an identifier"),
            Err(IdError::MalformedIdentifier { .. })
        ));
    }

    #[test]
    fn test_strings_from_mixed_arrays() {
        let value = json!(["a", {"name": "b"}, {"other": "c"}, 3]);
        assert_eq!(strings(Some(&value), "name"), vec!["a", "b"]);
        assert!(strings(None, "name").is_empty());
    }
}
