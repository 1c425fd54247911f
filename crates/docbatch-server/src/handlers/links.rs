//! Link field resolvers.
//!
//! Forward links store identifiers in a document field and resolve through
//! the identifier cache. Reverse links (`linkFrom`) are path queries over the
//! documents pointing back at the current one.

use std::str::FromStr;
use std::sync::OnceLock;

use docbatch_domain::{DocumentLoader, LoaderResult};
use docbatch_storage::{Document, DocumentReader};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::query::fetch_all;

/// Resolves a field holding one identifier.
///
/// Returns `None` when the field is missing or not a string.
pub async fn resolve_ref<R: DocumentReader>(
    loader: &DocumentLoader<R>,
    doc: &Document,
    field: &str,
) -> LoaderResult<Option<Document>> {
    match doc.get(field).and_then(Value::as_str) {
        Some(id) => loader.get_by_uuid(id).await,
        None => Ok(None),
    }
}

/// Resolves a field holding a list of identifiers.
///
/// Returns `None` when the field is not an array. Entries that are not
/// strings, or that resolve to nothing, come back as `None` in their slot.
pub async fn resolve_ref_list<R: DocumentReader>(
    loader: &DocumentLoader<R>,
    doc: &Document,
    field: &str,
) -> LoaderResult<Option<Vec<Option<Document>>>> {
    let Some(entries) = doc.get(field).and_then(Value::as_array) else {
        return Ok(None);
    };
    let lookups = entries.iter().map(|entry| async move {
        match entry.as_str() {
            Some(id) => loader.get_by_uuid(id).await,
            None => Ok(None),
        }
    });
    let docs = futures::future::try_join_all(lookups).await?;
    Ok(Some(docs))
}

/// Resolves a reverse link: interpolates `doc` into `path` and fetches the
/// matching documents in order.
pub async fn resolve_link_from<R: DocumentReader>(
    loader: &DocumentLoader<R>,
    doc: &Document,
    path: &str,
    order_by: Option<&str>,
) -> LoaderResult<Vec<Document>> {
    let ids = loader.query_json_path(path, doc.value(), order_by).await?;
    fetch_all(loader, ids.iter().map(String::as_str)).await
}

/// Default reverse-link query: visible documents of `from_type` whose
/// `from_property` holds the current document's `uuid`.
pub fn link_from_query(from_type: &str, from_property: &str) -> String {
    format!(
        r#"$."@type"[*] == {} && $.{} == $uuid && $.status != "deleted" && $.status != "replaced""#,
        Value::String(from_type.to_string()),
        path_member(from_property),
    )
}

/// A member name usable after `$.`, quoted unless it is a plain identifier.
fn path_member(name: &str) -> String {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT.get_or_init(|| {
        Regex::new(r"^[_A-Za-z][_0-9A-Za-z]*$").expect("identifier pattern is valid")
    });
    if ident.is_match(name) {
        name.to_string()
    } else {
        Value::String(name.to_string()).to_string()
    }
}

/// Malformed `linkFrom` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed linkFrom '{0}': expected Type.property")]
pub struct LinkFromParseError(String);

/// A `Type.property` reverse-link declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrom {
    pub from_type: String,
    pub from_property: String,
}

impl LinkFrom {
    /// The default path query for this link.
    pub fn query(&self) -> String {
        link_from_query(&self.from_type, &self.from_property)
    }
}

impl FromStr for LinkFrom {
    type Err = LinkFromParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((from_type, from_property))
                if !from_type.is_empty()
                    && !from_property.is_empty()
                    && !from_property.contains('.') =>
            {
                Ok(Self {
                    from_type: from_type.to_string(),
                    from_property: from_property.to_string(),
                })
            }
            _ => Err(LinkFromParseError(s.to_string())),
        }
    }
}
