//! URI value parsing, with optional canonical-form splitting.

use crate::error::Result;
use crate::escape::{split_unescaped, unescape};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriValue {
    pub uri: String,
    pub version: Option<String>,
    pub fragment: Option<String>,
}

/// Parse a URI search value. When `split_canonical` is set and the value is
/// an http(s) URL, a trailing `|version` and `#fragment` are split out
/// (canonical reference form). STU3 callers pass `false` and always get the
/// whole value as one opaque URI.
pub fn parse_uri(raw: &str, split_canonical: bool) -> Result<UriValue> {
    if !split_canonical || !is_canonical_url(raw) {
        return Ok(UriValue {
            uri: unescape(raw)?,
            version: None,
            fragment: None,
        });
    }

    let (head, fragment) = match raw.split_once('#') {
        Some((head, fragment)) if !fragment.is_empty() => (head, Some(unescape(fragment)?)),
        _ => (raw, None),
    };
    let parts = split_unescaped(head, '|');
    let (uri, version) = match parts.as_slice() {
        // An empty version part (`uri|`) means no version, but the trailing
        // separator still comes off the uri.
        [uri, version] => {
            let version = unescape(version)?;
            (*uri, if version.is_empty() { None } else { Some(version) })
        }
        _ => (head, None),
    };
    Ok(UriValue {
        uri: unescape(uri)?,
        version,
        fragment,
    })
}

fn is_canonical_url(raw: &str) -> bool {
    raw.starts_with("http://") || raw.starts_with("https://")
}
