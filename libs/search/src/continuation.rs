//! Continuation-token codec.
//!
//! Pagination tokens travel as opaque Base64 text. New tokens use the
//! URL-safe alphabet without padding; decoding also accepts the padded
//! standard alphabet that older servers emitted, so tokens issued before
//! the format change keep working.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::{Error, Result};

pub fn encode_continuation_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(token.as_bytes())
}

pub fn decode_continuation_token(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|_| {
            Error::InvalidContinuationToken(format!("not valid Base64: {}", encoded))
        })?;
    String::from_utf8(bytes).map_err(|_| {
        Error::InvalidContinuationToken(format!("token is not valid UTF-8: {}", encoded))
    })
}

/// Pull the continuation token out of the raw query parameters. At most one
/// occurrence of `name` is allowed.
pub fn extract_continuation_token(
    parameters: &[(String, String)],
    name: &str,
) -> Result<Option<String>> {
    let mut found = None;
    for (key, value) in parameters {
        if key == name {
            if found.is_some() {
                return Err(Error::InvalidSearchOperation(format!(
                    "parameter '{}' may appear at most once",
                    name
                )));
            }
            found = Some(decode_continuation_token(value)?);
        }
    }
    Ok(found)
}
