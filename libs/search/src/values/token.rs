//! Token and identifier-of-type value parsing.

use crate::error::{Error, Result};
use crate::escape::{split_unescaped, unescape};

/// The system part of a token search value. `code` alone means any system;
/// `|code` explicitly requires the element to carry no system at all.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TokenSystem {
    Any,
    None,
    Value(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValue {
    pub system: TokenSystem,
    pub code: Option<String>,
}

/// The three mandatory parts of an `:of-type` identifier value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierOfType {
    pub system: String,
    pub code: String,
    pub value: String,
}

/// Parse a token search value: `code`, `system|code`, `system|` or `|code`.
pub fn parse_token(raw: &str) -> Result<TokenValue> {
    let parts = split_unescaped(raw, '|');
    match parts.as_slice() {
        [code] => {
            let code = unescape(code)?;
            if code.is_empty() {
                return Err(Error::InvalidValue(
                    "token search value must not be empty".to_string(),
                ));
            }
            Ok(TokenValue {
                system: TokenSystem::Any,
                code: Some(code),
            })
        }
        [system, code] => {
            let system = unescape(system)?;
            let code = unescape(code)?;
            match (system.is_empty(), code.is_empty()) {
                (true, true) => Err(Error::InvalidValue(
                    "token search value must have a system or a code".to_string(),
                )),
                (true, false) => Ok(TokenValue {
                    system: TokenSystem::None,
                    code: Some(code),
                }),
                (false, true) => Ok(TokenValue {
                    system: TokenSystem::Value(system),
                    code: None,
                }),
                (false, false) => Ok(TokenValue {
                    system: TokenSystem::Value(system),
                    code: Some(code),
                }),
            }
        }
        _ => Err(Error::InvalidValue(format!(
            "token search value has too many '|' separators: {}",
            raw
        ))),
    }
}

/// Parse an `:of-type` identifier value. Exactly three non-empty parts
/// (`system|code|value`) are required; anything else fails the request.
pub fn parse_identifier_of_type(raw: &str) -> Result<IdentifierOfType> {
    let parts = split_unescaped(raw, '|');
    let [system, code, value] = parts.as_slice() else {
        return Err(Error::InvalidSearchOperation(format!(
            "of-type value must be 'type-system|type-code|value': {}",
            raw
        )));
    };
    let system = unescape(system)?;
    let code = unescape(code)?;
    let value = unescape(value)?;
    if system.is_empty() || code.is_empty() || value.is_empty() {
        return Err(Error::InvalidSearchOperation(format!(
            "of-type value requires all three parts to be non-empty: {}",
            raw
        )));
    }
    Ok(IdentifierOfType {
        system,
        code,
        value,
    })
}
