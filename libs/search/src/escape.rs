//! Search value escaping (FHIR "Encoding Note").
//!
//! FHIR search values may escape special separator characters using `\`:
//! - `\,` (value separator)
//! - `\|` (token system/code separator)
//! - `\$` (composite tuple separator)
//! - `\\` (literal backslash)

use crate::error::{Error, Result};

const ESCAPABLE: [char; 4] = ['\\', ',', '$', '|'];

/// Split `input` on every unescaped occurrence of `sep`.
///
/// Escaped separators (preceded by `\`) are kept, still escaped, inside their
/// segment. The empty string yields a single empty segment.
pub fn split_unescaped(input: &str, sep: char) -> Vec<&str> {
    debug_assert!(sep.is_ascii());
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let bytes = input.as_bytes();
    while i < bytes.len() {
        match bytes[i] as char {
            '\\' => {
                i += 1;
                if i < bytes.len() {
                    i += 1;
                }
            }
            c if c == sep => {
                out.push(&input[start..i]);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    out.push(&input[start..]);
    out
}

/// Remove escaping from a search value fragment.
///
/// A trailing `\` or an escape of anything other than `\ , $ |` is malformed.
pub fn unescape(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) if ESCAPABLE.contains(&next) => out.push(next),
            Some(next) => {
                return Err(Error::InvalidValue(format!(
                    "invalid escape sequence '\\{}' in search value: {}",
                    next, input
                )));
            }
            None => {
                return Err(Error::InvalidValue(format!(
                    "dangling escape character in search value: {}",
                    input
                )));
            }
        }
    }
    Ok(out)
}

/// Escape every separator character in `input` so it round-trips through
/// [`unescape`] unchanged.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if ESCAPABLE.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_escaped_pipe_in_segment() {
        assert_eq!(split_unescaped("a\\|b|c", '|'), vec!["a\\|b", "c"]);
    }

    #[test]
    fn split_leading_separator_yields_empty_first_segment() {
        assert_eq!(split_unescaped("|b", '|'), vec!["", "b"]);
    }

    #[test]
    fn split_empty_string_yields_single_empty_segment() {
        assert_eq!(split_unescaped("", '|'), vec![""]);
    }

    #[test]
    fn split_composite_respects_escaped_dollar() {
        assert_eq!(split_unescaped("a\\$a$b", '$'), vec!["a\\$a", "b"]);
    }

    #[test]
    fn unescape_reverses_escape() {
        for s in ["", "plain", "a|b", "a,b$c\\d", "\\", "ab|$,\\"] {
            assert_eq!(unescape(&escape(s)).unwrap(), s);
        }
    }

    #[test]
    fn escape_is_stable_on_canonical_form() {
        let canonical = escape("a|b$c,d\\e");
        assert_eq!(escape(&unescape(&canonical).unwrap()), canonical);
    }

    #[test]
    fn unescape_rejects_dangling_backslash() {
        assert!(unescape("abc\\").is_err());
    }

    #[test]
    fn unescape_rejects_unknown_escape() {
        assert!(unescape("a\\b").is_err());
    }
}
