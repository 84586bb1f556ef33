//! Compiler configuration

use serde::Deserialize;

/// Configuration for search-query compilation.
///
/// The compiler performs no I/O; callers construct this from their own
/// configuration layer and pass it by value.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// The server's own base URL (scheme://host[/path]). Absolute references
    /// matching this base classify as internal; others as external.
    pub base_url: Option<String>,

    /// Whether URI values are split into canonical base/version/fragment
    /// parts. STU3 never splits; R4 and later do.
    pub split_canonical_uris: bool,

    /// Relative window applied by the `ap` (approximately) comparator,
    /// in percent of the value (or of the date range's width).
    pub approx_window_percent: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            split_canonical_uris: true,
            approx_window_percent: 10,
        }
    }
}

impl SearchConfig {
    /// Base URL with any trailing slash removed, for prefix comparison.
    pub(crate) fn normalized_base_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|b| b.trim_end_matches('/').to_string())
    }
}
