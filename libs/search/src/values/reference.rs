//! Reference value parsing.
//!
//! A reference search value takes one of three shapes: an absolute URL
//! (`https://host/fhir/Patient/123`), a relative reference (`Patient/123`),
//! or a bare resource id (`123`). The grammar's resource-type alternation is
//! built from the registry's known types so the two never drift apart.

use regex::Regex;

use crate::error::{Error, Result};

/// Where a reference can point, as far as the query text tells us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Absolute URL matching this server's configured base.
    Internal,
    /// Absolute URL pointing at another server.
    External,
    /// Relative reference or bare id; either interpretation is possible.
    InternalOrExternal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceValue {
    pub kind: ReferenceKind,
    /// Retained only for external references.
    pub base_uri: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: String,
    /// Version from a `/_history/{version}` suffix, when present.
    pub version: Option<String>,
}

/// Precompiled reference grammar. Built once per registry snapshot and
/// reused across requests.
#[derive(Debug)]
pub struct ReferenceParser {
    pattern: Option<Regex>,
    base_url: Option<String>,
}

impl ReferenceParser {
    pub fn new<S: AsRef<str>>(resource_types: &[S], base_url: Option<&str>) -> Result<Self> {
        let pattern = if resource_types.is_empty() {
            None
        } else {
            // Longer names first so e.g. MedicationRequest wins over Medication.
            let mut names: Vec<&str> = resource_types.iter().map(|s| s.as_ref()).collect();
            names.sort_by_key(|n| std::cmp::Reverse(n.len()));
            let alternation = names
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|");
            let source = format!(
                r"^(?:(?P<base>https?://[^?#]*?)/)?(?P<type>{})/(?P<id>[A-Za-z0-9\-\.]{{1,64}})(?:/_history/(?P<version>[A-Za-z0-9\-\.]{{1,64}}))?$",
                alternation
            );
            Some(Regex::new(&source).map_err(|e| {
                Error::InvalidSearchOperation(format!("failed to build reference grammar: {}", e))
            })?)
        };
        Ok(Self {
            pattern,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
        })
    }

    /// Classify and decompose a reference search value. Never fails: input
    /// that matches no reference shape is treated as a bare resource id.
    pub fn parse(&self, raw: &str) -> ReferenceValue {
        let caps = match self.pattern.as_ref().and_then(|p| p.captures(raw)) {
            Some(caps) => caps,
            None => {
                return ReferenceValue {
                    kind: ReferenceKind::InternalOrExternal,
                    base_uri: None,
                    resource_type: None,
                    resource_id: raw.to_string(),
                    version: None,
                };
            }
        };
        let resource_type = Some(caps["type"].to_string());
        let resource_id = caps["id"].to_string();
        let version = caps.name("version").map(|v| v.as_str().to_string());
        match caps.name("base") {
            Some(base) => {
                let base = base.as_str().trim_end_matches('/');
                if self.base_url.as_deref() == Some(base) {
                    ReferenceValue {
                        kind: ReferenceKind::Internal,
                        base_uri: None,
                        resource_type,
                        resource_id,
                        version,
                    }
                } else {
                    ReferenceValue {
                        kind: ReferenceKind::External,
                        base_uri: Some(base.to_string()),
                        resource_type,
                        resource_id,
                        version,
                    }
                }
            }
            None => ReferenceValue {
                kind: ReferenceKind::InternalOrExternal,
                base_uri: None,
                resource_type,
                resource_id,
                version,
            },
        }
    }
}
