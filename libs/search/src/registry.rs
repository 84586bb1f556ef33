//! Search-parameter registry.
//!
//! Holds the installed SearchParameter definitions and answers the lookups
//! the compiler needs: `(resource type, code)` to definition, canonical URL
//! to definition (for composite components), and the set of known resource
//! types. Lookups fall back through the abstract base types so parameters
//! defined on `Resource` (e.g. `_id`) apply everywhere.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// The nine FHIR search parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
    Special,
}

impl FromStr for SearchParamType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "number" => Ok(Self::Number),
            "date" => Ok(Self::Date),
            "string" => Ok(Self::String),
            "token" => Ok(Self::Token),
            "reference" => Ok(Self::Reference),
            "composite" => Ok(Self::Composite),
            "quantity" => Ok(Self::Quantity),
            "uri" => Ok(Self::Uri),
            "special" => Ok(Self::Special),
            other => Err(Error::InvalidSearchOperation(format!(
                "unknown search parameter type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Number => "number",
            Self::Date => "date",
            Self::String => "string",
            Self::Token => "token",
            Self::Reference => "reference",
            Self::Composite => "composite",
            Self::Quantity => "quantity",
            Self::Uri => "uri",
            Self::Special => "special",
        };
        f.write_str(s)
    }
}

/// One component of a composite search parameter: the canonical URL of the
/// component's definition plus the sub-expression selecting the element.
/// Field names mirror the FHIR SearchParameter resource so definitions
/// deserialize straight from their JSON form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompositeComponent {
    #[serde(rename = "definition")]
    pub definition_url: String,
    pub expression: String,
}

/// An installed search parameter definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchParameterInfo {
    /// Search parameter code as it appears in query strings.
    pub code: String,
    /// Canonical URL of the defining SearchParameter resource.
    pub url: String,
    #[serde(rename = "type")]
    pub param_type: SearchParamType,
    /// Resource types this parameter applies to.
    pub base: Vec<String>,
    /// FHIRPath expression selecting the indexed elements.
    #[serde(default)]
    pub expression: Option<String>,
    /// Allowed target resource types, for reference parameters.
    #[serde(default)]
    pub target: Vec<String>,
    /// Components, for composite parameters.
    #[serde(default, rename = "component")]
    pub components: Vec<CompositeComponent>,
    /// Whether the sort layer may order results by this parameter.
    #[serde(default)]
    pub supports_sort: bool,
}

impl SearchParameterInfo {
    pub fn is_composite(&self) -> bool {
        self.param_type == SearchParamType::Composite
    }
}

#[derive(Debug, Default)]
struct RegistrySnapshot {
    /// Keyed by (resource type, parameter code).
    by_key: HashMap<(String, String), Arc<SearchParameterInfo>>,
    /// Keyed by canonical URL, for composite component resolution.
    by_url: HashMap<String, Arc<SearchParameterInfo>>,
    /// Every concrete resource type seen in `base` or `target`.
    resource_types: BTreeSet<String>,
}

/// Thread-safe registry of search parameter definitions.
///
/// Reads take a cheap `Arc` clone of the current snapshot; installs build a
/// new snapshot under the write lock and bump the generation counter so
/// derived caches (such as the reference grammar) know to rebuild.
#[derive(Debug, Default)]
pub struct ParamRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    generation: AtomicU64,
    path_cache: PathCache,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a batch of definitions. Later definitions for the same
    /// (resource type, code) key replace earlier ones.
    pub fn install(&self, definitions: Vec<SearchParameterInfo>) {
        let mut guard = match self.snapshot.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = RegistrySnapshot {
            by_key: guard.by_key.clone(),
            by_url: guard.by_url.clone(),
            resource_types: guard.resource_types.clone(),
        };
        for definition in definitions {
            if let Some(expression) = &definition.expression {
                // Warm the path cache so first-lookup latency stays flat.
                self.path_cache.paths_for(expression);
            }
            let info = Arc::new(definition);
            for base in &info.base {
                if base != "Resource" && base != "DomainResource" {
                    next.resource_types.insert(base.clone());
                }
                next.by_key
                    .insert((base.clone(), info.code.clone()), Arc::clone(&info));
            }
            for target in &info.target {
                if target != "Resource" && target != "DomainResource" {
                    next.resource_types.insert(target.clone());
                }
            }
            next.by_url.insert(info.url.clone(), Arc::clone(&info));
        }
        debug!(
            parameters = next.by_key.len(),
            resource_types = next.resource_types.len(),
            "installed search parameter definitions"
        );
        *guard = Arc::new(next);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Monotonic counter bumped on every install. Derived caches key off it.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn current(&self) -> Arc<RegistrySnapshot> {
        match self.snapshot.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Look up a parameter definition for a resource type, falling back to
    /// the abstract bases `DomainResource` and `Resource`.
    pub fn lookup(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParameterInfo>> {
        let snapshot = self.current();
        for rt in [resource_type, "DomainResource", "Resource"] {
            if let Some(info) = snapshot.by_key.get(&(rt.to_string(), code.to_string())) {
                return Some(Arc::clone(info));
            }
        }
        None
    }

    /// Look up a parameter definition by its canonical URL.
    pub fn lookup_by_url(&self, url: &str) -> Option<Arc<SearchParameterInfo>> {
        self.current().by_url.get(url).map(Arc::clone)
    }

    /// All concrete resource types known to the registry, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        self.current().resource_types.iter().cloned().collect()
    }

    /// Whether `name` is a known concrete resource type.
    pub fn is_resource_type(&self, name: &str) -> bool {
        self.current().resource_types.contains(name)
    }

    /// The top-level alternatives of a parameter's FHIRPath expression.
    pub fn expression_paths(&self, info: &SearchParameterInfo) -> Arc<Vec<String>> {
        match &info.expression {
            Some(expression) => self.path_cache.paths_for(expression),
            None => Arc::new(Vec::new()),
        }
    }

    /// Resolve a composite component to its definition, enforcing that
    /// components are themselves non-composite.
    pub fn resolve_component(
        &self,
        parent: &SearchParameterInfo,
        component: &CompositeComponent,
    ) -> Result<Arc<SearchParameterInfo>> {
        let info = self.lookup_by_url(&component.definition_url).ok_or_else(|| {
            warn!(
                url = %component.definition_url,
                parent = %parent.code,
                "composite component definition not installed"
            );
            Error::UnsupportedParameter(parent.code.clone())
        })?;
        if info.is_composite() {
            return Err(Error::InvalidSearchOperation(format!(
                "composite parameter '{}' has a composite component '{}'",
                parent.code, info.code
            )));
        }
        Ok(info)
    }
}

/// Insert-only cache of split FHIRPath expressions.
///
/// A SearchParameter expression is a `|`-separated union of paths; splitting
/// is paren-aware so `where(x | y)` stays one path.
#[derive(Debug, Default)]
pub struct PathCache {
    inner: RwLock<HashMap<String, Arc<Vec<String>>>>,
}

impl PathCache {
    pub fn paths_for(&self, expression: &str) -> Arc<Vec<String>> {
        if let Ok(guard) = self.inner.read() {
            if let Some(paths) = guard.get(expression) {
                return Arc::clone(paths);
            }
        }
        let paths = Arc::new(split_expression_paths(expression));
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(guard.entry(expression.to_string()).or_insert(paths))
    }
}

/// Split a FHIRPath union expression on top-level `|`, trimming whitespace.
fn split_expression_paths(expression: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in expression.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '|' if depth == 0 => {
                paths.push(expression[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    paths.push(expression[start..].trim().to_string());
    paths.retain(|p| !p.is_empty());
    paths
}
