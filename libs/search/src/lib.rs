//! FHIR search-query compiler.
//!
//! Turns a resource type plus `(parameter[:modifier], value)` query pairs
//! into a typed, storage-agnostic [`Expression`] tree. Storage engines
//! translate the tree into native queries; this crate performs no I/O and
//! executes nothing.
//!
//! ```
//! use std::sync::Arc;
//! use lumen_search::{
//!     ParamRegistry, SearchConfig, SearchParamType, SearchParameterInfo, SearchQueryCompiler,
//! };
//!
//! let registry = Arc::new(ParamRegistry::new());
//! registry.install(vec![SearchParameterInfo {
//!     code: "address-city".to_string(),
//!     url: "http://hl7.org/fhir/SearchParameter/individual-address-city".to_string(),
//!     param_type: SearchParamType::String,
//!     base: vec!["Patient".to_string()],
//!     expression: Some("Patient.address.city".to_string()),
//!     target: vec![],
//!     components: vec![],
//!     supports_sort: true,
//! }]);
//!
//! let compiler = SearchQueryCompiler::new(registry, SearchConfig::default());
//! let compiled = compiler
//!     .compile(
//!         &["Patient".to_string()],
//!         &[("address-city".to_string(), "Seattle".to_string())],
//!     )
//!     .unwrap();
//! assert!(compiled.expression.is_some());
//! assert!(compiled.unsupported.is_empty());
//! ```

pub mod builder;
pub mod config;
pub mod continuation;
pub mod error;
pub mod escape;
pub mod expressions;
pub mod parser;
pub mod registry;
pub mod rewrite;
pub mod values;

pub use builder::{ExpressionBuilder, Modifier, SearchPrefix};
pub use config::SearchConfig;
pub use continuation::{
    decode_continuation_token, encode_continuation_token, extract_continuation_token,
};
pub use error::{Error, Result};
pub use expressions::{
    BinaryOperator, Expression, FieldName, MissingTarget, MultiaryOperator, Operand,
    StringOperator,
};
pub use parser::{CompiledQuery, SearchQueryCompiler};
pub use registry::{
    CompositeComponent, ParamRegistry, PathCache, SearchParamType, SearchParameterInfo,
};
pub use rewrite::{DateTimeBoundedRangeRewriter, Rewriter};
pub use values::{ComparisonRange, ReferenceKind, ReferenceParser, ReferenceValue, SearchValue};
