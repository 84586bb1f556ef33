//! Top-level query compilation.
//!
//! Splits each `(key, value)` pair into parameter name, modifier, and chain
//! segments, resolves chained and reverse-chained (`_has`) references across
//! resource types, and delegates terminal segments to the expression
//! builder. Unknown parameters are collected, not thrown.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::builder::{ExpressionBuilder, Modifier};
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::expressions::{Expression, MultiaryOperator};
use crate::registry::{ParamRegistry, SearchParamType, SearchParameterInfo};
use crate::rewrite::{DateTimeBoundedRangeRewriter, Rewriter};
use crate::values::ReferenceParser;

/// The compiler's output: the expression tree (absent when every parameter
/// was unsupported) plus the parameters that could not be compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub expression: Option<Expression>,
    pub unsupported: Vec<(String, String)>,
}

/// Compiles raw query parameters into [`Expression`] trees.
///
/// Holds no per-request state; one compiler is shared across requests. The
/// reference grammar is rebuilt lazily whenever the registry changes.
pub struct SearchQueryCompiler {
    registry: Arc<ParamRegistry>,
    config: SearchConfig,
    reference_parser: RwLock<Option<(u64, Arc<ReferenceParser>)>>,
}

impl SearchQueryCompiler {
    pub fn new(registry: Arc<ParamRegistry>, config: SearchConfig) -> Self {
        Self {
            registry,
            config,
            reference_parser: RwLock::new(None),
        }
    }

    /// Compile a full set of query parameters against the given resource
    /// type context. Unsupported parameters land in the side list; every
    /// other failure aborts the whole compilation.
    pub fn compile(
        &self,
        resource_types: &[String],
        parameters: &[(String, String)],
    ) -> Result<CompiledQuery> {
        let mut children = Vec::new();
        let mut unsupported = Vec::new();
        for (key, value) in parameters {
            match self.parse(resource_types, key, value) {
                Ok(expression) => children.push(expression),
                Err(Error::UnsupportedParameter(_)) => {
                    debug!(parameter = %key, "skipping unsupported search parameter");
                    unsupported.push((key.clone(), value.clone()));
                }
                Err(other) => return Err(other),
            }
        }
        let expression = if children.is_empty() {
            None
        } else {
            let root = Expression::Multiary {
                operator: MultiaryOperator::And,
                expressions: children,
            };
            Some(DateTimeBoundedRangeRewriter.rewrite(&root).into_owned())
        };
        Ok(CompiledQuery {
            expression,
            unsupported,
        })
    }

    /// Compile a single `(key, value)` pair.
    pub fn parse(
        &self,
        resource_types: &[String],
        key: &str,
        value: &str,
    ) -> Result<Expression> {
        if key.starts_with("_has:") {
            return self.parse_reverse_chain(resource_types, key, value);
        }
        let segments: Vec<&str> = key.split('.').collect();
        self.parse_segments(resource_types, &segments, value)
    }

    fn parse_segments(
        &self,
        resource_types: &[String],
        segments: &[&str],
        value: &str,
    ) -> Result<Expression> {
        let (head, tail) = match segments {
            [] => {
                return Err(Error::InvalidSearchOperation(
                    "empty search parameter name".to_string(),
                ));
            }
            [terminal] => return self.build_terminal(resource_types, terminal, value),
            [head, tail @ ..] => (*head, tail),
        };

        let (code, modifier) = self.split_segment(head)?;
        let info = self
            .resolve(resource_types, code)
            .ok_or_else(|| Error::UnsupportedParameter(code.to_string()))?;
        if info.param_type != SearchParamType::Reference {
            return Err(Error::InvalidSearchOperation(format!(
                "cannot chain through non-reference parameter '{}'",
                code
            )));
        }

        let candidates: Vec<String> = match &modifier {
            Some(Modifier::ResourceType(target)) => {
                if !info.target.is_empty() && !info.target.contains(target) {
                    return Err(Error::InvalidSearchOperation(format!(
                        "'{}' is not a supported target type for parameter '{}'",
                        target, code
                    )));
                }
                vec![target.clone()]
            }
            Some(other) => {
                return Err(Error::InvalidSearchOperation(format!(
                    "modifier ':{}' is not valid on a chained segment",
                    other
                )));
            }
            None => info.target.clone(),
        };
        if candidates.is_empty() {
            return Err(Error::UnsupportedParameter(segments.join(".")));
        }

        let mut branches = Vec::new();
        for candidate in candidates {
            let scope = vec![candidate.clone()];
            match self.parse_segments(&scope, tail, value) {
                Ok(inner) => branches.push(Expression::Chained {
                    source_types: resource_types.to_vec(),
                    parameter: Arc::clone(&info),
                    target_type: candidate,
                    reversed: false,
                    expression: Box::new(inner),
                }),
                // A tail unsupported for this target type just prunes the
                // candidate; other failures abort the chain.
                Err(Error::UnsupportedParameter(_)) => {}
                Err(other) => return Err(other),
            }
        }
        if branches.is_empty() {
            return Err(Error::UnsupportedParameter(segments.join(".")));
        }
        Ok(Expression::or_join(branches))
    }

    fn parse_reverse_chain(
        &self,
        resource_types: &[String],
        key: &str,
        value: &str,
    ) -> Result<Expression> {
        let rest = &key["_has:".len()..];
        let mut parts = rest.splitn(3, ':');
        let (Some(target_type), Some(ref_code), Some(tail)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::InvalidSearchOperation(format!(
                "reverse chain must take the form _has:Type:ref-parameter:parameter: {}",
                key
            )));
        };
        if target_type.is_empty() || ref_code.is_empty() || tail.is_empty() {
            return Err(Error::InvalidSearchOperation(format!(
                "reverse chain must take the form _has:Type:ref-parameter:parameter: {}",
                key
            )));
        }
        if !self.registry.is_resource_type(target_type) {
            return Err(Error::UnsupportedParameter(key.to_string()));
        }
        let info = self
            .registry
            .lookup(target_type, ref_code)
            .ok_or_else(|| Error::UnsupportedParameter(key.to_string()))?;
        if info.param_type != SearchParamType::Reference {
            return Err(Error::InvalidSearchOperation(format!(
                "cannot reverse chain through non-reference parameter '{}'",
                ref_code
            )));
        }
        if !info.target.is_empty()
            && !resource_types.iter().any(|rt| info.target.contains(rt))
        {
            return Err(Error::InvalidSearchOperation(format!(
                "parameter '{}' on '{}' does not reference the searched resource type",
                ref_code, target_type
            )));
        }
        let scope = vec![target_type.to_string()];
        let inner = self.parse(&scope, tail, value)?;
        Ok(Expression::Chained {
            source_types: resource_types.to_vec(),
            parameter: info,
            target_type: target_type.to_string(),
            reversed: true,
            expression: Box::new(inner),
        })
    }

    fn build_terminal(
        &self,
        resource_types: &[String],
        segment: &str,
        value: &str,
    ) -> Result<Expression> {
        let (code, modifier) = self.split_segment(segment)?;
        let info = self
            .resolve(resource_types, code)
            .ok_or_else(|| Error::UnsupportedParameter(code.to_string()))?;
        let reference_parser = self.reference_parser()?;
        let builder = ExpressionBuilder {
            registry: &self.registry,
            config: &self.config,
            reference_parser: &reference_parser,
        };
        let inner = builder.build(&info, modifier.as_ref(), value)?;
        Ok(Expression::SearchParameter {
            parameter: info,
            expression: Box::new(inner),
        })
    }

    fn split_segment<'k>(&self, segment: &'k str) -> Result<(&'k str, Option<Modifier>)> {
        let mut parts = segment.split(':');
        let code = parts.next().unwrap_or_default();
        let modifier = parts.next();
        if parts.next().is_some() {
            return Err(Error::InvalidSearchOperation(format!(
                "multiple modifier separators in '{}'",
                segment
            )));
        }
        match modifier {
            None => Ok((code, None)),
            Some(raw) => Ok((code, Some(Modifier::parse(raw, &self.registry)?))),
        }
    }

    fn resolve(
        &self,
        resource_types: &[String],
        code: &str,
    ) -> Option<Arc<SearchParameterInfo>> {
        resource_types
            .iter()
            .find_map(|rt| self.registry.lookup(rt, code))
    }

    /// Reference grammar for the current registry snapshot, rebuilt when
    /// the registry generation moves.
    fn reference_parser(&self) -> Result<Arc<ReferenceParser>> {
        let generation = self.registry.generation();
        if let Ok(guard) = self.reference_parser.read() {
            if let Some((cached_generation, parser)) = guard.as_ref() {
                if *cached_generation == generation {
                    return Ok(Arc::clone(parser));
                }
            }
        }
        let parser = Arc::new(ReferenceParser::new(
            &self.registry.resource_types(),
            self.config.normalized_base_url().as_deref(),
        )?);
        let mut guard = match self.reference_parser.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some((generation, Arc::clone(&parser)));
        Ok(parser)
    }
}
