//! Typed, backend-agnostic search expression tree.
//!
//! The compiler's output. Backends walk the tree with exhaustive `match`;
//! the enum is the full contract, there is no visitor layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::registry::SearchParameterInfo;

/// Logical element a leaf comparison addresses within an indexed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    /// Lower bound of a date/period index entry.
    DateTimeStart,
    /// Upper bound of a date/period index entry.
    DateTimeEnd,
    Number,
    Quantity,
    QuantityCode,
    QuantitySystem,
    ReferenceBaseUri,
    ReferenceResourceId,
    ReferenceResourceType,
    String,
    TokenCode,
    TokenSystem,
    /// Display/text part of a coding, for the `:text` modifier.
    TokenText,
    /// Identifier value part, for the `:of-type` modifier.
    TokenValue,
    Uri,
    UriFragment,
    UriVersion,
}

/// Typed operand of an ordered comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    DateTime(DateTime<Utc>),
    Number(Decimal),
}

/// Ordered comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

/// String comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringOperator {
    Equals,
    StartsWith,
    Contains,
    EndsWith,
    /// The stored value is a prefix of the query value (`:above` on URIs).
    LeftSideStartsWith,
}

/// n-ary boolean connective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MultiaryOperator {
    And,
    Or,
}

/// Target of a `:missing` test.
#[derive(Debug, Clone, PartialEq)]
pub enum MissingTarget {
    /// A single element of an index entry (e.g. the token system).
    Field(FieldName),
    /// The whole parameter has no index entries at all.
    Parameter(Arc<SearchParameterInfo>),
}

/// A compiled search expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Scopes a subtree to one search parameter's index entries.
    SearchParameter {
        parameter: Arc<SearchParameterInfo>,
        expression: Box<Expression>,
    },
    /// Ordered comparison against a typed operand.
    Binary {
        field: FieldName,
        operator: BinaryOperator,
        value: Operand,
    },
    /// String comparison, optionally case/accent-insensitive.
    StringCompare {
        field: FieldName,
        operator: StringOperator,
        value: String,
        ignore_case: bool,
    },
    /// Conjunction or disjunction over two or more subtrees.
    Multiary {
        operator: MultiaryOperator,
        expressions: Vec<Expression>,
    },
    /// Presence/absence test.
    Missing {
        target: MissingTarget,
        is_missing: bool,
    },
    /// Chained (or reverse-chained) search through a reference parameter.
    /// `expression` applies to resources of `target_type`; matches propagate
    /// back through `parameter` to the source types.
    Chained {
        source_types: Vec<String>,
        parameter: Arc<SearchParameterInfo>,
        target_type: String,
        reversed: bool,
        expression: Box<Expression>,
    },
    /// Scopes a subtree to the n-th component of a composite index entry.
    CompositeComponent {
        index: usize,
        expression: Box<Expression>,
    },
}

impl Expression {
    /// Conjunction of `expressions`; a single element passes through as-is.
    pub fn and_join(mut expressions: Vec<Expression>) -> Expression {
        if expressions.len() == 1 {
            return expressions.remove(0);
        }
        Expression::Multiary {
            operator: MultiaryOperator::And,
            expressions,
        }
    }

    /// Disjunction of `expressions`; a single element passes through as-is.
    pub fn or_join(mut expressions: Vec<Expression>) -> Expression {
        if expressions.len() == 1 {
            return expressions.remove(0);
        }
        Expression::Multiary {
            operator: MultiaryOperator::Or,
            expressions,
        }
    }

    pub fn equals_string(field: FieldName, value: impl Into<String>) -> Expression {
        Expression::StringCompare {
            field,
            operator: StringOperator::Equals,
            value: value.into(),
            ignore_case: false,
        }
    }

    pub fn binary(field: FieldName, operator: BinaryOperator, value: Operand) -> Expression {
        Expression::Binary {
            field,
            operator,
            value,
        }
    }
}
