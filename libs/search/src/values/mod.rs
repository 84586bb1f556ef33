//! Typed search values.
//!
//! Each FHIR search value kind parses into one variant of [`SearchValue`].
//! Values are immutable once constructed; comparison is value-based and
//! rejects cross-kind comparisons instead of guessing.

mod date;
mod number;
mod reference;
mod token;
mod uri;

pub use date::{parse_date_range, widen_date_range, DateRange};
pub use number::{parse_number, parse_quantity, NumberValue, QuantityValue};
pub use reference::{ReferenceKind, ReferenceParser, ReferenceValue};
pub use token::{parse_identifier_of_type, parse_token, IdentifierOfType, TokenSystem, TokenValue};
pub use uri::{parse_uri, UriValue};

use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Which bound of a ranged value participates in an ordering comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonRange {
    Min,
    Max,
}

/// A parsed search value of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchValue {
    String(String),
    Number(NumberValue),
    Date(DateRange),
    Token(TokenValue),
    Quantity(QuantityValue),
    Uri(UriValue),
    Reference(ReferenceValue),
    IdentifierOfType(IdentifierOfType),
    /// One value list per composite component, in declaration order.
    Composite(Vec<Vec<SearchValue>>),
}

impl SearchValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Date(_) => "date",
            Self::Token(_) => "token",
            Self::Quantity(_) => "quantity",
            Self::Uri(_) => "uri",
            Self::Reference(_) => "reference",
            Self::IdentifierOfType(_) => "identifier-of-type",
            Self::Composite(_) => "composite",
        }
    }

    /// Composites may not nest; everything else may appear as a component.
    pub fn is_valid_as_composite_component(&self) -> bool {
        !matches!(self, Self::Composite(_))
    }

    /// Ordering between two values of the same kind, picking the requested
    /// bound for ranged kinds. Cross-kind and composite comparisons error.
    pub fn compare(&self, other: &SearchValue, range: ComparisonRange) -> Result<Ordering> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Ok(a.cmp(b)),
            (Self::Number(a), Self::Number(b)) => Ok(match range {
                ComparisonRange::Min => a.low.cmp(&b.low),
                ComparisonRange::Max => a.high.cmp(&b.high),
            }),
            (Self::Date(a), Self::Date(b)) => Ok(match range {
                ComparisonRange::Min => a.start.cmp(&b.start),
                ComparisonRange::Max => a.end.cmp(&b.end),
            }),
            (Self::Quantity(a), Self::Quantity(b)) => Ok(match range {
                ComparisonRange::Min => a.number.low.cmp(&b.number.low),
                ComparisonRange::Max => a.number.high.cmp(&b.number.high),
            }),
            (Self::Token(a), Self::Token(b)) => {
                Ok((&a.code, &a.system).cmp(&(&b.code, &b.system)))
            }
            (Self::Uri(a), Self::Uri(b)) => Ok(a.uri.cmp(&b.uri)),
            (Self::Reference(a), Self::Reference(b)) => {
                Ok((&a.resource_type, &a.resource_id).cmp(&(&b.resource_type, &b.resource_id)))
            }
            (Self::IdentifierOfType(a), Self::IdentifierOfType(b)) => {
                Ok((&a.system, &a.code, &a.value).cmp(&(&b.system, &b.code, &b.value)))
            }
            (Self::Composite(_), _) | (_, Self::Composite(_)) => Err(
                Error::InvalidSearchOperation("composite values are not orderable".to_string()),
            ),
            (a, b) => Err(Error::InvalidSearchOperation(format!(
                "cannot compare a {} value with a {} value",
                a.kind(),
                b.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn cross_kind_comparison_is_rejected() {
        let s = SearchValue::String("a".to_string());
        let n = SearchValue::Number(NumberValue {
            low: Decimal::ONE,
            high: Decimal::ONE,
        });
        assert!(s.compare(&n, ComparisonRange::Min).is_err());
    }

    #[test]
    fn number_comparison_uses_requested_bound() {
        let narrow = SearchValue::Number(NumberValue {
            low: Decimal::new(15, 1),
            high: Decimal::new(25, 1),
        });
        let wide = SearchValue::Number(NumberValue {
            low: Decimal::ONE,
            high: Decimal::new(30, 1),
        });
        assert_eq!(
            narrow.compare(&wide, ComparisonRange::Min).unwrap(),
            Ordering::Greater
        );
        assert_eq!(
            narrow.compare(&wide, ComparisonRange::Max).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn composite_values_reject_nesting() {
        let leaf = SearchValue::String("a".to_string());
        assert!(leaf.is_valid_as_composite_component());
        let composite = SearchValue::Composite(vec![vec![leaf]]);
        assert!(!composite.is_valid_as_composite_component());
    }
}
