//! Post-parse expression rewrites.
//!
//! Rewrites are pure and idempotent. A rewriter that changes nothing must
//! hand back the borrowed input so callers can detect the no-op cheaply;
//! `Cow::Borrowed` is that signal.

use std::borrow::Cow;
use std::sync::Arc;

use crate::expressions::{
    BinaryOperator, Expression, FieldName, MultiaryOperator, Operand,
};

pub trait Rewriter {
    fn rewrite<'a>(&self, expression: &'a Expression) -> Cow<'a, Expression>;
}

/// Tightens a date-range conjunction.
///
/// Index entries keep start <= end, so inside an `And` that pins
/// `start >= T1` and `end <= T2`, the bound `start <= T2` is implied.
/// Making it explicit lets range-partitioned backends prune on the start
/// column alone. The rewrite only fires when the pair is unambiguous: one
/// start bound, one end bound, and no other sibling touching either field.
pub struct DateTimeBoundedRangeRewriter;

impl Rewriter for DateTimeBoundedRangeRewriter {
    fn rewrite<'a>(&self, expression: &'a Expression) -> Cow<'a, Expression> {
        match expression {
            Expression::SearchParameter {
                parameter,
                expression: inner,
            } => match self.rewrite(inner) {
                Cow::Borrowed(_) => Cow::Borrowed(expression),
                Cow::Owned(rewritten) => Cow::Owned(Expression::SearchParameter {
                    parameter: Arc::clone(parameter),
                    expression: Box::new(rewritten),
                }),
            },
            Expression::Chained {
                source_types,
                parameter,
                target_type,
                reversed,
                expression: inner,
            } => match self.rewrite(inner) {
                Cow::Borrowed(_) => Cow::Borrowed(expression),
                Cow::Owned(rewritten) => Cow::Owned(Expression::Chained {
                    source_types: source_types.clone(),
                    parameter: Arc::clone(parameter),
                    target_type: target_type.clone(),
                    reversed: *reversed,
                    expression: Box::new(rewritten),
                }),
            },
            Expression::CompositeComponent {
                index,
                expression: inner,
            } => match self.rewrite(inner) {
                Cow::Borrowed(_) => Cow::Borrowed(expression),
                Cow::Owned(rewritten) => Cow::Owned(Expression::CompositeComponent {
                    index: *index,
                    expression: Box::new(rewritten),
                }),
            },
            Expression::Multiary {
                operator: MultiaryOperator::And,
                expressions,
            } => self.rewrite_and(expression, expressions),
            Expression::Multiary {
                operator: MultiaryOperator::Or,
                expressions,
            } => match self.rewrite_children(expressions) {
                None => Cow::Borrowed(expression),
                Some(rewritten) => Cow::Owned(Expression::Multiary {
                    operator: MultiaryOperator::Or,
                    expressions: rewritten,
                }),
            },
            Expression::Binary { .. }
            | Expression::StringCompare { .. }
            | Expression::Missing { .. } => Cow::Borrowed(expression),
        }
    }
}

impl DateTimeBoundedRangeRewriter {
    /// Rewrite every child; `None` means all of them came back borrowed.
    fn rewrite_children(&self, children: &[Expression]) -> Option<Vec<Expression>> {
        let rewritten: Vec<Cow<'_, Expression>> =
            children.iter().map(|c| self.rewrite(c)).collect();
        if rewritten.iter().all(|c| matches!(c, Cow::Borrowed(_))) {
            return None;
        }
        Some(rewritten.into_iter().map(Cow::into_owned).collect())
    }

    fn rewrite_and<'a>(
        &self,
        original: &'a Expression,
        children: &'a [Expression],
    ) -> Cow<'a, Expression> {
        let rewritten = self.rewrite_children(children);
        let current: &[Expression] = rewritten.as_deref().unwrap_or(children);

        match Self::find_range_pair(current) {
            Some((start_index, end_index)) => {
                let (Expression::Binary {
                    value: start_value, ..
                }, Expression::Binary { value: end_value, .. }) =
                    (&current[start_index], &current[end_index])
                else {
                    return finish(original, rewritten);
                };
                let derived = Expression::Binary {
                    field: FieldName::DateTimeStart,
                    operator: BinaryOperator::LessThanOrEqual,
                    value: end_value.clone(),
                };
                let mut expressions: Vec<Expression> = Vec::with_capacity(current.len() + 1);
                for (i, child) in current.iter().enumerate() {
                    if i != start_index && i != end_index {
                        expressions.push(child.clone());
                    }
                }
                expressions.push(Expression::Binary {
                    field: FieldName::DateTimeStart,
                    operator: BinaryOperator::GreaterThanOrEqual,
                    value: start_value.clone(),
                });
                expressions.push(derived);
                expressions.push(Expression::Binary {
                    field: FieldName::DateTimeEnd,
                    operator: BinaryOperator::LessThanOrEqual,
                    value: end_value.clone(),
                });
                Cow::Owned(Expression::Multiary {
                    operator: MultiaryOperator::And,
                    expressions,
                })
            }
            None => finish(original, rewritten),
        }
    }

    /// Locate exactly one `start >= T1` and one `end <= T2` among direct
    /// children, with no other child referencing either date bound.
    fn find_range_pair(children: &[Expression]) -> Option<(usize, usize)> {
        let mut start_index = None;
        let mut end_index = None;
        for (i, child) in children.iter().enumerate() {
            match child {
                Expression::Binary {
                    field: FieldName::DateTimeStart,
                    operator: BinaryOperator::GreaterThanOrEqual,
                    value: Operand::DateTime(_),
                } => {
                    if start_index.replace(i).is_some() {
                        return None;
                    }
                }
                Expression::Binary {
                    field: FieldName::DateTimeEnd,
                    operator: BinaryOperator::LessThanOrEqual,
                    value: Operand::DateTime(_),
                } => {
                    if end_index.replace(i).is_some() {
                        return None;
                    }
                }
                other if mentions_date_bounds(other) => return None,
                _ => {}
            }
        }
        Some((start_index?, end_index?))
    }
}

fn finish<'a>(
    original: &'a Expression,
    rewritten: Option<Vec<Expression>>,
) -> Cow<'a, Expression> {
    match rewritten {
        None => Cow::Borrowed(original),
        Some(expressions) => Cow::Owned(Expression::Multiary {
            operator: MultiaryOperator::And,
            expressions,
        }),
    }
}

fn mentions_date_bounds(expression: &Expression) -> bool {
    match expression {
        Expression::Binary { field, .. } => {
            matches!(field, FieldName::DateTimeStart | FieldName::DateTimeEnd)
        }
        Expression::StringCompare { field, .. } => {
            matches!(field, FieldName::DateTimeStart | FieldName::DateTimeEnd)
        }
        Expression::Missing { target, .. } => matches!(
            target,
            crate::expressions::MissingTarget::Field(
                FieldName::DateTimeStart | FieldName::DateTimeEnd
            )
        ),
        Expression::Multiary { expressions, .. } => {
            expressions.iter().any(mentions_date_bounds)
        }
        Expression::SearchParameter { expression, .. }
        | Expression::Chained { expression, .. }
        | Expression::CompositeComponent { expression, .. } => mentions_date_bounds(expression),
    }
}
