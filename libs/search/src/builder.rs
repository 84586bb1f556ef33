//! Per-parameter expression building.
//!
//! Given a search parameter definition, an optional modifier, and the raw
//! value string, builds the leaf expression subtree. Comma-separated values
//! fan out into `Or`; comparator prefixes apply to the ordered types only.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::escape::{split_unescaped, unescape};
use crate::expressions::{
    BinaryOperator, Expression, FieldName, MissingTarget, Operand, StringOperator,
};
use crate::registry::{ParamRegistry, SearchParamType, SearchParameterInfo};
use crate::values::{
    parse_date_range, parse_identifier_of_type, parse_number, parse_quantity, parse_token,
    parse_uri, widen_date_range, DateRange, NumberValue, ReferenceParser, TokenSystem,
};

/// The two-letter FHIR comparison prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
    Ap,
}

impl SearchPrefix {
    /// Split a leading prefix off a raw value. Values without a recognized
    /// prefix come back whole.
    pub fn parse(input: &str) -> (Option<Self>, &str) {
        let Some(head) = input.get(0..2) else {
            return (None, input);
        };
        let prefix = match head {
            "eq" => Self::Eq,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "lt" => Self::Lt,
            "ge" => Self::Ge,
            "le" => Self::Le,
            "sa" => Self::Sa,
            "eb" => Self::Eb,
            "ap" => Self::Ap,
            _ => return (None, input),
        };
        (Some(prefix), &input[2..])
    }
}

/// A parsed search modifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modifier {
    Missing,
    Exact,
    Contains,
    Text,
    OfType,
    Above,
    Below,
    /// `:Type` on a reference parameter, scoping its target type.
    ResourceType(String),
}

impl Modifier {
    /// Parse a modifier token. Capitalized names matching a known resource
    /// type become a target-type restriction; anything else is an error.
    pub fn parse(raw: &str, registry: &ParamRegistry) -> Result<Modifier> {
        match raw {
            "missing" => Ok(Self::Missing),
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "text" => Ok(Self::Text),
            "of-type" => Ok(Self::OfType),
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            other if registry.is_resource_type(other) => {
                Ok(Self::ResourceType(other.to_string()))
            }
            other => Err(Error::InvalidSearchOperation(format!(
                "unknown search modifier ':{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::Exact => f.write_str("exact"),
            Self::Contains => f.write_str("contains"),
            Self::Text => f.write_str("text"),
            Self::OfType => f.write_str("of-type"),
            Self::Above => f.write_str("above"),
            Self::Below => f.write_str("below"),
            Self::ResourceType(t) => f.write_str(t),
        }
    }
}

/// The closed modifier legality matrix. `:missing` is legal on every type;
/// composites take no other modifiers.
pub fn modifier_allowed(param_type: SearchParamType, modifier: &Modifier) -> bool {
    match param_type {
        SearchParamType::String => {
            matches!(modifier, Modifier::Exact | Modifier::Contains | Modifier::Missing)
        }
        SearchParamType::Token => {
            matches!(modifier, Modifier::Text | Modifier::OfType | Modifier::Missing)
        }
        SearchParamType::Uri => {
            matches!(modifier, Modifier::Above | Modifier::Below | Modifier::Missing)
        }
        SearchParamType::Reference => {
            matches!(modifier, Modifier::ResourceType(_) | Modifier::Missing)
        }
        SearchParamType::Date
        | SearchParamType::Number
        | SearchParamType::Quantity
        | SearchParamType::Composite
        | SearchParamType::Special => matches!(modifier, Modifier::Missing),
    }
}

fn supports_prefixes(param_type: SearchParamType) -> bool {
    matches!(
        param_type,
        SearchParamType::Date | SearchParamType::Number | SearchParamType::Quantity
    )
}

/// Builds the value-side expression for one search parameter.
pub struct ExpressionBuilder<'a> {
    pub registry: &'a ParamRegistry,
    pub config: &'a SearchConfig,
    pub reference_parser: &'a ReferenceParser,
}

impl<'a> ExpressionBuilder<'a> {
    /// Compile a modifier+value pair against one parameter definition. The
    /// result is the inner expression; the caller wraps it in a
    /// `SearchParameter` node.
    pub fn build(
        &self,
        info: &Arc<SearchParameterInfo>,
        modifier: Option<&Modifier>,
        raw: &str,
    ) -> Result<Expression> {
        if let Some(modifier) = modifier {
            if !modifier_allowed(info.param_type, modifier) {
                return Err(Error::InvalidSearchOperation(format!(
                    "modifier ':{}' is not valid for {} parameter '{}'",
                    modifier, info.param_type, info.code
                )));
            }
            if *modifier == Modifier::Missing {
                return self.build_missing(info, raw);
            }
        }

        let values: Vec<&str> = split_unescaped(raw, ',')
            .into_iter()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return Err(Error::InvalidValue(format!(
                "empty value for search parameter '{}'",
                info.code
            )));
        }
        if values.len() > 1
            && supports_prefixes(info.param_type)
            && values.iter().any(|v| SearchPrefix::parse(v).0.is_some())
        {
            return Err(Error::InvalidSearchOperation(format!(
                "parameter '{}' cannot combine comparison prefixes with multiple values",
                info.code
            )));
        }

        let mut branches = Vec::with_capacity(values.len());
        for value in values {
            branches.push(self.build_single(info, modifier, value)?);
        }
        Ok(Expression::or_join(branches))
    }

    fn build_missing(&self, info: &Arc<SearchParameterInfo>, raw: &str) -> Result<Expression> {
        let is_missing = if raw.eq_ignore_ascii_case("true") {
            true
        } else if raw.eq_ignore_ascii_case("false") {
            false
        } else {
            return Err(Error::InvalidValue(format!(
                ":missing accepts only 'true' or 'false', got '{}'",
                raw
            )));
        };
        Ok(Expression::Missing {
            target: MissingTarget::Parameter(Arc::clone(info)),
            is_missing,
        })
    }

    fn build_single(
        &self,
        info: &Arc<SearchParameterInfo>,
        modifier: Option<&Modifier>,
        raw: &str,
    ) -> Result<Expression> {
        if raw.is_empty() {
            return Err(Error::InvalidValue(format!(
                "empty value for search parameter '{}'",
                info.code
            )));
        }
        match info.param_type {
            SearchParamType::String => self.build_string(modifier, raw),
            SearchParamType::Token => self.build_token(info, modifier, raw),
            SearchParamType::Date => self.build_date(raw),
            SearchParamType::Number => self.build_number(raw),
            SearchParamType::Quantity => self.build_quantity(raw),
            SearchParamType::Uri => self.build_uri(modifier, raw),
            SearchParamType::Reference => self.build_reference(info, modifier, raw),
            SearchParamType::Composite => self.build_composite(info, raw),
            SearchParamType::Special => Err(Error::UnsupportedParameter(info.code.clone())),
        }
    }

    fn build_string(&self, modifier: Option<&Modifier>, raw: &str) -> Result<Expression> {
        let value = unescape(raw)?;
        let (operator, ignore_case) = match modifier {
            None => (StringOperator::StartsWith, true),
            Some(Modifier::Exact) => (StringOperator::Equals, false),
            Some(Modifier::Contains) => (StringOperator::Contains, true),
            Some(other) => {
                return Err(Error::InvalidSearchOperation(format!(
                    "modifier ':{}' is not valid for string values",
                    other
                )));
            }
        };
        Ok(Expression::StringCompare {
            field: FieldName::String,
            operator,
            value,
            ignore_case,
        })
    }

    fn build_token(
        &self,
        info: &Arc<SearchParameterInfo>,
        modifier: Option<&Modifier>,
        raw: &str,
    ) -> Result<Expression> {
        match modifier {
            Some(Modifier::Text) => Ok(Expression::StringCompare {
                field: FieldName::TokenText,
                operator: StringOperator::StartsWith,
                value: unescape(raw)?,
                ignore_case: true,
            }),
            Some(Modifier::OfType) => {
                let paths = self.registry.expression_paths(info);
                if !paths
                    .iter()
                    .any(|p| p.to_ascii_lowercase().contains("identifier"))
                {
                    return Err(Error::InvalidSearchOperation(format!(
                        "':of-type' applies only to identifier parameters, not '{}'",
                        info.code
                    )));
                }
                let id = parse_identifier_of_type(raw)?;
                Ok(Expression::and_join(vec![
                    Expression::equals_string(FieldName::TokenSystem, id.system),
                    Expression::equals_string(FieldName::TokenCode, id.code),
                    Expression::equals_string(FieldName::TokenValue, id.value),
                ]))
            }
            None => {
                let token = parse_token(raw)?;
                let mut clauses = Vec::new();
                match token.system {
                    TokenSystem::Any => {}
                    TokenSystem::None => clauses.push(Expression::Missing {
                        target: MissingTarget::Field(FieldName::TokenSystem),
                        is_missing: true,
                    }),
                    TokenSystem::Value(system) => {
                        clauses.push(Expression::equals_string(FieldName::TokenSystem, system));
                    }
                }
                if let Some(code) = token.code {
                    clauses.push(Expression::equals_string(FieldName::TokenCode, code));
                }
                Ok(Expression::and_join(clauses))
            }
            Some(other) => Err(Error::InvalidSearchOperation(format!(
                "modifier ':{}' is not valid for token values",
                other
            ))),
        }
    }

    fn build_date(&self, raw: &str) -> Result<Expression> {
        let (prefix, rest) = SearchPrefix::parse(raw);
        let range = parse_date_range(rest)?;
        Ok(self.date_expression(prefix.unwrap_or(SearchPrefix::Eq), range))
    }

    fn date_expression(&self, prefix: SearchPrefix, range: DateRange) -> Expression {
        use BinaryOperator::*;
        use FieldName::{DateTimeEnd as End, DateTimeStart as Start};
        let dt = |field, operator, value| {
            Expression::binary(field, operator, Operand::DateTime(value))
        };
        match prefix {
            SearchPrefix::Eq => Expression::and_join(vec![
                dt(Start, GreaterThanOrEqual, range.start),
                dt(End, LessThanOrEqual, range.end),
            ]),
            SearchPrefix::Ne => Expression::or_join(vec![
                dt(Start, LessThan, range.start),
                dt(End, GreaterThan, range.end),
            ]),
            SearchPrefix::Gt => dt(End, GreaterThan, range.end),
            SearchPrefix::Ge => dt(End, GreaterThanOrEqual, range.start),
            SearchPrefix::Lt => dt(Start, LessThan, range.start),
            SearchPrefix::Le => dt(Start, LessThanOrEqual, range.end),
            SearchPrefix::Sa => dt(Start, GreaterThan, range.end),
            SearchPrefix::Eb => dt(End, LessThan, range.start),
            SearchPrefix::Ap => {
                let widened = widen_date_range(&range, self.config.approx_window_percent);
                Expression::and_join(vec![
                    dt(End, GreaterThanOrEqual, widened.start),
                    dt(Start, LessThanOrEqual, widened.end),
                ])
            }
        }
    }

    fn build_number(&self, raw: &str) -> Result<Expression> {
        let (prefix, rest) = SearchPrefix::parse(raw);
        let number = parse_number(rest)?;
        Ok(self.number_expression(FieldName::Number, prefix.unwrap_or(SearchPrefix::Eq), number))
    }

    fn number_expression(
        &self,
        field: FieldName,
        prefix: SearchPrefix,
        number: NumberValue,
    ) -> Expression {
        use BinaryOperator::*;
        let num = |operator, value| Expression::binary(field, operator, Operand::Number(value));
        match prefix {
            SearchPrefix::Eq => Expression::and_join(vec![
                num(GreaterThanOrEqual, number.low),
                num(LessThanOrEqual, number.high),
            ]),
            SearchPrefix::Ne => Expression::or_join(vec![
                num(LessThan, number.low),
                num(GreaterThan, number.high),
            ]),
            SearchPrefix::Gt | SearchPrefix::Sa => num(GreaterThan, number.high),
            SearchPrefix::Lt | SearchPrefix::Eb => num(LessThan, number.low),
            SearchPrefix::Ge => num(GreaterThanOrEqual, number.low),
            SearchPrefix::Le => num(LessThanOrEqual, number.high),
            SearchPrefix::Ap => {
                let midpoint = number.midpoint();
                let precision = (number.high - number.low) / Decimal::TWO;
                let window = midpoint.abs() * Decimal::from(self.config.approx_window_percent)
                    / Decimal::ONE_HUNDRED;
                let delta = window.max(precision);
                Expression::and_join(vec![
                    num(GreaterThanOrEqual, midpoint - delta),
                    num(LessThanOrEqual, midpoint + delta),
                ])
            }
        }
    }

    fn build_quantity(&self, raw: &str) -> Result<Expression> {
        let (prefix, rest) = SearchPrefix::parse(raw);
        let quantity = parse_quantity(rest)?;
        let mut clauses = vec![self.number_expression(
            FieldName::Quantity,
            prefix.unwrap_or(SearchPrefix::Eq),
            quantity.number,
        )];
        if let Some(system) = quantity.system {
            clauses.push(Expression::equals_string(FieldName::QuantitySystem, system));
        }
        if let Some(code) = quantity.code {
            clauses.push(Expression::equals_string(FieldName::QuantityCode, code));
        }
        Ok(Expression::and_join(clauses))
    }

    fn build_uri(&self, modifier: Option<&Modifier>, raw: &str) -> Result<Expression> {
        let uri = parse_uri(raw, self.config.split_canonical_uris)?;
        match modifier {
            None => {
                let mut clauses =
                    vec![Expression::equals_string(FieldName::Uri, uri.uri)];
                if let Some(version) = uri.version {
                    clauses.push(Expression::equals_string(FieldName::UriVersion, version));
                }
                if let Some(fragment) = uri.fragment {
                    clauses.push(Expression::equals_string(FieldName::UriFragment, fragment));
                }
                Ok(Expression::and_join(clauses))
            }
            Some(Modifier::Below) => Ok(Expression::StringCompare {
                field: FieldName::Uri,
                operator: StringOperator::StartsWith,
                value: uri.uri,
                ignore_case: false,
            }),
            Some(Modifier::Above) => Ok(Expression::StringCompare {
                field: FieldName::Uri,
                operator: StringOperator::LeftSideStartsWith,
                value: uri.uri,
                ignore_case: false,
            }),
            Some(other) => Err(Error::InvalidSearchOperation(format!(
                "modifier ':{}' is not valid for uri values",
                other
            ))),
        }
    }

    fn build_reference(
        &self,
        info: &Arc<SearchParameterInfo>,
        modifier: Option<&Modifier>,
        raw: &str,
    ) -> Result<Expression> {
        let value = unescape(raw)?;
        let mut parsed = self.reference_parser.parse(&value);

        if let Some(Modifier::ResourceType(target)) = modifier {
            if !info.target.is_empty() && !info.target.contains(target) {
                return Err(Error::InvalidSearchOperation(format!(
                    "'{}' is not a supported target type for parameter '{}'",
                    target, info.code
                )));
            }
            match &parsed.resource_type {
                Some(embedded) if embedded != target => {
                    return Err(Error::InvalidValue(format!(
                        "reference value type '{}' contradicts modifier ':{}'",
                        embedded, target
                    )));
                }
                Some(_) => {}
                None => parsed.resource_type = Some(target.clone()),
            }
        }

        if let Some(target) = &parsed.resource_type {
            if !info.target.is_empty() && !info.target.contains(target) {
                return Err(Error::InvalidValue(format!(
                    "parameter '{}' does not reference resources of type '{}'",
                    info.code, target
                )));
            }
        }

        let mut clauses = Vec::new();
        if let Some(base) = parsed.base_uri {
            clauses.push(Expression::equals_string(FieldName::ReferenceBaseUri, base));
        }
        if let Some(target) = parsed.resource_type {
            clauses.push(Expression::equals_string(
                FieldName::ReferenceResourceType,
                target,
            ));
        }
        clauses.push(Expression::equals_string(
            FieldName::ReferenceResourceId,
            parsed.resource_id,
        ));
        Ok(Expression::and_join(clauses))
    }

    fn build_composite(&self, info: &Arc<SearchParameterInfo>, raw: &str) -> Result<Expression> {
        let parts = split_unescaped(raw, '$');
        if info.components.is_empty() || parts.len() > info.components.len() {
            return Err(Error::InvalidSearchOperation(format!(
                "composite parameter '{}' takes at most {} components, got {}",
                info.code,
                info.components.len(),
                parts.len()
            )));
        }
        let mut clauses = Vec::with_capacity(parts.len());
        for (index, (part, component)) in parts.iter().zip(&info.components).enumerate() {
            let component_info = self.registry.resolve_component(info, component)?;
            let inner = self.build_single(&component_info, None, part)?;
            clauses.push(Expression::CompositeComponent {
                index,
                expression: Box::new(inner),
            });
        }
        Ok(Expression::and_join(clauses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expressions::MultiaryOperator;
    use crate::registry::CompositeComponent;

    fn param(code: &str, param_type: SearchParamType) -> SearchParameterInfo {
        SearchParameterInfo {
            code: code.to_string(),
            url: format!("http://hl7.org/fhir/SearchParameter/{}", code),
            param_type,
            base: vec!["Patient".to_string()],
            expression: None,
            target: Vec::new(),
            components: Vec::new(),
            supports_sort: false,
        }
    }

    struct Fixture {
        registry: ParamRegistry,
        config: SearchConfig,
        reference_parser: ReferenceParser,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = ParamRegistry::new();
            let mut identifier = param("identifier", SearchParamType::Token);
            identifier.expression = Some("Patient.identifier".to_string());
            let mut subject = param("subject", SearchParamType::Reference);
            subject.target = vec!["Patient".to_string(), "Group".to_string()];
            registry.install(vec![
                param("name", SearchParamType::String),
                identifier,
                subject,
            ]);
            let config = SearchConfig::default();
            let reference_parser = ReferenceParser::new(
                &registry.resource_types(),
                Some("https://fhir.example.org/r4"),
            )
            .unwrap();
            Self {
                registry,
                config,
                reference_parser,
            }
        }

        fn build(
            &self,
            info: &SearchParameterInfo,
            modifier: Option<&Modifier>,
            raw: &str,
        ) -> Result<Expression> {
            let builder = ExpressionBuilder {
                registry: &self.registry,
                config: &self.config,
                reference_parser: &self.reference_parser,
            };
            builder.build(&Arc::new(info.clone()), modifier, raw)
        }
    }

    #[test]
    fn prefix_parse_strips_known_prefixes_only() {
        assert_eq!(SearchPrefix::parse("ge2013"), (Some(SearchPrefix::Ge), "2013"));
        assert_eq!(SearchPrefix::parse("2013"), (None, "2013"));
        assert_eq!(SearchPrefix::parse("x"), (None, "x"));
    }

    #[test]
    fn default_string_search_starts_with_case_insensitive() {
        let f = Fixture::new();
        let e = f.build(&param("name", SearchParamType::String), None, "Seattle");
        assert_eq!(
            e.unwrap(),
            Expression::StringCompare {
                field: FieldName::String,
                operator: StringOperator::StartsWith,
                value: "Seattle".to_string(),
                ignore_case: true,
            }
        );
    }

    #[test]
    fn exact_modifier_is_case_sensitive_equality() {
        let f = Fixture::new();
        let e = f
            .build(
                &param("name", SearchParamType::String),
                Some(&Modifier::Exact),
                "Seattle",
            )
            .unwrap();
        assert_eq!(
            e,
            Expression::StringCompare {
                field: FieldName::String,
                operator: StringOperator::Equals,
                value: "Seattle".to_string(),
                ignore_case: false,
            }
        );
    }

    #[test]
    fn illegal_modifiers_are_hard_errors() {
        let f = Fixture::new();
        let cases: Vec<(SearchParamType, Modifier)> = vec![
            (SearchParamType::Token, Modifier::Exact),
            (SearchParamType::Uri, Modifier::Contains),
            (SearchParamType::String, Modifier::Above),
            (SearchParamType::Date, Modifier::Text),
            (SearchParamType::Composite, Modifier::Exact),
        ];
        for (param_type, modifier) in cases {
            let result = f.build(&param("p", param_type), Some(&modifier), "x");
            assert!(
                matches!(result, Err(Error::InvalidSearchOperation(_))),
                "{:?} + :{} should be rejected",
                param_type,
                modifier
            );
        }
    }

    #[test]
    fn legal_modifiers_are_accepted() {
        let f = Fixture::new();
        for param_type in [
            SearchParamType::String,
            SearchParamType::Token,
            SearchParamType::Date,
            SearchParamType::Number,
            SearchParamType::Quantity,
            SearchParamType::Uri,
            SearchParamType::Reference,
            SearchParamType::Composite,
            SearchParamType::Special,
        ] {
            let result = f.build(&param("p", param_type), Some(&Modifier::Missing), "true");
            assert!(result.is_ok(), "{:?} + :missing should be legal", param_type);
        }
    }

    #[test]
    fn composite_missing_modifier_compiles_to_a_missing_node() {
        let f = Fixture::new();
        let code = param("component-code", SearchParamType::Token);
        let mut combo = param("code-value", SearchParamType::Composite);
        combo.components = vec![CompositeComponent {
            definition_url: code.url.clone(),
            expression: "code".to_string(),
        }];
        f.registry.install(vec![code, combo.clone()]);

        let e = f.build(&combo, Some(&Modifier::Missing), "true").unwrap();
        assert!(matches!(
            e,
            Expression::Missing {
                target: MissingTarget::Parameter(_),
                is_missing: true,
            }
        ));
    }

    #[test]
    fn missing_requires_boolean_value() {
        let f = Fixture::new();
        let info = param("name", SearchParamType::String);
        let e = f.build(&info, Some(&Modifier::Missing), "TRUE").unwrap();
        assert!(matches!(
            e,
            Expression::Missing {
                is_missing: true,
                ..
            }
        ));
        assert!(f.build(&info, Some(&Modifier::Missing), "yes").is_err());
    }

    #[test]
    fn comma_values_fan_out_into_or() {
        let f = Fixture::new();
        let e = f
            .build(&param("name", SearchParamType::String), None, "ann,bob")
            .unwrap();
        match e {
            Expression::Multiary {
                operator: MultiaryOperator::Or,
                expressions,
            } => assert_eq!(expressions.len(), 2),
            other => panic!("expected Or, got {:?}", other),
        }
    }

    #[test]
    fn comma_values_are_trimmed_and_empty_segments_dropped() {
        let f = Fixture::new();
        let e = f
            .build(&param("name", SearchParamType::String), None, " ann , ,bob,")
            .unwrap();
        match e {
            Expression::Multiary { expressions, .. } => assert_eq!(expressions.len(), 2),
            other => panic!("expected Or of two branches, got {:?}", other),
        }
        assert!(f
            .build(&param("name", SearchParamType::String), None, " , ")
            .is_err());
    }

    #[test]
    fn prefixed_multi_values_are_rejected_for_ordered_types() {
        let f = Fixture::new();
        let result = f.build(&param("length", SearchParamType::Number), None, "gt5,10");
        assert!(matches!(result, Err(Error::InvalidSearchOperation(_))));
        // Without a prefix the same fan-out is fine.
        assert!(f
            .build(&param("length", SearchParamType::Number), None, "5,10")
            .is_ok());
    }

    #[test]
    fn token_system_and_code_conjoin() {
        let f = Fixture::new();
        let e = f
            .build(
                &param("identifier", SearchParamType::Token),
                None,
                "http://loinc.org|1234-5",
            )
            .unwrap();
        assert_eq!(
            e,
            Expression::and_join(vec![
                Expression::equals_string(FieldName::TokenSystem, "http://loinc.org"),
                Expression::equals_string(FieldName::TokenCode, "1234-5"),
            ])
        );
    }

    #[test]
    fn token_with_explicit_empty_system_requires_missing_system() {
        let f = Fixture::new();
        let e = f
            .build(&param("identifier", SearchParamType::Token), None, "|1234-5")
            .unwrap();
        match e {
            Expression::Multiary { expressions, .. } => {
                assert!(matches!(
                    expressions[0],
                    Expression::Missing {
                        target: MissingTarget::Field(FieldName::TokenSystem),
                        is_missing: true,
                    }
                ));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn token_text_modifier_matches_display_text() {
        let f = Fixture::new();
        let e = f
            .build(
                &param("identifier", SearchParamType::Token),
                Some(&Modifier::Text),
                "head",
            )
            .unwrap();
        assert_eq!(
            e,
            Expression::StringCompare {
                field: FieldName::TokenText,
                operator: StringOperator::StartsWith,
                value: "head".to_string(),
                ignore_case: true,
            }
        );
    }

    #[test]
    fn of_type_requires_identifier_parameter() {
        let f = Fixture::new();
        let identifier = f.registry.lookup("Patient", "identifier").unwrap();
        let e = ExpressionBuilder {
            registry: &f.registry,
            config: &f.config,
            reference_parser: &f.reference_parser,
        }
        .build(&identifier, Some(&Modifier::OfType), "sys|MR|446053")
        .unwrap();
        assert_eq!(
            e,
            Expression::and_join(vec![
                Expression::equals_string(FieldName::TokenSystem, "sys"),
                Expression::equals_string(FieldName::TokenCode, "MR"),
                Expression::equals_string(FieldName::TokenValue, "446053"),
            ])
        );

        // A token parameter that does not index identifiers rejects :of-type.
        let mut status = param("status", SearchParamType::Token);
        status.expression = Some("Patient.status".to_string());
        assert!(f
            .build(&status, Some(&Modifier::OfType), "sys|MR|446053")
            .is_err());
    }

    #[test]
    fn date_eq_bounds_both_ends() {
        let f = Fixture::new();
        let e = f
            .build(&param("birthdate", SearchParamType::Date), None, "2013-01-14")
            .unwrap();
        let range = parse_date_range("2013-01-14").unwrap();
        assert_eq!(
            e,
            Expression::and_join(vec![
                Expression::binary(
                    FieldName::DateTimeStart,
                    BinaryOperator::GreaterThanOrEqual,
                    Operand::DateTime(range.start)
                ),
                Expression::binary(
                    FieldName::DateTimeEnd,
                    BinaryOperator::LessThanOrEqual,
                    Operand::DateTime(range.end)
                ),
            ])
        );
    }

    #[test]
    fn date_comparator_prefixes_pick_the_right_bound() {
        let f = Fixture::new();
        let info = param("birthdate", SearchParamType::Date);
        let range = parse_date_range("2013").unwrap();

        let gt = f.build(&info, None, "gt2013").unwrap();
        assert_eq!(
            gt,
            Expression::binary(
                FieldName::DateTimeEnd,
                BinaryOperator::GreaterThan,
                Operand::DateTime(range.end)
            )
        );

        let sa = f.build(&info, None, "sa2013").unwrap();
        assert_eq!(
            sa,
            Expression::binary(
                FieldName::DateTimeStart,
                BinaryOperator::GreaterThan,
                Operand::DateTime(range.end)
            )
        );

        let eb = f.build(&info, None, "eb2013").unwrap();
        assert_eq!(
            eb,
            Expression::binary(
                FieldName::DateTimeEnd,
                BinaryOperator::LessThan,
                Operand::DateTime(range.start)
            )
        );
    }

    #[test]
    fn number_eq_widens_by_implied_precision() {
        let f = Fixture::new();
        let e = f
            .build(&param("length", SearchParamType::Number), None, "2.0")
            .unwrap();
        assert_eq!(
            e,
            Expression::and_join(vec![
                Expression::binary(
                    FieldName::Number,
                    BinaryOperator::GreaterThanOrEqual,
                    Operand::Number(Decimal::from_str_exact("1.95").unwrap())
                ),
                Expression::binary(
                    FieldName::Number,
                    BinaryOperator::LessThanOrEqual,
                    Operand::Number(Decimal::from_str_exact("2.05").unwrap())
                ),
            ])
        );
    }

    #[test]
    fn number_ap_widens_by_ten_percent() {
        let f = Fixture::new();
        let e = f
            .build(&param("length", SearchParamType::Number), None, "ap100")
            .unwrap();
        assert_eq!(
            e,
            Expression::and_join(vec![
                Expression::binary(
                    FieldName::Number,
                    BinaryOperator::GreaterThanOrEqual,
                    Operand::Number(Decimal::from_str_exact("90").unwrap())
                ),
                Expression::binary(
                    FieldName::Number,
                    BinaryOperator::LessThanOrEqual,
                    Operand::Number(Decimal::from_str_exact("110").unwrap())
                ),
            ])
        );
    }

    #[test]
    fn quantity_carries_system_and_code_clauses() {
        let f = Fixture::new();
        let e = f
            .build(
                &param("value-quantity", SearchParamType::Quantity),
                None,
                "5.4|http://unitsofmeasure.org|mg",
            )
            .unwrap();
        match e {
            Expression::Multiary { expressions, .. } => {
                assert_eq!(expressions.len(), 3);
                assert_eq!(
                    expressions[1],
                    Expression::equals_string(
                        FieldName::QuantitySystem,
                        "http://unitsofmeasure.org"
                    )
                );
                assert_eq!(
                    expressions[2],
                    Expression::equals_string(FieldName::QuantityCode, "mg")
                );
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn uri_below_is_prefix_match() {
        let f = Fixture::new();
        let e = f
            .build(
                &param("url", SearchParamType::Uri),
                Some(&Modifier::Below),
                "http://example.org/fhir",
            )
            .unwrap();
        assert_eq!(
            e,
            Expression::StringCompare {
                field: FieldName::Uri,
                operator: StringOperator::StartsWith,
                value: "http://example.org/fhir".to_string(),
                ignore_case: false,
            }
        );
    }

    #[test]
    fn reference_type_modifier_scopes_bare_id() {
        let f = Fixture::new();
        let mut subject = param("subject", SearchParamType::Reference);
        subject.target = vec!["Patient".to_string(), "Group".to_string()];
        let e = f
            .build(
                &subject,
                Some(&Modifier::ResourceType("Patient".to_string())),
                "123",
            )
            .unwrap();
        assert_eq!(
            e,
            Expression::and_join(vec![
                Expression::equals_string(FieldName::ReferenceResourceType, "Patient"),
                Expression::equals_string(FieldName::ReferenceResourceId, "123"),
            ])
        );
    }

    #[test]
    fn reference_type_modifier_outside_targets_is_rejected() {
        let f = Fixture::new();
        let mut subject = param("subject", SearchParamType::Reference);
        subject.target = vec!["Patient".to_string()];
        let result = f.build(
            &subject,
            Some(&Modifier::ResourceType("Group".to_string())),
            "123",
        );
        assert!(matches!(result, Err(Error::InvalidSearchOperation(_))));
    }

    #[test]
    fn external_reference_keeps_its_base_uri() {
        let f = Fixture::new();
        let mut subject = param("subject", SearchParamType::Reference);
        subject.target = vec!["Patient".to_string()];
        let e = f
            .build(&subject, None, "https://other.example.com/fhir/Patient/9")
            .unwrap();
        match e {
            Expression::Multiary { expressions, .. } => {
                assert_eq!(
                    expressions[0],
                    Expression::equals_string(
                        FieldName::ReferenceBaseUri,
                        "https://other.example.com/fhir"
                    )
                );
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn composite_components_are_indexed_and_conjoined() {
        let f = Fixture::new();
        let code = param("component-code", SearchParamType::Token);
        let value = param("component-value", SearchParamType::Number);
        let mut combo = param("code-value", SearchParamType::Composite);
        combo.components = vec![
            CompositeComponent {
                definition_url: code.url.clone(),
                expression: "code".to_string(),
            },
            CompositeComponent {
                definition_url: value.url.clone(),
                expression: "value".to_string(),
            },
        ];
        f.registry.install(vec![code, value, combo.clone()]);

        let e = f.build(&combo, None, "loinc|8480-6$gt100").unwrap();
        match e {
            Expression::Multiary { expressions, .. } => {
                assert!(matches!(
                    expressions[0],
                    Expression::CompositeComponent { index: 0, .. }
                ));
                assert!(matches!(
                    expressions[1],
                    Expression::CompositeComponent { index: 1, .. }
                ));
            }
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn composite_with_too_many_components_is_rejected() {
        let f = Fixture::new();
        let code = param("component-code", SearchParamType::Token);
        let mut combo = param("code-value", SearchParamType::Composite);
        combo.components = vec![CompositeComponent {
            definition_url: code.url.clone(),
            expression: "code".to_string(),
        }];
        f.registry.install(vec![code, combo.clone()]);
        assert!(matches!(
            f.build(&combo, None, "a$b"),
            Err(Error::InvalidSearchOperation(_))
        ));
    }

    #[test]
    fn multiple_composite_instances_combine_with_or() {
        let f = Fixture::new();
        let code = param("component-code", SearchParamType::Token);
        let mut combo = param("code-value", SearchParamType::Composite);
        combo.components = vec![CompositeComponent {
            definition_url: code.url.clone(),
            expression: "code".to_string(),
        }];
        f.registry.install(vec![code, combo.clone()]);
        let e = f.build(&combo, None, "a,b").unwrap();
        assert!(matches!(
            e,
            Expression::Multiary {
                operator: MultiaryOperator::Or,
                ..
            }
        ));
    }

    #[test]
    fn special_parameters_report_unsupported() {
        let f = Fixture::new();
        let result = f.build(&param("near", SearchParamType::Special), None, "x");
        assert!(matches!(result, Err(Error::UnsupportedParameter(_))));
    }
}
