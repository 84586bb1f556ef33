//! Number and quantity value parsing.
//!
//! FHIR numbers carry an implied precision of half the least significant
//! digit: `100` means [99.5, 100.5) territory and `2.0` means [1.95, 2.05].
//! We store the widened bounds; the exact midpoint is recoverable.

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::escape::{split_unescaped, unescape};

/// A decimal with its implied-precision bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberValue {
    pub low: Decimal,
    pub high: Decimal,
}

impl NumberValue {
    /// The exact value as written, i.e. the midpoint of the bounds.
    pub fn midpoint(&self) -> Decimal {
        (self.low + self.high) / Decimal::TWO
    }
}

/// A quantity: a number plus optional system/code for the unit.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityValue {
    pub number: NumberValue,
    pub system: Option<String>,
    pub code: Option<String>,
}

/// Parse a decimal search value, widening by half its least significant
/// digit. Accepts plain and scientific notation, culture-invariant.
pub fn parse_number(raw: &str) -> Result<NumberValue> {
    let value = Decimal::from_str_exact(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| Error::InvalidValue(format!("invalid number search value: {}", raw)))?;
    let precision = half_ulp(&value);
    Ok(NumberValue {
        low: value - precision,
        high: value + precision,
    })
}

/// Parse a quantity search value: `value`, or `value|system|code` where
/// system and code may each be empty.
pub fn parse_quantity(raw: &str) -> Result<QuantityValue> {
    let parts = split_unescaped(raw, '|');
    let (value_part, system, code) = match parts.as_slice() {
        [value] => (*value, None, None),
        [value, system, code] => (
            *value,
            non_empty(unescape(system)?),
            non_empty(unescape(code)?),
        ),
        _ => {
            return Err(Error::InvalidValue(format!(
                "quantity search value must be 'value' or 'value|system|code': {}",
                raw
            )));
        }
    };
    Ok(QuantityValue {
        number: parse_number(value_part)?,
        system,
        code,
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Half of the least significant digit's place value: 0.5 for an integer,
/// 0.05 for one decimal place, and so on.
fn half_ulp(value: &Decimal) -> Decimal {
    Decimal::new(5, value.scale() + 1)
}
