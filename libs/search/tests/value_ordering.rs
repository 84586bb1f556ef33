//! Value-ordering contract used by result sorting.
//!
//! Sorting compares parsed search values rather than raw text; ranged kinds
//! pick a bound via `ComparisonRange` and cross-kind comparisons error.

use std::cmp::Ordering;

use lumen_search::values::{parse_date_range, parse_number, parse_quantity, parse_token};
use lumen_search::{ComparisonRange, SearchValue};

#[test]
fn dates_order_by_the_requested_bound() {
    let january = SearchValue::Date(parse_date_range("2013-01").unwrap());
    let year = SearchValue::Date(parse_date_range("2013").unwrap());
    // Both start on January 1st, but the year reaches further.
    assert_eq!(
        january.compare(&year, ComparisonRange::Min).unwrap(),
        Ordering::Equal
    );
    assert_eq!(
        january.compare(&year, ComparisonRange::Max).unwrap(),
        Ordering::Less
    );
}

#[test]
fn numbers_and_quantities_order_by_widened_bounds() {
    let two = SearchValue::Number(parse_number("2.0").unwrap());
    let three = SearchValue::Number(parse_number("3").unwrap());
    assert_eq!(
        two.compare(&three, ComparisonRange::Min).unwrap(),
        Ordering::Less
    );

    let low = SearchValue::Quantity(parse_quantity("5.4||mg").unwrap());
    let high = SearchValue::Quantity(parse_quantity("9|http://unitsofmeasure.org|mg").unwrap());
    assert_eq!(
        low.compare(&high, ComparisonRange::Max).unwrap(),
        Ordering::Less
    );
}

#[test]
fn a_batch_of_dates_sorts_by_start_bound() {
    let mut values: Vec<SearchValue> = ["2014", "2013-06", "2013"]
        .iter()
        .map(|raw| SearchValue::Date(parse_date_range(raw).unwrap()))
        .collect();
    values.sort_by(|a, b| {
        a.compare(b, ComparisonRange::Min)
            .unwrap_or(Ordering::Equal)
    });
    let starts: Vec<_> = values
        .iter()
        .map(|v| match v {
            SearchValue::Date(range) => range.start,
            other => panic!("expected a date, got {:?}", other),
        })
        .collect();
    assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(
        starts[0],
        parse_date_range("2013").unwrap().start
    );
    assert_eq!(
        starts[2],
        parse_date_range("2014").unwrap().start
    );
}

#[test]
fn cross_kind_comparison_is_an_error_not_a_guess() {
    let token = SearchValue::Token(parse_token("active").unwrap());
    let number = SearchValue::Number(parse_number("1").unwrap());
    assert!(token.compare(&number, ComparisonRange::Min).is_err());
}

#[test]
fn composite_values_do_not_order_or_nest() {
    let leaf = SearchValue::String("a".to_string());
    let composite = SearchValue::Composite(vec![vec![leaf.clone()]]);
    assert!(composite.compare(&leaf, ComparisonRange::Min).is_err());
    assert!(composite
        .compare(&composite.clone(), ComparisonRange::Min)
        .is_err());
    assert!(leaf.is_valid_as_composite_component());
    assert!(!composite.is_valid_as_composite_component());
}
