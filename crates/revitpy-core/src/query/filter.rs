//! Filter operators and per-element predicates.

use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::QueryError;
use super::value::{compare, fold, text, values_equal};
use crate::ports::ElementProperty;

/// The closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Regex,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 14] = [
        Self::Equals,
        Self::NotEquals,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterEqual,
        Self::LessEqual,
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::In,
        Self::NotIn,
        Self::IsNull,
        Self::IsNotNull,
        Self::Regex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::GreaterEqual => "greater_equal",
            Self::LessEqual => "less_equal",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the snake_case names plus the usual symbolic aliases
/// (`==`, `!=`, `>`, `<`, `>=`, `<=`).
impl FromStr for FilterOperator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim() {
            "==" | "eq" => Self::Equals,
            "!=" | "ne" => Self::NotEquals,
            ">" | "gt" => Self::GreaterThan,
            "<" | "lt" => Self::LessThan,
            ">=" | "ge" => Self::GreaterEqual,
            "<=" | "le" => Self::LessEqual,
            other => Self::ALL
                .into_iter()
                .find(|op| op.as_str().eq_ignore_ascii_case(other))
                .ok_or_else(|| QueryError::UnknownOperator(s.to_owned()))?,
        };
        Ok(op)
    }
}

/// One `(property, operator, value, case_sensitive)` predicate.
///
/// Lookup failure and explicit null are treated alike: `is_null` matches,
/// `is_not_null` and every other operator do not.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    property: String,
    operator: FilterOperator,
    value: Value,
    case_sensitive: bool,
    pattern: Option<Regex>,
}

impl FilterCriteria {
    /// Validate the operand for `operator`. Regex patterns are compiled
    /// here; `in`/`not_in` need an array.
    pub fn new(
        property: impl Into<String>,
        operator: FilterOperator,
        value: Value,
        case_sensitive: bool,
    ) -> Result<Self, QueryError> {
        let pattern = match operator {
            FilterOperator::Regex => {
                let Value::String(pattern) = &value else {
                    return Err(QueryError::InvalidOperand {
                        operator,
                        reason: "expected a string pattern".into(),
                    });
                };
                let compiled = RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|source| QueryError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })?;
                Some(compiled)
            }
            FilterOperator::In | FilterOperator::NotIn if !value.is_array() => {
                return Err(QueryError::InvalidOperand {
                    operator,
                    reason: "expected an array of candidate values".into(),
                });
            }
            _ => None,
        };

        Ok(Self {
            property: property.into(),
            operator,
            value,
            case_sensitive,
            pattern,
        })
    }

    /// Equality filters cannot fail validation.
    pub(crate) fn equals(property: impl Into<String>, value: Value) -> Self {
        Self {
            property: property.into(),
            operator: FilterOperator::Equals,
            value,
            case_sensitive: true,
            pattern: None,
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn apply<E: ElementProperty + ?Sized>(&self, element: &E) -> bool {
        let found = element.get_property(&self.property).filter(|v| !v.is_null());
        let Some(actual) = found else {
            return self.operator == FilterOperator::IsNull;
        };
        self.matches(&actual)
    }

    fn matches(&self, actual: &Value) -> bool {
        use std::cmp::Ordering::*;
        use FilterOperator as Op;

        let cs = self.case_sensitive;
        match self.operator {
            Op::IsNull => false,
            Op::IsNotNull => true,
            Op::Equals => values_equal(actual, &self.value, cs),
            Op::NotEquals => !values_equal(actual, &self.value, cs),
            Op::GreaterThan => compare(actual, &self.value) == Some(Greater),
            Op::LessThan => compare(actual, &self.value) == Some(Less),
            Op::GreaterEqual => matches!(compare(actual, &self.value), Some(Greater | Equal)),
            Op::LessEqual => matches!(compare(actual, &self.value), Some(Less | Equal)),
            Op::Contains => match actual {
                Value::Array(items) => items.iter().any(|item| values_equal(item, &self.value, cs)),
                _ => fold(text(actual), cs).contains(&fold(text(&self.value), cs)),
            },
            Op::StartsWith => fold(text(actual), cs).starts_with(&fold(text(&self.value), cs)),
            Op::EndsWith => fold(text(actual), cs).ends_with(&fold(text(&self.value), cs)),
            Op::In => self.candidates().any(|c| values_equal(actual, c, cs)),
            Op::NotIn => !self.candidates().any(|c| values_equal(actual, c, cs)),
            Op::Regex => self
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(&text(actual))),
        }
    }

    fn candidates(&self) -> impl Iterator<Item = &Value> {
        self.value.as_array().into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn element() -> Value {
        json!({
            "name": "Basic Wall",
            "height": 10,
            "width": "2.5",
            "tags": ["exterior", "fire"],
            "mark": null,
        })
    }

    fn check(property: &str, op: FilterOperator, value: Value) -> bool {
        FilterCriteria::new(property, op, value, true)
            .unwrap()
            .apply(&element())
    }

    #[rstest]
    #[case::equals("height", FilterOperator::Equals, json!(10), true)]
    #[case::equals_coerced("width", FilterOperator::Equals, json!(2.5), true)]
    #[case::not_equals("name", FilterOperator::NotEquals, json!("Door"), true)]
    #[case::greater("height", FilterOperator::GreaterThan, json!(5), true)]
    #[case::greater_equal("height", FilterOperator::GreaterEqual, json!(10), true)]
    #[case::less("width", FilterOperator::LessThan, json!(3), true)]
    #[case::less_equal("height", FilterOperator::LessEqual, json!(9), false)]
    #[case::contains_text("name", FilterOperator::Contains, json!("Wall"), true)]
    #[case::contains_item("tags", FilterOperator::Contains, json!("fire"), true)]
    #[case::starts_with("name", FilterOperator::StartsWith, json!("Basic"), true)]
    #[case::ends_with("name", FilterOperator::EndsWith, json!("Door"), false)]
    #[case::in_list("height", FilterOperator::In, json!([5, 10]), true)]
    #[case::not_in_list("height", FilterOperator::NotIn, json!([5, 10]), false)]
    #[case::regex("name", FilterOperator::Regex, json!(r"^Basic\s"), true)]
    fn operators_on_present_values(
        #[case] property: &str,
        #[case] op: FilterOperator,
        #[case] value: Value,
        #[case] expected: bool,
    ) {
        assert_eq!(check(property, op, value), expected);
    }

    #[rstest]
    #[case::is_null(FilterOperator::IsNull, true)]
    #[case::is_not_null(FilterOperator::IsNotNull, false)]
    #[case::equals(FilterOperator::Equals, false)]
    #[case::not_equals(FilterOperator::NotEquals, false)]
    #[case::contains(FilterOperator::Contains, false)]
    fn missing_and_null_properties_behave_alike(#[case] op: FilterOperator, #[case] expected: bool) {
        assert_eq!(check("missing", op, json!("x")), expected);
        assert_eq!(check("mark", op, json!("x")), expected);
    }

    #[test]
    fn is_not_null_matches_present_values() {
        assert!(check("name", FilterOperator::IsNotNull, Value::Null));
        assert!(!check("name", FilterOperator::IsNull, Value::Null));
    }

    #[test]
    fn case_insensitive_string_operators() {
        let el = element();
        for (op, value) in [
            (FilterOperator::Equals, json!("basic wall")),
            (FilterOperator::Contains, json!("WALL")),
            (FilterOperator::StartsWith, json!("bAsIc")),
            (FilterOperator::EndsWith, json!("ALL")),
            (FilterOperator::Regex, json!("^basic")),
        ] {
            let sensitive = FilterCriteria::new("name", op, value.clone(), true).unwrap();
            let insensitive = FilterCriteria::new("name", op, value, false).unwrap();
            assert!(!sensitive.apply(&el), "{op} should be case sensitive");
            assert!(insensitive.apply(&el), "{op} should ignore case");
        }
    }

    #[rstest]
    #[case::symbol("==", FilterOperator::Equals)]
    #[case::short("ge", FilterOperator::GreaterEqual)]
    #[case::name("starts_with", FilterOperator::StartsWith)]
    #[case::upper("IS_NOT_NULL", FilterOperator::IsNotNull)]
    fn operator_names_parse(#[case] raw: &str, #[case] expected: FilterOperator) {
        assert_eq!(raw.parse::<FilterOperator>().unwrap(), expected);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = "between".parse::<FilterOperator>().unwrap_err();
        assert!(matches!(err, QueryError::UnknownOperator(name) if name == "between"));
    }

    #[test]
    fn bad_operands_are_rejected_up_front() {
        let err = FilterCriteria::new("name", FilterOperator::Regex, json!("(unclosed"), true)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidPattern { .. }));

        let err = FilterCriteria::new("name", FilterOperator::Regex, json!(3), true).unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));

        let err = FilterCriteria::new("height", FilterOperator::In, json!(10), true).unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidOperand { operator: FilterOperator::In, .. }
        ));
    }
}
