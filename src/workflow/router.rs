// Router - Choice conditions and branch selection
use regex::Regex;
use serde_json::Value;

use super::path::JsonPath;

/// Predicate evaluated against the execution context
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    StringEquals(JsonPath, String),
    /// `*` matches any run of characters
    StringMatches(JsonPath, Wildcard),
    NumericEquals(JsonPath, f64),
    BooleanEquals(JsonPath, bool),
    IsPresent(JsonPath),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn string_equals(path: &str, expected: &str) -> Self {
        Condition::StringEquals(JsonPath::new(path), expected.to_string())
    }

    pub fn string_matches(path: &str, pattern: &str) -> Self {
        Condition::StringMatches(JsonPath::new(path), Wildcard::new(pattern))
    }

    pub fn numeric_equals(path: &str, expected: f64) -> Self {
        Condition::NumericEquals(JsonPath::new(path), expected)
    }

    pub fn boolean_equals(path: &str, expected: bool) -> Self {
        Condition::BooleanEquals(JsonPath::new(path), expected)
    }

    pub fn is_present(path: &str) -> Self {
        Condition::IsPresent(JsonPath::new(path))
    }

    pub fn evaluate(&self, ctx: &Value) -> bool {
        match self {
            Condition::StringEquals(path, expected) => {
                path.get(ctx).and_then(Value::as_str) == Some(expected.as_str())
            }
            Condition::StringMatches(path, pattern) => path
                .get(ctx)
                .and_then(Value::as_str)
                .map_or(false, |value| pattern.is_match(value)),
            Condition::NumericEquals(path, expected) => path
                .get(ctx)
                .and_then(Value::as_f64)
                .map_or(false, |value| value == *expected),
            Condition::BooleanEquals(path, expected) => {
                path.get(ctx).and_then(Value::as_bool) == Some(*expected)
            }
            Condition::IsPresent(path) => path.get(ctx).is_some(),
            Condition::And(all) => all.iter().all(|c| c.evaluate(ctx)),
            Condition::Or(any) => any.iter().any(|c| c.evaluate(ctx)),
            Condition::Not(inner) => !inner.evaluate(ctx),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Condition::StringMatches(path, pattern) => {
                path.validate()?;
                pattern.validate()
            }
            Condition::StringEquals(path, _)
            | Condition::NumericEquals(path, _)
            | Condition::BooleanEquals(path, _)
            | Condition::IsPresent(path) => path.validate(),
            Condition::And(all) | Condition::Or(all) => {
                if all.is_empty() {
                    return Err("empty And/Or condition".to_string());
                }
                all.iter().try_for_each(Condition::validate)
            }
            Condition::Not(inner) => inner.validate(),
        }
    }
}

/// Glob pattern compiled once, when the condition is declared
#[derive(Debug, Clone)]
pub struct Wildcard {
    pattern: String,
    regex: Option<Regex>,
}

impl Wildcard {
    pub fn new(pattern: &str) -> Self {
        let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
        Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&format!("^{}$", escaped.join(".*"))).ok(),
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.as_ref().map_or(false, |re| re.is_match(value))
    }

    fn validate(&self) -> Result<(), String> {
        match self.regex {
            Some(_) => Ok(()),
            None => Err(format!("pattern '{}' does not compile", self.pattern)),
        }
    }
}

impl PartialEq for Wildcard {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// One `condition -> next` pair of a Choice node
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceRule {
    pub condition: Condition,
    pub next: String,
}

/// Ordered rules plus a default edge; first match wins
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub rules: Vec<ChoiceRule>,
    pub default: Option<String>,
}

impl Choice {
    pub fn select(&self, ctx: &Value) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.condition.evaluate(ctx))
            .map(|rule| rule.next.as_str())
            .or(self.default.as_deref())
    }
}

/// Builder for Choice nodes
#[derive(Debug, Default)]
pub struct ChoiceBuilder {
    rules: Vec<ChoiceRule>,
    default: Option<String>,
}

impl ChoiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add condition with target node
    pub fn when(mut self, condition: Condition, target: &str) -> Self {
        self.rules.push(ChoiceRule {
            condition,
            next: target.to_string(),
        });
        self
    }

    /// Set default target if no conditions match
    pub fn otherwise(mut self, target: &str) -> Self {
        self.default = Some(target.to_string());
        self
    }

    pub fn build(self) -> Choice {
        Choice {
            rules: self.rules,
            default: self.default,
        }
    }
}

/// Predefined conditions for the async job status loops
pub mod conditions {
    use super::Condition;

    pub fn status_is(path: &str, status: &str) -> Condition {
        Condition::string_equals(path, status)
    }

    /// Worker envelope success (`statusCode == 200`)
    pub fn worker_ok(envelope_path: &str) -> Condition {
        Condition::numeric_equals(&format!("{}.statusCode", envelope_path), 200.0)
    }
}
