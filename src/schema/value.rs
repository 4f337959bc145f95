use serde::{Deserialize, Serialize};
use std::fmt;

/// The only kind of data that flows through expression evaluation.
///
/// Host variables and host functions must resolve to one of these three
/// shapes; anything else is rejected at the [`Context`](crate::core::context::Context)
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// Human-readable kind name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
        }
    }

    /// Truthiness: numbers are true when nonzero, strings when they read
    /// `"true"` (any case) or `"1"`.
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => s.eq_ignore_ascii_case("true") || s == "1",
        }
    }

    /// Numeric view of the value. Strings only convert when they look like
    /// `-?digits(.digits)?`; anything else yields `None`.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Number(n) => Some(*n),
            Self::String(s) if is_numeric_text(s) => s.parse().ok(),
            Self::String(_) => None,
        }
    }

    /// Text view of the value: booleans become `"true"`/`"false"`, numbers
    /// their shortest decimal form.
    pub fn to_text(&self) -> String {
        match self {
            Self::Bool(b) => format_bool(*b).to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
        }
    }

    /// Coerce `self` into the same kind as `template`. Used by `==` and `!=`,
    /// which convert the right operand to the left operand's kind.
    pub fn coerce_like(&self, template: &Value) -> Option<Value> {
        match template {
            Self::Bool(_) => Some(Self::Bool(self.to_bool())),
            Self::Number(_) => self.to_number().map(Self::Number),
            Self::String(_) => Some(Self::String(self.to_text())),
        }
    }

    /// Rendering used in evaluation traces: strings are single-quoted.
    pub fn quoted(&self) -> String {
        match self {
            Self::String(s) => format!("'{}'", s),
            other => other.to_text(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

pub(crate) fn format_bool(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Integral values print without a fractional part (`5`, not `5.0`).
pub(crate) fn format_number(n: f64) -> String {
    format!("{}", n)
}

/// Matches `-?digits(.digits)?`.
fn is_numeric_text(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.map_or(true, all_digits)
}
