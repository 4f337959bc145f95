/// Writes compiled expressions back out as source text.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::expression::{Expression, Node};
use crate::schema::value::{format_bool, format_number, Value};

/// How string literals are quoted in written output. The escaped variants
/// are for embedding the result inside another quoted string (JSON, C#…).
///
/// A string containing the chosen quote character is written with the
/// other one instead. Strings holding both kinds have no written form the
/// parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StringFormat {
    #[default]
    SingleQuote,
    EscapedSingleQuote,
    DoubleQuote,
    EscapedDoubleQuote,
}

impl StringFormat {
    fn quote(&self, s: &str) -> String {
        let format = match self {
            Self::SingleQuote if s.contains('\'') => Self::DoubleQuote,
            Self::EscapedSingleQuote if s.contains('\'') => Self::EscapedDoubleQuote,
            Self::DoubleQuote if s.contains('"') => Self::SingleQuote,
            Self::EscapedDoubleQuote if s.contains('"') => Self::EscapedSingleQuote,
            other => *other,
        };
        match format {
            Self::SingleQuote => format!("'{}'", s),
            Self::EscapedSingleQuote => format!("\\'{}\\'", s),
            Self::DoubleQuote => format!("\"{}\"", s),
            Self::EscapedDoubleQuote => format!("\\\"{}\\\"", s),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Writer {
    format: StringFormat,
}

impl Writer {
    pub fn new(format: StringFormat) -> Self {
        Self { format }
    }

    pub fn string_format(&self) -> StringFormat {
        self.format
    }

    pub fn write(&self, expression: &Expression) -> String {
        self.write_node(expression.root())
    }

    /// Operands are parenthesized when they bind more loosely than their
    /// parent. Right operands of binary operators are also parenthesized
    /// when they sit on the same grammar level, since every binary operator
    /// groups to the left.
    pub fn write_node(&self, node: &Node) -> String {
        match node {
            Node::Literal(Value::Bool(b)) => format_bool(*b).to_string(),
            Node::Literal(Value::Number(n)) => format_number(*n),
            Node::Literal(Value::String(s)) => self.format.quote(s),
            Node::Variable(name) => name.clone(),
            Node::FunctionCall { name, args } => {
                let written: Vec<String> = args.iter().map(|a| self.write_node(a)).collect();
                format!("{}({})", name, written.join(", "))
            }
            Node::Unary { op, operand } => {
                let mut operand_str = self.write_node(operand);
                if operand.precedence() < node.precedence() {
                    operand_str = format!("({})", operand_str);
                }
                format!("{} {}", op.symbol(), operand_str)
            }
            Node::Binary { op, left, right } => {
                let mut left_str = self.write_node(left);
                let mut right_str = self.write_node(right);
                if left.precedence() < op.precedence() {
                    left_str = format!("({})", left_str);
                }
                let right_level = match right.as_ref() {
                    Node::Binary { op: inner, .. } => inner.tier(),
                    other => other.precedence(),
                };
                if right_level <= op.tier() {
                    right_str = format!("({})", right_str);
                }
                format!("{} {} {}", left_str, op.symbol(), right_str)
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Writer::default().write(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::Context;
    use crate::core::parser::Parser;

    fn rewrite(text: &str) -> String {
        Writer::default().write(&Parser::new().parse(text).unwrap())
    }

    #[test]
    fn string_formats() {
        let expr = Parser::new()
            .parse("get_name()=='fred' and counter>0 and 5/5.0!=0")
            .unwrap();

        assert_eq!(
            Writer::new(StringFormat::SingleQuote).write(&expr),
            "get_name() == 'fred' and counter > 0 and 5 / 5 != 0"
        );
        assert_eq!(
            Writer::new(StringFormat::DoubleQuote).write(&expr),
            "get_name() == \"fred\" and counter > 0 and 5 / 5 != 0"
        );
        assert_eq!(
            Writer::new(StringFormat::EscapedDoubleQuote).write(&expr),
            "get_name() == \\\"fred\\\" and counter > 0 and 5 / 5 != 0"
        );
        assert_eq!(
            Writer::new(StringFormat::EscapedSingleQuote).write(&expr),
            "get_name() == \\'fred\\' and counter > 0 and 5 / 5 != 0"
        );
    }

    #[test]
    fn no_parentheses_when_precedence_allows() {
        assert_eq!(rewrite("1+2*3"), "1 + 2 * 3");
        assert_eq!(rewrite("a or b and c"), "a or b and c");
        assert_eq!(rewrite("not a == b"), "not a == b");
    }

    #[test]
    fn parentheses_where_needed() {
        assert_eq!(rewrite("(1+2)*3"), "(1 + 2) * 3");
        assert_eq!(rewrite("(a or b) and c"), "(a or b) and c");
        assert_eq!(rewrite("not (a and b)"), "not (a and b)");
        assert_eq!(rewrite("a - (b - c)"), "a - (b - c)");
        assert_eq!(rewrite("a * b / c"), "(a * b) / c");
        assert_eq!(rewrite("-(x + 1)"), "- (x + 1)");
        assert_eq!(rewrite("a * (b / c)"), "a * (b / c)");
        assert_eq!(rewrite("a / (b * c)"), "a / (b * c)");
    }

    #[test]
    fn strings_switch_quotes_around_embedded_quotes() {
        assert_eq!(rewrite("\"it's\" == x"), "\"it's\" == x");
        let expr = Parser::new().parse("'say \"hi\"'").unwrap();
        assert_eq!(
            Writer::new(StringFormat::DoubleQuote).write(&expr),
            "'say \"hi\"'"
        );
        assert_eq!(
            Writer::new(StringFormat::EscapedDoubleQuote).write(&expr),
            "\\'say \"hi\"\\'"
        );
    }

    #[test]
    fn display_uses_single_quotes() {
        let expr = Parser::new().parse("name = \"bob\"").unwrap();
        assert_eq!(expr.to_string(), "name == 'bob'");
    }

    #[test]
    fn round_trip_preserves_meaning() {
        let mut ctx = Context::new();
        ctx.set_value("a", 9);
        ctx.set_value("b", 4);
        ctx.set_value("c", 2);
        ctx.set_value("flag", true);

        let parser = Parser::new();
        let writer = Writer::default();
        for text in [
            "a - (b - c)",
            "a / (b / c)",
            "a * b / c",
            "49 * (1 / 49)",
            "a * (b / c) * (c / b)",
            "-(a - b) * c",
            "not flag or a > b and c == 2",
            "(flag or false) and not (a < b)",
            "a = 9 = true",
            "'x' == 'x' and a >= 9",
        ] {
            let original = parser.parse(text).unwrap();
            let written = writer.write(&original);
            let reparsed = parser.parse(&written).unwrap();
            assert_eq!(
                original.evaluate(&ctx, None).unwrap(),
                reparsed.evaluate(&ctx, None).unwrap(),
                "round trip changed meaning of '{}' (written as '{}')",
                text,
                written
            );
        }
    }
}
