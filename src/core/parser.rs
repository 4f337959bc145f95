/// Recursive-descent expression parser.
///
/// Precedence, loosest to tightest:
/// `or` → `and` → comparison (`== != > < >= <=`, `=` as `==`) → `+ -` →
/// `* /` → unary (`not`, `!`, `-`) → term.

use thiserror::Error;

use crate::core::expression::{BinaryOp, Expression, Node, UnaryOp};
use crate::core::lexer::{tokenize, Token, TokenKind};
use crate::schema::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unrecognized token at position {position}: '{remainder}'")]
    UnrecognizedToken { position: usize, remainder: String },
    #[error("unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected '{expected}' but found '{found}' at position {position}")]
    Expected {
        expected: &'static str,
        found: String,
        position: usize,
    },
    #[error("expected '{expected}' but expression ended")]
    ExpectedBeforeEnd { expected: &'static str },
    #[error("trailing token '{token}' at position {position}")]
    TrailingInput { token: String, position: usize },
    #[error("expression nested more than {limit} levels deep at position {position}")]
    TooDeep { limit: usize, position: usize },
}

/// Deepest chain of parentheses, calls and prefix operators accepted.
pub const MAX_NESTING: usize = 128;

/// Stateless parser; all cursor state lives in a per-call token stream, so
/// one instance can compile any number of expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> Result<Expression, ParseError> {
        let mut stream = TokenStream {
            tokens: tokenize(text)?,
            pos: 0,
            depth: 0,
        };
        let root = stream.parse_or()?;

        if let Some(token) = stream.peek() {
            return Err(ParseError::TrailingInput {
                token: token.text.clone(),
                position: token.position,
            });
        }

        Ok(Expression::new(text, root))
    }
}

struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl TokenStream {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the next token if its kind is `kind`.
    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind, spelling: &'static str) -> Result<(), ParseError> {
        if self.eat(&kind) {
            return Ok(());
        }
        match self.peek() {
            Some(token) => Err(ParseError::Expected {
                expected: spelling,
                found: token.text.clone(),
                position: token.position,
            }),
            None => Err(ParseError::ExpectedBeforeEnd { expected: spelling }),
        }
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            node = binary(BinaryOp::Or, node, right);
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_comparison()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_comparison()?;
            node = binary(BinaryOp::And, node, right);
        }
        Ok(node)
    }

    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_additive()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Eq) => BinaryOp::Eq,
                Some(TokenKind::NotEq) => BinaryOp::NotEq,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Gte) => BinaryOp::Gte,
                Some(TokenKind::Lte) => BinaryOp::Lte,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            node = binary(op, node, right);
        }
        Ok(node)
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            node = binary(op, node, right);
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            node = binary(op, node, right);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                position: self.peek().map_or(0, |t| t.position),
            });
        }
        self.depth += 1;
        let node = self.parse_prefixed();
        self.depth -= 1;
        node
    }

    fn parse_prefixed(&mut self) -> Result<Node, ParseError> {
        let op = if self.eat(&TokenKind::Not) {
            UnaryOp::Not
        } else if self.eat(&TokenKind::Minus) {
            UnaryOp::Negate
        } else {
            return self.parse_term();
        };
        let operand = self.parse_unary()?;
        Ok(Node::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_term(&mut self) -> Result<Node, ParseError> {
        let token = self.advance().ok_or(ParseError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::LParen => {
                let node = self.parse_or()?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(node)
            }
            TokenKind::Bool(b) => Ok(Node::Literal(Value::Bool(b))),
            TokenKind::Number(n) => Ok(Node::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Node::Literal(Value::String(s))),
            TokenKind::Ident(name) => {
                if !self.eat(&TokenKind::LParen) {
                    return Ok(Node::Variable(name));
                }
                let mut args = Vec::new();
                if !self.eat(&TokenKind::RParen) {
                    args.push(self.parse_or()?);
                    while self.eat(&TokenKind::Comma) {
                        args.push(self.parse_or()?);
                    }
                    self.expect(TokenKind::RParen, ")")?;
                }
                Ok(Node::FunctionCall { name, args })
            }
            _ => Err(ParseError::UnexpectedToken {
                token: token.text,
                position: token.position,
            }),
        }
    }
}

fn binary(op: BinaryOp, left: Node, right: Node) -> Node {
    Node::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Node> {
        Box::new(Node::Variable(name.to_string()))
    }

    fn num(n: f64) -> Box<Node> {
        Box::new(Node::Literal(Value::Number(n)))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = Parser::new().parse("1+2*3").unwrap();
        assert_eq!(
            *expr.root(),
            Node::Binary {
                op: BinaryOp::Add,
                left: num(1.0),
                right: Box::new(Node::Binary {
                    op: BinaryOp::Mul,
                    left: num(2.0),
                    right: num(3.0),
                }),
            }
        );
    }

    #[test]
    fn single_equals_is_equality() {
        let expr = Parser::new().parse("a = 1").unwrap();
        assert_eq!(
            *expr.root(),
            Node::Binary {
                op: BinaryOp::Eq,
                left: var("a"),
                right: num(1.0),
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = Parser::new().parse("a or b && c").unwrap();
        match expr.root() {
            Node::Binary {
                op: BinaryOp::Or,
                right,
                ..
            } => assert!(matches!(**right, Node::Binary { op: BinaryOp::And, .. })),
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn function_calls() {
        let expr = Parser::new().parse("f() + g(1, h(x))").unwrap();
        match expr.root() {
            Node::Binary { left, right, .. } => {
                assert!(matches!(&**left, Node::FunctionCall { name, args } if name == "f" && args.is_empty()));
                assert!(matches!(&**right, Node::FunctionCall { name, args } if name == "g" && args.len() == 2));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn unary_chains() {
        let expr = Parser::new().parse("not !-x").unwrap();
        assert_eq!(expr.dump_structure(), "Not\n  Not\n    Negative\n      Variable(x)\n");
    }

    #[test]
    fn parser_is_reusable_after_errors() {
        let parser = Parser::new();
        assert!(parser.parse("(1 + 2").is_err());
        assert!(parser.parse("1 +").is_err());
        let expr = parser.parse("1 + 2").unwrap();
        assert_eq!(expr.source(), "1 + 2");
    }

    #[test]
    fn syntax_errors() {
        let parser = Parser::new();
        assert_eq!(
            parser.parse("(1 + 2"),
            Err(ParseError::ExpectedBeforeEnd { expected: ")" })
        );
        assert_eq!(
            parser.parse("f(1 2)"),
            Err(ParseError::Expected {
                expected: ")",
                found: "2".to_string(),
                position: 4
            })
        );
        assert_eq!(parser.parse(""), Err(ParseError::UnexpectedEnd));
        assert_eq!(
            parser.parse("a b"),
            Err(ParseError::TrailingInput {
                token: "b".to_string(),
                position: 2
            })
        );
        assert_eq!(
            parser.parse("* 2"),
            Err(ParseError::UnexpectedToken {
                token: "*".to_string(),
                position: 0
            })
        );
        assert!(matches!(
            parser.parse("a @ b"),
            Err(ParseError::UnrecognizedToken { position: 2, .. })
        ));
    }

    #[test]
    fn nesting_is_capped() {
        let parser = Parser::new();
        let ok = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(parser.parse(&ok).is_ok());

        let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(
            parser.parse(&deep),
            Err(ParseError::TooDeep { limit: MAX_NESTING, .. })
        ));
        let negations = format!("{}true", "not ".repeat(500));
        assert!(matches!(parser.parse(&negations), Err(ParseError::TooDeep { .. })));
    }
}
