/// Expression tree, tree-walking evaluator, and specificity weighting.

use thiserror::Error;

use crate::core::context::Context;
use crate::schema::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("variable '{0}' not found in context")]
    UndefinedVariable(String),
    #[error("function '{0}' not found in context")]
    UndefinedFunction(String),
    #[error("function '{name}' takes {expected} argument(s) but was given {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("variable '{0}' is defined in terms of itself")]
    RecursiveVariable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Not => "not",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Negate => "Negative",
            Self::Not => "Not",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    /// Binding strength used when writing the tree back out.
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Or => 40,
            Self::And => 50,
            Self::Eq | Self::NotEq | Self::Gt | Self::Lt | Self::Gte | Self::Lte => 60,
            Self::Add | Self::Sub => 70,
            Self::Mul => 80,
            Self::Div => 85,
        }
    }

    /// Grammar level the parser reads this operator at. `*` and `/` share
    /// a level even though `/` is written as binding tighter.
    pub fn tier(&self) -> u8 {
        match self {
            Self::Div => Self::Mul.precedence(),
            other => other.precedence(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Or => "Or",
            Self::And => "And",
            Self::Eq => "Equals",
            Self::NotEq => "NotEquals",
            Self::Gt => "GreaterThan",
            Self::Lt => "LessThan",
            Self::Gte => "GreaterThanEquals",
            Self::Lte => "LessThanEquals",
            Self::Add => "Plus",
            Self::Sub => "Minus",
            Self::Mul => "Multiply",
            Self::Div => "Divide",
        }
    }

    /// The result `and`/`or` produce without looking at the right operand,
    /// if the left operand already decides it.
    fn short_circuit(&self, left: &Value) -> Option<bool> {
        match self {
            Self::Or if left.to_bool() => Some(true),
            Self::And if !left.to_bool() => Some(false),
            _ => None,
        }
    }

    fn apply(&self, left: &Value, right: &Value) -> Result<Value, EvalError> {
        let result = match self {
            Self::Or => Value::Bool(left.to_bool() || right.to_bool()),
            Self::And => Value::Bool(left.to_bool() && right.to_bool()),
            Self::Eq => Value::Bool(*left == matched(left, right)?),
            Self::NotEq => Value::Bool(*left != matched(left, right)?),
            Self::Gt => Value::Bool(numeric(left)? > numeric(right)?),
            Self::Lt => Value::Bool(numeric(left)? < numeric(right)?),
            Self::Gte => Value::Bool(numeric(left)? >= numeric(right)?),
            Self::Lte => Value::Bool(numeric(left)? <= numeric(right)?),
            Self::Add => Value::Number(numeric(left)? + numeric(right)?),
            Self::Sub => Value::Number(numeric(left)? - numeric(right)?),
            Self::Mul => Value::Number(numeric(left)? * numeric(right)?),
            Self::Div => {
                let divisor = numeric(right)?;
                if divisor == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Value::Number(numeric(left)? / divisor)
            }
        };
        Ok(result)
    }
}

/// Precedence shared by literals, variables, and function calls.
pub const TERM_PRECEDENCE: u8 = 100;
/// Precedence of `not` and unary `-`.
pub const UNARY_PRECEDENCE: u8 = 90;

/// One node of a compiled expression. Trees are immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    Variable(String),
    FunctionCall { name: String, args: Vec<Node> },
    Unary { op: UnaryOp, operand: Box<Node> },
    Binary { op: BinaryOp, left: Box<Node>, right: Box<Node> },
}

impl Node {
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Literal(_) | Self::Variable(_) | Self::FunctionCall { .. } => TERM_PRECEDENCE,
            Self::Unary { .. } => UNARY_PRECEDENCE,
            Self::Binary { op, .. } => op.precedence(),
        }
    }

    /// Sum of the children's specificity, plus one for every `and`/`or`.
    pub fn specificity(&self) -> u32 {
        match self {
            Self::Literal(_) | Self::Variable(_) | Self::FunctionCall { .. } => 0,
            Self::Unary { operand, .. } => operand.specificity(),
            Self::Binary { op, left, right } => {
                let own = u32::from(matches!(op, BinaryOp::Or | BinaryOp::And));
                left.specificity() + right.specificity() + own
            }
        }
    }

    /// Evaluate against `ctx`. When `trace` is given, one line is appended
    /// per literal, variable fetch, call, and operator application.
    pub fn evaluate(
        &self,
        ctx: &Context,
        mut trace: Option<&mut Vec<String>>,
    ) -> Result<Value, EvalError> {
        match self {
            Self::Literal(value) => {
                if let Some(t) = trace {
                    t.push(match value {
                        Value::Bool(_) => format!("Boolean: {}", value.quoted()),
                        Value::Number(_) => format!("Number: {}", value.quoted()),
                        Value::String(_) => format!("String: {}", value.quoted()),
                    });
                }
                Ok(value.clone())
            }
            Self::Variable(name) => {
                let value = ctx.resolve(name, trace.as_deref_mut())?;
                if let Some(t) = trace {
                    t.push(format!("Fetching variable: {} -> {}", name, value.quoted()));
                }
                Ok(value)
            }
            Self::FunctionCall { name, args } => {
                let callable = ctx
                    .callable(name)
                    .ok_or_else(|| EvalError::UndefinedFunction(name.clone()))?;

                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(arg.evaluate(ctx, trace.as_deref_mut())?);
                }

                if arg_values.len() != callable.arity() {
                    return Err(EvalError::ArityMismatch {
                        name: name.clone(),
                        expected: callable.arity(),
                        found: arg_values.len(),
                    });
                }

                let result = callable.call(&arg_values);
                if let Some(t) = trace {
                    let formatted: Vec<String> = arg_values.iter().map(Value::quoted).collect();
                    t.push(format!(
                        "Called function: {}({}) = {}",
                        name,
                        formatted.join(", "),
                        result.quoted()
                    ));
                }
                Ok(result)
            }
            Self::Unary { op, operand } => {
                let value = operand.evaluate(ctx, trace.as_deref_mut())?;
                let result = match op {
                    UnaryOp::Negate => Value::Number(-numeric(&value)?),
                    UnaryOp::Not => Value::Bool(!value.to_bool()),
                };
                if let Some(t) = trace {
                    t.push(format!(
                        "Evaluated: {} {} = {}",
                        op.symbol(),
                        value.quoted(),
                        result.quoted()
                    ));
                }
                Ok(result)
            }
            Self::Binary { op, left, right } => {
                let left_val = left.evaluate(ctx, trace.as_deref_mut())?;

                if let Some(decided) = op.short_circuit(&left_val) {
                    if let Some(t) = trace {
                        t.push(format!(
                            "Evaluated: {} {} (ignore) = {}",
                            left_val.quoted(),
                            op.symbol(),
                            decided
                        ));
                    }
                    return Ok(Value::Bool(decided));
                }

                let right_val = right.evaluate(ctx, trace.as_deref_mut())?;
                let result = op.apply(&left_val, &right_val)?;
                if let Some(t) = trace {
                    t.push(format!(
                        "Evaluated: {} {} {} = {}",
                        left_val.quoted(),
                        op.symbol(),
                        right_val.quoted(),
                        result.quoted()
                    ));
                }
                Ok(result)
            }
        }
    }

    fn dump_into(&self, indent: usize, out: &mut String) {
        out.push_str(&"  ".repeat(indent));
        match self {
            Self::Literal(value @ Value::Bool(_)) => {
                out.push_str(&format!("Boolean({})\n", value.quoted()))
            }
            Self::Literal(value @ Value::Number(_)) => {
                out.push_str(&format!("Number({})\n", value.quoted()))
            }
            Self::Literal(value @ Value::String(_)) => {
                out.push_str(&format!("String({})\n", value.quoted()))
            }
            Self::Variable(name) => out.push_str(&format!("Variable({})\n", name)),
            Self::FunctionCall { name, args } => {
                out.push_str(&format!("FunctionCall({})\n", name));
                for arg in args {
                    arg.dump_into(indent + 1, out);
                }
            }
            Self::Unary { op, operand } => {
                out.push_str(op.name());
                out.push('\n');
                operand.dump_into(indent + 1, out);
            }
            Self::Binary { op, left, right } => {
                out.push_str(op.name());
                out.push('\n');
                left.dump_into(indent + 1, out);
                right.dump_into(indent + 1, out);
            }
        }
    }
}

/// A compiled expression: the parsed tree, the text it came from, and its
/// specificity (fixed at compile time).
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
    specificity: u32,
}

impl Expression {
    pub fn new(source: impl Into<String>, root: Node) -> Self {
        let specificity = root.specificity();
        Self {
            source: source.into(),
            root,
            specificity,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn specificity(&self) -> u32 {
        self.specificity
    }

    pub fn evaluate(
        &self,
        ctx: &Context,
        trace: Option<&mut Vec<String>>,
    ) -> Result<Value, EvalError> {
        self.root.evaluate(ctx, trace)
    }

    /// Indented, one-node-per-line dump of the tree.
    pub fn dump_structure(&self) -> String {
        let mut out = String::new();
        self.root.dump_into(0, &mut out);
        out
    }
}

fn numeric(value: &Value) -> Result<f64, EvalError> {
    value.to_number().ok_or_else(|| EvalError::TypeMismatch {
        expected: "number",
        found: value.quoted(),
    })
}

fn matched(left: &Value, right: &Value) -> Result<Value, EvalError> {
    right.coerce_like(left).ok_or_else(|| EvalError::TypeMismatch {
        expected: left.kind(),
        found: right.quoted(),
    })
}
