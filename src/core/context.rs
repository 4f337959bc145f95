/// Evaluation context — the shared variable/function environment, plus the
/// helpers that seed and update it from name → expression maps.

use rustc_hash::FxHashMap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

use crate::core::expression::{EvalError, Expression};
use crate::core::parser::{ParseError, Parser};
use crate::schema::value::Value;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("trying to initialise '{0}' in context when it already exists")]
    AlreadyExists(String),
    #[error("context variable '{0}' is undefined")]
    UndefinedVariable(String),
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// A host function with a fixed number of parameters.
#[derive(Clone)]
pub struct Callable {
    arity: usize,
    func: Rc<dyn Fn(&[Value]) -> Value>,
}

impl Callable {
    pub fn new(arity: usize, func: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self {
            arity,
            func: Rc::new(func),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// What a context name can be bound to.
#[derive(Debug, Clone)]
pub enum ContextValue {
    Value(Value),
    /// Compiled on insertion, evaluated each time the name is read.
    Expression(Expression),
    Callable(Callable),
}

/// Name → value/expression/function bindings that every expression in a
/// scheduling session evaluates against.
#[derive(Debug, Default)]
pub struct Context {
    entries: FxHashMap<String, ContextValue>,
    /// Expression entries currently being evaluated, for cycle detection.
    resolving: RefCell<Vec<String>>,
}

/// A context shared between decks and the host. Single-threaded by design.
pub type SharedContext = Rc<RefCell<Context>>;

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedContext {
        Rc::new(RefCell::new(self))
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ContextValue) -> Option<ContextValue> {
        self.entries.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<ContextValue> {
        self.entries.remove(name)
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.insert(name, ContextValue::Value(value.into()));
    }

    /// Bind `name` to an expression that is re-evaluated on every read.
    pub fn set_expression(&mut self, name: impl Into<String>, text: &str) -> Result<(), ParseError> {
        let expression = Parser::new().parse(text)?;
        self.insert(name, ContextValue::Expression(expression));
        Ok(())
    }

    pub fn set_function(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        func: impl Fn(&[Value]) -> Value + 'static,
    ) {
        self.insert(name, ContextValue::Callable(Callable::new(arity, func)));
    }

    /// Current value of a variable, evaluating expression entries.
    pub fn value(&self, name: &str) -> Result<Value, EvalError> {
        self.resolve(name, None)
    }

    pub(crate) fn resolve(
        &self,
        name: &str,
        trace: Option<&mut Vec<String>>,
    ) -> Result<Value, EvalError> {
        match self.entries.get(name) {
            None => Err(EvalError::UndefinedVariable(name.to_string())),
            Some(ContextValue::Value(value)) => Ok(value.clone()),
            Some(ContextValue::Callable(_)) => Err(EvalError::TypeMismatch {
                expected: "bool, string, or number",
                found: format!("function '{}'", name),
            }),
            Some(ContextValue::Expression(expression)) => {
                if self.resolving.borrow().iter().any(|n| n == name) {
                    return Err(EvalError::RecursiveVariable(name.to_string()));
                }
                self.resolving.borrow_mut().push(name.to_string());
                let result = expression.evaluate(self, trace);
                self.resolving.borrow_mut().pop();
                result
            }
        }
    }

    pub(crate) fn callable(&self, name: &str) -> Option<&Callable> {
        match self.entries.get(name) {
            Some(ContextValue::Callable(callable)) => Some(callable),
            _ => None,
        }
    }
}

/// Right-hand side of a context initializer or update: a literal, or
/// expression text compiled ahead of time.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextExpr {
    Literal(Value),
    Expression(Expression),
}

impl ContextExpr {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Ok(Self::Expression(Parser::new().parse(text)?))
    }
}

impl fmt::Display for ContextExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{}", value),
            Self::Expression(expression) => f.write_str(expression.source()),
        }
    }
}

impl From<bool> for ContextExpr {
    fn from(b: bool) -> Self {
        Self::Literal(Value::Bool(b))
    }
}

impl From<f64> for ContextExpr {
    fn from(n: f64) -> Self {
        Self::Literal(Value::Number(n))
    }
}

// Booleans and numbers are literals; any string is expression text
// (so a string literal is written `"'quoted'"`).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawContextExpr {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for ContextExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawContextExpr::deserialize(deserializer)? {
            RawContextExpr::Bool(b) => Ok(Self::from(b)),
            RawContextExpr::Number(n) => Ok(Self::from(n)),
            RawContextExpr::Text(text) => Self::parse(&text).map_err(de::Error::custom),
        }
    }
}

/// Ordered name → expression map. Entries are applied in the order they
/// were written, so later entries can read values set by earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateMap {
    entries: Vec<(String, ContextExpr)>,
}

impl UpdateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, expression text)` pairs.
    pub fn parse_pairs(pairs: &[(&str, &str)]) -> Result<Self, ParseError> {
        let mut map = Self::new();
        for (name, text) in pairs {
            map.insert(*name, ContextExpr::parse(text)?);
        }
        Ok(map)
    }

    /// Add an entry, replacing (in place) any entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, expr: ContextExpr) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = expr,
            None => self.entries.push((name, expr)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextExpr)> {
        self.entries.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for UpdateMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct UpdateMapVisitor;

        impl<'de> Visitor<'de> for UpdateMapVisitor {
            type Value = UpdateMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of names to literals or expression text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<UpdateMap, A::Error> {
                let mut map = UpdateMap::new();
                while let Some((name, expr)) = access.next_entry::<String, ContextExpr>()? {
                    map.insert(name, expr);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(UpdateMapVisitor)
    }
}

/// Evaluate a literal or compiled expression against `ctx`.
pub fn eval_expression(
    expr: &ContextExpr,
    ctx: &Context,
    trace: Option<&mut Vec<String>>,
) -> Result<Value, EvalError> {
    match expr {
        ContextExpr::Literal(value) => Ok(value.clone()),
        ContextExpr::Expression(expression) => expression.evaluate(ctx, trace),
    }
}

/// Evaluate each entry against the current context and bind it. Fails on
/// the first name that is already bound; earlier entries stay applied.
pub fn init_context(
    ctx: &mut Context,
    properties: &UpdateMap,
    mut trace: Option<&mut Vec<String>>,
) -> Result<(), ContextError> {
    for (name, expr) in properties.iter() {
        if let Some(t) = trace.as_deref_mut() {
            t.push(format!("InitContext: Evaluating {} = {}", name, expr));
        }
        let result = eval_expression(expr, ctx, trace.as_deref_mut())?;
        if ctx.contains(name) {
            return Err(ContextError::AlreadyExists(name.to_string()));
        }
        ctx.set_value(name, result);
    }
    Ok(())
}

/// Evaluate each entry and overwrite an existing binding. Fails on the first
/// name that is not bound; earlier entries stay applied.
pub fn update_context(
    ctx: &mut Context,
    updates: &UpdateMap,
    mut trace: Option<&mut Vec<String>>,
) -> Result<(), ContextError> {
    for (name, expr) in updates.iter() {
        if let Some(t) = trace.as_deref_mut() {
            t.push(format!("UpdateContext: Evaluating {} = {}", name, expr));
        }
        let result = eval_expression(expr, ctx, trace.as_deref_mut())?;
        if !ctx.contains(name) {
            return Err(ContextError::UndefinedVariable(name.to_string()));
        }
        ctx.set_value(name, result);
    }
    Ok(())
}

/// Debug listing of every binding, one `name = value` line each, sorted.
pub fn dump_context(ctx: &Context) -> String {
    ctx.names()
        .into_iter()
        .map(|name| match ctx.get(name) {
            Some(ContextValue::Callable(_)) => format!("{} = <function>", name),
            _ => match ctx.value(name) {
                Ok(value) => format!("{} = {}", name, value),
                Err(e) => format!("{} = <error: {}>", name, e),
            },
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_adds_new_names_in_order() {
        let mut ctx = Context::new();
        let props = UpdateMap::parse_pairs(&[("a", "2"), ("b", "a * 10"), ("name", "'x'")]).unwrap();
        let mut trace = Vec::new();
        init_context(&mut ctx, &props, Some(&mut trace)).unwrap();

        assert_eq!(ctx.value("a").unwrap(), Value::Number(2.0));
        assert_eq!(ctx.value("b").unwrap(), Value::Number(20.0));
        assert_eq!(ctx.value("name").unwrap(), Value::from("x"));
        assert_eq!(trace[0], "InitContext: Evaluating a = 2");
        assert!(trace.contains(&"InitContext: Evaluating b = a * 10".to_string()));
    }

    #[test]
    fn init_rejects_existing_name_but_keeps_earlier_entries() {
        let mut ctx = Context::new();
        ctx.set_value("b", 1);
        let props = UpdateMap::parse_pairs(&[("a", "1"), ("b", "2"), ("c", "3")]).unwrap();
        let err = init_context(&mut ctx, &props, None).unwrap_err();

        assert!(matches!(err, ContextError::AlreadyExists(ref n) if n == "b"));
        assert_eq!(ctx.value("a").unwrap(), Value::Number(1.0));
        assert_eq!(ctx.value("b").unwrap(), Value::Number(1.0));
        assert!(!ctx.contains("c"));
    }

    #[test]
    fn update_overwrites_existing_names() {
        let mut ctx = Context::new();
        ctx.set_value("gold", 10);
        let updates = UpdateMap::parse_pairs(&[("gold", "gold + 5")]).unwrap();
        update_context(&mut ctx, &updates, None).unwrap();
        assert_eq!(ctx.value("gold").unwrap(), Value::Number(15.0));
    }

    #[test]
    fn update_rejects_unknown_name_but_keeps_earlier_entries() {
        let mut ctx = Context::new();
        ctx.set_value("gold", 10);
        let updates = UpdateMap::parse_pairs(&[("gold", "0"), ("silver", "1")]).unwrap();
        let err = update_context(&mut ctx, &updates, None).unwrap_err();

        assert!(matches!(err, ContextError::UndefinedVariable(ref n) if n == "silver"));
        assert_eq!(ctx.value("gold").unwrap(), Value::Number(0.0));
    }

    #[test]
    fn update_propagates_evaluation_errors() {
        let mut ctx = Context::new();
        ctx.set_value("x", 1);
        let updates = UpdateMap::parse_pairs(&[("x", "x / 0")]).unwrap();
        let err = update_context(&mut ctx, &updates, None).unwrap_err();
        assert!(matches!(err, ContextError::Eval(EvalError::DivisionByZero)));
        assert_eq!(ctx.value("x").unwrap(), Value::Number(1.0));
    }

    #[test]
    fn expression_entries_are_lazy() {
        let mut ctx = Context::new();
        ctx.set_value("base", 2);
        ctx.set_expression("double", "base * 2").unwrap();
        assert_eq!(ctx.value("double").unwrap(), Value::Number(4.0));

        ctx.set_value("base", 5);
        assert_eq!(ctx.value("double").unwrap(), Value::Number(10.0));
    }

    #[test]
    fn self_referencing_expression_is_an_error() {
        let mut ctx = Context::new();
        ctx.set_expression("a", "b + 1").unwrap();
        ctx.set_expression("b", "a + 1").unwrap();
        assert_eq!(
            ctx.value("a"),
            Err(EvalError::RecursiveVariable("a".to_string()))
        );
        // The guard is released after a failed evaluation.
        ctx.set_value("b", 1);
        assert_eq!(ctx.value("a").unwrap(), Value::Number(2.0));
    }

    #[test]
    fn literal_and_expression_entries_from_json() {
        let map: UpdateMap =
            serde_json::from_str(r#"{"z": true, "a": 3, "m": "'text'", "b": "a + 1"}"#).unwrap();
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z", "a", "m", "b"]);

        let mut ctx = Context::new();
        init_context(&mut ctx, &map, None).unwrap();
        assert_eq!(ctx.value("b").unwrap(), Value::Number(4.0));
        assert_eq!(ctx.value("m").unwrap(), Value::from("text"));
    }

    #[test]
    fn invalid_expression_text_fails_to_deserialize() {
        let result: Result<UpdateMap, _> = serde_json::from_str(r#"{"a": "1 +"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn dump_lists_sorted_bindings() {
        let mut ctx = Context::new();
        ctx.set_value("b", "hello");
        ctx.set_value("a", 1.5);
        ctx.set_function("f", 1, |args| args[0].clone());
        assert_eq!(dump_context(&ctx), "a = 1.5\nb = hello\nf = <function>");
    }
}
