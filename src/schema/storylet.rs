use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::str::FromStr;
use thiserror::Error;

use crate::core::context::{Context, UpdateMap};
use crate::core::expression::{EvalError, Expression};
use crate::core::parser::{ParseError, Parser};

/// Rejected `redraw` setting: not `always`, `never`, or a count >= -1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid redraw value '{0}': expected \"always\", \"never\", or a non-negative count")]
pub struct InvalidRedraw(pub String);

/// When a storylet becomes eligible again after it has been played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Redraw {
    /// Eligible on every reshuffle.
    #[default]
    Always,
    /// One-shot: never eligible again once played (until reset).
    Never,
    /// Unavailable until this many more plays have happened.
    Cooldown(u32),
}

impl Redraw {
    /// Numeric encoding: 0 = always, -1 = never, N > 0 = cooldown of N.
    pub fn from_count(count: i64) -> Option<Self> {
        match count {
            0 => Some(Self::Always),
            -1 => Some(Self::Never),
            n if n > 0 => u32::try_from(n).ok().map(Self::Cooldown),
            _ => None,
        }
    }

    pub fn count(&self) -> i64 {
        match self {
            Self::Always => 0,
            Self::Never => -1,
            Self::Cooldown(n) => i64::from(*n),
        }
    }
}

impl FromStr for Redraw {
    type Err = InvalidRedraw;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => other
                .parse::<i64>()
                .ok()
                .and_then(Self::from_count)
                .ok_or_else(|| InvalidRedraw(s.to_string())),
        }
    }
}

/// Declared priority: a fixed number, or an expression evaluated at
/// every reshuffle.
#[derive(Debug, Clone, PartialEq)]
pub enum Priority {
    Fixed(f64),
    Expression(Expression),
}

impl Default for Priority {
    fn default() -> Self {
        Self::Fixed(0.0)
    }
}

/// One unit of narrative content plus the rules for when it can be drawn.
///
/// Cooldown bookkeeping (`next_eligible`) and deck membership use interior
/// mutability so a deck can hand out shared `Rc<Storylet>` references and
/// still advance them on play.
#[derive(Debug)]
pub struct Storylet {
    id: String,
    /// Application-defined payload; never interpreted by the engine.
    pub content: serde_json::Value,
    pub redraw: Redraw,
    condition: Option<Expression>,
    priority: Priority,
    outcomes: FxHashMap<String, UpdateMap>,
    /// Play count at which this becomes eligible again; -1 once a
    /// `Never` storylet has been consumed.
    next_eligible: Cell<i64>,
    deck: Cell<Option<u64>>,
}

/// A clone keeps the cooldown state but belongs to no deck.
impl Clone for Storylet {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            content: self.content.clone(),
            redraw: self.redraw,
            condition: self.condition.clone(),
            priority: self.priority.clone(),
            outcomes: self.outcomes.clone(),
            next_eligible: self.next_eligible.clone(),
            deck: Cell::new(None),
        }
    }
}

impl Storylet {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: serde_json::Value::Null,
            redraw: Redraw::default(),
            condition: None,
            priority: Priority::default(),
            outcomes: FxHashMap::default(),
            next_eligible: Cell::new(0),
            deck: Cell::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn condition(&self) -> Option<&Expression> {
        self.condition.as_ref()
    }

    /// Compile and cache the eligibility condition. Empty text clears it.
    pub fn set_condition(&mut self, text: &str) -> Result<(), ParseError> {
        self.condition = if text.trim().is_empty() {
            None
        } else {
            Some(Parser::new().parse(text)?)
        };
        Ok(())
    }

    pub fn priority(&self) -> &Priority {
        &self.priority
    }

    pub fn set_priority(&mut self, priority: f64) {
        self.priority = Priority::Fixed(priority);
    }

    pub fn set_priority_expression(&mut self, text: &str) -> Result<(), ParseError> {
        self.priority = Priority::Expression(Parser::new().parse(text)?);
        Ok(())
    }

    pub fn outcome(&self, name: &str) -> Option<&UpdateMap> {
        self.outcomes.get(name)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &UpdateMap)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn set_outcome(&mut self, name: impl Into<String>, updates: UpdateMap) {
        self.outcomes.insert(name.into(), updates);
    }

    /// True when there is no condition or it evaluates truthy.
    pub fn check_condition(
        &self,
        ctx: &Context,
        trace: Option<&mut Vec<String>>,
    ) -> Result<bool, EvalError> {
        let Some(condition) = &self.condition else {
            return Ok(true);
        };
        let mut trace = trace;
        if let Some(t) = trace.as_deref_mut() {
            t.push(format!("Evaluating condition for {}", self.id));
        }
        Ok(condition.evaluate(ctx, trace)?.to_bool())
    }

    /// Integer bucket key for the current reshuffle.
    ///
    /// Priorities are truncated toward zero. With `use_specificity` the key
    /// becomes `priority * 100 + condition specificity`, so at equal declared
    /// priority the more specific condition sorts first. Keys saturate at
    /// the `i64` range; NaN counts as priority 0.
    pub fn calc_current_priority(
        &self,
        ctx: &Context,
        use_specificity: bool,
        trace: Option<&mut Vec<String>>,
    ) -> Result<i64, EvalError> {
        let declared = match &self.priority {
            Priority::Fixed(n) => *n,
            Priority::Expression(expression) => {
                let mut trace = trace;
                if let Some(t) = trace.as_deref_mut() {
                    t.push(format!("Evaluating priority for {}", self.id));
                }
                let value = expression.evaluate(ctx, trace)?;
                value.to_number().ok_or_else(|| EvalError::TypeMismatch {
                    expected: "number",
                    found: value.quoted(),
                })?
            }
        };

        let mut key = declared.trunc() as i64;
        if use_specificity {
            let specificity = self.condition.as_ref().map_or(0, |c| i64::from(c.specificity()));
            key = key.saturating_mul(100).saturating_add(specificity);
        }
        Ok(key)
    }

    pub fn can_draw(&self, counter: u64) -> bool {
        let next = self.next_eligible.get();
        match self.redraw {
            Redraw::Never if next < 0 => false,
            Redraw::Always => true,
            _ => counter as i64 >= next,
        }
    }

    /// Record that the storylet was played at `counter`.
    pub fn on_consumed(&self, counter: u64) {
        let next = match self.redraw {
            Redraw::Never => -1,
            other => counter as i64 + other.count(),
        };
        self.next_eligible.set(next);
    }

    pub fn reset(&self) {
        self.next_eligible.set(0);
    }

    pub fn next_eligible(&self) -> i64 {
        self.next_eligible.get()
    }

    /// Id of the deck this storylet was added to, if any.
    pub fn deck_id(&self) -> Option<u64> {
        self.deck.get()
    }

    pub(crate) fn attach(&self, deck_id: u64) {
        self.deck.set(Some(deck_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::value::Value;

    #[test]
    fn redraw_parsing() {
        assert_eq!("always".parse::<Redraw>().unwrap(), Redraw::Always);
        assert_eq!("never".parse::<Redraw>().unwrap(), Redraw::Never);
        assert_eq!("3".parse::<Redraw>().unwrap(), Redraw::Cooldown(3));
        assert_eq!("0".parse::<Redraw>().unwrap(), Redraw::Always);
        assert_eq!("-1".parse::<Redraw>().unwrap(), Redraw::Never);
        assert!("-2".parse::<Redraw>().is_err());
        assert!("sometimes".parse::<Redraw>().is_err());
    }

    #[test]
    fn cooldown_counts_plays() {
        let mut s = Storylet::new("s");
        s.redraw = Redraw::Cooldown(2);
        assert!(s.can_draw(0));

        s.on_consumed(1);
        assert!(!s.can_draw(1));
        assert!(!s.can_draw(2));
        assert!(s.can_draw(3));
        assert!(s.can_draw(10));
    }

    #[test]
    fn never_is_one_shot_until_reset() {
        let mut s = Storylet::new("s");
        s.redraw = Redraw::Never;
        assert!(s.can_draw(0));

        s.on_consumed(1);
        assert!(!s.can_draw(1));
        assert!(!s.can_draw(1_000));

        s.reset();
        assert!(s.can_draw(0));
    }

    #[test]
    fn always_ignores_consumption() {
        let s = Storylet::new("s");
        s.on_consumed(5);
        assert!(s.can_draw(0));
        assert!(s.can_draw(5));
    }

    #[test]
    fn condition_is_optional_and_coerced() {
        let ctx = {
            let mut ctx = Context::new();
            ctx.set_value("x", 1);
            ctx
        };

        let mut s = Storylet::new("s");
        assert!(s.check_condition(&ctx, None).unwrap());

        s.set_condition("x").unwrap();
        assert!(s.check_condition(&ctx, None).unwrap());

        s.set_condition("x - 1").unwrap();
        assert!(!s.check_condition(&ctx, None).unwrap());

        s.set_condition("  ").unwrap();
        assert!(s.condition().is_none());
    }

    #[test]
    fn condition_trace_names_the_storylet() {
        let ctx = Context::new();
        let mut s = Storylet::new("intro");
        s.set_condition("true").unwrap();
        let mut trace = Vec::new();
        s.check_condition(&ctx, Some(&mut trace)).unwrap();
        assert_eq!(trace, vec!["Evaluating condition for intro", "Boolean: true"]);
    }

    #[test]
    fn priority_from_expression_is_truncated() {
        let mut ctx = Context::new();
        ctx.set_value("level", 7);

        let mut s = Storylet::new("s");
        s.set_priority_expression("level / 2").unwrap();
        assert_eq!(s.calc_current_priority(&ctx, false, None).unwrap(), 3);

        s.set_priority(-1.5);
        assert_eq!(s.calc_current_priority(&ctx, false, None).unwrap(), -1);
    }

    #[test]
    fn priority_with_specificity() {
        let ctx = Context::new();
        let mut s = Storylet::new("s");
        s.set_priority(2.0);
        s.set_condition("a > 0 and b > 0 or c").unwrap();
        assert_eq!(s.calc_current_priority(&ctx, false, None).unwrap(), 2);
        assert_eq!(s.calc_current_priority(&ctx, true, None).unwrap(), 202);
    }

    #[test]
    fn huge_priorities_saturate() {
        let ctx = Context::new();
        let mut s = Storylet::new("s");
        s.set_condition("a and b").unwrap();

        s.set_priority(1e18);
        assert_eq!(s.calc_current_priority(&ctx, true, None).unwrap(), i64::MAX);
        s.set_priority(-1e18);
        assert_eq!(s.calc_current_priority(&ctx, true, None).unwrap(), i64::MIN + 1);
        s.set_priority(f64::INFINITY);
        assert_eq!(s.calc_current_priority(&ctx, false, None).unwrap(), i64::MAX);
        s.set_priority(f64::NAN);
        assert_eq!(s.calc_current_priority(&ctx, true, None).unwrap(), 1);
    }

    #[test]
    fn non_numeric_priority_is_an_error() {
        let mut ctx = Context::new();
        ctx.set_value("name", Value::from("bob"));
        let mut s = Storylet::new("s");
        s.set_priority_expression("name").unwrap();
        assert!(matches!(
            s.calc_current_priority(&ctx, false, None),
            Err(EvalError::TypeMismatch { expected: "number", .. })
        ));
    }
}
