//! Storylet Engine — condition- and priority-driven content scheduling
//! for games and interactive fiction.
//!
//! Picks what happens next from a deck of storylets: each storylet carries
//! an eligibility condition, a priority, and a cooldown rule, all written in
//! a small expression language that evaluates against a context shared with
//! the host application.

pub mod core;
pub mod schema;

pub use crate::core::context::{Context, SharedContext, UpdateMap};
pub use crate::core::deck::{Deck, DeckBuilder, DeckError, ReshuffleProgress};
pub use crate::core::expression::{EvalError, Expression};
pub use crate::core::loader::LoadError;
pub use crate::core::parser::{ParseError, Parser};
pub use crate::core::writer::{StringFormat, Writer};
pub use crate::schema::storylet::{Redraw, Storylet};
pub use crate::schema::value::Value;
