//! WASM bindings for storylet-engine — drives a storylet deck from a web page.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use storylet_engine::core::context::{dump_context, Context};
use storylet_engine::core::deck::{Deck, DEFAULT_OUTCOME};
use storylet_engine::schema::packet::Entry;
use storylet_engine::schema::storylet::Storylet;
use storylet_engine::{Parser, Value};

// ---------------------------------------------------------------------------
// Embedded demo data — compiled into the WASM binary
// ---------------------------------------------------------------------------
mod data {
    pub const STREETS_PACKET: &str = include_str!("../../demos/data/streets.json");
}

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(Serialize)]
struct StoryletInfo<'a> {
    id: &'a str,
    content: &'a serde_json::Value,
}

impl<'a> From<&'a Storylet> for StoryletInfo<'a> {
    fn from(storylet: &'a Storylet) -> Self {
        Self {
            id: storylet.id(),
            content: &storylet.content,
        }
    }
}

fn js_error(context: &str, e: impl std::fmt::Display) -> JsError {
    JsError::new(&format!("{context}: {e}"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(|e| js_error("Serialization error", e))
}

// ---------------------------------------------------------------------------
// StoryletDeck — the main exported struct
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct StoryletDeck {
    deck: Deck,
}

#[wasm_bindgen]
impl StoryletDeck {
    /// Build a deck from a JSON content packet.
    #[wasm_bindgen(constructor)]
    pub fn new(packet_json: &str, seed: u64, use_specificity: bool) -> Result<StoryletDeck, JsError> {
        let packet =
            Entry::parse_json(packet_json).map_err(|e| js_error("Invalid packet JSON", e))?;
        let mut deck = Deck::builder()
            .context(Context::new().into_shared())
            .seed(seed)
            .use_specificity(use_specificity)
            .build();
        deck.load_packet(&packet, None)
            .map_err(|e| js_error("Packet load error", e))?;
        Ok(StoryletDeck { deck })
    }

    /// The bundled rainy-street demo packet.
    pub fn demo(seed: u64) -> Result<StoryletDeck, JsError> {
        Self::new(data::STREETS_PACKET, seed, false)
    }

    pub fn reshuffle(&mut self) -> Result<(), JsError> {
        self.deck
            .reshuffle(None, None)
            .map_err(|e| js_error("Reshuffle error", e))
    }

    /// Draw the next storylet. Returns `{"id":…,"content":…}` or `null`.
    pub fn draw(&mut self) -> Result<String, JsError> {
        let drawn = self.deck.draw().map_err(|e| js_error("Draw error", e))?;
        to_json(&drawn.as_deref().map(StoryletInfo::from))
    }

    /// Play a storylet by id with the given outcome (`"default"` if empty).
    pub fn play(&mut self, id: &str, outcome: &str) -> Result<(), JsError> {
        let storylet = self
            .deck
            .get_storylet(id)
            .ok_or_else(|| JsError::new(&format!("Unknown storylet: {id}")))?;
        let outcome = if outcome.is_empty() { DEFAULT_OUTCOME } else { outcome };
        self.deck
            .play(&storylet, outcome)
            .map_err(|e| js_error("Play error", e))
    }

    /// Reshuffle, then draw and play up to `count` storylets. Returns a JSON
    /// array of the played storylets.
    pub fn draw_and_play(&mut self, count: usize, outcome: Option<String>) -> Result<String, JsError> {
        let played = self
            .deck
            .draw_and_play(count, None, outcome.as_deref())
            .map_err(|e| js_error("Draw error", e))?;
        let infos: Vec<StoryletInfo<'_>> = played.iter().map(|s| StoryletInfo::from(&**s)).collect();
        to_json(&infos)
    }

    /// Set a context variable from a JSON scalar (`true`, `3`, `"text"`).
    pub fn set_variable(&mut self, name: &str, value_json: &str) -> Result<(), JsError> {
        let value: Value =
            serde_json::from_str(value_json).map_err(|e| js_error("Invalid value JSON", e))?;
        self.deck.context().borrow_mut().set_value(name, value);
        Ok(())
    }

    /// Current value of a context variable, as JSON.
    pub fn get_variable(&self, name: &str) -> Result<String, JsError> {
        let value = self
            .deck
            .context()
            .borrow()
            .value(name)
            .map_err(|e| js_error("Evaluation error", e))?;
        to_json(&value)
    }

    /// Evaluate an expression against the deck's context. Returns JSON.
    pub fn evaluate(&self, expression: &str) -> Result<String, JsError> {
        let expression = Parser::new()
            .parse(expression)
            .map_err(|e| js_error("Parse error", e))?;
        let value = expression
            .evaluate(&self.deck.context().borrow(), None)
            .map_err(|e| js_error("Evaluation error", e))?;
        to_json(&value)
    }

    pub fn dump_context(&self) -> String {
        dump_context(&self.deck.context().borrow())
    }

    /// Comma-separated ids of the current draw pile.
    pub fn draw_pile(&self) -> Result<String, JsError> {
        self.deck
            .dump_draw_pile()
            .map_err(|e| js_error("Draw pile error", e))
    }

    pub fn counter(&self) -> u64 {
        self.deck.counter()
    }

    pub fn reset(&mut self) {
        self.deck.reset();
    }
}
