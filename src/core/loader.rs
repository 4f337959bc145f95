/// Packet loading — turns RON/JSON content packets into storylets on a deck.
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::context::{init_context, ContextError};
use crate::core::deck::{Deck, DeckError, DEFAULT_OUTCOME};
use crate::core::parser::ParseError;
use crate::schema::packet::{Entry, PriorityField, StoryletFields};
use crate::schema::storylet::{InvalidRedraw, Storylet};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storylet entry has no 'id'")]
    MissingId,
    #[error("entry is neither a storylet nor a packet")]
    NotStoryletOrPacket,
    #[error("storylet '{id}': {source}")]
    InvalidRedraw {
        id: String,
        #[source]
        source: InvalidRedraw,
    },
    #[error("storylet '{id}': {source}")]
    Parse {
        id: String,
        #[source]
        source: ParseError,
    },
    #[error("context error: {0}")]
    Context(#[from] ContextError),
    #[error("deck error: {0}")]
    Deck(#[from] DeckError),
}

/// Read a packet file: `.ron` files as RON, anything else as JSON.
pub fn read_packet_file(path: &Path) -> Result<Entry, LoadError> {
    let contents = std::fs::read_to_string(path)?;
    let entry = if path.extension().and_then(|s| s.to_str()) == Some("ron") {
        Entry::parse_ron(&contents)?
    } else {
        Entry::parse_json(&contents)?
    };
    Ok(entry)
}

/// Build a storylet from already-merged settings.
pub fn storylet_from_fields(id: &str, fields: &StoryletFields) -> Result<Storylet, LoadError> {
    let mut storylet = Storylet::new(id);

    if let Some(redraw) = &fields.redraw {
        storylet.redraw = redraw.to_redraw().map_err(|source| LoadError::InvalidRedraw {
            id: id.to_string(),
            source,
        })?;
    }

    let parse_error = |source| LoadError::Parse {
        id: id.to_string(),
        source,
    };
    if let Some(condition) = &fields.condition {
        storylet.set_condition(condition).map_err(parse_error)?;
    }
    match &fields.priority {
        Some(PriorityField::Number(n)) => storylet.set_priority(*n),
        Some(PriorityField::Expression(text)) => {
            storylet.set_priority_expression(text).map_err(parse_error)?
        }
        None => {}
    }

    if let Some(content) = &fields.content {
        storylet.content = content.clone();
    }
    if let Some(outcomes) = &fields.outcomes {
        for (name, updates) in outcomes {
            storylet.set_outcome(name.clone(), updates.clone());
        }
    }

    // Older packets name the play-time updates directly; both spellings
    // become the default outcome unless one is declared explicitly.
    for (field, legacy) in [
        ("updateOnPlayed", &fields.update_on_played),
        ("updateOnDrawn", &fields.update_on_drawn),
    ] {
        let Some(updates) = legacy else {
            continue;
        };
        warn!(id, field, "deprecated field; use outcomes.default instead");
        if storylet.outcome(DEFAULT_OUTCOME).is_none() {
            storylet.set_outcome(DEFAULT_OUTCOME, updates.clone());
        }
    }

    Ok(storylet)
}

impl Deck {
    /// Load a packet (and every nested packet) into this deck.
    ///
    /// `context` blocks are applied with `init_context` when reached, so a
    /// packet cannot re-initialise a name that already exists. A `defaults`
    /// block applies to every storylet after it in the same packet, and to
    /// later sibling packets as well.
    pub fn load_packet(
        &mut self,
        packet: &Entry,
        mut trace: Option<&mut Vec<String>>,
    ) -> Result<(), LoadError> {
        let before = self.len();
        let mut defaults = StoryletFields::default();
        self.read_packet(packet, &mut defaults, trace.as_deref_mut())?;
        debug!(deck = self.id(), added = self.len() - before, "packet loaded");
        Ok(())
    }

    pub fn load_packet_file(
        &mut self,
        path: &Path,
        trace: Option<&mut Vec<String>>,
    ) -> Result<(), LoadError> {
        let packet = read_packet_file(path)?;
        debug!(path = %path.display(), "loading packet");
        self.load_packet(&packet, trace)
    }

    fn read_packet(
        &mut self,
        packet: &Entry,
        defaults: &mut StoryletFields,
        mut trace: Option<&mut Vec<String>>,
    ) -> Result<(), LoadError> {
        if let Some(initializers) = &packet.context {
            let mut ctx = self.context().borrow_mut();
            init_context(&mut ctx, initializers, trace.as_deref_mut())?;
        }

        if let Some(block) = &packet.defaults {
            defaults.overlay(block);
        }

        if let Some(entries) = &packet.storylets {
            let mut inherited = defaults.clone();
            self.read_storylets(entries, &mut inherited, trace)?;
        }
        Ok(())
    }

    fn read_storylets(
        &mut self,
        entries: &[Entry],
        defaults: &mut StoryletFields,
        mut trace: Option<&mut Vec<String>>,
    ) -> Result<(), LoadError> {
        for entry in entries {
            if entry.is_packet() {
                self.read_packet(entry, defaults, trace.as_deref_mut())?;
                continue;
            }

            let Some(id) = &entry.id else {
                let fields = entry.fields();
                return Err(if fields == StoryletFields::default() {
                    LoadError::NotStoryletOrPacket
                } else {
                    LoadError::MissingId
                });
            };

            let mut config = defaults.clone();
            config.overlay(&entry.fields());
            let storylet = storylet_from_fields(id, &config)?;
            self.add_storylet(storylet)?;

            if let Some(t) = trace.as_deref_mut() {
                t.push(format!("Added storylet '{}'", id));
            }
        }
        Ok(())
    }
}
