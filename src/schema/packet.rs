/// Content packet data model — the serde shape of storylet definitions as
/// they appear in RON or JSON content files.
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::core::context::UpdateMap;
use crate::schema::storylet::{InvalidRedraw, Redraw};

/// `redraw` as written: `"always"`, `"never"`, a count, or a count as text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RedrawField {
    Count(i64),
    Text(String),
}

impl RedrawField {
    pub fn to_redraw(&self) -> Result<Redraw, InvalidRedraw> {
        match self {
            Self::Count(n) => Redraw::from_count(*n).ok_or_else(|| InvalidRedraw(n.to_string())),
            Self::Text(text) => text.parse(),
        }
    }
}

/// `priority` as written: a number, or expression text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PriorityField {
    Number(f64),
    Expression(String),
}

/// The storylet settings a `defaults` block can supply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryletFields {
    pub redraw: Option<RedrawField>,
    pub condition: Option<String>,
    pub priority: Option<PriorityField>,
    pub content: Option<serde_json::Value>,
    pub outcomes: Option<FxHashMap<String, UpdateMap>>,
    pub update_on_played: Option<UpdateMap>,
    pub update_on_drawn: Option<UpdateMap>,
}

impl StoryletFields {
    /// Overwrite every field that `other` sets; fields `other` leaves
    /// unset keep their current value.
    pub fn overlay(&mut self, other: &StoryletFields) {
        if other.redraw.is_some() {
            self.redraw = other.redraw.clone();
        }
        if other.condition.is_some() {
            self.condition = other.condition.clone();
        }
        if other.priority.is_some() {
            self.priority = other.priority.clone();
        }
        if other.content.is_some() {
            self.content = other.content.clone();
        }
        if other.outcomes.is_some() {
            self.outcomes = other.outcomes.clone();
        }
        if other.update_on_played.is_some() {
            self.update_on_played = other.update_on_played.clone();
        }
        if other.update_on_drawn.is_some() {
            self.update_on_drawn = other.update_on_drawn.clone();
        }
    }
}

/// One node of a packet file: either a packet (has `storylets`,
/// `defaults`, or `context`) or a leaf storylet (has `id`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: Option<String>,
    pub redraw: Option<RedrawField>,
    pub condition: Option<String>,
    pub priority: Option<PriorityField>,
    pub content: Option<serde_json::Value>,
    pub outcomes: Option<FxHashMap<String, UpdateMap>>,
    pub update_on_played: Option<UpdateMap>,
    pub update_on_drawn: Option<UpdateMap>,

    /// Settings inherited by the storylets that follow in this packet.
    pub defaults: Option<StoryletFields>,
    /// Initializers applied to the deck context when the packet loads.
    pub context: Option<UpdateMap>,
    pub storylets: Option<Vec<Entry>>,
}

impl Entry {
    pub fn is_packet(&self) -> bool {
        self.storylets.is_some() || self.defaults.is_some() || self.context.is_some()
    }

    /// This entry's own storylet settings.
    pub fn fields(&self) -> StoryletFields {
        StoryletFields {
            redraw: self.redraw.clone(),
            condition: self.condition.clone(),
            priority: self.priority.clone(),
            content: self.content.clone(),
            outcomes: self.outcomes.clone(),
            update_on_played: self.update_on_played.clone(),
            update_on_drawn: self.update_on_drawn.clone(),
        }
    }

    pub fn parse_ron(input: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(input)
    }

    pub fn parse_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_packet_shape() {
        let entry = Entry::parse_json(
            r#"{
                "context": { "gold": 0 },
                "defaults": { "redraw": "never", "priority": 1 },
                "storylets": [
                    { "id": "a", "condition": "gold > 0", "priority": "gold * 2" },
                    { "id": "b", "redraw": 3, "content": { "text": "hi" },
                      "outcomes": { "default": { "gold": "gold + 1" } } }
                ]
            }"#,
        )
        .unwrap();

        assert!(entry.is_packet());
        assert_eq!(entry.context.as_ref().unwrap().len(), 1);
        let storylets = entry.storylets.as_ref().unwrap();
        assert_eq!(storylets.len(), 2);
        assert!(!storylets[0].is_packet());
        assert_eq!(
            storylets[0].priority,
            Some(PriorityField::Expression("gold * 2".to_string()))
        );
        assert_eq!(storylets[1].redraw, Some(RedrawField::Count(3)));
        assert!(storylets[1].outcomes.as_ref().unwrap().contains_key("default"));
    }

    #[test]
    fn ron_packet_shape() {
        let entry = Entry::parse_ron(
            r#"#![enable(implicit_some)]
            (
                defaults: (redraw: "always"),
                storylets: [
                    (id: "walk", priority: 2, condition: "tired == false",
                     updateOnPlayed: {"steps": "steps + 1"}),
                ],
            )"#,
        )
        .unwrap();

        assert!(entry.is_packet());
        let walk = &entry.storylets.as_ref().unwrap()[0];
        assert_eq!(walk.id.as_deref(), Some("walk"));
        assert_eq!(walk.priority, Some(PriorityField::Number(2.0)));
        assert!(walk.update_on_played.is_some());
    }

    #[test]
    fn redraw_field_conversion() {
        assert_eq!(RedrawField::Count(0).to_redraw().unwrap(), Redraw::Always);
        assert_eq!(RedrawField::Count(4).to_redraw().unwrap(), Redraw::Cooldown(4));
        assert_eq!(
            RedrawField::Text("never".to_string()).to_redraw().unwrap(),
            Redraw::Never
        );
        assert!(RedrawField::Count(-5).to_redraw().is_err());
    }

    #[test]
    fn overlay_keeps_unset_fields() {
        let mut base = StoryletFields {
            redraw: Some(RedrawField::Text("never".to_string())),
            condition: Some("a".to_string()),
            ..Default::default()
        };
        base.overlay(&StoryletFields {
            condition: Some("b".to_string()),
            ..Default::default()
        });
        assert_eq!(base.redraw, Some(RedrawField::Text("never".to_string())));
        assert_eq!(base.condition.as_deref(), Some("b"));
    }
}
