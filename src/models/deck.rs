//! A deck is the set of study items generated for one theme and mode.
use super::{ItemKind, StudyItem};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub mode: ItemKind,
    pub theme: String,
    pub items: Vec<StudyItem>,
}

impl Default for Deck {
    fn default() -> Self {
        Self {
            mode: ItemKind::Flashcard,
            theme: "My Deck".to_string(),
            items: Vec::new(),
        }
    }
}

impl Deck {
    /// Items whose kind matches the deck mode.
    pub fn matching_items(&self) -> impl Iterator<Item = &StudyItem> {
        self.items.iter().filter(move |item| item.kind == self.mode)
    }
}
