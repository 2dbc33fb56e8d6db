//! A study item is a prompt/answer pair, optionally with answer options.
//! Items are immutable once fetched for a session.
use crate::error::ItemError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Kind of a study item. Serialized with the same names the progress sync
/// endpoint uses for `itemType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "flashcard")]
    Flashcard,
    #[serde(rename = "mcq")]
    MultipleChoice,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Flashcard => "flashcard",
            ItemKind::MultipleChoice => "mcq",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Flashcard => "Flashcards",
            ItemKind::MultipleChoice => "Multiple choice",
        }
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flashcard" | "flashcards" => Ok(ItemKind::Flashcard),
            "mcq" | "multiple-choice" => Ok(ItemKind::MultipleChoice),
            other => Err(format!("unknown item kind '{}'", other)),
        }
    }
}

/// CEFR proficiency level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub const ALL: [CefrLevel; 6] = [
        CefrLevel::A1,
        CefrLevel::A2,
        CefrLevel::B1,
        CefrLevel::B2,
        CefrLevel::C1,
        CefrLevel::C2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
            CefrLevel::C2 => "C2",
        }
    }
}

impl fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CefrLevel {
    type Err = ItemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CefrLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ItemError::UnknownLevel(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyItem {
    pub id: String,
    pub kind: ItemKind,
    pub prompt: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub theme: String,
    #[serde(default)]
    pub level: Option<CefrLevel>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl StudyItem {
    pub fn flashcard(id: &str, prompt: &str, answer: &str, theme: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ItemKind::Flashcard,
            prompt: prompt.to_string(),
            answer: answer.to_string(),
            options: Vec::new(),
            theme: theme.to_string(),
            level: None,
            topic: None,
            created_at: None,
        }
    }

    pub fn multiple_choice(
        id: &str,
        prompt: &str,
        answer: &str,
        options: &[&str],
        theme: &str,
    ) -> Self {
        Self {
            kind: ItemKind::MultipleChoice,
            options: options.iter().map(|o| o.to_string()).collect(),
            ..Self::flashcard(id, prompt, answer, theme)
        }
    }

    pub fn with_level(mut self, level: CefrLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Topic used for filtering: the explicit topic, or the theme when absent.
    pub fn topic_or_theme(&self) -> &str {
        match self.topic.as_deref() {
            Some(topic) if !topic.trim().is_empty() => topic,
            _ => &self.theme,
        }
    }

    pub fn validate(&self) -> Result<(), ItemError> {
        if !is_safe_id(&self.id) {
            return Err(ItemError::InvalidId(self.id.clone()));
        }
        if self.prompt.trim().is_empty() || self.answer.trim().is_empty() {
            return Err(ItemError::Empty(self.id.clone()));
        }
        if self.kind == ItemKind::MultipleChoice {
            if self.options.len() < 3 {
                return Err(ItemError::TooFewOptions(self.id.clone()));
            }
            let unique: HashSet<&str> = self.options.iter().map(String::as_str).collect();
            if unique.len() != self.options.len() {
                return Err(ItemError::DuplicateOptions(self.id.clone()));
            }
            if !unique.contains(self.answer.as_str()) {
                return Err(ItemError::AnswerNotAnOption(self.id.clone()));
            }
        }
        Ok(())
    }
}

pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Removes `<...>` markup. An unterminated tag swallows the rest of the input.
pub fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match (in_tag, c) {
            (false, '<') => in_tag = true,
            (true, '>') => in_tag = false,
            (false, _) => out.push(c),
            (true, _) => {}
        }
    }
    out
}

pub fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}
