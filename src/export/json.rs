//! JSON import/export of study decks.
//! Imported decks are sanitized before any item reaches the database.

use crate::error::ExportError;
use crate::models::Deck;
use crate::models::study_item::{strip_markup, truncate_chars};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const MAX_THEME_CHARS: usize = 200;
const MAX_TEXT_CHARS: usize = 400;
const MAX_OPTION_CHARS: usize = 200;

/// Writes a deck as pretty-printed JSON.
pub fn export_json_to_path<P: AsRef<Path>>(deck: &Deck, path: P) -> Result<(), ExportError> {
    let json_string = serde_json::to_string_pretty(deck)?;
    let mut file = File::create(path.as_ref())?;
    file.write_all(json_string.as_bytes())?;
    tracing::info!(path = %path.as_ref().display(), items = deck.items.len(), "deck exported");
    Ok(())
}

/// Reads and sanitizes a deck. Fails on the first invalid item.
pub fn import_json<P: AsRef<Path>>(path: P) -> Result<Deck, ExportError> {
    let mut file = File::open(path.as_ref())?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let deck: Deck = serde_json::from_str(&contents)?;
    let deck = sanitize_deck(deck)?;

    tracing::info!(
        path = %path.as_ref().display(),
        theme = %deck.theme,
        items = deck.items.len(),
        "deck imported"
    );
    Ok(deck)
}

/// Strips markup from the theme, trims every text field to its length limit,
/// and validates each item.
pub fn sanitize_deck(mut deck: Deck) -> Result<Deck, ExportError> {
    deck.theme = truncate_chars(strip_markup(&deck.theme).trim(), MAX_THEME_CHARS);
    if deck.theme.is_empty() {
        return Err(ExportError::EmptyTheme);
    }

    for item in &mut deck.items {
        item.theme = deck.theme.clone();
        item.prompt = truncate_chars(item.prompt.trim(), MAX_TEXT_CHARS);
        item.answer = truncate_chars(item.answer.trim(), MAX_TEXT_CHARS);
        for option in &mut item.options {
            *option = truncate_chars(option.trim(), MAX_OPTION_CHARS);
        }
        item.validate()?;
    }

    Ok(deck)
}
