//! Chooses and orders the items of a review session.

use super::{CefrLevel, ItemKind, ProgressRecord, StudyItem};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    DueFirst,
    Oldest,
    Newest,
    Random,
}

impl SortMode {
    pub const ALL: [SortMode; 4] = [
        SortMode::DueFirst,
        SortMode::Oldest,
        SortMode::Newest,
        SortMode::Random,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::DueFirst => "due",
            SortMode::Oldest => "oldest",
            SortMode::Newest => "newest",
            SortMode::Random => "random",
        }
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown sort mode '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LevelFilter {
    #[default]
    All,
    Only(CefrLevel),
}

impl fmt::Display for LevelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelFilter::All => f.write_str("all"),
            LevelFilter::Only(level) => write!(f, "{}", level),
        }
    }
}

/// Level/topic filters and ordering chosen for a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub level: LevelFilter,
    /// Case-insensitive substring of the item topic (or theme). Blank matches all.
    pub topic: String,
    pub sort: SortMode,
}

impl SessionFilter {
    pub fn matches(&self, item: &StudyItem) -> bool {
        let level_ok = match self.level {
            LevelFilter::All => true,
            LevelFilter::Only(level) => item.level == Some(level),
        };
        let needle = self.topic.trim().to_lowercase();
        level_ok && (needle.is_empty() || item.topic_or_theme().to_lowercase().contains(&needle))
    }

    /// Buffer scope for a session of `kind` under this filter. Sessions with
    /// different scopes buffer and flush their events independently.
    pub fn scope(&self, kind: ItemKind) -> String {
        let topic = self.topic.trim();
        format!(
            "{}:{}:{}",
            kind.as_str(),
            self.level,
            if topic.is_empty() { "all" } else { topic }
        )
    }
}

/// Ordered session items plus the due markers used for highlighting.
#[derive(Clone, Debug, Default)]
pub struct DueSelection {
    pub items: Vec<StudyItem>,
    pub due_count: usize,
    pub due_ids: HashSet<String>,
}

impl DueSelection {
    pub fn is_due(&self, item_id: &str) -> bool {
        self.due_ids.contains(item_id)
    }
}

/// An item without a record has never been reviewed and is always due.
pub fn is_due(progress: Option<&ProgressRecord>, now: DateTime<Utc>) -> bool {
    progress.is_none_or(|record| record.is_due(now))
}

/// Filters, partitions into due and not-due, and orders the candidates.
///
/// Due items come first under [`SortMode::DueFirst`]. The other sort modes
/// reorder the whole list and override that priority.
pub fn select_session<R: Rng + ?Sized>(
    candidates: &[(StudyItem, Option<ProgressRecord>)],
    filter: &SessionFilter,
    now: DateTime<Utc>,
    rng: &mut R,
) -> DueSelection {
    let (due, not_due): (Vec<_>, Vec<_>) = candidates
        .iter()
        .filter(|(item, _)| filter.matches(item))
        .partition(|(_, progress)| is_due(progress.as_ref(), now));

    let due_ids: HashSet<String> = due.iter().map(|(item, _)| item.id.clone()).collect();
    let due_count = due.len();

    let mut items: Vec<StudyItem> = due
        .into_iter()
        .chain(not_due)
        .map(|(item, _)| item.clone())
        .collect();

    match filter.sort {
        SortMode::DueFirst => {}
        SortMode::Oldest => items.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        SortMode::Newest => items.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortMode::Random => items.shuffle(rng),
    }

    DueSelection {
        items,
        due_count,
        due_ids,
    }
}
