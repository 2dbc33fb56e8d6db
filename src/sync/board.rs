//! Locally visible progress: server records with unsynced answers on top.

use crate::models::{ProgressEvent, ProgressRecord, StudyItem};
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct ProgressBoard {
    base: HashMap<String, ProgressRecord>,
    overlay: HashMap<String, ProgressRecord>,
}

impl ProgressBoard {
    /// Board for records loaded from the authoritative store.
    pub fn seed<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, ProgressRecord)>,
    {
        Self {
            base: records.into_iter().collect(),
            overlay: HashMap::new(),
        }
    }

    /// Folds a freshly recorded answer into the optimistic view.
    pub fn record(&mut self, event: &ProgressEvent) {
        let next = self.effective(&event.item_id).unwrap_or_default().apply(event);
        self.overlay.insert(event.item_id.clone(), next);
    }

    /// Replays events left over in the buffer from an earlier run.
    pub fn apply_buffered<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a ProgressEvent>,
    {
        for event in events {
            self.record(event);
        }
    }

    /// The record the UI should show for an item.
    pub fn effective(&self, item_id: &str) -> Option<ProgressRecord> {
        self.overlay
            .get(item_id)
            .or_else(|| self.base.get(item_id))
            .cloned()
    }

    /// Adopts authoritative records after a successful flush.
    ///
    /// Authoritative values replace the local ones. Answers still buffered for
    /// those items (recorded while the flush was running) are folded back on top.
    pub fn reconcile(
        &mut self,
        authoritative: HashMap<String, ProgressRecord>,
        still_buffered: &[ProgressEvent],
    ) {
        for (item_id, record) in authoritative {
            self.overlay.remove(&item_id);
            let pending: Vec<&ProgressEvent> = still_buffered
                .iter()
                .filter(|e| e.item_id == item_id)
                .collect();
            if !pending.is_empty() {
                let replayed = pending.into_iter().fold(record.clone(), |r, e| r.apply(e));
                self.overlay.insert(item_id.clone(), replayed);
            }
            self.base.insert(item_id, record);
        }
    }

    /// Pairs items with their effective progress for due selection.
    pub fn candidates(&self, items: &[StudyItem]) -> Vec<(StudyItem, Option<ProgressRecord>)> {
        items
            .iter()
            .map(|item| (item.clone(), self.effective(&item.id)))
            .collect()
    }

    pub fn has_unsynced(&self) -> bool {
        !self.overlay.is_empty()
    }
}
