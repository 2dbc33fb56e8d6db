//! Durable buffer of progress events waiting to be synced.
//!
//! Events are kept per (user, scope) so independently open sessions flush
//! independently. Every mutation is written through to a [`LocalStore`].
//! The buffer also tracks which scopes have a flush running, so at most one
//! flush per scope is in flight even across sessions.

use crate::database::LocalStore;
use crate::models::ProgressEvent;
use chrono::Duration;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Two answers to the same item closer together than this are one answer.
pub const DEFAULT_DEBOUNCE_MS: i64 = 50;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub user_id: String,
    pub scope: String,
}

impl BufferKey {
    /// Missing or blank parts fall back to `anon` / `default`.
    pub fn new(user_id: Option<&str>, scope: &str) -> Self {
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty()).unwrap_or("anon");
        let scope = scope.trim();
        Self {
            user_id: user_id.to_string(),
            scope: if scope.is_empty() { "default" } else { scope }.to_string(),
        }
    }

    pub fn storage_key(&self) -> String {
        format!("progressQueue:{}:{}", self.user_id, self.scope)
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.scope)
    }
}

/// Identifies one running flush of a scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FlightId(u64);

pub struct EventBuffer<S: LocalStore> {
    store: S,
    queues: HashMap<BufferKey, Vec<ProgressEvent>>,
    flights: HashMap<BufferKey, FlightId>,
    next_flight: u64,
    debounce: Duration,
}

impl<S: LocalStore> EventBuffer<S> {
    pub fn new(store: S) -> Self {
        Self::with_debounce(store, DEFAULT_DEBOUNCE_MS)
    }

    pub fn with_debounce(store: S, debounce_ms: i64) -> Self {
        Self {
            store,
            queues: HashMap::new(),
            flights: HashMap::new(),
            next_flight: 0,
            debounce: Duration::milliseconds(debounce_ms),
        }
    }

    /// Replaces the in-memory queue for `key` with the persisted one.
    ///
    /// Unreadable or corrupt data counts as an empty buffer. Returns the number
    /// of events restored.
    pub fn load(&mut self, key: &BufferKey) -> usize {
        let events = match self.store.get(&key.storage_key()) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<ProgressEvent>>(&raw) {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(%key, error = %e, "discarding unreadable progress buffer");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(%key, error = %e, "could not read progress buffer");
                Vec::new()
            }
        };
        let count = events.len();
        self.queues.insert(key.clone(), events);
        count
    }

    /// Appends an event. Returns false when it was dropped as a repeat: the
    /// previous buffered event is for the same item and less than the debounce
    /// window older.
    pub fn record(&mut self, key: &BufferKey, event: ProgressEvent) -> bool {
        let current = self.events(key);
        if let Some(last) = current.last() {
            if last.same_item(&event) && event.timestamp - last.timestamp < self.debounce {
                tracing::debug!(%key, item = %event.item_id, "dropping repeated answer");
                return false;
            }
        }

        let mut next = current.to_vec();
        next.push(event);
        self.replace(key, next);
        true
    }

    /// Snapshot of the buffered events. The buffer itself is left untouched.
    pub fn drain(&self, key: &BufferKey) -> Vec<ProgressEvent> {
        self.events(key).to_vec()
    }

    pub fn events(&self, key: &BufferKey) -> &[ProgressEvent] {
        self.queues.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, key: &BufferKey) -> usize {
        self.events(key).len()
    }

    pub fn is_empty(&self, key: &BufferKey) -> bool {
        self.events(key).is_empty()
    }

    pub fn clear(&mut self, key: &BufferKey) {
        self.replace(key, Vec::new());
    }

    /// Removes the events of a flushed snapshot. Events recorded after the
    /// snapshot was taken stay buffered. Returns how many were removed.
    pub fn acknowledge(&mut self, key: &BufferKey, sent: &[ProgressEvent]) -> usize {
        let sent_ids: std::collections::HashSet<Uuid> = sent.iter().map(|e| e.id).collect();
        let before = self.len(key);
        let remaining: Vec<ProgressEvent> = self
            .events(key)
            .iter()
            .filter(|e| !sent_ids.contains(&e.id))
            .cloned()
            .collect();
        let removed = before - remaining.len();
        if removed > 0 {
            self.replace(key, remaining);
        }
        removed
    }

    pub fn in_flight(&self, key: &BufferKey) -> bool {
        self.flights.contains_key(key)
    }

    /// Claims the scope for a flush. Returns `None` while another flush of the
    /// same scope is running.
    pub fn start_flight(&mut self, key: &BufferKey) -> Option<FlightId> {
        if self.in_flight(key) {
            return None;
        }
        self.next_flight += 1;
        let id = FlightId(self.next_flight);
        self.flights.insert(key.clone(), id);
        Some(id)
    }

    /// Releases the scope if `id` is the flush holding it.
    pub fn end_flight(&mut self, key: &BufferKey, id: FlightId) -> bool {
        if self.flights.get(key) == Some(&id) {
            self.flights.remove(key);
            true
        } else {
            false
        }
    }

    fn replace(&mut self, key: &BufferKey, events: Vec<ProgressEvent>) {
        self.queues.insert(key.clone(), events);
        self.persist(key);
    }

    fn persist(&self, key: &BufferKey) {
        let written = serde_json::to_string(self.events(key))
            .map_err(Into::into)
            .and_then(|raw| self.store.set(&key.storage_key(), &raw));
        if let Err(e) = written {
            tracing::warn!(%key, error = %e, "could not persist progress buffer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::{AnswerResult, ItemKind};
    use chrono::{DateTime, TimeZone, Utc};

    fn key() -> BufferKey {
        BufferKey::new(Some("ana@example.com"), "flashcard:all:all")
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 18, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn answer(item: &str, ms: i64) -> ProgressEvent {
        ProgressEvent::new(item, ItemKind::Flashcard, AnswerResult::Correct, at(ms))
    }

    #[test]
    fn test_storage_key_format() {
        assert_eq!(key().storage_key(), "progressQueue:ana@example.com:flashcard:all:all");
        assert_eq!(BufferKey::new(None, "").storage_key(), "progressQueue:anon:default");
        assert_eq!(BufferKey::new(Some(" "), "mcq").storage_key(), "progressQueue:anon:mcq");
    }

    #[test]
    fn test_rapid_repeat_is_dropped() {
        let mut buffer = EventBuffer::new(MemoryStore::default());

        assert!(buffer.record(&key(), answer("fc-1", 0)));
        assert!(!buffer.record(&key(), answer("fc-1", 49)));
        assert!(buffer.record(&key(), answer("fc-1", 50)));
        assert_eq!(buffer.len(&key()), 2);
    }

    #[test]
    fn test_other_items_are_not_debounced() {
        let mut buffer = EventBuffer::new(MemoryStore::default());

        assert!(buffer.record(&key(), answer("fc-1", 0)));
        assert!(buffer.record(&key(), answer("fc-2", 10)));

        let mcq = ProgressEvent::new("fc-2", ItemKind::MultipleChoice, AnswerResult::Correct, at(20));
        assert!(buffer.record(&key(), mcq));
        assert_eq!(buffer.len(&key()), 3);
    }

    #[test]
    fn test_scopes_are_independent() {
        let mut buffer = EventBuffer::new(MemoryStore::default());
        let other = BufferKey::new(Some("ana@example.com"), "mcq:all:all");

        buffer.record(&key(), answer("fc-1", 0));
        buffer.record(&other, answer("fc-1", 1));
        buffer.clear(&key());

        assert!(buffer.is_empty(&key()));
        assert_eq!(buffer.len(&other), 1);
    }

    #[test]
    fn test_drain_does_not_clear() {
        let mut buffer = EventBuffer::new(MemoryStore::default());
        buffer.record(&key(), answer("fc-1", 0));

        assert_eq!(buffer.drain(&key()).len(), 1);
        assert_eq!(buffer.drain(&key()).len(), 1);
    }

    #[test]
    fn test_buffer_survives_reload() {
        let store = MemoryStore::default();
        {
            let mut buffer = EventBuffer::new(&store);
            buffer.record(&key(), answer("fc-1", 0));
            buffer.record(&key(), answer("fc-2", 5));
        }

        let mut buffer = EventBuffer::new(&store);
        assert_eq!(buffer.load(&key()), 2);
        assert_eq!(buffer.events(&key())[1].item_id, "fc-2");
    }

    #[test]
    fn test_corrupt_buffer_loads_empty() {
        let store = MemoryStore::default();
        store.set(&key().storage_key(), "{ not json").unwrap();

        let mut buffer = EventBuffer::new(&store);
        assert_eq!(buffer.load(&key()), 0);
        assert!(buffer.record(&key(), answer("fc-1", 0)));
    }

    #[test]
    fn test_one_flight_per_scope() {
        let mut buffer = EventBuffer::new(MemoryStore::default());
        let other = BufferKey::new(Some("ana@example.com"), "mcq:all:all");

        let first = buffer.start_flight(&key()).unwrap();
        assert!(buffer.start_flight(&key()).is_none());
        assert!(buffer.start_flight(&other).is_some());

        let stale = FlightId(first.0 + 100);
        assert!(!buffer.end_flight(&key(), stale));
        assert!(buffer.in_flight(&key()));

        assert!(buffer.end_flight(&key(), first));
        assert!(!buffer.in_flight(&key()));
        assert!(buffer.start_flight(&key()).is_some_and(|next| next != first));
    }

    #[test]
    fn test_acknowledge_keeps_newer_events() {
        let mut buffer = EventBuffer::new(MemoryStore::default());
        buffer.record(&key(), answer("fc-1", 0));
        buffer.record(&key(), answer("fc-2", 100));
        let snapshot = buffer.drain(&key());

        buffer.record(&key(), answer("fc-3", 200));
        assert_eq!(buffer.acknowledge(&key(), &snapshot), 2);

        let left: Vec<_> = buffer.events(&key()).iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(left, vec!["fc-3"]);
    }
}
