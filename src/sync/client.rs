//! Batch flushing of buffered progress events.
//!
//! One [`SyncClient`] serves one buffer scope. A flush is split into three
//! steps so the UI thread never blocks on the network:
//! [`SyncClient::begin`] snapshots the buffer into a [`FlushJob`], the job runs
//! on the async runtime and yields a [`FlushReport`], and
//! [`SyncClient::finish`] folds the report back into the buffer. Events recorded
//! while a job is running are not part of its snapshot and wait for the next
//! flush. The buffer holds the claim on a scope while a job runs, so a client
//! created for the same scope while an older job is still out waits for it.

use super::buffer::{BufferKey, EventBuffer, FlightId};
use super::remote::ProgressRemote;
use crate::database::LocalStore;
use crate::error::SyncError;
use crate::models::{ProgressEvent, ProgressRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    /// Period of the flush timer.
    pub interval: Duration,
    /// Flush after this many recorded events.
    pub flush_every: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            flush_every: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    Syncing,
    Retrying,
}

impl SyncState {
    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Synced => "Synced",
            SyncState::Syncing => "Syncing...",
            SyncState::Retrying => "Offline, retrying",
        }
    }
}

/// Why a flush was attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushTrigger {
    Interval,
    Hidden,
    EventCount,
    SessionComplete,
    Refocus,
    Manual,
}

/// A captured batch ready to be sent.
pub struct FlushJob {
    key: BufferKey,
    flight: FlightId,
    events: Vec<ProgressEvent>,
    trigger: FlushTrigger,
    remote: Arc<dyn ProgressRemote>,
}

impl FlushJob {
    pub fn key(&self) -> &BufferKey {
        &self.key
    }

    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    pub async fn run(self) -> FlushReport {
        let result = self.remote.push_batch(&self.events).await;
        FlushReport {
            key: self.key,
            flight: self.flight,
            sent: self.events,
            trigger: self.trigger,
            result,
        }
    }
}

/// Result of running a [`FlushJob`].
#[derive(Debug)]
pub struct FlushReport {
    pub key: BufferKey,
    pub flight: FlightId,
    pub sent: Vec<ProgressEvent>,
    pub trigger: FlushTrigger,
    pub result: Result<HashMap<String, ProgressRecord>, SyncError>,
}

impl FlushReport {
    /// Applies the report to the buffer: a successful batch is removed from it,
    /// a failed one stays for the next attempt. Either way the scope is released.
    pub fn settle<S: LocalStore>(self, buffer: &mut EventBuffer<S>) -> FlushOutcome {
        buffer.end_flight(&self.key, self.flight);
        match self.result {
            Ok(records) => {
                let removed = buffer.acknowledge(&self.key, &self.sent);
                tracing::info!(
                    key = %self.key,
                    trigger = ?self.trigger,
                    sent = removed,
                    reconciled = records.len(),
                    "progress synced"
                );
                FlushOutcome::Synced(records)
            }
            Err(error) => {
                tracing::warn!(
                    key = %self.key,
                    trigger = ?self.trigger,
                    pending = buffer.len(&self.key),
                    %error,
                    "progress sync failed, will retry"
                );
                FlushOutcome::Retrying(error)
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was buffered; no request was made.
    Idle,
    /// A flush for this scope is already running; its successor picks up new events.
    InFlight,
    /// Authoritative records for the flushed items. They override local state.
    Synced(HashMap<String, ProgressRecord>),
    Retrying(SyncError),
}

pub struct SyncClient {
    key: BufferKey,
    remote: Arc<dyn ProgressRemote>,
    settings: SyncSettings,
    state: SyncState,
    flight: Option<FlightId>,
    retry_on_focus: bool,
    recorded_since_flush: usize,
    last_tick: Instant,
}

impl SyncClient {
    pub fn new(key: BufferKey, remote: Arc<dyn ProgressRemote>, settings: SyncSettings) -> Self {
        Self {
            key,
            remote,
            settings,
            state: SyncState::Synced,
            flight: None,
            retry_on_focus: false,
            recorded_since_flush: 0,
            last_tick: Instant::now(),
        }
    }

    pub fn key(&self) -> &BufferKey {
        &self.key
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Whether a job started by this client has not reported back yet.
    pub fn is_in_flight(&self) -> bool {
        self.flight.is_some()
    }

    /// Buffers an answer. Returns a trigger when enough answers have piled up
    /// to warrant an eager flush.
    pub fn record<S: LocalStore>(
        &mut self,
        buffer: &mut EventBuffer<S>,
        event: ProgressEvent,
    ) -> Option<FlushTrigger> {
        if !buffer.record(&self.key, event) {
            return None;
        }
        self.recorded_since_flush += 1;
        if self.recorded_since_flush >= self.settings.flush_every {
            self.recorded_since_flush = 0;
            Some(FlushTrigger::EventCount)
        } else {
            None
        }
    }

    /// Fires once per timer period.
    pub fn poll_timer(&mut self, now: Instant) -> Option<FlushTrigger> {
        if now.duration_since(self.last_tick) >= self.settings.interval {
            self.last_tick = now;
            Some(FlushTrigger::Interval)
        } else {
            None
        }
    }

    /// Time left until the timer fires.
    pub fn until_next_tick(&self, now: Instant) -> Duration {
        self.settings
            .interval
            .saturating_sub(now.duration_since(self.last_tick))
    }

    /// Regaining focus retries only after a failed attempt.
    pub fn on_focus(&mut self) -> Option<FlushTrigger> {
        if self.retry_on_focus {
            self.retry_on_focus = false;
            Some(FlushTrigger::Refocus)
        } else {
            None
        }
    }

    /// Snapshots the buffer for sending. Returns `None` when the buffer is empty
    /// (the client is then synced) or a flush of the scope is already running.
    pub fn begin<S: LocalStore>(
        &mut self,
        buffer: &mut EventBuffer<S>,
        trigger: FlushTrigger,
    ) -> Option<FlushJob> {
        if buffer.in_flight(&self.key) {
            tracing::debug!(key = %self.key, ?trigger, "flush already running");
            return None;
        }

        let events = buffer.drain(&self.key);
        if events.is_empty() {
            self.state = SyncState::Synced;
            return None;
        }

        let flight = buffer.start_flight(&self.key)?;
        tracing::debug!(key = %self.key, ?trigger, count = events.len(), "flushing progress");
        self.state = SyncState::Syncing;
        self.flight = Some(flight);
        Some(FlushJob {
            key: self.key.clone(),
            flight,
            events,
            trigger,
            remote: Arc::clone(&self.remote),
        })
    }

    /// Applies a finished job's report to the buffer and the state machine.
    ///
    /// Reports of jobs this client did not start (another scope, or an earlier
    /// session on this scope) only settle the buffer.
    pub fn finish<S: LocalStore>(
        &mut self,
        buffer: &mut EventBuffer<S>,
        report: FlushReport,
    ) -> FlushOutcome {
        if report.key != self.key || self.flight != Some(report.flight) {
            return report.settle(buffer);
        }

        self.flight = None;
        let outcome = report.settle(buffer);
        match outcome {
            FlushOutcome::Retrying(_) => {
                self.state = SyncState::Retrying;
                self.retry_on_focus = true;
            }
            _ => {
                self.state = SyncState::Synced;
                self.retry_on_focus = false;
            }
        }
        outcome
    }

    /// Runs a whole flush in place: begin, send, finish.
    pub async fn flush<S: LocalStore>(
        &mut self,
        buffer: &mut EventBuffer<S>,
        trigger: FlushTrigger,
    ) -> FlushOutcome {
        let Some(job) = self.begin(buffer, trigger) else {
            return if buffer.in_flight(&self.key) {
                FlushOutcome::InFlight
            } else {
                FlushOutcome::Idle
            };
        };
        let report = job.run().await;
        self.finish(buffer, report)
    }
}

/// Turns window and session state, sampled once per frame, into flush triggers.
///
/// Each edge fires once: losing focus or minimizing gives one `Hidden`,
/// regaining focus asks the client for a retry, and the end of the queue gives
/// one `SessionComplete` for the lifetime of the watch.
#[derive(Clone, Debug)]
pub struct TriggerWatch {
    was_focused: bool,
    was_minimized: bool,
    completion_sent: bool,
}

impl Default for TriggerWatch {
    fn default() -> Self {
        Self {
            was_focused: true,
            was_minimized: false,
            completion_sent: false,
        }
    }
}

impl TriggerWatch {
    pub fn observe(
        &mut self,
        client: &mut SyncClient,
        focused: bool,
        minimized: bool,
        queue_finished: bool,
        now: Instant,
    ) -> Vec<FlushTrigger> {
        let mut triggers = Vec::new();
        triggers.extend(client.poll_timer(now));

        if focused && !self.was_focused {
            triggers.extend(client.on_focus());
        }
        if (!focused && self.was_focused) || (minimized && !self.was_minimized) {
            triggers.push(FlushTrigger::Hidden);
        }
        if queue_finished && !self.completion_sent {
            self.completion_sent = true;
            triggers.push(FlushTrigger::SessionComplete);
        }

        self.was_focused = focused;
        self.was_minimized = minimized;
        triggers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::models::{AnswerResult, ItemKind};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers pushes from a script and remembers every batch it saw.
    #[derive(Default)]
    struct ScriptedRemote {
        script: Mutex<VecDeque<Result<(), SyncError>>>,
        seen: Mutex<Vec<Vec<ProgressEvent>>>,
    }

    impl ScriptedRemote {
        fn failing_first() -> Self {
            let remote = Self::default();
            remote
                .script
                .lock()
                .unwrap()
                .push_back(Err(SyncError::Status(500)));
            remote
        }

        fn batches(&self) -> Vec<Vec<ProgressEvent>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProgressRemote for ScriptedRemote {
        async fn push_batch(
            &self,
            events: &[ProgressEvent],
        ) -> Result<HashMap<String, ProgressRecord>, SyncError> {
            self.seen.lock().unwrap().push(events.to_vec());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))?;
            let mut records = HashMap::new();
            for event in events {
                let previous = records.get(&event.item_id).cloned().unwrap_or_default();
                records.insert(event.item_id.clone(), ProgressRecord::apply(&previous, event));
            }
            Ok(records)
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 7, 30, 0).unwrap() + ChronoDuration::milliseconds(ms)
    }

    fn answer(item: &str, ms: i64) -> ProgressEvent {
        ProgressEvent::new(item, ItemKind::Flashcard, AnswerResult::Correct, at(ms))
    }

    fn setup(remote: Arc<ScriptedRemote>) -> (SyncClient, EventBuffer<MemoryStore>) {
        let key = BufferKey::new(Some("ana"), "flashcard:all:all");
        let client = SyncClient::new(key, remote, SyncSettings::default());
        (client, EventBuffer::new(MemoryStore::default()))
    }

    #[tokio::test]
    async fn test_empty_buffer_makes_no_request() {
        let remote = Arc::new(ScriptedRemote::default());
        let (mut client, mut buffer) = setup(Arc::clone(&remote));

        assert_eq!(client.flush(&mut buffer, FlushTrigger::Manual).await, FlushOutcome::Idle);
        assert_eq!(client.state(), SyncState::Synced);
        assert!(remote.batches().is_empty());
    }

    #[tokio::test]
    async fn test_successful_flush_clears_buffer() {
        let remote = Arc::new(ScriptedRemote::default());
        let (mut client, mut buffer) = setup(Arc::clone(&remote));
        client.record(&mut buffer, answer("fc-1", 0));
        client.record(&mut buffer, answer("fc-2", 100));

        let outcome = client.flush(&mut buffer, FlushTrigger::Manual).await;

        let records = match outcome {
            FlushOutcome::Synced(records) => records,
            other => panic!("expected a synced outcome, got {:?}", other),
        };
        assert_eq!(records.len(), 2);
        assert!(buffer.is_empty(client.key()));
        assert_eq!(client.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn test_failed_flush_resends_same_batch() {
        let remote = Arc::new(ScriptedRemote::failing_first());
        let (mut client, mut buffer) = setup(Arc::clone(&remote));
        client.record(&mut buffer, answer("fc-1", 0));
        client.record(&mut buffer, answer("fc-2", 100));

        let outcome = client.flush(&mut buffer, FlushTrigger::Interval).await;
        assert_eq!(outcome, FlushOutcome::Retrying(SyncError::Status(500)));
        assert_eq!(client.state(), SyncState::Retrying);
        assert_eq!(buffer.len(client.key()), 2);

        assert_eq!(client.on_focus(), Some(FlushTrigger::Refocus));
        assert_eq!(client.on_focus(), None);

        let outcome = client.flush(&mut buffer, FlushTrigger::Refocus).await;
        assert!(matches!(outcome, FlushOutcome::Synced(_)));

        let batches = remote.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], batches[1]);
        assert!(buffer.is_empty(client.key()));
    }

    #[tokio::test]
    async fn test_events_recorded_in_flight_wait_for_next_flush() {
        let remote = Arc::new(ScriptedRemote::default());
        let (mut client, mut buffer) = setup(Arc::clone(&remote));
        client.record(&mut buffer, answer("fc-1", 0));

        let job = client.begin(&mut buffer, FlushTrigger::Manual).unwrap();
        assert_eq!(client.state(), SyncState::Syncing);
        assert!(client.begin(&mut buffer, FlushTrigger::Interval).is_none());

        client.record(&mut buffer, answer("fc-2", 100));
        let report = job.run().await;
        assert_eq!(report.sent.len(), 1);
        client.finish(&mut buffer, report);

        let left: Vec<_> = buffer.events(client.key()).iter().map(|e| e.item_id.clone()).collect();
        assert_eq!(left, vec!["fc-2".to_string()]);

        client.flush(&mut buffer, FlushTrigger::Manual).await;
        assert_eq!(remote.batches()[1].len(), 1);
        assert_eq!(remote.batches()[1][0].item_id, "fc-2");
    }

    #[tokio::test]
    async fn test_report_settles_after_teardown() {
        let remote = Arc::new(ScriptedRemote::default());
        let (mut client, mut buffer) = setup(Arc::clone(&remote));
        client.record(&mut buffer, answer("fc-1", 0));

        let job = client.begin(&mut buffer, FlushTrigger::Hidden).unwrap();
        let key = client.key().clone();
        drop(client);

        let outcome = job.run().await.settle(&mut buffer);
        assert!(matches!(outcome, FlushOutcome::Synced(_)));
        assert!(buffer.is_empty(&key));
    }

    #[tokio::test]
    async fn test_one_flush_per_scope_across_clients() {
        let remote = Arc::new(ScriptedRemote::default());
        let (mut old_client, mut buffer) = setup(Arc::clone(&remote));
        old_client.record(&mut buffer, answer("fc-1", 0));
        let job = old_client.begin(&mut buffer, FlushTrigger::Hidden).unwrap();
        drop(old_client);

        let key = job.key().clone();
        let mut client = SyncClient::new(key.clone(), remote.clone(), SyncSettings::default());
        assert!(client.begin(&mut buffer, FlushTrigger::Manual).is_none());
        assert_eq!(
            client.flush(&mut buffer, FlushTrigger::Manual).await,
            FlushOutcome::InFlight
        );
        assert!(remote.batches().is_empty());

        let outcome = client.finish(&mut buffer, job.run().await);
        assert!(matches!(outcome, FlushOutcome::Synced(_)));
        assert!(!client.is_in_flight());
        assert_eq!(client.state(), SyncState::Synced);
        assert!(!buffer.in_flight(&key));
        assert!(buffer.is_empty(&key));

        client.record(&mut buffer, answer("fc-2", 100));
        let job = client.begin(&mut buffer, FlushTrigger::Manual).unwrap();
        assert!(client.is_in_flight());
        let ids: Vec<_> = job.events().iter().map(|e| e.item_id.clone()).collect();
        assert_eq!(ids, vec!["fc-2".to_string()]);
    }

    #[tokio::test]
    async fn test_foreign_report_leaves_client_state() {
        let remote = Arc::new(ScriptedRemote::failing_first());
        let (mut old_client, mut buffer) = setup(Arc::clone(&remote));
        old_client.record(&mut buffer, answer("fc-1", 0));
        let job = old_client.begin(&mut buffer, FlushTrigger::Hidden).unwrap();

        let mut client = SyncClient::new(job.key().clone(), remote.clone(), SyncSettings::default());
        let outcome = client.finish(&mut buffer, job.run().await);

        assert_eq!(outcome, FlushOutcome::Retrying(SyncError::Status(500)));
        assert_eq!(client.state(), SyncState::Synced);
        assert_eq!(client.on_focus(), None);
        assert_eq!(buffer.len(client.key()), 1);
        assert!(client.begin(&mut buffer, FlushTrigger::Manual).is_some());
    }

    #[test]
    fn test_hidden_fires_once_per_blur() {
        let (mut client, _) = setup(Arc::new(ScriptedRemote::default()));
        let mut watch = TriggerWatch::default();
        let now = Instant::now();

        assert!(watch.observe(&mut client, true, false, false, now).is_empty());
        assert_eq!(
            watch.observe(&mut client, false, false, false, now),
            vec![FlushTrigger::Hidden]
        );
        assert!(watch.observe(&mut client, false, false, false, now).is_empty());
        assert_eq!(
            watch.observe(&mut client, false, true, false, now),
            vec![FlushTrigger::Hidden]
        );
        assert!(watch.observe(&mut client, false, true, false, now).is_empty());
    }

    #[test]
    fn test_blur_and_minimize_in_one_frame_fire_once() {
        let (mut client, _) = setup(Arc::new(ScriptedRemote::default()));
        let mut watch = TriggerWatch::default();

        let triggers = watch.observe(&mut client, false, true, false, Instant::now());
        assert_eq!(triggers, vec![FlushTrigger::Hidden]);
    }

    #[tokio::test]
    async fn test_refocus_fires_only_after_failure() {
        let remote = Arc::new(ScriptedRemote::failing_first());
        let (mut client, mut buffer) = setup(Arc::clone(&remote));
        let mut watch = TriggerWatch::default();
        let now = Instant::now();

        watch.observe(&mut client, false, false, false, now);
        assert!(watch.observe(&mut client, true, false, false, now).is_empty());

        client.record(&mut buffer, answer("fc-1", 0));
        client.flush(&mut buffer, FlushTrigger::Manual).await;
        assert_eq!(client.state(), SyncState::Retrying);

        assert!(watch.observe(&mut client, true, false, false, now).is_empty());
        assert_eq!(
            watch.observe(&mut client, false, false, false, now),
            vec![FlushTrigger::Hidden]
        );
        assert_eq!(
            watch.observe(&mut client, true, false, false, now),
            vec![FlushTrigger::Refocus]
        );
        watch.observe(&mut client, false, false, false, now);
        assert!(watch.observe(&mut client, true, false, false, now).is_empty());
    }

    #[test]
    fn test_session_complete_fires_once() {
        let (mut client, _) = setup(Arc::new(ScriptedRemote::default()));
        let mut watch = TriggerWatch::default();
        let now = Instant::now();

        assert!(watch.observe(&mut client, true, false, false, now).is_empty());
        assert_eq!(
            watch.observe(&mut client, true, false, true, now),
            vec![FlushTrigger::SessionComplete]
        );
        assert!(watch.observe(&mut client, true, false, true, now).is_empty());
    }

    #[test]
    fn test_watch_reports_timer() {
        let (mut client, _) = setup(Arc::new(ScriptedRemote::default()));
        let mut watch = TriggerWatch::default();
        let later = Instant::now() + Duration::from_secs(16);

        assert_eq!(
            watch.observe(&mut client, true, false, true, later),
            vec![FlushTrigger::Interval, FlushTrigger::SessionComplete]
        );
        assert!(watch.observe(&mut client, true, false, true, later).is_empty());
    }

    #[test]
    fn test_state_labels_are_ascii() {
        for state in [SyncState::Synced, SyncState::Syncing, SyncState::Retrying] {
            assert!(state.label().is_ascii(), "{:?}", state);
        }
    }

    #[test]
    fn test_every_fifth_event_triggers_flush() {
        let (mut client, mut buffer) = setup(Arc::new(ScriptedRemote::default()));
        let triggers: Vec<_> = (0..10)
            .map(|i| client.record(&mut buffer, answer(&format!("fc-{}", i), i * 100)))
            .collect();

        let fired: Vec<_> = triggers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fired, vec![4, 9]);
    }

    #[test]
    fn test_debounced_event_does_not_count() {
        let (mut client, mut buffer) = setup(Arc::new(ScriptedRemote::default()));
        for _ in 0..4 {
            client.record(&mut buffer, answer("fc-1", 0));
        }
        assert_eq!(buffer.len(client.key()), 1);
    }

    #[test]
    fn test_timer_fires_once_per_interval() {
        let (mut client, _) = setup(Arc::new(ScriptedRemote::default()));
        let start = Instant::now();

        assert_eq!(client.poll_timer(start), None);
        let later = start + Duration::from_secs(16);
        assert_eq!(client.poll_timer(later), Some(FlushTrigger::Interval));
        assert_eq!(client.poll_timer(later), None);
        assert_eq!(client.until_next_tick(later), Duration::from_secs(15));
    }
}
