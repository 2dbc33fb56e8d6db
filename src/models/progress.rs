//! Per-user progress statistics and the reducer that folds answers onto them.
//!
//! The same [`ProgressRecord::apply`] runs for optimistic local state and in the
//! authoritative store, so a local prediction equals what the store computes for
//! the same event sequence.

use super::interval::next_review_time;
use super::ItemKind;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerResult {
    Correct,
    Incorrect,
}

impl AnswerResult {
    pub fn from_correct(correct: bool) -> Self {
        if correct {
            AnswerResult::Correct
        } else {
            AnswerResult::Incorrect
        }
    }

    pub fn is_correct(&self) -> bool {
        matches!(self, AnswerResult::Correct)
    }
}

/// A single answer waiting to be synced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Client-generated id; the store ignores ids it has already applied.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub item_id: String,
    pub item_type: ItemKind,
    pub result: AnswerResult,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// The timestamp is truncated to milliseconds, the precision it is stored
    /// and sent with.
    pub fn new(item_id: &str, item_type: ItemKind, result: AnswerResult, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item_id.to_string(),
            item_type,
            result,
            timestamp: timestamp.trunc_subsecs(3),
        }
    }

    pub fn same_item(&self, other: &ProgressEvent) -> bool {
        self.item_id == other.item_id && self.item_type == other.item_type
    }
}

/// Statistics for one (user, item, item type).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressRecord {
    pub correct_count: u32,
    pub wrong_count: u32,
    pub success_streak: u32,
    pub knowledge_score: f64,
    pub last_reviewed: DateTime<Utc>,
    pub next_review: DateTime<Utc>,
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self {
            correct_count: 0,
            wrong_count: 0,
            success_streak: 0,
            knowledge_score: 0.0,
            last_reviewed: DateTime::<Utc>::UNIX_EPOCH,
            next_review: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl ProgressRecord {
    /// Returns the record after one more answer. Does not mutate `self`.
    pub fn apply(&self, event: &ProgressEvent) -> ProgressRecord {
        let (correct_count, wrong_count, success_streak) = match event.result {
            AnswerResult::Correct => (
                self.correct_count.saturating_add(1),
                self.wrong_count,
                self.success_streak.saturating_add(1),
            ),
            AnswerResult::Incorrect => (self.correct_count, self.wrong_count.saturating_add(1), 0),
        };

        ProgressRecord {
            correct_count,
            wrong_count,
            success_streak,
            knowledge_score: knowledge_score(correct_count, wrong_count),
            last_reviewed: event.timestamp,
            next_review: next_review_time(i64::from(success_streak), event.timestamp),
        }
    }

    pub fn total_answers(&self) -> u64 {
        u64::from(self.correct_count) + u64::from(self.wrong_count)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review <= now
    }
}

/// Folds events in order onto `start`, or onto a zeroed record when absent.
pub fn fold_events<'a, I>(start: Option<&ProgressRecord>, events: I) -> ProgressRecord
where
    I: IntoIterator<Item = &'a ProgressEvent>,
{
    events
        .into_iter()
        .fold(start.cloned().unwrap_or_default(), |record, event| record.apply(event))
}

/// Percentage of correct answers, rounded to two decimals. Zero when unanswered.
pub fn knowledge_score(correct_count: u32, wrong_count: u32) -> f64 {
    let total = f64::from(correct_count) + f64::from(wrong_count);
    if total == 0.0 {
        return 0.0;
    }
    (f64::from(correct_count) / total * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn event(result: AnswerResult, minutes: i64) -> ProgressEvent {
        ProgressEvent::new("fc-1", ItemKind::Flashcard, result, at(minutes))
    }

    #[test]
    fn test_first_correct_answer() {
        let record = ProgressRecord::default().apply(&event(AnswerResult::Correct, 0));

        assert_eq!(record.correct_count, 1);
        assert_eq!(record.success_streak, 1);
        assert_eq!(record.knowledge_score, 100.0);
        assert_eq!(record.last_reviewed, at(0));
        assert_eq!(record.next_review, at(60));
    }

    #[test]
    fn test_incorrect_resets_streak() {
        let record = fold_events(
            None,
            &[
                event(AnswerResult::Correct, 0),
                event(AnswerResult::Correct, 1),
                event(AnswerResult::Incorrect, 2),
            ],
        );

        assert_eq!(record.correct_count, 2);
        assert_eq!(record.wrong_count, 1);
        assert_eq!(record.success_streak, 0);
        assert_eq!(record.knowledge_score, 66.67);
        assert_eq!(record.next_review, at(2));
    }

    #[test]
    fn test_score_of_empty_record() {
        assert_eq!(knowledge_score(0, 0), 0.0);
        assert_eq!(knowledge_score(1, 2), 33.33);
    }

    #[test]
    fn test_event_wire_format() {
        let ev = event(AnswerResult::Incorrect, 0);
        let json = serde_json::to_value(&ev).unwrap();

        assert_eq!(json["itemId"], "fc-1");
        assert_eq!(json["itemType"], "flashcard");
        assert_eq!(json["result"], "incorrect");
        assert_eq!(json["timestamp"], at(0).timestamp_millis());
    }

    #[test]
    fn test_timestamp_keeps_millisecond_precision() {
        let precise = at(0) + Duration::nanoseconds(743_889_379);
        let ev = ProgressEvent::new("fc-1", ItemKind::Flashcard, AnswerResult::Correct, precise);

        assert_eq!(ev.timestamp, at(0) + Duration::milliseconds(743));

        let reread: ProgressEvent = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        assert_eq!(reread, ev);
    }

    #[test]
    fn test_record_accepts_partial_json() {
        let record: ProgressRecord =
            serde_json::from_str(r#"{"correctCount":3,"wrongCount":1}"#).unwrap();
        assert_eq!(record.correct_count, 3);
        assert_eq!(record.next_review, DateTime::<Utc>::UNIX_EPOCH);
    }

    proptest! {
        #[test]
        fn score_is_recomputable_from_counters(results in prop::collection::vec(any::<bool>(), 0..60)) {
            let events: Vec<_> = results
                .iter()
                .enumerate()
                .map(|(i, &ok)| event(AnswerResult::from_correct(ok), i as i64))
                .collect();
            let record = fold_events(None, &events);

            prop_assert_eq!(record.total_answers(), results.len() as u64);
            let expected = knowledge_score(record.correct_count, record.wrong_count);
            prop_assert!((record.knowledge_score - expected).abs() < 0.01);
        }

        #[test]
        fn answer_count_only_grows(results in prop::collection::vec(any::<bool>(), 1..30)) {
            let mut record = ProgressRecord::default();
            for (i, ok) in results.into_iter().enumerate() {
                let next = record.apply(&event(AnswerResult::from_correct(ok), i as i64));
                prop_assert_eq!(next.total_answers(), record.total_answers() + 1);
                record = next;
            }
        }
    }
}
