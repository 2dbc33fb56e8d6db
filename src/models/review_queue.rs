//! In-session retry queue shared by both study modes.
//!
//! The queue holds indices into a fixed item set. A correct answer removes the
//! item for the rest of the session, an incorrect one moves it to the back so it
//! is retried later. How an answer is judged is supplied by an [`Evaluate`]
//! implementation: self-reporting for flashcards, option comparison for
//! multiple choice.

use super::{AnswerResult, StudyItem};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Judges a response to an item.
pub trait Evaluate {
    type Response: ?Sized;

    fn evaluate(&self, item: &StudyItem, response: &Self::Response) -> AnswerResult;

    /// Options to display for a fresh presentation of `item`.
    fn present<R: Rng + ?Sized>(&self, _item: &StudyItem, _rng: &mut R) -> Vec<String> {
        Vec::new()
    }
}

/// Flashcards: the learner reveals the answer and reports the result.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfReport;

impl Evaluate for SelfReport {
    type Response = AnswerResult;

    fn evaluate(&self, _item: &StudyItem, response: &AnswerResult) -> AnswerResult {
        *response
    }
}

/// Multiple choice: the selected option is compared with the canonical answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct OptionMatch;

impl Evaluate for OptionMatch {
    type Response = str;

    fn evaluate(&self, item: &StudyItem, selected: &str) -> AnswerResult {
        AnswerResult::from_correct(selected == item.answer)
    }

    fn present<R: Rng + ?Sized>(&self, item: &StudyItem, rng: &mut R) -> Vec<String> {
        let mut options = item.options.clone();
        options.shuffle(rng);
        options
    }
}

/// Identifies one showing of an item. Answers quoting an old presentation are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentationId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueStatus {
    /// The session started without any items.
    NoItems,
    InProgress,
    /// Every item was answered correctly.
    Complete,
}

/// What [`ReviewQueue::advance`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Removed,
    Requeued,
    Skipped,
    Idle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionTally {
    pub correct: usize,
    pub incorrect: usize,
}

impl SessionTally {
    pub fn answered(&self) -> usize {
        self.correct + self.incorrect
    }

    /// "answered / total", capped at the total.
    pub fn progress_text(&self, total: usize) -> String {
        format!("{} / {}", self.answered().min(total), total)
    }

    pub fn progress_fraction(&self, total: usize) -> f32 {
        if total == 0 {
            0.0
        } else {
            (self.answered() as f32 / total as f32).min(1.0)
        }
    }
}

pub struct ReviewQueue<E: Evaluate> {
    items: Vec<StudyItem>,
    order: Vec<usize>,
    cursor: usize,
    presentation: u64,
    outcome: Option<AnswerResult>,
    shown_options: Vec<String>,
    tally: SessionTally,
    evaluator: E,
    rng: StdRng,
}

pub type FlashcardQueue = ReviewQueue<SelfReport>;
pub type ChoiceQueue = ReviewQueue<OptionMatch>;

impl<E: Evaluate> ReviewQueue<E> {
    pub fn new(items: Vec<StudyItem>, evaluator: E) -> Self {
        Self::with_rng(items, evaluator, StdRng::from_entropy())
    }

    pub fn with_seed(items: Vec<StudyItem>, evaluator: E, seed: u64) -> Self {
        Self::with_rng(items, evaluator, StdRng::seed_from_u64(seed))
    }

    fn with_rng(items: Vec<StudyItem>, evaluator: E, rng: StdRng) -> Self {
        let order = (0..items.len()).collect();
        let mut queue = Self {
            items,
            order,
            cursor: 0,
            presentation: 0,
            outcome: None,
            shown_options: Vec::new(),
            tally: SessionTally::default(),
            evaluator,
            rng,
        };
        queue.begin_presentation();
        queue
    }

    fn begin_presentation(&mut self) {
        self.presentation += 1;
        self.outcome = None;
        self.shown_options = match self.order.get(self.cursor).and_then(|&i| self.items.get(i)) {
            Some(item) => self.evaluator.present(item, &mut self.rng),
            None => Vec::new(),
        };
    }

    pub fn current(&self) -> Option<&StudyItem> {
        self.order
            .get(self.cursor)
            .and_then(|&idx| self.items.get(idx))
    }

    pub fn presentation(&self) -> Option<PresentationId> {
        if self.order.is_empty() {
            None
        } else {
            Some(PresentationId(self.presentation))
        }
    }

    /// Options in the order they are displayed for the current presentation.
    pub fn options(&self) -> &[String] {
        &self.shown_options
    }

    pub fn outcome(&self) -> Option<AnswerResult> {
        self.outcome
    }

    pub fn tally(&self) -> SessionTally {
        self.tally
    }

    pub fn remaining(&self) -> usize {
        self.order.len()
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[StudyItem] {
        &self.items
    }

    /// Queue positions as indices into [`ReviewQueue::items`].
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn status(&self) -> QueueStatus {
        if self.items.is_empty() {
            QueueStatus::NoItems
        } else if self.order.is_empty() {
            QueueStatus::Complete
        } else {
            QueueStatus::InProgress
        }
    }

    pub fn is_finished(&self) -> bool {
        self.order.is_empty()
    }

    /// Records the result for presentation `at`. Returns `None` (and changes
    /// nothing) when `at` is stale or the presentation already has a result.
    pub fn answer(&mut self, at: PresentationId, response: &E::Response) -> Option<AnswerResult> {
        if at.0 != self.presentation || self.outcome.is_some() {
            return None;
        }
        let result = self.evaluator.evaluate(self.current()?, response);
        self.outcome = Some(result);
        let tally = self.tally;
        self.tally = match result {
            AnswerResult::Correct => SessionTally {
                correct: tally.correct + 1,
                ..tally
            },
            AnswerResult::Incorrect => SessionTally {
                incorrect: tally.incorrect + 1,
                ..tally
            },
        };
        Some(result)
    }

    /// Moves to the next presentation, applying the recorded result: a correct
    /// item leaves the queue, an incorrect one goes to the back. Without a
    /// result the cursor just rotates forward.
    pub fn advance(&mut self) -> Step {
        if self.order.is_empty() {
            return Step::Idle;
        }

        let (order, cursor, step) = match self.outcome {
            None => (
                None,
                (self.cursor + 1) % self.order.len(),
                Step::Skipped,
            ),
            Some(result) => {
                let mut order = self.order.clone();
                let idx = order.remove(self.cursor);
                let step = if result.is_correct() {
                    Step::Removed
                } else {
                    order.push(idx);
                    Step::Requeued
                };
                let cursor = self.cursor.min(order.len().saturating_sub(1));
                (Some(order), cursor, step)
            }
        };

        if let Some(order) = order {
            self.order = order;
        }
        self.cursor = cursor;
        self.begin_presentation();
        step
    }
}

impl FlashcardQueue {
    pub fn flashcards(items: Vec<StudyItem>) -> Self {
        Self::new(items, SelfReport)
    }

    /// Self-reported result for the shown card. The card leaves the queue
    /// (correct) or moves to its back (incorrect) right away.
    pub fn mark(&mut self, at: PresentationId, result: AnswerResult) -> Option<AnswerResult> {
        let result = self.answer(at, &result)?;
        self.advance();
        Some(result)
    }

    /// Shows the next card without marking the current one.
    pub fn next(&mut self) -> Step {
        if self.outcome.is_some() {
            return Step::Idle;
        }
        self.advance()
    }
}

impl ChoiceQueue {
    pub fn multiple_choice(items: Vec<StudyItem>) -> Self {
        Self::new(items, OptionMatch)
    }

    /// Locks in the selected option for the current question.
    pub fn submit(&mut self, selected: &str) -> Option<AnswerResult> {
        let at = self.presentation()?;
        self.answer(at, selected)
    }
}
