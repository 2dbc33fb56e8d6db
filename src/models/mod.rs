pub mod deck;
pub mod due;
pub mod interval;
pub mod progress;
pub mod review_queue;
pub mod study_item;

pub use deck::Deck;
pub use due::{DueSelection, LevelFilter, SessionFilter, SortMode, select_session};
pub use interval::next_review_time;
pub use progress::{AnswerResult, ProgressEvent, ProgressRecord, fold_events, knowledge_score};
pub use review_queue::{
    ChoiceQueue, Evaluate, FlashcardQueue, OptionMatch, PresentationId, QueueStatus, ReviewQueue,
    SelfReport, SessionTally, Step,
};
pub use study_item::{CefrLevel, ItemKind, StudyItem};
