pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod models;
pub mod sync;

pub use config::AppConfig;
pub use error::{ExportError, ItemError, StoreError, SyncError};
pub use models::{
    AnswerResult, ChoiceQueue, Deck, FlashcardQueue, ProgressEvent, ProgressRecord, SessionFilter,
    StudyItem,
};
pub use sync::{EventBuffer, ProgressBoard, SyncClient};
