pub mod board;
pub mod buffer;
pub mod client;
pub mod remote;

pub use board::ProgressBoard;
pub use buffer::{BufferKey, DEFAULT_DEBOUNCE_MS, EventBuffer, FlightId};
pub use client::{
    FlushJob, FlushOutcome, FlushReport, FlushTrigger, SyncClient, SyncSettings, SyncState,
    TriggerWatch,
};
pub use remote::{HttpRemote, ProgressRemote, SqliteRemote};
