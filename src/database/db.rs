//! Database operations for the study app
//!
//! Handles SQLite initialization, study item CRUD, per-user progress records and
//! the idempotent batch application of progress events. The batch path is the
//! authoritative side of progress sync when no remote endpoint is configured.

use crate::error::{StoreError, StoreResult};
use crate::models::{CefrLevel, ItemKind, ProgressEvent, ProgressRecord, StudyItem};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use std::collections::HashMap;
use std::path::Path;

/// Opens (or creates) the database file and makes sure all tables exist.
pub fn init_database<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates tables for items, per-user progress, applied event ids and the
/// key/value app state used as local durable storage.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            prompt TEXT NOT NULL,
            answer TEXT NOT NULL,
            options TEXT NOT NULL DEFAULT '[]',
            theme TEXT NOT NULL,
            level TEXT,
            topic TEXT,
            created_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS user_progress (
            user_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            item_type TEXT NOT NULL,
            correct_count INTEGER NOT NULL DEFAULT 0,
            wrong_count INTEGER NOT NULL DEFAULT 0,
            success_streak INTEGER NOT NULL DEFAULT 0,
            knowledge_score REAL NOT NULL DEFAULT 0,
            last_reviewed INTEGER NOT NULL,
            next_review INTEGER NOT NULL,
            PRIMARY KEY (user_id, item_id, item_type)
        );

        CREATE TABLE IF NOT EXISTS applied_events (
            event_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

/// Reads an item from a row laid out as the `items` table columns.
fn item_from_row(row: &Row<'_>) -> Result<StudyItem> {
    let kind: String = row.get(1)?;
    let options: String = row.get(4)?;
    let level: Option<String> = row.get(6)?;
    let created_at: Option<i64> = row.get(8)?;

    Ok(StudyItem {
        id: row.get(0)?,
        kind: kind
            .parse()
            .map_err(|e: String| conversion_error(1, std::io::Error::other(e)))?,
        prompt: row.get(2)?,
        answer: row.get(3)?,
        options: serde_json::from_str(&options).map_err(|e| conversion_error(4, e))?,
        theme: row.get(5)?,
        level: level
            .map(|l| l.parse::<CefrLevel>())
            .transpose()
            .map_err(|e| conversion_error(6, e))?,
        topic: row.get(7)?,
        created_at: created_at.map(from_millis),
    })
}

/// Reads a record from a row starting at `offset` with the progress columns
/// (correct, wrong, streak, score, last_reviewed, next_review).
fn record_from_row(row: &Row<'_>, offset: usize) -> Result<ProgressRecord> {
    Ok(ProgressRecord {
        correct_count: row.get(offset)?,
        wrong_count: row.get(offset + 1)?,
        success_streak: row.get(offset + 2)?,
        knowledge_score: row.get(offset + 3)?,
        last_reviewed: from_millis(row.get(offset + 4)?),
        next_review: from_millis(row.get(offset + 5)?),
    })
}

/// Adds a study item. Items are immutable: re-adding an existing id is ignored.
///
/// Returns true when the item was inserted.
pub fn add_item(item: &StudyItem, conn: &Connection) -> StoreResult<bool> {
    let options = serde_json::to_string(&item.options)?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO items (id, kind, prompt, answer, options, theme, level, topic, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            item.id,
            item.kind.as_str(),
            item.prompt,
            item.answer,
            options,
            item.theme,
            item.level.map(|l| l.as_str()),
            item.topic,
            item.created_at.map(to_millis),
        ],
    )?;
    Ok(inserted == 1)
}

pub fn count_items(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
}

/// Retrieves all items of a kind, oldest first.
pub fn get_items(kind: ItemKind, conn: &Connection) -> Result<Vec<StudyItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, prompt, answer, options, theme, level, topic, created_at
         FROM items WHERE kind = ?1
         ORDER BY created_at ASC, id ASC",
    )?;

    let items = stmt
        .query_map(params![kind.as_str()], item_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(items)
}

/// Retrieves all items of a kind together with the user's progress on each.
///
/// Items the user never answered come back with `None`.
pub fn get_items_with_progress(
    user_id: &str,
    kind: ItemKind,
    conn: &Connection,
) -> Result<Vec<(StudyItem, Option<ProgressRecord>)>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.kind, i.prompt, i.answer, i.options, i.theme, i.level, i.topic, i.created_at,
                p.correct_count, p.wrong_count, p.success_streak, p.knowledge_score,
                p.last_reviewed, p.next_review
         FROM items i
         LEFT JOIN user_progress p
           ON p.item_id = i.id AND p.item_type = i.kind AND p.user_id = ?1
         WHERE i.kind = ?2
         ORDER BY i.created_at ASC, i.id ASC",
    )?;

    let rows = stmt
        .query_map(params![user_id, kind.as_str()], |row| {
            let item = item_from_row(row)?;
            let has_progress = row.get::<_, Option<u32>>(9)?.is_some();
            let progress = if has_progress {
                Some(record_from_row(row, 9)?)
            } else {
                None
            };
            Ok((item, progress))
        })?
        .collect::<Result<Vec<_>>>()?;

    Ok(rows)
}

pub fn get_progress(
    user_id: &str,
    item_id: &str,
    kind: ItemKind,
    conn: &Connection,
) -> Result<Option<ProgressRecord>> {
    conn.query_row(
        "SELECT correct_count, wrong_count, success_streak, knowledge_score, last_reviewed, next_review
         FROM user_progress WHERE user_id = ?1 AND item_id = ?2 AND item_type = ?3",
        params![user_id, item_id, kind.as_str()],
        |row| record_from_row(row, 0),
    )
    .optional()
}

fn upsert_progress(
    user_id: &str,
    item_id: &str,
    kind: ItemKind,
    record: &ProgressRecord,
    conn: &Connection,
) -> Result<()> {
    conn.execute(
        "INSERT INTO user_progress
            (user_id, item_id, item_type, correct_count, wrong_count, success_streak,
             knowledge_score, last_reviewed, next_review)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (user_id, item_id, item_type) DO UPDATE SET
            correct_count = excluded.correct_count,
            wrong_count = excluded.wrong_count,
            success_streak = excluded.success_streak,
            knowledge_score = excluded.knowledge_score,
            last_reviewed = excluded.last_reviewed,
            next_review = excluded.next_review",
        params![
            user_id,
            item_id,
            kind.as_str(),
            record.correct_count,
            record.wrong_count,
            record.success_streak,
            record.knowledge_score,
            to_millis(record.last_reviewed),
            to_millis(record.next_review),
        ],
    )?;
    Ok(())
}

/// Applies a batch of progress events for a user in one transaction and returns
/// the resulting record of every item the batch touched.
///
/// Event ids already applied are skipped, so a batch retried after a lost
/// response does not count answers twice.
pub fn apply_progress_batch(
    user_id: &str,
    events: &[ProgressEvent],
    conn: &mut Connection,
) -> StoreResult<HashMap<String, ProgressRecord>> {
    let tx = conn.transaction()?;
    let mut touched: HashMap<String, ProgressRecord> = HashMap::new();

    for event in events {
        let fresh = tx.execute(
            "INSERT OR IGNORE INTO applied_events (event_id, user_id) VALUES (?1, ?2)",
            params![event.id.to_string(), user_id],
        )? == 1;

        let current = match touched.get(&event.item_id) {
            Some(record) => Some(record.clone()),
            None => get_progress(user_id, &event.item_id, event.item_type, &tx)?,
        };

        let record = if fresh {
            let next = current.unwrap_or_default().apply(event);
            upsert_progress(user_id, &event.item_id, event.item_type, &next, &tx)?;
            next
        } else {
            match current {
                Some(record) => record,
                None => continue,
            }
        };
        touched.insert(event.item_id.clone(), record);
    }

    tx.commit().map_err(StoreError::from)?;
    Ok(touched)
}
