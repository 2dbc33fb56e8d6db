//! Destinations for flushed progress batches.

use crate::database::db;
use crate::error::{StoreError, SyncError};
use crate::models::{ProgressEvent, ProgressRecord};
use async_trait::async_trait;
use reqwest::Client;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The authoritative progress store as seen by the sync client.
///
/// A successful push returns the authoritative record of every item in the
/// batch. Implementations must tolerate the same batch arriving twice.
#[async_trait]
pub trait ProgressRemote: Send + Sync {
    async fn push_batch(
        &self,
        events: &[ProgressEvent],
    ) -> Result<HashMap<String, ProgressRecord>, SyncError>;
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    events: &'a [ProgressEvent],
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    progress: Option<HashMap<String, Option<ProgressRecord>>>,
}

/// Posts batches as JSON to an HTTP endpoint.
pub struct HttpRemote {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(endpoint: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            auth_token,
        })
    }
}

#[async_trait]
impl ProgressRemote for HttpRemote {
    async fn push_batch(
        &self,
        events: &[ProgressEvent],
    ) -> Result<HashMap<String, ProgressRecord>, SyncError> {
        let mut request = self.client.post(&self.endpoint).json(&BatchRequest { events });
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Status(response.status().as_u16()));
        }

        let body: BatchResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Malformed(e.to_string()))?;

        Ok(body
            .progress
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(item_id, record)| record.map(|r| (item_id, r)))
            .collect())
    }
}

/// Applies batches straight to the local SQLite database for one user.
pub struct SqliteRemote {
    conn: Arc<Mutex<Connection>>,
    user_id: String,
}

impl SqliteRemote {
    pub fn new(conn: Arc<Mutex<Connection>>, user_id: &str) -> Self {
        Self {
            conn,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl ProgressRemote for SqliteRemote {
    async fn push_batch(
        &self,
        events: &[ProgressEvent],
    ) -> Result<HashMap<String, ProgressRecord>, SyncError> {
        let conn = Arc::clone(&self.conn);
        let user_id = self.user_id.clone();
        let events = events.to_vec();

        let applied = tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| StoreError::Lock(e.to_string()))?;
            db::apply_progress_batch(&user_id, &events, &mut conn)
        })
        .await
        .map_err(|e| SyncError::Store(e.to_string()))??;

        Ok(applied)
    }
}
