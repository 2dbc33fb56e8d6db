mod app;
use study_app::*;

use app::StudyApp;
use chrono::{Duration, Utc};
use database::db::{add_item, count_items, init_database};
use models::CefrLevel;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use sync::{HttpRemote, ProgressRemote, SqliteRemote};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Sample items for a fresh database.
fn seed_sample_items(conn: &Connection) -> Result<(), StoreError> {
    let now = Utc::now();
    let items = [
        StudyItem::flashcard("fc-hola", "hola", "hello", "Greetings").with_level(CefrLevel::A1),
        StudyItem::flashcard("fc-gracias", "gracias", "thank you", "Greetings").with_level(CefrLevel::A1),
        StudyItem::flashcard("fc-perro", "el perro", "the dog", "Animals").with_level(CefrLevel::A1),
        StudyItem::flashcard("fc-aunque", "aunque", "although", "Connectors").with_level(CefrLevel::B1),
        StudyItem::multiple_choice(
            "mc-gato",
            "Translate: cat",
            "el gato",
            &["el gato", "el perro", "la vaca", "el pájaro"],
            "Animals",
        )
        .with_level(CefrLevel::A1),
        StudyItem::multiple_choice(
            "mc-pero",
            "Pick the connector meaning 'but'",
            "pero",
            &["pero", "porque", "aunque"],
            "Connectors",
        )
        .with_level(CefrLevel::A2),
    ];

    for (offset, item) in items.into_iter().enumerate() {
        add_item(&item.created(now + Duration::seconds(offset as i64)), conn)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("study_app=info,study=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;
    let conn = init_database(&config.database.path)?;

    if count_items(&conn)? == 0 {
        seed_sample_items(&conn)?;
        tracing::info!("sample items created");
    }
    tracing::info!(path = %config.database.path, items = count_items(&conn)?, "database ready");

    let conn = Arc::new(Mutex::new(conn));
    let user_id = config.user_id.clone();

    let remote: Arc<dyn ProgressRemote> = match &config.sync.endpoint {
        Some(endpoint) => {
            tracing::info!(%endpoint, "syncing progress over HTTP");
            Arc::new(HttpRemote::new(
                endpoint,
                config.sync.auth_token.clone(),
                config.request_timeout(),
            )?)
        }
        None => Arc::new(SqliteRemote::new(
            Arc::clone(&conn),
            user_id.as_deref().unwrap_or("anon"),
        )),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let handle = runtime.handle().clone();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([520.0, 700.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Study Session",
        options,
        Box::new(move |_cc| {
            Ok(Box::new(StudyApp::new(
                conn,
                handle,
                remote,
                user_id,
                config.sync_settings(),
                config.sync.debounce_ms,
            )))
        }),
    )?;

    drop(runtime);
    Ok(())
}
