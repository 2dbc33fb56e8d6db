//! Main application UI and state management.
//! Hosts review sessions, forwards answers to the sync client, and drives
//! flushes from the timer, window focus, and session lifecycle.

use crate::database::{SqliteStore, db};
use crate::export::json::{export_json_to_path, import_json};
use crate::models::due::DueSelection;
use crate::models::{
    AnswerResult, CefrLevel, ChoiceQueue, Deck, FlashcardQueue, ItemKind, LevelFilter,
    ProgressEvent, SessionFilter, SortMode, StudyItem, select_session,
};
use crate::sync::{
    BufferKey, EventBuffer, FlushOutcome, FlushReport, FlushTrigger, ProgressBoard, ProgressRemote,
    SyncClient, SyncSettings, SyncState, TriggerWatch,
};
use chrono::Utc;
use eframe::egui;
use rusqlite::Connection;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::runtime::Handle;

/// Application screen states
#[derive(Default)]
enum AppScreen {
    #[default]
    Main,
    Session,
}

enum SessionQueue {
    Flashcards(FlashcardQueue),
    Choice(ChoiceQueue),
}

impl SessionQueue {
    fn current(&self) -> Option<&StudyItem> {
        match self {
            SessionQueue::Flashcards(q) => q.current(),
            SessionQueue::Choice(q) => q.current(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            SessionQueue::Flashcards(q) => q.is_finished(),
            SessionQueue::Choice(q) => q.is_finished(),
        }
    }

    fn progress(&self) -> (f32, String, usize) {
        let (tally, total, remaining) = match self {
            SessionQueue::Flashcards(q) => (q.tally(), q.total(), q.remaining()),
            SessionQueue::Choice(q) => (q.tally(), q.total(), q.remaining()),
        };
        (tally.progress_fraction(total), tally.progress_text(total), remaining)
    }
}

/// One running review session and its sync state.
struct ActiveSession {
    kind: ItemKind,
    client: SyncClient,
    board: ProgressBoard,
    selection: DueSelection,
    queue: SessionQueue,
    revealed: bool,
    watch: TriggerWatch,
}

/// What the user clicked during a frame, applied once the UI closures are done.
enum SessionAction {
    Reveal,
    Mark(AnswerResult),
    Choose(String),
    Next,
    Back,
}

pub struct StudyApp {
    conn: Arc<Mutex<Connection>>,
    runtime: Handle,
    remote: Arc<dyn ProgressRemote>,
    user_id: Option<String>,
    settings: SyncSettings,
    buffer: EventBuffer<SqliteStore>,
    reports_tx: Sender<FlushReport>,
    reports_rx: Receiver<FlushReport>,

    current_screen: AppScreen,
    mode: ItemKind,
    filter: SessionFilter,
    session: Option<ActiveSession>,

    show_message_dialog: bool,
    message: String,
}

impl eframe::App for StudyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.collect_reports();
        self.drive_triggers(ctx);

        match self.current_screen {
            AppScreen::Main => self.render_main_screen(ctx),
            AppScreen::Session => self.render_session_screen(ctx),
        }

        if ctx.input(|i| i.viewport().close_requested()) {
            self.flush_before_close();
        }

        if self.show_message_dialog {
            egui::Window::new("Study")
                .collapsible(false)
                .resizable(false)
                .show(ctx, |ui| {
                    ui.label(&self.message);
                    ui.add_space(10.0);
                    if ui.button("OK").clicked() {
                        self.show_message_dialog = false;
                    }
                });
        }
    }
}

impl StudyApp {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        runtime: Handle,
        remote: Arc<dyn ProgressRemote>,
        user_id: Option<String>,
        settings: SyncSettings,
        debounce_ms: i64,
    ) -> Self {
        let (reports_tx, reports_rx) = channel();
        let buffer = EventBuffer::with_debounce(SqliteStore::new(Arc::clone(&conn)), debounce_ms);
        Self {
            conn,
            runtime,
            remote,
            user_id,
            settings,
            buffer,
            reports_tx,
            reports_rx,
            current_screen: AppScreen::Main,
            mode: ItemKind::Flashcard,
            filter: SessionFilter::default(),
            session: None,
            show_message_dialog: false,
            message: String::new(),
        }
    }

    fn show_message(&mut self, message: String) {
        self.message = message;
        self.show_message_dialog = true;
    }

    /// Applies finished flushes. Reports for a session that has since ended
    /// still settle the buffer.
    fn collect_reports(&mut self) {
        while let Ok(report) = self.reports_rx.try_recv() {
            match &mut self.session {
                Some(session) if session.client.key() == &report.key => {
                    let key = report.key.clone();
                    if let FlushOutcome::Synced(records) =
                        session.client.finish(&mut self.buffer, report)
                    {
                        session.board.reconcile(records, self.buffer.events(&key));
                    }
                }
                _ => {
                    report.settle(&mut self.buffer);
                }
            }
        }
    }

    fn drive_triggers(&mut self, ctx: &egui::Context) {
        let (focused, minimized) =
            ctx.input(|i| (i.focused, i.viewport().minimized.unwrap_or(false)));
        let now = Instant::now();

        let Some(session) = &mut self.session else {
            return;
        };
        let triggers = session.watch.observe(
            &mut session.client,
            focused,
            minimized,
            session.queue.is_finished(),
            now,
        );
        ctx.request_repaint_after(session.client.until_next_tick(now));

        for trigger in triggers {
            self.spawn_flush(ctx, trigger);
        }
    }

    /// Starts a background flush for the active session.
    fn spawn_flush(&mut self, ctx: &egui::Context, trigger: FlushTrigger) {
        let Some(session) = &mut self.session else {
            return;
        };
        if let Some(job) = session.client.begin(&mut self.buffer, trigger) {
            let tx = self.reports_tx.clone();
            let ctx = ctx.clone();
            self.runtime.spawn(async move {
                let report = job.run().await;
                if tx.send(report).is_ok() {
                    ctx.request_repaint();
                }
            });
        }
    }

    fn flush_before_close(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        if let Some(job) = session.client.begin(&mut self.buffer, FlushTrigger::Hidden) {
            let report = self.runtime.block_on(job.run());
            session.client.finish(&mut self.buffer, report);
        }
    }

    fn start_session(&mut self, ctx: &egui::Context) {
        self.end_session(ctx);

        let key = BufferKey::new(self.user_id.as_deref(), &self.filter.scope(self.mode));
        let restored = self.buffer.load(&key);

        let conn = Arc::clone(&self.conn);
        let rows = match conn.lock() {
            Ok(conn) => db::get_items_with_progress(&key.user_id, self.mode, &conn),
            Err(e) => {
                self.show_message(format!("Database unavailable: {}", e));
                return;
            }
        };
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to load study items");
                self.show_message(format!("Could not load items: {}", e));
                return;
            }
        };

        let mut board = ProgressBoard::seed(
            rows.iter()
                .filter_map(|(item, record)| record.clone().map(|r| (item.id.clone(), r))),
        );
        board.apply_buffered(self.buffer.events(&key));

        let items: Vec<StudyItem> = rows.into_iter().map(|(item, _)| item).collect();
        let selection = select_session(
            &board.candidates(&items),
            &self.filter,
            Utc::now(),
            &mut rand::thread_rng(),
        );

        tracing::info!(
            %key,
            items = selection.items.len(),
            due = selection.due_count,
            restored,
            "session started"
        );

        let queue = match self.mode {
            ItemKind::Flashcard => {
                SessionQueue::Flashcards(FlashcardQueue::flashcards(selection.items.clone()))
            }
            ItemKind::MultipleChoice => {
                SessionQueue::Choice(ChoiceQueue::multiple_choice(selection.items.clone()))
            }
        };
        let client = SyncClient::new(key, Arc::clone(&self.remote), self.settings);

        self.session = Some(ActiveSession {
            kind: self.mode,
            client,
            board,
            selection,
            queue,
            revealed: false,
            watch: TriggerWatch::default(),
        });
        self.current_screen = AppScreen::Session;

        if restored > 0 {
            self.spawn_flush(ctx, FlushTrigger::Manual);
        }
    }

    /// Leaves the session; its unsynced answers are flushed in the background.
    fn end_session(&mut self, ctx: &egui::Context) {
        self.spawn_flush(ctx, FlushTrigger::Hidden);
        self.session = None;
        self.current_screen = AppScreen::Main;
    }

    fn record_answer(&mut self, ctx: &egui::Context, item_id: &str, result: AnswerResult) {
        let Some(session) = &mut self.session else {
            return;
        };
        let event = ProgressEvent::new(item_id, session.kind, result, Utc::now());
        let event_id = event.id;
        let trigger = session.client.record(&mut self.buffer, event.clone());
        let kept = self
            .buffer
            .events(session.client.key())
            .last()
            .is_some_and(|e| e.id == event_id);
        if kept {
            session.board.record(&event);
        }
        if let Some(trigger) = trigger {
            self.spawn_flush(ctx, trigger);
        }
    }

    fn apply_session_action(&mut self, ctx: &egui::Context, action: SessionAction) {
        if matches!(action, SessionAction::Back) {
            self.end_session(ctx);
            return;
        }
        let Some(session) = &mut self.session else {
            return;
        };
        let mut answered: Option<(String, AnswerResult)> = None;

        match (action, &mut session.queue) {
            (SessionAction::Reveal, _) => session.revealed = true,
            (SessionAction::Mark(result), SessionQueue::Flashcards(queue)) => {
                let item_id = queue.current().map(|item| item.id.clone());
                if let (Some(at), Some(item_id)) = (queue.presentation(), item_id) {
                    if let Some(result) = queue.mark(at, result) {
                        answered = Some((item_id, result));
                        session.revealed = false;
                    }
                }
            }
            (SessionAction::Choose(option), SessionQueue::Choice(queue)) => {
                let item_id = queue.current().map(|item| item.id.clone());
                if let (Some(result), Some(item_id)) = (queue.submit(&option), item_id) {
                    answered = Some((item_id, result));
                }
            }
            (SessionAction::Next, SessionQueue::Flashcards(queue)) => {
                queue.next();
                session.revealed = false;
            }
            (SessionAction::Next, SessionQueue::Choice(queue)) => {
                queue.advance();
            }
            _ => {}
        }

        if let Some((item_id, result)) = answered {
            self.record_answer(ctx, &item_id, result);
        }
    }

    /// Renders filters, deck import/export and the session launcher
    fn render_main_screen(&mut self, ctx: &egui::Context) {
        let mut start = false;
        let mut import = false;
        let mut export = false;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Review session");
            ui.separator();

            ui.horizontal(|ui| {
                ui.label("Mode:");
                ui.radio_value(&mut self.mode, ItemKind::Flashcard, ItemKind::Flashcard.label());
                ui.radio_value(
                    &mut self.mode,
                    ItemKind::MultipleChoice,
                    ItemKind::MultipleChoice.label(),
                );
            });

            ui.horizontal(|ui| {
                egui::ComboBox::from_label("Level")
                    .selected_text(self.filter.level.to_string())
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut self.filter.level, LevelFilter::All, "all");
                        for level in CefrLevel::ALL {
                            ui.selectable_value(
                                &mut self.filter.level,
                                LevelFilter::Only(level),
                                level.as_str(),
                            );
                        }
                    });

                egui::ComboBox::from_label("Sort")
                    .selected_text(self.filter.sort.as_str())
                    .show_ui(ui, |ui| {
                        for sort in SortMode::ALL {
                            ui.selectable_value(&mut self.filter.sort, sort, sort.as_str());
                        }
                    });
            });

            ui.horizontal(|ui| {
                ui.label("Topic:");
                ui.text_edit_singleline(&mut self.filter.topic);
            });

            ui.add_space(10.0);
            if ui.button("Start session").clicked() {
                start = true;
            }

            ui.separator();
            ui.horizontal(|ui| {
                if ui.button("Export Deck").clicked() {
                    export = true;
                }
                if ui.button("Import Deck").clicked() {
                    import = true;
                }
            });
        });

        if start {
            self.start_session(ctx);
        }
        if export {
            self.handle_export();
        }
        if import {
            self.handle_import();
        }
    }

    fn render_session_screen(&mut self, ctx: &egui::Context) {
        let Some(session) = &self.session else {
            self.current_screen = AppScreen::Main;
            return;
        };
        let mut action: Option<SessionAction> = None;

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading(format!("{} - {}", session.kind.label(), session.client.key().scope));
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let color = match session.client.state() {
                        SyncState::Synced => egui::Color32::DARK_GREEN,
                        SyncState::Syncing => egui::Color32::GRAY,
                        SyncState::Retrying => egui::Color32::from_rgb(200, 120, 0),
                    };
                    ui.label(egui::RichText::new(session.client.state().label()).color(color));
                });
            });

            let (fraction, text, remaining) = session.queue.progress();
            ui.add(egui::ProgressBar::new(fraction).text(text));
            ui.label(format!(
                "{} due of {}, {} left",
                session.selection.due_count,
                session.selection.items.len(),
                remaining
            ));
            ui.add_space(20.0);

            let Some(item) = session.queue.current() else {
                ui.vertical_centered(|ui| {
                    if session.selection.items.is_empty() {
                        ui.heading("Nothing to review");
                        ui.label("No items match the current filters.");
                    } else {
                        ui.heading("Session complete!");
                    }
                    ui.add_space(20.0);
                    if ui.button("Back to Main Screen").clicked() {
                        action = Some(SessionAction::Back);
                    }
                });
                return;
            };

            ui.group(|ui| {
                ui.set_min_height(200.0);
                ui.vertical_centered(|ui| {
                    if session.selection.is_due(&item.id) {
                        ui.label(egui::RichText::new("Due").color(egui::Color32::from_rgb(200, 60, 60)));
                    }
                    if let Some(record) = session.board.effective(&item.id) {
                        ui.small(format!("score {:.2}, streak {}", record.knowledge_score, record.success_streak));
                    }
                    ui.add_space(10.0);
                    ui.heading(&item.prompt);
                    ui.add_space(20.0);

                    match &session.queue {
                        SessionQueue::Flashcards(_) => {
                            if session.revealed {
                                ui.label(&item.answer);
                            } else {
                                ui.label("(Click 'Show Answer' to reveal)");
                            }
                        }
                        SessionQueue::Choice(queue) => {
                            let outcome = queue.outcome();
                            for option in queue.options() {
                                let enabled = outcome.is_none();
                                if ui
                                    .add_enabled(enabled, egui::Button::new(option))
                                    .clicked()
                                {
                                    action = Some(SessionAction::Choose(option.clone()));
                                }
                            }
                            match outcome {
                                Some(AnswerResult::Correct) => {
                                    ui.label(egui::RichText::new("Correct!").color(egui::Color32::DARK_GREEN));
                                }
                                Some(AnswerResult::Incorrect) => {
                                    ui.label(format!("Incorrect. Answer: {}", item.answer));
                                }
                                None => {}
                            }
                        }
                    }
                });
            });

            ui.add_space(20.0);
            ui.horizontal(|ui| match &session.queue {
                SessionQueue::Flashcards(_) => {
                    if !session.revealed {
                        if ui.button("Show Answer").clicked() {
                            action = Some(SessionAction::Reveal);
                        }
                    } else {
                        if ui.button("I knew it").clicked() {
                            action = Some(SessionAction::Mark(AnswerResult::Correct));
                        }
                        if ui.button("I didn't").clicked() {
                            action = Some(SessionAction::Mark(AnswerResult::Incorrect));
                        }
                    }
                    if ui.button("Next").clicked() {
                        action = Some(SessionAction::Next);
                    }
                }
                SessionQueue::Choice(queue) => {
                    if ui
                        .add_enabled(queue.outcome().is_some(), egui::Button::new("Next"))
                        .clicked()
                    {
                        action = Some(SessionAction::Next);
                    }
                }
            });

            ui.add_space(20.0);
            if ui.button("Back to Main Screen").clicked() {
                action = Some(SessionAction::Back);
            }
        });

        if let Some(action) = action {
            self.apply_session_action(ctx, action);
        }
    }

    /// Exports every item of the selected mode matching the topic filter
    fn handle_export(&mut self) {
        let conn = Arc::clone(&self.conn);
        let items = match conn.lock() {
            Ok(conn) => db::get_items(self.mode, &conn),
            Err(e) => {
                self.show_message(format!("Database unavailable: {}", e));
                return;
            }
        };
        let items = match items {
            Ok(items) => items,
            Err(e) => {
                self.show_message(format!("Export failed: {}", e));
                return;
            }
        };

        let topic = self.filter.topic.trim();
        let deck = Deck {
            mode: self.mode,
            theme: if topic.is_empty() { "All items".to_string() } else { topic.to_string() },
            items: items.into_iter().filter(|item| self.filter.matches(item)).collect(),
        };

        if let Some(path) = rfd::FileDialog::new()
            .set_file_name(format!("{}.json", deck.theme))
            .add_filter("JSON files", &["json"])
            .save_file()
        {
            match export_json_to_path(&deck, &path) {
                Ok(()) => self.show_message(format!(
                    "Deck '{}' exported with {} items!",
                    deck.theme,
                    deck.items.len()
                )),
                Err(e) => self.show_message(format!("Export failed: {}", e)),
            }
        }
    }

    /// Imports a deck file; items whose id already exists are skipped
    fn handle_import(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("JSON files", &["json"])
            .pick_file()
        else {
            return;
        };

        let deck = match import_json(&path) {
            Ok(deck) => deck,
            Err(e) => {
                self.show_message(format!("Import failed: {}", e));
                return;
            }
        };

        let conn = Arc::clone(&self.conn);
        let inserted = match conn.lock() {
            Ok(conn) => deck
                .matching_items()
                .map(|item| db::add_item(item, &conn))
                .collect::<Result<Vec<bool>, _>>(),
            Err(e) => {
                self.show_message(format!("Database unavailable: {}", e));
                return;
            }
        };

        match inserted {
            Ok(flags) => {
                let added = flags.iter().filter(|&&added| added).count();
                self.show_message(format!(
                    "Deck '{}' imported: {} new of {} items.",
                    deck.theme,
                    added,
                    flags.len()
                ));
            }
            Err(e) => self.show_message(format!("Import failed: {}", e)),
        }
    }
}
