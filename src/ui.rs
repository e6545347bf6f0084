use std::collections::{HashMap, HashSet};
use std::io::{self, Stdout};
use std::ops::Range;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::wrap;
use unicode_width::UnicodeWidthStr;

use crate::catalog::{Catalog, CatalogError};
use crate::data::CatalogService;
use crate::pages;
use crate::reader::{ChapterCursor, RevealWindow, SentinelObserver};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Terminal rows occupied by one page placeholder in the reader strip.
const PAGE_ROW_HEIGHT: usize = 3;

/// The three screens of the application. Navigation always carries the ids
/// needed to re-derive the screen's content from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Library,
    Chapters {
        manga_id: String,
    },
    Reader {
        manga_id: String,
        chapter_id: String,
    },
}

impl Route {
    fn title(&self) -> &'static str {
        match self {
            Route::Library => "Library",
            Route::Chapters { .. } => "Chapters",
            Route::Reader { .. } => "Reader",
        }
    }
}

/// Catalog load lifecycle. "Not found" is a per-screen lookup result layered
/// on top of `Loaded`, never collapsed into the loading or failed states.
enum CatalogState {
    Loading,
    Loaded(Catalog),
    Failed(String),
}

struct PendingCatalog {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

enum AsyncResponse {
    Catalog {
        request_id: u64,
        result: Result<Catalog, CatalogError>,
    },
}

#[derive(Debug, Clone)]
enum PageStatus {
    Queued,
    Fetched(pages::PageInfo),
    Failed(String),
}

/// Per-chapter reader state. Built when the reader route's identity is first
/// seen, torn down when it changes or the reader is left; never carried over
/// between chapters.
struct ReaderView {
    manga_id: String,
    chapter_id: String,
    manga_title: String,
    chapter_title: String,
    pages: Vec<String>,
    window: RevealWindow,
    observer: SentinelObserver,
    scroll: usize,
    page_status: HashMap<usize, PageStatus>,
    view_height: u16,
}

impl ReaderView {
    /// Page rows that fit in the strip area at the last drawn height.
    fn viewport_rows(&self) -> usize {
        ((self.view_height as usize) / PAGE_ROW_HEIGHT).max(1)
    }

    fn viewport(&self) -> Range<usize> {
        let visible = self.window.visible_count();
        let start = self.scroll.min(visible.saturating_sub(1));
        let end = (start + self.viewport_rows()).min(visible);
        start..end
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

pub struct Options {
    pub status_message: String,
    pub catalog_service: Arc<dyn CatalogService>,
    pub pages_handle: Option<pages::Handle>,
    pub config_path: String,
    pub reveal_step: usize,
}

pub struct Model {
    status_message: String,
    route: Route,
    catalog: CatalogState,
    selected_manga: usize,
    selected_chapter: usize,
    reader: Option<ReaderView>,
    chapter_menu_visible: bool,
    chapter_menu_selected: usize,
    catalog_service: Arc<dyn CatalogService>,
    pages_handle: Option<pages::Handle>,
    reveal_step: usize,
    config_path: String,
    spinner: Spinner,
    needs_redraw: bool,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    pages_tx: Sender<pages::Outcome>,
    pages_rx: Receiver<pages::Outcome>,
    next_request_id: u64,
    pending_catalog: Option<PendingCatalog>,
    pending_pages: HashSet<pages::PageKey>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let (pages_tx, pages_rx) = unbounded();
        Self {
            status_message: opts.status_message,
            route: Route::Library,
            catalog: CatalogState::Loading,
            selected_manga: 0,
            selected_chapter: 0,
            reader: None,
            chapter_menu_visible: false,
            chapter_menu_selected: 0,
            catalog_service: opts.catalog_service,
            pages_handle: opts.pages_handle,
            reveal_step: opts.reveal_step.max(1),
            config_path: opts.config_path,
            spinner: Spinner::new(),
            needs_redraw: true,
            response_tx,
            response_rx,
            pages_tx,
            pages_rx,
            next_request_id: 1,
            pending_catalog: None,
            pending_pages: HashSet::new(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.reload_catalog();

        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }
            if self.check_reveal() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() && self.spinner.advance() {
                    self.mark_dirty();
                } else if !self.is_loading() {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.pending_catalog.is_some() || !self.pending_pages.is_empty()
    }

    fn loaded_catalog(&self) -> Option<&Catalog> {
        match &self.catalog {
            CatalogState::Loaded(catalog) => Some(catalog),
            _ => None,
        }
    }

    fn reload_catalog(&mut self) {
        if let Some(pending) = self.pending_catalog.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_catalog = Some(PendingCatalog {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });
        if !matches!(self.catalog, CatalogState::Loaded(_)) {
            self.catalog = CatalogState::Loading;
        }
        self.status_message = "Loading catalog...".to_string();
        self.spinner.reset();

        let tx = self.response_tx.clone();
        let service = self.catalog_service.clone();
        thread::spawn(move || {
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let result = service.load_catalog();
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Catalog { request_id, result });
        });
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        while let Ok(outcome) = self.pages_rx.try_recv() {
            self.handle_page_outcome(outcome);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Catalog { request_id, result } => {
                let Some(pending) = &self.pending_catalog else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst) || pending.request_id != request_id {
                    return;
                }
                self.pending_catalog = None;

                match result {
                    Ok(catalog) => {
                        let count = catalog.mangas.len();
                        self.selected_manga = self
                            .selected_manga
                            .min(catalog.mangas.len().saturating_sub(1));
                        self.catalog = CatalogState::Loaded(catalog);
                        self.status_message = format!(
                            "Catalog loaded: {} title{}.",
                            count,
                            if count == 1 { "" } else { "s" }
                        );
                        self.ensure_reader_view();
                    }
                    Err(err) => {
                        self.catalog = CatalogState::Failed(err.to_string());
                        self.status_message = format!("Failed to load catalog: {err}");
                    }
                }
                self.mark_dirty();
            }
        }
    }

    fn handle_page_outcome(&mut self, outcome: pages::Outcome) {
        self.pending_pages.remove(&outcome.key);
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        if reader.manga_id != outcome.key.manga_id || reader.chapter_id != outcome.key.chapter_id {
            // Response for a chapter that is no longer open.
            return;
        }
        let status = match outcome.result {
            Ok(info) => PageStatus::Fetched(info),
            Err(err) => PageStatus::Failed(err.to_string()),
        };
        reader.page_status.insert(outcome.key.index, status);
        self.mark_dirty();
    }

    /// Build or rebuild the reader state when the reader route's identity
    /// does not match the current view. This is the explicit reset the
    /// chapter-change contract requires: a fresh reveal window, a fresh
    /// observer, and the strip scrolled back to the top.
    fn ensure_reader_view(&mut self) {
        let (manga_id, chapter_id) = match &self.route {
            Route::Reader {
                manga_id,
                chapter_id,
            } => (manga_id.clone(), chapter_id.clone()),
            _ => return,
        };

        if let Some(reader) = &self.reader {
            if reader.manga_id == manga_id && reader.chapter_id == chapter_id {
                return;
            }
        }

        let located = {
            let Some(catalog) = self.loaded_catalog() else {
                return;
            };
            catalog.manga(&manga_id).and_then(|manga| {
                manga.chapter(&chapter_id).map(|chapter| {
                    (
                        manga.title.clone(),
                        chapter.title.clone(),
                        chapter.pages.clone(),
                    )
                })
            })
        };
        let Some((manga_title, chapter_title, pages)) = located else {
            self.teardown_reader();
            return;
        };

        let window = RevealWindow::new(pages.len(), self.reveal_step);
        let mut observer = SentinelObserver::new();
        if let Some(last) = window.last_visible_index() {
            observer.attach(last);
        }

        self.teardown_reader();
        self.reader = Some(ReaderView {
            manga_id,
            chapter_id,
            manga_title,
            chapter_title,
            pages,
            window,
            observer,
            scroll: 0,
            page_status: HashMap::new(),
            view_height: 0,
        });

        let initial = 0..self.reader.as_ref().map_or(0, |r| r.window.visible_count());
        self.prefetch_pages(initial);
    }

    fn teardown_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.observer.detach();
        }
    }

    fn navigate(&mut self, route: Route) {
        if self.route == route {
            return;
        }
        self.chapter_menu_visible = false;
        if !matches!(route, Route::Reader { .. }) {
            self.teardown_reader();
        }
        if let Route::Chapters { manga_id } = &route {
            if let Some(catalog) = self.loaded_catalog() {
                if let Some(manga) = catalog.manga(manga_id) {
                    self.selected_chapter = self
                        .selected_chapter
                        .min(manga.chapters.len().saturating_sub(1));
                }
            }
        }
        self.route = route;
        self.ensure_reader_view();
        self.mark_dirty();
    }

    /// Queue prefetch of page assets for the given index range.
    fn prefetch_pages(&mut self, range: Range<usize>) {
        let Some(reader) = &self.reader else {
            return;
        };
        let Some(handle) = &self.pages_handle else {
            return;
        };

        let mut queued = Vec::new();
        for index in range {
            let Some(file) = reader.pages.get(index) else {
                continue;
            };
            let key = pages::PageKey {
                manga_id: reader.manga_id.clone(),
                chapter_id: reader.chapter_id.clone(),
                index,
            };
            if self.pending_pages.contains(&key) || reader.page_status.contains_key(&index) {
                continue;
            }
            let url = self
                .catalog_service
                .page_url(&reader.manga_id, &reader.chapter_id, file);
            handle.enqueue(
                pages::Request {
                    key: key.clone(),
                    url,
                },
                self.pages_tx.clone(),
            );
            queued.push(key);
        }

        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        for key in queued {
            reader.page_status.insert(key.index, PageStatus::Queued);
            self.pending_pages.insert(key);
        }
    }

    /// Fire the sentinel observer against the current viewport and extend the
    /// reveal window while the watched page stays visible. Idempotent once
    /// the window is exhausted.
    fn check_reveal(&mut self) -> bool {
        let mut revealed_ranges = Vec::new();
        {
            let Some(reader) = self.reader.as_mut() else {
                return false;
            };
            while !reader.window.is_exhausted() && reader.observer.fire(reader.viewport()) {
                let Some(range) = reader.window.advance() else {
                    break;
                };
                // Re-instrument: the previous watch is replaced, never
                // duplicated.
                match reader.window.last_visible_index() {
                    Some(last) => reader.observer.attach(last),
                    None => reader.observer.detach(),
                }
                revealed_ranges.push(range);
            }
        }
        let changed = !revealed_ranges.is_empty();
        for range in revealed_ranges {
            self.prefetch_pages(range);
        }
        changed
    }

    fn chapter_controls(&self) -> Option<(ChapterCursor, bool, bool)> {
        let Route::Reader {
            manga_id,
            chapter_id,
        } = &self.route
        else {
            return None;
        };
        let catalog = self.loaded_catalog()?;
        let manga = catalog.manga(manga_id)?;
        let cursor = ChapterCursor::locate(manga, chapter_id)?;
        Some((cursor, cursor.has_previous(), cursor.has_next()))
    }

    fn open_adjacent_chapter(&mut self, forward: bool) {
        let Route::Reader { manga_id, .. } = self.route.clone() else {
            return;
        };
        let Some((cursor, _, _)) = self.chapter_controls() else {
            return;
        };
        let target = {
            let Some(catalog) = self.loaded_catalog() else {
                return;
            };
            let Some(manga) = catalog.manga(&manga_id) else {
                return;
            };
            if forward {
                cursor.next(manga).map(str::to_string)
            } else {
                cursor.previous(manga).map(str::to_string)
            }
        };
        match target {
            Some(chapter_id) => {
                self.navigate(Route::Reader {
                    manga_id,
                    chapter_id,
                });
            }
            None => {
                self.status_message = if forward {
                    "Already at the last chapter.".to_string()
                } else {
                    "Already at the first chapter.".to_string()
                };
                self.mark_dirty();
            }
        }
    }

    fn open_chapter_menu(&mut self) {
        if let Some((cursor, _, _)) = self.chapter_controls() {
            self.chapter_menu_selected = cursor.position();
            self.chapter_menu_visible = true;
            self.mark_dirty();
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.chapter_menu_visible {
            return self.handle_chapter_menu_key(code);
        }

        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.reload_catalog();
                self.mark_dirty();
            }
            _ => match self.route.clone() {
                Route::Library => self.handle_library_key(code),
                Route::Chapters { manga_id } => self.handle_chapters_key(code, &manga_id),
                Route::Reader { .. } => self.handle_reader_key(code),
            },
        }

        Ok(false)
    }

    fn handle_library_key(&mut self, code: KeyCode) {
        let count = self
            .loaded_catalog()
            .map(|catalog| catalog.mangas.len())
            .unwrap_or(0);
        match code {
            KeyCode::Char('j') | KeyCode::Down => {
                if count > 0 && self.selected_manga + 1 < count {
                    self.selected_manga += 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.selected_manga > 0 {
                    self.selected_manga -= 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Enter => {
                let manga_id = self
                    .loaded_catalog()
                    .and_then(|catalog| catalog.mangas.get(self.selected_manga))
                    .map(|manga| manga.id.clone());
                if let Some(manga_id) = manga_id {
                    self.selected_chapter = 0;
                    self.navigate(Route::Chapters { manga_id });
                }
            }
            _ => {}
        }
    }

    fn handle_chapters_key(&mut self, code: KeyCode, manga_id: &str) {
        let chapter_count = self
            .loaded_catalog()
            .and_then(|catalog| catalog.manga(manga_id))
            .map(|manga| manga.chapters.len())
            .unwrap_or(0);
        match code {
            KeyCode::Esc | KeyCode::Char('h') | KeyCode::Backspace => {
                self.navigate(Route::Library);
            }
            KeyCode::Char('j') | KeyCode::Down => {
                if chapter_count > 0 && self.selected_chapter + 1 < chapter_count {
                    self.selected_chapter += 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.selected_chapter > 0 {
                    self.selected_chapter -= 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Enter => {
                let chapter_id = self
                    .loaded_catalog()
                    .and_then(|catalog| catalog.manga(manga_id))
                    .and_then(|manga| manga.chapters.get(self.selected_chapter))
                    .map(|chapter| chapter.id.clone());
                if let Some(chapter_id) = chapter_id {
                    self.navigate(Route::Reader {
                        manga_id: manga_id.to_string(),
                        chapter_id,
                    });
                }
            }
            _ => {}
        }
    }

    fn handle_reader_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Char('h') | KeyCode::Backspace => {
                let Route::Reader { manga_id, .. } = self.route.clone() else {
                    return;
                };
                self.navigate(Route::Chapters { manga_id });
                return;
            }
            KeyCode::Char('n') => {
                self.open_adjacent_chapter(true);
                return;
            }
            KeyCode::Char('p') => {
                self.open_adjacent_chapter(false);
                return;
            }
            KeyCode::Char('c') => {
                self.open_chapter_menu();
                return;
            }
            _ => {}
        }

        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        let visible = reader.window.visible_count();
        let rows = reader.viewport_rows();
        match code {
            KeyCode::Char('j') | KeyCode::Down => {
                if reader.scroll + 1 < visible {
                    reader.scroll += 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if reader.scroll > 0 {
                    reader.scroll -= 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Char(' ') | KeyCode::PageDown => {
                reader.scroll = (reader.scroll + rows).min(visible.saturating_sub(1));
                self.mark_dirty();
            }
            KeyCode::PageUp => {
                reader.scroll = reader.scroll.saturating_sub(rows);
                self.mark_dirty();
            }
            KeyCode::Char('g') | KeyCode::Home => {
                reader.scroll = 0;
                self.mark_dirty();
            }
            KeyCode::Char('G') | KeyCode::End => {
                reader.scroll = visible.saturating_sub(1);
                self.mark_dirty();
            }
            _ => {}
        }
    }

    fn handle_chapter_menu_key(&mut self, code: KeyCode) -> Result<bool> {
        let chapter_count = match &self.route {
            Route::Reader { manga_id, .. } => self
                .loaded_catalog()
                .and_then(|catalog| catalog.manga(manga_id))
                .map(|manga| manga.chapters.len())
                .unwrap_or(0),
            _ => 0,
        };

        match code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('c') => {
                self.chapter_menu_visible = false;
                self.mark_dirty();
            }
            KeyCode::Char('j') | KeyCode::Down => {
                if chapter_count > 0 && self.chapter_menu_selected + 1 < chapter_count {
                    self.chapter_menu_selected += 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if self.chapter_menu_selected > 0 {
                    self.chapter_menu_selected -= 1;
                    self.mark_dirty();
                }
            }
            KeyCode::Enter => {
                let Route::Reader { manga_id, .. } = self.route.clone() else {
                    self.chapter_menu_visible = false;
                    return Ok(false);
                };
                let chapter_id = self
                    .loaded_catalog()
                    .and_then(|catalog| catalog.manga(&manga_id))
                    .and_then(|manga| manga.chapters.get(self.chapter_menu_selected))
                    .map(|chapter| chapter.id.clone());
                self.chapter_menu_visible = false;
                if let Some(chapter_id) = chapter_id {
                    self.navigate(Route::Reader {
                        manga_id,
                        chapter_id,
                    });
                }
                self.mark_dirty();
            }
            _ => {}
        }
        Ok(false)
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let area = frame.size();
        frame.render_widget(
            Block::default().style(Style::default().bg(COLOR_BG)),
            area,
        );

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(area);

        match self.route.clone() {
            Route::Library => self.draw_library(frame, chunks[0]),
            Route::Chapters { manga_id } => self.draw_chapters(frame, chunks[0], &manga_id),
            Route::Reader {
                manga_id,
                chapter_id,
            } => self.draw_reader(frame, chunks[0], &manga_id, &chapter_id),
        }

        self.draw_status_bar(frame, chunks[1]);

        if self.chapter_menu_visible {
            self.draw_chapter_menu(frame, area);
        }
    }

    fn screen_block(&self, title: String) -> Block<'static> {
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1))
    }

    /// Shared placeholder rendering for the loading / failed states. Returns
    /// false when the catalog is loaded and the caller should draw content.
    fn draw_catalog_placeholder(&self, frame: &mut Frame<'_>, area: Rect) -> bool {
        let text = match &self.catalog {
            CatalogState::Loaded(_) => return false,
            CatalogState::Loading => Text::from(Line::from(Span::styled(
                format!("{} Loading catalog...", self.spinner.frame()),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))),
            CatalogState::Failed(message) => Text::from(vec![
                Line::from(Span::styled(
                    "Could not load the catalog.",
                    Style::default().fg(COLOR_ERROR).add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    message.clone(),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
                Line::from(Span::styled(
                    format!("Press r to retry, or check catalog.base_url in {}.", self.config_path),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ]),
        };
        let paragraph = Paragraph::new(text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
        true
    }

    fn not_found(&self, frame: &mut Frame<'_>, area: Rect, what: &str) {
        let paragraph = Paragraph::new(Text::from(Line::from(Span::styled(
            format!("{what} not found in the catalog."),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ))))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }

    fn draw_library(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.screen_block(self.route.title().to_string());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if self.draw_catalog_placeholder(frame, inner) {
            return;
        }
        let Some(catalog) = self.loaded_catalog() else {
            return;
        };

        if catalog.mangas.is_empty() {
            let paragraph = Paragraph::new(Text::from(Line::from(Span::styled(
                "The catalog is empty.",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))))
            .alignment(Alignment::Center);
            frame.render_widget(paragraph, inner);
            return;
        }

        let width = inner.width.max(1) as usize;
        let mut items: Vec<ListItem> = Vec::with_capacity(catalog.mangas.len());
        for (idx, manga) in catalog.mangas.iter().enumerate() {
            let is_selected = idx == self.selected_manga;
            let background = if is_selected {
                COLOR_PANEL_SELECTED_BG
            } else {
                COLOR_PANEL_BG
            };
            let title_style = Style::default()
                .fg(if is_selected {
                    COLOR_TEXT_PRIMARY
                } else {
                    COLOR_TEXT_SECONDARY
                })
                .bg(background)
                .add_modifier(if is_selected {
                    Modifier::BOLD
                } else {
                    Modifier::empty()
                });
            let meta_style = Style::default().fg(COLOR_TEXT_SECONDARY).bg(background);

            let mut lines = wrap_plain(&manga.title, width, title_style);
            let chapter_count = manga.chapters.len();
            lines.push(Line::from(Span::styled(
                format!(
                    "{} chapter{}",
                    chapter_count,
                    if chapter_count == 1 { "" } else { "s" }
                ),
                meta_style,
            )));
            if !manga.description.trim().is_empty() {
                let mut description = wrap_plain(manga.description.trim(), width, meta_style);
                description.truncate(2);
                lines.extend(description);
            }
            lines.push(Line::from(Span::styled(String::new(), meta_style)));
            pad_lines_to_width(&mut lines, inner.width);
            items.push(ListItem::new(lines));
        }

        frame.render_widget(List::new(items), inner);
    }

    fn draw_chapters(&self, frame: &mut Frame<'_>, area: Rect, manga_id: &str) {
        let block = self.screen_block(self.route.title().to_string());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if self.draw_catalog_placeholder(frame, inner) {
            return;
        }
        let Some(catalog) = self.loaded_catalog() else {
            return;
        };
        let Some(manga) = catalog.manga(manga_id) else {
            self.not_found(frame, inner, "Manga");
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(6), Constraint::Min(0)])
            .split(inner);

        let width = inner.width.max(1) as usize;
        let mut header = vec![Line::from(Span::styled(
            manga.title.clone(),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ))];
        if !manga.cover.trim().is_empty() {
            header.push(Line::from(Span::styled(
                format!("Cover: {}", manga.cover),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        if !manga.description.trim().is_empty() {
            header.extend(wrap_plain(
                manga.description.trim(),
                width,
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ));
        }
        let paragraph = Paragraph::new(Text::from(header)).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, chunks[0]);

        if manga.chapters.is_empty() {
            let empty = Paragraph::new(Text::from(Line::from(Span::styled(
                "No chapters yet.",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            ))));
            frame.render_widget(empty, chunks[1]);
            return;
        }

        let mut items: Vec<ListItem> = Vec::with_capacity(manga.chapters.len());
        for (idx, chapter) in manga.chapters.iter().enumerate() {
            let is_selected = idx == self.selected_chapter;
            let background = if is_selected {
                COLOR_PANEL_SELECTED_BG
            } else {
                COLOR_PANEL_BG
            };
            let style = Style::default()
                .fg(if is_selected {
                    COLOR_TEXT_PRIMARY
                } else {
                    COLOR_TEXT_SECONDARY
                })
                .bg(background);
            let page_count = chapter.pages.len();
            let label = format!(
                "{}  ({} page{})",
                chapter.title,
                page_count,
                if page_count == 1 { "" } else { "s" }
            );
            let mut lines = wrap_plain(&label, width, style);
            if is_selected && !chapter.description.trim().is_empty() {
                lines.extend(wrap_plain(
                    chapter.description.trim(),
                    width,
                    Style::default().fg(COLOR_TEXT_SECONDARY).bg(background),
                ));
            }
            pad_lines_to_width(&mut lines, inner.width);
            items.push(ListItem::new(lines));
        }
        frame.render_widget(List::new(items), chunks[1]);
    }

    fn draw_reader(&mut self, frame: &mut Frame<'_>, area: Rect, manga_id: &str, chapter_id: &str) {
        let title = match (&self.reader, self.chapter_controls()) {
            (Some(reader), Some((cursor, _, _))) => {
                let total = self
                    .loaded_catalog()
                    .and_then(|catalog| catalog.manga(manga_id))
                    .map(|manga| manga.chapters.len())
                    .unwrap_or(0);
                format!(
                    "{} · {} ({}/{})",
                    reader.manga_title,
                    reader.chapter_title,
                    cursor.position() + 1,
                    total
                )
            }
            _ => "Reader".to_string(),
        };
        let block = self.screen_block(title);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if self.draw_catalog_placeholder(frame, inner) {
            return;
        }

        let lookup_failed = {
            let catalog = self.loaded_catalog();
            match catalog {
                Some(catalog) => match catalog.manga(manga_id) {
                    Some(manga) => {
                        if manga.chapter(chapter_id).is_none() {
                            Some("Chapter")
                        } else {
                            None
                        }
                    }
                    None => Some("Manga"),
                },
                None => None,
            }
        };
        if let Some(what) = lookup_failed {
            self.not_found(frame, inner, what);
            return;
        }

        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        reader.view_height = inner.height;

        if reader.pages.is_empty() {
            let empty = Paragraph::new(Text::from(Line::from(Span::styled(
                "This chapter has no pages.",
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            ))))
            .alignment(Alignment::Center);
            frame.render_widget(empty, inner);
            return;
        }

        let viewport = reader.viewport();
        let total = reader.pages.len();
        let mut lines: Vec<Line> = Vec::with_capacity(viewport.len() * PAGE_ROW_HEIGHT);
        for index in viewport {
            let file = reader.pages[index].as_str();
            lines.push(Line::from(Span::styled(
                format!("Page {}/{} · {}", index + 1, total, file),
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            )));
            let status_line = match reader.page_status.get(&index) {
                Some(PageStatus::Queued) => Span::styled(
                    "fetching...".to_string(),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                ),
                Some(PageStatus::Fetched(info)) => Span::styled(
                    format!("{} · {}", format_bytes(info.size_bytes), info.content_type),
                    Style::default().fg(COLOR_SUCCESS),
                ),
                Some(PageStatus::Failed(message)) => Span::styled(
                    format!("failed: {message}"),
                    Style::default().fg(COLOR_ERROR),
                ),
                None => Span::styled(
                    "not fetched".to_string(),
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                ),
            };
            lines.push(Line::from(status_line));
            lines.push(Line::from(String::new()));
        }

        let paragraph = Paragraph::new(Text::from(lines));
        frame.render_widget(paragraph, inner);
    }

    fn draw_status_bar(&self, frame: &mut Frame<'_>, area: Rect) {
        let hints = if self.chapter_menu_visible {
            "j/k select · Enter open · Esc close"
        } else {
            match self.route {
                Route::Library => "j/k move · Enter open · r refresh · q quit",
                Route::Chapters { .. } => "j/k move · Enter read · Esc back · q quit",
                Route::Reader { .. } => {
                    "j/k scroll · n/p chapter · c chapters · Esc back · q quit"
                }
            }
        };

        let mut spans = Vec::new();
        if self.is_loading() {
            spans.push(Span::styled(
                format!("{} ", self.spinner.frame()),
                Style::default().fg(COLOR_ACCENT),
            ));
        }
        spans.push(Span::styled(
            self.status_message.clone(),
            Style::default().fg(COLOR_TEXT_PRIMARY),
        ));
        spans.push(Span::styled(
            format!("  —  {hints}"),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ));

        let paragraph = Paragraph::new(Line::from(spans))
            .style(Style::default().bg(COLOR_PANEL_BG));
        frame.render_widget(paragraph, area);
    }

    fn draw_chapter_menu(&self, frame: &mut Frame<'_>, area: Rect) {
        let Route::Reader { manga_id, .. } = &self.route else {
            return;
        };
        let Some(manga) = self
            .loaded_catalog()
            .and_then(|catalog| catalog.manga(manga_id))
        else {
            return;
        };

        let popup = centered_rect(60, 60, area);
        frame.render_widget(Clear, popup);
        let block = Block::default()
            .title(format!("Chapters · {}", manga.title))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1));
        let inner = block.inner(popup);
        frame.render_widget(block, popup);

        let mut items: Vec<ListItem> = Vec::with_capacity(manga.chapters.len());
        for (idx, chapter) in manga.chapters.iter().enumerate() {
            let is_selected = idx == self.chapter_menu_selected;
            let style = if is_selected {
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY).bg(COLOR_PANEL_BG)
            };
            let mut lines = vec![Line::from(Span::styled(chapter.title.clone(), style))];
            pad_lines_to_width(&mut lines, inner.width);
            items.push(ListItem::new(lines));
        }
        frame.render_widget(List::new(items), inner);
    }
}

fn wrap_plain(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    wrap(text, width.max(1))
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16) {
    let width = width as usize;
    for line in lines.iter_mut() {
        let current: usize = line
            .spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum();
        if current < width {
            let style = line
                .spans
                .last()
                .map(|span| span.style)
                .unwrap_or_default();
            line.spans
                .push(Span::styled(" ".repeat(width - current), style));
        }
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockCatalogService;
    use ratatui::backend::TestBackend;

    fn test_model() -> Model {
        Model::new(Options {
            status_message: String::new(),
            catalog_service: Arc::new(MockCatalogService::sample()),
            pages_handle: None,
            config_path: "~/.config/manga-tui/config.yaml".to_string(),
            reveal_step: 10,
        })
    }

    fn load_catalog(model: &mut Model) {
        model.reload_catalog();
        let message = model
            .response_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("catalog response");
        model.handle_async_response(message);
        assert!(matches!(model.catalog, CatalogState::Loaded(_)));
    }

    fn open_reader(model: &mut Model, chapter_id: &str) {
        model.navigate(Route::Reader {
            manga_id: "m1".to_string(),
            chapter_id: chapter_id.to_string(),
        });
    }

    fn reader_viewport(model: &mut Model, rows: usize) {
        let reader = model.reader.as_mut().expect("reader view");
        reader.view_height = (rows * PAGE_ROW_HEIGHT) as u16;
    }

    #[test]
    fn reveal_window_extends_when_sentinel_enters_viewport() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c1");
        reader_viewport(&mut model, 4);

        let reader = model.reader.as_ref().unwrap();
        assert_eq!(reader.window.visible_count(), 10);
        assert_eq!(reader.observer.watched(), Some(9));

        // Sentinel (index 9) is not visible at the top of the strip.
        assert!(!model.check_reveal());

        // Scroll until the last rendered page enters the viewport.
        model.reader.as_mut().unwrap().scroll = 7;
        assert!(model.check_reveal());
        let reader = model.reader.as_ref().unwrap();
        assert_eq!(reader.window.revealed(), 10);
        assert_eq!(reader.window.visible_count(), 20);
        assert_eq!(reader.observer.watched(), Some(19));
    }

    #[test]
    fn rendered_count_never_exceeds_window_bound() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c1");
        reader_viewport(&mut model, 5);

        for _ in 0..20 {
            let reader = model.reader.as_ref().unwrap();
            let bound = (reader.window.revealed() + 10).min(reader.pages.len());
            assert!(reader.window.visible_count() <= bound);
            let visible = reader.window.visible_count();
            model.reader.as_mut().unwrap().scroll = visible.saturating_sub(1);
            model.check_reveal();
        }
        let reader = model.reader.as_ref().unwrap();
        assert_eq!(reader.window.visible_count(), reader.pages.len());
    }

    #[test]
    fn reveal_is_idempotent_once_exhausted() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c3");
        reader_viewport(&mut model, 5);

        // c3 has 3 pages; the first lookahead covers everything.
        let reader = model.reader.as_ref().unwrap();
        assert_eq!(reader.window.visible_count(), 3);

        model.check_reveal();
        let revealed = model.reader.as_ref().unwrap().window.revealed();
        assert!(model.reader.as_ref().unwrap().window.is_exhausted());

        assert!(!model.check_reveal());
        assert_eq!(model.reader.as_ref().unwrap().window.revealed(), revealed);
    }

    #[test]
    fn exactly_one_observer_after_render() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c1");
        reader_viewport(&mut model, 4);

        model.reader.as_mut().unwrap().scroll = 9;
        model.check_reveal();
        let reader = model.reader.as_ref().unwrap();
        assert_eq!(
            reader.observer.watched(),
            reader.window.last_visible_index()
        );
    }

    #[test]
    fn chapter_change_resets_window_and_scroll() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c1");
        reader_viewport(&mut model, 4);

        model.reader.as_mut().unwrap().scroll = 9;
        model.check_reveal();
        assert!(model.reader.as_ref().unwrap().window.revealed() > 0);

        open_reader(&mut model, "c2");
        let reader = model.reader.as_ref().unwrap();
        assert_eq!(reader.chapter_id, "c2");
        assert_eq!(reader.window.revealed(), 0);
        assert_eq!(reader.scroll, 0);
    }

    #[test]
    fn navigation_controls_disable_at_ends() {
        let mut model = test_model();
        load_catalog(&mut model);

        open_reader(&mut model, "c2");
        let (_, has_prev, has_next) = model.chapter_controls().unwrap();
        assert!(has_prev);
        assert!(has_next);

        open_reader(&mut model, "c1");
        let (_, has_prev, has_next) = model.chapter_controls().unwrap();
        assert!(!has_prev);
        assert!(has_next);

        open_reader(&mut model, "c3");
        let (_, has_prev, has_next) = model.chapter_controls().unwrap();
        assert!(has_prev);
        assert!(!has_next);
    }

    #[test]
    fn next_and_previous_substitute_adjacent_chapter() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c2");

        model.handle_key(KeyCode::Char('n')).unwrap();
        assert_eq!(
            model.route,
            Route::Reader {
                manga_id: "m1".into(),
                chapter_id: "c3".into()
            }
        );

        // At the last chapter "next" is a no-op.
        model.handle_key(KeyCode::Char('n')).unwrap();
        assert_eq!(
            model.route,
            Route::Reader {
                manga_id: "m1".into(),
                chapter_id: "c3".into()
            }
        );

        model.handle_key(KeyCode::Char('p')).unwrap();
        assert_eq!(
            model.route,
            Route::Reader {
                manga_id: "m1".into(),
                chapter_id: "c2".into()
            }
        );
    }

    #[test]
    fn chapter_menu_round_trip() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c1");

        model.handle_key(KeyCode::Char('c')).unwrap();
        assert!(model.chapter_menu_visible);
        assert_eq!(model.chapter_menu_selected, 0);

        model.handle_key(KeyCode::Char('j')).unwrap();
        model.handle_key(KeyCode::Char('j')).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();

        assert!(!model.chapter_menu_visible);
        assert_eq!(
            model.route,
            Route::Reader {
                manga_id: "m1".into(),
                chapter_id: "c3".into()
            }
        );
        // c3 has 3 pages, so the fresh window renders all of them.
        assert_eq!(model.reader.as_ref().unwrap().window.visible_count(), 3);
    }

    #[test]
    fn missing_manga_renders_without_panicking() {
        let mut model = test_model();
        load_catalog(&mut model);
        model.navigate(Route::Chapters {
            manga_id: "missing".into(),
        });

        let backend = TestBackend::new(80, 24);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| model.draw(frame)).unwrap();

        model.navigate(Route::Reader {
            manga_id: "missing".into(),
            chapter_id: "c1".into(),
        });
        assert!(model.reader.is_none());
        terminal.draw(|frame| model.draw(frame)).unwrap();
    }

    #[test]
    fn missing_chapter_renders_without_panicking() {
        let mut model = test_model();
        load_catalog(&mut model);
        model.navigate(Route::Reader {
            manga_id: "m1".into(),
            chapter_id: "zz".into(),
        });
        assert!(model.reader.is_none());

        let backend = TestBackend::new(80, 24);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| model.draw(frame)).unwrap();
    }

    #[test]
    fn stale_catalog_response_is_ignored() {
        let mut model = test_model();
        load_catalog(&mut model);

        // Two reloads in a row: the first response is superseded.
        model.reload_catalog();
        let first = model
            .response_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        model.reload_catalog();
        let second = model
            .response_rx
            .recv_timeout(Duration::from_secs(2))
            .unwrap();

        model.handle_async_response(first);
        assert!(model.pending_catalog.is_some());

        model.handle_async_response(second);
        assert!(model.pending_catalog.is_none());
    }

    #[test]
    fn leaving_reader_tears_down_observer() {
        let mut model = test_model();
        load_catalog(&mut model);
        open_reader(&mut model, "c1");
        assert!(model.reader.as_ref().unwrap().observer.is_attached());

        model.handle_key(KeyCode::Esc).unwrap();
        assert!(model.reader.is_none());
        assert_eq!(
            model.route,
            Route::Chapters {
                manga_id: "m1".into()
            }
        );
    }

    #[test]
    fn reader_waits_for_catalog_then_builds_view() {
        let mut model = test_model();
        // Navigate before the catalog has arrived.
        model.navigate(Route::Reader {
            manga_id: "m1".into(),
            chapter_id: "c1".into(),
        });
        assert!(model.reader.is_none());

        load_catalog(&mut model);
        let reader = model.reader.as_ref().expect("view built after load");
        assert_eq!(reader.chapter_id, "c1");
        assert_eq!(reader.window.visible_count(), 10);
    }

    #[test]
    fn route_titles() {
        assert_eq!(Route::Library.title(), "Library");
        assert_eq!(
            Route::Reader {
                manga_id: "m".into(),
                chapter_id: "c".into()
            }
            .title(),
            "Reader"
        );
    }

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
