use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use dyingsky_core::{
    dominant_element, AudioBackend, AudioChannel, BuiltinConfigSource, ChapterId, ChapterSummary,
    Clock, ConfigSource, FileConfigSource, FileKeyValueStore, IntroPhase, IntroSequence,
    IntroTimings, PageKind, ReaderCommand, ReaderError, ReaderSession, ReaderStore,
    SessionEvent, SiteConfig, SystemClock, TrackRef, ViewportObserver, PAGE_ELEMENTS,
};
use dyingsky_render::{load_page_image, measure_pages, PageImage, StripLayout};
use dyingsky_tty::{write_status_line, DrawParams, EventMapper, InputMode, KittyRenderer, UiEvent};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const INTRO_FRAME: Duration = Duration::from_millis(50);
const IDLE_POLL: Duration = Duration::from_millis(50);
/// Terminal rows moved by one `j`/`k`.
const SCROLL_ROWS: f32 = 3.0;
const FALLBACK_TITLE: &str = "Beneath the Light of a Dying Sky";

#[derive(Debug, Parser)]
#[command(
    name = "dyingsky",
    version,
    about = "Terminal reader for the Dying Sky webcomic, with its soundtrack"
)]
struct Args {
    /// Site configuration (TOML); the published chapters are used when omitted
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Directory holding the page images and music files
    #[arg(short = 'a', long = "assets", default_value = ".")]
    assets: PathBuf,

    /// Chapter to open instead of the last one read
    #[arg(long = "chapter")]
    chapter: Option<ChapterId>,

    /// Go straight to the reader
    #[arg(long = "skip-intro")]
    skip_intro: bool,

    /// Where reader state is kept; defaults to the platform data directory
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "dyingsky", "dyingsky")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| project_dirs.data_local_dir().to_path_buf());
    let _log_guard = init_logging(&data_dir)?;

    let backend = FileKeyValueStore::open(data_dir.join("store.json"))?;
    let store = ReaderStore::new(Arc::new(backend));

    let source: Box<dyn ConfigSource> = match args.config.clone() {
        Some(path) => Box::new(FileConfigSource::new(path)),
        None => Box::new(BuiltinConfigSource),
    };
    let loader = tokio::spawn(async move { SiteConfig::load(source.as_ref()).await });

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);

    let config = run_intro(&mut renderer, loader, args.skip_intro).await?;
    info!(title = %config.title, "starting reader");

    let audio: Arc<dyn AudioBackend> = Arc::new(FileAudioBackend {
        root: args.assets.clone(),
    });
    let session = ReaderSession::new(config, store, audio, Arc::new(SystemClock));
    let mut reader = Reader::new(session, args.assets.clone(), Geometry::current()?);

    let first = args.chapter.or_else(|| reader.session.start_chapter());
    match first {
        Some(id) => {
            reader.open(id);
        }
        None => reader.message = Some("no chapters are published yet".to_string()),
    }

    let result = run_reader(&mut renderer, &mut reader);

    reader.session.close();
    renderer.delete_image()?;
    renderer.clear_all()?;
    result
}

/// Plays the opening sequence while the configuration loads. Any key skips
/// it, but never past the point where the configuration is available.
async fn run_intro(
    renderer: &mut KittyRenderer<io::Stdout>,
    mut loader: JoinHandle<Result<Arc<SiteConfig>>>,
    skip: bool,
) -> Result<Arc<SiteConfig>> {
    if skip {
        return loader.await.context("configuration task failed")?;
    }

    let clock = SystemClock;
    let mut intro = IntroSequence::new(IntroTimings::default(), clock.now());
    let mut frames = tokio::time::interval(INTRO_FRAME);
    let mut config: Option<Arc<SiteConfig>> = None;
    let mut skip_requested = false;

    loop {
        tokio::select! {
            joined = &mut loader, if config.is_none() => {
                let loaded = joined.context("configuration task failed")??;
                intro.mark_content_ready(clock.now());
                config = Some(loaded);
            }
            _ = frames.tick() => {
                while event::poll(Duration::ZERO)? {
                    if let Event::Key(key) = event::read()? {
                        if key.kind == KeyEventKind::Press {
                            skip_requested = true;
                        }
                    }
                }
            }
        }

        let now = clock.now();
        if skip_requested && config.is_some() {
            intro.skip(now);
        }
        let phase = intro.advance(now);
        let title = config
            .as_ref()
            .map_or(FALLBACK_TITLE, |config| config.title.as_str());
        draw_intro(renderer, phase, intro.progress(now), title)?;

        if let (IntroPhase::Done, Some(config)) = (phase, config.as_ref()) {
            debug!("intro finished");
            return Ok(Arc::clone(config));
        }
    }
}

fn draw_intro(
    renderer: &mut KittyRenderer<io::Stdout>,
    phase: IntroPhase,
    progress: f32,
    title: &str,
) -> Result<()> {
    let (cols, rows) = terminal::size()?;
    let middle = rows / 2;
    let writer = renderer.writer();
    crossterm::queue!(writer, Clear(ClearType::All))?;

    let fog = |share: f32| "░".repeat((cols as f32 * share.clamp(0.0, 1.0)) as usize);
    match phase {
        IntroPhase::Void | IntroPhase::Done => {}
        IntroPhase::FogIn => {
            crossterm::queue!(writer, cursor::MoveTo(0, middle), Print(fog(progress)))?;
        }
        IntroPhase::TitleVisible => {
            print_centered(writer, cols, middle, title)?;
        }
        IntroPhase::Loading => {
            print_centered(writer, cols, middle, title)?;
            let dots = ".".repeat(1 + (progress * 3.0) as usize % 3);
            print_centered(writer, cols, middle + 2, &format!("loading{}", dots))?;
        }
        IntroPhase::Ascend => {
            let lift = (progress * f32::from(middle)) as u16;
            print_centered(writer, cols, middle.saturating_sub(lift), title)?;
            crossterm::queue!(
                writer,
                cursor::MoveTo(0, middle),
                Print(fog(1.0 - progress))
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn print_centered(writer: &mut impl Write, cols: u16, row: u16, text: &str) -> Result<()> {
    let width = text.chars().count() as u16;
    let col = cols.saturating_sub(width) / 2;
    crossterm::queue!(writer, cursor::MoveTo(col, row), Print(text))?;
    Ok(())
}

/// Plays nothing; checks that each track exists and logs what would be heard.
struct FileAudioBackend {
    root: PathBuf,
}

impl AudioBackend for FileAudioBackend {
    fn open(&self, track: &TrackRef) -> Result<Box<dyn AudioChannel>> {
        let path = self.root.join(track.as_str());
        if !path.is_file() {
            bail!("audio file {:?} not found", path);
        }
        info!(track = %track, "audio channel opened");
        Ok(Box::new(LoggedChannel {
            track: track.clone(),
            volume: 0.0,
        }))
    }
}

struct LoggedChannel {
    track: TrackRef,
    volume: f32,
}

impl AudioChannel for LoggedChannel {
    fn set_volume(&mut self, volume: f32) {
        if (volume - self.volume).abs() > f32::EPSILON {
            trace!(track = %self.track, volume, "volume");
        }
        self.volume = volume;
    }

    fn stop(&mut self) {
        info!(track = %self.track, "audio channel stopped");
    }
}

/// Terminal size in cells plus the pixel size of one cell.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    cols: u32,
    rows: u32,
    cell_width: f32,
    cell_height: f32,
}

impl Geometry {
    fn current() -> Result<Self> {
        let window = terminal::window_size()?;
        let cols = u32::from(window.columns).max(1);
        let rows = u32::from(window.rows).max(1);
        // Some terminals do not report pixel sizes.
        let cell_width = if window.width > 0 {
            f32::from(window.width) / cols as f32
        } else {
            8.0
        };
        let cell_height = if window.height > 0 {
            f32::from(window.height) / rows as f32
        } else {
            16.0
        };
        Ok(Self {
            cols,
            rows,
            cell_width,
            cell_height,
        })
    }

    fn image_rows(&self) -> u32 {
        self.rows.saturating_sub(1).max(1)
    }

    fn viewport_px(&self) -> f32 {
        self.image_rows() as f32 * self.cell_height
    }

    /// Reading column: full width, but no wider than two thirds of the height.
    fn column_px(&self) -> f32 {
        (self.cols as f32 * self.cell_width).min(self.viewport_px() * 2.0 / 3.0)
    }

    fn status_row(&self) -> u16 {
        self.rows.saturating_sub(1) as u16
    }
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

struct ChapterList {
    entries: Vec<ChapterSummary>,
    selected: usize,
}

impl ChapterList {
    fn new(entries: Vec<ChapterSummary>, current: Option<ChapterId>) -> Self {
        let selected = current
            .and_then(|id| entries.iter().position(|entry| entry.id == id))
            .unwrap_or(0);
        Self { entries, selected }
    }

    fn move_selection(&mut self, delta: i32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let last = self.entries.len() as i64 - 1;
        let next = (self.selected as i64 + i64::from(delta)).clamp(0, last) as usize;
        let moved = next != self.selected;
        self.selected = next;
        moved
    }

    fn selected_id(&self) -> Option<ChapterId> {
        self.entries.get(self.selected).map(|entry| entry.id)
    }
}

struct CachedPage {
    chapter: ChapterId,
    page: u32,
    image: PageImage,
}

struct Reader {
    session: ReaderSession,
    assets: PathBuf,
    geometry: Geometry,
    layout: StripLayout,
    chapter_list: Option<ChapterList>,
    message: Option<String>,
    cached: Option<CachedPage>,
}

impl Reader {
    fn new(session: ReaderSession, assets: PathBuf, geometry: Geometry) -> Self {
        Self {
            session,
            assets,
            geometry,
            layout: StripLayout::from_heights(Vec::new(), 0.0, geometry.viewport_px()),
            chapter_list: None,
            message: None,
            cached: None,
        }
    }

    /// Lays out and opens `id`. Missing and locked chapters leave the current
    /// one in place and explain why on the status line.
    fn open(&mut self, id: ChapterId) -> bool {
        let mut layout = match self.session.config().chapter(id) {
            Some(chapter) => {
                let metrics = measure_pages(&self.assets, chapter);
                StripLayout::new(
                    &metrics,
                    self.geometry.column_px(),
                    self.session.config().reader.page_gap,
                    self.geometry.viewport_px(),
                )
            }
            None => {
                self.message = Some(ReaderError::ChapterNotFound(id).to_string());
                return false;
            }
        };

        match self.session.open_chapter(id, &mut layout) {
            Ok(()) => {
                self.layout = layout;
                self.cached = None;
                self.message = None;
                true
            }
            Err(err @ ReaderError::ChapterLocked(_)) => {
                self.message = Some(format!("{}. press v to enter a VIP code", err));
                false
            }
            Err(err) => {
                self.message = Some(err.to_string());
                false
            }
        }
    }

    fn scroll(&mut self, delta: f32) {
        let offset = self.layout.scroll_by(delta);
        self.session.on_scroll(offset);
    }

    fn resize(&mut self) -> Result<()> {
        self.geometry = Geometry::current()?;
        self.layout.set_viewport_height(self.geometry.viewport_px());
        self.session.on_scroll(self.layout.offset());
        self.cached = None;
        Ok(())
    }

    /// Page that fills most of the screen right now, ahead of the debounced tracker.
    fn visible_page(&self) -> Option<u32> {
        let extents = self.layout.report_extents(PAGE_ELEMENTS);
        dominant_element(&extents, self.layout.viewport_height())
    }

    fn handle(&mut self, event: UiEvent) -> LoopAction {
        if let Some(list) = self.chapter_list.as_mut() {
            return match event {
                UiEvent::Scroll { steps } => {
                    if list.move_selection(steps) {
                        LoopAction::ContinueRedraw
                    } else {
                        LoopAction::Continue
                    }
                }
                UiEvent::Activate => {
                    let selected = list.selected_id();
                    self.chapter_list = None;
                    if let Some(id) = selected {
                        self.open(id);
                    }
                    LoopAction::ContinueRedraw
                }
                UiEvent::ToggleChapterList | UiEvent::Quit => {
                    self.chapter_list = None;
                    LoopAction::ContinueRedraw
                }
                _ => LoopAction::Continue,
            };
        }

        match event {
            UiEvent::Scroll { steps } => {
                self.scroll(steps as f32 * SCROLL_ROWS * self.geometry.cell_height);
                LoopAction::ContinueRedraw
            }
            UiEvent::ScrollScreen { screens } => {
                self.scroll(screens as f32 * self.geometry.viewport_px() * 0.9);
                LoopAction::ContinueRedraw
            }
            UiEvent::NextChapter => {
                match self.session.next_chapter() {
                    Some(id) => {
                        self.open(id);
                    }
                    None => self.message = Some("this is the latest chapter".to_string()),
                }
                LoopAction::ContinueRedraw
            }
            UiEvent::PrevChapter => {
                match self.session.prev_chapter() {
                    Some(id) => {
                        self.open(id);
                    }
                    None => self.message = Some("this is the first chapter".to_string()),
                }
                LoopAction::ContinueRedraw
            }
            UiEvent::ToggleChapterList => {
                let current = self.session.current_chapter().map(|chapter| chapter.id);
                self.chapter_list = Some(ChapterList::new(self.session.chapter_list(), current));
                LoopAction::ContinueRedraw
            }
            UiEvent::Command(command) => {
                self.session.apply(command);
                LoopAction::ContinueRedraw
            }
            UiEvent::InputSubmit { mode, text } => {
                let command = match mode {
                    InputMode::Comment => ReaderCommand::Comment {
                        text,
                        date_display: chrono::Local::now().format("%-m/%-d/%Y").to_string(),
                    },
                    InputMode::Code => ReaderCommand::RedeemCode { code: text },
                    InputMode::Normal => return LoopAction::Continue,
                };
                self.session.apply(command);
                LoopAction::ContinueRedraw
            }
            UiEvent::BeginComment
            | UiEvent::BeginCode
            | UiEvent::InputChanged { .. }
            | UiEvent::InputCancel => LoopAction::ContinueRedraw,
            UiEvent::Quit => LoopAction::Quit,
            UiEvent::Activate | UiEvent::None => LoopAction::Continue,
        }
    }

    /// Turns session events into status messages. Returns whether anything changed.
    fn absorb_events(&mut self) -> bool {
        let events = self.session.drain_events();
        let changed = !events.is_empty();
        for event in events {
            match event {
                SessionEvent::AccessUnlocked => {
                    self.message = Some("VIP access unlocked".to_string());
                }
                SessionEvent::CodeRejected => {
                    self.message = Some("that code was not recognised".to_string());
                }
                SessionEvent::CommentAdded { chapter } => {
                    let count = self.session.store().comments(chapter).len();
                    self.message = Some(format!("comment posted ({} on this chapter)", count));
                }
                SessionEvent::TrackChanged(track) => {
                    debug!(track = ?track.as_ref().map(TrackRef::as_str), "music cue");
                }
                SessionEvent::ChapterOpened { .. }
                | SessionEvent::PageChanged { .. }
                | SessionEvent::LikesChanged { .. } => {}
            }
        }
        changed
    }

    fn status(&self) -> String {
        let chapter = match self.session.current_chapter() {
            Some(chapter) => chapter,
            None => return String::from("no chapter open. press ? for the chapter list"),
        };
        let page = self
            .visible_page()
            .or_else(|| self.session.current_page())
            .unwrap_or(1);
        let music = self
            .session
            .active_track()
            .map_or("silence", TrackRef::file_name);
        format!(
            "{} | page {}/{} | ♪ {} | ♥ {} | {} comments",
            chapter.title,
            page,
            chapter.page_count(),
            music,
            self.session.likes(),
            self.session.comments().len()
        )
    }

    fn redraw(
        &mut self,
        renderer: &mut KittyRenderer<io::Stdout>,
        pending_input: Option<&str>,
    ) -> Result<()> {
        renderer.begin_sync_update()?;
        renderer.delete_image()?;
        renderer.clear_all()?;

        if let Some(list) = self.chapter_list.as_ref() {
            draw_chapter_list(renderer.writer(), list, self.geometry)?;
        } else {
            self.draw_page(renderer)?;
        }

        let mut status = self.status();
        if let Some(message) = self.message.as_deref() {
            status.push_str(" | ");
            status.push_str(message);
        }
        if let Some(pending) = pending_input.filter(|s| !s.is_empty()) {
            status.push_str(" | ");
            status.push_str(pending);
        }
        write_status_line(
            renderer.writer(),
            self.geometry.status_row(),
            self.geometry.cols as u16,
            &status,
        )?;
        renderer.end_sync_update()?;
        Ok(())
    }

    fn draw_page(&mut self, renderer: &mut KittyRenderer<io::Stdout>) -> Result<()> {
        let chapter = match self.session.current_chapter() {
            Some(chapter) => chapter,
            None => return Ok(()),
        };
        let chapter_id = chapter.id;
        let number = match self.visible_page() {
            Some(number) => number,
            None => return Ok(()),
        };
        let resource = match chapter.page(number) {
            Some(resource) => resource.clone(),
            None => return Ok(()),
        };

        let geometry = self.geometry;
        let image_rows = geometry.image_rows();
        if resource.kind == PageKind::Video {
            let text = format!("[looping clip: {}]", resource.path);
            return print_centered(
                renderer.writer(),
                geometry.cols as u16,
                (image_rows / 2) as u16,
                &text,
            );
        }

        let cached = matches!(
            &self.cached,
            Some(page) if page.chapter == chapter_id && page.page == number
        );
        if !cached {
            let path = self.assets.join(&resource.path);
            let max_width = (geometry.cols as f32 * geometry.cell_width) as u32;
            let max_height = geometry.viewport_px() as u32;
            match load_page_image(&path, max_width, max_height) {
                Ok(image) => {
                    self.cached = Some(CachedPage {
                        chapter: chapter_id,
                        page: number,
                        image,
                    });
                }
                Err(err) => {
                    warn!(?err, page = number, "failed to load page");
                    self.cached = None;
                    let text = format!("[page {} unavailable]", number);
                    return print_centered(
                        renderer.writer(),
                        geometry.cols as u16,
                        (image_rows / 2) as u16,
                        &text,
                    );
                }
            }
        }

        if let Some(page) = self.cached.as_ref() {
            let draw_cols = ((page.image.width as f32 / geometry.cell_width).round() as u32)
                .clamp(1, geometry.cols);
            let draw_rows = ((page.image.height as f32 / geometry.cell_height).round() as u32)
                .clamp(1, image_rows);
            let start_col = geometry.cols.saturating_sub(draw_cols) / 2;
            let start_row = image_rows.saturating_sub(draw_rows) / 2;
            crossterm::execute!(
                renderer.writer(),
                cursor::MoveTo(start_col as u16, start_row as u16)
            )?;
            renderer.draw(&page.image, DrawParams::clamped(draw_cols, draw_rows))?;
        }
        Ok(())
    }
}

fn run_reader(renderer: &mut KittyRenderer<io::Stdout>, reader: &mut Reader) -> Result<()> {
    let mut mapper = EventMapper::new();
    let mut dirty = true;

    loop {
        if dirty {
            let pending = mapper.pending_input();
            reader.redraw(renderer, pending.as_deref())?;
            dirty = false;
        }

        let timeout = reader
            .session
            .next_wakeup()
            .map(|due| due.saturating_duration_since(Instant::now()))
            .map_or(IDLE_POLL, |wait| wait.min(IDLE_POLL));

        if event::poll(timeout)? {
            let ev = event::read()?;
            if let Event::Resize(..) = ev {
                reader.resize()?;
                dirty = true;
            }
            let ui_event = mapper.map_event(ev);
            if matches!(ui_event, UiEvent::BeginComment | UiEvent::BeginCode) {
                reader.message = None;
            }
            match reader.handle(ui_event) {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
        }

        let layout = &reader.layout;
        if reader.session.tick(layout) {
            dirty = true;
        }
        if reader.absorb_events() {
            dirty = true;
        }
    }

    Ok(())
}

fn draw_chapter_list(writer: &mut impl Write, list: &ChapterList, geometry: Geometry) -> Result<()> {
    const TITLE: &str = "Chapters";

    let inner_width = list
        .entries
        .iter()
        .map(|entry| chapter_line(entry, false).chars().count())
        .max()
        .unwrap_or(0)
        .max(TITLE.len())
        .min(geometry.cols.saturating_sub(4) as usize);
    if inner_width < 10 {
        return Ok(());
    }

    let height = list.entries.len() as u32 + 4;
    let col = (geometry.cols.saturating_sub(inner_width as u32 + 2) / 2) as u16;
    let mut row = (geometry.image_rows().saturating_sub(height) / 2) as u16;
    let border = format!("+{}+", "-".repeat(inner_width));

    print_inverted(writer, col, row, &border)?;
    row += 1;
    print_inverted(
        writer,
        col,
        row,
        &format!("|{: ^width$}|", TITLE, width = inner_width),
    )?;
    row += 1;
    print_inverted(writer, col, row, &border)?;
    row += 1;
    for (index, entry) in list.entries.iter().enumerate() {
        let line = pad_to(chapter_line(entry, index == list.selected), inner_width);
        print_inverted(writer, col, row, &format!("|{}|", line))?;
        row += 1;
    }
    print_inverted(writer, col, row, &border)?;
    writer.flush()?;
    Ok(())
}

fn chapter_line(entry: &ChapterSummary, selected: bool) -> String {
    let marker = if selected { '>' } else { ' ' };
    let lock = if entry.readable {
        ""
    } else {
        " [VIP]"
    };
    format!(
        "{} {} ({} pages){}",
        marker, entry.title, entry.page_count, lock
    )
}

fn pad_to(text: String, width: usize) -> String {
    let mut line: String = text.chars().take(width).collect();
    let len = line.chars().count();
    line.push_str(&" ".repeat(width - len));
    line
}

fn print_inverted(writer: &mut impl Write, col: u16, row: u16, content: &str) -> Result<()> {
    crossterm::queue!(
        writer,
        cursor::MoveTo(col, row),
        SetAttribute(Attribute::Reverse),
        Print(content),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn init_logging(data_dir: &std::path::Path) -> Result<WorkerGuard> {
    let log_dir = data_dir.join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "dyingsky.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the reader, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
