use std::io::Write;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
};
use dyingsky_core::ReaderCommand;
use dyingsky_render::PageImage;
use png::{BitDepth, ColorType, Encoder};

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `image` as PNG and places it over `params` cells at the cursor.
    pub fn draw(&mut self, image: &PageImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    u8::from(more)
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", u8::from(more))?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes the placed page image, e.g. before drawing a text-only screen.
    pub fn delete_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=i,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Writes `text` in reverse video across row `row`, truncated to `width` columns.
pub fn write_status_line(writer: &mut impl Write, row: u16, width: u16, text: &str) -> Result<()> {
    let mut line: String = text.chars().take(width as usize).collect();
    let pad = (width as usize).saturating_sub(line.chars().count());
    line.extend(std::iter::repeat(' ').take(pad));
    crossterm::queue!(
        writer,
        cursor::MoveTo(0, row),
        Clear(ClearType::CurrentLine),
        SetAttribute(Attribute::Reverse),
        Print(line),
        SetAttribute(Attribute::Reset)
    )?;
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(ReaderCommand),
    Scroll { steps: i32 },
    ScrollScreen { screens: i32 },
    NextChapter,
    PrevChapter,
    ToggleChapterList,
    Activate,
    BeginComment,
    BeginCode,
    InputChanged { text: String },
    InputSubmit { mode: InputMode, text: String },
    InputCancel,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Comment,
    Code,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    input: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.input.clear();
        }
        self.mode = mode;
        self.reset_count();
    }

    /// What the user has typed so far, for the status line.
    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Comment => Some(format!("comment: {}", self.input)),
            InputMode::Code => Some(format!("vip code: {}", "*".repeat(self.input.chars().count()))),
            InputMode::Normal if !self.pending_digits.is_empty() => {
                Some(self.pending_digits.clone())
            }
            InputMode::Normal => None,
        }
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => match self.mode {
                InputMode::Normal => self.map_normal(key),
                InputMode::Comment | InputMode::Code => self.map_input(key),
            },
            _ => UiEvent::None,
        }
    }

    fn map_normal(&mut self, key: KeyEvent) -> UiEvent {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            self.reset_count();
            return match key.code {
                KeyCode::Char('c') => UiEvent::Quit,
                KeyCode::Char('d') => UiEvent::ScrollScreen { screens: 1 },
                KeyCode::Char('u') => UiEvent::ScrollScreen { screens: -1 },
                _ => UiEvent::None,
            };
        }

        if let KeyCode::Char(ch) = key.code {
            if let Some(digit) = ch.to_digit(10) {
                if digit != 0 || self.pending_count.is_some() {
                    let next = self
                        .pending_count
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit as usize);
                    self.pending_count = Some(next);
                    self.pending_digits.push(ch);
                    return UiEvent::None;
                }
            }
        }

        let count = self.take_count() as i32;
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => UiEvent::Scroll { steps: count },
            KeyCode::Char('k') | KeyCode::Up => UiEvent::Scroll { steps: -count },
            KeyCode::Char(' ') | KeyCode::PageDown => UiEvent::ScrollScreen { screens: count },
            KeyCode::Char('b') | KeyCode::PageUp => UiEvent::ScrollScreen { screens: -count },
            KeyCode::Char('n') | KeyCode::Right => UiEvent::NextChapter,
            KeyCode::Char('p') | KeyCode::Left => UiEvent::PrevChapter,
            KeyCode::Char('L') => UiEvent::Command(ReaderCommand::Like),
            KeyCode::Char('c') => {
                self.set_mode(InputMode::Comment);
                UiEvent::BeginComment
            }
            KeyCode::Char('v') => {
                self.set_mode(InputMode::Code);
                UiEvent::BeginCode
            }
            KeyCode::Char('?') => UiEvent::ToggleChapterList,
            KeyCode::Enter => UiEvent::Activate,
            KeyCode::Char('q') | KeyCode::Esc => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn map_input(&mut self, key: KeyEvent) -> UiEvent {
        match key.code {
            KeyCode::Esc => {
                self.set_mode(InputMode::Normal);
                UiEvent::InputCancel
            }
            KeyCode::Enter => {
                let mode = self.mode;
                let text = std::mem::take(&mut self.input);
                self.set_mode(InputMode::Normal);
                UiEvent::InputSubmit { mode, text }
            }
            KeyCode::Backspace => {
                self.input.pop();
                UiEvent::InputChanged {
                    text: self.input.clone(),
                }
            }
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.push(ch);
                UiEvent::InputChanged {
                    text: self.input.clone(),
                }
            }
            _ => UiEvent::None,
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self.pending_count.unwrap_or(1).max(1);
        self.reset_count();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }
}
