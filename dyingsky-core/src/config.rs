use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use tracing::{info, instrument};

use crate::cue::{CueEntry, CueTable};
use crate::ChapterId;

const BUILTIN_SITE: &str = include_str!("../assets/site.toml");

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chapter ids must be positive")]
    ZeroChapterId,
    #[error("chapter {0} is defined more than once")]
    DuplicateChapter(ChapterId),
    #[error("chapter {0} has no pages")]
    EmptyChapter(ChapterId),
    #[error("cue sheet refers to unknown chapter {0}")]
    UnknownCueChapter(ChapterId),
    #[error("chapter {chapter}: cue range [{start}, {end}] is invalid")]
    InvalidCueRange {
        chapter: ChapterId,
        start: u32,
        end: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Image,
    /// Short looping clip shown in place of a still page.
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResource {
    pub number: u32,
    pub path: String,
    pub kind: PageKind,
}

impl PageResource {
    fn new(number: u32, path: String) -> Self {
        let kind = match Path::new(&path).extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mp4") || ext.eq_ignore_ascii_case("webm") => {
                PageKind::Video
            }
            _ => PageKind::Image,
        };
        Self { number, path, kind }
    }
}

#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    pub locked: bool,
    pages: Vec<PageResource>,
}

impl Chapter {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn pages(&self) -> &[PageResource] {
        &self.pages
    }

    /// 1-based page lookup.
    pub fn page(&self, number: u32) -> Option<&PageResource> {
        number
            .checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub fade_ms: u64,
    pub tick_ms: u64,
}

impl AudioSettings {
    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            fade_ms: 1500,
            tick_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    pub debounce_ms: u64,
    /// Vertical space between stacked pages, in layout units.
    pub page_gap: f32,
}

impl ReaderSettings {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            page_gap: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawChapter {
    id: ChapterId,
    title: String,
    #[serde(default)]
    locked: bool,
    page_count: Option<u32>,
    pages: Option<Vec<String>>,
    #[serde(default)]
    clips: Vec<u32>,
}

impl RawChapter {
    fn into_chapter(self) -> Result<Chapter, ConfigError> {
        if self.id == 0 {
            return Err(ConfigError::ZeroChapterId);
        }
        let paths = match self.pages {
            Some(paths) => paths,
            None => {
                let clips: HashSet<u32> = self.clips.into_iter().collect();
                (1..=self.page_count.unwrap_or(0))
                    .map(|n| {
                        let ext = if clips.contains(&n) { "mp4" } else { "png" };
                        format!("images-chapter{}/{}.{}", self.id, n, ext)
                    })
                    .collect()
            }
        };
        if paths.is_empty() {
            return Err(ConfigError::EmptyChapter(self.id));
        }
        let pages = paths
            .into_iter()
            .zip(1u32..)
            .map(|(path, number)| PageResource::new(number, path))
            .collect();
        Ok(Chapter {
            id: self.id,
            title: self.title,
            locked: self.locked,
            pages,
        })
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct RawSiteConfig {
    title: String,
    #[serde(default)]
    vip_codes: Vec<String>,
    #[serde(default)]
    audio: AudioSettings,
    #[serde(default)]
    reader: ReaderSettings,
    chapters: Vec<RawChapter>,
    #[serde_as(as = "HashMap<DisplayFromStr, _>")]
    #[serde(default)]
    cues: HashMap<ChapterId, Vec<CueEntry>>,
}

/// Immutable site configuration, loaded once and shared by reference.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub title: String,
    pub vip_codes: Vec<String>,
    pub audio: AudioSettings,
    pub reader: ReaderSettings,
    chapters: Vec<Chapter>,
    cues: CueTable,
}

impl SiteConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawSiteConfig = toml::from_str(text).context("failed to parse site config")?;
        Ok(Self::from_raw(raw)?)
    }

    /// The published chapters and music cues.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_SITE)
    }

    #[instrument(skip(source))]
    pub async fn load(source: &dyn ConfigSource) -> Result<Arc<Self>> {
        let text = source.read().await?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("invalid configuration from {}", source.describe()))?;
        info!(
            chapters = config.chapters.len(),
            source = %source.describe(),
            "site configuration loaded"
        );
        Ok(Arc::new(config))
    }

    fn from_raw(raw: RawSiteConfig) -> Result<Self, ConfigError> {
        let mut chapters = Vec::with_capacity(raw.chapters.len());
        let mut seen = HashSet::new();
        for raw_chapter in raw.chapters {
            let chapter = raw_chapter.into_chapter()?;
            if !seen.insert(chapter.id) {
                return Err(ConfigError::DuplicateChapter(chapter.id));
            }
            chapters.push(chapter);
        }
        chapters.sort_by_key(|chapter| chapter.id);

        for (chapter, entries) in &raw.cues {
            if !seen.contains(chapter) {
                return Err(ConfigError::UnknownCueChapter(*chapter));
            }
            if let Some(bad) = entries.iter().find(|entry| !entry.pages.is_valid()) {
                return Err(ConfigError::InvalidCueRange {
                    chapter: *chapter,
                    start: bad.pages.start,
                    end: bad.pages.end,
                });
            }
        }

        Ok(Self {
            title: raw.title,
            vip_codes: raw.vip_codes,
            audio: raw.audio,
            reader: raw.reader,
            chapters,
            cues: CueTable::new(raw.cues),
        })
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter(&self, id: ChapterId) -> Option<&Chapter> {
        self.chapters.iter().find(|chapter| chapter.id == id)
    }

    pub fn first_chapter(&self) -> Option<&Chapter> {
        self.chapters.first()
    }

    pub fn next_chapter(&self, id: ChapterId) -> Option<&Chapter> {
        self.chapters.iter().find(|chapter| chapter.id > id)
    }

    pub fn prev_chapter(&self, id: ChapterId) -> Option<&Chapter> {
        self.chapters.iter().rev().find(|chapter| chapter.id < id)
    }

    pub fn cues(&self) -> &CueTable {
        &self.cues
    }
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn read(&self) -> Result<String>;
    fn describe(&self) -> String;
}

pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn read(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read config file {:?}", self.path))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinConfigSource;

#[async_trait]
impl ConfigSource for BuiltinConfigSource {
    async fn read(&self) -> Result<String> {
        Ok(BUILTIN_SITE.to_string())
    }

    fn describe(&self) -> String {
        "built-in".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::TrackRef;

    use tempfile::tempdir;

    fn parse_err(text: &str) -> ConfigError {
        let err = SiteConfig::from_toml_str(text).unwrap_err();
        err.downcast::<ConfigError>().unwrap()
    }

    #[test]
    fn builtin_config_is_valid() {
        let config = SiteConfig::builtin().unwrap();
        assert_eq!(config.title, "Beneath the Light of a Dying Sky");
        assert!(!config.chapters().is_empty());
        for chapter in config.chapters() {
            assert!(chapter.page_count() >= 1);
        }
        assert_eq!(
            config.cues().resolve_track(1, 0),
            Some(&TrackRef::new("music/Wasteland.mp3"))
        );
        assert_eq!(
            config.cues().resolve_track(2, 36),
            Some(&TrackRef::new("music/Park.mp3"))
        );
        assert_eq!(config.cues().resolve_track(3, 20), None);
    }

    #[test]
    fn generated_pages_follow_chapter_pattern() {
        let config = SiteConfig::from_toml_str(
            r#"
            title = "t"
            [[chapters]]
            id = 7
            title = "Seven"
            page_count = 3
            clips = [2]
            "#,
        )
        .unwrap();
        let chapter = config.chapter(7).unwrap();
        assert_eq!(chapter.page_count(), 3);
        assert_eq!(chapter.page(1).unwrap().path, "images-chapter7/1.png");
        assert_eq!(chapter.page(2).unwrap().path, "images-chapter7/2.mp4");
        assert_eq!(chapter.page(2).unwrap().kind, PageKind::Video);
        assert!(chapter.page(0).is_none());
        assert!(chapter.page(4).is_none());
    }

    #[test]
    fn explicit_page_list_wins_over_count() {
        let config = SiteConfig::from_toml_str(
            r#"
            title = "t"
            [[chapters]]
            id = 1
            title = "One"
            page_count = 10
            pages = ["a/cover.png", "a/loop.mp4"]
            "#,
        )
        .unwrap();
        let chapter = config.chapter(1).unwrap();
        assert_eq!(chapter.page_count(), 2);
        assert_eq!(chapter.page(2).unwrap().kind, PageKind::Video);
    }

    #[test]
    fn chapters_are_ordered_for_navigation() {
        let config = SiteConfig::from_toml_str(
            r#"
            title = "t"
            [[chapters]]
            id = 3
            title = "Three"
            page_count = 1
            [[chapters]]
            id = 1
            title = "One"
            page_count = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.first_chapter().unwrap().id, 1);
        assert_eq!(config.next_chapter(1).unwrap().id, 3);
        assert_eq!(config.prev_chapter(3).unwrap().id, 1);
        assert!(config.next_chapter(3).is_none());
        assert!(config.prev_chapter(1).is_none());
    }

    #[test]
    fn rejects_empty_chapter() {
        let err = parse_err(
            r#"
            title = "t"
            [[chapters]]
            id = 1
            title = "One"
            "#,
        );
        assert_eq!(err, ConfigError::EmptyChapter(1));
    }

    #[test]
    fn rejects_duplicate_and_zero_ids() {
        let err = parse_err(
            r#"
            title = "t"
            [[chapters]]
            id = 1
            title = "One"
            page_count = 1
            [[chapters]]
            id = 1
            title = "Again"
            page_count = 1
            "#,
        );
        assert_eq!(err, ConfigError::DuplicateChapter(1));

        let err = parse_err(
            r#"
            title = "t"
            [[chapters]]
            id = 0
            title = "Zero"
            page_count = 1
            "#,
        );
        assert_eq!(err, ConfigError::ZeroChapterId);
    }

    #[test]
    fn rejects_bad_cue_sheets() {
        let err = parse_err(
            r#"
            title = "t"
            [[chapters]]
            id = 1
            title = "One"
            page_count = 5
            [cues]
            1 = [{ track = "a.mp3", pages = [4, 2] }]
            "#,
        );
        assert_eq!(
            err,
            ConfigError::InvalidCueRange {
                chapter: 1,
                start: 4,
                end: 2
            }
        );

        let err = parse_err(
            r#"
            title = "t"
            [[chapters]]
            id = 1
            title = "One"
            page_count = 5
            [cues]
            9 = [{ track = "a.mp3", pages = [1, 2] }]
            "#,
        );
        assert_eq!(err, ConfigError::UnknownCueChapter(9));
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let config = SiteConfig::from_toml_str(
            r#"
            title = "t"
            [audio]
            fade_ms = 800
            [[chapters]]
            id = 1
            title = "One"
            page_count = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.audio.fade_duration(), Duration::from_millis(800));
        assert_eq!(config.audio.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.reader.debounce_interval(), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn loads_from_file_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(
            &path,
            r#"
            title = "From disk"
            [[chapters]]
            id = 1
            title = "One"
            page_count = 4
            "#,
        )
        .unwrap();

        let config = SiteConfig::load(&FileConfigSource::new(path)).await.unwrap();
        assert_eq!(config.title, "From disk");
        assert_eq!(config.chapter(1).unwrap().page_count(), 4);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let source = FileConfigSource::new(dir.path().join("absent.toml"));
        assert!(SiteConfig::load(&source).await.is_err());
    }

    #[tokio::test]
    async fn builtin_source_loads() {
        let config = SiteConfig::load(&BuiltinConfigSource).await.unwrap();
        assert!(config.chapter(1).is_some());
    }
}
