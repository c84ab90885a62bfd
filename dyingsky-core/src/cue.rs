use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ChapterId;

/// Opaque reference to a background track, usually a path under the assets root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackRef(String);

impl TrackRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path component, for status lines.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive, 1-based page span. Written as `[start, end]` in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, page: u32) -> bool {
        self.start <= page && page <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 1 && self.start <= self.end
    }
}

impl From<[u32; 2]> for PageRange {
    fn from([start, end]: [u32; 2]) -> Self {
        Self { start, end }
    }
}

impl From<PageRange> for [u32; 2] {
    fn from(range: PageRange) -> Self {
        [range.start, range.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueEntry {
    pub track: TrackRef,
    pub pages: PageRange,
}

impl CueEntry {
    pub fn new(track: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            track: TrackRef::new(track),
            pages: PageRange::new(start, end),
        }
    }
}

/// Per-chapter music cues. Built once from configuration and never mutated.
#[derive(Debug, Clone, Default)]
pub struct CueTable {
    sheets: HashMap<ChapterId, Vec<CueEntry>>,
}

impl CueTable {
    pub fn new(sheets: HashMap<ChapterId, Vec<CueEntry>>) -> Self {
        Self { sheets }
    }

    /// Cue entries for `chapter` in table order; empty when the chapter is silent.
    pub fn lookup(&self, chapter: ChapterId) -> &[CueEntry] {
        self.sheets.get(&chapter).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Track of the first entry, in table order, whose range contains `page`.
    ///
    /// Pages below 1 are treated as page 1. Overlapping ranges resolve to the
    /// earlier entry; a page no entry covers resolves to silence.
    pub fn resolve_track(&self, chapter: ChapterId, page: u32) -> Option<&TrackRef> {
        let page = page.max(1);
        self.lookup(chapter)
            .iter()
            .find(|entry| entry.pages.contains(page))
            .map(|entry| &entry.track)
    }
}
