//! Reader core for "Beneath the Light of a Dying Sky": chapter configuration,
//! music cues with crossfading, page tracking and locally persisted reader state.

mod access;
mod audio;
mod clock;
mod config;
mod cue;
mod intro;
mod session;
mod store;
mod tracker;

pub type ChapterId = u32;

pub use access::VipAccess;
pub use audio::{AudioBackend, AudioChannel, CrossfadeController, CrossfadeState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AudioSettings, BuiltinConfigSource, Chapter, ConfigError, ConfigSource, FileConfigSource,
    PageKind, PageResource, ReaderSettings, SiteConfig,
};
pub use cue::{CueEntry, CueTable, PageRange, TrackRef};
pub use intro::{IntroPhase, IntroSequence, IntroTimings};
pub use session::{ChapterSummary, ReaderCommand, ReaderError, ReaderSession, SessionEvent};
pub use store::{keys, Comment, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, ReaderStore};
pub use tracker::{
    dominant_element, ElementExtent, PageTracker, PageUpdate, ViewportObserver, PAGE_ELEMENTS,
};
