use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::access::VipAccess;
use crate::audio::{AudioBackend, CrossfadeController, CrossfadeState};
use crate::clock::Clock;
use crate::config::{Chapter, SiteConfig};
use crate::cue::TrackRef;
use crate::store::{Comment, ReaderStore};
use crate::tracker::{PageTracker, PageUpdate, ViewportObserver};
use crate::ChapterId;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error("chapter {0} was not found")]
    ChapterNotFound(ChapterId),
    #[error("chapter {0} is locked")]
    ChapterLocked(ChapterId),
}

#[derive(Debug, Clone)]
pub enum ReaderCommand {
    Like,
    Comment { text: String, date_display: String },
    RedeemCode { code: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ChapterOpened { chapter: ChapterId, page: u32 },
    PageChanged { chapter: ChapterId, page: u32 },
    TrackChanged(Option<TrackRef>),
    LikesChanged { chapter: ChapterId, count: u64 },
    CommentAdded { chapter: ChapterId },
    AccessUnlocked,
    CodeRejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSummary {
    pub id: ChapterId,
    pub title: String,
    pub page_count: u32,
    pub locked: bool,
    pub readable: bool,
}

/// One reader: the open chapter, its page tracker, the music and the persisted state.
pub struct ReaderSession {
    config: Arc<SiteConfig>,
    store: ReaderStore,
    access: VipAccess,
    audio: CrossfadeController,
    clock: Arc<dyn Clock>,
    tracker: Option<PageTracker>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl ReaderSession {
    pub fn new(
        config: Arc<SiteConfig>,
        store: ReaderStore,
        audio_backend: Arc<dyn AudioBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let access = VipAccess::from_config(&config);
        let audio = CrossfadeController::new(audio_backend, Arc::clone(&clock), &config.audio);
        Self {
            config,
            store,
            access,
            audio,
            clock,
            tracker: None,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn store(&self) -> &ReaderStore {
        &self.store
    }

    pub fn drain_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Last chapter read if it still exists, otherwise the first one.
    pub fn start_chapter(&self) -> Option<ChapterId> {
        self.store
            .last_read_chapter()
            .and_then(|id| self.config.chapter(id))
            .or_else(|| self.config.first_chapter())
            .map(|chapter| chapter.id)
    }

    pub fn chapter_list(&self) -> Vec<ChapterSummary> {
        self.config
            .chapters()
            .iter()
            .map(|chapter| ChapterSummary {
                id: chapter.id,
                title: chapter.title.clone(),
                page_count: chapter.page_count(),
                locked: chapter.locked,
                readable: self.access.can_read(chapter, &self.store),
            })
            .collect()
    }

    #[instrument(skip(self, observer))]
    pub fn open_chapter(
        &mut self,
        id: ChapterId,
        observer: &mut dyn ViewportObserver,
    ) -> Result<(), ReaderError> {
        let chapter = self
            .config
            .chapter(id)
            .ok_or(ReaderError::ChapterNotFound(id))?;
        if !self.access.can_read(chapter, &self.store) {
            return Err(ReaderError::ChapterLocked(id));
        }

        let mut tracker = PageTracker::new(chapter, self.config.reader.debounce_interval());
        self.flush_position();
        let page = tracker.mount(observer, &self.store);
        self.tracker = Some(tracker);
        self.store.set_last_read_chapter(id);
        info!(chapter = id, page, "chapter opened");
        self.events
            .lock()
            .push(SessionEvent::ChapterOpened { chapter: id, page });
        self.sync_audio(id, page);
        Ok(())
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        let tracker = self.tracker.as_ref()?;
        self.config.chapter(tracker.chapter())
    }

    pub fn current_page(&self) -> Option<u32> {
        self.tracker.as_ref().map(PageTracker::current_page)
    }

    pub fn next_chapter(&self) -> Option<ChapterId> {
        let current = self.tracker.as_ref()?.chapter();
        self.config.next_chapter(current).map(|chapter| chapter.id)
    }

    pub fn prev_chapter(&self) -> Option<ChapterId> {
        let current = self.tracker.as_ref()?.chapter();
        self.config.prev_chapter(current).map(|chapter| chapter.id)
    }

    /// The track currently playing or fading in.
    pub fn active_track(&self) -> Option<&TrackRef> {
        self.audio.target()
    }

    pub fn audio_state(&self) -> CrossfadeState {
        self.audio.state()
    }

    pub fn likes(&self) -> u64 {
        self.tracker
            .as_ref()
            .map_or(0, |tracker| self.store.likes(tracker.chapter()))
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.tracker
            .as_ref()
            .map(|tracker| self.store.comments(tracker.chapter()))
            .unwrap_or_default()
    }

    pub fn is_unlocked(&self) -> bool {
        self.access.is_unlocked(&self.store)
    }

    pub fn on_scroll(&mut self, offset: f32) {
        let now = self.clock.now();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.on_scroll(offset, now);
        }
    }

    /// Runs whatever is due: a debounced page update and the next crossfade
    /// sample. Returns whether the page or the track changed.
    pub fn tick(&mut self, observer: &dyn ViewportObserver) -> bool {
        let now = self.clock.now();
        let mut changed = false;

        let polled = self.tracker.as_mut().and_then(|tracker| {
            let before = tracker.current_page();
            tracker.poll(now, observer).map(|update| (before, update))
        });
        if let Some((before, update)) = polled {
            self.persist(&update);
            if update.page != before {
                debug!(chapter = update.chapter, page = update.page, "page changed");
                self.events.lock().push(SessionEvent::PageChanged {
                    chapter: update.chapter,
                    page: update.page,
                });
                changed = true;
            }
            changed |= self.sync_audio(update.chapter, update.page);
        }

        self.audio.tick();
        changed
    }

    /// Earliest instant at which [`ReaderSession::tick`] has work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let tracker_due = self.tracker.as_ref().and_then(PageTracker::next_due);
        match (tracker_due, self.audio.next_tick_at()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn apply(&mut self, command: ReaderCommand) {
        match command {
            ReaderCommand::Like => {
                if let Some(chapter) = self.tracker.as_ref().map(PageTracker::chapter) {
                    let count = self.store.add_like(chapter);
                    self.events
                        .lock()
                        .push(SessionEvent::LikesChanged { chapter, count });
                }
            }
            ReaderCommand::Comment { text, date_display } => {
                if let Some(chapter) = self.tracker.as_ref().map(PageTracker::chapter) {
                    if self
                        .store
                        .add_comment(chapter, &text, &date_display)
                        .is_some()
                    {
                        self.events
                            .lock()
                            .push(SessionEvent::CommentAdded { chapter });
                    }
                }
            }
            ReaderCommand::RedeemCode { code } => {
                let event = if self.access.redeem(&self.store, &code) {
                    SessionEvent::AccessUnlocked
                } else {
                    SessionEvent::CodeRejected
                };
                self.events.lock().push(event);
            }
        }
    }

    /// Saves any scroll still inside its debounce window, then stops audio immediately.
    pub fn close(&mut self) {
        self.flush_position();
        self.audio.shutdown();
        self.tracker = None;
    }

    fn persist(&self, update: &PageUpdate) {
        self.store
            .save_scroll_position(update.chapter, update.scroll_offset);
        self.store.set_last_read_chapter(update.chapter);
    }

    fn flush_position(&mut self) {
        if let Some(update) = self.tracker.as_mut().and_then(PageTracker::flush) {
            debug!(chapter = update.chapter, offset = update.scroll_offset, "flushing scroll position");
            self.persist(&update);
        }
    }

    fn sync_audio(&mut self, chapter: ChapterId, page: u32) -> bool {
        let before = self.audio.target().cloned();
        let track = self.config.cues().resolve_track(chapter, page);
        self.audio.set_target(track);
        let after = self.audio.target().cloned();
        if before == after {
            return false;
        }
        self.events.lock().push(SessionEvent::TrackChanged(after));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioChannel;
    use crate::clock::ManualClock;
    use crate::store::keys;
    use crate::tracker::tests::{viewport, FakeViewport};

    use anyhow::Result;

    struct MutedChannel;

    impl AudioChannel for MutedChannel {
        fn set_volume(&mut self, _volume: f32) {}
        fn stop(&mut self) {}
    }

    struct MutedBackend;

    impl AudioBackend for MutedBackend {
        fn open(&self, _track: &TrackRef) -> Result<Box<dyn AudioChannel>> {
            Ok(Box::new(MutedChannel))
        }
    }

    fn session_with(store: ReaderStore) -> (ReaderSession, Arc<ManualClock>) {
        let config = Arc::new(SiteConfig::builtin().unwrap());
        let clock = Arc::new(ManualClock::new());
        let session = ReaderSession::new(config, store, Arc::new(MutedBackend), clock.clone());
        (session, clock)
    }

    fn scroll_to(session: &mut ReaderSession, view: &mut FakeViewport, offset: f32) {
        view.offset = offset;
        session.on_scroll(offset);
    }

    fn track_name(session: &ReaderSession) -> Option<&str> {
        session.active_track().map(TrackRef::file_name)
    }

    #[test]
    fn unknown_chapters_are_not_found() {
        let (mut session, _) = session_with(ReaderStore::in_memory());
        let mut view = viewport(5);
        assert_eq!(
            session.open_chapter(99, &mut view),
            Err(ReaderError::ChapterNotFound(99))
        );
        assert_eq!(
            session.open_chapter(0, &mut view),
            Err(ReaderError::ChapterNotFound(0))
        );
        assert!(session.current_chapter().is_none());
    }

    #[test]
    fn locked_chapter_opens_after_redeeming_code() {
        let (mut session, _) = session_with(ReaderStore::in_memory());
        let mut view = viewport(30);
        assert_eq!(
            session.open_chapter(4, &mut view),
            Err(ReaderError::ChapterLocked(4))
        );

        session.apply(ReaderCommand::RedeemCode {
            code: "nope".into(),
        });
        let code = session.config().vip_codes[0].clone();
        session.apply(ReaderCommand::RedeemCode { code });
        assert_eq!(
            session.drain_events(),
            vec![SessionEvent::CodeRejected, SessionEvent::AccessUnlocked]
        );
        assert!(session.is_unlocked());
        assert!(session.open_chapter(4, &mut view).is_ok());
    }

    #[test]
    fn opening_a_chapter_starts_its_music() {
        let (mut session, _) = session_with(ReaderStore::in_memory());
        let mut view = viewport(25);
        session.open_chapter(1, &mut view).unwrap();

        assert_eq!(session.current_page(), Some(1));
        assert_eq!(track_name(&session), Some("Wasteland.mp3"));
        assert_eq!(session.store().last_read_chapter(), Some(1));
        assert_eq!(
            session.drain_events(),
            vec![
                SessionEvent::ChapterOpened {
                    chapter: 1,
                    page: 1
                },
                SessionEvent::TrackChanged(Some(TrackRef::new("music/Wasteland.mp3"))),
            ]
        );
    }

    #[test]
    fn restored_position_picks_first_overlapping_cue() {
        let store = ReaderStore::in_memory();
        store.save_scroll_position(2, 3500.0);
        let (mut session, _) = session_with(store);
        let mut view = viewport(39);

        session.open_chapter(2, &mut view).unwrap();
        assert_eq!(view.offset, 3500.0);
        assert_eq!(session.current_page(), Some(36));
        assert_eq!(track_name(&session), Some("Park.mp3"));
    }

    #[test]
    fn debounced_scroll_updates_page_music_and_store() {
        let (mut session, clock) = session_with(ReaderStore::in_memory());
        let mut view = viewport(25);
        session.open_chapter(1, &mut view).unwrap();
        session.drain_events();

        for offset in [400.0, 900.0, 1300.0] {
            scroll_to(&mut session, &mut view, offset);
            clock.advance_ms(20);
        }
        assert!(!session.tick(&view));
        assert_eq!(session.current_page(), Some(1));
        assert_eq!(session.store().scroll_position(1), None);

        clock.advance_ms(100);
        assert!(session.tick(&view));
        assert_eq!(session.current_page(), Some(14));
        assert_eq!(track_name(&session), Some("Embers.mp3"));
        assert_eq!(session.store().scroll_position(1), Some(1300.0));
        assert_eq!(
            session.drain_events(),
            vec![
                SessionEvent::PageChanged {
                    chapter: 1,
                    page: 14
                },
                SessionEvent::TrackChanged(Some(TrackRef::new("music/Embers.mp3"))),
            ]
        );
    }

    #[test]
    fn pages_beyond_every_cue_fall_silent() {
        let (mut session, clock) = session_with(ReaderStore::in_memory());
        let mut view = viewport(20);
        session.open_chapter(3, &mut view).unwrap();
        assert_eq!(track_name(&session), Some("Hollow.mp3"));

        scroll_to(&mut session, &mut view, 1900.0);
        clock.advance_ms(150);
        session.tick(&view);
        assert_eq!(session.current_page(), Some(20));
        assert_eq!(session.active_track(), None);

        clock.advance_ms(2000);
        session.tick(&view);
        assert_eq!(session.audio_state().active_track, None);
    }

    #[test]
    fn scrolling_within_a_cue_keeps_the_track() {
        let (mut session, clock) = session_with(ReaderStore::in_memory());
        let mut view = viewport(25);
        session.open_chapter(1, &mut view).unwrap();
        session.drain_events();

        scroll_to(&mut session, &mut view, 500.0);
        clock.advance_ms(150);
        assert!(session.tick(&view));
        assert_eq!(
            session.drain_events(),
            vec![SessionEvent::PageChanged {
                chapter: 1,
                page: 6
            }]
        );
    }

    #[test]
    fn likes_and_comments_are_per_chapter() {
        let (mut session, _) = session_with(ReaderStore::in_memory());
        let mut view = viewport(25);
        session.apply(ReaderCommand::Like);
        assert!(session.drain_events().is_empty());

        session.open_chapter(1, &mut view).unwrap();
        session.drain_events();
        session.apply(ReaderCommand::Like);
        session.apply(ReaderCommand::Like);
        session.apply(ReaderCommand::Comment {
            text: "that ending".into(),
            date_display: "6/1/2025".into(),
        });
        session.apply(ReaderCommand::Comment {
            text: " ".into(),
            date_display: "6/1/2025".into(),
        });

        assert_eq!(session.likes(), 2);
        assert_eq!(session.comments().len(), 1);
        assert_eq!(session.store().get(&keys::likes(1)).as_deref(), Some("2"));
        assert_eq!(
            session.drain_events(),
            vec![
                SessionEvent::LikesChanged {
                    chapter: 1,
                    count: 1
                },
                SessionEvent::LikesChanged {
                    chapter: 1,
                    count: 2
                },
                SessionEvent::CommentAdded { chapter: 1 },
            ]
        );

        let mut other = viewport(39);
        session.open_chapter(2, &mut other).unwrap();
        assert_eq!(session.likes(), 0);
        assert!(session.comments().is_empty());
    }

    #[test]
    fn start_chapter_prefers_last_read() {
        let store = ReaderStore::in_memory();
        let (session, _) = session_with(store.clone());
        assert_eq!(session.start_chapter(), Some(1));

        store.set_last_read_chapter(3);
        assert_eq!(session.start_chapter(), Some(3));

        store.set_last_read_chapter(77);
        assert_eq!(session.start_chapter(), Some(1));
    }

    #[test]
    fn chapter_list_reports_readability() {
        let (session, _) = session_with(ReaderStore::in_memory());
        let list = session.chapter_list();
        assert_eq!(list.len(), 4);
        assert!(list[0].readable);
        let locked = list.iter().find(|c| c.locked).unwrap();
        assert!(!locked.readable);
    }

    #[test]
    fn chapter_navigation_follows_config_order() {
        let (mut session, _) = session_with(ReaderStore::in_memory());
        assert_eq!(session.next_chapter(), None);
        let mut view = viewport(39);
        session.open_chapter(2, &mut view).unwrap();
        assert_eq!(session.next_chapter(), Some(3));
        assert_eq!(session.prev_chapter(), Some(1));
    }

    #[test]
    fn switching_chapter_saves_scroll_still_waiting_on_debounce() {
        let (mut session, clock) = session_with(ReaderStore::in_memory());
        let mut first = viewport(25);
        session.open_chapter(1, &mut first).unwrap();

        scroll_to(&mut session, &mut first, 1300.0);
        clock.advance_ms(50);
        session.tick(&first);
        assert_eq!(session.store().scroll_position(1), None);

        let mut second = viewport(39);
        session.open_chapter(2, &mut second).unwrap();
        assert_eq!(session.store().scroll_position(1), Some(1300.0));
        assert_eq!(session.store().scroll_position(2), None);
        assert_eq!(session.store().last_read_chapter(), Some(2));
    }

    #[test]
    fn close_saves_scroll_still_waiting_on_debounce() {
        let (mut session, clock) = session_with(ReaderStore::in_memory());
        let mut view = viewport(25);
        session.open_chapter(1, &mut view).unwrap();

        scroll_to(&mut session, &mut view, 900.0);
        clock.advance_ms(50);
        session.close();
        assert_eq!(session.store().scroll_position(1), Some(900.0));
        assert_eq!(session.store().last_read_chapter(), Some(1));
        assert!(session.current_chapter().is_none());

        session.close();
        assert_eq!(session.store().scroll_position(1), Some(900.0));
    }

    #[test]
    fn next_wakeup_covers_debounce_and_fade() {
        let (mut session, clock) = session_with(ReaderStore::in_memory());
        assert_eq!(session.next_wakeup(), None);

        let mut view = viewport(25);
        session.open_chapter(1, &mut view).unwrap();
        let fade_tick = session.next_wakeup().unwrap();
        assert!(fade_tick > clock.now());

        clock.advance_ms(5000);
        session.tick(&view);
        assert_eq!(session.next_wakeup(), None);

        scroll_to(&mut session, &mut view, 100.0);
        assert!(session.next_wakeup().is_some());
    }
}
