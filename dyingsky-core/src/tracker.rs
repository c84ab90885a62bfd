use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::Chapter;
use crate::store::ReaderStore;
use crate::ChapterId;

/// Element set name under which reader pages are reported.
pub const PAGE_ELEMENTS: &str = "reader-pages";

/// Vertical extent of one element, relative to the top of the viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementExtent {
    pub top: f32,
    pub height: f32,
}

impl ElementExtent {
    pub fn visible_height(&self, viewport_height: f32) -> f32 {
        let top = self.top.max(0.0);
        let bottom = (self.top + self.height).min(viewport_height);
        (bottom - top).max(0.0)
    }
}

/// Layout capability the tracker reads positions from.
pub trait ViewportObserver {
    /// Extents of every element in `element_set`, in document order.
    fn report_extents(&self, element_set: &str) -> Vec<ElementExtent>;
    fn viewport_height(&self) -> f32;
    fn scroll_to(&mut self, offset: f32);
}

/// 1-based index of the element covering the most of the viewport.
/// Ties go to the earlier element; `None` when nothing is visible.
pub fn dominant_element(extents: &[ElementExtent], viewport_height: f32) -> Option<u32> {
    let mut best: Option<(u32, f32)> = None;
    for (index, extent) in extents.iter().enumerate() {
        let visible = extent.visible_height(viewport_height);
        if visible <= 0.0 {
            continue;
        }
        if best.map_or(true, |(_, seen)| visible > seen) {
            best = Some((index as u32 + 1, visible));
        }
    }
    best.map(|(page, _)| page)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageUpdate {
    pub chapter: ChapterId,
    pub page: u32,
    pub scroll_offset: f32,
}

#[derive(Debug, Clone, Copy)]
struct PendingScroll {
    due: Instant,
    offset: f32,
}

/// Derives the current page from scroll events, at most once per debounce interval.
pub struct PageTracker {
    chapter: ChapterId,
    page_count: u32,
    debounce: Duration,
    pending: Option<PendingScroll>,
    current_page: u32,
    mounted: bool,
}

impl PageTracker {
    pub fn new(chapter: &Chapter, debounce: Duration) -> Self {
        Self {
            chapter: chapter.id,
            page_count: chapter.page_count().max(1),
            debounce,
            pending: None,
            current_page: 1,
            mounted: false,
        }
    }

    pub fn chapter(&self) -> ChapterId {
        self.chapter
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Restores the saved scroll offset before anything is observed, then
    /// reads the page it lands on. Nothing is persisted here.
    pub fn mount(&mut self, observer: &mut dyn ViewportObserver, store: &ReaderStore) -> u32 {
        if let Some(offset) = store.scroll_position(self.chapter) {
            debug!(chapter = self.chapter, offset, "restoring scroll position");
            observer.scroll_to(offset);
        }
        self.pending = None;
        self.current_page = self.observe(observer).unwrap_or(1);
        self.mounted = true;
        self.current_page
    }

    /// Records a raw scroll event. The first event of a burst starts the
    /// debounce window; later ones only replace the offset.
    pub fn on_scroll(&mut self, offset: f32, now: Instant) {
        if !self.mounted {
            debug!(chapter = self.chapter, "ignoring scroll before mount");
            return;
        }
        match self.pending.as_mut() {
            Some(pending) => pending.offset = offset,
            None => {
                self.pending = Some(PendingScroll {
                    due: now + self.debounce,
                    offset,
                })
            }
        }
    }

    /// Emits one update once the debounce window of the pending burst has passed.
    pub fn poll(&mut self, now: Instant, observer: &dyn ViewportObserver) -> Option<PageUpdate> {
        if now < self.pending?.due {
            return None;
        }
        let pending = self.pending.take()?;
        if let Some(page) = self.observe(observer) {
            self.current_page = page;
        }
        Some(PageUpdate {
            chapter: self.chapter,
            page: self.current_page,
            scroll_offset: pending.offset,
        })
    }

    /// Emits the pending burst now, whatever its due time. The page is not
    /// re-observed: the layout may already belong to another chapter.
    pub fn flush(&mut self) -> Option<PageUpdate> {
        let pending = self.pending.take()?;
        Some(PageUpdate {
            chapter: self.chapter,
            page: self.current_page,
            scroll_offset: pending.offset,
        })
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.pending.map(|pending| pending.due)
    }

    fn observe(&self, observer: &dyn ViewportObserver) -> Option<u32> {
        let extents = observer.report_extents(PAGE_ELEMENTS);
        dominant_element(&extents, observer.viewport_height()).map(|page| page.min(self.page_count))
    }
}
