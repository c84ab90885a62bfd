use std::path::Path;

use anyhow::{Context, Result};
use dyingsky_core::{Chapter, ElementExtent, PageKind, ViewportObserver, PAGE_ELEMENTS};
use image::imageops::FilterType;
use rayon::prelude::*;
use tracing::{debug, warn};

/// Stand-in size for pages that cannot be measured (tall comic panel).
const FALLBACK_PAGE: (u32, u32) = (1000, 1500);
/// Looping clips are laid out as widescreen frames.
const CLIP_FRAME: (u32, u32) = (1600, 900);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageMetrics {
    pub number: u32,
    pub width: u32,
    pub height: u32,
    pub measured: bool,
}

impl PageMetrics {
    fn height_for(&self, column_width: f32) -> f32 {
        if self.width == 0 {
            return 0.0;
        }
        column_width * self.height as f32 / self.width as f32
    }
}

/// Reads every page's pixel size in parallel. Pages that fail to load keep a
/// fallback size so the chapter still lays out.
pub fn measure_pages(root: &Path, chapter: &Chapter) -> Vec<PageMetrics> {
    chapter
        .pages()
        .par_iter()
        .map(|page| {
            if page.kind == PageKind::Video {
                return PageMetrics {
                    number: page.number,
                    width: CLIP_FRAME.0,
                    height: CLIP_FRAME.1,
                    measured: false,
                };
            }
            let path = root.join(&page.path);
            match image::image_dimensions(&path) {
                Ok((width, height)) if width > 0 && height > 0 => PageMetrics {
                    number: page.number,
                    width,
                    height,
                    measured: true,
                },
                Ok(_) => {
                    warn!(?path, "page has zero size, using fallback");
                    fallback(page.number)
                }
                Err(err) => {
                    warn!(?path, error = %err, "page could not be measured, using fallback");
                    fallback(page.number)
                }
            }
        })
        .collect()
}

fn fallback(number: u32) -> PageMetrics {
    PageMetrics {
        number,
        width: FALLBACK_PAGE.0,
        height: FALLBACK_PAGE.1,
        measured: false,
    }
}

/// Pages stacked top to bottom in a single column, scrolled as one strip.
#[derive(Debug, Clone)]
pub struct StripLayout {
    tops: Vec<f32>,
    heights: Vec<f32>,
    viewport_height: f32,
    offset: f32,
}

impl StripLayout {
    pub fn new(metrics: &[PageMetrics], column_width: f32, gap: f32, viewport_height: f32) -> Self {
        let heights: Vec<f32> = metrics
            .iter()
            .map(|page| page.height_for(column_width))
            .collect();
        Self::from_heights(heights, gap, viewport_height)
    }

    pub fn from_heights(heights: Vec<f32>, gap: f32, viewport_height: f32) -> Self {
        let gap = gap.max(0.0);
        let mut tops = Vec::with_capacity(heights.len());
        let mut cursor = 0.0;
        for height in &heights {
            tops.push(cursor);
            cursor += height + gap;
        }
        Self {
            tops,
            heights,
            viewport_height: viewport_height.max(1.0),
            offset: 0.0,
        }
    }

    pub fn content_height(&self) -> f32 {
        match (self.tops.last(), self.heights.last()) {
            (Some(top), Some(height)) => top + height,
            _ => 0.0,
        }
    }

    pub fn max_offset(&self) -> f32 {
        (self.content_height() - self.viewport_height).max(0.0)
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn scroll_by(&mut self, delta: f32) -> f32 {
        self.scroll_to(self.offset + delta);
        self.offset
    }

    /// Strip offset at which `page` (1-based) starts.
    pub fn page_top(&self, page: u32) -> Option<f32> {
        let index = page.checked_sub(1)? as usize;
        self.tops.get(index).copied()
    }

    pub fn set_viewport_height(&mut self, viewport_height: f32) {
        self.viewport_height = viewport_height.max(1.0);
        self.scroll_to(self.offset);
    }
}

impl ViewportObserver for StripLayout {
    fn report_extents(&self, element_set: &str) -> Vec<ElementExtent> {
        if element_set != PAGE_ELEMENTS {
            debug!(element_set, "unknown element set");
            return Vec::new();
        }
        self.tops
            .iter()
            .zip(&self.heights)
            .map(|(top, height)| ElementExtent {
                top: top - self.offset,
                height: *height,
            })
            .collect()
    }

    fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    fn scroll_to(&mut self, offset: f32) {
        let offset = if offset.is_finite() { offset } else { 0.0 };
        self.offset = offset.clamp(0.0, self.max_offset());
    }
}

#[derive(Debug, Clone)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

/// Decodes a page and shrinks it to fit within the given box, keeping its aspect ratio.
pub fn load_page_image(path: &Path, max_width: u32, max_height: u32) -> Result<PageImage> {
    let decoded =
        image::open(path).with_context(|| format!("failed to decode page image {:?}", path))?;
    let fitted = if decoded.width() > max_width || decoded.height() > max_height {
        decoded.resize(max_width.max(1), max_height.max(1), FilterType::Triangle)
    } else {
        decoded
    };
    let rgba = fitted.to_rgba8();
    Ok(PageImage {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}
