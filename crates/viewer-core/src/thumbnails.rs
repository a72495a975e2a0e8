//! Thumbnail navigator
//!
//! A horizontal strip with one thumbnail per page. Thumbnails show the
//! cached page bitmaps scaled down by the front end; nothing is rendered
//! here. Activating a thumbnail jumps the presenter to that page.

use crate::presenter::{FlipBook, Navigation};
use flipbook_cache::PageCache;
use flipbook_render::RenderedPage;
use std::sync::Arc;

/// Strip layout, in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailConfig {
    pub thumbnail_width: f32,
    pub thumbnail_height: f32,

    /// Gap between thumbnails and at both strip ends
    pub spacing: f32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self { thumbnail_width: 96.0, thumbnail_height: 128.0, spacing: 16.0 }
    }
}

/// One entry in the strip.
#[derive(Debug, Clone)]
pub struct ThumbnailItem {
    pub index: u32,

    /// 1-based page number shown under the thumbnail
    pub label: String,

    /// Page belongs to the current spread
    pub highlighted: bool,

    /// Left edge within the strip content
    pub x: f32,

    /// Cached bitmap, if the page has been rendered
    pub image: Option<Arc<RenderedPage>>,
}

#[derive(Debug, Clone, Default)]
pub struct ThumbnailNavigator {
    config: ThumbnailConfig,
}

impl ThumbnailNavigator {
    pub fn new(config: ThumbnailConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    fn stride(&self) -> f32 {
        self.config.thumbnail_width + self.config.spacing
    }

    /// Left edge of thumbnail `index`.
    pub fn item_offset(&self, index: u32) -> f32 {
        self.config.spacing + index as f32 * self.stride()
    }

    /// Total strip width for `page_count` thumbnails.
    pub fn content_width(&self, page_count: u32) -> f32 {
        self.config.spacing + page_count as f32 * self.stride()
    }

    /// Strip entries for every page of the book.
    pub fn items(&self, cache: &PageCache, book: &FlipBook) -> Vec<ThumbnailItem> {
        let spread = book.spread();
        (0..book.page_count())
            .map(|index| ThumbnailItem {
                index,
                label: (index + 1).to_string(),
                highlighted: spread.contains(index),
                x: self.item_offset(index),
                image: cache.get(index),
            })
            .collect()
    }

    /// Jump the presenter to the page of thumbnail `index`.
    pub fn activate(&self, index: u32, book: &mut FlipBook) -> Navigation {
        book.jump_to(index)
    }

    /// Thumbnail under strip coordinate `x`, given the current scroll offset.
    pub fn hit_test(&self, x: f32, scroll_offset: f32, page_count: u32) -> Option<u32> {
        let content_x = x + scroll_offset - self.config.spacing;
        if content_x < 0.0 {
            return None;
        }
        let index = (content_x / self.stride()) as u32;
        let within = content_x - index as f32 * self.stride();
        (index < page_count && within <= self.config.thumbnail_width).then_some(index)
    }

    /// Scroll offset that keeps the current spread's thumbnails visible.
    ///
    /// Returns `current_offset` unchanged when they already are.
    pub fn scroll_offset_for(&self, book: &FlipBook, viewport_width: f32, current_offset: f32) -> f32 {
        let spread = book.spread();
        let last = spread.right.unwrap_or(spread.left);
        let start = self.item_offset(spread.left) - self.config.spacing;
        let end = self.item_offset(last) + self.config.thumbnail_width + self.config.spacing;

        let mut target = current_offset;
        if start < current_offset {
            target = start;
        } else if end > current_offset + viewport_width {
            target = end - viewport_width;
        }

        let max_scroll = (self.content_width(book.page_count()) - viewport_width).max(0.0);
        target.clamp(0.0, max_scroll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::FlipBookConfig;
    use flipbook_render::PageFormat;

    fn cache_with_pages(count: u32) -> PageCache {
        let cache = PageCache::new(count);
        for index in 0..count {
            cache
                .insert(RenderedPage {
                    index,
                    width: 4,
                    height: 4,
                    format: PageFormat::Png,
                    bytes: vec![1, 2, 3],
                })
                .expect("insert succeeds");
        }
        cache
    }

    #[test]
    fn items_cover_every_page_and_highlight_the_spread() {
        let cache = cache_with_pages(5);
        let mut book = FlipBook::new(5, FlipBookConfig::default());
        book.jump_to(2);

        let items = ThumbnailNavigator::default().items(&cache, &book);
        assert_eq!(items.len(), 5);
        assert_eq!(items[0].label, "1");
        assert!(items.iter().all(|item| item.image.is_some()));

        let highlighted: Vec<u32> = items.iter().filter(|i| i.highlighted).map(|i| i.index).collect();
        assert_eq!(highlighted, vec![1, 2]);
        assert_eq!(items[1].x, 16.0 + 112.0);
    }

    #[test]
    fn activate_jumps_with_clamping() {
        let navigator = ThumbnailNavigator::default();
        let mut book = FlipBook::new(4, FlipBookConfig::default());

        assert_eq!(navigator.activate(3, &mut book), Navigation::Moved { from: 0, to: 3 });
        navigator.activate(99, &mut book);
        assert_eq!(book.current_page(), 3);
    }

    #[test]
    fn hit_test_maps_positions_to_pages() {
        let navigator = ThumbnailNavigator::default();
        assert_eq!(navigator.hit_test(5.0, 0.0, 10), None);
        assert_eq!(navigator.hit_test(20.0, 0.0, 10), Some(0));
        // Gap between the first and second thumbnail.
        assert_eq!(navigator.hit_test(120.0, 0.0, 10), None);
        assert_eq!(navigator.hit_test(20.0, 112.0, 10), Some(1));
        assert_eq!(navigator.hit_test(20.0, 0.0, 0), None);
    }

    #[test]
    fn auto_scroll_follows_the_current_spread() {
        let navigator = ThumbnailNavigator::default();
        let mut book = FlipBook::new(30, FlipBookConfig::default());

        assert_eq!(navigator.scroll_offset_for(&book, 400.0, 0.0), 0.0);

        book.jump_to(10);
        let offset = navigator.scroll_offset_for(&book, 400.0, 0.0);
        let spread_end = navigator.item_offset(10) + 96.0 + 16.0;
        assert!((offset + 400.0 - spread_end).abs() < 1e-3);

        book.jump_to(0);
        assert_eq!(navigator.scroll_offset_for(&book, 400.0, offset), 0.0);
    }

    #[test]
    fn short_strips_never_scroll() {
        let navigator = ThumbnailNavigator::default();
        let mut book = FlipBook::new(2, FlipBookConfig::default());
        book.jump_to(1);
        assert_eq!(navigator.scroll_offset_for(&book, 2000.0, 0.0), 0.0);
    }
}
