//! Page button window for paginated list views.

use serde::Serialize;

/// One entry in the page button row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "page", rename_all = "snake_case")]
pub enum PageItem {
    Page(u32),
    Ellipsis,
}

/// Pagination state for a list view.
///
/// The first page is always shown, followed by a window around the current
/// page (widened to five pages when near either end), the last page when
/// there is more than one, and an ellipsis wherever pages are skipped.
///
/// ```
/// use epochmine_core::{PageItem, PageWindow};
///
/// let window = PageWindow::new(10, 200, 10);
/// assert_eq!(window.total_pages(), 20);
/// assert_eq!(window.items().first(), Some(&PageItem::Page(1)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    current: u32,
    total_pages: u32,
    total_items: u64,
    items: Vec<PageItem>,
}

impl PageWindow {
    /// Build the window. `current` is clamped into `1..=total_pages`, and an
    /// empty list still has one page.
    #[must_use]
    pub fn new(current: u32, total_items: u64, page_size: u32) -> Self {
        let page_size = u64::from(page_size.max(1));
        let total_pages = u32::try_from(total_items.div_ceil(page_size))
            .unwrap_or(u32::MAX)
            .max(1);
        let current = current.clamp(1, total_pages);

        Self {
            current,
            total_pages,
            total_items,
            items: Self::layout(i64::from(current), i64::from(total_pages)),
        }
    }

    fn layout(current: i64, total: i64) -> Vec<PageItem> {
        let mut items = vec![PageItem::Page(1)];

        let mut start = (current - 2).max(2);
        let mut end = (current + 2).min(total - 1);
        if end - start < 4 {
            if start == 2 {
                end = 6.min(total - 1);
            } else if end == total - 1 {
                start = (total - 5).max(2);
            }
        }

        if start > 2 {
            items.push(PageItem::Ellipsis);
        }
        items.extend((start..=end).filter_map(|p| u32::try_from(p).ok().map(PageItem::Page)));
        if end < total - 1 {
            items.push(PageItem::Ellipsis);
        }
        if total > 1 {
            items.push(PageItem::Page(u32::try_from(total).unwrap_or(u32::MAX)));
        }
        items
    }

    #[must_use]
    pub const fn current(&self) -> u32 {
        self.current
    }

    #[must_use]
    pub const fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[must_use]
    pub const fn total_items(&self) -> u64 {
        self.total_items
    }

    #[must_use]
    pub fn items(&self) -> &[PageItem] {
        &self.items
    }

    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.current > 1
    }

    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.current < self.total_pages
    }

    #[must_use]
    pub const fn previous(&self) -> u32 {
        if self.current > 1 { self.current - 1 } else { 1 }
    }

    #[must_use]
    pub const fn next(&self) -> u32 {
        if self.has_next() {
            self.current + 1
        } else {
            self.current
        }
    }
}
