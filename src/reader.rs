//! Reader-side state machines: the incremental reveal window, the sentinel
//! observer that drives it, and the chapter cursor for prev/next navigation.
//!
//! None of this touches the terminal or the network; the UI model feeds it
//! viewport ranges and reads back how many pages to render.

use crate::catalog::Manga;

pub const DEFAULT_REVEAL_STEP: usize = 10;

/// How many of a chapter's pages are currently rendered.
///
/// The rendered slice is always `pages[0 .. revealed + step)` clamped to the
/// page count. `revealed` only ever grows while a chapter is open; opening
/// another chapter builds a fresh window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealWindow {
    revealed: usize,
    total: usize,
    step: usize,
}

impl RevealWindow {
    pub fn new(total: usize, step: usize) -> Self {
        Self {
            revealed: 0,
            total,
            step: step.max(1),
        }
    }

    pub fn revealed(&self) -> usize {
        self.revealed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of pages the reader should currently render.
    pub fn visible_count(&self) -> usize {
        (self.revealed + self.step).min(self.total)
    }

    /// Index of the last rendered page; the sentinel observer watches this one.
    pub fn last_visible_index(&self) -> Option<usize> {
        self.visible_count().checked_sub(1)
    }

    pub fn is_exhausted(&self) -> bool {
        self.revealed >= self.total
    }

    /// Advance the window by one step. Returns the range of page indices that
    /// became visible, or `None` once the window is exhausted.
    pub fn advance(&mut self) -> Option<std::ops::Range<usize>> {
        if self.is_exhausted() {
            return None;
        }
        let before = self.visible_count();
        self.revealed = (self.revealed + self.step).min(self.total);
        let after = self.visible_count();
        if after > before {
            Some(before..after)
        } else {
            // The lookahead already covered the tail; the counter moved but
            // nothing new became visible.
            Some(after..after)
        }
    }
}

/// Explicit handle for viewport-intersection detection.
///
/// Watches at most one page index at a time. `attach` replaces any previous
/// watch (disconnect-before-replace); `detach` is the teardown half of the
/// contract. `fire` reports whether the watched index sits inside the
/// viewport range the UI computed for this frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SentinelObserver {
    watched: Option<usize>,
}

impl SentinelObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, index: usize) {
        self.watched = Some(index);
    }

    pub fn detach(&mut self) {
        self.watched = None;
    }

    pub fn watched(&self) -> Option<usize> {
        self.watched
    }

    pub fn is_attached(&self) -> bool {
        self.watched.is_some()
    }

    pub fn fire(&self, viewport: std::ops::Range<usize>) -> bool {
        match self.watched {
            Some(index) => viewport.contains(&index),
            None => false,
        }
    }
}

/// Position of one chapter inside a manga's ordered chapter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterCursor {
    position: usize,
    total: usize,
}

impl ChapterCursor {
    /// Locate `chapter_id` in the manga by linear scan.
    pub fn locate(manga: &Manga, chapter_id: &str) -> Option<Self> {
        manga.chapter_position(chapter_id).map(|position| Self {
            position,
            total: manga.chapters.len(),
        })
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn has_previous(&self) -> bool {
        self.position > 0
    }

    pub fn has_next(&self) -> bool {
        self.position + 1 < self.total
    }

    pub fn previous<'a>(&self, manga: &'a Manga) -> Option<&'a str> {
        if !self.has_previous() {
            return None;
        }
        manga
            .chapters
            .get(self.position - 1)
            .map(|chapter| chapter.id.as_str())
    }

    pub fn next<'a>(&self, manga: &'a Manga) -> Option<&'a str> {
        if !self.has_next() {
            return None;
        }
        manga
            .chapters
            .get(self.position + 1)
            .map(|chapter| chapter.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Chapter, Manga};

    fn manga_with_chapters(ids: &[&str]) -> Manga {
        Manga {
            id: "m1".into(),
            title: "Sample".into(),
            cover: String::new(),
            background_image: String::new(),
            description: String::new(),
            chapters: ids
                .iter()
                .map(|id| Chapter {
                    id: (*id).into(),
                    title: format!("Chapter {id}"),
                    description: String::new(),
                    pages: vec!["01.jpg".into()],
                })
                .collect(),
        }
    }

    #[test]
    fn window_starts_with_one_step_of_lookahead() {
        let window = RevealWindow::new(35, 10);
        assert_eq!(window.revealed(), 0);
        assert_eq!(window.visible_count(), 10);
        assert_eq!(window.last_visible_index(), Some(9));
    }

    #[test]
    fn visible_count_never_exceeds_total() {
        let mut window = RevealWindow::new(13, 10);
        assert_eq!(window.visible_count(), 10);
        window.advance();
        assert_eq!(window.visible_count(), 13);
        window.advance();
        assert_eq!(window.visible_count(), 13);
    }

    #[test]
    fn advance_reports_newly_visible_range() {
        let mut window = RevealWindow::new(35, 10);
        assert_eq!(window.advance(), Some(10..20));
        assert_eq!(window.advance(), Some(20..30));
        assert_eq!(window.advance(), Some(30..35));
    }

    #[test]
    fn revealed_is_monotone() {
        let mut window = RevealWindow::new(25, 10);
        let mut last = window.revealed();
        for _ in 0..10 {
            window.advance();
            assert!(window.revealed() >= last);
            last = window.revealed();
        }
        assert!(window.revealed() <= window.total());
    }

    #[test]
    fn advance_is_idempotent_once_exhausted() {
        let mut window = RevealWindow::new(5, 10);
        // One step of lookahead already covers all 5 pages.
        assert_eq!(window.visible_count(), 5);
        assert_eq!(window.advance(), Some(5..5));
        assert!(window.is_exhausted());
        assert_eq!(window.advance(), None);
        assert_eq!(window.revealed(), 5);
    }

    #[test]
    fn empty_chapter_is_exhausted_immediately() {
        let mut window = RevealWindow::new(0, 10);
        assert_eq!(window.visible_count(), 0);
        assert_eq!(window.last_visible_index(), None);
        assert!(window.is_exhausted());
        assert_eq!(window.advance(), None);
    }

    #[test]
    fn zero_step_is_clamped() {
        let window = RevealWindow::new(4, 0);
        assert_eq!(window.visible_count(), 1);
    }

    #[test]
    fn observer_watches_one_index_at_a_time() {
        let mut observer = SentinelObserver::new();
        assert!(!observer.is_attached());
        observer.attach(9);
        observer.attach(19);
        assert_eq!(observer.watched(), Some(19));
        assert!(observer.fire(15..25));
        assert!(!observer.fire(0..10));
        observer.detach();
        assert!(!observer.fire(0..100));
    }

    #[test]
    fn cursor_flags_ends() {
        let manga = manga_with_chapters(&["c1", "c2", "c3"]);

        let first = ChapterCursor::locate(&manga, "c1").unwrap();
        assert!(!first.has_previous());
        assert!(first.has_next());
        assert_eq!(first.next(&manga), Some("c2"));
        assert_eq!(first.previous(&manga), None);

        let middle = ChapterCursor::locate(&manga, "c2").unwrap();
        assert!(middle.has_previous());
        assert!(middle.has_next());

        let last = ChapterCursor::locate(&manga, "c3").unwrap();
        assert!(last.has_previous());
        assert!(!last.has_next());
        assert_eq!(last.previous(&manga), Some("c2"));
        assert_eq!(last.next(&manga), None);
    }

    #[test]
    fn cursor_misses_unknown_chapter() {
        let manga = manga_with_chapters(&["c1"]);
        assert!(ChapterCursor::locate(&manga, "zz").is_none());
    }
}
